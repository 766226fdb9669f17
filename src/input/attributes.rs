// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::Path;

// Attribute keys attached to every emitted record
pub const ATTR_LOG_FILE_NAME: &str = "log.file.name";
pub const ATTR_LOG_FILE_PATH: &str = "log.file.path";
pub const ATTR_LOG_FILE_NAME_RESOLVED: &str = "log.file.name_resolved";
pub const ATTR_LOG_FILE_PATH_RESOLVED: &str = "log.file.path_resolved";

/// Which file-identifying attributes accompany each record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeFlags {
    pub include_file_name: bool,
    pub include_file_path: bool,
    pub include_file_name_resolved: bool,
    pub include_file_path_resolved: bool,
}

/// File-identifying attributes of the stream a record came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub name: Option<String>,
    pub path: Option<String>,
    pub name_resolved: Option<String>,
    pub path_resolved: Option<String>,
}

impl FileAttributes {
    /// Resolve the attributes for `path`. Resolved variants follow symlinks; if
    /// resolution fails the resolved attributes are left unset.
    pub fn resolve(path: &Path, flags: AttributeFlags) -> Self {
        let mut attrs = FileAttributes::default();

        if flags.include_file_name {
            attrs.name = file_name(path);
        }
        if flags.include_file_path {
            attrs.path = Some(path.display().to_string());
        }

        if flags.include_file_name_resolved || flags.include_file_path_resolved {
            match std::fs::canonicalize(path) {
                Ok(resolved) => {
                    if flags.include_file_name_resolved {
                        attrs.name_resolved = file_name(&resolved);
                    }
                    if flags.include_file_path_resolved {
                        attrs.path_resolved = Some(resolved.display().to_string());
                    }
                }
                Err(e) => {
                    tracing::debug!(path = ?path, error = %e, "Failed to resolve symlinks");
                }
            }
        }

        attrs
    }

    /// Attribute map keyed by the `log.file.*` keys, containing only the
    /// attributes that are set.
    pub fn to_map(&self) -> HashMap<&'static str, String> {
        let mut map = HashMap::with_capacity(4);
        let pairs = [
            (ATTR_LOG_FILE_NAME, &self.name),
            (ATTR_LOG_FILE_PATH, &self.path),
            (ATTR_LOG_FILE_NAME_RESOLVED, &self.name_resolved),
            (ATTR_LOG_FILE_PATH_RESOLVED, &self.path_resolved),
        ];
        for (key, value) in pairs {
            if let Some(v) = value {
                map.insert(key, v.clone());
            }
        }
        map
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
