// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file consumer.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::input::finder::validate_pattern;
use crate::input::{
    AttributeFlags, DEFAULT_FINGERPRINT_SIZE, EmitFunc, GlobFileFinder, MIN_FINGERPRINT_SIZE,
    Manager, ManagerSettings, ReaderFactory,
};
use crate::split::{SplitFunc, SplitterConfig, SplitterFactory};

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

impl FromStr for StartAt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "beginning" => Ok(StartAt::Beginning),
            "end" => Ok(StartAt::End),
            other => Err(Error::Config(format!(
                "invalid start_at location '{}', expected 'beginning' or 'end'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for StartAt {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for StartAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartAt::Beginning => write!(f, "beginning"),
            StartAt::End => write!(f, "end"),
        }
    }
}

/// Destructive behaviours the embedding application explicitly allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Permits `delete_after_read`
    pub allow_file_deletion: bool,
}

/// Configuration for a file consumer
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileConsumerConfig {
    /// Glob patterns for files to include
    #[serde(default)]
    pub include: Vec<String>,

    /// Glob patterns for files to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// How often to poll for file changes (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where to start reading files present at startup
    #[serde(default)]
    pub start_at: StartAt,

    /// Size of fingerprint to use for file identification (in bytes)
    #[serde(default = "default_fingerprint_size")]
    pub fingerprint_size: usize,

    /// Maximum size of a single log entry (in bytes)
    #[serde(default = "default_max_log_size")]
    pub max_log_size: usize,

    /// Maximum number of files open at once; half of them are read per batch
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,

    /// Maximum batches per poll, zero for no limit
    #[serde(default)]
    pub max_batches: usize,

    /// Maximum number of files remembered across polls
    #[serde(default = "default_max_known_files")]
    pub max_known_files: usize,

    /// Remove files once they have been read to the end
    #[serde(default)]
    pub delete_after_read: bool,

    #[serde(default = "default_true")]
    pub include_file_name: bool,

    #[serde(default)]
    pub include_file_path: bool,

    #[serde(default)]
    pub include_file_name_resolved: bool,

    #[serde(default)]
    pub include_file_path_resolved: bool,

    #[serde(flatten)]
    pub splitter: SplitterConfig,
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_fingerprint_size() -> usize {
    DEFAULT_FINGERPRINT_SIZE
}

fn default_max_log_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_concurrent_files() -> usize {
    1024
}

fn default_max_known_files() -> usize {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for FileConsumerConfig {
    fn default() -> Self {
        Self {
            include: vec![],
            exclude: vec![],
            poll_interval_ms: default_poll_interval_ms(),
            start_at: StartAt::default(),
            fingerprint_size: default_fingerprint_size(),
            max_log_size: default_max_log_size(),
            max_concurrent_files: default_max_concurrent_files(),
            max_batches: 0,
            max_known_files: default_max_known_files(),
            delete_after_read: false,
            include_file_name: true,
            include_file_path: false,
            include_file_name_resolved: false,
            include_file_path_resolved: false,
            splitter: SplitterConfig::default(),
        }
    }
}

impl FileConsumerConfig {
    /// Get the poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_batch_files(&self) -> usize {
        self.max_concurrent_files / 2
    }

    pub fn attribute_flags(&self) -> AttributeFlags {
        AttributeFlags {
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
            include_file_name_resolved: self.include_file_name_resolved,
            include_file_path_resolved: self.include_file_path_resolved,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::Config("include patterns cannot be empty".to_string()));
        }
        for pattern in self.include.iter().chain(self.exclude.iter()) {
            validate_pattern(pattern)?;
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".to_string()));
        }

        if self.fingerprint_size < MIN_FINGERPRINT_SIZE {
            return Err(Error::Config(format!(
                "fingerprint_size must be at least {} bytes",
                MIN_FINGERPRINT_SIZE
            )));
        }

        if self.max_log_size == 0 {
            return Err(Error::Config("max_log_size must be positive".to_string()));
        }

        if self.max_concurrent_files <= 1 {
            return Err(Error::Config(
                "max_concurrent_files must be greater than 1".to_string(),
            ));
        }

        if self.max_known_files < self.max_batch_files() {
            return Err(Error::Config(format!(
                "max_known_files must be at least {} (half of max_concurrent_files)",
                self.max_batch_files()
            )));
        }

        if self.delete_after_read && self.start_at == StartAt::End {
            return Err(Error::Config(
                "delete_after_read cannot be used with start_at 'end'".to_string(),
            ));
        }

        self.splitter.build_factory()?;

        Ok(())
    }

    /// Build a manager splitting records per the multiline configuration.
    pub fn build(
        &self,
        capabilities: Capabilities,
        emit: Option<EmitFunc>,
    ) -> Result<Manager<GlobFileFinder>> {
        self.check_capabilities(capabilities)?;
        self.validate()?;
        let splitter_factory = self.splitter.build_factory()?;
        self.build_manager(emit, splitter_factory)
    }

    /// Build a manager with a caller-supplied split function. Forced flushing
    /// and the `max_log_size` ceiling still apply.
    pub fn build_with_split_func(
        &self,
        capabilities: Capabilities,
        emit: Option<EmitFunc>,
        split_func: Option<SplitFunc>,
    ) -> Result<Manager<GlobFileFinder>> {
        self.check_capabilities(capabilities)?;
        self.validate()?;
        let split_func =
            split_func.ok_or_else(|| Error::Config("split function must be provided".to_string()))?;
        let splitter_factory = self.splitter.build_factory_with_split_func(split_func)?;
        self.build_manager(emit, splitter_factory)
    }

    fn check_capabilities(&self, capabilities: Capabilities) -> Result<()> {
        if self.delete_after_read && !capabilities.allow_file_deletion {
            return Err(Error::Config(
                "delete_after_read requires file deletion to be explicitly allowed".to_string(),
            ));
        }
        Ok(())
    }

    fn build_manager(
        &self,
        emit: Option<EmitFunc>,
        splitter_factory: SplitterFactory,
    ) -> Result<Manager<GlobFileFinder>> {
        let emit = emit.ok_or_else(|| Error::Config("emit function must be provided".to_string()))?;

        // Surface splitter problems now rather than on the first discovered file
        splitter_factory.build(self.max_log_size)?;

        let finder = GlobFileFinder::new(self.include.clone(), self.exclude.clone())?;
        let reader_factory = ReaderFactory::new(
            self.fingerprint_size,
            self.max_log_size,
            self.attribute_flags(),
            emit,
            splitter_factory,
            self.start_at == StartAt::Beginning,
        );

        Ok(Manager::new(
            finder,
            reader_factory,
            ManagerSettings {
                poll_interval: self.poll_interval(),
                max_batch_files: self.max_batch_files(),
                max_batches: self.max_batches,
                max_known_files: self.max_known_files,
                delete_after_read: self.delete_after_read,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FileAttributes;
    use crate::split::MultilineConfig;
    use std::sync::Arc;

    fn emit() -> Option<EmitFunc> {
        Some(Arc::new(|_: &FileAttributes, _: Vec<u8>| {}))
    }

    fn valid() -> FileConsumerConfig {
        FileConsumerConfig {
            include: vec!["/var/log/*.log".to_string()],
            ..Default::default()
        }
    }

    fn build_err(config: &FileConsumerConfig, capabilities: Capabilities) -> Error {
        match config.build(capabilities, emit()) {
            Ok(_) => panic!("expected build to fail"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_defaults() {
        let config = FileConsumerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.start_at, StartAt::End);
        assert_eq!(config.fingerprint_size, 1000);
        assert_eq!(config.max_log_size, 1024 * 1024);
        assert_eq!(config.max_batch_files(), 512);
        assert!(config.include_file_name);
        assert!(!config.delete_after_read);
    }

    #[test]
    fn test_deserialize() {
        let config: FileConsumerConfig = serde_json::from_str(
            r#"{
                "include": ["/logs/*.log"],
                "start_at": "beginning",
                "fingerprint_size": 64,
                "encoding": "utf-16le",
                "multiline": { "line_start_pattern": "^\\d{4}-" },
                "force_flush_period_ms": 0
            }"#,
        )
        .unwrap();

        assert_eq!(config.include, vec!["/logs/*.log"]);
        assert_eq!(config.start_at, StartAt::Beginning);
        assert_eq!(config.fingerprint_size, 64);
        assert_eq!(config.max_concurrent_files, 1024);
        assert_eq!(config.splitter.encoding.encoding, "utf-16le");
        assert_eq!(
            config.splitter.multiline,
            MultilineConfig {
                line_start_pattern: Some("^\\d{4}-".to_string()),
                line_end_pattern: None,
            }
        );
        assert_eq!(config.splitter.flusher.force_flush_period_ms, 0);
    }

    #[test]
    fn test_start_at_parse() {
        assert_eq!("beginning".parse::<StartAt>().unwrap(), StartAt::Beginning);
        assert_eq!(StartAt::try_from("end".to_string()).unwrap(), StartAt::End);
        assert!(StartAt::try_from("middle".to_string()).unwrap_err().is_config());
        assert!(serde_json::from_str::<FileConsumerConfig>(r#"{"start_at": "middle"}"#).is_err());
    }

    #[test]
    fn test_build() {
        let manager = valid().build(Capabilities::default(), emit()).unwrap();
        assert_eq!(manager.poll_interval(), Duration::from_millis(200));
        assert!(manager.known_files().is_empty());
    }

    #[test]
    fn test_missing_emit() {
        let result = valid().build(Capabilities::default(), None);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_include() {
        let err = build_err(&FileConsumerConfig::default(), Capabilities::default());
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_glob() {
        let mut config = valid();
        config.exclude = vec!["/var/log/[".to_string()];
        assert!(matches!(
            build_err(&config, Capabilities::default()),
            Error::InvalidGlob(_)
        ));
    }

    #[test]
    fn test_fingerprint_floor() {
        let mut config = valid();
        config.fingerprint_size = MIN_FINGERPRINT_SIZE - 1;
        assert!(build_err(&config, Capabilities::default()).is_config());

        config.fingerprint_size = MIN_FINGERPRINT_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_numeric_bounds() {
        let mut config = valid();
        config.max_log_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_concurrent_files = 1;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.max_concurrent_files = 10;
        config.max_known_files = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delete_after_read_requires_beginning() {
        let mut config = valid();
        config.delete_after_read = true;
        let allowed = Capabilities {
            allow_file_deletion: true,
        };
        assert!(build_err(&config, allowed).is_config());

        config.start_at = StartAt::Beginning;
        assert!(config.build(allowed, emit()).is_ok());
    }

    #[test]
    fn test_delete_after_read_requires_capability() {
        let mut config = valid();
        config.delete_after_read = true;
        config.start_at = StartAt::Beginning;
        assert!(build_err(&config, Capabilities::default()).is_config());
    }

    #[test]
    fn test_unbuildable_splitter() {
        let mut config = valid();
        config.splitter.encoding.encoding = "klingon".to_string();
        assert!(matches!(
            build_err(&config, Capabilities::default()),
            Error::Encoding(_)
        ));

        let mut config = valid();
        config.splitter.multiline = MultilineConfig {
            line_start_pattern: Some("^a".to_string()),
            line_end_pattern: Some("b$".to_string()),
        };
        assert!(build_err(&config, Capabilities::default()).is_config());
    }

    #[test]
    fn test_validate_checks_splitter() {
        let mut config = valid();
        config.splitter.encoding.encoding = "klingon".to_string();
        assert!(matches!(config.validate(), Err(Error::Encoding(_))));

        let mut config = valid();
        config.splitter.multiline.line_end_pattern = Some("(".to_string());
        assert!(matches!(config.validate(), Err(Error::Regex(_))));
    }

    #[test]
    fn test_build_with_split_func() {
        let config = valid();
        let split: SplitFunc = Arc::new(|data: &[u8], at_eof: bool| {
            if at_eof && !data.is_empty() {
                Ok((data.len(), Some(data.to_vec())))
            } else {
                Ok((0, None))
            }
        });

        assert!(
            config
                .build_with_split_func(Capabilities::default(), emit(), Some(split))
                .is_ok()
        );
        assert!(matches!(
            config.build_with_split_func(Capabilities::default(), emit(), None),
            Err(Error::Config(_))
        ));
    }
}
