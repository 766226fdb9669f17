use glob::{MatchOptions, Pattern, glob_with};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Discovers the files a consumer should be tailing.
pub trait FileFinder {
    /// Return the paths of all files currently matching, in a stable order.
    fn find_files(&self) -> Result<Vec<PathBuf>>;
}

/// Ensure a glob pattern parses, returning a configuration error if not.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))
}

/// GlobFileFinder finds files matching include patterns while excluding others
#[derive(Debug, Clone)]
pub struct GlobFileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl GlobFileFinder {
    /// Create a new GlobFileFinder with the given include and exclude patterns.
    /// Every pattern is parsed up front so that a malformed glob surfaces here
    /// rather than on a poll tick.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        for pattern in &include {
            validate_pattern(pattern)?;
        }
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    fn is_excluded(&self, path: &std::path::Path) -> bool {
        self.exclude
            .iter()
            .any(|pattern| pattern.matches_path_with(path, MATCH_OPTIONS))
    }
}

impl FileFinder for GlobFileFinder {
    /// Find all files matching the include patterns, excluding those matching exclude patterns
    fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches =
                glob_with(pattern, MATCH_OPTIONS).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                // Unreadable directory entries are skipped, the rest of the
                // pattern still counts
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unreadable glob entry");
                        continue;
                    }
                };

                if path.is_dir() || self.is_excluded(&path) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}

#[cfg(test)]
pub(crate) use mock::MockFileFinder;


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) {
        for name in ["test1.log", "test2.log", "other.txt", "ignored.log"] {
            fs::write(dir.path().join(name), format!("content of {}", name)).unwrap();
        }
    }

    #[test]
    fn test_finder_basic() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_finder_with_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*.log", dir.path().display());
        let exclude = format!("{}/ignored.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![include], vec![exclude]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(!files.iter().any(|p| p.ends_with("ignored.log")));
    }

    #[test]
    fn test_finder_no_duplicates() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern.clone(), pattern], vec![]).unwrap();

        assert_eq!(finder.find_files().unwrap().len(), 3);
    }

    #[test]
    fn test_finder_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested.log")).unwrap();
        fs::write(dir.path().join("real.log"), "x").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files, vec![dir.path().join("real.log")]);
    }

    #[test]
    fn test_finder_recursive_pattern() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/deep.log"), "x").unwrap();
        fs::write(dir.path().join("top.log"), "x").unwrap();

        let pattern = format!("{}/**/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        assert_eq!(finder.find_files().unwrap().len(), 2);
    }

    #[test]
    fn test_finder_rejects_invalid_glob() {
        let err = GlobFileFinder::new(vec!["/var/log/[".to_string()], vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidGlob(_)));

        let err =
            GlobFileFinder::new(vec!["/var/log/*".to_string()], vec!["***".to_string()]).unwrap_err();
        assert!(matches!(err, Error::InvalidGlob(_)));
    }

    #[test]
    fn test_finder_discovers_new_file_created_after_start() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("existing.log"), "initial content").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = GlobFileFinder::new(vec![pattern], vec![]).unwrap();

        assert_eq!(finder.find_files().unwrap().len(), 1);

        fs::write(dir.path().join("newfile.log"), "new file content\n").unwrap();
        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 2, "Should discover newfile.log");

        fs::write(dir.path().join("other.txt"), "text file").unwrap();
        assert_eq!(finder.find_files().unwrap().len(), 2);
    }
}
