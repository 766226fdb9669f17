// SPDX-License-Identifier: Apache-2.0

//! Rotation and truncation handling.
//!
//! Identity is purely content based, so the roller decides from fingerprints
//! and sizes alone whether a tracked handle was truncated, replaced in place,
//! or moved somewhere the finder no longer looks.

use std::path::PathBuf;

use tracing::{debug, info};

use super::fingerprint::Fingerprint;
use super::reader::Reader;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct Roller {
    fingerprint_size: usize,
}

impl Roller {
    pub fn new(fingerprint_size: usize) -> Self {
        Self { fingerprint_size }
    }

    /// Reset the reader to the start of its file if the file shrank below the
    /// tracked offset. Identity is kept. Returns whether a reset happened.
    pub fn check_truncation(&self, reader: &mut Reader) -> Result<bool> {
        let offset = reader.offset();
        let Some(file) = reader.file_mut() else {
            return Ok(false);
        };
        let size = file
            .metadata()
            .map_err(|e| Error::Read {
                path: reader.path().to_path_buf(),
                source: e,
            })?
            .len();

        if size < offset {
            info!(
                path = ?reader.path(),
                offset,
                size,
                "File was truncated, reading from the beginning"
            );
            reader.set_offset(0);
            return Ok(true);
        }
        Ok(false)
    }

    /// Whether the content behind the reader's own handle still begins with
    /// the reader's fingerprint. A closed or unreadable handle is not valid.
    pub fn validate(&self, reader: &mut Reader) -> bool {
        let expected = reader.fingerprint().clone();
        let Some(file) = reader.file_mut() else {
            return false;
        };
        match Fingerprint::new(file, self.fingerprint_size) {
            Ok(current) => current.starts_with(&expected),
            Err(e) => {
                debug!(path = ?reader.path(), error = %e, "Failed to re-fingerprint open handle");
                false
            }
        }
    }

    /// Pull out of `known` the readers left open by the previous tick that no
    /// file discovered during this tick matched. Their handles still point at
    /// the moved files, so whatever was appended before the move can be
    /// drained.
    ///
    /// A handle whose content no longer begins with its fingerprint belongs to
    /// a file rewritten in place and is closed instead. So is a handle whose
    /// path is in `pending`, the paths this tick did not get to, since the
    /// next tick matches it again.
    pub fn take_lost(&self, known: &mut Vec<Reader>, pending: &[PathBuf]) -> Vec<Reader> {
        let mut lost = Vec::new();
        let mut kept = Vec::with_capacity(known.len());

        for mut reader in known.drain(..) {
            // Readers matched or created this tick have generation zero
            if !reader.is_open() || reader.generation() < 1 {
                kept.push(reader);
                continue;
            }

            if pending.iter().any(|p| p == reader.path()) {
                reader.close();
                kept.push(reader);
                continue;
            }

            if !self.validate(&mut reader) {
                debug!(path = ?reader.path(), "File replaced in place, closing previous handle");
                reader.close();
                kept.push(reader);
                continue;
            }

            debug!(path = ?reader.path(), "File no longer discovered, draining open handle");
            lost.push(reader);
        }

        *known = kept;
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::attributes::AttributeFlags;
    use crate::input::reader::tests::collecting_emit;
    use crate::input::reader::ReaderFactory;
    use crate::split::SplitterConfig;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn factory() -> ReaderFactory {
        let (emit, _) = collecting_emit();
        ReaderFactory::new(
            1000,
            1024,
            AttributeFlags::default(),
            emit,
            SplitterConfig::default().build_factory().unwrap(),
            true,
        )
    }

    fn reader_for(factory: &ReaderFactory, path: &Path) -> Reader {
        let mut file = fs::File::open(path).unwrap();
        let fp = factory.new_fingerprint(&mut file).unwrap();
        factory.new_reader(path.to_path_buf(), file, fp).unwrap()
    }

    #[test]
    fn test_truncation_resets_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "first line of content\n").unwrap();

        let factory = factory();
        let roller = Roller::new(1000);
        let mut reader = reader_for(&factory, &path);
        reader.read_to_end(&CancellationToken::new()).unwrap();
        assert_eq!(reader.offset(), 22);
        assert!(!roller.check_truncation(&mut reader).unwrap());

        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap()
            .write_all(b"new\n")
            .unwrap();

        assert!(roller.check_truncation(&mut reader).unwrap());
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_validate_detects_replaced_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "initial content\n").unwrap();

        let factory = factory();
        let roller = Roller::new(1000);
        let mut reader = reader_for(&factory, &path);
        assert!(roller.validate(&mut reader));

        // Rewrite the same inode with different content
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)
            .unwrap()
            .write_all(b"something else entirely\n")
            .unwrap();
        assert!(!roller.validate(&mut reader));

        reader.close();
        assert!(!roller.validate(&mut reader));
    }

    #[test]
    fn test_take_lost_moved_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "old stream\n").unwrap();

        let factory = factory();
        let roller = Roller::new(1000);
        let mut old = reader_for(&factory, &path);
        old.increment_generation();

        // Rotate: move away, create a new file at the same path
        fs::rename(&path, dir.path().join("a.log.1")).unwrap();
        fs::write(&path, "new stream\n").unwrap();

        let mut known = vec![old];
        let lost = roller.take_lost(&mut known, &[]);
        assert_eq!(lost.len(), 1);
        assert!(known.is_empty());
    }

    #[test]
    fn test_take_lost_skips_replaced_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "old stream\n").unwrap();

        let factory = factory();
        let roller = Roller::new(1000);
        let mut old = reader_for(&factory, &path);
        old.increment_generation();

        fs::write(&path, "rewritten\n").unwrap();

        let mut known = vec![old];
        let lost = roller.take_lost(&mut known, &[]);
        assert!(lost.is_empty());
        assert_eq!(known.len(), 1);
        assert!(!known[0].is_open());
    }

    #[test]
    fn test_take_lost_closes_pending_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "not reached this poll\n").unwrap();

        let factory = factory();
        let roller = Roller::new(1000);
        let mut old = reader_for(&factory, &path);
        old.increment_generation();

        let mut known = vec![old];
        let lost = roller.take_lost(&mut known, &[path.clone()]);
        assert!(lost.is_empty());
        assert_eq!(known.len(), 1);
        assert!(!known[0].is_open());
    }

    #[test]
    fn test_take_lost_ignores_current_tick_and_closed_readers() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        fs::write(&a, "stream a\n").unwrap();
        fs::write(&b, "stream b\n").unwrap();

        let factory = factory();
        let roller = Roller::new(1000);
        let fresh = reader_for(&factory, &a);
        let mut closed = reader_for(&factory, &b);
        closed.increment_generation();
        closed.close();

        let mut known = vec![fresh, closed];
        let lost = roller.take_lost(&mut known, &[]);
        assert!(lost.is_empty());
        assert_eq!(known.len(), 2);
    }
}
