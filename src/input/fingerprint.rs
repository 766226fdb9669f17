use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Smallest fingerprint size a consumer may be configured with.
pub const MIN_FINGERPRINT_SIZE: usize = 16;

/// Fingerprint size used when none is configured.
pub const DEFAULT_FINGERPRINT_SIZE: usize = 1000;

/// Identity of a logical stream: the leading bytes of its content.
///
/// Fingerprints are compared by prefix so that a file keeps its identity as
/// it grows past the length captured earlier. OS file identifiers are never
/// consulted; they do not survive rotation on every filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    prefix: Vec<u8>,
}

impl Fingerprint {
    /// Capture up to `size` bytes from the start of `file`. The handle's
    /// position is not respected; the read always begins at byte zero.
    pub fn new(file: &mut File, size: usize) -> io::Result<Self> {
        let mut prefix = Vec::with_capacity(size);
        read_range(file, 0, size, &mut prefix)?;
        Ok(Self { prefix })
    }

    pub fn from_bytes(prefix: Vec<u8>) -> Self {
        Self { prefix }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.prefix
    }

    pub fn len(&self) -> usize {
        self.prefix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Whether `other` is a non-empty prefix of this fingerprint.
    pub fn starts_with(&self, other: &Fingerprint) -> bool {
        !other.is_empty() && self.prefix.starts_with(&other.prefix)
    }

    /// Identity comparison: two fingerprints name the same stream when they
    /// agree over the length of the shorter one. Empty fingerprints have no
    /// identity and never match anything.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Grow the fingerprint with bytes that follow it in `file`, up to
    /// `max_size` bytes in total.
    pub fn extend(&mut self, file: &mut File, max_size: usize) -> io::Result<()> {
        let have = self.prefix.len();
        if have >= max_size {
            return Ok(());
        }
        read_range(file, have as u64, max_size - have, &mut self.prefix)
    }
}

fn read_range(file: &mut File, start: u64, len: usize, buf: &mut Vec<u8>) -> io::Result<()> {
    file.seek(SeekFrom::Start(start))?;
    file.by_ref().take(len as u64).read_to_end(buf)?;
    Ok(())
}
