use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::attributes::{AttributeFlags, FileAttributes};
use super::fingerprint::Fingerprint;
use crate::error::{Error, Result};
use crate::split::{Encoding, Splitter, SplitterFactory};

/// Callback receiving every record together with the attributes of the file
/// it was read from. Called synchronously from reader workers, so it must not
/// block indefinitely.
pub type EmitFunc = Arc<dyn Fn(&FileAttributes, Vec<u8>) + Send + Sync>;

/// Upper bound on a single read from disk; the split buffer itself is bounded
/// by `max_log_size`.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Settings shared by every reader of a consumer
struct ReaderConfig {
    fingerprint_size: usize,
    max_log_size: usize,
    attributes: AttributeFlags,
    emit: EmitFunc,
}

/// Builds readers for newly discovered files and reattaches known readers to
/// freshly opened handles.
pub struct ReaderFactory {
    config: Arc<ReaderConfig>,
    splitter_factory: SplitterFactory,
    /// Whether new readers start at offset zero or at the current end of file
    from_beginning: bool,
}

impl ReaderFactory {
    pub fn new(
        fingerprint_size: usize,
        max_log_size: usize,
        attributes: AttributeFlags,
        emit: EmitFunc,
        splitter_factory: SplitterFactory,
        from_beginning: bool,
    ) -> Self {
        Self {
            config: Arc::new(ReaderConfig {
                fingerprint_size,
                max_log_size,
                attributes,
                emit,
            }),
            splitter_factory,
            from_beginning,
        }
    }

    pub fn fingerprint_size(&self) -> usize {
        self.config.fingerprint_size
    }

    pub fn from_beginning(&self) -> bool {
        self.from_beginning
    }

    pub fn set_from_beginning(&mut self, from_beginning: bool) {
        self.from_beginning = from_beginning;
    }

    pub fn new_fingerprint(&self, file: &mut File) -> io::Result<Fingerprint> {
        Fingerprint::new(file, self.config.fingerprint_size)
    }

    /// Create a reader for a file whose fingerprint has not been seen before.
    pub fn new_reader(&self, path: PathBuf, file: File, fingerprint: Fingerprint) -> Result<Reader> {
        let offset = if self.from_beginning {
            0
        } else {
            file.metadata()?.len()
        };

        Ok(Reader {
            config: self.config.clone(),
            attributes: FileAttributes::resolve(&path, self.config.attributes),
            path,
            fingerprint,
            offset,
            file: Some(file),
            splitter: self.splitter_factory.build(self.config.max_log_size)?,
            encoding: self.splitter_factory.encoding(),
            generation: 0,
            eof: false,
            pending_bytes: 0,
        })
    }

    /// Point a known reader at a freshly opened handle for the file that now
    /// carries its fingerprint. Offset and splitter state carry over.
    pub fn reattach(&self, mut reader: Reader, path: PathBuf, file: File, fingerprint: Fingerprint) -> Reader {
        if reader.path != path {
            reader.attributes = FileAttributes::resolve(&path, self.config.attributes);
            reader.path = path;
        }
        // Both fingerprints agree over their common length; the fresh one
        // reflects what is on disk now
        reader.fingerprint = fingerprint;
        reader.file = Some(file);
        reader.generation = 0;
        reader
    }
}

/// Reader tracks one logical stream: its identity, how far it has been
/// emitted, and the handle it is currently read through.
pub struct Reader {
    config: Arc<ReaderConfig>,
    /// Path the file was last discovered at
    path: PathBuf,
    attributes: FileAttributes,
    fingerprint: Fingerprint,
    /// Bytes of the file already emitted (or skipped at start)
    offset: u64,
    /// Open handle; None while closed to stay under the open file limit
    file: Option<File>,
    splitter: Splitter,
    encoding: Encoding,
    /// Poll ticks since the file was last discovered
    generation: u64,
    /// Whether the last read reached the end of the file
    eof: bool,
    /// Bytes past `offset` that did not form a complete record on the last read
    pending_bytes: usize,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("fingerprint_len", &self.fingerprint.len())
            .field("open", &self.file.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

impl Reader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn attributes(&self) -> &FileAttributes {
        &self.attributes
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn increment_generation(&mut self) {
        self.generation += 1;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut File> {
        self.file.as_mut()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// End of file was reached and every byte up to it has been emitted.
    pub fn is_drained(&self) -> bool {
        self.eof && self.pending_bytes == 0
    }

    /// Read everything appended since the last read, emitting one record per
    /// split boundary. Returns the number of bytes consumed.
    ///
    /// The offset only moves past complete records, so a trailing partial
    /// record is read again next time. Cancellation stops between records.
    pub fn read_to_end(&mut self, cancel: &CancellationToken) -> Result<u64> {
        self.eof = false;
        let start = self.offset;

        let Some(mut file) = self.file.take() else {
            debug!(path = ?self.path, "Reader has no open handle, skipping read");
            return Ok(0);
        };
        let result = self.read_from(&mut file, cancel);
        self.file = Some(file);
        result?;

        if self.fingerprint.len() < self.config.fingerprint_size {
            if let Some(file) = self.file.as_mut() {
                self.fingerprint
                    .extend(file, self.config.fingerprint_size)
                    .map_err(|e| read_error(&self.path, e))?;
            }
        }

        Ok(self.offset - start)
    }

    fn read_from(&mut self, file: &mut File, cancel: &CancellationToken) -> Result<()> {
        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| read_error(&self.path, e))?;

        let max_log_size = self.splitter.max_log_size();
        let mut buf: Vec<u8> = Vec::with_capacity(max_log_size.min(READ_CHUNK_SIZE));
        let mut at_eof = false;

        loop {
            if buf.len() < max_log_size {
                let want = (max_log_size - buf.len()).min(READ_CHUNK_SIZE);
                let filled = buf.len();
                buf.resize(filled + want, 0);
                let n = match file.read(&mut buf[filled..]) {
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        buf.truncate(filled);
                        continue;
                    }
                    Err(e) => {
                        buf.truncate(filled);
                        self.pending_bytes = buf.len();
                        return Err(read_error(&self.path, e));
                    }
                };
                buf.truncate(filled + n);
                at_eof = n == 0;
            }

            let mut consumed = 0;
            loop {
                if cancel.is_cancelled() {
                    debug!(path = ?self.path, offset = self.offset, "Read cancelled");
                    self.pending_bytes = buf.len() - consumed;
                    return Ok(());
                }

                let (advance, token) = self
                    .splitter
                    .split(&buf[consumed..], at_eof)
                    .map_err(|e| read_error(&self.path, e))?;
                if advance == 0 {
                    break;
                }
                if let Some(token) = token {
                    self.emit(&token);
                }
                consumed += advance;
                self.offset += advance as u64;
            }
            buf.drain(..consumed);

            if at_eof {
                self.eof = true;
                self.pending_bytes = buf.len();
                return Ok(());
            }
        }
    }

    fn emit(&self, token: &[u8]) {
        let (record, had_errors) = self.encoding.decode(token);
        if had_errors {
            error!(
                path = ?self.path,
                encoding = self.encoding.name(),
                "Record contained bytes invalid for the configured encoding"
            );
        }
        if record.is_empty() {
            return;
        }
        (self.config.emit)(&self.attributes, record);
    }

    /// Close the file handle
    pub fn close(&mut self) {
        self.file = None;
    }
}

fn read_error(path: &Path, source: io::Error) -> Error {
    Error::Read {
        path: path.to_path_buf(),
        source,
    }
}
