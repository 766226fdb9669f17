// SPDX-License-Identifier: Apache-2.0

//! Carving records out of a byte stream.
//!
//! A [`SplitterFactory`] is built once per consumer; every reader then gets
//! its own [`Splitter`], because forced flushing keeps per-stream state.

pub mod encoding;
pub mod flusher;
pub mod multiline;

pub use encoding::{Encoding, EncodingConfig};
pub use flusher::{Flusher, FlusherConfig};
pub use multiline::MultilineConfig;

use serde::Deserialize;
use std::io;
use std::sync::Arc;

use crate::error::{Error, Result};

/// Byte-boundary strategy. Given the pending bytes and whether the end of the
/// stream has been reached, returns how many bytes to consume and the record
/// found, if any. `(0, None)` asks for more data.
pub type SplitFunc = Arc<dyn Fn(&[u8], bool) -> io::Result<(usize, Option<Vec<u8>>)> + Send + Sync>;

/// Splitting options, flattened into the consumer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SplitterConfig {
    #[serde(flatten)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub multiline: MultilineConfig,
    #[serde(flatten)]
    pub flusher: FlusherConfig,
}

impl SplitterConfig {
    /// Factory splitting records per the multiline configuration.
    pub fn build_factory(&self) -> Result<SplitterFactory> {
        let encoding = self.encoding.build()?;
        let split_func = self.multiline.build(encoding)?;
        Ok(SplitterFactory::new(encoding, self.flusher, split_func))
    }

    /// Factory using a caller-supplied split function.
    pub fn build_factory_with_split_func(&self, split_func: SplitFunc) -> Result<SplitterFactory> {
        let encoding = self.encoding.build()?;
        Ok(SplitterFactory::new(encoding, self.flusher, split_func))
    }
}

/// Long-lived template for per-reader splitters.
#[derive(Clone)]
pub struct SplitterFactory {
    encoding: Encoding,
    flusher: FlusherConfig,
    split_func: SplitFunc,
}

impl std::fmt::Debug for SplitterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitterFactory")
            .field("encoding", &self.encoding.name())
            .field("flusher", &self.flusher)
            .finish_non_exhaustive()
    }
}

impl SplitterFactory {
    pub fn new(encoding: Encoding, flusher: FlusherConfig, split_func: SplitFunc) -> Self {
        Self {
            encoding,
            flusher,
            split_func,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn build(&self, max_log_size: usize) -> Result<Splitter> {
        if max_log_size == 0 {
            return Err(Error::Config("`max_log_size` must be positive".to_string()));
        }
        Ok(Splitter {
            split_func: self.split_func.clone(),
            flusher: self.flusher.build(),
            max_log_size,
        })
    }
}

/// Per-reader splitter: the configured split function, capped at
/// `max_log_size` per record, with forced flushing of stale trailing data.
pub struct Splitter {
    split_func: SplitFunc,
    flusher: Flusher,
    max_log_size: usize,
}

impl Splitter {
    pub fn max_log_size(&self) -> usize {
        self.max_log_size
    }

    pub fn split(&mut self, data: &[u8], at_eof: bool) -> io::Result<(usize, Option<Vec<u8>>)> {
        let (advance, token) = (self.split_func)(data, at_eof)?;
        if advance > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "split function advanced past the end of the buffer",
            ));
        }

        if token.is_some() {
            if advance == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "split function returned a record without consuming input",
                ));
            }
            self.flusher.flushed();
            return Ok((advance, token));
        }
        if advance > 0 {
            return Ok((advance, None));
        }

        // A record that fills the whole buffer is emitted in chunks
        if data.len() >= self.max_log_size {
            self.flusher.flushed();
            let chunk = &data[..self.max_log_size];
            return Ok((chunk.len(), Some(chunk.to_vec())));
        }

        if at_eof && !data.is_empty() {
            if self.flusher.should_flush() {
                self.flusher.flushed();
                return Ok((data.len(), Some(data.to_vec())));
            }
            self.flusher.update_data_change_time(data.len());
        }

        Ok((0, None))
    }
}
