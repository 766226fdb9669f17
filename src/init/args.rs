// SPDX-License-Identifier: Apache-2.0

use clap::{ArgAction, Args};
use std::fs;
use std::path::PathBuf;

use crate::config::{Capabilities, FileConsumerConfig, StartAt};
use crate::error::{Error, Result};
use crate::split::{EncodingConfig, FlusherConfig, MultilineConfig, SplitterConfig};

#[derive(Debug, Args, Clone)]
pub struct ConsumerRun {
    /// JSON configuration file. When set, the file options below are ignored
    #[arg(long, env = "FILECONSUMER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Glob patterns of files to tail
    #[arg(long, env = "FILECONSUMER_INCLUDE", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Glob patterns of files to skip
    #[arg(long, env = "FILECONSUMER_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Poll interval in milliseconds
    #[arg(long, env = "FILECONSUMER_POLL_INTERVAL_MS", default_value = "200")]
    pub poll_interval_ms: u64,

    /// Where to start reading files present at startup: beginning or end
    #[arg(long, env = "FILECONSUMER_START_AT", default_value = "end")]
    pub start_at: StartAt,

    /// Bytes compared to identify a file
    #[arg(long, env = "FILECONSUMER_FINGERPRINT_SIZE", default_value = "1000")]
    pub fingerprint_size: usize,

    /// Maximum size of a single record in bytes
    #[arg(long, env = "FILECONSUMER_MAX_LOG_SIZE", default_value = "1048576")]
    pub max_log_size: usize,

    /// Maximum number of files open at once
    #[arg(long, env = "FILECONSUMER_MAX_CONCURRENT_FILES", default_value = "1024")]
    pub max_concurrent_files: usize,

    /// Maximum batches per poll, 0 for no limit
    #[arg(long, env = "FILECONSUMER_MAX_BATCHES", default_value = "0")]
    pub max_batches: usize,

    /// Maximum number of files remembered across polls
    #[arg(long, env = "FILECONSUMER_MAX_KNOWN_FILES", default_value = "10000")]
    pub max_known_files: usize,

    /// Delete files once fully read; requires --allow-file-deletion
    #[arg(long, env = "FILECONSUMER_DELETE_AFTER_READ", default_value = "false")]
    pub delete_after_read: bool,

    /// Permit destructive options such as --delete-after-read
    #[arg(long, env = "FILECONSUMER_ALLOW_FILE_DELETION", default_value = "false")]
    pub allow_file_deletion: bool,

    #[arg(long, env = "FILECONSUMER_INCLUDE_FILE_NAME", default_value = "true", action = ArgAction::Set)]
    pub include_file_name: bool,

    #[arg(long, env = "FILECONSUMER_INCLUDE_FILE_PATH", default_value = "false")]
    pub include_file_path: bool,

    #[arg(long, env = "FILECONSUMER_INCLUDE_FILE_NAME_RESOLVED", default_value = "false")]
    pub include_file_name_resolved: bool,

    #[arg(long, env = "FILECONSUMER_INCLUDE_FILE_PATH_RESOLVED", default_value = "false")]
    pub include_file_path_resolved: bool,

    /// Text encoding of the files, or "nop" for raw bytes
    #[arg(long, env = "FILECONSUMER_ENCODING", default_value = "utf-8")]
    pub encoding: String,

    /// Regex matching the start of a multiline record
    #[arg(long, env = "FILECONSUMER_MULTILINE_LINE_START_PATTERN")]
    pub multiline_line_start_pattern: Option<String>,

    /// Regex matching the end of a multiline record
    #[arg(long, env = "FILECONSUMER_MULTILINE_LINE_END_PATTERN")]
    pub multiline_line_end_pattern: Option<String>,

    /// Emit an unterminated trailing record after this many milliseconds, 0 to disable
    #[arg(long, env = "FILECONSUMER_FORCE_FLUSH_PERIOD_MS", default_value = "500")]
    pub force_flush_period_ms: u64,

    /// Records buffered between readers and the output writer
    #[arg(long, env = "FILECONSUMER_SENDING_QUEUE_SIZE", default_value = "1000")]
    pub sending_queue_size: usize,
}

impl ConsumerRun {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            allow_file_deletion: self.allow_file_deletion,
        }
    }

    /// Consumer configuration from the config file if given, otherwise from
    /// the individual options.
    pub fn file_consumer_config(&self) -> Result<FileConsumerConfig> {
        if let Some(path) = &self.config {
            let contents = fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("failed to read {:?}: {}", path, e)))?;
            return serde_json::from_str(&contents)
                .map_err(|e| Error::Config(format!("failed to parse {:?}: {}", path, e)));
        }

        Ok(FileConsumerConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            poll_interval_ms: self.poll_interval_ms,
            start_at: self.start_at,
            fingerprint_size: self.fingerprint_size,
            max_log_size: self.max_log_size,
            max_concurrent_files: self.max_concurrent_files,
            max_batches: self.max_batches,
            max_known_files: self.max_known_files,
            delete_after_read: self.delete_after_read,
            include_file_name: self.include_file_name,
            include_file_path: self.include_file_path,
            include_file_name_resolved: self.include_file_name_resolved,
            include_file_path_resolved: self.include_file_path_resolved,
            splitter: SplitterConfig {
                encoding: EncodingConfig {
                    encoding: self.encoding.clone(),
                },
                multiline: MultilineConfig {
                    line_start_pattern: self.multiline_line_start_pattern.clone(),
                    line_end_pattern: self.multiline_line_end_pattern.clone(),
                },
                flusher: FlusherConfig {
                    force_flush_period_ms: self.force_flush_period_ms,
                },
            },
        })
    }
}
