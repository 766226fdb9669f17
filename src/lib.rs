// SPDX-License-Identifier: Apache-2.0

//! Fingerprint-based file tailing.
//!
//! A [`Manager`] polls for files matching a set of globs, recognises files it
//! has seen before by a prefix of their content, and emits every newly
//! appended record exactly once through a caller-supplied callback, across
//! rotation, truncation and renames.

pub mod bounded_channel;
pub mod config;
pub mod error;
pub mod init;
pub mod input;
pub mod split;

pub use config::{Capabilities, FileConsumerConfig, StartAt};
pub use error::{Error, Result};
pub use input::{EmitFunc, FileAttributes, FileFinder, Fingerprint, GlobFileFinder, Manager};
pub use split::SplitFunc;
