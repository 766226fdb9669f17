// SPDX-License-Identifier: Apache-2.0

//! Poll loop tying discovery, identity matching and reading together.
//!
//! Each tick:
//! - discovers the matching paths and splits them into batches of at most
//!   `max_batch_files`
//! - matches every discovered file against the known readers by fingerprint
//! - reads each batch concurrently on blocking worker threads
//! - drains handles from the previous tick whose files went away
//! - folds the returned readers back into `known_files`, aging out old ones
//!
//! Workers own their reader by value and hand it back with the outcome, so
//! `known_files` and `seen_paths` are only ever touched by the poll loop.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesOrdered;
use tokio::select;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, error, info, warn};

use super::finder::FileFinder;
use super::fingerprint::Fingerprint;
use super::reader::{Reader, ReaderFactory};
use super::roller::Roller;
use crate::error::{Error, Result};

/// Readers not rediscovered for this many ticks are forgotten.
const MAX_GENERATIONS: u64 = 3;

/// Runtime settings of a [`Manager`], derived from the validated configuration.
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub poll_interval: Duration,
    /// Files read concurrently per batch
    pub max_batch_files: usize,
    /// Batches per tick, zero for no limit
    pub max_batches: usize,
    /// Ceiling on remembered readers
    pub max_known_files: usize,
    pub delete_after_read: bool,
}

/// A reader handed back by a worker along with how its read went.
struct ReadResult {
    reader: Reader,
    outcome: Result<u64>,
}

pub struct Manager<F: FileFinder> {
    finder: F,
    reader_factory: ReaderFactory,
    roller: Roller,
    settings: ManagerSettings,
    /// Readers remembered across ticks, oldest first
    known_files: Vec<Reader>,
    /// Paths already announced in the logs
    seen_paths: HashSet<PathBuf>,
    first_check: bool,
    cancel: CancellationToken,
}

impl<F: FileFinder> Manager<F> {
    pub fn new(finder: F, reader_factory: ReaderFactory, settings: ManagerSettings) -> Self {
        let roller = Roller::new(reader_factory.fingerprint_size());
        Self {
            finder,
            reader_factory,
            roller,
            settings,
            known_files: Vec::new(),
            seen_paths: HashSet::new(),
            first_check: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    pub fn known_files(&self) -> &[Reader] {
        &self.known_files
    }

    /// Run a single poll tick to completion.
    pub async fn poll(&mut self) {
        for reader in &mut self.known_files {
            reader.increment_generation();
        }

        let paths = match self.finder.find_files() {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "File discovery failed, skipping poll");
                return;
            }
        };

        if self.first_check && paths.is_empty() {
            warn!("No files match the configured include patterns");
        }

        // Fingerprints consumed this tick, across batches
        let mut tick_fingerprints: Vec<Fingerprint> = Vec::new();
        let mut remaining = paths.as_slice();
        let mut batches = 0;
        loop {
            let take = remaining.len().min(self.settings.max_batch_files);
            let (batch, rest) = remaining.split_at(take);
            batches += 1;
            let limited = self.settings.max_batches != 0 && batches >= self.settings.max_batches;
            let last = rest.is_empty() || limited;

            self.consume(batch, &mut tick_fingerprints, last).await;
            remaining = rest;

            if remaining.is_empty() || self.cancel.is_cancelled() {
                break;
            }
            if limited {
                debug!(
                    skipped = remaining.len(),
                    "Reached batch limit, remaining files wait for the next poll"
                );
                break;
            }
        }

        self.drain_lost(remaining).await;
        self.evict();

        if self.first_check {
            // Anything first seen from now on was created after startup
            self.reader_factory.set_from_beginning(true);
            self.first_check = false;
        }
    }

    /// Read one batch. Its handles are closed afterwards unless it is the
    /// last batch of the tick, which stays open so the next tick can drain
    /// files moved out of sight in between.
    async fn consume(
        &mut self,
        paths: &[PathBuf],
        tick_fingerprints: &mut Vec<Fingerprint>,
        keep_open: bool,
    ) {
        debug!(files = paths.len(), "Consuming batch");

        let mut current = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(reader) = self.make_reader(path, tick_fingerprints) {
                current.push(reader);
            }
        }

        let mode = ReadMode::Current {
            delete_after_read: self.settings.delete_after_read,
        };
        let results = read_all(current, self.roller, &self.cancel, mode).await;

        for ReadResult { mut reader, outcome } in results {
            match outcome {
                Ok(consumed) => {
                    if consumed > 0 {
                        debug!(path = ?reader.path(), consumed, offset = reader.offset(), "Read file");
                    }
                    if !keep_open {
                        reader.close();
                    }
                    self.known_files.push(reader);
                }
                Err(e) => {
                    error!(path = ?reader.path(), error = %e, "Failed to read file, discarding reader");
                }
            }
        }
    }

    /// Drain and close the handles kept open by the previous tick whose
    /// files nothing discovered this tick matched. `pending` holds the paths
    /// this tick did not reach.
    async fn drain_lost(&mut self, pending: &[PathBuf]) {
        let lost = self.roller.take_lost(&mut self.known_files, pending);
        if lost.is_empty() {
            return;
        }

        let drained = read_all(lost, self.roller, &self.cancel, ReadMode::Drain).await;
        for ReadResult { mut reader, outcome } in drained {
            reader.close();
            match outcome {
                Ok(consumed) => {
                    debug!(path = ?reader.path(), consumed, "Drained file no longer discovered");
                    self.known_files.push(reader);
                }
                Err(e) => {
                    error!(path = ?reader.path(), error = %e, "Failed to drain rotated file");
                }
            }
        }
    }

    /// Open `path` and pair it with a known reader, or create a new one.
    /// Empty files and fingerprints already consumed this tick are skipped.
    fn make_reader(&mut self, path: &Path, tick_fingerprints: &mut Vec<Fingerprint>) -> Option<Reader> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                debug!(path = ?path, error = %e, "Failed to open file");
                return None;
            }
        };
        let fingerprint = match self.reader_factory.new_fingerprint(&mut file) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                debug!(path = ?path, error = %e, "Failed to fingerprint file");
                return None;
            }
        };

        if fingerprint.is_empty() {
            return None;
        }
        if tick_fingerprints.iter().any(|fp| fp.matches(&fingerprint)) {
            debug!(path = ?path, "Skipping file with a fingerprint already consumed this poll");
            return None;
        }
        tick_fingerprints.push(fingerprint.clone());

        if let Some(idx) = self.find_known(&fingerprint, path) {
            let known = self.known_files.remove(idx);
            return Some(
                self.reader_factory
                    .reattach(known, path.to_path_buf(), file, fingerprint),
            );
        }

        if self.seen_paths.insert(path.to_path_buf()) {
            if self.reader_factory.from_beginning() {
                info!(path = ?path, "Started watching file");
            } else {
                info!(
                    path = ?path,
                    "Started watching file from end. To read preexisting logs, set 'start_at' to 'beginning'"
                );
            }
        }

        match self
            .reader_factory
            .new_reader(path.to_path_buf(), file, fingerprint)
        {
            Ok(reader) => Some(reader),
            Err(e) => {
                error!(path = ?path, error = %e, "Failed to create reader");
                None
            }
        }
    }

    /// Index of the known reader carrying `fingerprint`. When several match,
    /// the one last seen at `path` wins, then the most recently used.
    fn find_known(&self, fingerprint: &Fingerprint, path: &Path) -> Option<usize> {
        let mut newest = None;
        for (idx, reader) in self.known_files.iter().enumerate().rev() {
            if !reader.fingerprint().matches(fingerprint) {
                continue;
            }
            if reader.path() == path {
                return Some(idx);
            }
            newest.get_or_insert(idx);
        }
        newest
    }

    /// Forget readers not seen for too long, then trim stale readers down to
    /// `max_known_files`. Readers matched this tick are never evicted, as
    /// their files would be read again from the beginning next tick.
    fn evict(&mut self) {
        self.known_files
            .retain(|reader| reader.generation() <= MAX_GENERATIONS);

        let mut excess = self
            .known_files
            .len()
            .saturating_sub(self.settings.max_known_files);
        if excess == 0 {
            return;
        }

        // Oldest first
        self.known_files.retain(|reader| {
            if excess > 0 && reader.generation() > 0 {
                excess -= 1;
                return false;
            }
            true
        });

        if excess > 0 {
            warn!(
                known_files = self.known_files.len(),
                max_known_files = self.settings.max_known_files,
                "More files matched this poll than max_known_files, keeping all of them"
            );
        }
    }

    fn close_all(&mut self) {
        for reader in &mut self.known_files {
            reader.close();
        }
    }

    /// Poll immediately and then every `poll_interval` until cancelled. The
    /// batch in flight when cancellation arrives is finished first.
    pub async fn run(mut self, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        self.cancel = cancel.clone();
        info!(poll_interval = ?self.settings.poll_interval, "Starting file consumer");

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Cancellation received, stopping poll loop");
                    break;
                }

                _ = interval.tick() => self.poll().await,
            }
        }

        self.close_all();
        info!("File consumer stopped");
        Ok(())
    }
}

impl<F: FileFinder + Send + 'static> Manager<F> {
    /// Spawn the poll loop onto `task_set`.
    pub async fn start(
        self,
        task_set: &mut JoinSet<std::result::Result<(), BoxError>>,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), BoxError> {
        let cancel = cancel.clone();
        task_set.spawn(async move { self.run(cancel).await });
        Ok(())
    }
}

/// How a worker treats the reader it was handed.
#[derive(Debug, Clone, Copy)]
enum ReadMode {
    /// A file discovered this tick: truncation check, read, optional delete
    Current { delete_after_read: bool },
    /// A validated handle to a file no longer discovered: read what is left
    Drain,
}

/// Read every reader to end on its own blocking worker and wait for all of
/// them.
async fn read_all(
    readers: Vec<Reader>,
    roller: Roller,
    cancel: &CancellationToken,
    mode: ReadMode,
) -> Vec<ReadResult> {
    let mut workers: FuturesOrdered<JoinHandle<ReadResult>> = FuturesOrdered::new();
    for reader in readers {
        let cancel = cancel.clone();
        workers.push_back(tokio::task::spawn_blocking(move || {
            read_reader(reader, roller, mode, &cancel)
        }));
    }

    let mut results = Vec::with_capacity(workers.len());
    while let Some(result) = workers.next().await {
        match result {
            Ok(result) => results.push(result),
            Err(e) => error!("Reader worker failed: {}", e),
        }
    }
    results
}

/// Worker body. Runs on a blocking thread.
fn read_reader(
    mut reader: Reader,
    roller: Roller,
    mode: ReadMode,
    cancel: &CancellationToken,
) -> ReadResult {
    let delete_after_read = match mode {
        ReadMode::Current { delete_after_read } => delete_after_read,
        ReadMode::Drain => {
            let outcome = reader.read_to_end(cancel);
            return ReadResult { reader, outcome };
        }
    };

    let outcome = roller
        .check_truncation(&mut reader)
        .and_then(|_| reader.read_to_end(cancel));

    if delete_after_read && outcome.is_ok() && reader.is_drained() {
        reader.close();
        match fs::remove_file(reader.path()) {
            Ok(()) => debug!(path = ?reader.path(), "Deleted file after read"),
            Err(e) => {
                let e = Error::Delete {
                    path: reader.path().to_path_buf(),
                    source: e,
                };
                error!(error = %e, "Failed to delete file after read");
            }
        }
    }

    ReadResult { reader, outcome }
}
