// SPDX-License-Identifier: Apache-2.0

//! Poll loop and reader bookkeeping.
//!
//! Architecture:
//! - A single tokio task owns all bookkeeping and polls on a fixed interval
//! - Each poll finds the matching files and consumes them in bounded batches
//! - Readers are moved into `spawn_blocking` tasks, read to EOF, and moved back
//! - Readers of the previous batch stay open so that a file rotated away
//!   between two polls can still be drained

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesOrdered;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint;
use crate::emit::Emitter;
use crate::error::{Error, Result};
use crate::file_id::{get_path_from_file, same_file};
use crate::finder::FileFinder;
use crate::fingerprint::Fingerprint;
use crate::persistence::Persister;
use crate::reader::{FileReader, Metadata, ReaderFactory};

/// Lifecycle state of a [`Manager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Polling limits
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub poll_interval: Duration,
    /// Files consumed per batch
    pub max_batch_files: usize,
    /// Batches per poll, 0 for no limit
    pub max_batches: usize,
    /// Readers remembered across polls, oldest evicted first
    pub known_files_capacity: usize,
}

/// Finds, tails and checkpoints a set of files until stopped.
pub struct Manager {
    state: ManagerState,
    poll_interval: Duration,
    cancel: CancellationToken,
    /// Present while stopped
    poller: Option<Poller>,
    /// Present while running
    handle: Option<JoinHandle<Poller>>,
}

impl Manager {
    pub fn new(
        finder: FileFinder,
        factory: ReaderFactory,
        emitter: Arc<dyn Emitter>,
        settings: PollSettings,
    ) -> Self {
        Self {
            state: ManagerState::Stopped,
            poll_interval: settings.poll_interval.max(Duration::from_millis(1)),
            cancel: CancellationToken::new(),
            poller: Some(Poller::new(finder, factory, emitter, settings)),
            handle: None,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Restore readers from the checkpoint store and start polling. The
    /// first poll happens one interval after start.
    pub async fn start(&mut self, persister: Arc<dyn Persister>) -> Result<()> {
        if self.state != ManagerState::Stopped {
            return Err(Error::AlreadyStarted);
        }

        let mut poller = self.poller.take().ok_or(Error::PollerLost)?;
        self.state = ManagerState::Starting;

        if let Err(e) = poller.restore(persister) {
            error!("Failed to load checkpoint: {}", e);
            self.poller = Some(poller);
            self.state = ManagerState::Stopped;
            return Err(e);
        }

        match poller.finder.find_files() {
            Ok(paths) if paths.is_empty() => {
                warn!(include = ?poller.finder.include(), "No files match the configured include patterns");
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to find files: {}", e),
        }

        self.cancel = CancellationToken::new();
        let cancel = self.cancel.clone();
        let poll_interval = self.poll_interval;
        self.handle = Some(tokio::spawn(poller.run(cancel, poll_interval)));

        self.state = ManagerState::Running;
        info!(poll_interval = ?poll_interval, "File consumer started");
        Ok(())
    }

    /// Stop polling, wait for the in-flight poll to finish and close every
    /// reader. Stopping a stopped manager does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state == ManagerState::Stopped {
            return Ok(());
        }

        self.state = ManagerState::Stopping;
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(mut poller) => {
                    poller.close_all();
                    self.poller = Some(poller);
                }
                Err(e) => {
                    error!("Poll task failed: {}", e);
                    self.state = ManagerState::Stopped;
                    return Err(e.into());
                }
            }
        }

        self.state = ManagerState::Stopped;
        info!("File consumer stopped");
        Ok(())
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the poll task.
pub(crate) struct Poller {
    finder: FileFinder,
    factory: ReaderFactory,
    emitter: Arc<dyn Emitter>,
    persister: Option<Arc<dyn Persister>>,
    max_batch_files: usize,
    max_batches: usize,
    known_files_capacity: usize,

    /// Closed readers kept for matching, oldest first
    known_files: VecDeque<FileReader>,
    /// Readers of the last consumed batch, still open
    previous_poll_files: Vec<FileReader>,
    seen_paths: HashSet<PathBuf>,
    /// Fingerprints seen in the current batch
    current_fps: Vec<Fingerprint>,
    /// Metadata of every reader built in the current poll
    cycle_metadata: Vec<Metadata>,
}

impl Poller {
    pub(crate) fn new(
        finder: FileFinder,
        factory: ReaderFactory,
        emitter: Arc<dyn Emitter>,
        settings: PollSettings,
    ) -> Self {
        Self {
            finder,
            factory,
            emitter,
            persister: None,
            max_batch_files: settings.max_batch_files.max(1),
            max_batches: settings.max_batches,
            known_files_capacity: settings.known_files_capacity,
            known_files: VecDeque::new(),
            previous_poll_files: Vec::new(),
            seen_paths: HashSet::new(),
            current_fps: Vec::new(),
            cycle_metadata: Vec::new(),
        }
    }

    /// Load the last checkpoint and use `persister` for future saves.
    pub(crate) fn restore(&mut self, persister: Arc<dyn Persister>) -> Result<()> {
        let offsets = checkpoint::load(persister.as_ref())?;

        if !offsets.is_empty() {
            info!(
                count = offsets.len(),
                "Resuming from previously known offset(s). 'start_at' setting is not applicable."
            );
            self.factory.from_beginning = true;
            for metadata in offsets {
                // A restarted poller already remembers what it saved
                if self.remembers(&metadata.fingerprint) {
                    continue;
                }
                self.known_files.push_back(self.factory.placeholder(metadata));
            }
            self.evict();
        }

        self.persister = Some(persister);
        Ok(())
    }

    async fn run(mut self, cancel: CancellationToken, poll_interval: Duration) -> Self {
        let mut ticker = interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.poll(&cancel).await;
        }

        debug!("Poll loop exited");
        self
    }

    /// Find the matching files and consume them batch by batch.
    pub(crate) async fn poll(&mut self, cancel: &CancellationToken) {
        let mut matches = match self.finder.find_files() {
            Ok(paths) => paths,
            Err(e) => {
                debug!("Failed to find files: {}", e);
                Vec::new()
            }
        };
        debug!(count = matches.len(), paths = ?matches, "Matched files");

        self.cycle_metadata.clear();
        let mut batches = 0;

        while matches.len() > self.max_batch_files {
            let rest = matches.split_off(self.max_batch_files);
            self.consume(matches, cancel).await;
            matches = rest;

            batches += 1;
            if self.max_batches != 0 && batches >= self.max_batches {
                debug!(remaining = matches.len(), "Reached max_batches, deferring to next poll");
                return;
            }
            if cancel.is_cancelled() {
                return;
            }
        }
        self.consume(matches, cancel).await;

        // Files that appear from now on are new and read in full
        self.factory.from_beginning = true;
    }

    pub(crate) async fn consume(&mut self, paths: Vec<PathBuf>, cancel: &CancellationToken) {
        debug!(count = paths.len(), "Consuming files");

        let mut readers = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(reader) = self.make_reader(path) {
                readers.push(reader);
            }
        }

        // Drain files that rotated away before their new content is read
        let (lost, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.previous_poll_files)
            .into_iter()
            .partition(|old| is_lost(old, &readers));
        for reader in &lost {
            match reader.file().map(get_path_from_file) {
                Some(Ok(moved_to)) => {
                    debug!(path = ?reader.path(), moved_to = ?moved_to, "Reading lost file")
                }
                _ => debug!(path = ?reader.path(), "Reading lost file"),
            }
        }
        let drained = read_all(lost, &self.emitter, cancel).await;

        let readers = read_all(readers, &self.emitter, cancel).await;

        for mut reader in kept.into_iter().chain(drained) {
            reader.close();
            self.known_files.push_back(reader);
        }

        self.cycle_metadata
            .extend(readers.iter().map(|r| r.metadata().clone()));
        self.previous_poll_files = readers;
        self.evict();

        self.save_checkpoint();
        self.current_fps.clear();
    }

    /// Open and fingerprint `path`, then continue a known reader or build a
    /// new one. Returns None for unreadable files, empty files and
    /// duplicates of a file already seen in this batch.
    fn make_reader(&mut self, path: &Path) -> Option<FileReader> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = ?path, "Failed to open file: {}", e);
                return None;
            }
        };

        let fp = match Fingerprint::new(&mut file, self.factory.fingerprint_size) {
            Ok(fp) => fp,
            Err(e) => {
                debug!(path = ?path, "Failed to fingerprint file: {}", e);
                return None;
            }
        };

        if fp.is_empty() {
            return None;
        }

        // Copy/truncate rotation briefly leaves two files with the same content
        if self.current_fps.iter().any(|seen| seen.equal(&fp)) {
            debug!(path = ?path, "Skipping duplicate file");
            return None;
        }
        self.current_fps.push(fp.clone());

        if self.seen_paths.insert(path.to_path_buf()) {
            if self.factory.from_beginning {
                info!(path = ?path, "Started watching file");
            } else {
                info!(
                    path = ?path,
                    "Started watching file from end. To read preexisting logs, configure the argument 'start_at' to 'beginning'"
                );
            }
        }

        match self.take_match(&fp) {
            Some(old) => Some(self.factory.copy(old.metadata(), file, fp, path)),
            None => match self.factory.new_reader(file, fp, path) {
                Ok(reader) => Some(reader),
                Err(e) => {
                    debug!(path = ?path, "Failed to create reader: {}", e);
                    None
                }
            },
        }
    }

    /// Remove and return the newest remembered reader whose fingerprint `fp`
    /// extends.
    fn take_match(&mut self, fp: &Fingerprint) -> Option<FileReader> {
        if let Some(i) = self
            .previous_poll_files
            .iter()
            .rposition(|r| fp.starts_with(r.fingerprint()))
        {
            return Some(self.previous_poll_files.remove(i));
        }

        let i = self
            .known_files
            .iter()
            .rposition(|r| fp.starts_with(r.fingerprint()))?;
        self.known_files.remove(i)
    }

    fn remembers(&self, fp: &Fingerprint) -> bool {
        self.previous_poll_files
            .iter()
            .chain(self.known_files.iter())
            .any(|r| r.fingerprint().starts_with(fp))
    }

    fn evict(&mut self) {
        while self.known_files.len() + self.previous_poll_files.len() > self.known_files_capacity {
            match self.known_files.pop_front() {
                Some(reader) => debug!(path = ?reader.path(), "Forgetting file"),
                None => break,
            }
        }
    }

    fn save_checkpoint(&self) {
        let Some(persister) = &self.persister else {
            return;
        };
        if let Err(e) = checkpoint::save(persister.as_ref(), &self.cycle_metadata) {
            error!("Failed to save checkpoint: {}", e);
        }
    }

    fn close_all(&mut self) {
        for reader in self.previous_poll_files.iter_mut() {
            reader.close();
        }
        for reader in self.known_files.iter_mut() {
            reader.close();
        }
    }
}

/// A previous reader is lost when nothing built in this batch continues it.
/// A file truncated in place keeps its path and identity and is not lost:
/// draining it would read the new content twice.
fn is_lost(old: &FileReader, current: &[FileReader]) -> bool {
    !current.iter().any(|new| {
        new.fingerprint().starts_with(old.fingerprint())
            || (new.path() == old.path()
                && match (old.file(), new.file()) {
                    (Some(a), Some(b)) => same_file(a, b),
                    _ => false,
                })
    })
}

/// Read every reader to EOF on blocking threads and wait for all of them.
async fn read_all(
    readers: Vec<FileReader>,
    emitter: &Arc<dyn Emitter>,
    cancel: &CancellationToken,
) -> Vec<FileReader> {
    let mut futures: FuturesOrdered<JoinHandle<FileReader>> = FuturesOrdered::new();

    for mut reader in readers {
        let emitter = emitter.clone();
        let cancel = cancel.clone();
        futures.push_back(tokio::task::spawn_blocking(move || {
            if let Err(e) = reader.read_to_end(emitter.as_ref(), &cancel) {
                warn!(path = ?reader.path(), offset = reader.offset(), "Failed to read file: {}", e);
            }
            reader
        }));
    }

    let mut done = Vec::with_capacity(futures.len());
    while let Some(result) = futures.next().await {
        match result {
            Ok(reader) => done.push(reader),
            Err(e) => error!("Reader task failed: {}", e),
        }
    }
    done
}
