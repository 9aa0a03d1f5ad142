//! Disk paging for session queues with idle consumers.
//!
//! When a consumer goes quiet, its pending bytes move from the in-memory
//! transmission buffer into a per-session page file; when it comes back,
//! the backlog streams transparently off disk ahead of any live bytes.
//! Every operation that reads or flips the `paged` flag or touches the page
//! file runs under the queue's paging lock, which is what keeps the flag
//! and the file from disagreeing.

pub mod filter;
pub mod policy;
pub mod store;

pub use filter::{FramingFilter, IdentityFilter, TransferFilter};
pub use policy::OverflowPolicy;
pub use store::PageStore;

use crate::config::PagingConfig;
use crate::queue::MessageQueue;
use serde::{Deserialize, Serialize};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

// ── Errors ───────────────────────────────────────────────────────

/// Errors emitted by the paging subsystem.
///
/// A paging I/O failure is fatal to the call that hit it and is never
/// retried internally. The queue is left in a state the caller's next
/// attempt can work with; in particular a failed restore leaves the paged
/// flag set.
#[derive(Debug, Error)]
pub enum PagingError {
    /// Disk-side failure against the page file or its directory.
    #[error("page file I/O failed while {operation} at `{path}`: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The consumer-facing sink rejected bytes during a restore.
    #[error("delivery sink failed while {operation} for session `{session}`: {source}")]
    Sink {
        operation: &'static str,
        session: String,
        #[source]
        source: io::Error,
    },
}

impl PagingError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn sink(
        operation: &'static str,
        session: impl Into<String>,
        source: io::Error,
    ) -> Self {
        Self::Sink {
            operation,
            session: session.into(),
            source,
        }
    }
}

// ── Stats ────────────────────────────────────────────────────────

/// Runtime counters for operational visibility.
#[derive(Debug, Default)]
pub struct PagingStats {
    pages_written_total: AtomicU64,
    drain_ops_total: AtomicU64,
    drained_bytes_total: AtomicU64,
    restore_ops_total: AtomicU64,
    restored_bytes_total: AtomicU64,
    self_heals_total: AtomicU64,
    discards_total: AtomicU64,
}

impl PagingStats {
    pub fn snapshot(&self) -> PagingStatsSnapshot {
        PagingStatsSnapshot {
            pages_written_total: self.pages_written_total.load(Ordering::Relaxed),
            drain_ops_total: self.drain_ops_total.load(Ordering::Relaxed),
            drained_bytes_total: self.drained_bytes_total.load(Ordering::Relaxed),
            restore_ops_total: self.restore_ops_total.load(Ordering::Relaxed),
            restored_bytes_total: self.restored_bytes_total.load(Ordering::Relaxed),
            self_heals_total: self.self_heals_total.load(Ordering::Relaxed),
            discards_total: self.discards_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PagingStats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PagingStatsSnapshot {
    /// Drains that started a fresh page file; appends do not count.
    pub pages_written_total: u64,
    /// Completed drains; each may have appended to an existing page file.
    pub drain_ops_total: u64,
    /// Bytes moved from transmission buffers into page files.
    pub drained_bytes_total: u64,
    /// Completed restores that streamed a page file back.
    pub restore_ops_total: u64,
    /// Bytes streamed back out of page files, before filter additions.
    pub restored_bytes_total: u64,
    /// Restores that found the page file missing and repaired the flag.
    pub self_heals_total: u64,
    /// Discards that actually dropped a page file or a paged flag.
    pub discards_total: u64,
}

// ── Coordinator ──────────────────────────────────────────────────

/// Orchestrates paging for session queues: draining pending bytes to disk,
/// restoring them to a returning consumer, discarding them on session
/// close, and probing the overflow policy.
pub struct PagingCoordinator {
    store: PageStore,
    policy: OverflowPolicy,
    stats: PagingStats,
}

impl PagingCoordinator {
    /// Coordinator using `config`'s page directory and idle threshold.
    pub fn new(config: &PagingConfig) -> Self {
        Self {
            store: PageStore::new(config.resolved_page_dir()),
            policy: OverflowPolicy::from_config(config),
            stats: PagingStats::default(),
        }
    }

    pub fn store(&self) -> &PageStore {
        &self.store
    }

    pub fn policy(&self) -> &OverflowPolicy {
        &self.policy
    }

    pub fn stats(&self) -> PagingStatsSnapshot {
        self.stats.snapshot()
    }

    /// Move every byte pending in the queue's buffer into its page file and
    /// mark the queue paged.
    ///
    /// Appends when the queue is already paged so successive drains
    /// accumulate; truncates any stale file from a previous run otherwise.
    /// An empty buffer still produces (or keeps) the page file and sets the
    /// flag. Returns whether the queue was already paged before this drain.
    pub fn drain_to_disk(&self, queue: &MessageQueue) -> Result<bool, PagingError> {
        let mut state = queue.lock_page_state();
        let already_paged = state.paged;

        let file = self.store.open_for_drain(queue.session_id(), already_paged)?;
        let mut writer = BufWriter::new(file);
        let drained = queue
            .buffer()
            .read_into(queue.cursor(), &mut writer)
            .map_err(|source| {
                PagingError::io(
                    "draining buffer into page file",
                    self.store.page_file_path(queue.session_id()),
                    source,
                )
            })?;

        state.paged = true;
        if !already_paged {
            self.stats.pages_written_total.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.drain_ops_total.fetch_add(1, Ordering::Relaxed);
        self.stats
            .drained_bytes_total
            .fetch_add(drained, Ordering::Relaxed);
        debug!(
            "paged {drained} pending byte(s) to disk for session '{}' (append: {already_paged})",
            queue.session_id()
        );
        Ok(already_paged)
    }

    /// Stream the paged backlog back to the consumer through `filter`.
    ///
    /// No-op returning `Ok(0)` when the queue is not paged. A paged queue
    /// whose page file has gone missing is repaired in place: the flag
    /// resets, a warning is logged, and the call reports an empty restore
    /// rather than an error. On success the page file is deleted and the
    /// flag resets; on failure the flag stays set so the next attempt can
    /// retry the stream.
    ///
    /// Returns the number of bytes read off disk, not counting anything the
    /// filter injected.
    pub fn restore_from_disk(
        &self,
        queue: &MessageQueue,
        sink: &mut dyn Write,
        filter: &mut dyn TransferFilter,
    ) -> Result<u64, PagingError> {
        let mut state = queue.lock_page_state();
        if !state.paged {
            return Ok(0);
        }

        let session = queue.session_id();
        let Some(file) = self.store.open_existing(session)? else {
            state.paged = false;
            self.stats.self_heals_total.fetch_add(1, Ordering::Relaxed);
            warn!("page file missing for session '{session}' while marked paged; resetting flag");
            return Ok(0);
        };

        filter
            .before(sink)
            .map_err(|source| PagingError::sink("running the before hook", session, source))?;

        let mut restored: u64 = 0;
        let reader = BufReader::new(file);
        for raw in reader.bytes() {
            let raw = raw.map_err(|source| {
                PagingError::io("reading page file", self.store.page_file_path(session), source)
            })?;
            let fed = filter
                .each(raw, sink)
                .map_err(|source| PagingError::sink("filtering restored bytes", session, source))?;
            sink.write_all(&[fed])
                .map_err(|source| PagingError::sink("writing restored bytes", session, source))?;
            restored += 1;
        }

        filter
            .after(sink)
            .map_err(|source| PagingError::sink("running the after hook", session, source))?;
        sink.flush()
            .map_err(|source| PagingError::sink("flushing restored bytes", session, source))?;

        self.store.delete_if_exists(session)?;
        state.paged = false;
        self.stats.restore_ops_total.fetch_add(1, Ordering::Relaxed);
        self.stats
            .restored_bytes_total
            .fetch_add(restored, Ordering::Relaxed);
        debug!("restored {restored} paged byte(s) from disk for session '{session}'");
        Ok(restored)
    }

    /// Drop a paged backlog without delivering it: delete the page file and
    /// clear the flag. Idempotent, and silent for a queue that was never
    /// paged. Used when a session closes while paged out.
    pub fn discard(&self, queue: &MessageQueue) -> Result<(), PagingError> {
        let mut state = queue.lock_page_state();
        let removed = self.store.delete_if_exists(queue.session_id())?;
        let was_paged = state.paged;
        state.paged = false;
        if was_paged || removed {
            self.stats.discards_total.fetch_add(1, Ordering::Relaxed);
            debug!(
                "discarded paged backlog for session '{}' (file removed: {removed})",
                queue.session_id()
            );
        }
        Ok(())
    }

    /// Probe the overflow policy for `queue` as of `now`, paging it out
    /// when the policy and the queue's delivery mechanism agree. This is
    /// the single entry point delivery code calls before a transmission
    /// attempt. Returns whether a page-out ran.
    pub fn probe_and_page_out(
        &self,
        queue: &MessageQueue,
        now: Instant,
    ) -> Result<bool, PagingError> {
        self.policy.page_if_straddling(queue, self, now)
    }
}

// ── Tests ────────────────────────────────────────────────────────
