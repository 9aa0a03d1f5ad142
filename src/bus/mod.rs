//! Session registry tying queues, delivery, and paging together.

use crate::buffer::{BufferError, TransmissionBuffer};
use crate::config::PagingConfig;
use crate::delivery::DeliveryHandler;
use crate::paging::{PagingCoordinator, PagingError, PagingStatsSnapshot};
use crate::queue::MessageQueue;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from bus registry and producer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("session `{0}` is already registered")]
    DuplicateSession(String),
    #[error("session `{0}` is not registered")]
    UnknownSession(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Message bus with one outbound queue per session and transparent disk
/// paging for idle consumers.
///
/// Producers commit bytes with [`send`](MessageBus::send); transports run
/// [`deliver`](MessageBus::deliver) whenever a consumer is ready for
/// traffic. Paging happens behind those two calls: a delivery attempt
/// against a consumer that has been quiet past the idle threshold moves the
/// session's pending bytes to disk, and the following attempt streams them
/// back.
pub struct MessageBus {
    config: PagingConfig,
    pager: PagingCoordinator,
    queues: Mutex<HashMap<String, Arc<MessageQueue>>>,
}

impl MessageBus {
    pub fn new(config: PagingConfig) -> Self {
        let pager = PagingCoordinator::new(&config);
        Self {
            config,
            pager,
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn pager(&self) -> &PagingCoordinator {
        &self.pager
    }

    pub fn stats(&self) -> PagingStatsSnapshot {
        self.pager.stats()
    }

    pub fn session_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Register a session and the delivery mechanism for its consumer.
    /// Each session gets its own transmission buffer sized from the config.
    pub fn open_session(
        &self,
        session_id: impl Into<String>,
        delivery: Arc<dyn DeliveryHandler>,
    ) -> Result<Arc<MessageQueue>, BusError> {
        let session_id = session_id.into();
        let mut queues = self.queues.lock();
        if queues.contains_key(&session_id) {
            return Err(BusError::DuplicateSession(session_id));
        }

        let buffer = Arc::new(TransmissionBuffer::new(self.config.buffer_capacity));
        let queue = Arc::new(MessageQueue::new(session_id.clone(), buffer, delivery));
        queues.insert(session_id.clone(), Arc::clone(&queue));
        debug!(
            "opened session '{session_id}' via {} delivery ({} registered)",
            queue.delivery().name(),
            queues.len()
        );
        Ok(queue)
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<MessageQueue>> {
        self.queues.lock().get(session_id).cloned()
    }

    /// Commit bytes destined for a session's consumer.
    ///
    /// An overflow is returned as [`BufferError::Overflow`] inside
    /// [`BusError::Buffer`]; nothing is dropped. The producer can wait for
    /// a delivery, shed the message, or drain the queue to disk itself.
    pub fn send(&self, session_id: &str, bytes: &[u8]) -> Result<(), BusError> {
        let queue = self
            .session(session_id)
            .ok_or_else(|| BusError::UnknownSession(session_id.to_string()))?;
        queue.buffer().write(bytes)?;
        Ok(())
    }

    /// Run one delivery attempt for a session.
    ///
    /// The overflow policy is probed first. A probe that pages the queue
    /// out consumes the attempt and delivers nothing; the next attempt
    /// streams the backlog back. Returns the bytes handed to the consumer.
    pub fn deliver(&self, session_id: &str) -> Result<u64> {
        let queue = self
            .session(session_id)
            .ok_or_else(|| BusError::UnknownSession(session_id.to_string()))?;

        let paged_out = self
            .pager
            .probe_and_page_out(&queue, Instant::now())
            .with_context(|| format!("paging out idle session '{session_id}'"))?;
        if paged_out {
            debug!("session '{session_id}' paged out instead of delivering");
            return Ok(0);
        }

        queue
            .delivery()
            .deliver(&queue, &self.pager)
            .with_context(|| format!("delivering to session '{session_id}'"))
    }

    /// Unregister a session, discarding any paged backlog it left behind.
    /// Returns whether the session existed. The session is unregistered
    /// even when the discard fails; the error is still returned.
    pub fn close_session(&self, session_id: &str) -> Result<bool, PagingError> {
        let removed = self.queues.lock().remove(session_id);
        let Some(queue) = removed else {
            return Ok(false);
        };
        self.pager.discard(&queue)?;
        debug!("closed session '{session_id}'");
        Ok(true)
    }

    /// Discard every session's paged backlog and empty the registry.
    /// Best-effort: every queue is visited even if some discards fail, and
    /// the first failure is returned.
    pub fn shutdown(&self) -> Result<(), PagingError> {
        let queues: Vec<Arc<MessageQueue>> =
            self.queues.lock().drain().map(|(_, queue)| queue).collect();

        let mut first_error = None;
        for queue in queues {
            if let Err(error) = self.pager.discard(&queue) {
                warn!(
                    "failed to discard page file for session '{}': {error}",
                    queue.session_id()
                );
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!("page file cleanup failed while dropping the bus: {error}");
        }
    }
}
