//! Delivery mechanisms that move queue bytes to session consumers.

use crate::paging::{IdentityFilter, PagingCoordinator, PagingError, TransferFilter};
use crate::queue::MessageQueue;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io::{self, Write};
use tracing::debug;

/// Delivery mechanism for one session's consumer.
///
/// `deliver` pushes everything the session has pending, paged backlog first
/// and live buffered bytes second, and stamps the queue's idle clock on
/// success. Mechanisms that can survive their pending bytes moving to disk
/// advertise it through [`as_pageable`](DeliveryHandler::as_pageable).
pub trait DeliveryHandler: Send + Sync {
    /// Human-readable mechanism name, for logs.
    fn name(&self) -> &str;

    /// Deliver the queue's pending bytes to the consumer. Returns how many
    /// bytes the consumer was given, not counting filter framing.
    fn deliver(&self, queue: &MessageQueue, pager: &PagingCoordinator) -> Result<u64>;

    /// The paging capability of this mechanism, if it has one. Mechanisms
    /// without it are never paged out by the overflow policy.
    fn as_pageable(&self) -> Option<&dyn Pageable> {
        None
    }
}

/// Capability of a delivery mechanism to have its session's pending bytes
/// moved to disk and restored on a later delivery.
pub trait Pageable: Send + Sync {
    /// Synchronously drain the queue's pending bytes to its page file and
    /// restart the queue's idle clock, so the delivery attempt that follows
    /// restores the backlog instead of paging again.
    fn page_out(&self, queue: &MessageQueue, pager: &PagingCoordinator)
        -> Result<(), PagingError>;
}

/// Streams queue bytes into an owned `Write` sink: a socket, a pipe, a
/// file, or a test buffer.
///
/// Pageable: a stream consumer that went idle picks its backlog back up
/// off disk on its next delivery, bracketed by the configured restore
/// filter. Live bytes are streamed unfiltered.
pub struct StreamDeliveryHandler<W: Write + Send> {
    sink: Mutex<W>,
    filter: Mutex<Box<dyn TransferFilter>>,
}

impl<W: Write + Send> StreamDeliveryHandler<W> {
    pub fn new(sink: W) -> Self {
        Self::with_filter(sink, Box::new(IdentityFilter))
    }

    /// Use `filter` to bracket and transform restored bytes.
    pub fn with_filter(sink: W, filter: Box<dyn TransferFilter>) -> Self {
        Self {
            sink: Mutex::new(sink),
            filter: Mutex::new(filter),
        }
    }
}

impl<W: Write + Send> DeliveryHandler for StreamDeliveryHandler<W> {
    fn name(&self) -> &str {
        "stream"
    }

    fn deliver(&self, queue: &MessageQueue, pager: &PagingCoordinator) -> Result<u64> {
        let mut sink = self.sink.lock();
        let mut filter = self.filter.lock();
        let restored = pager
            .restore_from_disk(queue, &mut *sink, &mut **filter)
            .with_context(|| {
                format!(
                    "restoring paged backlog for session '{}'",
                    queue.session_id()
                )
            })?;
        let live = queue.stream_pending(&mut *sink).with_context(|| {
            format!("streaming live bytes for session '{}'", queue.session_id())
        })?;
        queue.mark_transmitted();
        Ok(restored + live)
    }

    fn as_pageable(&self) -> Option<&dyn Pageable> {
        Some(self)
    }
}

impl<W: Write + Send> Pageable for StreamDeliveryHandler<W> {
    fn page_out(
        &self,
        queue: &MessageQueue,
        pager: &PagingCoordinator,
    ) -> Result<(), PagingError> {
        let already_paged = pager.drain_to_disk(queue)?;
        // A page-out consumes the delivery attempt. Restarting the idle
        // clock keeps the next attempt on the restore path rather than in
        // another drain.
        queue.mark_transmitted();
        debug!(
            "paged out idle stream session '{}' (appended: {already_paged})",
            queue.session_id()
        );
        Ok(())
    }
}

/// Accepts and drops a session's bytes, the consumer equivalent of
/// `/dev/null`. Not pageable: bytes nobody will read are not worth disk
/// space, and any backlog it is handed gets discarded unread.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardingDeliveryHandler;

impl DiscardingDeliveryHandler {
    pub fn new() -> Self {
        Self
    }
}

impl DeliveryHandler for DiscardingDeliveryHandler {
    fn name(&self) -> &str {
        "discarding"
    }

    fn deliver(&self, queue: &MessageQueue, pager: &PagingCoordinator) -> Result<u64> {
        pager.discard(queue).with_context(|| {
            format!(
                "discarding paged backlog for session '{}'",
                queue.session_id()
            )
        })?;
        let dropped = queue.stream_pending(&mut io::sink()).with_context(|| {
            format!("draining live bytes for session '{}'", queue.session_id())
        })?;
        queue.mark_transmitted();
        Ok(dropped)
    }
}
