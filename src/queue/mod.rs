//! Per-session outbound queue state.

use crate::buffer::{BufferCursor, TransmissionBuffer};
use crate::delivery::DeliveryHandler;
use parking_lot::{Mutex, MutexGuard};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State guarded by the queue's paging lock.
///
/// The `paged` flag lives inside the lock rather than next to it, so code
/// cannot observe or flip it without holding the lock.
#[derive(Debug, Default)]
pub(crate) struct PageState {
    /// True while the session's pending bytes live in the page file.
    pub paged: bool,
}

/// Outbound queue for one session.
///
/// Owns a cursor into the session's transmission buffer, the delivery
/// mechanism for the session's consumer, the paging lock, and the
/// last-transmission instant the overflow policy reads.
pub struct MessageQueue {
    session_id: String,
    buffer: Arc<TransmissionBuffer>,
    cursor: BufferCursor,
    delivery: Arc<dyn DeliveryHandler>,
    page_state: Mutex<PageState>,
    last_transmission: Mutex<Instant>,
}

impl MessageQueue {
    /// Create a queue reading from `buffer` through a fresh cursor.
    ///
    /// The last-transmission clock starts at "now", so a brand-new queue is
    /// not considered idle.
    pub fn new(
        session_id: impl Into<String>,
        buffer: Arc<TransmissionBuffer>,
        delivery: Arc<dyn DeliveryHandler>,
    ) -> Self {
        let cursor = buffer.open_cursor();
        Self {
            session_id: session_id.into(),
            buffer,
            cursor,
            delivery,
            page_state: Mutex::new(PageState::default()),
            last_transmission: Mutex::new(Instant::now()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn buffer(&self) -> &TransmissionBuffer {
        &self.buffer
    }

    pub fn delivery(&self) -> &dyn DeliveryHandler {
        self.delivery.as_ref()
    }

    pub(crate) fn cursor(&self) -> &BufferCursor {
        &self.cursor
    }

    /// Bytes committed for this session and not yet delivered or paged.
    pub fn pending_bytes(&self) -> u64 {
        self.buffer.pending(&self.cursor)
    }

    /// Whether pending bytes currently live in the page file. Advisory: the
    /// lock is released before returning, so only the paging operations
    /// themselves may act on the flag.
    pub fn is_paged(&self) -> bool {
        self.page_state.lock().paged
    }

    pub(crate) fn lock_page_state(&self) -> MutexGuard<'_, PageState> {
        self.page_state.lock()
    }

    #[cfg(test)]
    pub(crate) fn try_lock_page_state(&self) -> Option<MutexGuard<'_, PageState>> {
        self.page_state.try_lock()
    }

    /// Stream live buffered bytes to `sink` under the paging lock.
    ///
    /// Callers that honor delivery order restore any paged backlog first;
    /// those bytes are older than anything still in the buffer.
    pub fn stream_pending(&self, sink: &mut dyn Write) -> io::Result<u64> {
        let _state = self.page_state.lock();
        self.buffer.read_into(&self.cursor, sink)
    }

    /// Stamp the idle clock at "now".
    pub fn mark_transmitted(&self) {
        self.mark_transmitted_at(Instant::now());
    }

    /// Stamp the idle clock at an explicit instant.
    pub fn mark_transmitted_at(&self, at: Instant) {
        *self.last_transmission.lock() = at;
    }

    pub fn last_transmission(&self) -> Instant {
        *self.last_transmission.lock()
    }

    /// How long the session's consumer has been quiet as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_transmission())
    }
}

impl std::fmt::Debug for MessageQueue {
    // Lock-guarded fields are omitted so formatting never takes a lock.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("session_id", &self.session_id)
            .field("delivery", &self.delivery.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DiscardingDeliveryHandler;

    fn test_queue(session_id: &str, capacity: usize) -> MessageQueue {
        MessageQueue::new(
            session_id,
            Arc::new(TransmissionBuffer::new(capacity)),
            Arc::new(DiscardingDeliveryHandler::new()),
        )
    }

    #[test]
    fn new_queue_is_unpaged_and_not_idle() {
        let queue = test_queue("fresh", 64);
        assert!(!queue.is_paged());
        assert_eq!(queue.pending_bytes(), 0);
        assert!(queue.idle_for(Instant::now()) < Duration::from_secs(1));
    }

    #[test]
    fn stream_pending_moves_buffered_bytes_to_sink() {
        let queue = test_queue("stream", 64);
        queue.buffer().write(b"payload").expect("write fits");
        assert_eq!(queue.pending_bytes(), 7);

        let mut sink = Vec::new();
        let streamed = queue.stream_pending(&mut sink).expect("sink is a Vec");
        assert_eq!(streamed, 7);
        assert_eq!(sink, b"payload");
        assert_eq!(queue.pending_bytes(), 0);
    }

    #[test]
    fn stream_pending_on_empty_queue_returns_zero() {
        let queue = test_queue("empty", 64);
        let mut sink = Vec::new();
        assert_eq!(queue.stream_pending(&mut sink).expect("sink is a Vec"), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn idle_clock_follows_explicit_stamps() {
        let queue = test_queue("clock", 64);
        let epoch = Instant::now();
        queue.mark_transmitted_at(epoch);
        assert_eq!(
            queue.idle_for(epoch + Duration::from_secs(30)),
            Duration::from_secs(30)
        );

        queue.mark_transmitted_at(epoch + Duration::from_secs(25));
        assert_eq!(
            queue.idle_for(epoch + Duration::from_secs(30)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn paged_flag_is_visible_through_advisory_probe() {
        let queue = test_queue("flagged", 64);
        queue.lock_page_state().paged = true;
        assert!(queue.is_paged());
        queue.lock_page_state().paged = false;
        assert!(!queue.is_paged());
    }

    #[test]
    fn debug_format_works_while_the_paging_lock_is_held() {
        let queue = test_queue("curious-999", 64);
        let _held = queue.lock_page_state();
        let rendered = format!("{queue:?}");
        assert!(rendered.contains("MessageQueue"));
        assert!(rendered.contains("curious-999"));
    }
}
