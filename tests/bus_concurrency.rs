//! Concurrency behavior of the bus: sessions page independently and in
//! parallel, and concurrent producers never lose or duplicate bytes.
//!
//! One session's drain/restore exclusion is pinned by unit tests on the
//! coordinator; these tests cover the cross-session and producer-side
//! guarantees.

use std::io::{self, Write};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use wirebus::{MessageBus, MessageQueue, PagingConfig, StreamDeliveryHandler};

fn bus_in(dir: &std::path::Path) -> MessageBus {
    MessageBus::new(PagingConfig {
        page_dir: Some(dir.to_path_buf()),
        ..PagingConfig::default()
    })
}

fn backdate_past_threshold(queue: &MessageQueue) -> bool {
    match Instant::now().checked_sub(Duration::from_secs(11)) {
        Some(past) => {
            queue.mark_transmitted_at(past);
            true
        }
        None => false,
    }
}

#[derive(Debug, Clone, Default)]
struct SharedSink(Arc<parking_lot::Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    fn len(&self) -> usize {
        self.0.lock().len()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parallel paging across sessions
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn sessions_page_and_restore_in_parallel_without_cross_talk() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = bus_in(tmp.path());

    let session_count = 4;
    let mut sessions = Vec::new();
    for i in 0..session_count {
        let id = format!("worker-{i}");
        let sink = SharedSink::default();
        let queue = bus
            .open_session(&id, Arc::new(StreamDeliveryHandler::new(sink.clone())))
            .unwrap();
        let payload: Vec<u8> = vec![b'a' + u8::try_from(i).unwrap(); 64];
        sessions.push((id, queue, sink, payload));
    }

    let barrier = Barrier::new(session_count);
    thread::scope(|scope| {
        for (id, queue, _, payload) in &sessions {
            let bus = &bus;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                for _ in 0..10 {
                    bus.send(id, payload).unwrap();
                    if !backdate_past_threshold(queue) {
                        return;
                    }
                    assert_eq!(bus.deliver(id).unwrap(), 0, "page-out consumes the attempt");
                    assert!(queue.is_paged());
                    assert_eq!(bus.deliver(id).unwrap(), 64, "restore returns the backlog");
                    assert!(!queue.is_paged());
                }
            });
        }
    });

    for (id, queue, sink, payload) in &sessions {
        let delivered = sink.contents();
        // Near boot the backdating helper may bail out before any cycle.
        assert_eq!(delivered.len() % 64, 0);
        for chunk in delivered.chunks(64) {
            assert_eq!(chunk, &payload[..], "session '{id}' only sees its own bytes");
        }
        assert!(!queue.is_paged());
        assert!(!bus.pager().store().page_file_path(id).exists());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Producer/delivery races on one session
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn concurrent_producers_and_delivery_conserve_every_byte() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = bus_in(tmp.path());
    let sink = SharedSink::default();
    bus.open_session("busy", Arc::new(StreamDeliveryHandler::new(sink.clone())))
        .unwrap();

    let producers = 4;
    let messages_per_producer = 8;
    let message_len = 8;
    let total = producers * messages_per_producer * message_len;

    let barrier = Barrier::new(producers + 1);
    thread::scope(|scope| {
        for p in 0..producers {
            let bus = &bus;
            let barrier = &barrier;
            scope.spawn(move || {
                let message = vec![b'A' + u8::try_from(p).unwrap(); message_len];
                barrier.wait();
                for _ in 0..messages_per_producer {
                    bus.send("busy", &message).unwrap();
                }
            });
        }

        let bus = &bus;
        let barrier = &barrier;
        let sink = &sink;
        scope.spawn(move || {
            barrier.wait();
            for _ in 0..1_000_000 {
                bus.deliver("busy").unwrap();
                if sink.len() >= total {
                    return;
                }
                thread::yield_now();
            }
        });
    });

    let delivered = sink.contents();
    assert_eq!(delivered.len(), total, "every committed byte arrives exactly once");

    // Each send commits its whole slice under the buffer lock, so the
    // output must be a sequence of uniform 8-byte runs.
    let mut counts = vec![0usize; producers];
    for chunk in delivered.chunks(message_len) {
        let tag = chunk[0];
        assert!(chunk.iter().all(|b| *b == tag), "messages never interleave");
        counts[usize::from(tag - b'A')] += 1;
    }
    for (p, count) in counts.iter().enumerate() {
        assert_eq!(
            *count, messages_per_producer,
            "producer {p} must land all of its messages"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paging under cross-session contention
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn one_session_paging_never_blocks_another_session_delivery() {
    let tmp = tempfile::tempdir().unwrap();
    let bus = bus_in(tmp.path());

    let paged_sink = SharedSink::default();
    let paged_queue = bus
        .open_session("pager", Arc::new(StreamDeliveryHandler::new(paged_sink.clone())))
        .unwrap();
    let live_sink = SharedSink::default();
    bus.open_session("live", Arc::new(StreamDeliveryHandler::new(live_sink.clone())))
        .unwrap();

    bus.send("pager", &[b'p'; 4096]).unwrap();
    if !backdate_past_threshold(&paged_queue) {
        return;
    }

    let barrier = Barrier::new(2);
    thread::scope(|scope| {
        let bus = &bus;
        let barrier = &barrier;
        scope.spawn(move || {
            barrier.wait();
            bus.deliver("pager").unwrap();
            bus.deliver("pager").unwrap();
        });
        scope.spawn(move || {
            barrier.wait();
            for i in 0..50u8 {
                bus.send("live", &[i]).unwrap();
                bus.deliver("live").unwrap();
            }
        });
    });

    assert_eq!(paged_sink.len(), 4096);
    assert_eq!(live_sink.len(), 50);
    let live = live_sink.contents();
    for (i, byte) in live.iter().enumerate() {
        assert_eq!(usize::from(*byte), i, "live session delivers in order");
    }
}
