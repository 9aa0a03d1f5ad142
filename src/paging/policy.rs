//! Idle-consumer detection for the page-out decision.

use super::{PagingCoordinator, PagingError};
use crate::config::PagingConfig;
use crate::queue::MessageQueue;
use std::time::{Duration, Instant};

/// Idle threshold in production: a consumer quiet strictly longer than this
/// has its pending bytes paged to disk.
const IDLE_THRESHOLD: Duration = Duration::from_secs(10);

/// Idle threshold under debug mode, wide enough to hold a queue through a
/// long breakpoint without thrashing the page directory.
const DEBUG_IDLE_THRESHOLD: Duration = Duration::from_secs(1600);

/// Decides when an idle consumer's queue gets paged out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowPolicy {
    threshold: Duration,
}

impl OverflowPolicy {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Threshold selected by `debug_mode`: 10 s in production, 1600 s on
    /// debug rigs.
    pub fn from_config(config: &PagingConfig) -> Self {
        Self::new(if config.debug_mode {
            DEBUG_IDLE_THRESHOLD
        } else {
            IDLE_THRESHOLD
        })
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether `queue` has been idle strictly longer than the threshold as
    /// of `now`. Exactly at the threshold does not page.
    pub fn is_straddling(&self, queue: &MessageQueue, now: Instant) -> bool {
        queue.idle_for(now) > self.threshold
    }

    /// Page the queue out if it is straddling and its delivery mechanism is
    /// capable of paging. Returns whether a page-out ran. A queue that is
    /// already paged still qualifies; the drain appends the newly pending
    /// bytes to its page file.
    pub fn page_if_straddling(
        &self,
        queue: &MessageQueue,
        pager: &PagingCoordinator,
        now: Instant,
    ) -> Result<bool, PagingError> {
        let Some(pageable) = queue.delivery().as_pageable() else {
            return Ok(false);
        };
        if !self.is_straddling(queue, now) {
            return Ok(false);
        }

        pageable.page_out(queue, pager)?;
        Ok(true)
    }
}
