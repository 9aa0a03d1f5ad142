#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

//! Per-session outbound message queues with transparent disk paging.
//!
//! Producers commit raw bytes into a session's transmission buffer;
//! transports drive delivery attempts against it. When a consumer goes
//! quiet past the idle threshold, the next attempt moves the pending
//! bytes into a per-session page file instead of delivering, and the
//! attempt after that streams them back ahead of any live traffic.

pub mod buffer;
pub mod bus;
pub mod config;
pub mod delivery;
pub mod paging;
pub mod queue;
pub mod util;

pub use buffer::{BufferError, TransmissionBuffer};
pub use bus::{BusError, MessageBus};
pub use config::PagingConfig;
pub use delivery::{DeliveryHandler, DiscardingDeliveryHandler, Pageable, StreamDeliveryHandler};
pub use paging::{IdentityFilter, PagingCoordinator, PagingError, PagingStatsSnapshot, TransferFilter};
pub use queue::MessageQueue;
