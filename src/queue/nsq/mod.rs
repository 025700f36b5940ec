//! Minimal NSQ client
//!
//! - [`codec`] - TCP protocol V2 frames and commands
//! - [`connection`] - handshake, IDENTIFY and AUTH
//! - [`producer`] - [`Publisher`](crate::queue::Publisher) over one connection
//! - [`consumer`] - subscription loop with heartbeats and reconnects
//! - [`stats`] - HTTP stats endpoint used for demand sampling

pub mod codec;
pub mod connection;
pub mod consumer;
pub mod producer;
pub mod stats;

pub use connection::{ConnectionConfig, NsqConnection};
pub use consumer::{ConsumerConfig, NsqConsumer};
pub use producer::NsqProducer;
pub use stats::{NsqStatsClient, Stats, StatsError};
