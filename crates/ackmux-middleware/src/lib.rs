//! `ackmux-middleware` – Transport plumbing
//!
//! Moves drive commands and lock flags between producers, the arbiter and
//! the output without caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – In-process, topic-based publish/subscribe bus built on Tokio
//!   broadcast channels.
//! - [`sink`] – [`BusSink`]: the arbiter's output sink, publishing on the
//!   output topic.
//! - [`node`] – [`MuxNode`]: one task per source feeding the shared arbiter,
//!   plus the periodic diagnostics task.
//! - [`stdio`] – Newline-delimited JSON bridge between stdin/stdout and the
//!   bus.

pub mod bus;
pub mod node;
pub mod sink;
pub mod stdio;

pub use bus::{BusMessage, TopicBus, TopicReceiver};
pub use node::{MuxNode, RunningNode, lock_arbiter};
pub use sink::BusSink;
