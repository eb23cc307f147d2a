//! Delivery engine for shipping structured log records to Splunk.
//!
//! Three transports are available, each behind its own feature:
//! the batched HTTP Event Collector ([`hec`]), a persistent TCP stream
//! ([`tcp`]) and fire-and-forget UDP datagrams ([`udp`]). All three
//! consume the same [`record::LogRecord`] and render it through the
//! envelope formatters in [`format`].

pub mod error;
pub mod fields;
pub mod format;
pub mod noop_sink;
pub mod record;
pub mod sink;

#[cfg(feature = "hec")]
pub mod client;
#[cfg(feature = "hec")]
pub mod hec;

#[cfg(feature = "tcp")]
pub mod backoff;
#[cfg(feature = "tcp")]
pub mod queue;
#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "udp")]
pub mod udp;
