//! Device command channel.
//!
//! Fire-and-forget publishing of [`DeviceCommand`](crate::models::DeviceCommand)
//! payloads to device-scoped topics. The only acknowledgement consumed is
//! the local publish result.

#[cfg(feature = "mqtt")]
mod mqtt;

#[cfg(feature = "mqtt")]
pub use mqtt::MqttCommandChannel;

use crate::storage::sqlite::acquire_lock;
use crate::{Error, Result};
use std::sync::Mutex;
use std::time::Duration;

/// Publishes raw payloads to topics.
///
/// # Implementor Notes
///
/// - Methods use `&self` to enable sharing via `Arc<dyn CommandChannel>`
/// - `publish` must not wait for delivery to the device
/// - `flush` is for short-lived processes that exit right after publishing
pub trait CommandChannel: Send + Sync {
    /// Short channel name for logs.
    fn name(&self) -> &'static str;

    /// Publishes `payload` to `topic` at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be handed to the transport.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Blocks until every message published so far has been written to the
    /// transport, or `timeout` elapses.
    ///
    /// Channels that hand messages over synchronously have nothing to wait
    /// for.
    ///
    /// # Errors
    ///
    /// Returns an error if queued messages are still unwritten at the
    /// deadline.
    fn flush(&self, timeout: Duration) -> Result<()> {
        let _ = timeout;
        Ok(())
    }
}

/// Channel used when no broker is configured. Every publish fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledCommandChannel;

impl CommandChannel for DisabledCommandChannel {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn publish(&self, topic: &str, _payload: &[u8]) -> Result<()> {
        Err(Error::operation(
            "publish_device_command",
            format!("no MQTT broker configured (topic '{topic}')"),
        ))
    }
}

/// A published message, as recorded by [`MemoryCommandChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Destination topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// In-process channel that records every publish.
#[derive(Debug, Default)]
pub struct MemoryCommandChannel {
    published: Mutex<Vec<PublishedMessage>>,
}

impl MemoryCommandChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message published so far.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        acquire_lock(&self.published).clone()
    }
}

impl CommandChannel for MemoryCommandChannel {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        acquire_lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}
