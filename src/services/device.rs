//! Remote device commands.

use crate::channel::CommandChannel;
use crate::models::{DeviceCommand, DeviceId, UserId};
use crate::observability::metrics::record_device_command;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Acknowledgement of a published command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReceipt {
    /// Topic the command went to.
    pub topic: String,
    /// User the device will enroll.
    pub user_id: UserId,
    /// Target device.
    pub device_id: DeviceId,
}

/// Sends mode changes to capture terminals.
#[derive(Clone)]
pub struct DeviceService {
    channel: Arc<dyn CommandChannel>,
    topic_prefix: String,
}

impl DeviceService {
    /// Creates a device service publishing under `topic_prefix`.
    #[must_use]
    pub fn new(channel: Arc<dyn CommandChannel>, topic_prefix: impl Into<String>) -> Self {
        Self {
            channel,
            topic_prefix: topic_prefix.into(),
        }
    }

    /// Tells `device_id` to capture its next finger as an enrollment for
    /// `user_id`.
    ///
    /// Delivery to the device is not confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for blank ids, or
    /// [`Error::OperationFailed`] if the channel refuses the message.
    #[instrument(
        name = "fingerlink.device.enroll_mode",
        skip(self),
        fields(channel = self.channel.name(), user_id = %user_id, device_id = %device_id)
    )]
    pub fn request_enroll_mode(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
    ) -> Result<CommandReceipt> {
        if user_id.as_str().trim().is_empty() {
            return Err(Error::Validation("user_id is required".to_string()));
        }
        if device_id.as_str().trim().is_empty() {
            return Err(Error::Validation("device_id is required".to_string()));
        }

        let command = DeviceCommand::enroll(user_id.clone(), device_id.clone());
        let topic = command.topic(&self.topic_prefix);
        let result = command
            .payload()
            .and_then(|payload| self.channel.publish(&topic, &payload));

        let status = if result.is_ok() { "success" } else { "error" };
        record_device_command("enroll", status);
        result?;

        tracing::info!(topic = %topic, "Enroll mode requested");
        Ok(CommandReceipt {
            topic,
            user_id: command.user_id,
            device_id: command.device_id,
        })
    }

    /// Waits until published commands have been written to the channel's
    /// transport. Call before a short-lived process exits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if commands are still queued when
    /// `timeout` elapses.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.channel.flush(timeout)
    }
}
