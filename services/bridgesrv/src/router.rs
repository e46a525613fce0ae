//! Command routing and acknowledgement
//!
//! Turns an inbound command message into an actuator write and reports the
//! result on the bus:
//!
//! | result  | `<topic>/ack` | `<topic>/state`     |
//! |---------|---------------|---------------------|
//! | written | `1`           | `1` open, `0` close |
//! | failed  | `0`           | not published       |
//!
//! Messages that do not parse, or address another device, are logged and
//! dropped without any acknowledgement.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::bus::{InboundMessage, MessageBus, MessageHandler, Qos};
use crate::command::DeviceCommand;
use crate::error::{log_error, BridgeError};

/// What happened to one inbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Written to the controller, positive ack published
    Applied {
        command: DeviceCommand,
        reply: String,
    },
    /// Write failed, negative ack published
    Failed {
        command: DeviceCommand,
        error: BridgeError,
    },
    /// Not a valid command for this device, nothing published
    Ignored(BridgeError),
}

impl CommandOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandOutcome::Applied { .. })
    }
}

/// Routes command topics to the [`Actuator`]
#[derive(Debug)]
pub struct CommandRouter {
    serial_number: String,
    actuator: Actuator,
    bus: Arc<dyn MessageBus>,
}

impl CommandRouter {
    pub fn new(serial_number: impl Into<String>, actuator: Actuator, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            serial_number: serial_number.into(),
            actuator,
            bus,
        }
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Handle one command message end to end
    pub async fn route(&self, topic: &str, payload: &[u8]) -> CommandOutcome {
        let command = match DeviceCommand::from_message(topic, payload, &self.serial_number) {
            Ok(command) => command,
            Err(e) => {
                match &e {
                    BridgeError::CommandRejected(_) => {
                        log_error!(e, topic = %topic, "Command ignored: {e}")
                    },
                    _ => log_error!(e, topic = %topic, "Malformed command: {e}"),
                }
                return CommandOutcome::Ignored(e);
            },
        };

        info!(topic = %topic, "Processing {command}");
        match self.actuator.execute(&command).await {
            Ok(reply) => {
                self.acknowledge(topic, true).await;
                self.report_state(topic, &command).await;
                CommandOutcome::Applied { command, reply }
            },
            Err(error) => {
                log_error!(error, topic = %topic, "Failed to {command}: {error}");
                self.acknowledge(topic, false).await;
                CommandOutcome::Failed { command, error }
            },
        }
    }

    async fn acknowledge(&self, topic: &str, success: bool) {
        let payload: &[u8] = if success { b"1" } else { b"0" };
        self.publish(&format!("{topic}/ack"), payload).await;
    }

    async fn report_state(&self, topic: &str, command: &DeviceCommand) {
        let state = command.action.state_value();
        self.publish(&format!("{topic}/state"), state.as_bytes()).await;
    }

    async fn publish(&self, topic: &str, payload: &[u8]) {
        match self.bus.publish(topic, payload, Qos::AtLeastOnce, false).await {
            Ok(()) => debug!(topic = %topic, "Published {}", String::from_utf8_lossy(payload)),
            Err(e) => warn!(topic = %topic, "Could not publish acknowledgement: {e}"),
        }
    }
}

#[async_trait]
impl MessageHandler for CommandRouter {
    async fn handle(&self, message: &InboundMessage) {
        self.route(&message.topic, &message.payload).await;
    }
}
