//! Valve and pump control over the serial link

use std::sync::Arc;
use tracing::{debug, info};

use crate::command::{Action, DeviceCommand, DeviceType};
use crate::connection::ConnectionManager;
use crate::error::Result;

/// Sends actuator commands to the controller
///
/// Success means the command reached the serial link. The controller has no
/// channel to confirm the physical state.
#[derive(Debug, Clone)]
pub struct Actuator {
    link: Arc<ConnectionManager>,
}

impl Actuator {
    pub fn new(link: Arc<ConnectionManager>) -> Self {
        Self { link }
    }

    /// Drive one actuator open or closed
    ///
    /// Returns the controller's reply line, which may be empty.
    pub async fn set_state(&self, device_type: DeviceType, number: u32, open: bool) -> Result<String> {
        let action = if open { Action::Open } else { Action::Close };
        self.execute(&DeviceCommand::new(device_type, number, action)).await
    }

    pub async fn execute(&self, command: &DeviceCommand) -> Result<String> {
        debug!("Sending {command} as '{}'", command.token());
        let reply = self.link.write_command(&command.token()).await?;
        if !reply.is_empty() {
            info!(reply = %reply, "[Controller] {command}");
        }
        Ok(reply)
    }

    pub async fn open_valve(&self, number: u32) -> Result<String> {
        self.set_state(DeviceType::Valve, number, true).await
    }

    pub async fn close_valve(&self, number: u32) -> Result<String> {
        self.set_state(DeviceType::Valve, number, false).await
    }

    pub async fn open_pump(&self, number: u32) -> Result<String> {
        self.set_state(DeviceType::Pump, number, true).await
    }

    pub async fn close_pump(&self, number: u32) -> Result<String> {
        self.set_state(DeviceType::Pump, number, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LinkSettings;
    use crate::error::BridgeError;
    use crate::transport::{MockTransport, MockTransportConfig};
    use std::time::Duration;

    fn settings() -> LinkSettings {
        LinkSettings {
            read_timeout: Duration::from_millis(5),
            settle_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_tokens_written_for_each_helper() {
        let transport = MockTransport::default();
        let handle = transport.handle();
        let link = ConnectionManager::open(Box::new(transport), settings()).await;
        let actuator = Actuator::new(link);

        actuator.open_valve(1).await.unwrap();
        actuator.close_valve(2).await.unwrap();
        actuator.open_pump(3).await.unwrap();
        actuator.close_pump(4).await.unwrap();

        assert_eq!(handle.written(), vec!["V1=1", "V2=0", "P3=1", "P4=0"]);
    }

    #[tokio::test]
    async fn test_set_state_fails_without_link() {
        let transport = MockTransport::new(MockTransportConfig {
            should_fail_connection: true,
            ..Default::default()
        });
        let link = ConnectionManager::open(Box::new(transport), settings()).await;
        let actuator = Actuator::new(link);

        let err = actuator.set_state(DeviceType::Valve, 2, true).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportUnavailable(_)));
    }
}
