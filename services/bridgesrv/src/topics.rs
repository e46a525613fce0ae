//! Topic layout for one device

/// Placeholder replaced by the device serial number in subscription templates
pub const SERIAL_PLACEHOLDER: &str = "{serial}";

/// Fully rendered topics of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    namespace: String,
    serial_number: String,
    command_subscriptions: Vec<String>,
}

impl TopicSet {
    pub fn new(namespace: &str, serial_number: &str, subscription_templates: &[String]) -> Self {
        Self {
            namespace: namespace.to_string(),
            serial_number: serial_number.to_string(),
            command_subscriptions: subscription_templates
                .iter()
                .map(|template| render(template, serial_number))
                .collect(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    fn device_topic(&self, leaf: &str) -> String {
        format!("{}/{}/{leaf}", self.namespace, self.serial_number)
    }

    /// `<ns>/<serial>/sensor_data`
    pub fn telemetry(&self) -> String {
        self.device_topic("sensor_data")
    }

    /// `<ns>/<serial>/heartbeat`
    pub fn heartbeat(&self) -> String {
        self.device_topic("heartbeat")
    }

    /// `<ns>/<serial>/wifi`
    pub fn network_name(&self) -> String {
        self.device_topic("wifi")
    }

    pub fn command_subscriptions(&self) -> &[String] {
        &self.command_subscriptions
    }
}

/// Substitute the serial number into a subscription template
pub fn render(template: &str, serial_number: &str) -> String {
    template.replace(SERIAL_PLACEHOLDER, serial_number)
}

/// Subscriptions of the deployed appliance
pub fn default_subscription_templates() -> Vec<String> {
    [
        "mfc/{serial}/pump/+",
        "hydroponics/{serial}/pump/+",
        "reservoir_fallback/{serial}/pump/+",
        "mfc/{serial}/valve/+",
        "mfc_fallback/{serial}/valve/+",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_topics() {
        let topics = TopicSet::new("mfc", "ABC123", &default_subscription_templates());
        assert_eq!(topics.telemetry(), "mfc/ABC123/sensor_data");
        assert_eq!(topics.heartbeat(), "mfc/ABC123/heartbeat");
        assert_eq!(topics.network_name(), "mfc/ABC123/wifi");
    }

    #[test]
    fn test_subscriptions_are_rendered() {
        let topics = TopicSet::new("mfc", "ABC123", &default_subscription_templates());
        assert_eq!(
            topics.command_subscriptions(),
            &[
                "mfc/ABC123/pump/+",
                "hydroponics/ABC123/pump/+",
                "reservoir_fallback/ABC123/pump/+",
                "mfc/ABC123/valve/+",
                "mfc_fallback/ABC123/valve/+",
            ]
        );
    }
}
