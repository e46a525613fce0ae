//! Actuator command grammar
//!
//! Commands arrive on `<namespace>/<serial>/<pump|valve>/<n>` with an
//! `OPEN` or `CLOSE` payload and go out to the controller as
//! `<P|V><n>=<1|0>`.

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Kind of actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Valve,
    Pump,
}

impl DeviceType {
    /// Letter the controller firmware expects
    pub fn letter(&self) -> char {
        match self {
            DeviceType::Valve => 'V',
            DeviceType::Pump => 'P',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Valve => "valve",
            DeviceType::Pump => "pump",
        }
    }
}

impl FromStr for DeviceType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("valve") {
            Ok(DeviceType::Valve)
        } else if s.eq_ignore_ascii_case("pump") {
            Ok(DeviceType::Pump)
        } else {
            Err(BridgeError::rejected(format!("unknown device type '{s}'")))
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested actuator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Open,
    Close,
}

impl Action {
    /// Parse a command payload, case-insensitively
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| BridgeError::parse("command payload is not UTF-8"))?
            .trim();
        if text.eq_ignore_ascii_case("OPEN") {
            Ok(Action::Open)
        } else if text.eq_ignore_ascii_case("CLOSE") {
            Ok(Action::Close)
        } else {
            Err(BridgeError::rejected(format!("unknown action '{text}'")))
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Action::Open)
    }

    /// `"1"` for open, `"0"` for closed
    pub fn state_value(&self) -> &'static str {
        if self.is_open() {
            "1"
        } else {
            "0"
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Open => f.write_str("OPEN"),
            Action::Close => f.write_str("CLOSE"),
        }
    }
}

/// Parsed command topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub namespace: String,
    pub serial_number: String,
    pub device_type: DeviceType,
    pub device_number: u32,
}

impl CommandTopic {
    /// Parse `topic` and check it addresses `serial_number`
    ///
    /// Exactly four segments are required; the device number must be a
    /// positive integer.
    pub fn parse(topic: &str, serial_number: &str) -> Result<Self> {
        let segments: Vec<&str> = topic.split('/').collect();
        let [namespace, serial, device_type, number] = segments.as_slice() else {
            return Err(BridgeError::parse(format!(
                "malformed topic '{topic}': expected <namespace>/<serial>/<type>/<number>"
            )));
        };

        if *serial != serial_number {
            return Err(BridgeError::rejected(format!(
                "topic '{topic}' addresses device '{serial}', this is '{serial_number}'"
            )));
        }

        let device_number = number
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                BridgeError::parse(format!("invalid device number '{number}' in topic '{topic}'"))
            })?;

        let device_type = device_type.parse::<DeviceType>()?;

        Ok(Self {
            namespace: (*namespace).to_string(),
            serial_number: (*serial).to_string(),
            device_type,
            device_number,
        })
    }
}

/// One actuator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub device_type: DeviceType,
    pub device_number: u32,
    pub action: Action,
}

impl DeviceCommand {
    pub fn new(device_type: DeviceType, device_number: u32, action: Action) -> Self {
        Self {
            device_type,
            device_number,
            action,
        }
    }

    /// Parse a command from its topic and payload
    pub fn from_message(topic: &str, payload: &[u8], serial_number: &str) -> Result<Self> {
        let parsed = CommandTopic::parse(topic, serial_number)?;
        let action = Action::from_payload(payload)?;
        Ok(Self::new(parsed.device_type, parsed.device_number, action))
    }

    /// Controller token, e.g. `V2=1`
    pub fn token(&self) -> String {
        format!(
            "{}{}={}",
            self.device_type.letter(),
            self.device_number,
            self.action.state_value()
        )
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.action, self.device_type, self.device_number)
    }
}
