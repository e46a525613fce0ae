//! HydroLink Bridge Service Library (bridgesrv)
//!
//! Bridges the appliance's serial sensor/actuator controller to an MQTT
//! broker: sensor readings flow up as telemetry batches, valve and pump
//! commands flow down and are acknowledged on per-command sub-topics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  lines   ┌───────────────────┐  batches  ┌──────────────┐
//! │  Controller  │ ───────▶ │ ConnectionManager │ ────────▶ │  Publisher   │ ─┐
//! │ (serial port)│ ◀─────── │  (one Mutex over  │           └──────────────┘  │
//! └──────────────┘ "V2=1\n" │   the transport)  │ ◀─┐       ┌──────────────┐  │
//!                           └───────────────────┘   └────── │   Actuator   │  │
//!                                                           └──────▲───────┘  │
//!                                                                  │          ▼
//!                           ┌───────────────────┐  commands ┌──────┴───────┐ ┌─────┐
//!                           │   MessageBus      │ ────────▶ │ CommandRouter│ │ bus │
//!                           │ (rumqttc client)  │ ◀──────── │  ack / state │ └─────┘
//!                           └───────────────────┘           └──────────────┘
//! ```
//!
//! - **`transport`**: line-oriented serial transport and a scriptable mock
//! - **`connection`**: exclusive access to the transport, reconnection, batch reading
//! - **`batch`**: three-stage reading assembly
//! - **`command`** / **`actuator`** / **`router`**: the command path
//! - **`bus`**: message bus abstraction, MQTT client, in-memory bus
//! - **`publisher`** / **`heartbeat`** / **`subscriber`**: the long-running activities
//! - **`service`**: wiring and ordered shutdown

pub mod actuator;
pub mod batch;
pub mod bus;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod publisher;
pub mod reconnect;
pub mod router;
pub mod service;
pub mod subscriber;
pub mod topics;
pub mod transport;

pub use actuator::Actuator;
pub use batch::{Batch, BatchAssembler, Stage};
pub use bus::{InboundMessage, MessageBus, MessageHandler, MqttBus, Qos, RecordingBus};
pub use command::{Action, CommandTopic, DeviceCommand, DeviceType};
pub use config::{BridgeConfig, ConfigSources};
pub use connection::{BatchReader, ConnectionManager, LinkSettings, LinkStats};
pub use error::{BridgeError, Result};
pub use publisher::{format_envelope, TelemetryPublisher};
pub use router::{CommandOutcome, CommandRouter};
pub use service::{Bridge, BridgeReport, BridgeService};
pub use topics::TopicSet;
