//! Transport layer
//!
//! Physical link to the peripheral controller. The rest of the bridge only
//! sees [`LineTransport`].

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::{MockHandle, MockOp, MockTransport, MockTransportConfig};
pub use serial::{SerialLineTransport, SerialTransportConfig};
pub use traits::{ConnectionState, LineTransport, TransportError, TransportStats};
