pub mod backoff;
pub mod errors;
pub mod fake;
pub mod link;
pub mod rtu;
pub mod session;

pub use errors::{BusFault, ConnectError, ProtocolFault, SerialFailureKind};
pub use link::LinkParams;
pub use session::{BusConnector, BusSession, SerialBusConnector, SerialBusSession};
