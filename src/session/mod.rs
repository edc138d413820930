mod connection;
mod outbound;
mod registry;

pub use connection::{ConnectionHandle, ConnectionState, SubscriptionFilter};
pub use outbound::{OutboundQueue, PushOutcome};
pub use registry::{FanOutReport, RegistryStats, Session, SessionRegistry};
