//! `idbus` server: object-path registration, message dispatch with caller
//! resolution, and the identity responders published on the bus.

pub mod bus;
pub mod caller;
pub mod responder;
pub mod stdio;
pub mod telemetry;
pub mod traits;

pub use bus::{BusConfig, BusConnection, HandlerResult, LocalTransport};
pub use caller::{CachedCallerResolver, PeerCredentials};
pub use traits::{IdentityCache, NameFilter};
