//! Identity responders published on the bus.

pub mod config;
pub mod memory;
pub mod users;

pub use config::ResponderConfig;
pub use memory::{IdentityStore, InMemoryCache};
pub use users::{register, UserLookupError, UsersResponder};
