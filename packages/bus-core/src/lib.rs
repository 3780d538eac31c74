//! Object-path algebra, the bus message model, error kinds, and the contracts
//! of the collaborators the dispatcher relies on.

pub mod error;
pub mod message;
pub mod path;
pub mod traits;
pub mod types;

pub use error::{error_names, BusError, MethodError};
pub use message::{decode_body, encode_body, Message, MessageKind};
pub use path::ObjectPath;
pub use traits::{CallerResolver, ClaimError, SendError, Transport};
pub use types::{CallerIdentity, DomainInfo, GroupRecord, PropertyValue, UserRecord};

