//! # courier-shared
//!
//! Types shared between the Courier server, store, and client crates:
//! id newtypes, the persisted domain models, and the JSON wire protocol
//! spoken over the realtime WebSocket channel.

pub mod models;
pub mod protocol;
pub mod types;

pub use models::{Group, Message, User};
pub use protocol::{ClientEvent, ServerEvent};
pub use types::{GroupId, MessageId, UserId};
