//! Client-side library for the Courier chat service.
//!
//! Two pieces: [`http::CourierApi`], a thin typed wrapper over the REST
//! surface, and [`store::ChatStore`], the local reconciliation store that
//! folds realtime events into the currently open conversation.

pub mod error;
pub mod http;
pub mod store;

pub use error::ClientError;
pub use http::CourierApi;
pub use store::{ChatStore, Conversation, Delivery, LocalMessage};
