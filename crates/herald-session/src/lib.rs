pub mod bridge;
pub mod client;
pub mod error;
pub mod session;
pub mod settings;
pub mod tracker;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use client::{Connector, MessagingClient, contact_address, group_address};
pub use error::{ClientError, SessionError};
pub use session::Session;
