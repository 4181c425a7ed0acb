use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use herald_types::events::ClientEvent;
use herald_types::models::{Chat, ContactInfo, SendReceipt};

use crate::error::ClientError;

/// Address suffix of one-to-one chats on the messaging platform.
pub const CONTACT_SUFFIX: &str = "@c.us";
/// Address suffix of group chats.
pub const GROUP_SUFFIX: &str = "@g.us";

pub type ClientFuture<'a, T> = BoxFuture<'a, Result<T, ClientError>>;

/// Sink the client pushes its lifecycle and message events into.
pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

/// Handle to one live messaging client instance.
///
/// Progress of the connection sequence (code issued, authenticated, ready, ...)
/// is never returned from these calls; it arrives through the [`EventSender`]
/// given to [`Connector::connect`].
pub trait MessagingClient: Send + Sync {
    /// Begin the connection sequence.
    fn start(&self) -> ClientFuture<'_, ()>;

    /// Tear the client down. The instance is not reused afterwards.
    fn destroy(&self) -> ClientFuture<'_, ()>;

    /// Send `body` to `chat_id`, optionally as a reply to the resolved message `quoted`.
    fn send_message<'a>(
        &'a self,
        chat_id: &'a str,
        body: &'a str,
        quoted: Option<&'a str>,
    ) -> ClientFuture<'a, SendReceipt>;

    /// Resolve a message id seen in `chat_id` into the reference accepted by
    /// `send_message` as `quoted`. `None` if the client no longer knows it.
    fn resolve_message<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
    ) -> ClientFuture<'a, Option<String>>;

    fn contact<'a>(&'a self, contact_id: &'a str) -> ClientFuture<'a, ContactInfo>;

    fn chats(&self) -> ClientFuture<'_, Vec<Chat>>;

    fn chat<'a>(&'a self, chat_id: &'a str) -> ClientFuture<'a, Chat>;
}

/// Constructs client instances. Each call must yield a fresh instance wired to `events`.
pub trait Connector: Send + Sync {
    fn connect(&self, events: EventSender) -> Result<Arc<dyn MessagingClient>, ClientError>;
}

/// Normalize a phone number or address to a chat address.
/// Targets that already carry an address suffix (`@c.us`, `@g.us`, ...) pass through.
pub fn contact_address(target: &str) -> String {
    with_suffix(target, CONTACT_SUFFIX)
}

pub fn group_address(group_id: &str) -> String {
    with_suffix(group_id, GROUP_SUFFIX)
}

fn with_suffix(target: &str, suffix: &str) -> String {
    let target = target.trim();
    if target.contains('@') {
        target.to_string()
    } else {
        format!("{}{}", target, suffix)
    }
}
