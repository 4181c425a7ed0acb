//! In-memory messaging client. Records sends and lets tests push events.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Notify;

use herald_types::events::ClientEvent;
use herald_types::models::{Chat, ContactInfo, SendReceipt};

use crate::client::{ClientFuture, Connector, EventSender, MessagingClient};
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub chat_id: String,
    pub body: String,
    pub quoted: Option<String>,
}

#[derive(Default)]
struct FakeState {
    events: Mutex<Option<EventSender>>,
    connects: AtomicUsize,
    destroys: AtomicUsize,
    sent: Mutex<Vec<SentCall>>,
    chats: Mutex<Vec<Chat>>,
    contacts: Mutex<Vec<ContactInfo>>,
    known_messages: Mutex<HashSet<String>>,
    fail_sends: AtomicBool,
    fail_start: AtomicBool,
    fail_destroy: AtomicBool,
    start_gate: Notify,
    hold_sends: AtomicBool,
    send_entered: Notify,
    send_gate: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connector handing out [`FakeClient`]s that share one observable state.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an event through the most recently connected client.
    /// Returns false if no client is connected or its session stopped listening.
    pub fn emit(&self, event: ClientEvent) -> bool {
        lock(&self.state.events)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn destroy_count(&self) -> usize {
        self.state.destroys.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentCall> {
        lock(&self.state.sent).clone()
    }

    pub fn add_chat(&self, chat: Chat) {
        lock(&self.state.chats).push(chat);
    }

    pub fn add_contact(&self, contact: ContactInfo) {
        lock(&self.state.contacts).push(contact);
    }

    /// Make `message_id` resolvable as a reply target.
    pub fn know_message(&self, message_id: &str) {
        lock(&self.state.known_messages).insert(message_id.to_string());
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// When set, `start` waits for [`release_start`](Self::release_start) and then fails.
    pub fn fail_start(&self, fail: bool) {
        self.state.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn release_start(&self) {
        self.state.start_gate.notify_one();
    }

    /// When set, `send_message` parks until [`release_send`](Self::release_send).
    pub fn hold_sends(&self, hold: bool) {
        self.state.hold_sends.store(hold, Ordering::SeqCst);
    }

    /// Wait until a held send has reached the client.
    pub async fn send_held(&self) {
        self.state.send_entered.notified().await;
    }

    pub fn release_send(&self) {
        self.state.send_gate.notify_one();
    }

    pub fn fail_destroy(&self, fail: bool) {
        self.state.fail_destroy.store(fail, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    fn connect(&self, events: EventSender) -> Result<Arc<dyn MessagingClient>, ClientError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.events) = Some(events);
        Ok(Arc::new(FakeClient {
            state: self.state.clone(),
        }))
    }
}

pub struct FakeClient {
    state: Arc<FakeState>,
}

impl MessagingClient for FakeClient {
    fn start(&self) -> ClientFuture<'_, ()> {
        async move {
            if self.state.fail_start.load(Ordering::SeqCst) {
                self.state.start_gate.notified().await;
                return Err(ClientError::Rejected("browser failed to launch".into()));
            }
            Ok(())
        }
        .boxed()
    }

    fn destroy(&self) -> ClientFuture<'_, ()> {
        async move {
            self.state.destroys.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_destroy.load(Ordering::SeqCst) {
                return Err(ClientError::Rejected("destroy failed".into()));
            }
            Ok(())
        }
        .boxed()
    }

    fn send_message<'a>(
        &'a self,
        chat_id: &'a str,
        body: &'a str,
        quoted: Option<&'a str>,
    ) -> ClientFuture<'a, SendReceipt> {
        async move {
            if self.state.hold_sends.load(Ordering::SeqCst) {
                self.state.send_entered.notify_one();
                self.state.send_gate.notified().await;
            }
            if self.state.fail_sends.load(Ordering::SeqCst) {
                return Err(ClientError::Rejected("send rejected".into()));
            }
            let mut sent = lock(&self.state.sent);
            sent.push(SentCall {
                chat_id: chat_id.to_string(),
                body: body.to_string(),
                quoted: quoted.map(str::to_string),
            });
            Ok(SendReceipt {
                id: format!("FAKE{}", sent.len()),
                timestamp: Utc::now(),
            })
        }
        .boxed()
    }

    fn resolve_message<'a>(
        &'a self,
        chat_id: &'a str,
        message_id: &'a str,
    ) -> ClientFuture<'a, Option<String>> {
        async move {
            let known = lock(&self.state.known_messages).contains(message_id);
            Ok(known.then(|| format!("{}_{}", chat_id, message_id)))
        }
        .boxed()
    }

    fn contact<'a>(&'a self, contact_id: &'a str) -> ClientFuture<'a, ContactInfo> {
        async move {
            lock(&self.state.contacts)
                .iter()
                .find(|c| c.id == contact_id)
                .cloned()
                .ok_or_else(|| ClientError::Rejected(format!("contact {} not found", contact_id)))
        }
        .boxed()
    }

    fn chats(&self) -> ClientFuture<'_, Vec<Chat>> {
        async move { Ok(lock(&self.state.chats).clone()) }.boxed()
    }

    fn chat<'a>(&'a self, chat_id: &'a str) -> ClientFuture<'a, Chat> {
        async move {
            lock(&self.state.chats)
                .iter()
                .find(|c| c.id == chat_id)
                .cloned()
                .ok_or_else(|| ClientError::Rejected(format!("chat {} not found", chat_id)))
        }
        .boxed()
    }
}
