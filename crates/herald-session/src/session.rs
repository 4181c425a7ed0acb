use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use herald_types::events::ClientEvent;
use herald_types::models::{
    ContactInfo, GroupDetail, GroupSummary, MessageRecord, SendReceipt, SentMessage, StatusSnapshot,
};

use crate::client::{Connector, MessagingClient, contact_address, group_address};
use crate::error::SessionError;
use crate::settings::{Settings, SettingsMap};
use crate::tracker::Tracker;

/// The live client plus the tasks feeding its events into the tracker.
struct ActiveClient {
    client: Arc<dyn MessagingClient>,
    pump: JoinHandle<()>,
    starter: JoinHandle<()>,
}

/// State shared with the event pump task.
struct Shared {
    tracker: RwLock<Tracker>,
    status_tx: watch::Sender<StatusSnapshot>,
    /// Bumped on every reset, only while the tracker write lock is held.
    generation: AtomicU64,
}

impl Shared {
    async fn apply(&self, event: ClientEvent) {
        let snapshot = {
            let mut tracker = self.tracker.write().await;
            tracker.apply(event);
            tracker.snapshot()
        };
        self.status_tx.send_replace(snapshot);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Log an outgoing message unless a reset happened since `generation` was read.
    async fn record_outgoing(&self, generation: u64, receipt: &SendReceipt, chat_id: &str, body: &str) -> bool {
        let mut tracker = self.tracker.write().await;
        if self.generation() != generation {
            return false;
        }
        tracker.record_outgoing(
            receipt.id.clone(),
            chat_id.to_string(),
            body.to_string(),
            receipt.timestamp,
        );
        true
    }

    async fn reset(&self) {
        let snapshot = {
            let mut tracker = self.tracker.write().await;
            self.generation.fetch_add(1, Ordering::AcqRel);
            tracker.reset();
            tracker.snapshot()
        };
        self.status_tx.send_replace(snapshot);
    }
}

/// Process-wide messaging session: owns at most one client instance and the
/// connection state mirrored from it.
pub struct Session {
    connector: Arc<dyn Connector>,
    active: Mutex<Option<ActiveClient>>,
    shared: Arc<Shared>,
    settings: Settings,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let tracker = Tracker::new();
        let (status_tx, _) = watch::channel(tracker.snapshot());
        Self {
            connector,
            active: Mutex::new(None),
            shared: Arc::new(Shared {
                tracker: RwLock::new(tracker),
                status_tx,
                generation: AtomicU64::new(0),
            }),
            settings: Settings::default(),
        }
    }

    /// Create the client if none exists and start its connection sequence.
    /// Calling this while a client exists leaves it untouched.
    pub async fn initialize(&self) -> Result<StatusSnapshot, SessionError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            debug!("Messaging client already initialized");
            return Ok(self.status().await);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = self.connector.connect(events_tx.clone())?;

        let pump = tokio::spawn(pump_events(self.shared.clone(), events_rx));

        let starting = client.clone();
        let starter = tokio::spawn(async move {
            if let Err(e) = starting.start().await {
                error!("Messaging client failed to start: {}", e);
                let _ = events_tx.send(ClientEvent::Disconnected {
                    reason: e.to_string(),
                });
            }
        });

        *active = Some(ActiveClient {
            client,
            pump,
            starter,
        });
        drop(active);

        info!("Messaging client initialization started");
        Ok(self.status().await)
    }

    pub async fn send_message(
        &self,
        target: &str,
        body: &str,
        quoted_id: Option<&str>,
    ) -> Result<SentMessage, SessionError> {
        let (client, generation) = {
            let active = self.active.lock().await;
            let client = active
                .as_ref()
                .map(|a| a.client.clone())
                .ok_or(SessionError::NotInitialized)?;
            (client, self.shared.generation())
        };
        self.require_ready().await?;

        let chat_id = contact_address(target);
        let quoted = match quoted_id {
            Some(id) => self.resolve_quote(client.as_ref(), id).await,
            None => None,
        };

        let receipt = client
            .send_message(&chat_id, body, quoted.as_deref())
            .await
            .inspect_err(|e| error!("Error sending message to {}: {}", chat_id, e))?;

        if self.shared.record_outgoing(generation, &receipt, &chat_id, body).await {
            debug!("Message {} sent to {}", receipt.id, chat_id);
        } else {
            warn!("Message {} to {} completed after a reset, not logged", receipt.id, chat_id);
        }

        Ok(SentMessage {
            to: chat_id,
            id: receipt.id,
            timestamp: receipt.timestamp,
        })
    }

    /// Turn a logged message id into the client's reply reference.
    /// Any failure degrades to a plain send and is reported as a warning.
    async fn resolve_quote(&self, client: &dyn MessagingClient, quoted_id: &str) -> Option<String> {
        let record = self.shared.tracker.read().await.find(quoted_id).cloned();
        let Some(record) = record else {
            warn!("Quoted message {} not in history, sending without quote", quoted_id);
            return None;
        };

        match client.resolve_message(&record.counterpart, &record.id).await {
            Ok(Some(reference)) => Some(reference),
            Ok(None) => {
                warn!("Quoted message {} unknown to client, sending without quote", quoted_id);
                None
            }
            Err(e) => {
                warn!("Failed to resolve quoted message {}: {}, sending without quote", quoted_id, e);
                None
            }
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.shared.tracker.read().await.snapshot()
    }

    pub async fn scannable_code(&self) -> Option<String> {
        self.shared.tracker.read().await.code().map(str::to_string)
    }

    pub async fn history(&self) -> Vec<MessageRecord> {
        self.shared.tracker.read().await.history()
    }

    /// Watch status transitions instead of polling `status`.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.shared.status_tx.subscribe()
    }

    /// Tear down the client if one exists, then return to the initial state.
    /// A failed teardown is logged; the state is cleared regardless.
    pub async fn reset(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            if let Err(e) = previous.client.destroy().await {
                warn!("Messaging client teardown failed: {}", e);
            }
            previous.starter.abort();
            previous.pump.abort();
            // wait until the pump has stopped so no late event lands after the reset
            let _ = previous.pump.await;
            info!("Messaging client reset");
        }
        self.shared.reset().await;
    }

    pub async fn contact_info(&self, target: &str) -> Result<ContactInfo, SessionError> {
        let client = self.ready_client().await?;
        Ok(client.contact(&contact_address(target)).await?)
    }

    pub async fn groups(&self) -> Result<Vec<GroupSummary>, SessionError> {
        let client = self.ready_client().await?;
        let chats = client.chats().await?;
        Ok(chats
            .iter()
            .filter(|c| c.is_group)
            .map(|c| c.summary())
            .collect())
    }

    pub async fn group_info(&self, group_id: &str) -> Result<GroupDetail, SessionError> {
        let client = self.ready_client().await?;
        let chat_id = group_address(group_id);
        let chat = client.chat(&chat_id).await?;
        chat.into_group_detail()
            .ok_or(SessionError::NotAGroup(chat_id))
    }

    pub async fn settings(&self) -> SettingsMap {
        self.settings.get().await
    }

    pub async fn update_settings(&self, partial: SettingsMap) -> SettingsMap {
        self.settings.merge(partial).await
    }

    async fn client(&self) -> Option<Arc<dyn MessagingClient>> {
        self.active.lock().await.as_ref().map(|a| a.client.clone())
    }

    async fn require_ready(&self) -> Result<(), SessionError> {
        let status = self.shared.tracker.read().await.status();
        if status.is_ready() {
            Ok(())
        } else {
            Err(SessionError::NotReady(status))
        }
    }

    async fn ready_client(&self) -> Result<Arc<dyn MessagingClient>, SessionError> {
        self.require_ready().await?;
        self.client().await.ok_or(SessionError::NotInitialized)
    }
}

/// Single writer for event-driven transitions: drains the client's events in order.
async fn pump_events(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            ClientEvent::CodeIssued { code } => {
                info!("Scannable login code received");
                debug!("Login code: {}", code);
            }
            ClientEvent::Authenticated => info!("Messaging client authenticated"),
            ClientEvent::Ready => info!("Messaging client is ready"),
            ClientEvent::AuthFailure { reason } => error!("Authentication failure: {}", reason),
            ClientEvent::Disconnected { reason } => warn!("Messaging client disconnected: {}", reason),
            ClientEvent::IncomingMessage(msg) => debug!("Message {} received from {}", msg.id, msg.from),
        }
        shared.apply(event).await;
    }
    debug!("Client event stream ended");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use herald_types::events::IncomingMessage;
    use herald_types::models::{Chat, ConnectionStatus, Direction, GroupMetadata, Participant};
    use serde_json::json;

    use super::*;
    use crate::fake::FakeConnector;

    fn session() -> (Session, FakeConnector) {
        let fake = FakeConnector::new();
        (Session::new(Arc::new(fake.clone())), fake)
    }

    async fn wait_for(session: &Session, status: ConnectionStatus) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.status == status))
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed");
    }

    async fn ready_session() -> (Session, FakeConnector) {
        let (session, fake) = session();
        session.initialize().await.unwrap();
        fake.emit(ClientEvent::Ready);
        wait_for(&session, ConnectionStatus::Ready).await;
        (session, fake)
    }

    fn incoming(id: &str, from: &str) -> ClientEvent {
        ClientEvent::IncomingMessage(IncomingMessage {
            id: id.into(),
            from: from.into(),
            body: "ping".into(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (session, fake) = session();
        let first = session.initialize().await.unwrap();
        let second = session.initialize().await.unwrap();
        assert_eq!(first.status, ConnectionStatus::Disconnected);
        assert_eq!(first, second);
        assert_eq!(fake.connect_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_initialize_creates_one_client() {
        let (session, fake) = session();
        let session = Arc::new(session);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = session.clone();
            handles.push(tokio::spawn(async move { s.initialize().await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(fake.connect_count(), 1);
    }

    #[tokio::test]
    async fn code_then_ready_scenario() {
        let (session, fake) = session();
        session.initialize().await.unwrap();

        fake.emit(ClientEvent::CodeIssued { code: "ABC".into() });
        wait_for(&session, ConnectionStatus::QrReceived).await;
        assert_eq!(session.scannable_code().await.as_deref(), Some("ABC"));
        assert!(session.status().await.has_code);

        fake.emit(ClientEvent::Ready);
        wait_for(&session, ConnectionStatus::Ready).await;
        assert_eq!(session.scannable_code().await, None);
        assert_eq!(
            session.status().await,
            StatusSnapshot {
                status: ConnectionStatus::Ready,
                has_code: false
            }
        );
    }

    #[tokio::test]
    async fn send_before_initialize_fails() {
        let (session, _fake) = session();
        let err = session.send_message("1234567890", "hi", None).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInitialized));
    }

    #[tokio::test]
    async fn send_fails_not_ready_in_every_other_status() {
        let (session, fake) = session();
        session.initialize().await.unwrap();

        let err = session.send_message("1234567890", "hi", None).await.unwrap_err();
        assert!(matches!(err, SessionError::NotReady(ConnectionStatus::Disconnected)));

        let steps = [
            (ClientEvent::CodeIssued { code: "c".into() }, ConnectionStatus::QrReceived),
            (ClientEvent::Authenticated, ConnectionStatus::Authenticated),
            (ClientEvent::AuthFailure { reason: "x".into() }, ConnectionStatus::AuthFailure),
        ];
        for (event, status) in steps {
            fake.emit(event);
            wait_for(&session, status).await;
            let err = session.send_message("1234567890@c.us", "hi", None).await.unwrap_err();
            assert!(err.to_string().ends_with(status.as_str()));
            match err {
                SessionError::NotReady(s) => assert_eq!(s, status),
                other => panic!("unexpected error {:?}", other),
            }
        }
        assert!(fake.sent().is_empty());
    }

    #[tokio::test]
    async fn send_records_outgoing_message() {
        let (session, fake) = ready_session().await;

        let sent = session.send_message("1234567890", "hi", None).await.unwrap();
        assert_eq!(sent.to, "1234567890@c.us");

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].direction, Direction::Outgoing);
        assert_eq!(history[0].body, "hi");
        assert_eq!(history[0].counterpart, "1234567890@c.us");
        assert_eq!(history[0].id, sent.id);

        let calls = fake.sent();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].chat_id, "1234567890@c.us");
        assert_eq!(calls[0].quoted, None);
    }

    #[tokio::test]
    async fn suffixed_and_bare_targets_reach_same_chat() {
        let (session, fake) = ready_session().await;
        session.send_message("1234567890", "a", None).await.unwrap();
        session.send_message("1234567890@c.us", "b", None).await.unwrap();
        let calls = fake.sent();
        assert_eq!(calls[0].chat_id, calls[1].chat_id);
    }

    #[tokio::test]
    async fn quoted_reply_uses_resolved_reference() {
        let (session, fake) = ready_session().await;
        fake.know_message("IN1");
        fake.emit(incoming("IN1", "628111@c.us"));
        // events are applied in order, so waiting on a later status covers the message
        fake.emit(ClientEvent::Authenticated);
        wait_for(&session, ConnectionStatus::Authenticated).await;
        fake.emit(ClientEvent::Ready);
        wait_for(&session, ConnectionStatus::Ready).await;

        session
            .send_message("628111", "pong", Some("IN1"))
            .await
            .unwrap();
        let calls = fake.sent();
        assert_eq!(calls[0].quoted.as_deref(), Some("628111@c.us_IN1"));
    }

    #[tokio::test]
    async fn unresolvable_quote_falls_back_to_plain_send() {
        let (session, fake) = ready_session().await;

        // not in history at all
        session.send_message("628111", "a", Some("missing")).await.unwrap();

        // in history but unknown to the client
        fake.emit(incoming("IN2", "628111@c.us"));
        fake.emit(ClientEvent::Authenticated);
        wait_for(&session, ConnectionStatus::Authenticated).await;
        fake.emit(ClientEvent::Ready);
        wait_for(&session, ConnectionStatus::Ready).await;
        session.send_message("628111", "b", Some("IN2")).await.unwrap();

        let calls = fake.sent();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.quoted.is_none()));
    }

    #[tokio::test]
    async fn client_send_failure_is_upstream_and_not_logged() {
        let (session, fake) = ready_session().await;
        fake.fail_sends(true);
        let err = session.send_message("1", "x", None).await.unwrap_err();
        match err {
            SessionError::Upstream(msg) => assert!(msg.contains("send rejected")),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(session.history().await.is_empty());
    }

    #[tokio::test]
    async fn reset_clears_everything_and_allows_reinitialize() {
        let (session, fake) = ready_session().await;
        session.send_message("1", "x", None).await.unwrap();
        fake.emit(ClientEvent::CodeIssued { code: "late".into() });
        wait_for(&session, ConnectionStatus::QrReceived).await;

        session.reset().await;
        assert_eq!(session.status().await.status, ConnectionStatus::Disconnected);
        assert_eq!(session.scannable_code().await, None);
        assert!(session.history().await.is_empty());
        assert_eq!(fake.destroy_count(), 1);

        // events from the torn-down client are ignored
        fake.emit(ClientEvent::Ready);
        tokio::task::yield_now().await;
        assert_eq!(session.status().await.status, ConnectionStatus::Disconnected);

        session.initialize().await.unwrap();
        assert_eq!(fake.connect_count(), 2);
    }

    #[tokio::test]
    async fn send_completing_after_reset_leaves_log_empty() {
        let (session, fake) = ready_session().await;
        let session = Arc::new(session);
        fake.hold_sends(true);

        let sending = {
            let s = session.clone();
            tokio::spawn(async move { s.send_message("1", "late", None).await })
        };
        fake.send_held().await;

        session.reset().await;
        assert!(session.history().await.is_empty());

        fake.release_send();
        let sent = sending.await.unwrap().unwrap();
        assert_eq!(sent.to, "1@c.us");
        assert!(session.history().await.is_empty());
        assert_eq!(session.status().await.status, ConnectionStatus::Disconnected);

        // the next client logs its sends again
        fake.hold_sends(false);
        session.initialize().await.unwrap();
        fake.emit(ClientEvent::Ready);
        wait_for(&session, ConnectionStatus::Ready).await;
        session.send_message("1", "fresh", None).await.unwrap();
        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "fresh");
    }

    #[tokio::test]
    async fn reset_without_client_is_a_noop() {
        let (session, fake) = session();
        session.reset().await;
        session.reset().await;
        assert_eq!(session.status().await.status, ConnectionStatus::Disconnected);
        assert_eq!(fake.destroy_count(), 0);
    }

    #[tokio::test]
    async fn reset_survives_failed_teardown() {
        let (session, fake) = ready_session().await;
        fake.fail_destroy(true);
        session.reset().await;
        assert_eq!(session.status().await.status, ConnectionStatus::Disconnected);
        assert!(session.history().await.is_empty());
    }

    #[tokio::test]
    async fn failed_start_reports_disconnected() {
        let (session, fake) = session();
        fake.fail_start(true);
        session.initialize().await.unwrap();

        fake.emit(ClientEvent::CodeIssued { code: "c".into() });
        wait_for(&session, ConnectionStatus::QrReceived).await;

        // the pending start now fails, which forces disconnected
        fake.release_start();
        wait_for(&session, ConnectionStatus::Disconnected).await;
        assert_eq!(session.scannable_code().await, None);
    }

    #[tokio::test]
    async fn queries_require_ready() {
        let (session, fake) = session();
        session.initialize().await.unwrap();
        fake.emit(ClientEvent::Authenticated);
        wait_for(&session, ConnectionStatus::Authenticated).await;

        assert!(matches!(
            session.contact_info("1").await,
            Err(SessionError::NotReady(ConnectionStatus::Authenticated))
        ));
        assert!(matches!(session.groups().await, Err(SessionError::NotReady(_))));
        assert!(matches!(session.group_info("g").await, Err(SessionError::NotReady(_))));
    }

    #[tokio::test]
    async fn group_queries() {
        let (session, fake) = ready_session().await;
        fake.add_chat(Chat {
            id: "111@c.us".into(),
            name: "Alice".into(),
            is_group: false,
            group: None,
        });
        fake.add_chat(Chat {
            id: "999@g.us".into(),
            name: "Team".into(),
            is_group: true,
            group: Some(GroupMetadata {
                description: Some("daily".into()),
                owner: Some("111@c.us".into()),
                created_at: None,
                participants: vec![
                    Participant {
                        id: "111@c.us".into(),
                        is_admin: true,
                        is_super_admin: true,
                    },
                    Participant {
                        id: "222@c.us".into(),
                        is_admin: false,
                        is_super_admin: false,
                    },
                ],
            }),
        });

        let groups = session.groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "999@g.us");
        assert_eq!(groups[0].participant_count, 2);

        let detail = session.group_info("999").await.unwrap();
        assert_eq!(detail.name, "Team");
        assert_eq!(detail.participants.len(), 2);

        let err = session.group_info("111@c.us").await.unwrap_err();
        assert!(matches!(err, SessionError::NotAGroup(id) if id == "111@c.us"));

        let err = session.group_info("404").await.unwrap_err();
        assert!(matches!(err, SessionError::Upstream(_)));
    }

    #[tokio::test]
    async fn contact_lookup_normalizes_target() {
        let (session, fake) = ready_session().await;
        fake.add_contact(ContactInfo {
            id: "628111@c.us".into(),
            number: "628111".into(),
            name: Some("Budi".into()),
            pushname: None,
            is_business: false,
            is_my_contact: true,
            is_blocked: false,
        });
        let info = session.contact_info("628111").await.unwrap();
        assert_eq!(info.name.as_deref(), Some("Budi"));
    }

    #[tokio::test]
    async fn settings_merge_scenario() {
        let (session, _fake) = session();
        let partial = match json!({"timezone": "UTC"}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let merged = session.update_settings(partial).await;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["timezone"], "UTC");
        assert_eq!(session.settings().await, merged);
    }
}
