use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use herald_types::events::ClientEvent;
use herald_types::models::{ConnectionStatus, Direction, MessageRecord, StatusSnapshot};

/// Maximum number of records kept in the message log.
pub const HISTORY_LIMIT: usize = 100;

/// Connection state mirrored from the messaging client's events:
/// lifecycle status, the last scannable code and a bounded message log.
#[derive(Debug, Default)]
pub struct Tracker {
    status: ConnectionStatus,
    code: Option<String>,
    log: VecDeque<MessageRecord>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::CodeIssued { code } => {
                self.status = ConnectionStatus::QrReceived;
                self.code = Some(code);
            }
            // Code is kept until the client reports ready
            ClientEvent::Authenticated => self.status = ConnectionStatus::Authenticated,
            ClientEvent::Ready => {
                self.status = ConnectionStatus::Ready;
                self.code = None;
            }
            ClientEvent::AuthFailure { .. } => self.status = ConnectionStatus::AuthFailure,
            ClientEvent::Disconnected { .. } => {
                self.status = ConnectionStatus::Disconnected;
                self.code = None;
            }
            ClientEvent::IncomingMessage(msg) => self.push(MessageRecord {
                id: msg.id,
                direction: Direction::Incoming,
                counterpart: msg.from,
                body: msg.body,
                timestamp: msg.timestamp,
            }),
        }
    }

    pub fn record_outgoing(
        &mut self,
        id: String,
        counterpart: String,
        body: String,
        timestamp: DateTime<Utc>,
    ) {
        self.push(MessageRecord {
            id,
            direction: Direction::Outgoing,
            counterpart,
            body,
            timestamp,
        });
    }

    fn push(&mut self, record: MessageRecord) {
        self.log.push_back(record);
        while self.log.len() > HISTORY_LIMIT {
            self.log.pop_front();
        }
    }

    /// Back to the initial state: disconnected, no code, empty log.
    pub fn reset(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.code = None;
        self.log.clear();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            has_code: self.code.is_some(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn history(&self) -> Vec<MessageRecord> {
        self.log.iter().cloned().collect()
    }

    /// Most recent record with the given id.
    pub fn find(&self, id: &str) -> Option<&MessageRecord> {
        self.log.iter().rev().find(|r| r.id == id)
    }
}
