//! Messaging client backed by a bridge sidecar that hosts the browser session.
//! Commands go over HTTP, lifecycle and message events come back over a WebSocket.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::{FutureExt, StreamExt};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use herald_types::events::ClientEvent;
use herald_types::models::{Chat, ContactInfo, SendReceipt};

use crate::client::{ClientFuture, Connector, EventSender, MessagingClient};
use crate::error::ClientError;

pub struct BridgeConnector {
    base_url: String,
    session_path: String,
    http: reqwest::Client,
}

impl BridgeConnector {
    pub fn new(base_url: &str, session_path: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_path: session_path.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

impl Connector for BridgeConnector {
    fn connect(&self, events: EventSender) -> Result<Arc<dyn MessagingClient>, ClientError> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Rejected(format!("invalid bridge url {}: {}", self.base_url, e)))?;
        let events_url = format!("{}/events", websocket_base(&self.base_url));
        let stream = tokio::spawn(run_event_stream(events_url, events));

        Ok(Arc::new(BridgeClient {
            base_url,
            session_path: self.session_path.clone(),
            http: self.http.clone(),
            stream,
        }))
    }
}

pub struct BridgeClient {
    base_url: Url,
    session_path: String,
    http: reqwest::Client,
    stream: JoinHandle<()>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest<'a> {
    data_path: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    chat_id: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quoted_message_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct BridgeReceipt {
    id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

impl BridgeClient {
    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let resp = self.http.get(endpoint(&self.base_url, segments)?).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ClientError> {
        let resp = self.http.post(endpoint(&self.base_url, segments)?).json(body).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    /// POST where only the status matters; the bridge may answer with an empty body.
    async fn command<B: Serialize>(&self, segments: &[&str], body: &B) -> Result<(), ClientError> {
        let resp = self.http.post(endpoint(&self.base_url, segments)?).json(body).send().await?;
        check(resp).await?;
        Ok(())
    }
}

/// Append path segments to the bridge base url, escaping each one so caller
/// supplied ids can never leave their segment.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| ClientError::Rejected(format!("bridge url {} cannot carry a path", base)))?;
        path.pop_if_empty();
        for segment in segments {
            if segment.is_empty() || matches!(*segment, "." | "..") {
                return Err(ClientError::Rejected(format!("invalid path segment '{}'", segment)));
            }
            path.push(segment);
        }
    }
    Ok(url)
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

impl MessagingClient for BridgeClient {
    fn start(&self) -> ClientFuture<'_, ()> {
        async move {
            let req = StartRequest {
                data_path: &self.session_path,
            };
            self.command(&["session", "start"], &req).await?;
            info!("Bridge session start requested");
            Ok(())
        }
        .boxed()
    }

    fn destroy(&self) -> ClientFuture<'_, ()> {
        async move {
            self.stream.abort();
            self.command(&["session", "destroy"], &serde_json::json!({})).await
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
            let req = SendRequest {
                chat_id,
                body,
                quoted_message_id: quoted,
            };
            let receipt: BridgeReceipt = self.post(&["messages"], &req).await?;
            Ok(SendReceipt {
                id: receipt.id,
                timestamp: receipt.timestamp,
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
            match self.get::<MessageRef>(&["messages", chat_id, message_id]).await {
                Ok(found) => Ok(Some(found.id)),
                Err(ClientError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
                Err(e) => Err(e),
            }
        }
        .boxed()
    }

    fn contact<'a>(&'a self, contact_id: &'a str) -> ClientFuture<'a, ContactInfo> {
        async move { self.get(&["contacts", contact_id]).await }.boxed()
    }

    fn chats(&self) -> ClientFuture<'_, Vec<Chat>> {
        async move { self.get(&["chats"]).await }.boxed()
    }

    fn chat<'a>(&'a self, chat_id: &'a str) -> ClientFuture<'a, Chat> {
        async move { self.get(&["chats", chat_id]).await }.boxed()
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.stream.abort();
    }
}

/// Relay JSON event frames from the bridge into the session until either side goes away.
async fn run_event_stream(url: String, events: EventSender) {
    let mut socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            error!("Failed to open bridge event stream {}: {}", url, e);
            let _ = events.send(ClientEvent::Disconnected {
                reason: format!("event stream unavailable: {}", e),
            });
            return;
        }
    };
    debug!("Bridge event stream connected: {}", url);

    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                Ok(event) => {
                    if events.send(event).is_err() {
                        // session stopped listening
                        return;
                    }
                }
                Err(e) => warn!("Ignoring unrecognized bridge event: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Bridge event stream error: {}", e);
                break;
            }
        }
    }

    let _ = events.send(ClientEvent::Disconnected {
        reason: "bridge event stream closed".into(),
    });
}

fn websocket_base(http_base: &str) -> String {
    if let Some(rest) = http_base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = http_base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        http_base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_base_follows_scheme() {
        assert_eq!(websocket_base("http://127.0.0.1:3100"), "ws://127.0.0.1:3100");
        assert_eq!(websocket_base("https://bridge.local"), "wss://bridge.local");
    }

    #[test]
    fn connector_trims_trailing_slash() {
        let c = BridgeConnector::new("http://127.0.0.1:3100/", "./sessions");
        assert_eq!(c.base_url, "http://127.0.0.1:3100");
    }

    #[test]
    fn endpoint_escapes_caller_ids() {
        let base = Url::parse("http://127.0.0.1:3100").unwrap();

        let url = endpoint(&base, &["contacts", "../session/destroy?x=@c.us"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:3100/contacts/..%2Fsession%2Fdestroy%3Fx=@c.us");

        let url = endpoint(&base, &["chats", "abc#frag@g.us"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:3100/chats/abc%23frag@g.us");
        assert_eq!(url.path_segments().unwrap().count(), 2);

        let url = endpoint(&base, &["messages", "1@c.us", "100%"]).unwrap();
        assert_eq!(url.path(), "/messages/1@c.us/100%25");
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let base = Url::parse("http://bridge.local/wa").unwrap();
        let url = endpoint(&base, &["chats"]).unwrap();
        assert_eq!(url.as_str(), "http://bridge.local/wa/chats");
    }

    #[test]
    fn endpoint_rejects_dot_segments() {
        let base = Url::parse("http://127.0.0.1:3100").unwrap();
        assert!(matches!(
            endpoint(&base, &["messages", "1@c.us", ".."]),
            Err(ClientError::Rejected(_))
        ));
        assert!(matches!(endpoint(&base, &["contacts", ""]), Err(ClientError::Rejected(_))));
    }

    #[tokio::test]
    async fn caller_ids_stay_inside_their_segment() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        use crate::client::{contact_address, group_address};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut lines = Vec::new();
            for _ in 0..2 {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = sock.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                lines.push(request.lines().next().unwrap_or_default().to_string());
                sock.write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await
                    .unwrap();
            }
            lines
        });

        let client = BridgeClient {
            base_url: Url::parse(&format!("http://{}", addr)).unwrap(),
            session_path: String::new(),
            http: reqwest::Client::new(),
            stream: tokio::spawn(async {}),
        };
        assert!(client.contact(&contact_address("../session/destroy?x=")).await.is_err());
        assert!(client.chat(&group_address("abc#frag")).await.is_err());

        let lines = server.await.unwrap();
        assert_eq!(
            lines,
            vec![
                "GET /contacts/..%2Fsession%2Fdestroy%3Fx=@c.us HTTP/1.1".to_string(),
                "GET /chats/abc%23frag@g.us HTTP/1.1".to_string(),
            ]
        );
    }

    #[test]
    fn send_request_omits_missing_quote() {
        let req = SendRequest {
            chat_id: "1@c.us",
            body: "hi",
            quoted_message_id: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, serde_json::json!({"chatId": "1@c.us", "body": "hi"}));
    }

    #[tokio::test]
    async fn unreachable_bridge_reports_disconnected() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        // nothing listens on port 9 locally
        run_event_stream("ws://127.0.0.1:9/events".into(), tx).await;
        match rx.recv().await {
            Some(ClientEvent::Disconnected { reason }) => assert!(reason.contains("unavailable")),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
