//! JSON document store client.
//!
//! Wire contract:
//! - `GET {base}/v1/schedules/changes?since=<cursor>` -> `{ "changes": [doc], "cursor": "..." }`
//! - `PUT {base}/v1/schedules/{id}` -> `200 doc` | `409 doc` | `400/404/422` | other
//! - `GET {base}/v1/schedules/head` -> `{ "cursor": "..." }`

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::{ChangeBatch, ChangeHandler, RemoteChange, RemoteError, RemoteGateway, RemoteResult, WakeHint};
use crate::config::normalize_api_base_url;
use crate::error::Result;
use crate::models::{EntryId, ScheduleEntry, SyncCursor, TransportKind};
use crate::util::compact_text;

const DEFAULT_HEAD_POLL: Duration = Duration::from_secs(30);

/// Connection settings of [`HttpGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    /// How often `subscribe` polls the head cursor.
    pub head_poll_interval: Duration,
}

impl HttpGatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout: Duration::from_secs(15),
            head_poll_interval: DEFAULT_HEAD_POLL,
        }
    }
}

/// Remote gateway over the HTTP document API.
pub struct HttpGateway {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
    head_poll_interval: Duration,
    subscribers: Arc<Mutex<Vec<ChangeHandler>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let base_url = normalize_api_base_url(&config.base_url)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| {
                crate::Error::Config(format!("Failed to construct HTTP client: {error}"))
            })?;
        Ok(Self {
            base_url,
            auth_token: config.auth_token,
            client,
            head_poll_interval: config.head_poll_interval,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            poller: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn changes_url(&self, cursor: Option<&SyncCursor>) -> String {
        cursor.map_or_else(
            || format!("{}/v1/schedules/changes", self.base_url),
            |cursor| {
                format!(
                    "{}/v1/schedules/changes?since={}",
                    self.base_url,
                    urlencoding::encode(cursor.as_str())
                )
            },
        )
    }

    fn entry_url(&self, id: &EntryId) -> String {
        format!(
            "{}/v1/schedules/{}",
            self.base_url,
            urlencoding::encode(id.as_str())
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn start_head_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available; remote change polling disabled");
            return;
        };

        let client = self.client.clone();
        let url = format!("{}/v1/schedules/head", self.base_url);
        let auth_token = self.auth_token.clone();
        let subscribers = Arc::clone(&self.subscribers);
        let interval = self.head_poll_interval;

        *poller = Some(runtime.spawn(async move {
            let mut last_seen: Option<String> = None;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let mut request = client.get(&url).header(reqwest::header::ACCEPT, "application/json");
                if let Some(token) = &auth_token {
                    request = request.bearer_auth(token);
                }
                let head = match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        response.json::<HeadResponse>().await.ok()
                    }
                    Ok(response) => {
                        tracing::debug!("Head poll returned HTTP {}", response.status().as_u16());
                        None
                    }
                    Err(error) => {
                        tracing::debug!("Head poll failed: {error}");
                        None
                    }
                };
                let Some(head) = head else {
                    continue;
                };
                if last_seen.as_deref() == Some(head.cursor.as_str()) {
                    continue;
                }
                let changed = last_seen.is_some();
                last_seen = Some(head.cursor);
                if changed {
                    let handlers = subscribers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    for handler in handlers {
                        handler(WakeHint::default());
                    }
                }
            }
        }));
    }
}

impl Drop for HttpGateway {
    fn drop(&mut self) {
        if let Some(poller) = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            poller.abort();
        }
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_since(&self, cursor: Option<&SyncCursor>) -> RemoteResult<ChangeBatch> {
        let response = self
            .authorize(self.client.get(self.changes_url(cursor)))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(classify_status(status, &body));
        }
        decode_change_batch(&body)
    }

    async fn push(&self, entry: &ScheduleEntry) -> RemoteResult<ScheduleEntry> {
        let document = RemoteDocument::from(entry);
        let response = self
            .authorize(self.client.put(self.entry_url(&entry.id)))
            .json(&document)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        match status {
            200 | 201 => decode_document(&body),
            409 => Err(RemoteError::Conflict(Box::new(decode_document(&body)?))),
            _ => Err(classify_status(status, &body)),
        }
    }

    fn subscribe(&self, handler: ChangeHandler) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
        self.start_head_poller();
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transient(error.to_string())
    }
}

/// Map a non-success status to the error class the engine acts on.
fn classify_status(status: u16, body: &str) -> RemoteError {
    let message = format!("HTTP {status}: {}", compact_text(body));
    match status {
        400 | 404 | 422 => RemoteError::Rejected(message),
        _ => RemoteError::Transient(message),
    }
}

fn decode_document(body: &str) -> RemoteResult<ScheduleEntry> {
    let document: RemoteDocument = serde_json::from_str(body)
        .map_err(|error| RemoteError::Rejected(format!("malformed document: {error}")))?;
    ScheduleEntry::try_from(document)
        .map_err(|error| RemoteError::Rejected(format!("invalid document: {error}")))
}

/// Decode a change page, dropping documents that fail validation.
fn decode_change_batch(body: &str) -> RemoteResult<ChangeBatch> {
    let page: ChangesResponse = serde_json::from_str(body)
        .map_err(|error| RemoteError::Rejected(format!("malformed change batch: {error}")))?;

    let mut changes = Vec::with_capacity(page.changes.len());
    let mut skipped = 0;
    for value in page.changes {
        let decoded = serde_json::from_value::<RemoteDocument>(value)
            .map_err(|error| error.to_string())
            .and_then(|document| {
                ScheduleEntry::try_from(document).map_err(|error| error.to_string())
            });
        match decoded {
            Ok(entry) => changes.push(RemoteChange { entry }),
            Err(error) => {
                skipped += 1;
                tracing::warn!("Skipping malformed remote document: {error}");
            }
        }
    }

    Ok(ChangeBatch {
        changes,
        cursor: SyncCursor::new(page.cursor),
        skipped,
    })
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    changes: Vec<serde_json::Value>,
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct HeadResponse {
    cursor: String,
}

/// Document shape on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct RemoteDocument {
    id: String,
    owner_id: String,
    title: String,
    #[serde(default)]
    location: String,
    starts_at: i64,
    ends_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transport: Option<String>,
    revision: i64,
    updated_at: i64,
    #[serde(default)]
    deleted: bool,
}

impl From<&ScheduleEntry> for RemoteDocument {
    fn from(entry: &ScheduleEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            owner_id: entry.owner_id.clone(),
            title: entry.title.clone(),
            location: entry.location.clone(),
            starts_at: entry.starts_at,
            ends_at: entry.ends_at,
            transport: entry.transport.map(|kind| kind.as_str().to_string()),
            revision: entry.revision,
            updated_at: entry.updated_at,
            deleted: entry.is_deleted,
        }
    }
}

impl TryFrom<RemoteDocument> for ScheduleEntry {
    type Error = crate::Error;

    fn try_from(document: RemoteDocument) -> Result<Self> {
        let entry = Self {
            id: document.id.parse()?,
            owner_id: document.owner_id,
            title: document.title,
            location: document.location,
            starts_at: document.starts_at,
            ends_at: document.ends_at,
            transport: document
                .transport
                .as_deref()
                .map(str::parse::<TransportKind>)
                .transpose()?,
            revision: document.revision,
            updated_at: document.updated_at,
            is_deleted: document.deleted,
        };
        entry.validate()?;
        Ok(entry)
    }
}
