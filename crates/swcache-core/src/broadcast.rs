//! Notification fan-out to connected page contexts
//!
//! Every connected page gets its own unbounded channel. A broadcast walks
//! the current set of contexts and delivers to each one independently;
//! contexts whose receiving side has gone away are dropped on the way.
//! Nothing is queued for pages that connect later.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Kind of a worker → page notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SwActivated,
    CacheUpdated,
    ContentUpdated,
    CacheError,
    OfflineFallback,
    SwUpdated,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SwActivated => "SW_ACTIVATED",
            EventType::CacheUpdated => "CACHE_UPDATED",
            EventType::ContentUpdated => "CONTENT_UPDATED",
            EventType::CacheError => "CACHE_ERROR",
            EventType::OfflineFallback => "OFFLINE_FALLBACK",
            EventType::SwUpdated => "SW_UPDATED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification sent from the worker to every page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
    pub url: Option<String>,
    pub aux_data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            message: message.into(),
            url: None,
            aux_data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_aux(mut self, aux: serde_json::Value) -> Self {
        self.aux_data = Some(aux);
        self
    }
}

/// Identifier of a connected page context
pub type ClientId = u64;

struct Client {
    sender: mpsc::UnboundedSender<BroadcastMessage>,
    controlled: bool,
}

/// Registry of connected page contexts
#[derive(Default)]
pub struct Broadcaster {
    clients: RwLock<BTreeMap<ClientId, Client>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new page context and return its message stream
    pub fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<BroadcastMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.clients.write().insert(
            id,
            Client {
                sender,
                controlled: false,
            },
        );
        debug!("Page context {} connected", id);
        (id, receiver)
    }

    /// Remove a page context
    pub fn disconnect(&self, id: ClientId) -> bool {
        self.clients.write().remove(&id).is_some()
    }

    /// Number of connected page contexts
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether a page context is controlled by the current worker
    pub fn is_controlled(&self, id: ClientId) -> bool {
        self.clients
            .read()
            .get(&id)
            .map(|c| c.controlled)
            .unwrap_or(false)
    }

    /// Take control of every connected page context, returns how many were claimed
    pub fn claim(&self) -> usize {
        let mut clients = self.clients.write();
        for client in clients.values_mut() {
            client.controlled = true;
        }
        clients.len()
    }

    /// Deliver a message to every connected page context
    ///
    /// Returns the number of contexts that received it. A failed delivery
    /// only removes that one context.
    pub fn broadcast(&self, message: BroadcastMessage) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let clients = self.clients.read();
            for (id, client) in clients.iter() {
                match client.sender.send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => closed.push(*id),
                }
            }
        }

        if !closed.is_empty() {
            let mut clients = self.clients.write();
            for id in &closed {
                clients.remove(id);
            }
            debug!("Dropped {} closed page contexts", closed.len());
        }

        debug!(
            "Broadcast {} to {} page contexts",
            message.event_type, delivered
        );
        delivered
    }
}
