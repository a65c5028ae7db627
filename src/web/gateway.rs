// src/web/gateway.rs
//! Client push gateway
//!
//! Each websocket client gets a bounded queue. Pushes never wait: a client
//! whose queue is full or closed is dropped from the subscription table and
//! the rest still get the event.

use super::events::PushEvent;
use crate::{
    error::DeliveryError,
    hub::{GpsUpdate, SnapshotListener, StateReader, StatusUpdate},
};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::sync::mpsc;

pub type ClientId = u64;

/// Events buffered per client before it counts as lagging
pub const CLIENT_QUEUE_DEPTH: usize = 32;

#[derive(Debug)]
struct Subscription {
    sender: mpsc::Sender<Arc<PushEvent>>,
    connected_at: DateTime<Utc>,
    last_delivered: Option<DateTime<Utc>>,
    last_sequence: u64,
}

impl Subscription {
    /// Queue one event; GPS events older than the last delivered are skipped
    fn deliver(&mut self, event: &Arc<PushEvent>) -> Result<bool, DeliveryError> {
        if let Some(sequence) = event.sequence() {
            if sequence < self.last_sequence {
                return Ok(false);
            }
        }

        self.sender
            .try_send(Arc::clone(event))
            .map_err(|error| match error {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
            })?;

        if let Some(sequence) = event.sequence() {
            self.last_sequence = sequence;
        }
        self.last_delivered = Some(Utc::now());
        Ok(true)
    }
}

/// Per-client view for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub connected_at: DateTime<Utc>,
    pub last_delivered: Option<DateTime<Utc>>,
    pub last_sequence: u64,
}

pub struct PushGateway {
    reader: StateReader,
    subscriptions: Mutex<HashMap<ClientId, Subscription>>,
    next_id: AtomicU64,
    clients: Arc<AtomicUsize>,
    queue_depth: usize,
}

impl PushGateway {
    pub fn new(reader: StateReader) -> Self {
        Self::with_queue_depth(reader, CLIENT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(reader: StateReader, queue_depth: usize) -> Self {
        let clients = reader.client_counter();
        Self {
            reader,
            subscriptions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clients,
            queue_depth: queue_depth.max(2),
        }
    }

    /// Register a client. The current status and GPS state are queued right away.
    pub fn subscribe(&self) -> (ClientId, mpsc::Receiver<Arc<PushEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        {
            let mut subscriptions = self.lock();
            subscriptions.insert(
                id,
                Subscription {
                    sender,
                    connected_at: Utc::now(),
                    last_delivered: None,
                    last_sequence: 0,
                },
            );
            self.clients.store(subscriptions.len(), Ordering::Relaxed);
        }

        let status = Arc::new(PushEvent::StatusUpdate(self.reader.status_update()));
        let gps = Arc::new(PushEvent::GpsUpdate(self.reader.gps_update()));
        if let Some(subscription) = self.lock().get_mut(&id) {
            // The queue is fresh, so both fit
            let _ = subscription.deliver(&status);
            let _ = subscription.deliver(&gps);
        }

        tracing::info!(client = id, clients = self.client_count(), "Client connected");
        (id, receiver)
    }

    /// Remove a client; unknown or already-removed ids are fine
    pub fn unsubscribe(&self, id: ClientId) -> bool {
        let mut subscriptions = self.lock();
        let removed = subscriptions.remove(&id).is_some();
        self.clients.store(subscriptions.len(), Ordering::Relaxed);
        drop(subscriptions);

        if removed {
            tracing::info!(client = id, "Client disconnected");
        }
        removed
    }

    /// Queue an event for every client, returning how many accepted it
    pub fn push(&self, event: PushEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut subscriptions = self.lock();

        subscriptions.retain(|id, subscription| match subscription.deliver(&event) {
            Ok(sent) => {
                delivered += usize::from(sent);
                true
            }
            Err(error) => {
                tracing::warn!(client = id, %error, event = event.name(), "Dropping client");
                false
            }
        });
        self.clients.store(subscriptions.len(), Ordering::Relaxed);
        delivered
    }

    /// Answer a client's `request_update` with the current GPS state
    pub fn send_current(&self, id: ClientId) -> Result<(), DeliveryError> {
        let event = Arc::new(PushEvent::GpsUpdate(self.reader.gps_update()));
        let mut subscriptions = self.lock();
        let subscription = subscriptions
            .get_mut(&id)
            .ok_or(DeliveryError::Disconnected)?;

        match subscription.deliver(&event) {
            Ok(_) => Ok(()),
            Err(error) => {
                subscriptions.remove(&id);
                self.clients.store(subscriptions.len(), Ordering::Relaxed);
                Err(error)
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .lock()
            .iter()
            .map(|(id, subscription)| ClientInfo {
                id: *id,
                connected_at: subscription.connected_at,
                last_delivered: subscription.last_delivered,
                last_sequence: subscription.last_sequence,
            })
            .collect();
        clients.sort_by_key(|client| client.id);
        clients
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ClientId, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotListener for PushGateway {
    fn name(&self) -> &str {
        "websocket"
    }

    fn on_gps_update(&self, update: &GpsUpdate) {
        self.push(PushEvent::GpsUpdate(update.clone()));
    }

    fn on_status_update(&self, status: &StatusUpdate) {
        self.push(PushEvent::StatusUpdate(status.clone()));
    }
}
