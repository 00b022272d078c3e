//! Live stream fan-out
//!
//! `POST /v1/chat` publishes its events here so `GET /v1/stream/:session_id`
//! can attach to an in-flight pipeline. Channels live only while a request
//! is streaming.

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::StreamEvent;

const FANOUT_BUFFER: usize = 64;

#[derive(Default)]
pub struct StreamHub {
    channels: DashMap<Uuid, broadcast::Sender<StreamEvent>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the active stream for a session, returning the publish side.
    pub fn register(&self, session_id: Uuid) -> broadcast::Sender<StreamEvent> {
        let (tx, _rx) = broadcast::channel(FANOUT_BUFFER);
        self.channels.insert(session_id, tx.clone());
        tx
    }

    pub fn unregister(&self, session_id: Uuid) {
        self.channels.remove(&session_id);
    }

    /// Attach to a live stream, if one exists for the session.
    pub fn subscribe(&self, session_id: Uuid) -> Option<broadcast::Receiver<StreamEvent>> {
        self.channels.get(&session_id).map(|tx| tx.subscribe())
    }

    pub fn active_count(&self) -> usize {
        self.channels.len()
    }
}
