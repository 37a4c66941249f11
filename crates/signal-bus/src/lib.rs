//! Generic broadcast send/receive channels keyed by a channel name.
//!
//! This is the low-level signal surface admins use to reach residents
//! ("show the exit form now", "this attendee may leave"). Payloads are
//! opaque bytes; the typed envelope lives with the caller. Handlers must be
//! idempotent: deliveries across independently subscribed channels carry no
//! ordering guarantee.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub channel: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal channel closed")]
    Closed,
    #[error("signal transport error: {0}")]
    Transport(String),
}

pub type SignalResult<T> = Result<T, SignalError>;

/// A named-channel fan-out. `send` delivers to every current subscriber of
/// the channel; subscribers joining later only see subsequent sends.
pub trait Signals: Send + Sync {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<SignalMessage>;
    fn send(&self, channel: &str, payload: Bytes) -> SignalResult<()>;
}

/// Canonical channel name for one assembly's resident signals.
pub fn assembly_channel(assembly_id: Uuid) -> String {
    format!("asamblea:{assembly_id}")
}

/// In-process implementation backing tests, the stress harness, and the
/// SSE relay's local leg.
#[derive(Debug)]
pub struct LocalSignals {
    channels: parking_lot::RwLock<std::collections::HashMap<String, broadcast::Sender<SignalMessage>>>,
    depth: usize,
}

impl Default for LocalSignals {
    fn default() -> Self {
        Self::with_depth(DEFAULT_CHANNEL_DEPTH)
    }
}

impl LocalSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depth bounds how far a slow subscriber may lag before it starts
    /// missing signals.
    pub fn with_depth(depth: usize) -> Self {
        Self {
            channels: parking_lot::RwLock::new(std::collections::HashMap::new()),
            depth,
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<SignalMessage> {
        let mut guard = self.channels.write();
        guard
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.depth).0)
            .clone()
    }
}

impl Signals for LocalSignals {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<SignalMessage> {
        self.sender_for(channel).subscribe()
    }

    fn send(&self, channel: &str, payload: Bytes) -> SignalResult<()> {
        let sender = self.sender_for(channel);
        // A broadcast with no live subscribers is not a failure; the sender
        // does not know who is listening.
        let _ = sender.send(SignalMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_on_assembly_channel() {
        let signals = LocalSignals::new();
        let channel = assembly_channel(Uuid::new_v4());
        let mut sub = signals.subscribe(&channel);

        signals
            .send(&channel, Bytes::from_static(b"salir"))
            .expect("send ok");

        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.channel, channel);
        assert_eq!(msg.payload, Bytes::from_static(b"salir"));
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let signals = LocalSignals::new();
        let mut first = signals.subscribe("sala");
        let mut second = signals.subscribe("sala");

        signals.send("sala", Bytes::from_static(b"aviso")).unwrap();

        assert_eq!(first.recv().await.unwrap().payload, Bytes::from_static(b"aviso"));
        assert_eq!(second.recv().await.unwrap().payload, Bytes::from_static(b"aviso"));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let signals = LocalSignals::new();
        let mut sala = signals.subscribe("sala");
        signals.send("otra", Bytes::from_static(b"nada")).unwrap();
        signals.send("sala", Bytes::from_static(b"si")).unwrap();

        assert_eq!(sala.recv().await.unwrap().payload, Bytes::from_static(b"si"));
    }
}
