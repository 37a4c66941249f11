//! Typed directive layer over the raw signal bus.
//!
//! Signals carry opaque bytes; this module owns the `{type, payload}`
//! envelope so admin publishers and resident subscribers stay in sync.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use asamblea_core::Directive;
use signal_bus::{assembly_channel, SignalError, SignalMessage, SignalResult, Signals};

/// Encodes a directive into the wire envelope shared with the HTTP relay.
pub(crate) fn encode_directive(directive: &Directive) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&serde_json::json!({
        "type": "directive",
        "payload": directive,
    }))
}

pub struct DirectivePublisher<S: Signals> {
    signals: Arc<S>,
    channel: String,
}

impl<S: Signals> DirectivePublisher<S> {
    pub fn new(signals: Arc<S>, assembly: Uuid) -> Self {
        Self {
            signals,
            channel: assembly_channel(assembly),
        }
    }

    pub fn publish(&self, directive: &Directive) -> SignalResult<()> {
        let envelope =
            encode_directive(directive).map_err(|err| SignalError::Transport(err.to_string()))?;
        self.signals.send(&self.channel, Bytes::from(envelope))
    }
}

impl<S: Signals> Clone for DirectivePublisher<S> {
    fn clone(&self) -> Self {
        Self {
            signals: Arc::clone(&self.signals),
            channel: self.channel.clone(),
        }
    }
}

pub struct DirectiveSubscriber<S: Signals> {
    signals: Arc<S>,
    channel: String,
}

impl<S: Signals> DirectiveSubscriber<S> {
    pub fn new(signals: Arc<S>, assembly: Uuid) -> Self {
        Self {
            signals,
            channel: assembly_channel(assembly),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalMessage> {
        self.signals.subscribe(&self.channel)
    }
}

#[derive(serde::Deserialize)]
struct SignalEnvelope {
    #[serde(rename = "type")]
    kind: String,
    payload: Value,
}

/// Decodes a signal payload. Foreign traffic on the channel (other envelope
/// kinds) is ignored, not an error; undecodable payloads are logged and
/// dropped.
pub fn decode_directive(message: &SignalMessage) -> Option<Directive> {
    let envelope: SignalEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(
                target = "asamblea.signals",
                channel = %message.channel,
                error = %err,
                "undecodable signal payload"
            );
            return None;
        }
    };
    if envelope.kind != "directive" {
        return None;
    }
    match serde_json::from_value(envelope.payload) {
        Ok(directive) => Some(directive),
        Err(err) => {
            warn!(
                target = "asamblea.signals",
                channel = %message.channel,
                error = %err,
                "invalid directive payload"
            );
            None
        }
    }
}
