// ============================
// crates/backend-lib/src/dispatcher.rs
// ============================
//! Fan-out of server messages to the connections of one meet.
//!
//! Delivery never waits: each connection has a bounded queue and a full
//! queue marks the connection as failed so the caller can drop it.
use crate::metrics as keys;
use crate::registry::{ConnectionId, ConnectionRegistry};
use metrics::counter;
use reflights_common::ServerMessage;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Result of a broadcast
#[derive(Debug, Default)]
pub struct Delivery {
    /// Connections whose queue was full or closed
    pub failed: Vec<ConnectionId>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection is not attached")]
    NotAttached,
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// Send `message` to every attached connection.
pub fn broadcast(registry: &ConnectionRegistry, message: &ServerMessage) -> Delivery {
    let mut delivery = Delivery::default();
    for (id, tx) in registry.senders() {
        if let Err(err) = tx.try_send(message.clone()) {
            note_failure(id, &err);
            delivery.failed.push(id);
        }
    }
    delivery
}

/// Send `message` to a single connection.
pub fn send_to(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    message: &ServerMessage,
) -> Result<(), DeliveryError> {
    let tx = registry.sender(id).ok_or(DeliveryError::NotAttached)?;
    tx.try_send(message.clone()).map_err(|err| {
        note_failure(id, &err);
        match err {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        }
    })
}

fn note_failure<T>(id: ConnectionId, err: &TrySendError<T>) {
    match err {
        TrySendError::Full(_) => {
            warn!(conn = %id, "slow consumer, outbound queue full");
            counter!(keys::BROADCAST_DROPPED).increment(1);
        },
        TrySendError::Closed(_) => debug!(conn = %id, "outbound queue closed"),
    }
}
