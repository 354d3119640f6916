// ============================
// crates/backend-lib/src/registry.rs
// ============================
//! Live connections of one meet and the referee seats they hold.
use crate::error::AppError;
use reflights_common::{Role, Seat, ServerMessage, REFEREE_COUNT};
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// A connection attached to a meet
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Outbound queue drained by the connection's writer task
    pub tx: mpsc::Sender<ServerMessage>,
    /// Role bound by `registerRef`; observers until then
    pub role: Role,
    /// Identity reported by the auth layer, if any
    pub identity: Option<String>,
}

/// Outcome of a successful [`ConnectionRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Whether the set of occupied seats changed
    pub seats_changed: bool,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    seats: [Option<ConnectionId>; REFEREE_COUNT],
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection as an observer. Re-attaching an id replaces its sender.
    pub fn attach(
        &mut self,
        id: ConnectionId,
        tx: mpsc::Sender<ServerMessage>,
        identity: Option<String>,
    ) {
        self.unregister(id);
        self.connections.insert(
            id,
            ConnectionEntry {
                tx,
                role: Role::Observer,
                identity,
            },
        );
    }

    /// Bind a connection to a role.
    ///
    /// A referee seat can only be taken when vacant or already held by the
    /// same connection. Moving to another seat, or to a non-voting role,
    /// releases the seat held before.
    pub fn register(&mut self, id: ConnectionId, role: Role) -> Result<Registration, AppError> {
        if !self.connections.contains_key(&id) {
            return Err(AppError::NotFound(format!("connection {id}")));
        }

        let current = self.seat_of(id);
        let seats_changed = match role.seat() {
            Some(seat) => match self.seats[seat.index()] {
                Some(holder) if holder != id => return Err(AppError::SeatOccupied(seat)),
                Some(_) => false,
                None => {
                    if let Some(old) = current {
                        self.seats[old.index()] = None;
                    }
                    self.seats[seat.index()] = Some(id);
                    true
                },
            },
            None => match current {
                Some(old) => {
                    self.seats[old.index()] = None;
                    true
                },
                None => false,
            },
        };

        if let Some(entry) = self.connections.get_mut(&id) {
            entry.role = role;
        }
        Ok(Registration { seats_changed })
    }

    /// Remove a connection, returning the seat it held. Idempotent.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Seat> {
        self.connections.remove(&id)?;
        let seat = Seat::ALL
            .into_iter()
            .find(|seat| self.seats[seat.index()] == Some(id))?;
        self.seats[seat.index()] = None;
        Some(seat)
    }

    /// Release a seat; its holder stays attached as an observer.
    pub fn vacate(&mut self, seat: Seat) -> bool {
        let Some(holder) = self.seats[seat.index()].take() else {
            return false;
        };
        if let Some(entry) = self.connections.get_mut(&holder) {
            entry.role = Role::Observer;
        }
        true
    }

    /// Release every seat, returning whether any was occupied.
    pub fn vacate_all(&mut self) -> bool {
        Seat::ALL
            .into_iter()
            .fold(false, |changed, seat| self.vacate(seat) | changed)
    }

    pub fn seat_of(&self, id: ConnectionId) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|seat| self.seats[seat.index()] == Some(id))
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        self.connections.get(&id).map(|entry| entry.role)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Occupied seats in display order
    pub fn connected_seats(&self) -> Vec<Seat> {
        Seat::ALL
            .into_iter()
            .filter(|seat| self.seats[seat.index()].is_some())
            .collect()
    }

    /// Who holds each seat: the connection's identity, or its id when anonymous
    pub fn occupancy(&self) -> [Option<String>; REFEREE_COUNT] {
        self.seats.map(|holder| {
            holder.and_then(|id| {
                self.connections.get(&id).map(|entry| {
                    entry.identity.clone().unwrap_or_else(|| id.to_string())
                })
            })
        })
    }

    pub fn occupancy_message(&self) -> ServerMessage {
        let [left_user, center_user, right_user] = self.occupancy();
        ServerMessage::OccupancyChanged {
            left_user,
            center_user,
            right_user,
        }
    }

    pub fn sender(&self, id: ConnectionId) -> Option<&mpsc::Sender<ServerMessage>> {
        self.connections.get(&id).map(|entry| &entry.tx)
    }

    pub fn senders(&self) -> impl Iterator<Item = (ConnectionId, &mpsc::Sender<ServerMessage>)> {
        self.connections.iter().map(|(id, entry)| (*id, &entry.tx))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
