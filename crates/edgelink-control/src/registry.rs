//! Tenant registry (room membership)
//!
//! Maps a tenant routing token to the agent connections currently serving it.
//! Mutated only on connect/disconnect, read on every forward. Readers get a
//! snapshot of the member handles so no lock is held while sending.

use crate::connection::{AgentConnection, ConnectionId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct Rooms {
    /// tenant -> (connection id -> handle)
    members: HashMap<String, HashMap<ConnectionId, AgentConnection>>,
    /// connection id -> tenant, for leave()
    membership: HashMap<ConnectionId, String>,
}

/// Result of removing a connection from its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub tenant: String,
    /// Connections still joined to the tenant's room
    pub remaining: usize,
}

/// Registry of tenant rooms
#[derive(Debug, Default)]
pub struct TenantRegistry {
    rooms: RwLock<Rooms>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a connection to the room of `tenant`
    pub fn join(&self, tenant: &str, connection: AgentConnection) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let connection_id = connection.connection_id;

        rooms
            .membership
            .insert(connection_id, tenant.to_string());
        let room = rooms.members.entry(tenant.to_string()).or_default();
        room.insert(connection_id, connection);

        tracing::info!(
            tenant = %tenant,
            connection_id = %connection_id,
            members = room.len(),
            "Agent joined tenant room"
        );
        if room.len() > 1 {
            tracing::warn!(
                tenant = %tenant,
                members = room.len(),
                "More than one agent serves this tenant; requests will fan out"
            );
        }
    }

    /// Remove a connection from whichever room it joined
    ///
    /// Returns None if the connection was not a member.
    pub fn leave(&self, connection_id: ConnectionId) -> Option<Departure> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);

        let tenant = rooms.membership.remove(&connection_id)?;
        let remaining = match rooms.members.get_mut(&tenant) {
            Some(room) => {
                room.remove(&connection_id);
                room.len()
            }
            None => 0,
        };
        if remaining == 0 {
            rooms.members.remove(&tenant);
        }

        tracing::info!(
            tenant = %tenant,
            connection_id = %connection_id,
            remaining,
            "Agent left tenant room"
        );

        Some(Departure { tenant, remaining })
    }

    /// Snapshot of the connections currently joined to `tenant`
    pub fn members_of(&self, tenant: &str) -> Vec<AgentConnection> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms
            .members
            .get(tenant)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, tenant: &str) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.members.get(tenant).map(HashMap::len).unwrap_or(0)
    }

    /// Total number of joined connections across all tenants
    pub fn connection_count(&self) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        rooms.membership.len()
    }
}
