//! Routing table: identity registry, connection index, broadcast set.
//!
//! Not synchronized on its own. The [`Router`](crate::Router) keeps it behind
//! one mutex so each mutation is seen atomically by every lookup.

use std::collections::HashMap;
use std::sync::Arc;

use relay_core::{ConnectionId, UserId};

use crate::session::Session;

/// Effect of a login on the connection's previous binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginChange {
    /// Connection was anonymous.
    Bound,
    /// Connection was already bound to the same user.
    Unchanged,
    /// Connection was bound to another user, which was logged out first.
    Rebound(UserId),
}

/// The three registries.
#[derive(Default)]
pub struct RoutingTable {
    /// `userId -> sessions logged in as that user`. Never holds an empty set.
    identities: HashMap<UserId, HashMap<ConnectionId, Arc<Session>>>,
    /// `connectionId -> userId` for logged-in connections.
    index: HashMap<ConnectionId, UserId>,
    /// Every open session, logged in or not.
    open: HashMap<ConnectionId, Arc<Session>>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the broadcast set. Returns `false` if the id was
    /// already open (the existing session is kept).
    pub fn open(&mut self, session: Arc<Session>) -> bool {
        if self.open.contains_key(&session.id) {
            return false;
        }
        let _ = self.open.insert(session.id.clone(), session);
        true
    }

    /// Whether the connection is in the broadcast set.
    pub fn is_open(&self, conn: &ConnectionId) -> bool {
        self.open.contains_key(conn)
    }

    /// Identity currently bound to the connection.
    pub fn user_of(&self, conn: &ConnectionId) -> Option<&UserId> {
        self.index.get(conn)
    }

    /// Bind an open connection to `user`, logging out any other binding first.
    ///
    /// Returns `None` (and changes nothing) if the connection is not open.
    pub fn login(&mut self, conn: &ConnectionId, user: UserId) -> Option<LoginChange> {
        let session = Arc::clone(self.open.get(conn)?);
        let change = match self.index.get(conn).cloned() {
            Some(current) if current == user => return Some(LoginChange::Unchanged),
            Some(_) => match self.logout(conn) {
                Some(previous) => LoginChange::Rebound(previous),
                None => LoginChange::Bound,
            },
            None => LoginChange::Bound,
        };
        let _ = self
            .identities
            .entry(user.clone())
            .or_default()
            .insert(conn.clone(), session);
        let _ = self.index.insert(conn.clone(), user);
        Some(change)
    }

    /// Remove the connection's binding. Returns the user it was bound to.
    pub fn logout(&mut self, conn: &ConnectionId) -> Option<UserId> {
        let user = self.index.remove(conn)?;
        let emptied = match self.identities.get_mut(&user) {
            Some(sessions) => {
                if sessions.remove(conn).is_none() {
                    tracing::warn!(conn_id = %conn, user_id = %user, "connection index entry without registry membership");
                }
                sessions.is_empty()
            }
            None => {
                tracing::warn!(conn_id = %conn, user_id = %user, "connection index entry for unregistered user");
                false
            }
        };
        if emptied {
            let _ = self.identities.remove(&user);
        }
        Some(user)
    }

    /// Remove the connection from every registry.
    ///
    /// Returns `None` if it was not open, so a second call is a no-op.
    /// Otherwise returns the session and the user it was bound to.
    pub fn close(&mut self, conn: &ConnectionId) -> Option<(Arc<Session>, Option<UserId>)> {
        let session = self.open.remove(conn);
        let user = self.logout(conn);
        session.map(|s| (s, user))
    }

    /// Snapshot of every open session.
    pub fn broadcast_recipients(&self) -> Vec<Arc<Session>> {
        self.open.values().cloned().collect()
    }

    /// Snapshot of every session logged in as `user`.
    pub fn recipients_for(&self, user: &UserId) -> Vec<Arc<Session>> {
        self.identities
            .get(user)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every open session, for sweeps.
    pub fn sessions(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.open.values()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.open.len()
    }

    /// Number of user ids with at least one session.
    pub fn user_count(&self) -> usize {
        self.identities.len()
    }

    /// Check the cross-registry invariants. Returns a description of the
    /// first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (conn, user) in &self.index {
            if !self.open.contains_key(conn) {
                return Err(format!("{conn} indexed as {user} but not open"));
            }
            match self.identities.get(user) {
                Some(sessions) if sessions.contains_key(conn) => {}
                _ => return Err(format!("{conn} indexed as {user} but missing from registry")),
            }
        }
        for (user, sessions) in &self.identities {
            if sessions.is_empty() {
                return Err(format!("empty session set for {user}"));
            }
            for conn in sessions.keys() {
                if self.index.get(conn) != Some(user) {
                    return Err(format!("{conn} registered under {user} but indexed otherwise"));
                }
            }
        }
        Ok(())
    }
}
