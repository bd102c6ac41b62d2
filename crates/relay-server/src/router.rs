//! Message router: lifecycle hooks, login/logout state machine, relay fan-out.
//!
//! Each connection moves through `Anonymous → Authenticated(user) → Closed`
//! independently. All registry mutations for one event happen under a single
//! lock on the [`RoutingTable`]; relays snapshot their recipients under that
//! lock and deliver after releasing it.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use relay_core::{ConnectionId, DeliveryError, Message, OutboundFrame, RouteError, UserId};
use relay_settings::{RoutingSettings, SessionSettings};
use relay_telemetry::metrics as m;
use tracing::{debug, info, warn};

pub use crate::routing::LoginChange;
use crate::routing::RoutingTable;
use crate::session::{Outbound, Session};

/// Where a relayed message was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Every open session, including the sender's.
    Broadcast,
    /// Every session logged in as this user.
    Unicast(UserId),
}

/// Outcome of one relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayReport {
    /// Destination.
    pub route: Route,
    /// Label attached as `from`.
    pub from: UserId,
    /// Delivery attempts (one per recipient session).
    pub attempted: usize,
    /// Attempts that were queued.
    pub delivered: usize,
}

/// What the router did with one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Connection is now bound to `user`.
    LoggedIn {
        /// New identity.
        user: UserId,
        /// Effect on the previous binding.
        change: LoginChange,
    },
    /// Connection is anonymous again. `None` if it was not logged in.
    LoggedOut(Option<UserId>),
    /// Message was routed.
    Relayed(RelayReport),
}

/// Routes frames between sessions. Owns the routing table.
pub struct Router {
    table: Mutex<RoutingTable>,
    require_login: bool,
    max_send_drops: u64,
}

impl Router {
    /// Build a router from settings.
    pub fn new(routing: &RoutingSettings, session: &SessionSettings) -> Self {
        Self::with_policy(routing.require_login, session.max_send_drops)
    }

    /// Build a router with explicit policy values.
    pub fn with_policy(require_login: bool, max_send_drops: u64) -> Self {
        Self {
            table: Mutex::new(RoutingTable::new()),
            require_login,
            max_send_drops,
        }
    }

    /// A connection was accepted. Registers it in the broadcast set.
    pub fn on_connect(&self, id: ConnectionId, outbound: impl Outbound) -> Arc<Session> {
        let session = Arc::new(Session::new(id.clone(), outbound));
        let mut table = self.table.lock();
        if table.is_open(&id) {
            warn!(conn_id = %id, "connection id reused, replacing stale session");
            if let Some((stale, _)) = table.close(&id) {
                stale.close();
            }
        }
        let _ = table.open(Arc::clone(&session));
        record_gauges(&table);
        drop(table);

        counter!(m::WS_CONNECTIONS_TOTAL).increment(1);
        info!(conn_id = %id, "client connected");
        session
    }

    /// Decode and dispatch one inbound text frame.
    ///
    /// Errors reject this frame only; the connection stays usable.
    pub fn on_frame(&self, id: &ConnectionId, raw: &str) -> Result<Dispatch, RouteError> {
        counter!(m::FRAMES_RECEIVED_TOTAL).increment(1);
        let result = Message::decode(raw).and_then(|message| {
            debug!(conn_id = %id, kind = message.kind(), "frame received");
            self.handle(id, message)
        });
        if let Err(e) = &result {
            counter!(m::FRAMES_REJECTED_TOTAL, "reason" => e.error_kind()).increment(1);
        }
        result
    }

    /// Dispatch an already decoded message.
    pub fn handle(&self, id: &ConnectionId, message: Message) -> Result<Dispatch, RouteError> {
        match message {
            Message::Login { user_id } => self.login(id, user_id),
            Message::Logout { user_id } => self.logout(id, user_id.as_ref()),
            Message::Relay {
                user_id,
                body,
                target,
            } => self.relay(id, user_id, &body, target).map(Dispatch::Relayed),
        }
    }

    fn login(&self, id: &ConnectionId, user: UserId) -> Result<Dispatch, RouteError> {
        let mut table = self.table.lock();
        let change = table
            .login(id, user.clone())
            .ok_or_else(|| RouteError::UnknownConnection(id.to_string()))?;
        record_gauges(&table);
        drop(table);

        match &change {
            LoginChange::Bound => info!(conn_id = %id, user_id = %user, "login"),
            LoginChange::Rebound(previous) => {
                counter!(m::LOGOUTS_TOTAL, "cause" => "relogin").increment(1);
                info!(conn_id = %id, user_id = %user, previous = %previous, "login replaced previous identity");
            }
            LoginChange::Unchanged => debug!(conn_id = %id, user_id = %user, "repeated login"),
        }
        if change != LoginChange::Unchanged {
            counter!(m::LOGINS_TOTAL).increment(1);
        }
        Ok(Dispatch::LoggedIn { user, change })
    }

    fn logout(&self, id: &ConnectionId, claimed: Option<&UserId>) -> Result<Dispatch, RouteError> {
        let mut table = self.table.lock();
        if !table.is_open(id) {
            return Err(RouteError::UnknownConnection(id.to_string()));
        }
        let previous = table.logout(id);
        record_gauges(&table);
        drop(table);

        match (&previous, claimed) {
            (Some(user), Some(claimed)) if user != claimed => {
                warn!(conn_id = %id, user_id = %user, claimed = %claimed, "logout named a different user; removed the bound one");
            }
            (None, _) => debug!(conn_id = %id, "logout from anonymous connection"),
            _ => {}
        }
        if let Some(user) = &previous {
            counter!(m::LOGOUTS_TOTAL, "cause" => "logout").increment(1);
            info!(conn_id = %id, user_id = %user, "logout");
        }
        Ok(Dispatch::LoggedOut(previous))
    }

    fn relay(
        &self,
        id: &ConnectionId,
        from: UserId,
        body: &str,
        target: Option<UserId>,
    ) -> Result<RelayReport, RouteError> {
        let recipients = {
            let table = self.table.lock();
            if !table.is_open(id) {
                return Err(RouteError::UnknownConnection(id.to_string()));
            }
            if self.require_login && table.user_of(id).is_none() {
                return Err(RouteError::LoginRequired);
            }
            match &target {
                None => table.broadcast_recipients(),
                Some(user) => table.recipients_for(user),
            }
        };

        let route = match target {
            None => Route::Broadcast,
            Some(user) => Route::Unicast(user),
        };
        let route_label = match route {
            Route::Broadcast => "broadcast",
            Route::Unicast(_) => "unicast",
        };
        counter!(m::MESSAGES_RELAYED_TOTAL, "route" => route_label).increment(1);

        if recipients.is_empty() {
            if let Route::Unicast(user) = &route {
                counter!(m::UNKNOWN_TARGET_TOTAL).increment(1);
                debug!(conn_id = %id, target = %user, "no session for target, dropped");
            }
            return Ok(RelayReport {
                route,
                from,
                attempted: 0,
                delivered: 0,
            });
        }

        let frame: Arc<str> = Arc::from(OutboundFrame::new(body, &from).encode());
        let mut delivered = 0;
        let mut to_evict = Vec::new();
        for session in &recipients {
            match session.send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    counter!(m::DELIVERY_FAILURES_TOTAL, "reason" => e.error_kind()).increment(1);
                    let drops = session.drop_count();
                    if e == DeliveryError::QueueFull && drops >= self.max_send_drops {
                        to_evict.push(Arc::clone(session));
                    } else {
                        warn!(conn_id = %session.id, error = %e, total_drops = drops, "failed to deliver to client");
                    }
                }
            }
        }
        counter!(m::DELIVERIES_TOTAL).increment(delivered as u64);
        debug!(
            conn_id = %id,
            from = %from,
            route = route_label,
            recipients = recipients.len(),
            delivered,
            "relayed message"
        );

        for session in to_evict {
            counter!(m::SLOW_CLIENT_EVICTIONS_TOTAL).increment(1);
            warn!(conn_id = %session.id, drops = session.drop_count(), "disconnecting slow client");
            session.close();
            let _ = self.on_disconnect(&session.id);
        }

        Ok(RelayReport {
            route,
            from,
            attempted: recipients.len(),
            delivered,
        })
    }

    /// The connection is gone. Removes it from every registry.
    ///
    /// Returns `false` if it was already closed; repeated calls are no-ops.
    pub fn on_disconnect(&self, id: &ConnectionId) -> bool {
        let mut table = self.table.lock();
        let Some((session, user)) = table.close(id) else {
            return false;
        };
        record_gauges(&table);
        drop(table);

        session.close();
        counter!(m::WS_DISCONNECTIONS_TOTAL).increment(1);
        if user.is_some() {
            counter!(m::LOGOUTS_TOTAL, "cause" => "disconnect").increment(1);
        }
        info!(
            conn_id = %id,
            user_id = user.as_ref().map_or("", UserId::as_str),
            "client disconnected"
        );
        true
    }

    /// Close and disconnect every session silent for longer than `timeout`.
    pub fn evict_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<Arc<Session>> = self
            .table
            .lock()
            .sessions()
            .filter(|s| s.idle_for() > timeout)
            .cloned()
            .collect();
        let mut removed = 0;
        for session in idle {
            session.close();
            if self.on_disconnect(&session.id) {
                removed += 1;
                info!(conn_id = %session.id, "closed unresponsive client");
            }
        }
        removed
    }

    /// Ask every open session's transport to close. Cleanup follows through
    /// the normal disconnect path.
    pub fn close_all(&self) -> usize {
        let sessions = self.table.lock().broadcast_recipients();
        for session in &sessions {
            session.close();
        }
        sessions.len()
    }

    /// Whether the connection is open.
    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.table.lock().is_open(id)
    }

    /// Identity bound to the connection.
    pub fn user_of(&self, id: &ConnectionId) -> Option<UserId> {
        self.table.lock().user_of(id).cloned()
    }

    /// Number of sessions logged in as `user`.
    pub fn sessions_for(&self, user: &UserId) -> usize {
        self.table.lock().recipients_for(user).len()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.table.lock().connection_count()
    }

    /// Number of logged-in user ids.
    pub fn user_count(&self) -> usize {
        self.table.lock().user_count()
    }

    /// Verify the cross-registry invariants.
    pub fn check_invariants(&self) -> Result<(), String> {
        self.table.lock().check_invariants()
    }
}

fn record_gauges(table: &RoutingTable) {
    gauge!(m::WS_CONNECTIONS_ACTIVE).set(table.connection_count() as f64);
    gauge!(m::USERS_ACTIVE).set(table.user_count() as f64);
}
