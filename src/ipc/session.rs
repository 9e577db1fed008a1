//! # Session Registry
//!
//! Role bookkeeping for every live connection of one server:
//!
//! ```text
//! Unregistered --show-menu------> OneTimeObserver (id 0)
//! Unregistered --start-observing-> PersistentObserver (id 1, 2, ...)
//! any observer --stop-observing--> Unregistered
//! OneTimeObserver --select/cancel-> Unregistered
//! any state --socket close-------> removed
//! ```
//!
//! Every entry into an observing state opens a fresh [`ScopeToken`]. Events are
//! delivered only while the connection's current scope matches the token the
//! sender captured, so callbacks from an ended registration go quiet.
//!
//! - **Version**: 1.1.0
//! - **Since**: 2.0.0
//!
//! ## Changelog
//! - 1.1.0: 64-bit observer IDs that refuse to wrap
//! - 1.0.0: Roles, scopes and observer counter

use crate::ipc::error::IpcError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub type ObserverId = u64;

/// Observer ID of the implicit observer created by `show-menu`
pub const ONE_TIME_OBSERVER_ID: ObserverId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unregistered,
    OneTimeObserver,
    PersistentObserver(ObserverId),
}

impl Role {
    pub fn observer_id(&self) -> Option<ObserverId> {
        match self {
            Role::Unregistered => None,
            Role::OneTimeObserver => Some(ONE_TIME_OBSERVER_ID),
            Role::PersistentObserver(id) => Some(*id),
        }
    }

    pub fn is_registered(&self) -> bool {
        !matches!(self, Role::Unregistered)
    }
}

/// Identity of a single registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeToken(u64);

/// Outcome of entering an observing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub observer_id: ObserverId,
    pub scope: ScopeToken,
    /// Registration that was replaced by this one
    pub displaced: Option<ObserverId>,
}

/// Outcome of delivering an interaction event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Sent, and the one-time scope it belonged to is over
    SentAndEnded(ObserverId),
    /// Scope no longer current or connection gone; nothing sent
    Stale,
}

struct Session {
    role: Role,
    /// Present exactly while `role` is registered
    scope: Option<ScopeToken>,
    outbound: mpsc::UnboundedSender<String>,
}

pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Session>,
    next_connection_id: AtomicU64,
    next_observer_id: AtomicU64,
    next_scope: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    fn starting_at(first_observer_id: ObserverId) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            next_observer_id: AtomicU64::new(first_observer_id),
            next_scope: AtomicU64::new(1),
        }
    }

    /// Hand out the next persistent ID; the counter never wraps back to 0
    fn allocate_observer_id(&self) -> Result<ObserverId, IpcError> {
        self.next_observer_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(1))
            .map_err(|_| IpcError::ObserverIdsExhausted)
    }

    fn new_scope(&self) -> ScopeToken {
        ScopeToken(self.next_scope.fetch_add(1, Ordering::Relaxed))
    }

    /// Track a freshly accepted connection; frames pushed to `outbound` are written in order
    pub fn open(&self, outbound: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.insert(
            id,
            Session {
                role: Role::Unregistered,
                scope: None,
                outbound,
            },
        );
        id
    }

    /// Forget a connection, returning its observer ID if it was still registered
    pub fn close(&self, conn: ConnectionId) -> Option<ObserverId> {
        self.sessions
            .remove(&conn)
            .and_then(|(_, session)| session.role.observer_id())
    }

    pub fn role(&self, conn: ConnectionId) -> Option<Role> {
        self.sessions.get(&conn).map(|s| s.role)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The ID the next persistent observer will receive
    pub fn peek_next_observer_id(&self) -> ObserverId {
        self.next_observer_id.load(Ordering::SeqCst)
    }

    /// Open a one-time scope, whatever the connection was doing before
    pub fn begin_one_time(&self, conn: ConnectionId) -> Option<Registration> {
        let mut session = self.sessions.get_mut(&conn)?;
        let displaced = session.role.observer_id();
        let scope = self.new_scope();
        session.role = Role::OneTimeObserver;
        session.scope = Some(scope);

        Some(Registration {
            observer_id: ONE_TIME_OBSERVER_ID,
            scope,
            displaced,
        })
    }

    pub fn start_observing(&self, conn: ConnectionId) -> Result<Registration, IpcError> {
        let mut session = self.sessions.get_mut(&conn).ok_or(IpcError::NotConnected)?;
        if session.role.is_registered() {
            return Err(IpcError::AlreadyObserving);
        }

        let observer_id = self.allocate_observer_id()?;
        let scope = self.new_scope();
        session.role = Role::PersistentObserver(observer_id);
        session.scope = Some(scope);

        Ok(Registration {
            observer_id,
            scope,
            displaced: None,
        })
    }

    pub fn stop_observing(&self, conn: ConnectionId) -> Result<ObserverId, IpcError> {
        let mut session = self.sessions.get_mut(&conn).ok_or(IpcError::NotConnected)?;
        let observer_id = session.role.observer_id().ok_or(IpcError::NotObserving)?;
        session.role = Role::Unregistered;
        session.scope = None;
        Ok(observer_id)
    }

    /// Queue a frame regardless of role (error replies)
    pub fn send(&self, conn: ConnectionId, text: String) -> bool {
        self.sessions
            .get(&conn)
            .map_or(false, |session| session.outbound.send(text).is_ok())
    }

    /// Queue an interaction event for the registration identified by `scope`.
    ///
    /// `terminal` marks select/cancel, which end a one-time scope.
    pub fn deliver(
        &self,
        conn: ConnectionId,
        scope: ScopeToken,
        text: String,
        terminal: bool,
    ) -> Delivery {
        let Some(mut session) = self.sessions.get_mut(&conn) else {
            return Delivery::Stale;
        };
        if session.scope != Some(scope) || session.outbound.send(text).is_err() {
            return Delivery::Stale;
        }

        if terminal && session.role == Role::OneTimeObserver {
            session.role = Role::Unregistered;
            session.scope = None;
            return Delivery::SentAndEnded(ONE_TIME_OBSERVER_ID);
        }
        Delivery::Sent
    }

    pub fn is_current(&self, conn: ConnectionId, scope: ScopeToken) -> bool {
        self.sessions
            .get(&conn)
            .map_or(false, |session| session.scope == Some(scope))
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(registry: &SessionRegistry) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.open(tx), rx)
    }

    #[test]
    fn test_new_connection_is_unregistered() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);
        assert_eq!(registry.role(conn), Some(Role::Unregistered));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_observer_ids_increase_and_are_never_reused() {
        let registry = SessionRegistry::new();
        let (a, _ra) = open(&registry);
        let (b, _rb) = open(&registry);

        assert_eq!(registry.start_observing(a).unwrap().observer_id, 1);
        assert_eq!(registry.start_observing(b).unwrap().observer_id, 2);

        assert_eq!(registry.close(a), Some(1));
        let (c, _rc) = open(&registry);
        assert_eq!(registry.start_observing(c).unwrap().observer_id, 3);

        registry.stop_observing(b).unwrap();
        assert_eq!(registry.start_observing(b).unwrap().observer_id, 4);
    }

    #[test]
    fn test_observer_ids_do_not_wrap() {
        let registry = SessionRegistry::starting_at(ObserverId::MAX - 1);
        let (a, _ra) = open(&registry);
        let (b, _rb) = open(&registry);

        assert_eq!(
            registry.start_observing(a).unwrap().observer_id,
            ObserverId::MAX - 1
        );
        assert!(matches!(
            registry.start_observing(b),
            Err(IpcError::ObserverIdsExhausted)
        ));
        assert_eq!(registry.role(b), Some(Role::Unregistered));
        assert_eq!(registry.peek_next_observer_id(), ObserverId::MAX);
    }

    #[test]
    fn test_already_observing_keeps_role() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);
        registry.start_observing(conn).unwrap();

        assert!(matches!(
            registry.start_observing(conn),
            Err(IpcError::AlreadyObserving)
        ));
        assert_eq!(registry.role(conn), Some(Role::PersistentObserver(1)));
        assert_eq!(registry.peek_next_observer_id(), 2);

        registry.begin_one_time(conn).unwrap();
        assert!(matches!(
            registry.start_observing(conn),
            Err(IpcError::AlreadyObserving)
        ));
    }

    #[test]
    fn test_not_observing_leaves_counter() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);

        assert!(matches!(
            registry.stop_observing(conn),
            Err(IpcError::NotObserving)
        ));
        assert_eq!(registry.peek_next_observer_id(), 1);
    }

    #[test]
    fn test_show_menu_displaces_persistent_registration() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);
        let persistent = registry.start_observing(conn).unwrap();

        let one_time = registry.begin_one_time(conn).unwrap();
        assert_eq!(one_time.observer_id, ONE_TIME_OBSERVER_ID);
        assert_eq!(one_time.displaced, Some(persistent.observer_id));
        assert_eq!(registry.role(conn), Some(Role::OneTimeObserver));
        assert!(!registry.is_current(conn, persistent.scope));
    }

    #[test]
    fn test_one_time_scope_ends_on_terminal_event() {
        let registry = SessionRegistry::new();
        let (conn, mut rx) = open(&registry);
        let reg = registry.begin_one_time(conn).unwrap();

        assert_eq!(registry.deliver(conn, reg.scope, "hover".into(), false), Delivery::Sent);
        assert_eq!(registry.deliver(conn, reg.scope, "hover".into(), false), Delivery::Sent);
        assert_eq!(
            registry.deliver(conn, reg.scope, "select".into(), true),
            Delivery::SentAndEnded(ONE_TIME_OBSERVER_ID)
        );
        assert_eq!(registry.role(conn), Some(Role::Unregistered));
        assert_eq!(registry.deliver(conn, reg.scope, "late".into(), false), Delivery::Stale);

        assert_eq!(rx.try_recv().unwrap(), "hover");
        assert_eq!(rx.try_recv().unwrap(), "hover");
        assert_eq!(rx.try_recv().unwrap(), "select");
        assert!(rx.try_recv().is_err());

        // Scope is clean for a new observation
        assert_eq!(registry.start_observing(conn).unwrap().observer_id, 1);
    }

    #[test]
    fn test_persistent_scope_survives_terminal_events() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);
        let reg = registry.start_observing(conn).unwrap();

        assert_eq!(registry.deliver(conn, reg.scope, "cancel".into(), true), Delivery::Sent);
        assert_eq!(registry.deliver(conn, reg.scope, "open".into(), false), Delivery::Sent);

        registry.stop_observing(conn).unwrap();
        assert_eq!(registry.deliver(conn, reg.scope, "open".into(), false), Delivery::Stale);
    }

    #[test]
    fn test_stale_scope_after_new_show_menu() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);
        let first = registry.begin_one_time(conn).unwrap();
        let second = registry.begin_one_time(conn).unwrap();

        assert_eq!(second.displaced, Some(ONE_TIME_OBSERVER_ID));
        assert_eq!(registry.deliver(conn, first.scope, "x".into(), true), Delivery::Stale);
        assert_eq!(registry.role(conn), Some(Role::OneTimeObserver));
    }

    #[test]
    fn test_close_unknown_and_unregistered() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = open(&registry);
        assert_eq!(registry.close(conn), None);
        assert_eq!(registry.close(conn), None);
        assert!(registry.is_empty());
        assert!(!registry.send(conn, "x".into()));
    }
}
