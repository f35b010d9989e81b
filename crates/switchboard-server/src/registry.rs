use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use switchboard_core::{ConnectionId, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Non-owning reference to a live connection: its id and outbound queue.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    /// Queue a text frame. Drops it if the queue is full or the connection is gone.
    pub fn try_send(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    msg_len = msg.len(),
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The per-session consumer task.
pub struct ConsumerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Signal the consumer to stop and return its task for joining.
    pub fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.task
    }
}

pub struct Session {
    pub id: SessionId,
    pub alias: String,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    connection: Option<ConnectionHandle>,
    consumer: Option<ConsumerHandle>,
}

impl Session {
    fn new(id: SessionId, alias: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            alias,
            created_at: now,
            last_access_at: now,
            connection: None,
            consumer: None,
        }
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    pub fn into_consumer(self) -> Option<ConsumerHandle> {
        self.consumer
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            alias: self.alias.clone(),
            created_at: self.created_at,
            last_access_at: self.last_access_at,
            connection_id: self.connection.as_ref().map(|c| c.id.clone()),
        }
    }
}

/// Read-only copy of a session record.
#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub alias: String,
    pub created_at: DateTime<Utc>,
    pub last_access_at: DateTime<Utc>,
    pub connection_id: Option<ConnectionId>,
}

/// Result of [`SessionRegistry::reserve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// The alias was already active; nothing was inserted.
    Existing(SessionId),
    /// A new record was inserted under the candidate id.
    Reserved(SessionId),
}

/// Result of [`SessionRegistry::bind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindOutcome {
    Bound,
    AlreadyBound,
    /// Last bind wins: the previous connection is replaced without notice.
    Replaced { previous: ConnectionId },
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<SessionId, Session>,
    by_alias: HashMap<String, SessionId>,
}

/// Active sessions, indexed by id and by alias.
///
/// Every read and mutation goes through one mutex, and the lock is never held
/// across an await point.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the active id for `alias`, or insert a new record under `candidate`.
    ///
    /// Check and insert happen under one lock, so concurrent sign-ins with the
    /// same alias agree on a single id. Id collisions with another alias are
    /// not detected.
    pub fn reserve(&self, alias: &str, candidate: SessionId) -> Reservation {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.by_alias.get(alias) {
            return Reservation::Existing(existing.clone());
        }
        let _ = inner.by_alias.insert(alias.to_string(), candidate.clone());
        let _ = inner
            .by_id
            .insert(candidate.clone(), Session::new(candidate.clone(), alias.to_string()));
        Reservation::Reserved(candidate)
    }

    /// Attach the consumer task to a reserved session. Hands the consumer back
    /// if the session was removed in the meantime.
    pub fn attach_consumer(
        &self,
        id: &SessionId,
        consumer: ConsumerHandle,
    ) -> Result<(), ConsumerHandle> {
        let mut inner = self.inner.lock();
        match inner.by_id.get_mut(id) {
            Some(session) => {
                session.consumer = Some(consumer);
                Ok(())
            }
            None => Err(consumer),
        }
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let session = inner.by_id.remove(id)?;
        if inner.by_alias.get(&session.alias) == Some(id) {
            let _ = inner.by_alias.remove(&session.alias);
        }
        Some(session)
    }

    /// Remove every session, e.g. at shutdown.
    pub fn drain(&self) -> Vec<Session> {
        let mut inner = self.inner.lock();
        inner.by_alias.clear();
        inner.by_id.drain().map(|(_, s)| s).collect()
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionInfo> {
        self.inner.lock().by_id.get(id).map(Session::info)
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<SessionInfo> {
        let inner = self.inner.lock();
        let id = inner.by_alias.get(alias)?;
        inner.by_id.get(id).map(Session::info)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().by_id.contains_key(id)
    }

    /// Bind `connection` to the session. `None` if the session does not exist.
    pub fn bind(&self, id: &SessionId, connection: &ConnectionHandle) -> Option<BindOutcome> {
        let mut inner = self.inner.lock();
        let session = inner.by_id.get_mut(id)?;
        let outcome = match session.connection.replace(connection.clone()) {
            None => BindOutcome::Bound,
            Some(prev) if prev.id == connection.id => BindOutcome::AlreadyBound,
            Some(prev) => BindOutcome::Replaced { previous: prev.id },
        };
        Some(outcome)
    }

    /// Clear the binding only if it still points at `connection_id`.
    pub fn unbind(&self, id: &SessionId, connection_id: &ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.get_mut(id) {
            Some(session)
                if session.connection.as_ref().map(|c| &c.id) == Some(connection_id) =>
            {
                session.connection = None;
                true
            }
            _ => false,
        }
    }

    /// Update `last_access_at`. Returns false for unknown sessions.
    pub fn touch(&self, id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.by_id.get_mut(id) {
            Some(session) => {
                session.last_access_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// The live connection bound to `id`, if any.
    pub fn connection(&self, id: &SessionId) -> Option<ConnectionHandle> {
        self.inner.lock().by_id.get(id)?.connection.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bound_count(&self) -> usize {
        self.inner
            .lock()
            .by_id
            .values()
            .filter(|s| s.connection.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(4);
        (ConnectionHandle::new(ConnectionId::new(), tx), rx)
    }

    #[test]
    fn reserve_is_idempotent_per_alias() {
        let registry = SessionRegistry::new();
        let first = registry.reserve("alice", SessionId::from_raw("a1"));
        let second = registry.reserve("alice", SessionId::from_raw("a2"));
        assert_eq!(first, Reservation::Reserved(SessionId::from_raw("a1")));
        assert_eq!(second, Reservation::Existing(SessionId::from_raw("a1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_by_id_and_alias() {
        let registry = SessionRegistry::new();
        let _ = registry.reserve("bob", SessionId::from_raw("b1"));

        let by_id = registry.get(&SessionId::from_raw("b1")).unwrap();
        assert_eq!(by_id.alias, "bob");
        assert_eq!(by_id.created_at, by_id.last_access_at);
        let by_alias = registry.find_by_alias("bob").unwrap();
        assert_eq!(by_alias.id.as_str(), "b1");
        assert!(registry.get(&SessionId::from_raw("nope")).is_none());
    }

    #[test]
    fn remove_frees_alias() {
        let registry = SessionRegistry::new();
        let id = SessionId::from_raw("c1");
        let _ = registry.reserve("carol", id.clone());
        assert!(registry.remove(&id).is_some());
        assert!(registry.find_by_alias("carol").is_none());
        assert!(registry.remove(&id).is_none());

        let again = registry.reserve("carol", SessionId::from_raw("c2"));
        assert_eq!(again, Reservation::Reserved(SessionId::from_raw("c2")));
    }

    #[test]
    fn bind_unknown_session_is_none() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = handle();
        assert!(registry.bind(&SessionId::from_raw("ghost"), &conn).is_none());
    }

    #[test]
    fn last_bind_wins() {
        let registry = SessionRegistry::new();
        let id = SessionId::from_raw("d1");
        let _ = registry.reserve("dave", id.clone());
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();

        assert_eq!(registry.bind(&id, &c1), Some(BindOutcome::Bound));
        assert_eq!(registry.bind(&id, &c1), Some(BindOutcome::AlreadyBound));
        assert_eq!(
            registry.bind(&id, &c2),
            Some(BindOutcome::Replaced {
                previous: c1.id.clone()
            })
        );
        assert_eq!(registry.connection(&id).unwrap().id, c2.id);
        assert_eq!(registry.get(&id).unwrap().connection_id, Some(c2.id));
    }

    #[test]
    fn unbind_only_clears_own_binding() {
        let registry = SessionRegistry::new();
        let id = SessionId::from_raw("e1");
        let _ = registry.reserve("erin", id.clone());
        let (c1, _rx1) = handle();
        let (c2, _rx2) = handle();

        let _ = registry.bind(&id, &c1);
        let _ = registry.bind(&id, &c2);
        assert!(!registry.unbind(&id, &c1.id));
        assert_eq!(registry.bound_count(), 1);
        assert!(registry.unbind(&id, &c2.id));
        assert!(registry.connection(&id).is_none());
        assert_eq!(registry.bound_count(), 0);
    }

    #[test]
    fn touch_updates_last_access() {
        let registry = SessionRegistry::new();
        let id = SessionId::from_raw("f1");
        let _ = registry.reserve("frank", id.clone());
        let before = registry.get(&id).unwrap().last_access_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(registry.touch(&id));
        assert!(registry.get(&id).unwrap().last_access_at > before);
        assert!(!registry.touch(&SessionId::from_raw("nope")));
    }

    #[test]
    fn connection_handle_send() {
        let (conn, mut rx) = handle();
        assert!(conn.try_send("hello".into()));
        assert_eq!(rx.try_recv().unwrap(), "hello");

        drop(rx);
        assert!(conn.is_closed());
        assert!(!conn.try_send("late".into()));
    }

    #[test]
    fn connection_handle_full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ConnectionHandle::new(ConnectionId::new(), tx);
        assert!(conn.try_send("1".into()));
        assert!(!conn.try_send("2".into()));
    }

    #[tokio::test]
    async fn attach_consumer_to_removed_session_hands_it_back() {
        let registry = SessionRegistry::new();
        let id = SessionId::from_raw("g1");
        let _ = registry.reserve("gina", id.clone());
        let _ = registry.remove(&id);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        let consumer = ConsumerHandle::new(cancel, task);

        let returned = registry.attach_consumer(&id, consumer).unwrap_err();
        returned.stop().await.unwrap();
    }

    #[test]
    fn concurrent_reserve_yields_single_session() {
        use std::sync::Arc;

        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.reserve("zed", SessionId::from_raw(format!("z{i}")))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let reserved = results
            .iter()
            .filter(|r| matches!(r, Reservation::Reserved(_)))
            .count();
        assert_eq!(reserved, 1);
        assert_eq!(registry.len(), 1);
    }
}
