//! Ephemeral per-session state with single-writer access and idle expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::model::ServiceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AwaitingUsername,
    AwaitingPassword,
    AwaitingName,
    AwaitingPhone,
    AwaitingPaymentMethod,
}

/// Draft collected so far.
#[derive(Clone)]
pub struct Session {
    pub step: Step,
    pub kind: Option<ServiceKind>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub(crate) last_activity: Instant,
}

impl Session {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            step: Step::AwaitingUsername,
            kind: Some(kind),
            username: None,
            password: None,
            customer_name: None,
            customer_phone: None,
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("step", &self.step)
            .field("kind", &self.kind)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

type Slot = Arc<AsyncMutex<Option<Session>>>;

/// Exclusive access to one session slot for the duration of one input.
pub struct SessionGuard {
    slot: OwnedMutexGuard<Option<Session>>,
    ttl: Duration,
}

impl SessionGuard {
    /// The live session, if any. Sessions idle past the TTL are dropped here.
    pub fn current(&mut self) -> Option<&mut Session> {
        if self.slot.as_ref().is_some_and(|s| s.is_expired(self.ttl)) {
            *self.slot = None;
        }
        self.slot.as_mut()
    }

    pub fn replace(&mut self, session: Session) {
        *self.slot = Some(session);
    }

    pub fn clear(&mut self) {
        *self.slot = None;
    }
}

pub struct SessionStore {
    slots: Mutex<HashMap<String, Slot>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
                .clone()
        };
        SessionGuard {
            slot: slot.lock_owned().await,
            ttl: self.ttl,
        }
    }

    /// Drop empty and idle slots nobody is waiting on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        let ttl = self.ttl;
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(session) => session.as_ref().is_some_and(|s| !s.is_expired(ttl)),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_sessions_read_as_absent() {
        let store = SessionStore::new(Duration::from_millis(1));
        {
            let mut guard = store.acquire("s1").await;
            guard.replace(Session::new(ServiceKind::Vless));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut guard = store.acquire("s1").await;
        assert!(guard.current().is_none());
    }

    #[tokio::test]
    async fn cleared_session_reads_as_absent() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut guard = store.acquire("s1").await;
        assert!(guard.current().is_none());

        guard.replace(Session::new(ServiceKind::Trojan));
        assert_eq!(
            guard.current().map(|s| s.step),
            Some(Step::AwaitingUsername)
        );

        guard.clear();
        assert!(guard.current().is_none());
    }

    #[tokio::test]
    async fn prune_keeps_live_sessions_only() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.acquire("empty").await;
        store
            .acquire("live")
            .await
            .replace(Session::new(ServiceKind::Ssh));

        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn debug_hides_password() {
        let mut session = Session::new(ServiceKind::Ssh);
        session.password = Some("hunter2".to_string());
        assert!(!format!("{session:?}").contains("hunter2"));
    }
}
