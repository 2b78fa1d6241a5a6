//! Scoped sessions: the same session for every lookup within one unit of work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context::RoutingContext;
use crate::error::ShardError;
use crate::session::ShardSession;

/// Identifies one unit of work (request, task, thread).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// A fresh random key, e.g. one per incoming request.
    pub fn new() -> Self {
        ScopeKey(uuid::Uuid::new_v4().to_string())
    }

    /// Key of the calling thread, for thread-per-unit-of-work callers.
    pub fn current_thread() -> Self {
        ScopeKey(format!("{:?}", std::thread::current().id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScopeKey {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ScopeKey {
    fn from(s: &str) -> Self {
        ScopeKey(s.to_string())
    }
}

/// A session shared by every lookup in one scope. Not meant for concurrent use; the
/// mutex only serializes access.
pub type SharedSession = Arc<tokio::sync::Mutex<ShardSession>>;

pub struct ScopedSessions {
    ctx: Arc<RoutingContext>,
    sessions: Mutex<HashMap<ScopeKey, SharedSession>>,
}

impl ScopedSessions {
    pub fn new(ctx: Arc<RoutingContext>) -> Self {
        ScopedSessions {
            ctx,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ScopeKey, SharedSession>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The scope's session, created on first access.
    pub fn current(&self, key: &ScopeKey) -> SharedSession {
        self.lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(self.ctx.session())))
            .clone()
    }

    pub fn contains(&self, key: &ScopeKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// End the scope: close its session and forget it. The next `current` starts a new one.
    pub async fn remove(&self, key: &ScopeKey) -> Result<(), ShardError> {
        let session = self.lock().remove(key);
        match session {
            Some(session) => session.lock().await.close().await,
            None => Ok(()),
        }
    }
}
