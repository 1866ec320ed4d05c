use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::Stream;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::transport::streamable_http_server::session::{
    local::LocalSessionManager, ServerSseMessage, SessionId, SessionManager,
};
use serde_json::Value;

/// Header carrying the MCP session id on streamable HTTP requests.
pub const SESSION_HEADER: &str = "mcp-session-id";

struct SessionState {
    values: HashMap<String, Value>,
    last_seen: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            last_seen: Instant::now(),
        }
    }
}

/// Per-session key/value state shared by every session of a session-mode
/// server. All operations are no-ops when no session id is known.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, session_id: Option<&str>, key: &str, value: Value) {
        let Some(id) = session_id else { return };
        if let Ok(mut sessions) = self.sessions.lock() {
            let state = sessions.entry(id.to_string()).or_insert_with(SessionState::new);
            state.last_seen = Instant::now();
            state.values.insert(key.to_string(), value);
        }
    }

    pub fn get(&self, session_id: Option<&str>, key: &str) -> Option<Value> {
        let id = session_id?;
        let mut sessions = self.sessions.lock().ok()?;
        let state = sessions.get_mut(id)?;
        state.last_seen = Instant::now();
        state.values.get(key).cloned()
    }

    /// Bump a counter and return its new value. Without a session the count
    /// is not remembered and is always 1.
    pub fn increment(&self, session_id: Option<&str>, key: &str) -> u64 {
        let Some(id) = session_id else { return 1 };
        let Ok(mut sessions) = self.sessions.lock() else {
            return 1;
        };
        let state = sessions.entry(id.to_string()).or_insert_with(SessionState::new);
        state.last_seen = Instant::now();
        let slot = state
            .values
            .entry(key.to_string())
            .or_insert(Value::from(0u64));
        let next = slot.as_u64().unwrap_or(0) + 1;
        *slot = Value::from(next);
        next
    }

    /// Drop everything held for a session.
    pub fn forget(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .map(|mut s| s.remove(session_id).is_some())
            .unwrap_or(false)
    }

    /// Drop sessions untouched for longer than `max_idle`. Returns how many
    /// were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let Ok(mut sessions) = self.sessions.lock() else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, state| state.last_seen.elapsed() <= max_idle);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Periodically evict idle sessions until the process exits.
pub async fn sweep_idle(store: Arc<SessionStore>, max_idle: Duration) {
    let period = (max_idle / 2).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let evicted = store.evict_idle(max_idle);
        if evicted > 0 {
            tracing::debug!("Evicted {} idle session(s)", evicted);
        }
    }
}

/// [`LocalSessionManager`] that also clears a session's [`SessionStore`]
/// entry when the transport closes it.
pub struct TrackedSessionManager {
    inner: LocalSessionManager,
    store: Arc<SessionStore>,
}

impl TrackedSessionManager {
    pub fn new(inner: LocalSessionManager, store: Arc<SessionStore>) -> Self {
        Self { inner, store }
    }
}

impl SessionManager for TrackedSessionManager {
    type Error = <LocalSessionManager as SessionManager>::Error;
    type Transport = <LocalSessionManager as SessionManager>::Transport;

    async fn create_session(&self) -> Result<(SessionId, Self::Transport), Self::Error> {
        self.inner.create_session().await
    }

    async fn initialize_session(
        &self,
        id: &SessionId,
        message: ClientJsonRpcMessage,
    ) -> Result<ServerJsonRpcMessage, Self::Error> {
        self.inner.initialize_session(id, message).await
    }

    async fn has_session(&self, id: &SessionId) -> Result<bool, Self::Error> {
        self.inner.has_session(id).await
    }

    async fn close_session(&self, id: &SessionId) -> Result<(), Self::Error> {
        if self.store.forget(id) {
            tracing::debug!(session = %id, "Dropped session state");
        }
        self.inner.close_session(id).await
    }

    async fn create_stream(
        &self,
        id: &SessionId,
        message: ClientJsonRpcMessage,
    ) -> Result<impl Stream<Item = ServerSseMessage> + Send + Sync + 'static, Self::Error> {
        self.inner.create_stream(id, message).await
    }

    async fn accept_message(
        &self,
        id: &SessionId,
        message: ClientJsonRpcMessage,
    ) -> Result<(), Self::Error> {
        self.inner.accept_message(id, message).await
    }

    async fn create_standalone_stream(
        &self,
        id: &SessionId,
    ) -> Result<impl Stream<Item = ServerSseMessage> + Send + Sync + 'static, Self::Error> {
        self.inner.create_standalone_stream(id).await
    }

    async fn resume(
        &self,
        id: &SessionId,
        last_event_id: String,
    ) -> Result<impl Stream<Item = ServerSseMessage> + Send + Sync + 'static, Self::Error> {
        self.inner.resume(id, last_event_id).await
    }
}
