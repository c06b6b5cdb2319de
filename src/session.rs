//! Lazily loaded, cookie-identified server-side sessions.

use crate::config::Conf;
use crate::error::ConfigError;
use crate::http::SetCookie;
use crate::signing;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub type SessionData = Map<String, Value>;

pub trait SessionStore: Send + Sync {
    fn load(&self, id: &str) -> Option<SessionData>;
    fn save(&self, id: &str, data: &SessionData);
    fn delete(&self, id: &str);
}

/// Idle lifetime of a stored session when `session.timeout` is not set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Stored {
    data: SessionData,
    expires_at: Instant,
}

struct Sessions {
    entries: HashMap<String, Stored>,
    next_sweep: Instant,
}

/// Process-wide in-memory store. Sessions expire after `timeout` without a load or save.
pub struct MemorySessionStore {
    sessions: Mutex<Sessions>,
    timeout: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        MemorySessionStore {
            sessions: Mutex::new(Sessions {
                entries: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL.min(timeout),
            }),
            timeout,
        }
    }

    /// Store with the idle timeout from `session.timeout` (seconds).
    pub fn from_conf(conf: &Conf) -> Result<Self, ConfigError> {
        if !conf.is_set("session.timeout") {
            return Ok(Self::new());
        }
        let seconds = conf.int_or("session.timeout", 0)?;
        match u64::try_from(seconds) {
            Ok(secs) if secs > 0 => Ok(Self::with_timeout(Duration::from_secs(secs))),
            _ => Err(ConfigError::Validation(format!(
                "session.timeout must be a positive number of seconds, got {seconds}"
            ))),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Live sessions.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.sessions.lock().entries.values().filter(|s| now < s.expires_at).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired session now.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.entries.len();
        sessions.entries.retain(|_, s| now < s.expires_at);
        sessions.next_sweep = now + SWEEP_INTERVAL.min(self.timeout);
        before - sessions.entries.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Option<SessionData> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        match sessions.entries.get_mut(id) {
            Some(stored) if now < stored.expires_at => {
                stored.expires_at = now + self.timeout;
                Some(stored.data.clone())
            }
            Some(_) => {
                sessions.entries.remove(id);
                None
            }
            None => None,
        }
    }

    fn save(&self, id: &str, data: &SessionData) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        if now >= sessions.next_sweep {
            let before = sessions.entries.len();
            sessions.entries.retain(|_, s| now < s.expires_at);
            sessions.next_sweep = now + SWEEP_INTERVAL.min(self.timeout);
            tracing::trace!(expired = before - sessions.entries.len(), "swept sessions");
        }
        sessions.entries.insert(
            id.to_string(),
            Stored {
                data: data.clone(),
                expires_at: now + self.timeout,
            },
        );
    }

    fn delete(&self, id: &str) {
        self.sessions.lock().entries.remove(id);
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore")
            .field("timeout", &self.timeout)
            .field("stored", &self.sessions.lock().entries.len())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub key: String,
    pub secret: String,
    pub cookie_path: String,
    pub cookie_domain: Option<String>,
    /// Seconds; `None` gives a browser-session cookie.
    pub cookie_expires: Option<i64>,
    pub httponly: bool,
    pub secure: bool,
}

impl SessionOptions {
    pub fn from_conf(conf: &Conf) -> Result<Self, ConfigError> {
        let cookie_expires = match conf.get("session.cookie_expires") {
            None | Some(Value::Null) | Some(Value::Bool(true)) => None,
            Some(_) => {
                let seconds = conf.int_or("session.cookie_expires", 0)?;
                (seconds > 0).then_some(seconds)
            }
        };
        Ok(SessionOptions {
            key: conf.str_or("session.key", "beaker.session.id"),
            secret: conf.require_str("session.secret")?.to_string(),
            cookie_path: conf.str_or("session.cookie_path", "/"),
            cookie_domain: conf.get_str("session.cookie_domain").map(str::to_string),
            cookie_expires,
            httponly: conf.bool_or("session.httponly", true)?,
            secure: conf.bool_or("session.secure", false)?,
        })
    }
}

#[derive(Debug)]
struct SessionState {
    id: String,
    is_new: bool,
    data: Option<SessionData>,
    accessed: bool,
    dirty: bool,
    invalidated: bool,
}

/// One client's session. Data is loaded from the store on first access.
pub struct Session {
    store: Arc<dyn SessionStore>,
    options: Arc<SessionOptions>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Session named by a signed cookie value, or a new one when the cookie is missing or forged.
    pub fn from_cookie(cookie: Option<&str>, store: Arc<dyn SessionStore>, options: Arc<SessionOptions>) -> Self {
        let existing = cookie.and_then(|c| signing::unsign(&options.secret, c)).map(str::to_string);
        let (id, is_new) = match existing {
            Some(id) => (id, false),
            None => (Uuid::new_v4().simple().to_string(), true),
        };
        Session {
            store,
            options,
            state: Mutex::new(SessionState {
                id,
                is_new,
                data: None,
                accessed: false,
                dirty: false,
                invalidated: false,
            }),
        }
    }

    pub fn id(&self) -> String {
        self.state.lock().id.clone()
    }

    pub fn is_new(&self) -> bool {
        self.state.lock().is_new
    }

    pub fn accessed(&self) -> bool {
        self.state.lock().accessed
    }

    fn with_data<R>(&self, mark_dirty: bool, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut state = self.state.lock();
        if state.data.is_none() {
            let loaded = if state.is_new { None } else { self.store.load(&state.id) };
            if loaded.is_none() && !state.is_new {
                // expired or unknown on this server
                state.is_new = true;
            }
            state.data = Some(loaded.unwrap_or_default());
        }
        state.accessed = true;
        state.dirty |= mark_dirty;
        let data = state.data.get_or_insert_with(SessionData::new);
        f(data)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_data(false, |data| data.get(key).cloned())
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Read without marking the session accessed.
    pub fn peek(&self, key: &str) -> Option<Value> {
        let state = self.state.lock();
        match &state.data {
            Some(data) => data.get(key).cloned(),
            None if state.is_new => None,
            None => self.store.load(&state.id).and_then(|data| data.get(key).cloned()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.with_data(false, |data| data.contains_key(key))
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with_data(true, move |data| {
            data.insert(key, value);
        });
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.with_data(true, |data| data.remove(key))
    }

    pub fn keys(&self) -> Vec<String> {
        self.with_data(false, |data| data.keys().cloned().collect())
    }

    /// Mark the session for saving even if nothing was written.
    pub fn save(&self) {
        self.with_data(true, |_| ());
    }

    /// Drop the stored data and forget the cookie.
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.invalidated = true;
        state.accessed = true;
        state.data = Some(SessionData::new());
    }

    /// Write an accessed session back to its store; returns the cookie to send.
    pub fn persist(&self) -> Option<SetCookie> {
        let mut state = self.state.lock();
        if !state.accessed {
            return None;
        }
        if state.invalidated {
            self.store.delete(&state.id);
            return Some(SetCookie::removal(self.options.key.clone(), self.options.cookie_path.clone()));
        }
        if let Some(data) = &state.data {
            self.store.save(&state.id, data);
        }
        state.is_new = false;
        state.dirty = false;

        let mut cookie = SetCookie::new(self.options.key.clone(), signing::sign(&self.options.secret, &state.id));
        cookie.path = self.options.cookie_path.clone();
        cookie.domain = self.options.cookie_domain.clone();
        cookie.http_only = self.options.httponly;
        cookie.secure = self.options.secure;
        if let Some(seconds) = self.options.cookie_expires {
            cookie = cookie.expires_in(seconds);
        }
        Some(cookie)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Session")
            .field("id", &state.id)
            .field("is_new", &state.is_new)
            .field("accessed", &state.accessed)
            .finish()
    }
}
