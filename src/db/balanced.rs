//! Master/slave engine routing and thread-scoped sessions.

use super::Engine;
use crate::error::{AppError, ConfigError};
use crate::registry::locals;
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

#[derive(Debug)]
pub struct BalancedEngines {
    pub master: Arc<Engine>,
    pub slaves: BTreeMap<String, Arc<Engine>>,
    /// Master and slaves by name.
    pub all: BTreeMap<String, Arc<Engine>>,
}

impl BalancedEngines {
    pub fn new(master: Arc<Engine>, slaves: Vec<Arc<Engine>>) -> Result<Self, ConfigError> {
        let mut all = BTreeMap::new();
        all.insert("master".to_string(), master.clone());
        let mut by_name = BTreeMap::new();
        for slave in slaves {
            if slave.name() == "master" {
                return Err(ConfigError::Validation(
                    "a slave engine cannot be named 'master'".into(),
                ));
            }
            all.insert(slave.name().to_string(), slave.clone());
            by_name.insert(slave.name().to_string(), slave);
        }
        Ok(BalancedEngines {
            master,
            slaves: by_name,
            all,
        })
    }

    /// Only a master: every bind resolves to it.
    pub fn single(engine: Arc<Engine>) -> Self {
        let mut all = BTreeMap::new();
        all.insert(engine.name().to_string(), engine.clone());
        BalancedEngines {
            master: engine,
            slaves: BTreeMap::new(),
            all,
        }
    }
}

/// Session that reads from a random slave and writes to the master.
#[derive(Debug)]
pub struct BalancedSession {
    engines: Arc<BalancedEngines>,
    forced: Option<String>,
    flushing: bool,
}

impl BalancedSession {
    pub fn new(engines: Arc<BalancedEngines>) -> Self {
        BalancedSession {
            engines,
            forced: None,
            flushing: false,
        }
    }

    /// Master when forced, flushing or outside a request; otherwise a random slave.
    pub fn get_bind(&self) -> Arc<Engine> {
        if let Some(engine) = self.forced.as_ref().and_then(|name| self.engines.all.get(name)) {
            return engine.clone();
        }
        if self.flushing || !locals::in_request() {
            return self.engines.master.clone();
        }
        self.engines
            .slaves
            .values()
            .choose(&mut rand::rng())
            .unwrap_or(&self.engines.master)
            .clone()
    }

    /// Route every following statement to the engine called `name` (`None` resets).
    pub fn using_engine(&mut self, name: Option<&str>) -> Result<(), AppError> {
        match name {
            Some(name) if !self.engines.all.contains_key(name) => {
                Err(AppError::Config(ConfigError::Missing(format!("engine {name}"))))
            }
            other => {
                self.forced = other.map(str::to_string);
                Ok(())
            }
        }
    }

    /// Flushing always writes to the master; returns the engine used.
    pub fn flush(&mut self) -> Arc<Engine> {
        self.flushing = true;
        let engine = self.get_bind();
        self.flushing = false;
        tracing::debug!(engine = engine.name(), "flush");
        engine
    }
}

/// One session per thread, created on first use and dropped by `remove`.
#[derive(Clone)]
pub struct ScopedSession {
    engines: Arc<BalancedEngines>,
    sessions: Arc<Mutex<HashMap<ThreadId, Arc<Mutex<BalancedSession>>>>>,
}

impl ScopedSession {
    pub fn new(engines: Arc<BalancedEngines>) -> Self {
        ScopedSession {
            engines,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn engines(&self) -> &Arc<BalancedEngines> {
        &self.engines
    }

    pub fn current(&self) -> Arc<Mutex<BalancedSession>> {
        self.sessions
            .lock()
            .entry(std::thread::current().id())
            .or_insert_with(|| Arc::new(Mutex::new(BalancedSession::new(self.engines.clone()))))
            .clone()
    }

    pub fn has_session(&self) -> bool {
        self.sessions.lock().contains_key(&std::thread::current().id())
    }

    /// Discard the session of the calling thread.
    pub fn remove(&self) {
        self.sessions.lock().remove(&std::thread::current().id());
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSession")
            .field("engines", &self.engines.all.keys().collect::<Vec<_>>())
            .field("active", &self.active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Arc<BalancedEngines> {
        let master = Arc::new(Engine::new("master", "postgres://m"));
        let slave = Arc::new(Engine::new("s1", "postgres://s1"));
        Arc::new(BalancedEngines::new(master, vec![slave]).unwrap())
    }

    #[test]
    fn slave_named_master_is_rejected() {
        let master = Arc::new(Engine::new("master", "postgres://m"));
        let bad = Arc::new(Engine::new("master", "postgres://x"));
        assert!(BalancedEngines::new(master, vec![bad]).is_err());
    }

    #[test]
    fn outside_a_request_binds_to_master() {
        let session = BalancedSession::new(engines());
        assert_eq!(session.get_bind().name(), "master");
    }

    #[test]
    fn forcing_an_engine_wins() {
        let mut session = BalancedSession::new(engines());
        session.using_engine(Some("s1")).unwrap();
        assert_eq!(session.get_bind().name(), "s1");
        assert!(session.using_engine(Some("nope")).is_err());
        session.using_engine(None).unwrap();
        assert_eq!(session.flush().name(), "master");
    }

    #[test]
    fn scoped_sessions_are_per_thread() {
        let scoped = ScopedSession::new(engines());
        let a = scoped.current();
        assert!(Arc::ptr_eq(&a, &scoped.current()));
        let other = scoped.clone();
        std::thread::spawn(move || {
            other.current();
        })
        .join()
        .unwrap();
        assert_eq!(scoped.active(), 2);
        scoped.remove();
        assert!(!scoped.has_session());
        assert_eq!(scoped.active(), 1);
    }
}
