//! Database engines, scoped sessions and the model initialisation contract.

pub mod balanced;
pub mod odm;

pub use balanced::{BalancedEngines, BalancedSession, ScopedSession};
pub use odm::{DataStore, OdmSession};

use crate::error::{AppError, ConfigError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A named database URL with a pool created on first use.
pub struct Engine {
    name: String,
    url: String,
    max_connections: u32,
    pool: OnceLock<PgPool>,
}

impl Engine {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Engine {
            name: name.into(),
            url: url.into(),
            max_connections: 10,
            pool: OnceLock::new(),
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connection pool; must be called from within a tokio runtime.
    pub fn pool(&self) -> Result<&PgPool, AppError> {
        if let Some(pool) = self.pool.get() {
            return Ok(pool);
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_lazy(&self.url)?;
        tracing::debug!(engine = %self.name, "created connection pool");
        Ok(self.pool.get_or_init(|| pool))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("name", &self.name).finish()
    }
}

/// What `init_model` receives once the engines exist.
#[derive(Clone, Debug)]
pub struct ModelBinding {
    pub engine: Arc<Engine>,
    pub balanced: Option<Arc<BalancedEngines>>,
    pub session: ScopedSession,
}

/// Application model hook, supplied as the `model` service.
pub trait Model: Send + Sync {
    fn init_model(&self, binding: &ModelBinding) -> Result<(), ConfigError>;
}

/// Model given as a plain function.
pub struct FnModel<F>(pub F);

impl<F> Model for FnModel<F>
where
    F: Fn(&ModelBinding) -> Result<(), ConfigError> + Send + Sync,
{
    fn init_model(&self, binding: &ModelBinding) -> Result<(), ConfigError> {
        (self.0)(binding)
    }
}
