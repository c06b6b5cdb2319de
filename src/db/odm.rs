//! Document-store connection settings and the unit-of-work session contract.

use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct DataStore {
    pub url: String,
    pub db: String,
    /// `ming.connection.*` options with the prefix stripped.
    pub options: Map<String, Value>,
}

impl DataStore {
    /// `ming.url` is required; the database defaults to the last path segment of the URL.
    pub fn from_conf(conf: &Conf) -> Result<Self, ConfigError> {
        let url = conf.require_str("ming.url")?.to_string();
        let db = match conf.get_str("ming.db").filter(|s| !s.is_empty()) {
            Some(db) => db.to_string(),
            None => url
                .rsplit('/')
                .next()
                .map(|s| s.split('?').next().unwrap_or(s))
                .filter(|s| !s.is_empty() && !s.contains(':'))
                .ok_or_else(|| ConfigError::Missing("ming.db".into()))?
                .to_string(),
        };
        Ok(DataStore {
            url,
            db,
            options: conf.prefixed("ming.connection."),
        })
    }
}

/// Object-document mapper session flushed at the end of every request.
pub trait OdmSession: Send + Sync {
    fn flush_all(&self) -> Result<(), AppError>;
    fn close_all(&self);
}
