//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Raised eagerly while a configuration is being built. Always fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(String),
    #[error("option {key}: cannot coerce {value}: {reason}")]
    Coercion {
        key: String,
        value: String,
        reason: String,
    },
    #[error("unknown renderer: {0}")]
    UnknownRenderer(String),
    #[error("step {step}: {message}")]
    Step { step: String, message: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Step {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Raised by `register()` style operations on ordered containers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("'{key}' declared after unknown key '{anchor}'")]
    UnknownAnchor { key: String, anchor: String },
    #[error("nothing registered under '{0}'")]
    UnknownKey(String),
}

/// Registry imbalance. Indicates a programming error, never a user error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no object (name: {0}) has been registered for this thread")]
    NoObject(&'static str),
    #[error("cannot pop from the empty stack of {0}")]
    EmptyStack(&'static str),
    #[error("popped object of {0} is not the one on top of the stack")]
    Mismatch(&'static str),
    #[error("registry has no active scope")]
    NoScope,
}

/// Request-time errors. An `Err` escaping a `WsgiApp` is an exception reaching the server.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{status}: {message}")]
    Http { status: StatusCode, message: String },
    #[error("controller lookup: {0}")]
    ControllerLookup(String),
    #[error("render: {0}")]
    Render(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("transaction: {0}")]
    Transaction(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Controller(String),
}

impl AppError {
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        AppError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::http(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::http(StatusCode::FORBIDDEN, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(StatusCode::BAD_REQUEST, message)
    }

    /// Status this error maps to when it ends up as a response.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Http { status, .. } => *status,
            AppError::Db(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::Registration(_) => "registration_error",
            AppError::Registry(_) => "registry_error",
            AppError::Http { .. } => "http_error",
            AppError::ControllerLookup(_) => "controller_lookup_error",
            AppError::Render(_) => "render_error",
            AppError::Transient(_) => "transient_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::Db(_) => "database_error",
            AppError::Io(_) => "io_error",
            AppError::Controller(_) => "controller_error",
        }
    }

    /// Human readable error chain, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut out = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            if out.last() != Some(&text) {
                out.push(text);
            }
            source = err.source();
        }
        out
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub fn error_body(code: &str, message: String, details: Option<serde_json::Value>) -> ErrorBody {
    ErrorBody {
        error: ErrorDetail {
            code: code.to_string(),
            message,
            details,
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = error_body(self.code(), self.to_string(), None);
        (status, Json(body)).into_response()
    }
}
