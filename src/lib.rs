//! Turbine: configuration-driven web application composition.
//!
//! A [`Configurator`] turns a blueprint and deployment options into a synchronous
//! [`WsgiApp`]: the dispatch core wrapped by application wrappers, the request-local
//! registry manager and outer middlewares. [`serve::router`] mounts it on axum.

pub mod cache;
pub mod case;
pub mod config;
pub mod configurator;
pub mod db;
pub mod deps;
pub mod error;
pub mod globals;
pub mod http;
pub mod i18n;
pub mod identity;
pub mod logging;
pub mod middleware;
pub mod mime;
pub mod registry;
pub mod render;
pub mod serve;
pub mod session;
pub mod signing;
pub mod steps;
pub mod transaction;
pub mod wrappers;
pub mod wsgi;

pub use config::{Coercion, Conf, DeploymentConfig};
pub use configurator::{ActionStep, AppEvent, ConfigEvent, ConfigurationStep, Configurator, RequestEvent};
pub use deps::{After, DependencyList};
pub use error::{AppError, ConfigError, RegistrationError, RegistryError};
pub use registry::{locals, RegistryManager, StackedObjectProxy};
pub use serve::router;
pub use wrappers::{ApplicationWrapper, RequestHandler};
pub use wsgi::{BoxedApp, Controller, ControllerFactory, Environ, ObjectController, Output, WsgiApp, WsgiResponse};
