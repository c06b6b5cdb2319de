//! Built-in configuration steps, in the order `Configurator::full` registers them.

pub mod app_globals;
pub mod app_wrappers;
pub mod auth;
pub mod dispatch;
pub mod mimetypes;
pub mod ming;
pub mod paths;
pub mod registry;
pub mod rendering;
pub mod reporting;
pub mod sqlalchemy;
pub mod static_files;

pub use app_globals::{AppGlobalsStep, HelpersStep};
pub use app_wrappers::{CacheStep, ErrorPageStep, I18nStep, IdentityStep, SessionStep, TransactionStep};
pub use auth::AuthStep;
pub use dispatch::DispatchStep;
pub use mimetypes::MimeTypesStep;
pub use ming::MingStep;
pub use paths::PathsStep;
pub use registry::RegistryStep;
pub use rendering::RenderingStep;
pub use reporting::{DebuggerStep, ErrorReportingStep, SlowRequestsStep};
pub use sqlalchemy::SqlAlchemyStep;
pub use static_files::StaticFilesStep;
