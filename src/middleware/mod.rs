//! WSGI-level middlewares installed by the app-ready phase, outside the registry manager.

pub mod auth;
pub mod debugger;
pub mod error_reporter;
pub mod session_remover;
pub mod slowreqs;
pub mod static_files;

pub use auth::{AuthenticationMiddleware, RemoteUserAuthenticator};
pub use debugger::DebuggerMiddleware;
pub use error_reporter::{sinks_from_conf, EmailSink, ErrorReport, ErrorReporter, LogSink, MailTransport, ReportKind, ReportSink};
pub use session_remover::{DbSessionRemover, MingCloser};
pub use slowreqs::SlowReqsMiddleware;
pub use static_files::StaticsMiddleware;
