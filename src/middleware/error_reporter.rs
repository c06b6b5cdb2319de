//! Reports of escaping errors and slow requests, and the sinks they are handed to.

use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::wsgi::dispatch::error_html;
use crate::wsgi::{BoxedApp, Environ, WsgiApp, WsgiResponse};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Environ entries copied into reports. Headers are never copied.
const REPORTED_VARS: &[&str] = &[
    "REQUEST_METHOD",
    "SCRIPT_NAME",
    "PATH_INFO",
    "QUERY_STRING",
    "SERVER_NAME",
    "SERVER_PORT",
    "REMOTE_ADDR",
    "wsgi.url_scheme",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Error,
    SlowRequest,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorReport {
    pub id: Uuid,
    pub kind: ReportKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Outermost first.
    pub chain: Vec<String>,
    pub request_line: String,
    pub environ: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
}

impl ErrorReport {
    fn base(kind: ReportKind, message: String, environ: &Environ) -> Self {
        let mut url = format!("{}{}", environ.script_name, environ.path_info);
        if !environ.query_string.is_empty() {
            url.push('?');
            url.push_str(&environ.query_string);
        }
        ErrorReport {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            message,
            chain: Vec::new(),
            request_line: format!("{} {}", environ.method, url),
            environ: environ_summary(environ),
            duration_ms: None,
        }
    }

    pub fn error(err: &AppError, environ: &Environ) -> Self {
        let mut report = Self::base(ReportKind::Error, err.to_string(), environ);
        report.chain = err.chain();
        report
    }

    pub fn slow_request(elapsed: Duration, environ: &Environ) -> Self {
        let message = format!("request took {:.3}s", elapsed.as_secs_f64());
        let mut report = Self::base(ReportKind::SlowRequest, message, environ);
        report.duration_ms = Some(elapsed.as_millis());
        report
    }

    pub fn subject(&self) -> String {
        match self.kind {
            ReportKind::Error => self.message.clone(),
            ReportKind::SlowRequest => format!("Slow request: {}", self.request_line),
        }
    }

    /// Plain-text form used by mail sinks.
    pub fn to_text(&self) -> String {
        let mut out = format!("{}\n{}\n\n", self.request_line, self.message);
        for (depth, cause) in self.chain.iter().enumerate().skip(1) {
            out.push_str(&format!("{:indent$}caused by: {cause}\n", "", indent = depth * 2));
        }
        out.push_str(&format!("\nreport {} at {}\n", self.id, self.timestamp.to_rfc3339()));
        for (k, v) in &self.environ {
            out.push_str(&format!("{k} = {v}\n"));
        }
        out
    }
}

pub(crate) fn environ_summary(environ: &Environ) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for key in REPORTED_VARS {
        let value = match *key {
            "REQUEST_METHOD" => environ.method.to_string(),
            "SCRIPT_NAME" => environ.script_name.clone(),
            "PATH_INFO" => environ.path_info.clone(),
            "QUERY_STRING" => environ.query_string.clone(),
            "SERVER_NAME" => environ.server_name.clone(),
            "SERVER_PORT" => environ.server_port.to_string(),
            "REMOTE_ADDR" => environ.remote_addr.clone().unwrap_or_default(),
            "wsgi.url_scheme" => environ.url_scheme.clone(),
            _ => continue,
        };
        out.insert(key.to_string(), value);
    }
    out
}

pub trait ReportSink: Send + Sync {
    fn report(&self, report: &ErrorReport) -> Result<(), AppError>;
}

/// Always installed: writes reports through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, report: &ErrorReport) -> Result<(), AppError> {
        let details = serde_json::to_string(report).map_err(|e| AppError::Controller(e.to_string()))?;
        match report.kind {
            ReportKind::Error => tracing::error!(report = %report.id, %details, "{}", report.message),
            ReportKind::SlowRequest => tracing::warn!(report = %report.id, %details, "{}", report.message),
        }
        Ok(())
    }
}

/// Delivers mail; supplied by the application as the `mail_transport` service.
pub trait MailTransport: Send + Sync {
    fn send(&self, from: &str, to: &[String], subject: &str, body: &str) -> Result<(), AppError>;
}

pub struct EmailSink {
    transport: Arc<dyn MailTransport>,
    from: String,
    to: Vec<String>,
    subject_prefix: String,
}

impl EmailSink {
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>, to: Vec<String>, subject_prefix: impl Into<String>) -> Self {
        EmailSink {
            transport,
            from: from.into(),
            to,
            subject_prefix: subject_prefix.into(),
        }
    }
}

impl ReportSink for EmailSink {
    fn report(&self, report: &ErrorReport) -> Result<(), AppError> {
        let subject = format!("{}{}", self.subject_prefix, report.subject());
        self.transport.send(&self.from, &self.to, &subject, &report.to_text())
    }
}

/// Sinks configured under `prefix` (`trace_errors` or `trace_slowreqs`).
///
/// A mail sink is added when `<prefix>.error_email` lists recipients and a
/// `mail_transport` service exists; the `trace_errors` addresses serve as fallback.
pub fn sinks_from_conf(conf: &Conf, prefix: &str) -> Result<Vec<Arc<dyn ReportSink>>, ConfigError> {
    let mut sinks: Vec<Arc<dyn ReportSink>> = vec![Arc::new(LogSink)];
    let key = |name: &str| format!("{prefix}.{name}");
    let mut recipients = conf.list(&key("error_email"))?;
    if recipients.is_empty() {
        recipients = conf.list("trace_errors.error_email")?;
    }
    if recipients.is_empty() {
        return Ok(sinks);
    }
    let Some(transport) = conf.service::<Arc<dyn MailTransport>>("mail_transport") else {
        tracing::warn!(prefix, "error_email set without a mail_transport service, reports are only logged");
        return Ok(sinks);
    };
    let from = conf
        .get_str(&key("from_address"))
        .or_else(|| conf.get_str("trace_errors.from_address"))
        .unwrap_or("turbine@localhost")
        .to_string();
    let subject_prefix = conf
        .get_str(&key("error_subject_prefix"))
        .unwrap_or("WebApp Error: ")
        .to_string();
    sinks.push(Arc::new(EmailSink::new(transport, from, recipients, subject_prefix)));
    Ok(sinks)
}

pub(crate) fn dispatch_report(sinks: &[Arc<dyn ReportSink>], report: &ErrorReport) {
    for sink in sinks {
        if let Err(e) = sink.report(report) {
            tracing::error!(report = %report.id, error = %e, "report sink failed");
        }
    }
}

/// Turns escaping errors into a 500 page after reporting them.
///
/// HTTP errors below 500 are answered with their own status and not reported.
pub struct ErrorReporter {
    app: BoxedApp,
    sinks: Vec<Arc<dyn ReportSink>>,
    error_message: String,
}

impl ErrorReporter {
    pub fn new(app: BoxedApp, sinks: Vec<Arc<dyn ReportSink>>, error_message: impl Into<String>) -> Self {
        ErrorReporter {
            app,
            sinks,
            error_message: error_message.into(),
        }
    }
}

impl WsgiApp for ErrorReporter {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        let err = match self.app.call(environ) {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        let status = err.status();
        if status.is_client_error() {
            return Ok(WsgiResponse::text(status, "text/html; charset=utf-8", error_html(status, &err.to_string())));
        }
        let report = ErrorReport::error(&err, environ);
        dispatch_report(&self.sinks, &report);
        Ok(WsgiResponse::text(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/html; charset=utf-8",
            error_html(StatusCode::INTERNAL_SERVER_ERROR, &self.error_message),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Collecting;
    use super::*;
    use parking_lot::Mutex;

    fn failing(err: fn() -> AppError) -> BoxedApp {
        Arc::new(move |_: &mut Environ| -> Result<WsgiResponse, AppError> { Err(err()) })
    }

    #[test]
    fn errors_are_reported_and_answered_with_500() {
        let sink = Arc::new(Collecting::default());
        let sinks: Vec<Arc<dyn ReportSink>> = vec![sink.clone()];
        let reporter = ErrorReporter::new(
            failing(|| AppError::Controller("boom".into())),
            sinks,
            "We're sorry but we weren't able to process this request.",
        );
        let response = reporter.call(&mut Environ::get("/orders?id=3")).unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.collect().unwrap().text();
        assert!(body.contains("weren&#x27;t able"));
        assert!(!body.contains("boom"));

        let reports = sink.0.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].request_line, "GET /orders?id=3");
        assert_eq!(reports[0].chain, vec!["boom"]);
        assert_eq!(reports[0].environ["PATH_INFO"], "/orders");
    }

    #[test]
    fn client_errors_keep_their_status() {
        let sink = Arc::new(Collecting::default());
        let sinks: Vec<Arc<dyn ReportSink>> = vec![sink.clone()];
        let reporter = ErrorReporter::new(failing(|| AppError::forbidden("no")), sinks, "x");
        assert_eq!(reporter.call(&mut Environ::get("/")).unwrap().status, StatusCode::FORBIDDEN);
        assert!(sink.0.lock().is_empty());
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<(String, Vec<String>, String)>>);

    impl MailTransport for Outbox {
        fn send(&self, from: &str, to: &[String], subject: &str, _body: &str) -> Result<(), AppError> {
            self.0.lock().push((from.to_string(), to.to_vec(), subject.to_string()));
            Ok(())
        }
    }

    #[test]
    fn mail_sink_needs_recipients_and_transport() {
        let mut conf = Conf::new();
        assert_eq!(sinks_from_conf(&conf, "trace_errors").unwrap().len(), 1);
        conf.set("trace_errors.error_email", "ops@example.com");
        assert_eq!(sinks_from_conf(&conf, "trace_errors").unwrap().len(), 1);

        let outbox = Arc::new(Outbox::default());
        let transport: Arc<dyn MailTransport> = outbox.clone();
        conf.set_service("mail_transport", transport);
        let sinks = sinks_from_conf(&conf, "trace_errors").unwrap();
        assert_eq!(sinks.len(), 2);

        let report = ErrorReport::error(&AppError::Controller("boom".into()), &Environ::get("/"));
        dispatch_report(&sinks, &report);
        let sent = outbox.0.lock();
        assert_eq!(sent[0].0, "turbine@localhost");
        assert_eq!(sent[0].1, vec!["ops@example.com"]);
        assert_eq!(sent[0].2, "WebApp Error: boom");
    }
}
