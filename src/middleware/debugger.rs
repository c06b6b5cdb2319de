use super::error_reporter::{environ_summary, ErrorReport};
use crate::error::AppError;
use crate::wsgi::dispatch::html_escape;
use crate::wsgi::{BoxedApp, Environ, WsgiApp, WsgiResponse};
use axum::http::StatusCode;
use std::fmt::Write;

/// Debug-mode error page: the error chain and an environ dump.
pub struct DebuggerMiddleware {
    app: BoxedApp,
}

impl DebuggerMiddleware {
    pub fn new(app: BoxedApp) -> Self {
        DebuggerMiddleware { app }
    }
}

fn render_page(report: &ErrorReport, environ: &Environ) -> String {
    let mut page = String::from("<html><head><title>Server Error</title></head><body>");
    let _ = write!(page, "<h1>{}</h1>", html_escape(&report.message));
    let _ = write!(page, "<p><code>{}</code> report {}</p>", html_escape(&report.request_line), report.id);

    page.push_str("<h2>Error chain</h2><ol>");
    for cause in &report.chain {
        let _ = write!(page, "<li>{}</li>", html_escape(cause));
    }
    page.push_str("</ol><h2>Environment</h2><table>");
    for (k, v) in environ_summary(environ) {
        let _ = write!(page, "<tr><th>{}</th><td>{}</td></tr>", html_escape(&k), html_escape(&v));
    }
    for (name, value) in &environ.headers {
        let value = value.to_str().unwrap_or("<binary>");
        let _ = write!(page, "<tr><th>HTTP_{}</th><td>{}</td></tr>", html_escape(name.as_str()), html_escape(value));
    }
    page.push_str("</table><h2>Request variables</h2><ul>");
    for key in environ.var_keys() {
        let _ = write!(page, "<li>{}</li>", html_escape(key));
    }
    page.push_str("</ul></body></html>");
    page
}

impl WsgiApp for DebuggerMiddleware {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        match self.app.call(environ) {
            Ok(response) => Ok(response),
            Err(e) => {
                let report = ErrorReport::error(&e, environ);
                tracing::error!(report = %report.id, error = %e, "request failed in debug mode");
                Ok(WsgiResponse::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/html; charset=utf-8",
                    render_page(&report, environ),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use std::sync::Arc;

    #[test]
    fn failures_render_the_error_chain() {
        let app: BoxedApp = Arc::new(|_: &mut Environ| -> Result<WsgiResponse, AppError> {
            Err(ConfigError::Missing("sqlalchemy.url".into()).into())
        });
        let debugger = DebuggerMiddleware::new(app);
        let mut environ = Environ::get("/a?b=<c>").with_header("x-trace", "1");
        let response = debugger.call(&mut environ).unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let page = response.collect().unwrap().text();
        assert!(page.contains("missing required option: sqlalchemy.url"));
        assert!(page.contains("b=&lt;c&gt;"));
        assert!(page.contains("HTTP_x-trace"));
    }
}
