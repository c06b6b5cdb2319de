use super::error_reporter::{dispatch_report, ErrorReport, ReportSink};
use crate::error::AppError;
use crate::wsgi::{BoxedApp, Environ, WsgiApp, WsgiResponse};
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reports requests slower than `interval`. Never interrupts them.
pub struct SlowReqsMiddleware {
    app: BoxedApp,
    interval: Duration,
    exclude: Vec<Regex>,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl SlowReqsMiddleware {
    pub fn new(app: BoxedApp, interval: Duration, exclude: Vec<Regex>, sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        SlowReqsMiddleware {
            app,
            interval,
            exclude,
            sinks,
        }
    }

    fn excluded(&self, path: &str) -> bool {
        self.exclude.iter().any(|re| re.is_match(path))
    }
}

impl WsgiApp for SlowReqsMiddleware {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        if self.excluded(&environ.path_info) {
            return self.app.call(environ);
        }
        let started = Instant::now();
        let result = self.app.call(environ);
        let elapsed = started.elapsed();
        if elapsed >= self.interval {
            tracing::warn!(path = %environ.path_info, elapsed_ms = elapsed.as_millis() as u64, "slow request");
            dispatch_report(&self.sinks, &ErrorReport::slow_request(elapsed, environ));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::error_reporter::testing::Collecting;
    use super::*;
    use axum::http::StatusCode;

    fn middleware(sink: &Arc<Collecting>, exclude: &[&str]) -> SlowReqsMiddleware {
        let app: BoxedApp = Arc::new(|_: &mut Environ| -> Result<WsgiResponse, AppError> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(WsgiResponse::text(StatusCode::OK, "text/plain", "done"))
        });
        let exclude = exclude.iter().map(|p| Regex::new(p).unwrap()).collect();
        let sinks: Vec<Arc<dyn ReportSink>> = vec![sink.clone()];
        SlowReqsMiddleware::new(app, Duration::from_millis(5), exclude, sinks)
    }

    #[test]
    fn slow_requests_are_reported_but_complete() {
        let sink = Arc::new(Collecting::default());
        let response = middleware(&sink, &[]).call(&mut Environ::get("/report")).unwrap();
        assert_eq!(response.collect().unwrap().text(), "done");
        let reports = sink.0.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].duration_ms.unwrap_or(0) >= 5);
    }

    #[test]
    fn excluded_paths_are_not_timed() {
        let sink = Arc::new(Collecting::default());
        middleware(&sink, &["^/export/"]).call(&mut Environ::get("/export/all")).unwrap();
        assert!(sink.0.lock().is_empty());
    }
}
