//! Outer error handling: slow request tracing, error reports and the debug page.

use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use crate::middleware::{sinks_from_conf, DebuggerMiddleware, ErrorReporter, SlowReqsMiddleware};
use crate::wsgi::BoxedApp;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ERROR_MESSAGE: &str = "An internal server error occurred";

/// Reports requests running longer than `trace_slowreqs.interval` seconds.
#[derive(Debug, Default)]
pub struct SlowRequestsStep;

impl ConfigurationStep for SlowRequestsStep {
    fn id(&self) -> &str {
        "slow_requests"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("trace_slowreqs.enable".into(), json!(false));
        defaults.insert("trace_slowreqs.interval".into(), json!(25));
        defaults.insert("trace_slowreqs.exclude".into(), json!([]));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("trace_slowreqs.enable".into(), Coercion::Bool),
            ("trace_slowreqs.interval".into(), Coercion::Int),
            ("trace_slowreqs.exclude".into(), Coercion::list()),
        ]
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        if !conf.bool_or("trace_slowreqs.enable", false)? {
            return Ok(app);
        }
        let seconds = conf.int_or("trace_slowreqs.interval", 25)?;
        let interval = u64::try_from(seconds)
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::Validation(format!("trace_slowreqs.interval must not be negative, got {seconds}")))?;
        let exclude = conf
            .list("trace_slowreqs.exclude")?
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| ConfigError::Validation(format!("trace_slowreqs.exclude: {pattern}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sinks = sinks_from_conf(conf, "trace_slowreqs")?;
        tracing::debug!(interval_secs = seconds, excluded = exclude.len(), "tracing slow requests");
        Ok(Arc::new(SlowReqsMiddleware::new(app, interval, exclude, sinks)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reports escaping errors and answers with a generic 500 page. Off in debug mode.
#[derive(Debug, Default)]
pub struct ErrorReportingStep;

impl ConfigurationStep for ErrorReportingStep {
    fn id(&self) -> &str {
        "error_reporting"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("trace_errors.enable".into(), json!(true));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("trace_errors.enable".into(), Coercion::Bool),
            ("trace_errors.error_email".into(), Coercion::list()),
        ]
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        if conf.bool_or("debug", false)? || !conf.bool_or("trace_errors.enable", true)? {
            return Ok(app);
        }
        let sinks = sinks_from_conf(conf, "trace_errors")?;
        let message = conf.str_or("trace_errors.error_message", DEFAULT_ERROR_MESSAGE);
        Ok(Arc::new(ErrorReporter::new(app, sinks, message)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Interactive error page, installed only in debug mode.
#[derive(Debug, Default)]
pub struct DebuggerStep;

impl ConfigurationStep for DebuggerStep {
    fn id(&self) -> &str {
        "debugger"
    }

    fn app_ready(&self, app: BoxedApp, conf: &Conf, _ctx: &BuildContext) -> Result<BoxedApp, ConfigError> {
        if !conf.bool_or("debug", false)? {
            return Ok(app);
        }
        tracing::warn!("debug mode: error pages expose the request environment");
        Ok(Arc::new(DebuggerMiddleware::new(app)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
