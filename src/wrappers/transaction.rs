use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::transaction::{CommitVeto, Outcome, TransactionManager};
use crate::wsgi::{ControllerHandle, Environ, RequestContext};

/// Runs the request inside a transaction, retrying retryable failures.
pub struct TransactionApplicationWrapper {
    next: Handler,
    enabled: bool,
    attempts: u32,
    commit_veto: Option<CommitVeto>,
    manager: TransactionManager,
}

impl TransactionApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        let attempts = conf.int_or("tm.attempts", 1)?;
        Ok(TransactionApplicationWrapper {
            next,
            enabled: conf.bool_or("tm.enabled", false)?,
            attempts: u32::try_from(attempts).unwrap_or(1).max(1),
            commit_veto: conf.service::<CommitVeto>("tm.commit_veto"),
            manager: TransactionManager,
        })
    }

    fn outcome(&self, environ: &Environ, response: &Response) -> Outcome {
        if self.manager.is_doomed() {
            return Outcome::Abort;
        }
        match &self.commit_veto {
            Some(veto) if veto(environ, response) => Outcome::Abort,
            _ => Outcome::Commit,
        }
    }
}

impl RequestHandler for TransactionApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        let mut attempt = 1;
        loop {
            let tx = self.manager.begin();
            let err = match self.next.handle(controller, environ, context) {
                Ok(response) => {
                    let outcome = self.outcome(environ, &response);
                    tracing::debug!(tx = %tx.id(), ?outcome, "finishing transaction");
                    match self.manager.finish(outcome) {
                        Ok(()) => return Ok(response),
                        Err(e) => e,
                    }
                }
                Err(e) => {
                    self.manager.abort();
                    e
                }
            };
            if attempt < self.attempts && self.manager.is_retryable(&err) {
                tracing::warn!(attempt, attempts = self.attempts, error = %err, "retrying request");
                attempt += 1;
                context.reset_response()?;
                continue;
            }
            return Err(err);
        }
    }
}

impl ApplicationWrapper for TransactionApplicationWrapper {
    fn name(&self) -> &str {
        "transaction"
    }

    fn injected(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::transaction::{default_commit_veto, DataManager};
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        commits: AtomicUsize,
        aborts: AtomicUsize,
    }

    impl DataManager for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn commit(&self) -> Result<(), AppError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn conf(attempts: i64) -> Conf {
        let mut conf = Conf::new();
        conf.set("tm.enabled", true);
        conf.set("tm.attempts", attempts);
        conf
    }

    /// Fails with a transient error `failures` times, then succeeds with `status`.
    fn flaky(failures: usize, status: StatusCode, calls: Arc<AtomicUsize>, recorder: Arc<Recorder>) -> Handler {
        handler(move |_, _, _| {
            TransactionManager.join(recorder.clone())?;
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                return Err(AppError::Transient("conflict".into()));
            }
            let mut response = text("done");
            response.status = status;
            Ok(response)
        })
    }

    fn run(wrapper: &TransactionApplicationWrapper) -> Result<Response, AppError> {
        let mut environ = Environ::get("/");
        let mut ctx = context(Conf::new(), &environ);
        wrapper.handle(&controller(), &mut environ, &mut ctx)
    }

    #[test]
    fn retries_until_success_then_commits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recorder = Arc::new(Recorder::default());
        let next = flaky(2, StatusCode::OK, calls.clone(), recorder.clone());
        let wrapper = TransactionApplicationWrapper::new(next, &conf(3)).unwrap();
        assert_eq!(run(&wrapper).unwrap().text(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.commits.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.aborts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gives_up_after_the_last_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recorder = Arc::new(Recorder::default());
        let next = flaky(5, StatusCode::OK, calls.clone(), recorder);
        let wrapper = TransactionApplicationWrapper::new(next, &conf(2)).unwrap();
        assert!(matches!(run(&wrapper), Err(AppError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn commit_veto_aborts() {
        let recorder = Arc::new(Recorder::default());
        let next = flaky(0, StatusCode::NOT_FOUND, Arc::new(AtomicUsize::new(0)), recorder.clone());
        let mut conf = conf(1);
        conf.set_service("tm.commit_veto", Arc::new(default_commit_veto) as CommitVeto);
        let wrapper = TransactionApplicationWrapper::new(next, &conf).unwrap();
        assert_eq!(run(&wrapper).unwrap().status, StatusCode::NOT_FOUND);
        assert_eq!(recorder.commits.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn doomed_transactions_abort() {
        let recorder = Arc::new(Recorder::default());
        let joined = recorder.clone();
        let next = handler(move |_, _, _| {
            TransactionManager.join(joined.clone())?;
            TransactionManager.doom();
            Ok(text("doomed"))
        });
        let wrapper = TransactionApplicationWrapper::new(next, &conf(1)).unwrap();
        assert_eq!(run(&wrapper).unwrap().text(), "doomed");
        assert_eq!(recorder.commits.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_retryable_errors_propagate_at_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let next = handler(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Controller("bug".into()))
        });
        let wrapper = TransactionApplicationWrapper::new(next, &conf(3)).unwrap();
        assert!(run(&wrapper).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
