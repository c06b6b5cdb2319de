//! Thread-bound transactions with two-outcome completion and retry classification.

use crate::error::AppError;
use crate::http::Response;
use crate::wsgi::Environ;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A resource taking part in the transaction of the current thread.
pub trait DataManager: Send + Sync {
    fn name(&self) -> &str;
    fn commit(&self) -> Result<(), AppError>;
    fn abort(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Abort,
}

/// Returns true to force an abort for the given response.
pub type CommitVeto = Arc<dyn Fn(&Environ, &Response) -> bool + Send + Sync>;

/// Abort on 4xx/5xx unless the response carries `X-Tm: commit`; `X-Tm: abort` always aborts.
pub fn default_commit_veto(_environ: &Environ, response: &Response) -> bool {
    if let Some(xtm) = response.header("x-tm") {
        return !xtm.eq_ignore_ascii_case("commit");
    }
    response.status.is_client_error() || response.status.is_server_error()
}

pub struct Transaction {
    id: Uuid,
    resources: Mutex<Vec<Arc<dyn DataManager>>>,
    doomed: AtomicBool,
}

impl Transaction {
    fn new() -> Self {
        Transaction {
            id: Uuid::new_v4(),
            resources: Mutex::new(Vec::new()),
            doomed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn join(&self, resource: Arc<dyn DataManager>) {
        self.resources.lock().push(resource);
    }

    pub fn doom(&self) {
        self.doomed.store(true, Ordering::SeqCst);
    }

    pub fn is_doomed(&self) -> bool {
        self.doomed.load(Ordering::SeqCst)
    }

    fn commit(&self) -> Result<(), AppError> {
        if self.is_doomed() {
            self.abort();
            return Err(AppError::Transaction("cannot commit a doomed transaction".into()));
        }
        let resources = std::mem::take(&mut *self.resources.lock());
        for (idx, resource) in resources.iter().enumerate() {
            if let Err(e) = resource.commit() {
                tracing::warn!(resource = resource.name(), error = %e, "commit failed, aborting remaining resources");
                for rest in &resources[idx + 1..] {
                    rest.abort();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn abort(&self) {
        let resources = std::mem::take(&mut *self.resources.lock());
        for resource in resources.iter().rev() {
            resource.abort();
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<Transaction>>> = const { RefCell::new(None) };
}

/// Handle on the transaction of the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionManager;

impl TransactionManager {
    /// Start a new transaction, aborting one left open on this thread.
    pub fn begin(&self) -> Arc<Transaction> {
        let tx = Arc::new(Transaction::new());
        let previous = CURRENT.with(|c| c.borrow_mut().replace(tx.clone()));
        if let Some(stale) = previous {
            tracing::warn!(id = %stale.id, "aborting stale transaction");
            stale.abort();
        }
        tx
    }

    pub fn get(&self) -> Option<Arc<Transaction>> {
        CURRENT.with(|c| c.borrow().clone())
    }

    fn take(&self) -> Option<Arc<Transaction>> {
        CURRENT.with(|c| c.borrow_mut().take())
    }

    pub fn join(&self, resource: Arc<dyn DataManager>) -> Result<(), AppError> {
        let tx = self.get().ok_or_else(|| AppError::Transaction("no active transaction".into()))?;
        tx.join(resource);
        Ok(())
    }

    pub fn doom(&self) {
        if let Some(tx) = self.get() {
            tx.doom();
        }
    }

    pub fn is_doomed(&self) -> bool {
        self.get().is_some_and(|tx| tx.is_doomed())
    }

    pub fn commit(&self) -> Result<(), AppError> {
        match self.take() {
            Some(tx) => tx.commit(),
            None => Err(AppError::Transaction("no active transaction".into())),
        }
    }

    pub fn abort(&self) {
        if let Some(tx) = self.take() {
            tx.abort();
        }
    }

    pub fn finish(&self, outcome: Outcome) -> Result<(), AppError> {
        match outcome {
            Outcome::Commit => self.commit(),
            Outcome::Abort => {
                self.abort();
                Ok(())
            }
        }
    }

    /// Errors worth another attempt: transient failures, serialization failures and deadlocks.
    pub fn is_retryable(&self, err: &AppError) -> bool {
        match err {
            AppError::Transient(_) => true,
            AppError::Db(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            AppError::Db(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}
