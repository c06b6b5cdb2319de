//! One-shot lifecycle flags.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

type Callback = Box<dyn FnOnce() + Send>;

pub struct Milestone {
    name: &'static str,
    reached: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
}

impl Milestone {
    pub const fn new(name: &'static str) -> Self {
        Milestone {
            name,
            reached: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_reached(&self) -> bool {
        self.reached.load(Ordering::SeqCst)
    }

    /// Mark as reached and run queued callbacks. Later calls do nothing.
    pub fn reach(&self) {
        if self.reached.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(milestone = self.name, "milestone reached");
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }

    /// Run `f` when the milestone is reached, or now if it already was.
    pub fn register(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_reached() {
            f();
            return;
        }
        self.callbacks.lock().push(Box::new(f));
    }
}

impl std::fmt::Debug for Milestone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Milestone")
            .field("name", &self.name)
            .field("reached", &self.is_reached())
            .finish()
    }
}

#[derive(Debug)]
pub struct Milestones {
    pub config_ready: Milestone,
    pub renderers_ready: Milestone,
    pub environment_loaded: Milestone,
}

impl Default for Milestones {
    fn default() -> Self {
        Milestones {
            config_ready: Milestone::new("config_ready"),
            renderers_ready: Milestone::new("renderers_ready"),
            environment_loaded: Milestone::new("environment_loaded"),
        }
    }
}
