//! Request-local registry: scopes of proxy bindings pushed and popped per request.

pub mod locals;
pub mod manager;
pub mod proxy;

pub use manager::{release_preserved, RegistryManager};
pub use proxy::{ErasedProxy, StackedObjectProxy};

use crate::error::RegistryError;
use parking_lot::Mutex;
use proxy::Entry;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

struct Scope {
    bindings: Vec<(&'static dyn ErasedProxy, Entry)>,
    preserved: bool,
}

/// Stack of scopes. Cloning shares the same scopes.
#[derive(Clone, Default)]
pub struct Registry {
    scopes: Arc<Mutex<Vec<Scope>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new scope.
    pub fn prepare(&self) {
        self.scopes.lock().push(Scope {
            bindings: Vec::new(),
            preserved: false,
        });
    }

    /// Bind `obj` to `proxy` in the top scope, replacing an earlier binding of the same proxy.
    pub fn register<T: Any + Send + Sync>(
        &self,
        proxy: &'static StackedObjectProxy<T>,
        obj: Arc<T>,
    ) -> Result<(), RegistryError> {
        let mut scopes = self.scopes.lock();
        let scope = scopes.last_mut().ok_or(RegistryError::NoScope)?;
        let key = ErasedProxy::proxy_key(proxy);
        if let Some(pos) = scope.bindings.iter().position(|(p, _)| p.proxy_key() == key) {
            let (existing, entry) = scope.bindings.remove(pos);
            existing.pop_erased(&entry)?;
        }
        let entry: Entry = obj;
        proxy.push_erased(entry.clone());
        scope.bindings.push((proxy, entry));
        Ok(())
    }

    /// Pop every binding of the top scope, then the scope. A preserved scope is left intact.
    pub fn cleanup(&self) -> Result<(), RegistryError> {
        let mut scopes = self.scopes.lock();
        match scopes.last() {
            None => Err(RegistryError::NoScope),
            Some(scope) if scope.preserved => Ok(()),
            Some(_) => {
                let scope = scopes.pop().ok_or(RegistryError::NoScope)?;
                unwind(scope)
            }
        }
    }

    /// Mark the top scope so [`cleanup`](Self::cleanup) leaves it in place.
    pub fn preserve(&self) {
        let mut scopes = self.scopes.lock();
        if let Some(scope) = scopes.last_mut() {
            scope.preserved = true;
            for (proxy, _) in &scope.bindings {
                proxy.preserve_erased();
            }
        }
    }

    pub fn is_preserved(&self) -> bool {
        self.scopes.lock().last().is_some_and(|s| s.preserved)
    }

    /// Pop every scope, preserved or not.
    pub fn release(&self) -> Result<(), RegistryError> {
        let mut scopes = self.scopes.lock();
        while let Some(scope) = scopes.pop() {
            unwind(scope)?;
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.scopes.lock().len()
    }

    /// Names bound in the top scope, in registration order.
    pub fn bound_names(&self) -> Vec<&'static str> {
        self.scopes
            .lock()
            .last()
            .map(|s| s.bindings.iter().map(|(p, _)| p.proxy_name()).collect())
            .unwrap_or_default()
    }
}

/// One prepared scope, cleaned up when the guard drops.
///
/// Dropping during a panic cleans up too, or hands the scope to the thread's preserved
/// slot when [`preserve_on_unwind`](Self::preserve_on_unwind) was requested.
#[must_use = "dropping the guard cleans up the scope immediately"]
pub struct ScopeGuard {
    registry: Registry,
    preserve_on_unwind: bool,
    armed: bool,
}

impl ScopeGuard {
    pub fn enter(registry: Registry) -> Self {
        registry.prepare();
        ScopeGuard {
            registry,
            preserve_on_unwind: false,
            armed: true,
        }
    }

    pub fn preserve_on_unwind(mut self, preserve: bool) -> Self {
        self.preserve_on_unwind = preserve;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Clean up now and report failures.
    pub fn close(mut self) -> Result<(), RegistryError> {
        self.armed = false;
        self.registry.cleanup()
    }

    /// Stop guarding; the caller takes over cleanup of the scope.
    pub fn into_inner(mut self) -> Registry {
        self.armed = false;
        self.registry.clone()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() && self.preserve_on_unwind {
            manager::hold_preserved(&self.registry);
            return;
        }
        if let Err(e) = self.registry.cleanup() {
            tracing::error!(error = %e, "registry cleanup on early exit failed");
        }
    }
}

fn unwind(scope: Scope) -> Result<(), RegistryError> {
    for (proxy, entry) in scope.bindings.iter().rev() {
        proxy.pop_erased(entry)?;
    }
    Ok(())
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("depth", &self.depth())
            .field("bound", &self.bound_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static USER: StackedObjectProxy<String> = StackedObjectProxy::new("user");
    static LANG: StackedObjectProxy<String> = StackedObjectProxy::new("lang");

    #[test]
    fn cleanup_pops_what_the_scope_pushed() {
        let registry = Registry::new();
        registry.prepare();
        registry.register(&USER, Arc::new("alice".into())).unwrap();
        registry.register(&LANG, Arc::new("en".into())).unwrap();
        assert_eq!(*USER.current_obj().unwrap(), "alice");
        assert_eq!(registry.bound_names(), vec!["user", "lang"]);

        registry.cleanup().unwrap();
        assert_eq!(USER.depth(), 0);
        assert_eq!(LANG.depth(), 0);
        assert_eq!(registry.depth(), 0);
    }

    #[test]
    fn nested_scopes_restore_outer_bindings() {
        let registry = Registry::new();
        registry.prepare();
        registry.register(&USER, Arc::new("outer".into())).unwrap();
        registry.prepare();
        registry.register(&USER, Arc::new("inner".into())).unwrap();
        assert_eq!(*USER.current_obj().unwrap(), "inner");
        registry.cleanup().unwrap();
        assert_eq!(*USER.current_obj().unwrap(), "outer");
        registry.cleanup().unwrap();
        assert!(USER.try_current().is_none());
    }

    #[test]
    fn double_registration_replaces_the_binding() {
        let registry = Registry::new();
        registry.prepare();
        registry.register(&USER, Arc::new("first".into())).unwrap();
        registry.register(&USER, Arc::new("second".into())).unwrap();
        assert_eq!(USER.depth(), 1);
        assert_eq!(*USER.current_obj().unwrap(), "second");
        registry.cleanup().unwrap();
        assert_eq!(USER.depth(), 0);
    }

    #[test]
    fn register_without_scope_fails() {
        let registry = Registry::new();
        assert_eq!(
            registry.register(&USER, Arc::new("x".into())).unwrap_err(),
            RegistryError::NoScope
        );
        assert_eq!(registry.cleanup().unwrap_err(), RegistryError::NoScope);
    }

    #[test]
    fn preserved_scope_survives_cleanup_until_released() {
        let registry = Registry::new();
        registry.prepare();
        registry.register(&USER, Arc::new("debug".into())).unwrap();
        registry.preserve();
        registry.cleanup().unwrap();
        assert!(USER.is_preserved());
        assert_eq!(*USER.current_obj().unwrap(), "debug");

        registry.release().unwrap();
        assert_eq!(USER.depth(), 0);
        assert!(!USER.is_preserved());
    }

    #[test]
    fn guard_cleans_up_when_dropped() {
        let guard = ScopeGuard::enter(Registry::new());
        guard.registry().register(&USER, Arc::new("scoped".into())).unwrap();
        assert_eq!(USER.depth(), 1);
        drop(guard);
        assert_eq!(USER.depth(), 0);
    }

    #[test]
    fn guard_cleans_up_during_a_panic() {
        let registry = Registry::new();
        let inner = registry.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let guard = ScopeGuard::enter(inner);
            guard.registry().register(&USER, Arc::new("doomed".into())).unwrap();
            panic!("controller blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(USER.depth(), 0);
        assert_eq!(registry.depth(), 0);
    }

    #[test]
    fn released_guard_leaves_the_scope_to_the_caller() {
        let guard = ScopeGuard::enter(Registry::new());
        guard.registry().register(&LANG, Arc::new("fr".into())).unwrap();
        let registry = guard.into_inner();
        assert_eq!(LANG.depth(), 1);
        registry.cleanup().unwrap();
        assert_eq!(LANG.depth(), 0);
    }
}
