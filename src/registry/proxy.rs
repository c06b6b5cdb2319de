//! Thread-local object stacks behind process-wide proxy names.

use crate::error::RegistryError;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) type Entry = Arc<dyn Any + Send + Sync>;

thread_local! {
    static STACKS: RefCell<HashMap<usize, Vec<Entry>>> = RefCell::new(HashMap::new());
    static PRESERVED: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// A name whose value is whatever was pushed last on the current thread.
///
/// Declare proxies as `static` items; the stack is keyed by the static's address.
pub struct StackedObjectProxy<T: 'static> {
    name: &'static str,
    default: Option<fn() -> T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> StackedObjectProxy<T> {
    pub const fn new(name: &'static str) -> Self {
        StackedObjectProxy {
            name,
            default: None,
            _marker: PhantomData,
        }
    }

    /// `default` builds the value returned while nothing is pushed.
    pub const fn with_default(name: &'static str, default: fn() -> T) -> Self {
        StackedObjectProxy {
            name,
            default: Some(default),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn top(&self) -> Option<Arc<T>> {
        STACKS.with(|stacks| {
            stacks
                .borrow()
                .get(&self.key())
                .and_then(|stack| stack.last().cloned())
                .and_then(|entry| entry.downcast::<T>().ok())
        })
    }

    /// The object on top of this thread's stack. Never a copy.
    pub fn current_obj(&self) -> Result<Arc<T>, RegistryError> {
        if let Some(obj) = self.top() {
            return Ok(obj);
        }
        match self.default {
            Some(make) => Ok(Arc::new(make())),
            None => Err(RegistryError::NoObject(self.name)),
        }
    }

    /// Like [`current_obj`](Self::current_obj) but ignores the default.
    pub fn try_current(&self) -> Option<Arc<T>> {
        self.top()
    }

    pub fn is_bound(&self) -> bool {
        self.depth() > 0
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, RegistryError> {
        let obj = self.current_obj()?;
        Ok(f(&obj))
    }

    pub fn push_object(&self, obj: Arc<T>) {
        self.push_entry(obj);
    }

    /// Pops the top object. When `expected` is given it must be the object on top.
    pub fn pop_object(&self, expected: Option<&Arc<T>>) -> Result<Arc<T>, RegistryError> {
        let expected = expected.map(|obj| Arc::as_ptr(obj) as *const ());
        let entry = self.pop_entry(expected)?;
        entry.downcast::<T>().map_err(|_| RegistryError::Mismatch(self.name))
    }

    /// Copy of the stack, bottom first.
    pub fn object_stack(&self) -> Vec<Arc<T>> {
        STACKS.with(|stacks| {
            stacks
                .borrow()
                .get(&self.key())
                .map(|stack| {
                    stack
                        .iter()
                        .filter_map(|entry| entry.clone().downcast::<T>().ok())
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn depth(&self) -> usize {
        STACKS.with(|stacks| stacks.borrow().get(&self.key()).map_or(0, Vec::len))
    }

    pub fn preserve_object(&self) {
        PRESERVED.with(|p| {
            p.borrow_mut().insert(self.key());
        });
    }

    pub fn is_preserved(&self) -> bool {
        PRESERVED.with(|p| p.borrow().contains(&self.key()))
    }

    fn push_entry(&self, entry: Entry) {
        STACKS.with(|stacks| stacks.borrow_mut().entry(self.key()).or_default().push(entry));
    }

    fn pop_entry(&self, expected: Option<*const ()>) -> Result<Entry, RegistryError> {
        let key = self.key();
        let popped = STACKS.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            let stack = stacks.get_mut(&key).filter(|s| !s.is_empty());
            let Some(stack) = stack else {
                return Err(RegistryError::EmptyStack(self.name));
            };
            if let (Some(expected), Some(top)) = (expected, stack.last()) {
                if Arc::as_ptr(top) as *const () != expected {
                    return Err(RegistryError::Mismatch(self.name));
                }
            }
            let entry = stack.pop().ok_or(RegistryError::EmptyStack(self.name))?;
            if stack.is_empty() {
                stacks.remove(&key);
            }
            Ok(entry)
        })?;
        if self.depth() == 0 {
            PRESERVED.with(|p| {
                p.borrow_mut().remove(&key);
            });
        }
        Ok(popped)
    }
}

impl<T: Any + Send + Sync + fmt::Debug> fmt::Debug for StackedObjectProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.current_obj() {
            Ok(obj) => fmt::Debug::fmt(&*obj, f),
            Err(_) => write!(f, "<{} (unbound)>", self.name),
        }
    }
}

/// Type-erased handle used by [`Registry`](super::Registry) scopes.
pub trait ErasedProxy: Send + Sync {
    fn proxy_key(&self) -> usize;
    fn proxy_name(&self) -> &'static str;
    fn push_erased(&self, entry: Entry);
    fn pop_erased(&self, expected: &Entry) -> Result<(), RegistryError>;
    fn preserve_erased(&self);
}

impl<T: Any + Send + Sync> ErasedProxy for StackedObjectProxy<T> {
    fn proxy_key(&self) -> usize {
        self.key()
    }

    fn proxy_name(&self) -> &'static str {
        self.name
    }

    fn push_erased(&self, entry: Entry) {
        self.push_entry(entry);
    }

    fn pop_erased(&self, expected: &Entry) -> Result<(), RegistryError> {
        self.pop_entry(Some(Arc::as_ptr(expected) as *const ())).map(|_| ())
    }

    fn preserve_erased(&self) {
        self.preserve_object();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static NAME: StackedObjectProxy<String> = StackedObjectProxy::new("name");
    static COUNT: StackedObjectProxy<u32> = StackedObjectProxy::with_default("count", || 7);

    #[test]
    fn unbound_proxy_errors_or_uses_default() {
        assert_eq!(NAME.current_obj().unwrap_err(), RegistryError::NoObject("name"));
        assert_eq!(*COUNT.current_obj().unwrap(), 7);
        assert!(COUNT.try_current().is_none());
    }

    #[test]
    fn current_obj_is_the_pushed_object() {
        let obj = Arc::new("alice".to_string());
        NAME.push_object(obj.clone());
        let current = NAME.current_obj().unwrap();
        assert!(Arc::ptr_eq(&current, &obj));
        assert_eq!(NAME.with(|s| s.len()).unwrap(), 5);
        assert_eq!(format!("{:?}", NAME), format!("{:?}", obj));
        NAME.pop_object(Some(&obj)).unwrap();
        assert_eq!(NAME.depth(), 0);
    }

    #[test]
    fn pop_checks_balance() {
        let a = Arc::new("a".to_string());
        let b = Arc::new("b".to_string());
        assert_eq!(NAME.pop_object(None).unwrap_err(), RegistryError::EmptyStack("name"));
        NAME.push_object(a.clone());
        NAME.push_object(b.clone());
        assert_eq!(NAME.object_stack().len(), 2);
        assert_eq!(NAME.pop_object(Some(&a)).unwrap_err(), RegistryError::Mismatch("name"));
        NAME.pop_object(Some(&b)).unwrap();
        NAME.pop_object(Some(&a)).unwrap();
    }

    #[test]
    fn stacks_are_per_thread() {
        let obj = Arc::new("main".to_string());
        NAME.push_object(obj.clone());
        let seen = std::thread::spawn(|| NAME.try_current().is_some()).join().unwrap();
        assert!(!seen);
        NAME.pop_object(Some(&obj)).unwrap();
    }

    #[test]
    fn preservation_ends_when_the_stack_empties() {
        let obj = Arc::new(1_u32);
        COUNT.push_object(obj.clone());
        COUNT.preserve_object();
        assert!(COUNT.is_preserved());
        COUNT.pop_object(Some(&obj)).unwrap();
        assert!(!COUNT.is_preserved());
    }
}
