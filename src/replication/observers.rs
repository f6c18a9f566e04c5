//! One-to-many change notification with isolated failures

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

type Callback<T> = Box<dyn FnMut(&T) -> anyhow::Result<()> + Send>;

/// Registry of callbacks invoked in registration order.
///
/// A callback that errors or panics is logged and skipped; later callbacks
/// still receive the value.
pub struct Observers<T> {
    name: &'static str,
    callbacks: Vec<Callback<T>>,
}

impl<T> Observers<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            callbacks: Vec::new(),
        }
    }

    /// Register a callback
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&T) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invoke every callback, returns the number that failed
    pub fn notify(&mut self, value: &T) -> usize {
        let mut failures = 0;
        for (index, callback) in self.callbacks.iter_mut().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(observer = self.name, index, error = %e, "Observer callback failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(observer = self.name, index, "Observer callback panicked");
                }
            }
        }
        failures
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("name", &self.name)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn failing_callback_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::<u32>::new("test");

        let first = seen.clone();
        observers.subscribe(move |v| {
            first.lock().unwrap().push(("first", *v));
            Ok(())
        });
        observers.subscribe(|_| anyhow::bail!("hud widget missing"));
        observers.subscribe(|_| panic!("callback bug"));
        let last = seen.clone();
        observers.subscribe(move |v| {
            last.lock().unwrap().push(("last", *v));
            Ok(())
        });

        let failures = observers.notify(&7);

        assert_eq!(failures, 2);
        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("last", 7)]);
    }
}
