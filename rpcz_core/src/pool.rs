use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Unbounded, unordered cache of idle instances shared between threads.
///
/// `acquire` hands out an idle instance when one exists and constructs a fresh
/// one otherwise, so it never fails. The pool grows to the peak number of
/// concurrently held instances and never shrinks.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    make: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicUsize,
}

impl<T> Pool<T> {
    pub fn new(make: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            make: Box::new(make),
            created: AtomicUsize::new(0),
        }
    }

    /// Take an instance out of the pool.
    ///
    /// The flag is `true` when the instance was idle in the pool and `false`
    /// when it was just constructed.
    pub fn acquire(&self) -> (T, bool) {
        // Pop under the lock, construct outside of it.
        let idle = self.idle.lock().pop();
        match idle {
            Some(item) => (item, true),
            None => {
                let total = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!("pool miss, constructing instance #{total}");
                ((self.make)(), false)
            }
        }
    }

    /// Return an instance so a later `acquire` can reuse it.
    pub fn release(&self, item: T) {
        self.idle.lock().push(item);
    }

    /// Number of instances currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of instances constructed over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle())
            .field("created", &self.created())
            .finish()
    }
}
