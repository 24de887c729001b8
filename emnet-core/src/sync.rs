//! ## emnet-core::sync
//! **Narrow critical section for state shared with completion context**
//!
//! Driver completions (the hosted analogue of an interrupt handler) may free
//! packets while the stack task allocates them. Pool free lists therefore sit
//! behind a `Critical` rather than behind the coarse stack lock: the section
//! is entered for a handful of pointer updates and never across I/O.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

pub struct Critical<T> {
    inner: Mutex<T>,
}

impl<T> Critical<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Runs `f` with exclusive access to the guarded state.
    #[inline]
    pub fn enter<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Holds the section open while the caller works on one part of the state.
    #[inline]
    pub fn project<U: ?Sized>(&self, f: impl FnOnce(&mut T) -> &mut U) -> MappedMutexGuard<'_, U> {
        MutexGuard::map(self.inner.lock(), f)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Link, Queue};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn queue_under_critical_section_from_two_threads() {
        let shared = Arc::new(Critical::new((Queue::new(), vec![Link::new(); 64])));

        let producer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..32 {
                    shared.enter(|(q, links)| q.add(links, i));
                }
            })
        };
        for i in 32..64 {
            shared.enter(|(q, links)| q.add(links, i));
        }
        producer.join().unwrap();

        let len = shared.enter(|(q, _)| q.len());
        assert_eq!(len, 64);
    }

    #[test]
    fn projection_exposes_one_field() {
        let section = Critical::new((1u32, String::from("free")));
        section.project(|(_, s)| s).push_str("-list");
        assert_eq!(section.into_inner().1, "free-list");
    }
}
