//! A cell providing atomic load/store of `Copy` values via critical sections
//!
//! Crossbeam's `AtomicCell` falls back to a global spinlock-free scheme that
//! requires CAS, which thumbv6m does not have, so shared fields use this
//! critical-section based container instead.

use core::cell::Cell;
use critical_section::Mutex;

/// A container allowing atomic access to the contained value from any context
#[derive(Debug)]
pub struct AtomicCell<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Send + Copy> AtomicCell<T> {
    /// Create a new AtomicCell holding `value`
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the contained value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Replace the contained value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value));
    }

    /// Atomically update the contained value
    ///
    /// The update function receives the current value and may return a
    /// replacement. `Ok` with the previous value is returned if a replacement
    /// was stored, `Err` with the unchanged value otherwise. The function runs
    /// inside a critical section and must not block.
    pub fn fetch_update(&self, mut f: impl FnMut(T) -> Option<T>) -> Result<T, T> {
        critical_section::with(|cs| {
            let old = self.inner.borrow(cs).get();
            match f(old) {
                Some(new) => {
                    self.inner.borrow(cs).set(new);
                    Ok(old)
                }
                None => Err(old),
            }
        })
    }
}

impl<T: Send + Copy + Default> AtomicCell<T> {
    /// Return the contained value, leaving the default value in its place
    pub fn take(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }
}

impl<T: Send + Copy + Default> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_store() {
        let cell = AtomicCell::new(5u32);
        assert_eq!(5, cell.load());
        cell.store(77);
        assert_eq!(77, cell.load());
    }

    #[test]
    fn test_take() {
        let cell = AtomicCell::new(Some(9u8));
        assert_eq!(Some(9), cell.take());
        assert_eq!(None, cell.load());
    }

    #[test]
    fn test_fetch_update() {
        let cell = AtomicCell::new(10u16);
        assert_eq!(Ok(10), cell.fetch_update(|v| Some(v + 1)));
        assert_eq!(11, cell.load());
        assert_eq!(Err(11), cell.fetch_update(|_| None));
        assert_eq!(11, cell.load());
    }
}
