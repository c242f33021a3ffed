//! Atomic `f64` cells.
//!
//! Accumulators store the IEEE-754 bit pattern in an `AtomicU64` and mutate
//! through compare-exchange loops that compare bit patterns, never float
//! equality. All orderings are relaxed: meter updates are commutative
//! (add), absorbing (max), or last-write-wins (store), so ordering between
//! concurrent writers does not matter.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.0.swap(value.to_bits(), Ordering::Relaxed))
    }

    /// Add `delta` to the cell.
    pub fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Raise the cell to `value` if it is larger than the current value.
    /// NaN never wins the comparison.
    pub fn fetch_max(&self, value: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        while value > f64::from_bits(current) {
            match self.0.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicF64;
    use std::sync::Arc;

    #[test]
    fn add_accumulates() {
        let cell = AtomicF64::new(0.0);
        cell.add(1.5);
        cell.add(2.5);
        assert!((cell.load() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn max_absorbs() {
        let cell = AtomicF64::new(f64::MIN);
        cell.fetch_max(2.0);
        cell.fetch_max(1.0);
        cell.fetch_max(f64::NAN);
        assert!((cell.load() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn swap_returns_previous() {
        let cell = AtomicF64::new(3.0);
        assert!((cell.swap(0.0) - 3.0).abs() < f64::EPSILON);
        assert!(cell.load().abs() < f64::EPSILON);
    }

    #[test]
    fn concurrent_adds_do_not_lose_updates() {
        let cell = Arc::new(AtomicF64::new(0.0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        cell.add(1.0);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!((cell.load() - 40_000.0).abs() < f64::EPSILON);
    }
}
