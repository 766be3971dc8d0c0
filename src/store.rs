//! Latest decoded value of every signal, shared between the ingestion thread
//! and the consumer.
//!
//! Each signal has its own `Mutex`-guarded cell holding the value and its
//! "has update" flag as one pair. A process-wide `AtomicBool` lets a consumer
//! skip the scan entirely when nothing was written since it last looked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::core::catalog::{Catalog, SignalId};
use crate::error::{IcError, Result};

/// Value and freshness flag, always read and written together
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CellState {
    value: f64,
    has_update: bool,
}

#[derive(Debug, Default)]
struct SignalCell {
    state: Mutex<CellState>,
}

/// Whether a read consumes the update flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consume {
    /// Peek: leave the flag as it is
    Keep,
    /// Authoritative consumer: clear the flag
    Clear,
}

/// Snapshot of one cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub had_update: bool,
}

#[derive(Debug)]
pub struct RealTimeStore {
    cells: Box<[SignalCell]>,
    any_update: AtomicBool,
}

impl RealTimeStore {
    /// One zeroed cell per catalog signal
    pub fn new(catalog: &Catalog) -> Self {
        Self::with_signal_count(catalog.signal_count())
    }

    pub fn with_signal_count(count: usize) -> Self {
        Self {
            cells: (0..count).map(|_| SignalCell::default()).collect(),
            any_update: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn lock(&self, signal: SignalId) -> Result<MutexGuard<'_, CellState>> {
        let cell = self.cells.get(signal.index()).ok_or_else(|| {
            IcError::Argument(format!(
                "signal {} outside store of {} cells",
                signal,
                self.cells.len()
            ))
        })?;
        cell.state
            .lock()
            .map_err(|_| IcError::Poisoned { signal })
    }

    /// Store a new value and mark it fresh
    pub fn write(&self, signal: SignalId, value: f64) -> Result<()> {
        {
            let mut state = self.lock(signal)?;
            state.value = value;
            state.has_update = true;
        }
        // Set after the cell so a consumer that sees the flag finds the value
        self.any_update.store(true, Ordering::Release);
        Ok(())
    }

    /// Current value and whether it changed since the last clearing read
    pub fn read(&self, signal: SignalId, consume: Consume) -> Result<Reading> {
        let mut state = self.lock(signal)?;
        let reading = Reading {
            value: state.value,
            had_update: state.has_update,
        };
        if consume == Consume::Clear {
            state.has_update = false;
        }
        Ok(reading)
    }

    /// Coarse pre-check: false means no cell has been written since the last drain
    pub fn has_any_update(&self) -> bool {
        self.any_update.load(Ordering::Acquire)
    }

    /// Consume every pending update, calling `sink` for each fresh signal
    ///
    /// Returns the number of signals visited. The global flag is lowered
    /// before the scan, so a write racing the drain leaves it raised for the
    /// next round instead of being lost.
    ///
    /// A poisoned cell does not stop the scan: every healthy cell is still
    /// delivered and cleared, then the first failure is returned.
    pub fn drain<F>(&self, mut sink: F) -> Result<usize>
    where
        F: FnMut(SignalId, f64),
    {
        if !self.any_update.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }

        let mut fresh = 0;
        let mut failure = None;
        for index in 0..self.cells.len() {
            let signal = SignalId::from_index(index);
            match self.read(signal, Consume::Clear) {
                Ok(reading) if reading.had_update => {
                    sink(signal, reading.value);
                    fresh += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(fresh),
        }
    }

    /// Poison one cell's lock the way a panicking holder would
    #[cfg(test)]
    pub(crate) fn poison(&self, signal: SignalId) {
        let cell = &self.cells[signal.index()];
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = cell.state.lock();
                    panic!("poisoning cell {}", signal);
                })
                .join();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn id(index: usize) -> SignalId {
        SignalId::from_index(index)
    }

    #[test]
    fn test_fresh_store_is_zeroed() {
        let store = RealTimeStore::with_signal_count(3);
        assert_eq!(store.len(), 3);
        assert!(!store.has_any_update());
        let reading = store.read(id(2), Consume::Keep).unwrap();
        assert_eq!(
            reading,
            Reading {
                value: 0.0,
                had_update: false
            }
        );
    }

    #[test]
    fn test_read_clear_is_idempotent() {
        let store = RealTimeStore::with_signal_count(2);
        store.write(id(1), 42.5).unwrap();

        let first = store.read(id(1), Consume::Clear).unwrap();
        let second = store.read(id(1), Consume::Clear).unwrap();
        assert!(first.had_update);
        assert!(!second.had_update);
        assert_eq!(first.value, 42.5);
        assert_eq!(second.value, 42.5);
    }

    #[test]
    fn test_keep_leaves_flag() {
        let store = RealTimeStore::with_signal_count(1);
        store.write(id(0), 1.0).unwrap();
        assert!(store.read(id(0), Consume::Keep).unwrap().had_update);
        assert!(store.read(id(0), Consume::Keep).unwrap().had_update);
    }

    #[test]
    fn test_unknown_signal_is_argument_error() {
        let store = RealTimeStore::with_signal_count(1);
        assert!(matches!(store.write(id(5), 1.0), Err(IcError::Argument(_))));
        assert!(matches!(store.read(id(5), Consume::Keep), Err(IcError::Argument(_))));
    }

    #[test]
    fn test_drain_clears_everything() {
        let store = RealTimeStore::with_signal_count(4);
        store.write(id(0), 1.0).unwrap();
        store.write(id(3), 3.0).unwrap();
        store.write(id(3), 4.0).unwrap();
        assert!(store.has_any_update());

        let mut seen = Vec::new();
        let fresh = store.drain(|signal, value| seen.push((signal, value))).unwrap();
        assert_eq!(fresh, 2);
        assert_eq!(seen, vec![(id(0), 1.0), (id(3), 4.0)]);
        assert!(!store.has_any_update());

        // Nothing new: the global flag short-circuits the scan
        assert_eq!(store.drain(|_, _| panic!("no updates expected")).unwrap(), 0);
    }

    #[test]
    fn test_poisoned_cell_is_reported() {
        let store = RealTimeStore::with_signal_count(2);
        store.poison(id(1));

        assert!(matches!(
            store.write(id(1), 1.0),
            Err(IcError::Poisoned { signal }) if signal == id(1)
        ));
        // Other cells are unaffected
        store.write(id(0), 2.0).unwrap();
    }

    #[test]
    fn test_drain_delivers_healthy_cells_past_poisoned_one() {
        let store = RealTimeStore::with_signal_count(3);
        store.poison(id(0));
        store.write(id(1), 7.0).unwrap();
        store.write(id(2), 9.0).unwrap();

        let mut seen = Vec::new();
        let result = store.drain(|signal, value| seen.push((signal, value)));
        assert!(matches!(result, Err(IcError::Poisoned { signal }) if signal == id(0)));
        assert_eq!(seen, vec![(id(1), 7.0), (id(2), 9.0)]);

        // Healthy cells were cleared even though the drain reported an error
        assert!(!store.read(id(1), Consume::Keep).unwrap().had_update);
        assert!(!store.read(id(2), Consume::Keep).unwrap().had_update);

        // A later write is still picked up on the next round
        store.write(id(2), 10.0).unwrap();
        seen.clear();
        let _ = store.drain(|signal, value| seen.push((signal, value)));
        assert_eq!(seen, vec![(id(2), 10.0)]);
    }

    #[test]
    fn test_concurrent_writer_and_consumer() {
        let store = Arc::new(RealTimeStore::with_signal_count(8));
        let writer_store = Arc::clone(&store);

        let writer = thread::spawn(move || {
            for n in 0..10_000u32 {
                let signal = id((n % 8) as usize);
                writer_store.write(signal, n as f64).unwrap();
            }
        });

        let mut last = [None::<f64>; 8];
        while !writer.is_finished() {
            store
                .drain(|signal, value| {
                    // Values for one signal never go backwards
                    if let Some(prev) = last[signal.index()] {
                        assert!(value >= prev);
                    }
                    last[signal.index()] = Some(value);
                })
                .unwrap();
        }
        writer.join().unwrap();
        store.drain(|signal, value| last[signal.index()] = Some(value)).unwrap();

        for (index, value) in last.iter().enumerate() {
            assert_eq!(*value, Some((9_992 + index) as f64));
        }
    }
}
