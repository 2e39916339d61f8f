//! Single-flight loading, failure retry and LRU eviction.

#[cfg(test)]
mod tests {
    use crate::executor::WorkerPool;
    use crate::registry::{EntryState, RegistryConf, RegistryError, SegmentRegistry};
    use crate::segment::{SegmentError, SegmentId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;
    use std::time::Duration;

    fn conf(capacity: usize) -> RegistryConf {
        RegistryConf {
            capacity,
            ..RegistryConf::default()
        }
    }

    /// # Scenario
    /// Sixteen threads request the same absent id at once; the loader is
    /// slow enough that they all arrive while it runs.
    ///
    /// # Expected behavior
    /// The loader runs exactly once and every caller gets its value.
    #[test]
    fn concurrent_get_or_load_runs_loader_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = {
            let calls = Arc::clone(&calls);
            Arc::new(
                SegmentRegistry::new(
                    conf(4),
                    move |id: SegmentId| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(id.0 * 10)
                    },
                    |_, _| Ok(()),
                )
                .unwrap(),
            )
        };

        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_load(SegmentId(7)).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 70);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = registry.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 15);
    }

    #[test]
    fn failed_load_is_retried_on_next_access() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let registry = {
            let attempts = Arc::clone(&attempts);
            SegmentRegistry::new(
                conf(4),
                move |id: SegmentId| {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(SegmentError::Internal("disk hiccup".into()));
                    }
                    Ok(id.0)
                },
                |_, _| Ok(()),
            )
            .unwrap()
        };

        let err = registry.get_or_load(SegmentId(1)).unwrap_err();
        assert!(matches!(err, RegistryError::LoadFailed { id: SegmentId(1), .. }));
        assert_eq!(registry.entry_state(SegmentId(1)).unwrap(), Some(EntryState::Failed));
        assert_eq!(registry.get(SegmentId(1)).unwrap(), None);

        assert_eq!(registry.get_or_load(SegmentId(1)).unwrap(), 1);
        assert_eq!(registry.entry_state(SegmentId(1)).unwrap(), Some(EntryState::Ready));
        assert_eq!(registry.stats().load_failures, 1);
        assert_eq!(registry.stats().loads, 2);
    }

    /// # Scenario
    /// Capacity 2; load 1, 2, touch 1, load 3.
    ///
    /// # Expected behavior
    /// 2 is the least recently used entry and is released.
    #[test]
    fn lru_entry_is_released_when_over_capacity() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let registry = {
            let released = Arc::clone(&released);
            SegmentRegistry::new(
                conf(2),
                |id: SegmentId| Ok(id.0),
                move |id, _| {
                    released.lock().unwrap().push(id);
                    Ok(())
                },
            )
            .unwrap()
        };

        registry.get_or_load(SegmentId(1)).unwrap();
        registry.get_or_load(SegmentId(2)).unwrap();
        registry.get(SegmentId(1)).unwrap();
        registry.get_or_load(SegmentId(3)).unwrap();

        assert_eq!(*released.lock().unwrap(), vec![SegmentId(2)]);
        assert_eq!(registry.entry_state(SegmentId(2)).unwrap(), None);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().evictions, 1);
    }

    /// # Scenario
    /// Capacity 1. A load of id 1 is held open while ids 2 and 3 load.
    ///
    /// # Expected behavior
    /// The loading entry survives eviction; once it resolves, the older
    /// ready entry is evicted instead.
    #[test]
    fn loading_entries_are_never_evicted() {
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let release_rx = Mutex::new(release_rx);
        let released = Arc::new(Mutex::new(Vec::new()));
        let registry = {
            let released = Arc::clone(&released);
            Arc::new(
                SegmentRegistry::new(
                    conf(1),
                    move |id: SegmentId| {
                        if id.0 == 1 {
                            release_rx.lock().unwrap().recv().unwrap();
                        }
                        Ok(id.0)
                    },
                    move |id, _| {
                        released.lock().unwrap().push(id);
                        Ok(())
                    },
                )
                .unwrap(),
            )
        };

        let slow = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get_or_load(SegmentId(1)).unwrap())
        };
        while registry.entry_state(SegmentId(1)).unwrap() != Some(EntryState::Loading) {
            thread::sleep(Duration::from_millis(1));
        }

        registry.get_or_load(SegmentId(2)).unwrap();
        registry.get_or_load(SegmentId(3)).unwrap();
        assert_eq!(registry.entry_state(SegmentId(1)).unwrap(), Some(EntryState::Loading));
        assert_eq!(*released.lock().unwrap(), vec![SegmentId(2)]);

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap(), 1);
        // A finished load counts as a use, so 3 is now the oldest.
        assert_eq!(*released.lock().unwrap(), vec![SegmentId(2), SegmentId(3)]);
        assert_eq!(registry.entry_state(SegmentId(1)).unwrap(), Some(EntryState::Ready));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalidate_releases_ready_entries_only() {
        let released = Arc::new(AtomicUsize::new(0));
        let registry = {
            let released = Arc::clone(&released);
            SegmentRegistry::new(
                conf(4),
                |id: SegmentId| Ok(id.0),
                move |_, _| {
                    released.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .unwrap()
        };
        assert!(!registry.invalidate(SegmentId(5)).unwrap());
        registry.get_or_load(SegmentId(5)).unwrap();
        assert!(registry.invalidate(SegmentId(5)).unwrap());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn get_or_load_async_on_pool() {
        let pool = WorkerPool::new("registry", 2, 8).unwrap();
        let registry = Arc::new(
            SegmentRegistry::new(conf(4), |id: SegmentId| Ok(id.0 + 1), |_, _| Ok(())).unwrap(),
        );
        let handles: Vec<_> = (0..4)
            .map(|i| registry.get_or_load_async(&pool, SegmentId(i)).unwrap())
            .collect();
        let values: Vec<u32> = handles
            .into_iter()
            .map(|h| h.wait().unwrap().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = SegmentRegistry::new(conf(0), |id: SegmentId| Ok(id.0), |_, _| Ok(()));
        assert!(matches!(result, Err(RegistryError::Config(_))));
    }
}
