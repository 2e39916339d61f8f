#[cfg(test)]
mod tests {
    use crate::deltacache::DeltaCache;
    use crate::encoding::TypeDescriptor;
    use crate::sortedrun::RunConf;
    use tempfile::TempDir;

    fn conf() -> RunConf {
        RunConf {
            page_size: 4,
            block_size: 256,
            io_buffer_size: 1024,
            ..RunConf::default()
        }
    }

    #[test]
    fn last_write_wins_and_tombstones_are_counted_separately() {
        let cache = DeltaCache::<u32, String>::new();
        cache.put(1, "a".into()).unwrap();
        cache.put(2, "b".into()).unwrap();
        cache.put(1, "a2".into()).unwrap();
        cache.put(3, String::tombstone()).unwrap();

        assert_eq!(cache.get(&1).unwrap().as_deref(), Some("a2"));
        assert!(cache.get(&3).unwrap().unwrap().is_tombstone());
        assert_eq!(cache.get(&4).unwrap(), None);
        assert_eq!(cache.size().unwrap(), 3);
        assert_eq!(cache.size_without_tombstones().unwrap(), 2);

        let keys: Vec<u32> = cache.sorted_entries().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn take_unflushed_drains_only_new_writes() {
        let cache = DeltaCache::<u32, u32>::new();
        cache.put(5, 50).unwrap();
        cache.put(1, 10).unwrap();
        assert_eq!(cache.unflushed_len().unwrap(), 2);

        let batch = cache.take_unflushed().unwrap();
        assert_eq!(batch, vec![(1, 10), (5, 50)]);
        assert_eq!(cache.unflushed_len().unwrap(), 0);
        assert_eq!(cache.size().unwrap(), 2);

        cache.put(5, 55).unwrap();
        assert_eq!(cache.take_unflushed().unwrap(), vec![(5, 55)]);
    }

    #[test]
    fn restore_unflushed_after_failed_flush() {
        let cache = DeltaCache::<u32, u32>::new();
        cache.put(1, 1).unwrap();
        let batch = cache.take_unflushed().unwrap();
        cache.restore_unflushed(batch.into_iter().map(|(k, _)| k)).unwrap();
        assert_eq!(cache.take_unflushed().unwrap(), vec![(1, 1)]);
    }

    /// # Scenario
    /// Two overflow files both contain key 2; the second also deletes key 1.
    ///
    /// # Expected behavior
    /// Replay applies the files in order: key 2 holds the later value, key 1
    /// a tombstone, and nothing counts as unflushed.
    #[test]
    fn replay_applies_files_in_registration_order() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("delta-000001.run");
        let second = tmp.path().join("delta-000002.run");
        DeltaCache::<u32, u32>::write_overflow(&first, &conf(), vec![(1, 10), (2, 20)]).unwrap();
        DeltaCache::<u32, u32>::write_overflow(
            &second,
            &conf(),
            vec![(1, u32::tombstone()), (2, 21), (3, 30)],
        )
        .unwrap();

        let cache = DeltaCache::<u32, u32>::replay(&[first, second], &conf()).unwrap();
        assert!(cache.get(&1).unwrap().unwrap().is_tombstone());
        assert_eq!(cache.get(&2).unwrap(), Some(21));
        assert_eq!(cache.get(&3).unwrap(), Some(30));
        assert_eq!(cache.unflushed_len().unwrap(), 0);
    }

    #[test]
    fn evict_compacted_keeps_newer_writes() {
        let cache = DeltaCache::<u32, u32>::new();
        cache.put(1, 1).unwrap();
        cache.put(2, 2).unwrap();
        let snapshot = cache.sorted_entries().unwrap();

        cache.put(2, 22).unwrap();
        cache.put(3, 3).unwrap();

        assert_eq!(cache.evict_compacted(&snapshot).unwrap(), 1);
        assert_eq!(
            cache.sorted_entries().unwrap(),
            vec![(2, 22), (3, 3)]
        );
        assert_eq!(cache.take_unflushed().unwrap(), vec![(2, 22), (3, 3)]);
    }

    #[test]
    fn evict_all_empties_the_cache() {
        let cache = DeltaCache::<u32, u32>::new();
        cache.put(1, 1).unwrap();
        cache.evict_all().unwrap();
        assert_eq!(cache.size().unwrap(), 0);
        assert_eq!(cache.unflushed_len().unwrap(), 0);
    }
}
