//! Read and write contract of a single segment without maintenance.

#[cfg(test)]
mod tests {
    use crate::encoding::TypeDescriptor;
    use crate::segment::SegmentError;
    use crate::segment::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_overwrite() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());

        seg.put(1, "a".into()).unwrap();
        seg.put(2, "b".into()).unwrap();
        seg.put(1, "a2".into()).unwrap();

        assert_eq!(seg.get(&1).unwrap().as_deref(), Some("a2"));
        assert_eq!(seg.get(&2).unwrap().as_deref(), Some("b"));
        assert_eq!(seg.get(&3).unwrap(), None);
    }

    /// # Scenario
    /// A key is deleted while it only lives in the delta cache, and another
    /// after it was compacted into the base run.
    ///
    /// # Expected behavior
    /// Both read as absent: the tombstone in the delta cache shadows the base.
    #[test]
    fn delete_shadows_delta_and_base() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());

        seg.put(1, "one".into()).unwrap();
        seg.put(2, "two".into()).unwrap();
        seg.compact().unwrap();
        seg.put(3, "three".into()).unwrap();

        seg.delete(2).unwrap();
        seg.delete(3).unwrap();

        assert_eq!(seg.get(&1).unwrap().as_deref(), Some("one"));
        assert_eq!(seg.get(&2).unwrap(), None);
        assert_eq!(seg.get(&3).unwrap(), None);
        assert_eq!(collect(&seg), vec![(1, "one".to_string())]);
    }

    #[test]
    fn put_rejects_the_tombstone_value() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());
        let err = seg.put(1, String::tombstone()).unwrap_err();
        assert!(matches!(err, SegmentError::TombstoneValue));
    }

    /// # Scenario
    /// Half the keys are compacted into the base, the other half and some
    /// overwrites stay in the delta cache.
    ///
    /// # Expected behavior
    /// The scan merges both in key order with delta values winning.
    #[test]
    fn iter_merges_base_and_delta() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());

        for i in (0..40).step_by(2) {
            seg.put(i, value(i)).unwrap();
        }
        seg.compact().unwrap();
        for i in (1..40).step_by(2) {
            seg.put(i, value(i)).unwrap();
        }
        seg.put(10, "fresh".into()).unwrap();

        let entries = collect(&seg);
        assert_eq!(entries.len(), 40);
        assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(entries[10], (10, "fresh".to_string()));
        assert_eq!(entries[11], (11, value(11)));
    }

    /// # Scenario
    /// A write lands after an iterator was opened.
    ///
    /// # Expected behavior
    /// The iterator ends early and reports the interruption.
    #[test]
    fn concurrent_write_interrupts_iterator() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());
        for i in 0..10 {
            seg.put(i, value(i)).unwrap();
        }

        let mut iter = seg.iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap().0, 0);
        seg.put(100, value(100)).unwrap();
        assert!(iter.next().is_none());
        assert!(iter.was_interrupted());

        let mut fresh = seg.iter().unwrap();
        assert_eq!(fresh.by_ref().count(), 11);
        assert!(!fresh.was_interrupted());
    }

    #[test]
    fn bloom_filter_short_circuits_absent_keys() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());
        for i in 0..200 {
            seg.put(i, value(i)).unwrap();
        }
        seg.compact().unwrap();

        for i in 1_000..2_000 {
            assert_eq!(seg.get(&i).unwrap(), None);
        }
        let stats = seg.metrics_snapshot().unwrap().bloom;
        assert_eq!(stats.queries, 1_000);
        assert!(stats.definitely_absent > 900, "{stats:?}");
        assert_eq!(stats.queries - stats.definitely_absent, stats.false_positives);
    }

    #[test]
    fn write_batch_applies_all_entries() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());
        seg.write_batch((0..50).map(|i| (i, value(i))).collect()).unwrap();
        assert_eq!(seg.key_count().unwrap(), 50);
        assert_eq!(seg.get(&49).unwrap(), Some(value(49)));

        let err = seg.write_batch(vec![(1, String::tombstone())]).unwrap_err();
        assert!(matches!(err, SegmentError::TombstoneValue));
    }
}
