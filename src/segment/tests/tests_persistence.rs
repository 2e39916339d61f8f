//! Durability across close and reopen.

#[cfg(test)]
mod tests {
    use crate::segment::properties::{PROPERTIES_FILENAME, delta_file};
    use crate::segment::tests::helpers::*;
    use crate::segment::{SegmentError, SegmentProperties};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn open_creates_directory_and_properties() {
        let tmp = TempDir::new().unwrap();
        let seg = open(tmp.path(), manual_conf());
        assert!(seg.dir().ends_with("segment-00001"));
        assert!(seg.dir().join(PROPERTIES_FILENAME).exists());
        assert!(collect(&seg).is_empty());
    }

    /// # Scenario
    /// Writes are flushed twice (key 1 in both files), then the segment is
    /// dropped without compaction and reopened.
    ///
    /// # Expected behavior
    /// The overflow files replay in order; key 1 holds the second value.
    #[test]
    fn flushed_writes_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let seg = open(tmp.path(), manual_conf());
            seg.put(1, "first".into()).unwrap();
            seg.put(2, "two".into()).unwrap();
            seg.flush().unwrap();
            seg.put(1, "second".into()).unwrap();
            seg.delete(2).unwrap();
            seg.flush().unwrap();

            let props = SegmentProperties::load(seg.dir()).unwrap().unwrap();
            assert_eq!(props.delta_files, vec![1, 2]);
            seg.close().unwrap();
        }

        let seg = open(tmp.path(), manual_conf());
        assert_eq!(seg.get(&1).unwrap().as_deref(), Some("second"));
        assert_eq!(seg.get(&2).unwrap(), None);
    }

    #[test]
    fn close_flushes_pending_writes() {
        let tmp = TempDir::new().unwrap();
        {
            let seg = open(tmp.path(), manual_conf());
            for i in 0..25 {
                seg.put(i, value(i)).unwrap();
            }
            seg.compact().unwrap();
            seg.put(99, value(99)).unwrap();
            seg.close().unwrap();
        }
        let seg = open(tmp.path(), manual_conf());
        assert_eq!(collect(&seg).len(), 26);
        assert_eq!(seg.get(&99).unwrap(), Some(value(99)));
    }

    #[test]
    fn drop_without_close_still_flushes() {
        let tmp = TempDir::new().unwrap();
        {
            let seg = open(tmp.path(), manual_conf());
            seg.put(7, "seven".into()).unwrap();
        }
        let seg = open(tmp.path(), manual_conf());
        assert_eq!(seg.get(&7).unwrap().as_deref(), Some("seven"));
    }

    /// # Scenario
    /// Stray files (an unreferenced overflow file, a leftover temp file and
    /// an old generation) sit in the segment directory.
    ///
    /// # Expected behavior
    /// Open deletes them and ignores their contents.
    #[test]
    fn orphans_are_removed_on_open() {
        let tmp = TempDir::new().unwrap();
        let dir = {
            let seg = open(tmp.path(), manual_conf());
            seg.put(1, "kept".into()).unwrap();
            seg.close().unwrap();
            seg.dir().to_path_buf()
        };
        let stray = [
            dir.join(delta_file(77)),
            dir.join("v000009.run.tmp"),
            dir.join("v000000.bloom"),
        ];
        for path in &stray {
            fs::write(path, b"junk").unwrap();
        }

        let seg = open(tmp.path(), manual_conf());
        for path in &stray {
            assert!(!path.exists(), "{} survived", path.display());
        }
        assert_eq!(seg.get(&1).unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn corrupt_properties_are_reported() {
        let tmp = TempDir::new().unwrap();
        let dir = {
            let seg = open(tmp.path(), manual_conf());
            seg.close().unwrap();
            seg.dir().to_path_buf()
        };
        let path = dir.join(PROPERTIES_FILENAME);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = crate::segment::Segment::<u32, String>::open(
            tmp.path(),
            crate::segment::SegmentId(1),
            manual_conf(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SegmentError::Corruption { .. }), "{err}");
    }

    #[test]
    fn automatic_flush_after_max_unflushed_keys() {
        let tmp = TempDir::new().unwrap();
        let conf = crate::config::SegmentConf {
            max_unflushed_keys: 5,
            ..manual_conf()
        };
        let seg = open(tmp.path(), conf);
        for i in 0..12 {
            seg.put(i, value(i)).unwrap();
        }
        let props = SegmentProperties::load(seg.dir()).unwrap().unwrap();
        assert_eq!(props.delta_files.len(), 2);
        assert_eq!(seg.metrics_snapshot().unwrap().flushes, 2);
    }
}
