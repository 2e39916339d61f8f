#[cfg(test)]
mod tests {
    use crate::fsutil::tmp_path_for;
    use crate::sortedrun::{RunConf, SortedRunError, SortedRunReader, SortedRunWriter};
    use std::fs;
    use tempfile::TempDir;

    fn conf() -> RunConf {
        RunConf {
            page_size: 4,
            block_size: 128,
            io_buffer_size: 1024,
            ..RunConf::default()
        }
    }

    /// # Scenario
    /// `b` is written before `a`.
    ///
    /// # Expected behavior
    /// The write fails and the error names both keys.
    #[test]
    fn descending_key_names_both_keys() {
        let tmp = TempDir::new().unwrap();
        let mut writer =
            SortedRunWriter::<String, u32>::create(tmp.path().join("run"), &conf()).unwrap();
        writer.put("b".to_string(), &1).unwrap();
        let err = writer.put("a".to_string(), &2).unwrap_err();
        match &err {
            SortedRunError::OutOfOrder { previous, inserted } => {
                assert_eq!(previous, "\"b\"");
                assert_eq!(inserted, "\"a\"");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("\"a\"") && message.contains("\"b\""), "{message}");
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SortedRunWriter::<u32, u32>::create(tmp.path().join("run"), &conf()).unwrap();
        writer.put(5, &1).unwrap();
        assert!(matches!(
            writer.put(5, &2),
            Err(SortedRunError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_empty_run() {
        let tmp = TempDir::new().unwrap();
        let reader =
            SortedRunReader::<u32, u32>::open(tmp.path().join("absent.run"), &conf()).unwrap();
        assert_eq!(reader.iter().count(), 0);
        assert_eq!(reader.get_in_page(0, &1).unwrap(), None);
    }

    #[test]
    fn empty_run_publishes_an_empty_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.run");
        let summary =
            SortedRunWriter::<u32, u32>::write_all(&path, &conf(), std::iter::empty()).unwrap();
        assert!(summary.index.is_empty());
        assert!(path.exists());
        let reader = SortedRunReader::<u32, u32>::open(&path, &conf()).unwrap();
        assert_eq!(reader.iter().count(), 0);
    }

    /// # Scenario
    /// A writer is dropped before `finish`.
    ///
    /// # Expected behavior
    /// Neither the target nor the temp file remains.
    #[test]
    fn abandoned_writer_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("abandoned.run");
        {
            let mut writer = SortedRunWriter::<u32, u32>::create(&path, &conf()).unwrap();
            for i in 0..100 {
                writer.put(i, &i).unwrap();
            }
        }
        assert!(!path.exists());
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn second_writer_for_same_target_is_busy() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("busy.run");
        let _first = SortedRunWriter::<u32, u32>::create(&path, &conf()).unwrap();
        assert!(matches!(
            SortedRunWriter::<u32, u32>::create(&path, &conf()),
            Err(SortedRunError::WriterBusy(_))
        ));
    }

    /// # Scenario
    /// The file is cut after its first block.
    ///
    /// # Expected behavior
    /// Opening fails loudly rather than returning a shortened run.
    #[test]
    fn truncated_run_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cut.run");
        SortedRunWriter::write_all(&path, &conf(), (0u64..200).map(|i| (i, i))).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..128 + 7]).unwrap();
        assert!(SortedRunReader::<u64, u64>::open(&path, &conf()).is_err());
    }

    /// # Scenario
    /// Overwrite the middle of the file so a later block fails its CRC.
    ///
    /// # Expected behavior
    /// Iteration yields the intact prefix, then exactly one error.
    #[test]
    fn corrupt_block_surfaces_during_iteration() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.run");
        SortedRunWriter::write_all(&path, &conf(), (0u64..400).map(|i| (i, i))).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let reader = SortedRunReader::<u64, u64>::open(&path, &conf()).unwrap();
        let results: Vec<_> = reader.iter().collect();
        let errors = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(errors, 1);
        assert!(results.last().unwrap().is_err());
        assert!(results.len() < 401);
    }
}
