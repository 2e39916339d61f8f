#[cfg(test)]
mod tests {
    use crate::chunkstore::ChunkFilter;
    use crate::sortedrun::{RunConf, SortedRunReader, SortedRunWriter};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    fn small_conf(page_size: usize) -> RunConf {
        RunConf {
            page_size,
            block_size: 128,
            io_buffer_size: 1024,
            ..RunConf::default()
        }
    }

    /// # Scenario
    /// Ten string keys sharing long prefixes are written with three entries
    /// per page.
    ///
    /// # Expected behavior
    /// Iteration returns the exact sequence; the summary has one index entry
    /// per page carrying the page's last key, starting at offset 0.
    #[test]
    fn string_entries_read_back_in_order() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v000001.run");
        let conf = small_conf(3);

        let entries: Vec<(String, String)> = (0..10)
            .map(|i| (format!("customer:{i:04}"), format!("value-{i}")))
            .collect();
        let summary = SortedRunWriter::write_all(&path, &conf, entries.clone()).unwrap();

        assert_eq!(summary.entry_count, 10);
        assert_eq!(summary.index.len(), 4);
        assert_eq!(summary.index[0].1, 0);
        assert_eq!(summary.index[0].0, "customer:0002");
        assert_eq!(summary.index[3].0, "customer:0009");
        assert_eq!(summary.max_key().map(String::as_str), Some("customer:0009"));

        let reader = SortedRunReader::<String, String>::open(&path, &conf).unwrap();
        let read: Vec<_> = reader.iter().map(|e| e.unwrap()).collect();
        assert_eq!(read, entries);
    }

    #[test]
    fn point_lookup_inside_a_page() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run");
        let conf = small_conf(4);
        let summary =
            SortedRunWriter::write_all(&path, &conf, (0u32..20).map(|i| (i * 2, i * 100))).unwrap();

        let reader = SortedRunReader::<u32, u32>::open(&path, &conf).unwrap();
        let (_, second_page) = summary.index[1];
        assert_eq!(reader.get_in_page(second_page, &10).unwrap(), Some(500));
        assert_eq!(reader.get_in_page(second_page, &11).unwrap(), None);
        assert_eq!(reader.get_in_page(second_page, &40).unwrap(), None);

        let page = reader.read_page(second_page).unwrap();
        assert_eq!(page.first(), Some(&(8, 400)));
        assert_eq!(page.len(), 4);
    }

    /// # Scenario
    /// A few thousand random ascending byte keys with random values are
    /// written through the full filter pipeline including XOR.
    ///
    /// # Expected behavior
    /// The file reads back as the same sequence.
    #[test]
    fn random_ascending_entries_survive_the_pipeline() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("random.run");
        let conf = RunConf {
            encoding_filters: vec![
                ChunkFilter::MagicNumber,
                ChunkFilter::Crc32,
                ChunkFilter::Lz4,
                ChunkFilter::Xor(0x5EED),
            ],
            decoding_filters: vec![
                ChunkFilter::Xor(0x5EED),
                ChunkFilter::Lz4,
                ChunkFilter::Crc32,
                ChunkFilter::MagicNumber,
            ],
            ..small_conf(17)
        };

        let mut rng = StdRng::seed_from_u64(0xC0FFEE);
        let mut expected = BTreeMap::new();
        while expected.len() < 3000 {
            let len = rng.random_range(1..24);
            let key: Vec<u8> = (0..len).map(|_| rng.random_range(b'a'..=b'f')).collect();
            let value: Vec<u8> = (0..rng.random_range(0..40)).map(|_| rng.random()).collect();
            expected.insert(key, value);
        }

        SortedRunWriter::write_all(&path, &conf, expected.clone()).unwrap();
        let reader = SortedRunReader::<Vec<u8>, Vec<u8>>::open(&path, &conf).unwrap();
        let read: BTreeMap<_, _> = reader.iter().map(|e| e.unwrap()).collect();
        assert_eq!(read.len(), expected.len());
        assert!(reader.iter().map(|e| e.unwrap().0).eq(expected.keys().cloned()));
        assert_eq!(read, expected);
    }

    #[test]
    fn single_entry_run_has_single_index_entry() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("one.run");
        let conf = small_conf(8);
        let summary = SortedRunWriter::write_all(&path, &conf, [(7u64, 70u64)]).unwrap();
        assert_eq!(summary.index, vec![(7, 0)]);
    }
}
