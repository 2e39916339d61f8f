#[cfg(test)]
mod tests {
    use crate::blockstore::{BLOCK_HEADER_SIZE, BlockStoreError, BlockStoreReader, BlockStoreWriter};
    use tempfile::TempDir;
    use tracing::Level;
    use tracing_subscriber::fmt::Subscriber;

    const BLOCK: usize = 64;
    const PAYLOAD: usize = BLOCK - BLOCK_HEADER_SIZE;

    fn init_tracing() {
        let _ = Subscriber::builder()
            .with_max_level(Level::TRACE)
            .try_init();
    }

    /// # Scenario
    /// Two full blocks followed by a short final block.
    ///
    /// # Expected behavior
    /// The file is three blocks long, the short block comes back zero
    /// padded, and reading one past the end yields `None`.
    #[test]
    fn full_and_partial_blocks_read_back() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blocks.dat");

        let mut writer = BlockStoreWriter::create(&path, BLOCK, 1024).unwrap();
        writer.write(&[1u8; PAYLOAD]).unwrap();
        writer.write(&[2u8; PAYLOAD]).unwrap();
        writer.write(&[3u8; 10]).unwrap();
        assert_eq!(writer.block_count(), 3);
        writer.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * BLOCK as u64);

        let reader = BlockStoreReader::open(&path, BLOCK).unwrap();
        assert_eq!(reader.block_count(), 3);
        assert_eq!(reader.read(0).unwrap().unwrap().payload(), &[1u8; PAYLOAD]);
        assert_eq!(reader.read(1).unwrap().unwrap().payload(), &[2u8; PAYLOAD]);

        let tail = reader.read(2).unwrap().unwrap();
        assert_eq!(&tail.payload()[..10], &[3u8; 10]);
        assert!(tail.payload()[10..].iter().all(|&b| b == 0));

        assert!(reader.read(3).unwrap().is_none());
    }

    /// # Scenario
    /// A writer is closed without writing anything.
    ///
    /// # Expected behavior
    /// The file is empty and the first read is end-of-file.
    #[test]
    fn empty_file_has_no_blocks() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.dat");

        let mut writer = BlockStoreWriter::create(&path, BLOCK, 1024).unwrap();
        writer.close().unwrap();

        let reader = BlockStoreReader::open(&path, BLOCK).unwrap();
        assert_eq!(reader.block_count(), 0);
        assert!(reader.read(0).unwrap().is_none());
    }

    #[test]
    fn write_after_partial_block_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BlockStoreWriter::create(tmp.path().join("b.dat"), BLOCK, 1024).unwrap();
        writer.write(&[7u8; 5]).unwrap();
        assert!(matches!(
            writer.write(&[7u8; PAYLOAD]),
            Err(BlockStoreError::WriteAfterPartial(_))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BlockStoreWriter::create(tmp.path().join("b.dat"), BLOCK, 1024).unwrap();
        assert!(matches!(
            writer.write(&[0u8; PAYLOAD + 1]),
            Err(BlockStoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn double_close_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = BlockStoreWriter::create(tmp.path().join("b.dat"), BLOCK, 1024).unwrap();
        writer.close().unwrap();
        assert!(matches!(writer.close(), Err(BlockStoreError::Closed(_))));
        assert!(matches!(writer.write(&[0u8; 4]), Err(BlockStoreError::Closed(_))));
    }

    #[test]
    fn existing_file_is_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("b.dat");
        std::fs::write(&path, b"keep").unwrap();
        assert!(matches!(
            BlockStoreWriter::create(&path, BLOCK, 1024),
            Err(BlockStoreError::Io(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }

    #[test]
    fn misaligned_block_size_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            BlockStoreWriter::create(tmp.path().join("b.dat"), 100, 1024),
            Err(BlockStoreError::Config(_))
        ));
        assert!(matches!(
            BlockStoreWriter::create(tmp.path().join("c.dat"), BLOCK_HEADER_SIZE, 1024),
            Err(BlockStoreError::Config(_))
        ));
    }

    /// # Scenario
    /// Writer dropped without an explicit close.
    ///
    /// # Expected behavior
    /// Drop pads and flushes the partial block so the file stays readable.
    #[test]
    fn drop_closes_the_writer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dropped.dat");
        {
            let mut writer = BlockStoreWriter::create(&path, BLOCK, 1024).unwrap();
            writer.write(&[9u8; 3]).unwrap();
        }
        let reader = BlockStoreReader::open(&path, BLOCK).unwrap();
        assert_eq!(&reader.read(0).unwrap().unwrap().payload()[..3], &[9u8; 3]);
    }
}
