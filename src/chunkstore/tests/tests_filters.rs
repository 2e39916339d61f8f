#[cfg(test)]
mod tests {
    use crate::chunkstore::filters::{
        ChunkData, ChunkFilter, FLAG_CRC32, FLAG_LZ4, FLAG_MAGIC_NUMBER, FLAG_XOR, FilterError,
        decode_pipeline, encode_pipeline,
    };

    fn sample() -> Vec<u8> {
        b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec()
    }

    #[test]
    fn every_filter_sets_its_own_flag() {
        let data = encode_pipeline(
            &[
                ChunkFilter::MagicNumber,
                ChunkFilter::Crc32,
                ChunkFilter::Lz4,
                ChunkFilter::Xor(0xDEAD_BEEF),
            ],
            ChunkData::new(sample()),
        );
        assert_eq!(data.flags, FLAG_MAGIC_NUMBER | FLAG_CRC32 | FLAG_LZ4 | FLAG_XOR);
    }

    #[test]
    fn lz4_shrinks_repetitive_payloads() {
        let payload = vec![0x42u8; 4096];
        let data = ChunkFilter::Lz4.encode(ChunkData::new(payload.clone()));
        assert!(data.payload.len() < payload.len() / 4);
        assert_eq!(ChunkFilter::Lz4.decode(data).unwrap().payload, payload);
    }

    #[test]
    fn xor_changes_bytes_and_reverses() {
        let data = ChunkFilter::Xor(0x0102_0304_0506_0708).encode(ChunkData::new(sample()));
        assert_ne!(data.payload, sample());
        assert_eq!(
            ChunkFilter::Xor(0x0102_0304_0506_0708)
                .decode(data)
                .unwrap()
                .payload,
            sample()
        );
    }

    /// # Scenario
    /// A chunk obfuscated with one XOR key is decoded with another key,
    /// behind a magic-number stamp.
    ///
    /// # Expected behavior
    /// The stamp check catches the garbled payload.
    #[test]
    fn wrong_xor_key_is_caught_by_stamp() {
        let data = encode_pipeline(
            &[ChunkFilter::MagicNumber, ChunkFilter::Xor(1)],
            ChunkData::new(sample()),
        );
        let err = decode_pipeline(&[ChunkFilter::Xor(2), ChunkFilter::MagicNumber], data)
            .unwrap_err();
        assert!(matches!(err, FilterError::BadStamp(_)));
    }

    #[test]
    fn missing_flag_is_rejected() {
        let data = ChunkFilter::Identity.encode(ChunkData::new(sample()));
        assert_eq!(
            ChunkFilter::Crc32.decode(data).unwrap_err(),
            FilterError::MissingFlag { filter: "crc32" }
        );
    }

    #[test]
    fn crc_detects_payload_change() {
        let mut data = ChunkFilter::Crc32.encode(ChunkData::new(sample()));
        data.payload[3] ^= 1;
        assert!(matches!(
            ChunkFilter::Crc32.decode(data),
            Err(FilterError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn lz4_rejects_absurd_declared_size() {
        let mut data = ChunkFilter::Lz4.encode(ChunkData::new(sample()));
        data.payload[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            ChunkFilter::Lz4.decode(data),
            Err(FilterError::Decompress(_))
        ));
    }
}
