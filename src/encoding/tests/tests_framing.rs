//! Framing encoders used by headers and the properties file.

use crate::encoding::*;

#[test]
fn integers_are_little_endian() {
    let bytes = encode_to_vec(&0xDEAD_BEEFu32).unwrap();
    assert_eq!(bytes, [0xEF, 0xBE, 0xAD, 0xDE]);

    let (decoded, consumed) = decode_from_slice::<u64>(&[8, 7, 6, 5, 4, 3, 2, 1]).unwrap();
    assert_eq!(decoded, 0x0102_0304_0506_0708);
    assert_eq!(consumed, 8);
}

#[test]
fn short_buffer_reports_needed_bytes() {
    let err = decode_from_slice::<u64>(&[1, 2, 3]).unwrap_err();
    match err {
        EncodingError::UnexpectedEof { needed, available } => {
            assert_eq!(needed, 8);
            assert_eq!(available, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn bool_rejects_garbage_byte() {
    assert!(matches!(
        decode_from_slice::<bool>(&[2]),
        Err(EncodingError::InvalidBool(2))
    ));
}

#[test]
fn string_and_option_share_a_buffer() {
    let mut buf = Vec::new();
    "delta-000001.run".to_string().encode_to(&mut buf).unwrap();
    Some(42u64).encode_to(&mut buf).unwrap();
    None::<u32>.encode_to(&mut buf).unwrap();

    let (name, mut offset) = String::decode_from(&buf).unwrap();
    assert_eq!(name, "delta-000001.run");
    let (some, used) = Option::<u64>::decode_from(&buf[offset..]).unwrap();
    offset += used;
    let (none, used) = Option::<u32>::decode_from(&buf[offset..]).unwrap();
    offset += used;

    assert_eq!(some, Some(42));
    assert_eq!(none, None);
    assert_eq!(offset, buf.len());
}

#[test]
fn vec_of_strings_survives_encoding() {
    let names = vec!["a".to_string(), String::new(), "ccc".to_string()];
    let mut buf = Vec::new();
    encode_vec(&names, &mut buf).unwrap();
    let (decoded, consumed) = decode_vec::<String>(&buf).unwrap();
    assert_eq!(decoded, names);
    assert_eq!(consumed, buf.len());
}

#[test]
fn oversized_byte_length_is_rejected_before_allocation() {
    let mut buf = Vec::new();
    (MAX_BYTE_LEN + 1).encode_to(&mut buf).unwrap();
    assert!(matches!(
        Vec::<u8>::decode_from(&buf),
        Err(EncodingError::LengthOverflow(_))
    ));
}

#[test]
fn oversized_vec_count_is_rejected() {
    let mut buf = Vec::new();
    (MAX_VEC_ELEMENTS + 1).encode_to(&mut buf).unwrap();
    assert!(matches!(
        decode_vec::<u64>(&buf),
        Err(EncodingError::LengthOverflow(_))
    ));
}

#[test]
fn invalid_utf8_string_is_rejected() {
    let mut buf = Vec::new();
    vec![0xFFu8, 0xFE].encode_to(&mut buf).unwrap();
    assert!(matches!(
        String::decode_from(&buf),
        Err(EncodingError::InvalidUtf8(_))
    ));
}
