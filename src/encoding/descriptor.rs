//! Per-type contract for keys and values stored in sorted runs.

use std::fmt::Debug;

use super::{EncodingError, take_array};

/// Describes how a key or value type is ordered, serialized and deleted.
///
/// The storage layers never inspect values directly. Ordering comes from
/// [`Ord`], the byte form from [`write_bytes`](Self::write_bytes), and
/// deletions are modelled as a per-type sentinel returned by
/// [`tombstone`](Self::tombstone).
///
/// For key types the byte form should preserve ordering where possible
/// (big-endian integers, raw UTF-8), since neighbouring keys share
/// prefixes and the sorted run stores only the differing suffix.
pub trait TypeDescriptor: Ord + Clone + Debug + Send + Sync + 'static {
    /// Exact encoded width for fixed-size types, `None` otherwise.
    const FIXED_LEN: Option<usize>;

    /// Append the byte form of `self` to `out`.
    fn write_bytes(&self, out: &mut Vec<u8>);

    /// Rebuild a value from exactly the bytes produced by [`write_bytes`](Self::write_bytes).
    fn read_bytes(bytes: &[u8]) -> Result<Self, EncodingError>;

    /// The sentinel marking a deleted key.
    fn tombstone() -> Self;

    fn is_tombstone(&self) -> bool {
        *self == Self::tombstone()
    }

    /// Byte form of `self` in a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::FIXED_LEN.unwrap_or(16));
        self.write_bytes(&mut out);
        out
    }
}

fn fixed<const N: usize>(bytes: &[u8], type_name: &'static str) -> Result<[u8; N], EncodingError> {
    if bytes.len() != N {
        return Err(EncodingError::WidthMismatch {
            type_name,
            expected: N,
            actual: bytes.len(),
        });
    }
    take_array::<N>(bytes)
}

impl TypeDescriptor for u32 {
    const FIXED_LEN: Option<usize> = Some(4);

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(u32::from_be_bytes(fixed::<4>(bytes, "u32")?))
    }

    fn tombstone() -> Self {
        u32::MAX
    }
}

impl TypeDescriptor for u64 {
    const FIXED_LEN: Option<usize> = Some(8);

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_be_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(u64::from_be_bytes(fixed::<8>(bytes, "u64")?))
    }

    fn tombstone() -> Self {
        u64::MAX
    }
}

/// Signed integers flip the sign bit so the big-endian bytes sort like the numbers.
impl TypeDescriptor for i64 {
    const FIXED_LEN: Option<usize> = Some(8);

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&((*self as u64) ^ (1 << 63)).to_be_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        let raw = u64::from_be_bytes(fixed::<8>(bytes, "i64")?);
        Ok((raw ^ (1 << 63)) as i64)
    }

    fn tombstone() -> Self {
        i64::MIN
    }
}

const STRING_TOMBSTONE: &str = "\u{0}\u{7f}strata:tombstone\u{7f}\u{0}";

impl TypeDescriptor for String {
    const FIXED_LEN: Option<usize> = None;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn tombstone() -> Self {
        STRING_TOMBSTONE.to_string()
    }

    fn is_tombstone(&self) -> bool {
        self == STRING_TOMBSTONE
    }
}

const BYTES_TOMBSTONE: &[u8] = b"\x00\xffstrata:tombstone\xff\x00";

impl TypeDescriptor for Vec<u8> {
    const FIXED_LEN: Option<usize> = None;

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn read_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        Ok(bytes.to_vec())
    }

    fn tombstone() -> Self {
        BYTES_TOMBSTONE.to_vec()
    }

    fn is_tombstone(&self) -> bool {
        self.as_slice() == BYTES_TOMBSTONE
    }
}
