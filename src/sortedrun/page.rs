use std::marker::PhantomData;

use crate::encoding::{
    EncodingError, TypeDescriptor, decode_varint_len, encode_varint, require,
};

/// Accumulates one page of prefix-compressed entries.
#[derive(Default)]
pub(crate) struct PageEncoder {
    buf: Vec<u8>,
    prev_key: Vec<u8>,
    entries: usize,
}

impl PageEncoder {
    pub(crate) fn push<V: TypeDescriptor>(
        &mut self,
        key_bytes: &[u8],
        value: &V,
    ) -> Result<(), EncodingError> {
        let shared = self
            .prev_key
            .iter()
            .zip(key_bytes)
            .take_while(|(a, b)| a == b)
            .count();
        let suffix = &key_bytes[shared..];
        encode_varint(shared as u64, &mut self.buf);
        encode_varint(suffix.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(suffix);
        write_value(value, &mut self.buf)?;

        self.prev_key.clear();
        self.prev_key.extend_from_slice(key_bytes);
        self.entries += 1;
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Hands out the encoded page and resets the diff state.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        self.prev_key.clear();
        self.entries = 0;
        std::mem::take(&mut self.buf)
    }
}

fn write_value<V: TypeDescriptor>(value: &V, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    let start = buf.len();
    match V::FIXED_LEN {
        Some(width) => {
            value.write_bytes(buf);
            let actual = buf.len() - start;
            if actual != width {
                return Err(EncodingError::WidthMismatch {
                    type_name: std::any::type_name::<V>(),
                    expected: width,
                    actual,
                });
            }
        }
        None => {
            let bytes = value.to_bytes();
            encode_varint(bytes.len() as u64, buf);
            buf.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

/// Lazily decodes the entries of one page.
pub struct PageDecoder<'a, K, V> {
    buf: &'a [u8],
    offset: usize,
    prev_key: Vec<u8>,
    failed: bool,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<'a, K: TypeDescriptor, V: TypeDescriptor> PageDecoder<'a, K, V> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            prev_key: Vec::new(),
            failed: false,
            _types: PhantomData,
        }
    }

    fn decode_next(&mut self) -> Result<(K, V), EncodingError> {
        let (shared, n) = decode_varint_len(&self.buf[self.offset..])?;
        self.offset += n;
        let (suffix_len, n) = decode_varint_len(&self.buf[self.offset..])?;
        self.offset += n;

        if shared > self.prev_key.len() {
            return Err(EncodingError::LengthOverflow(format!(
                "shared prefix {shared} longer than previous key ({} bytes)",
                self.prev_key.len()
            )));
        }
        let rest = &self.buf[self.offset..];
        require(rest, suffix_len)?;
        self.prev_key.truncate(shared);
        self.prev_key.extend_from_slice(&rest[..suffix_len]);
        self.offset += suffix_len;
        let key = K::read_bytes(&self.prev_key)?;

        let value_len = match V::FIXED_LEN {
            Some(width) => width,
            None => {
                let (len, n) = decode_varint_len(&self.buf[self.offset..])?;
                self.offset += n;
                len
            }
        };
        let rest = &self.buf[self.offset..];
        require(rest, value_len)?;
        let value = V::read_bytes(&rest[..value_len])?;
        self.offset += value_len;

        Ok((key, value))
    }
}

impl<K: TypeDescriptor, V: TypeDescriptor> Iterator for PageDecoder<'_, K, V> {
    type Item = Result<(K, V), EncodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        let item = self.decode_next();
        self.failed = item.is_err();
        Some(item)
    }
}
