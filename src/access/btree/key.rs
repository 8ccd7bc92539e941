//! Fixed-width, memcmp-ordered index keys.
//!
//! Keys are packed into a fixed buffer using order-preserving encodings so
//! the tree can compare raw bytes: signed integers get their sign bit
//! flipped and are laid out big-endian; strings contribute their leading
//! bytes. Composite keys pack fields left to right; a string field
//! consumes the rest of the buffer, so it must come last.

use crate::access::value::Value;
use anyhow::{bail, Result};

pub const INDEX_KEY_SIZE: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey([u8; INDEX_KEY_SIZE]);

impl IndexKey {
    /// Smallest possible key; used as the sentinel in internal slot 0.
    pub const MIN: IndexKey = IndexKey([0u8; INDEX_KEY_SIZE]);

    pub fn from_bytes(bytes: [u8; INDEX_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; INDEX_KEY_SIZE] {
        &self.0
    }

    pub fn from_i32(v: i32) -> Self {
        let mut buf = [0u8; INDEX_KEY_SIZE];
        buf[..4].copy_from_slice(&((v as u32) ^ 0x8000_0000).to_be_bytes());
        Self(buf)
    }

    /// Pack column values into a key.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        let mut buf = [0u8; INDEX_KEY_SIZE];
        let mut at = 0;
        for value in values {
            match value {
                Value::Null => {
                    // NULL sorts first: leave the field zeroed.
                    at += 4;
                }
                Value::Boolean(b) => {
                    if at + 1 > INDEX_KEY_SIZE {
                        bail!("index key overflows {} bytes", INDEX_KEY_SIZE);
                    }
                    buf[at] = 1 + *b as u8;
                    at += 1;
                }
                Value::Int32(v) => {
                    if at + 4 > INDEX_KEY_SIZE {
                        bail!("index key overflows {} bytes", INDEX_KEY_SIZE);
                    }
                    buf[at..at + 4].copy_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes());
                    at += 4;
                }
                Value::String(s) => {
                    let bytes = s.as_bytes();
                    let take = bytes.len().min(INDEX_KEY_SIZE - at);
                    buf[at..at + take].copy_from_slice(&bytes[..take]);
                    at = INDEX_KEY_SIZE;
                }
            }
            if at >= INDEX_KEY_SIZE {
                break;
            }
        }
        Ok(Self(buf))
    }
}

impl std::fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IndexKey(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}
