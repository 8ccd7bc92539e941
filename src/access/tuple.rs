use crate::access::value::{deserialize_values, serialize_values, Value};
use crate::concurrency::transaction::TxnId;
use crate::storage::page::PageId;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Row identifier: the page a tuple lives on and its slot within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u16,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl PartialOrd for Rid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rid {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_id.0.cmp(&other.page_id.0) {
            Ordering::Equal => self.slot.cmp(&other.slot),
            other => other,
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id.0, self.slot)
    }
}

/// Per-tuple bookkeeping kept in the heap page next to the payload.
/// Deletion is logical: the tombstone is set and the slot is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    /// Transaction that wrote the current version.
    pub insert_txn: TxnId,
    /// Transaction that tombstoned the tuple, if any.
    pub delete_txn: TxnId,
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(insert_txn: TxnId) -> Self {
        Self {
            insert_txn,
            delete_txn: 0,
            is_deleted: false,
        }
    }
}

/// A row payload: the serialized column values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_values(values: &[Value]) -> Self {
        Self {
            data: serialize_values(values),
        }
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        deserialize_values(&self.data)
    }

    /// Value at column `index`.
    pub fn value_at(&self, index: usize) -> Result<Value> {
        let values = self.values()?;
        values
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("column index {} out of bounds", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rid_ordering() {
        let a = Rid::new(PageId(1), 5);
        let b = Rid::new(PageId(1), 10);
        let c = Rid::new(PageId(2), 3);

        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn test_tuple_values_roundtrip() -> Result<()> {
        let tuple = Tuple::from_values(&[Value::Int32(1), Value::String("x".into())]);
        assert_eq!(
            tuple.values()?,
            vec![Value::Int32(1), Value::String("x".into())]
        );
        assert_eq!(tuple.value_at(1)?, Value::String("x".into()));
        assert!(tuple.value_at(2).is_err());
        Ok(())
    }

    #[test]
    fn test_tuple_meta_defaults() {
        let meta = TupleMeta::new(42);
        assert_eq!(meta.insert_txn, 42);
        assert!(!meta.is_deleted);
    }
}
