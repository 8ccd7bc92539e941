//! Minimal catalog: oid-keyed registries for tables and their indexes.
//!
//! Schema resolution and persistence of catalog metadata live outside this
//! crate; executors only need to map oids to heaps, schemas, and indexes.

use crate::access::btree::key::IndexKey;
use crate::access::btree::BPlusTree;
use crate::access::heap::TableHeap;
use crate::access::tuple::Tuple;
use crate::access::value::DataType;
use crate::storage::buffer::BufferPoolManager;
use anyhow::{bail, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub type TableOid = u32;
pub type IndexOid = u32;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: TableHeap,
}

pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_oid: TableOid,
    /// Column positions in the table schema that form the index key.
    pub key_attrs: Vec<usize>,
    pub index: BPlusTree,
}

impl IndexInfo {
    /// Build the index key for a table tuple.
    pub fn key_from_tuple(&self, tuple: &Tuple) -> Result<IndexKey> {
        let values = tuple.values()?;
        let mut key_values = Vec::with_capacity(self.key_attrs.len());
        for &attr in &self.key_attrs {
            let value = values
                .get(attr)
                .ok_or_else(|| anyhow::anyhow!("key column {} out of bounds", attr))?;
            key_values.push(value.clone());
        }
        IndexKey::from_values(&key_values)
    }
}

pub struct Catalog {
    buffer_pool: BufferPoolManager,
    tables: DashMap<TableOid, Arc<TableInfo>>,
    table_names: DashMap<String, TableOid>,
    indexes: DashMap<IndexOid, Arc<IndexInfo>>,
    index_names: DashMap<String, IndexOid>,
    table_indexes: DashMap<TableOid, Vec<IndexOid>>,
    next_oid: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            tables: DashMap::new(),
            table_names: DashMap::new(),
            indexes: DashMap::new(),
            index_names: DashMap::new(),
            table_indexes: DashMap::new(),
            next_oid: AtomicU32::new(0),
        }
    }

    pub fn create_table(&self, name: impl Into<String>, schema: Schema) -> Result<Arc<TableInfo>> {
        let name = name.into();
        if self.table_names.contains_key(&name) {
            bail!("table '{}' already exists", name);
        }

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let heap = TableHeap::create(self.buffer_pool.clone())?;
        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema,
            heap,
        });
        self.tables.insert(oid, Arc::clone(&info));
        self.table_names.insert(name, oid);
        self.table_indexes.insert(oid, Vec::new());
        Ok(info)
    }

    pub fn table(&self, oid: TableOid) -> Result<Arc<TableInfo>> {
        self.tables
            .get(&oid)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| anyhow::anyhow!("no table with oid {}", oid))
    }

    pub fn table_by_name(&self, name: &str) -> Result<Arc<TableInfo>> {
        let oid = self
            .table_names
            .get(name)
            .map(|e| *e)
            .ok_or_else(|| anyhow::anyhow!("table '{}' not found", name))?;
        self.table(oid)
    }

    /// Create a B+Tree index over `key_attrs` of an existing table and
    /// backfill it from the live tuples in the heap.
    pub fn create_index(
        &self,
        name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
        leaf_max_size: u16,
        internal_max_size: u16,
    ) -> Result<Arc<IndexInfo>> {
        let name = name.into();
        if self.index_names.contains_key(&name) {
            bail!("index '{}' already exists", name);
        }
        let table = self.table_by_name(table_name)?;
        for &attr in &key_attrs {
            if attr >= table.schema.len() {
                bail!("key column {} out of bounds for '{}'", attr, table_name);
            }
        }

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let index = BPlusTree::create(self.buffer_pool.clone(), leaf_max_size, internal_max_size)?;
        let info = Arc::new(IndexInfo {
            oid,
            name: name.clone(),
            table_oid: table.oid,
            key_attrs,
            index,
        });

        for entry in table.heap.iter() {
            let (rid, meta, tuple) = entry?;
            if meta.is_deleted {
                continue;
            }
            let key = info.key_from_tuple(&tuple)?;
            info.index.insert(&key, rid)?;
        }

        self.indexes.insert(oid, Arc::clone(&info));
        self.index_names.insert(name, oid);
        self.table_indexes
            .entry(table.oid)
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn index(&self, oid: IndexOid) -> Result<Arc<IndexInfo>> {
        self.indexes
            .get(&oid)
            .map(|e| Arc::clone(&e))
            .ok_or_else(|| anyhow::anyhow!("no index with oid {}", oid))
    }

    pub fn index_by_name(&self, name: &str) -> Result<Arc<IndexInfo>> {
        let oid = self
            .index_names
            .get(name)
            .map(|e| *e)
            .ok_or_else(|| anyhow::anyhow!("index '{}' not found", name))?;
        self.index(oid)
    }

    /// Every index on a table.
    pub fn table_indexes(&self, oid: TableOid) -> Vec<Arc<IndexInfo>> {
        self.table_indexes
            .get(&oid)
            .map(|oids| {
                oids.iter()
                    .filter_map(|index_oid| {
                        self.indexes.get(index_oid).map(|e| Arc::clone(&e))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::tuple::TupleMeta;
    use crate::access::value::Value;
    use crate::storage::buffer::lru_k::LruKReplacer;
    use crate::storage::disk::DiskManager;
    use tempfile::tempdir;

    fn create_test_catalog() -> Result<Catalog> {
        let dir = tempdir()?;
        let file_path = dir.path().join("test.db");
        let disk = DiskManager::create(&file_path)?;
        std::mem::forget(dir);
        let pool = BufferPoolManager::new(disk, Box::new(LruKReplacer::new(64, 2)), 64);
        Ok(Catalog::new(pool))
    }

    fn users_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int32),
            Column::new("name", DataType::Varchar),
        ])
    }

    #[test]
    fn test_create_and_lookup_table() -> Result<()> {
        let catalog = create_test_catalog()?;

        let info = catalog.create_table("users", users_schema())?;
        assert_eq!(info.name, "users");
        assert_eq!(catalog.table(info.oid)?.oid, info.oid);
        assert_eq!(catalog.table_by_name("users")?.oid, info.oid);

        assert!(catalog.create_table("users", users_schema()).is_err());
        assert!(catalog.table_by_name("missing").is_err());
        Ok(())
    }

    #[test]
    fn test_create_index_backfills() -> Result<()> {
        let catalog = create_test_catalog()?;
        let table = catalog.create_table("users", users_schema())?;

        let meta = TupleMeta::new(1);
        for i in 0..20 {
            let tuple = Tuple::from_values(&[
                Value::Int32(i),
                Value::String(format!("user-{}", i)),
            ]);
            table.heap.insert_tuple(&meta, &tuple)?;
        }

        let index = catalog.create_index("users_by_id", "users", vec![0], 8, 8)?;
        for i in 0..20 {
            let key = IndexKey::from_values(&[Value::Int32(i)])?;
            assert!(index.index.get(&key)?.is_some(), "key {}", i);
        }

        assert_eq!(catalog.table_indexes(table.oid).len(), 1);
        assert_eq!(catalog.index_by_name("users_by_id")?.oid, index.oid);
        Ok(())
    }

    #[test]
    fn test_index_key_attr_validation() -> Result<()> {
        let catalog = create_test_catalog()?;
        catalog.create_table("users", users_schema())?;
        assert!(catalog
            .create_index("bad", "users", vec![5], 8, 8)
            .is_err());
        Ok(())
    }
}
