use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::{TableCapability, TableProperties, TableRow};
use kestrel_core::{StorageError, StorageResult};

type Rows = BTreeMap<(String, String), TableProperties>;

/// In-memory table service for testing and development. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryTableService {
    tables: Arc<RwLock<HashMap<String, Rows>>>,
    injected: Arc<Mutex<VecDeque<StorageError>>>,
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next calls fail with these errors, one per call, in order
    pub fn inject_failures<I: IntoIterator<Item = StorageError>>(&self, errors: I) {
        self.injected.lock().extend(errors);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |rows| rows.len())
    }

    fn begin(&self) -> StorageResult<()> {
        match self.injected.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn missing_table(table: &str) -> StorageError {
    StorageError::not_found(format!("table {}", table))
}

#[async_trait]
impl TableCapability for MemoryTableService {
    async fn create_table_if_not_exists(&self, table: &str) -> StorageResult<bool> {
        self.begin()?;
        let mut tables = self.tables.write();
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Rows::new());
        Ok(true)
    }

    async fn insert(&self, table: &str, row: TableRow) -> StorageResult<()> {
        self.begin()?;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        let key = (row.partition_key, row.row_key);
        if rows.contains_key(&key) {
            return Err(StorageError::remote(
                409,
                format!("entity {}/{} already exists", key.0, key.1),
            ));
        }
        rows.insert(key, row.properties);
        Ok(())
    }

    async fn insert_or_merge(&self, table: &str, row: TableRow) -> StorageResult<()> {
        self.begin()?;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        rows.entry((row.partition_key, row.row_key))
            .or_default()
            .extend(row.properties);
        Ok(())
    }

    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<TableRow>> {
        self.begin()?;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| missing_table(table))?;
        let key = (partition_key.to_string(), row_key.to_string());
        Ok(rows.get(&key).map(|properties| TableRow {
            partition_key: key.0.clone(),
            row_key: key.1.clone(),
            properties: properties.clone(),
        }))
    }

    async fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> StorageResult<()> {
        self.begin()?;
        let mut tables = self.tables.write();
        let rows = tables.get_mut(table).ok_or_else(|| missing_table(table))?;
        rows.remove(&(partition_key.to_string(), row_key.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(format!("{}/{}", partition_key, row_key)))
    }

    async fn query(&self, table: &str, partition_key: Option<&str>) -> StorageResult<Vec<TableRow>> {
        self.begin()?;
        let tables = self.tables.read();
        let rows = tables.get(table).ok_or_else(|| missing_table(table))?;
        Ok(rows
            .iter()
            .filter(|((pk, _), _)| partition_key.map_or(true, |wanted| pk == wanted))
            .map(|((pk, rk), properties)| TableRow {
                partition_key: pk.clone(),
                row_key: rk.clone(),
                properties: properties.clone(),
            })
            .collect())
    }
}
