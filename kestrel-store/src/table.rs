//! Typed entities in a partition/row keyed table.
//!
//! Entities are serialized to a JSON object of properties; the partition and
//! row keys come from [`TableEntity`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::types::type_table_name;
use kestrel_core::{RetryExecutor, StorageError, StorageResult};

pub type TableProperties = serde_json::Map<String, serde_json::Value>;

/// An entity addressable by partition key and row key
pub trait TableEntity: Serialize + DeserializeOwned + Send + Sync {
    fn partition_key(&self) -> &str;
    fn row_key(&self) -> &str;
}

/// Untyped row as stored by a table service
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub properties: TableProperties,
}

impl TableRow {
    pub fn from_entity<E: TableEntity>(entity: &E) -> StorageResult<Self> {
        match serde_json::to_value(entity).map_err(StorageError::serialization)? {
            serde_json::Value::Object(properties) => Ok(Self {
                partition_key: entity.partition_key().to_string(),
                row_key: entity.row_key().to_string(),
                properties,
            }),
            other => Err(StorageError::Serialization(format!(
                "table entities must serialize to an object, got {}",
                other
            ))),
        }
    }

    pub fn into_entity<E: TableEntity>(self) -> StorageResult<E> {
        serde_json::from_value(serde_json::Value::Object(self.properties))
            .map_err(StorageError::serialization)
    }
}

/// Remote table service operations
#[async_trait]
pub trait TableCapability: Send + Sync {
    /// Returns `true` when the table was created
    async fn create_table_if_not_exists(&self, table: &str) -> StorageResult<bool>;

    /// Conflict if the row already exists
    async fn insert(&self, table: &str, row: TableRow) -> StorageResult<()>;

    /// Insert, or merge properties into the existing row
    async fn insert_or_merge(&self, table: &str, row: TableRow) -> StorageResult<()>;

    async fn retrieve(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> StorageResult<Option<TableRow>>;

    /// NotFound if the row does not exist
    async fn delete(&self, table: &str, partition_key: &str, row_key: &str) -> StorageResult<()>;

    /// All rows, or the rows of one partition, ordered by keys
    async fn query(&self, table: &str, partition_key: Option<&str>) -> StorageResult<Vec<TableRow>>;
}

/// Typed view over one table
pub struct Table<E> {
    tables: Arc<dyn TableCapability>,
    name: String,
    retry: RetryExecutor,
    _marker: PhantomData<fn() -> E>,
}

impl<E: TableEntity> Table<E> {
    pub fn new<B, S>(tables: B, name: S) -> Self
    where
        B: TableCapability + 'static,
        S: Into<String>,
    {
        Self::shared(Arc::new(tables), name)
    }

    pub fn shared<S: Into<String>>(tables: Arc<dyn TableCapability>, name: S) -> Self {
        Self {
            tables,
            name: name.into(),
            retry: RetryExecutor::default(),
            _marker: PhantomData,
        }
    }

    /// Table named after `E`
    pub fn for_type<B: TableCapability + 'static>(tables: B) -> Self {
        Self::new(tables, type_table_name::<E>())
    }

    pub fn with_retry_executor(mut self, retry: RetryExecutor) -> Self {
        self.retry = retry;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(table = %self.name))]
    pub async fn ensure_exists(&self) -> StorageResult<()> {
        let tables = &self.tables;
        let name = self.name.as_str();
        let created = self
            .retry
            .execute(|| tables.create_table_if_not_exists(name))
            .await?;
        if created {
            debug!("table created");
        }
        Ok(())
    }

    /// Insert a new entity; an existing row is a conflict
    pub async fn add(&self, entity: &E) -> StorageResult<()> {
        let row = TableRow::from_entity(entity)?;
        let tables = &self.tables;
        let name = self.name.as_str();
        self.retry.execute(|| tables.insert(name, row.clone())).await
    }

    /// Insert each entity in order, stopping at the first failure
    pub async fn add_many<'a, I>(&self, entities: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a E>,
        E: 'a,
    {
        for entity in entities {
            self.add(entity).await?;
        }
        Ok(())
    }

    /// Insert, or merge into the existing row
    pub async fn add_or_update(&self, entity: &E) -> StorageResult<()> {
        let row = TableRow::from_entity(entity)?;
        let tables = &self.tables;
        let name = self.name.as_str();
        self.retry
            .execute(|| tables.insert_or_merge(name, row.clone()))
            .await
    }

    pub async fn add_or_update_many<'a, I>(&self, entities: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a E>,
        E: 'a,
    {
        for entity in entities {
            self.add_or_update(entity).await?;
        }
        Ok(())
    }

    pub async fn get(&self, partition_key: &str, row_key: &str) -> StorageResult<Option<E>> {
        let tables = &self.tables;
        let name = self.name.as_str();
        self.retry
            .execute(|| tables.retrieve(name, partition_key, row_key))
            .await?
            .map(TableRow::into_entity)
            .transpose()
    }

    /// Delete the entity's row if present
    #[instrument(skip(self, entity), fields(table = %self.name, partition_key = entity.partition_key(), row_key = entity.row_key()))]
    pub async fn delete(&self, entity: &E) -> StorageResult<()> {
        let tables = &self.tables;
        let name = self.name.as_str();
        let (pk, rk) = (entity.partition_key(), entity.row_key());

        let existing = self.retry.execute(|| tables.retrieve(name, pk, rk)).await?;
        if existing.is_none() {
            debug!("row already gone");
            return Ok(());
        }

        match self.retry.execute(|| tables.delete(name, pk, rk)).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn delete_many<'a, I>(&self, entities: I) -> StorageResult<()>
    where
        I: IntoIterator<Item = &'a E>,
        E: 'a,
    {
        for entity in entities {
            self.delete(entity).await?;
        }
        Ok(())
    }

    /// Every entity in the table
    pub async fn query(&self) -> StorageResult<Vec<E>> {
        self.query_rows(None).await
    }

    pub async fn query_partition(&self, partition_key: &str) -> StorageResult<Vec<E>> {
        self.query_rows(Some(partition_key)).await
    }

    async fn query_rows(&self, partition_key: Option<&str>) -> StorageResult<Vec<E>> {
        let tables = &self.tables;
        let name = self.name.as_str();
        self.retry
            .execute(|| tables.query(name, partition_key))
            .await?
            .into_iter()
            .map(TableRow::into_entity)
            .collect()
    }
}
