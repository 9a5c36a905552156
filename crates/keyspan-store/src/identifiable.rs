//! CRUD by primary key on top of [`Persistence`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tracing::{instrument, trace};

use keyspan_core::{IdGenerator, Row, UuidIdGenerator, Value};

use crate::error::StoreError;
use crate::persistence::{Persistence, Record};
use crate::statement::{placeholders_for, quote_identifier, RowBinding};

/// A record addressed by a single-column primary key.
pub trait Identifiable: Record {
    type Id: Clone + Into<Value> + fmt::Display + Send + Sync;

    /// Primary key column.
    const ID_COLUMN: &'static str = "id";

    /// `None` until an id is assigned.
    fn id(&self) -> Option<&Self::Id>;

    fn with_id(self, id: Self::Id) -> Self;
}

pub struct IdentifiablePersistence<T: Identifiable> {
    core: Persistence<T>,
    ids: Arc<dyn IdGenerator<T::Id>>,
}

impl<T: Identifiable> IdentifiablePersistence<T>
where
    UuidIdGenerator: IdGenerator<T::Id>,
{
    /// Missing ids are filled with time-ordered UUIDs.
    pub fn with_uuid_ids(core: Persistence<T>) -> Self {
        Self::new(core, Arc::new(UuidIdGenerator))
    }
}

impl<T: Identifiable> IdentifiablePersistence<T> {
    pub fn new(core: Persistence<T>, ids: Arc<dyn IdGenerator<T::Id>>) -> Self {
        Self { core, ids }
    }

    pub fn core(&self) -> &Persistence<T> {
        &self.core
    }

    fn id_column() -> String {
        quote_identifier(T::ID_COLUMN)
    }

    #[instrument(skip(self, id), fields(table = ?self.core.table(), id = %id))]
    pub async fn get_one_by_id(&self, trace_id: Option<&str>, id: &T::Id) -> Result<Option<T>, StoreError> {
        let (session, table) = self.core.target(trace_id)?;
        let query = format!("SELECT * FROM {table} WHERE {}=?", Self::id_column());
        let row = session.execute(&query, &[id.clone().into()]).await?.into_first();

        match row {
            Some(row) => {
                trace!(trace_id, table = %table, "retrieved item by id");
                T::from_row(row).map(Some)
            }
            None => {
                trace!(trace_id, table = %table, "nothing found by id");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, ids), fields(table = ?self.core.table(), ids = ids.len()))]
    pub async fn get_list_by_ids(&self, trace_id: Option<&str>, ids: &[T::Id]) -> Result<Vec<T>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let (session, table) = self.core.target(trace_id)?;
        let query = format!(
            "SELECT * FROM {table} WHERE {} IN({})",
            Self::id_column(),
            placeholders_for(ids.len())
        );
        let params: Vec<Value> = ids.iter().cloned().map(Into::into).collect();
        let result = session.execute(&query, &params).await?;

        let items = result
            .rows
            .into_iter()
            .map(T::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        trace!(trace_id, count = items.len(), table = %table, "retrieved items by ids");
        Ok(items)
    }

    /// Insert, assigning a generated id when the item has none.
    pub async fn create(&self, trace_id: Option<&str>, item: T) -> Result<T, StoreError> {
        let item = if item.id().is_some() {
            item
        } else {
            item.with_id(self.ids.next_id())
        };
        self.core.create(trace_id, item).await
    }

    /// Insert or overwrite. The store's INSERT already replaces a row with
    /// the same key.
    pub async fn set(&self, trace_id: Option<&str>, item: T) -> Result<T, StoreError> {
        self.create(trace_id, item).await
    }

    /// Overwrite the stored columns of an existing item. Returns `None`
    /// without touching the store when the item has no id.
    #[instrument(skip(self, item), fields(table = ?self.core.table()))]
    pub async fn update(&self, trace_id: Option<&str>, item: T) -> Result<Option<T>, StoreError> {
        let Some(id) = item.id().cloned() else {
            return Ok(None);
        };
        let mut row = item.to_row();
        row.remove(T::ID_COLUMN);
        self.update_columns(trace_id, &id, row).await?;
        trace!(trace_id, id = %id, "updated item");
        Ok(Some(item))
    }

    /// Set only the given columns, then reload the stored row.
    #[instrument(skip(self, id, data), fields(table = ?self.core.table(), id = %id))]
    pub async fn update_partially(&self, trace_id: Option<&str>, id: &T::Id, data: Row) -> Result<Option<T>, StoreError> {
        let mut row = T::convert_partial(data);
        row.remove(T::ID_COLUMN);
        self.update_columns(trace_id, id, row).await?;
        trace!(trace_id, "partially updated item");
        self.get_one_by_id(trace_id, id).await
    }

    async fn update_columns(&self, trace_id: Option<&str>, id: &T::Id, row: Row) -> Result<(), StoreError> {
        let (session, table) = self.core.target(trace_id)?;
        if row.is_empty() {
            return Ok(());
        }
        let mut binding = RowBinding::from_row(row);
        binding.values.push(id.clone().into());
        let query = format!(
            "UPDATE {table} SET {} WHERE {}=?",
            binding.set_clause,
            Self::id_column()
        );
        session.execute(&query, &binding.values).await?;
        Ok(())
    }

    /// Delete by id, returning the row as it was. Nothing is deleted when
    /// the id is unknown.
    #[instrument(skip(self, id), fields(table = ?self.core.table(), id = %id))]
    pub async fn delete_by_id(&self, trace_id: Option<&str>, id: &T::Id) -> Result<Option<T>, StoreError> {
        let Some(item) = self.get_one_by_id(trace_id, id).await? else {
            return Ok(None);
        };
        let (session, table) = self.core.target(trace_id)?;
        let query = format!("DELETE FROM {table} WHERE {}=?", Self::id_column());
        session.execute(&query, &[id.clone().into()]).await?;
        trace!(trace_id, table = %table, "deleted item by id");
        Ok(Some(item))
    }

    #[instrument(skip(self, ids), fields(table = ?self.core.table(), ids = ids.len()))]
    pub async fn delete_by_ids(&self, trace_id: Option<&str>, ids: &[T::Id]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let (session, table) = self.core.target(trace_id)?;
        let query = format!(
            "DELETE FROM {table} WHERE {} IN({})",
            Self::id_column(),
            placeholders_for(ids.len())
        );
        let params: Vec<Value> = ids.iter().cloned().map(Into::into).collect();
        session.execute(&query, &params).await?;
        trace!(trace_id, table = %table, "deleted items by ids");
        Ok(())
    }
}

impl<T: Identifiable> Deref for IdentifiablePersistence<T> {
    type Target = Persistence<T>;

    fn deref(&self) -> &Self::Target {
        &self.core
    }
}

impl<T: Identifiable> DerefMut for IdentifiablePersistence<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.core
    }
}
