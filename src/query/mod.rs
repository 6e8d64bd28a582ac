use std::marker::PhantomData;

use serde::Serialize;
use serde_json::Value;

use crate::connection::Connection;
use crate::core::Result;
use crate::index::IndexModel;

/// Equality-filtered query over the persisted rows of one index.
///
/// Obtained from [`DocumentSession::query`], which flushes pending session
/// work first, so the query sees session-local writes inside the open
/// transaction.
///
/// [`DocumentSession::query`]: crate::session::DocumentSession::query
pub struct IndexQuery<'a, I> {
    conn: &'a mut dyn Connection,
    filters: Vec<(String, Value)>,
    _marker: PhantomData<fn() -> I>,
}

impl<'a, I: IndexModel> IndexQuery<'a, I> {
    pub(crate) fn new(conn: &'a mut dyn Connection) -> Self {
        Self {
            conn,
            filters: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Adds a `field == value` condition over the serialized row form.
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.filters.push((field.into(), serde_json::to_value(value)?));
        Ok(self)
    }

    /// Fetches all matching rows.
    pub async fn list(self) -> Result<Vec<I>> {
        let records = self.conn.fetch_index_rows(I::index_name(), &self.filters).await?;
        records
            .into_iter()
            .map(|record| Ok(serde_json::from_value(record.data)?))
            .collect()
    }

    /// Fetches the first matching row, if any.
    pub async fn first(self) -> Result<Option<I>> {
        Ok(self.list().await?.into_iter().next())
    }
}
