//! Query stores: keyed, filterable storage for read-model rows.

mod memory;
mod postgres;

pub use memory::InMemoryQueryStore;
pub use postgres::PostgresQueryStore;

use async_trait::async_trait;
use common::AggregateId;
use event_store::CancellationToken;

use crate::Result;
use crate::query::{Query, QueryResults};
use crate::read_model::ReadModel;

/// Storage contract for the rows of one read model.
///
/// Every operation takes a [`CancellationToken`]; a cancelled call returns
/// `Cancelled` without changing any row.
#[async_trait]
pub trait QueryStore<R: ReadModel>: Send + Sync {
    async fn get(&self, id: AggregateId, cancel: &CancellationToken) -> Result<Option<R>>;

    /// Inserts the row or replaces the existing row with the same id.
    async fn upsert(&self, row: R, cancel: &CancellationToken) -> Result<()>;

    /// Removes the row. Returns false if there was none.
    async fn delete(&self, id: AggregateId, cancel: &CancellationToken) -> Result<bool>;

    /// Rows matching every filter of `query`, ordered by id and paged.
    async fn query(&self, query: Query, cancel: &CancellationToken) -> Result<QueryResults<R>>;

    /// Removes every row of this read model. Used when rebuilding.
    async fn clear(&self, cancel: &CancellationToken) -> Result<()>;

    #[cfg(any(test, feature = "test-support"))]
    async fn destroy_all(&self, cancel: &CancellationToken) -> Result<()> {
        self.clear(cancel).await
    }
}

#[async_trait]
impl<R, T> QueryStore<R> for std::sync::Arc<T>
where
    R: ReadModel,
    T: QueryStore<R> + ?Sized,
{
    async fn get(&self, id: AggregateId, cancel: &CancellationToken) -> Result<Option<R>> {
        (**self).get(id, cancel).await
    }

    async fn upsert(&self, row: R, cancel: &CancellationToken) -> Result<()> {
        (**self).upsert(row, cancel).await
    }

    async fn delete(&self, id: AggregateId, cancel: &CancellationToken) -> Result<bool> {
        (**self).delete(id, cancel).await
    }

    async fn query(&self, query: Query, cancel: &CancellationToken) -> Result<QueryResults<R>> {
        (**self).query(query, cancel).await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        (**self).clear(cancel).await
    }
}
