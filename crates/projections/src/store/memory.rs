use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use event_store::{CancellationToken, cancellable};
use tokio::sync::RwLock;

use super::QueryStore;
use crate::query::{Query, QueryResults};
use crate::read_model::ReadModel;
use crate::{ProjectionError, Result};

/// In-memory query store. Clones share the same rows.
#[derive(Clone)]
pub struct InMemoryQueryStore<R> {
    rows: Arc<RwLock<BTreeMap<AggregateId, R>>>,
}

impl<R> Default for InMemoryQueryStore<R> {
    fn default() -> Self {
        Self {
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<R: ReadModel> InMemoryQueryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl<R: ReadModel> QueryStore<R> for InMemoryQueryStore<R> {
    async fn get(&self, id: AggregateId, cancel: &CancellationToken) -> Result<Option<R>> {
        cancellable(cancel, async {
            Ok::<_, ProjectionError>(self.rows.read().await.get(&id).cloned())
        })
        .await
    }

    async fn upsert(&self, row: R, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            self.rows.write().await.insert(row.id(), row);
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: AggregateId, cancel: &CancellationToken) -> Result<bool> {
        cancellable(cancel, async {
            Ok::<_, ProjectionError>(self.rows.write().await.remove(&id).is_some())
        })
        .await
    }

    async fn query(&self, query: Query, cancel: &CancellationToken) -> Result<QueryResults<R>> {
        cancellable(cancel, async {
            let rows = self.rows.read().await;

            let mut matching = Vec::new();
            for row in rows.values() {
                if query.matches(&serde_json::to_value(row)?) {
                    matching.push(row);
                }
            }

            let total = matching.len();
            let page = matching
                .into_iter()
                .skip(query.skip())
                .take(query.take().unwrap_or(usize::MAX))
                .cloned()
                .collect();

            Ok(QueryResults {
                rows: page,
                total,
                offset: query.skip(),
                limit: query.take(),
            })
        })
        .await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            self.rows.write().await.clear();
            Ok(())
        })
        .await
    }
}
