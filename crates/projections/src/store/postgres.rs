use std::marker::PhantomData;

use async_trait::async_trait;
use common::AggregateId;
use event_store::{CancellationToken, cancellable};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::QueryStore;
use crate::query::{Query, QueryResults};
use crate::read_model::ReadModel;
use crate::Result;

/// PostgreSQL query store over the shared `read_models` table.
///
/// Each row is one JSONB document keyed by `(R::MODEL, id)`. Filters compare
/// `data -> field` with the JSON encoding of the filter value, so rows should
/// serialize every field (absent options as `null`).
pub struct PostgresQueryStore<R> {
    pool: PgPool,
    _model: PhantomData<fn() -> R>,
}

impl<R> Clone for PostgresQueryStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _model: PhantomData,
        }
    }
}

impl<R: ReadModel> PostgresQueryStore<R> {
    /// The `read_models` table is created by the event store migrations.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _model: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, query: &'a Query) {
        builder.push(" WHERE model = ").push_bind(R::MODEL);
        for (field, value) in query.filters() {
            builder
                .push(" AND data -> ")
                .push_bind(field.as_str())
                .push(" = ")
                .push_bind(value);
        }
    }
}

#[async_trait]
impl<R: ReadModel> QueryStore<R> for PostgresQueryStore<R> {
    async fn get(&self, id: AggregateId, cancel: &CancellationToken) -> Result<Option<R>> {
        cancellable(cancel, async {
            let data: Option<serde_json::Value> =
                sqlx::query_scalar("SELECT data FROM read_models WHERE model = $1 AND id = $2")
                    .bind(R::MODEL)
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            Ok(data.map(serde_json::from_value).transpose()?)
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(model = R::MODEL, id = %row.id()))]
    async fn upsert(&self, row: R, cancel: &CancellationToken) -> Result<()> {
        let data = serde_json::to_value(&row)?;

        cancellable(cancel, async {
            sqlx::query(
                r#"
                INSERT INTO read_models (model, id, data, updated_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (model, id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()
                "#,
            )
            .bind(R::MODEL)
            .bind(row.id().as_uuid())
            .bind(&data)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: AggregateId, cancel: &CancellationToken) -> Result<bool> {
        cancellable(cancel, async {
            let result = sqlx::query("DELETE FROM read_models WHERE model = $1 AND id = $2")
                .bind(R::MODEL)
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    #[tracing::instrument(skip_all, fields(model = R::MODEL, filters = query.filters().len()))]
    async fn query(&self, query: Query, cancel: &CancellationToken) -> Result<QueryResults<R>> {
        cancellable(cancel, async {
            let mut count = QueryBuilder::new("SELECT COUNT(*) FROM read_models");
            Self::push_filters(&mut count, &query);
            let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

            let mut select = QueryBuilder::new("SELECT data FROM read_models");
            Self::push_filters(&mut select, &query);
            select.push(" ORDER BY id");
            if let Some(limit) = query.take() {
                select.push(" LIMIT ").push_bind(limit as i64);
            }
            select.push(" OFFSET ").push_bind(query.skip() as i64);

            let documents: Vec<serde_json::Value> =
                select.build_query_scalar().fetch_all(&self.pool).await?;
            let rows = documents
                .into_iter()
                .map(serde_json::from_value)
                .collect::<serde_json::Result<Vec<R>>>()?;

            Ok(QueryResults {
                rows,
                total: total as usize,
                offset: query.skip(),
                limit: query.take(),
            })
        })
        .await
    }

    async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            sqlx::query("DELETE FROM read_models WHERE model = $1")
                .bind(R::MODEL)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}
