use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{error, info};

use super::{CorpusQuery, CorpusSource, Predicate, RawRow};
use crate::error::{FlowError, Result};

/// [`CorpusSource`] over a Postgres table of publications.
///
/// Expected columns: `id text`, `title text`, `abstract text`,
/// `publication_date date`, `country_code text`, `ipc_codes text[]`,
/// `assignees text[]`.
pub struct PostgresCorpus {
    pool: PgPool,
    table: String,
}

impl PostgresCorpus {
    pub async fn connect(database_url: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| FlowError::QueryFailure(format!("could not connect to corpus: {e}")))?;
        Self::with_pool(pool, table)
    }

    pub fn with_pool(pool: PgPool, table: &str) -> Result<Self> {
        if !is_valid_table_name(table) {
            return Err(FlowError::Config(format!("invalid corpus table name: {table}")));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

/// Table names are interpolated, not bound, so only plain identifiers pass.
fn is_valid_table_name(table: &str) -> bool {
    !table.is_empty()
        && table.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        })
}

fn build_select<'q>(table: &str, query: &'q CorpusQuery) -> QueryBuilder<'q, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "SELECT id, title, abstract AS abstract_text, \
         to_char(publication_date, 'YYYY-MM-DD') AS publication_date, \
         country_code, \
         COALESCE(ipc_codes, '{{}}') AS ipc_codes, \
         COALESCE(assignees, '{{}}') AS assignees \
         FROM {table}"
    ));

    for (i, predicate) in query.predicates.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        match predicate {
            Predicate::IpcCodeIn(codes) => {
                builder.push("ipc_codes && ").push_bind(codes.as_slice());
            }
            Predicate::CountryIn(countries) => {
                builder
                    .push("country_code = ANY(")
                    .push_bind(countries.as_slice())
                    .push(")");
            }
            Predicate::AssigneeIn(assignees) => {
                builder.push("assignees && ").push_bind(assignees.as_slice());
            }
            Predicate::PublishedOnOrAfter(date) => {
                builder
                    .push("publication_date >= ")
                    .push_bind(date.format("%Y-%m-%d").to_string())
                    .push("::date");
            }
        }
    }

    builder
        .push(" ORDER BY publication_date DESC NULLS LAST, id LIMIT ")
        .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));
    builder
}

#[async_trait]
impl CorpusSource for PostgresCorpus {
    async fn fetch(&self, query: &CorpusQuery) -> Result<Vec<RawRow>> {
        let mut builder = build_select(&self.table, query);
        let rows = builder
            .build_query_as::<RawRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Corpus query failed");
                FlowError::QueryFailure(e.to_string())
            })?;

        info!(
            rows = rows.len(),
            predicates = query.predicates.len(),
            "Retrieved rows from corpus"
        );
        Ok(rows)
    }
}
