//! Corpus query contract: complete parameters in, bounded filter query out,
//! raw rows back in, normalized [`PatentRecord`]s out.

mod postgres;

pub use postgres::PostgresCorpus;

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{FlowError, Result},
    params::{SearchParameters, push_unique},
};

/// Default upper bound on rows fetched per search.
pub const DEFAULT_RESULT_CAP: usize = 100;

/// One filter of a [`CorpusQuery`]. All predicates of a query must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    IpcCodeIn(Vec<String>),
    CountryIn(Vec<String>),
    AssigneeIn(Vec<String>),
    PublishedOnOrAfter(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusQuery {
    pub predicates: Vec<Predicate>,
    pub limit: usize,
}

impl CorpusQuery {
    /// Conjunction of one predicate per filled filter field. Empty fields
    /// match everything on their dimension; keywords never filter.
    pub fn build(params: &SearchParameters, limit: usize) -> Self {
        let mut predicates = Vec::new();
        if !params.ipc_codes.is_empty() {
            predicates.push(Predicate::IpcCodeIn(params.ipc_codes.clone()));
        }
        if !params.countries.is_empty() {
            predicates.push(Predicate::CountryIn(params.countries.clone()));
        }
        if !params.assignees.is_empty() {
            predicates.push(Predicate::AssigneeIn(params.assignees.clone()));
        }
        if let Some(date) = params.publication_from {
            predicates.push(Predicate::PublishedOnOrAfter(date));
        }
        Self {
            predicates,
            limit: limit.max(1),
        }
    }
}

/// Row as returned by a corpus collaborator, before normalization.
///
/// Code and assignee columns may hold comma-aggregated values and the same
/// `id` may appear more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawRow {
    #[serde(alias = "publication_number")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub ipc_codes: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
}

/// A patent publication eligible for ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatentRecord {
    pub id: String,
    pub title: String,
    pub abstract_text: String,
    pub publication_date: Option<NaiveDate>,
    pub ipc_codes: Vec<String>,
    pub assignees: Vec<String>,
}

/// Accepts `YYYY-MM-DD` and the compact `YYYYMMDD` form.
pub fn parse_row_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .ok()
}

fn split_aggregated(values: &[String]) -> impl Iterator<Item = String> + '_ {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Coalesces raw rows into one record per id, in first-seen order.
pub fn normalize_rows(rows: Vec<RawRow>) -> Vec<PatentRecord> {
    let mut records: Vec<PatentRecord> = Vec::new();
    let mut dropped = 0usize;

    for row in rows {
        let id = row.id.trim().to_string();
        if id.is_empty() {
            dropped += 1;
            continue;
        }
        let title = non_empty(row.title);
        let abstract_text = non_empty(row.abstract_text);
        let date = row.publication_date.as_deref().and_then(parse_row_date);

        let index = match records.iter().position(|r| r.id == id) {
            Some(index) => index,
            None => {
                records.push(PatentRecord {
                    id,
                    title: String::new(),
                    abstract_text: String::new(),
                    publication_date: None,
                    ipc_codes: Vec::new(),
                    assignees: Vec::new(),
                });
                records.len() - 1
            }
        };
        let record = &mut records[index];

        if record.title.is_empty() {
            if let Some(title) = title {
                record.title = title.trim().to_string();
            }
        }
        if record.abstract_text.is_empty() {
            if let Some(text) = abstract_text {
                record.abstract_text = text.trim().to_string();
            }
        }
        if record.publication_date.is_none() {
            record.publication_date = date;
        }
        for code in split_aggregated(&row.ipc_codes) {
            push_unique(&mut record.ipc_codes, code);
        }
        for assignee in split_aggregated(&row.assignees) {
            push_unique(&mut record.assignees, assignee);
        }
    }

    if dropped > 0 {
        debug!(dropped, "Dropped corpus rows without an id");
    }
    records
}

/// Corpus collaborator. Zero rows is a valid answer, not an error.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn fetch(&self, query: &CorpusQuery) -> Result<Vec<RawRow>>;
}

/// Evaluates [`CorpusQuery`] over rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCorpus {
    rows: Vec<RawRow>,
}

impl InMemoryCorpus {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    /// Loads a JSON array of rows, e.g. an export of the publications table.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("could not read corpus file {}: {e}", path.display()))
        })?;
        let rows: Vec<RawRow> = serde_json::from_str(&body).map_err(|e| {
            FlowError::Config(format!("invalid corpus file {}: {e}", path.display()))
        })?;
        info!(rows = rows.len(), path = %path.display(), "Loaded in-memory corpus");
        Ok(Self::new(rows))
    }
}

fn any_in(values: &[String], set: &[String]) -> bool {
    split_aggregated(values).any(|value| set.contains(&value))
}

fn row_matches(row: &RawRow, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::IpcCodeIn(codes) => any_in(&row.ipc_codes, codes),
        Predicate::CountryIn(countries) => row
            .country_code
            .as_deref()
            .is_some_and(|code| countries.iter().any(|c| c.eq_ignore_ascii_case(code.trim()))),
        Predicate::AssigneeIn(assignees) => any_in(&row.assignees, assignees),
        Predicate::PublishedOnOrAfter(from) => row
            .publication_date
            .as_deref()
            .and_then(parse_row_date)
            .is_some_and(|date| date >= *from),
    }
}

#[async_trait]
impl CorpusSource for InMemoryCorpus {
    async fn fetch(&self, query: &CorpusQuery) -> Result<Vec<RawRow>> {
        let rows: Vec<RawRow> = self
            .rows
            .iter()
            .filter(|row| query.predicates.iter().all(|p| row_matches(row, p)))
            .take(query.limit)
            .cloned()
            .collect();
        debug!(rows = rows.len(), "In-memory corpus query evaluated");
        Ok(rows)
    }
}
