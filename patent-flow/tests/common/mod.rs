#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patent_flow::{
    CorpusQuery, CorpusSource, Embedder, FlowError, RawRow, Result, TextGenerator, Turn,
};

/// Replays queued responses in order. An exhausted script is a generation failure.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String>>>,
    instructions: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            instructions: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn from_results(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            instructions: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn slow<I, S>(responses: I, delay: Duration) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            instructions: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.instructions.lock().unwrap().len()
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, instruction: &str, _turns: &[Turn]) -> Result<String> {
        self.instructions.lock().unwrap().push(instruction.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FlowError::GenerationFailure("script exhausted".into())))
    }
}

/// Bag-of-terms embedder: one dimension per vocabulary term.
pub struct TermEmbedder {
    vocabulary: Vec<&'static str>,
    batches: Mutex<Vec<usize>>,
}

impl TermEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            vocabulary: vec!["membrane", "fouling", "sensor", "battery", "learning"],
            batches: Mutex::new(Vec::new()),
        })
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for TermEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.lock().unwrap().push(texts.len());
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                self.vocabulary
                    .iter()
                    .map(|term| lower.matches(term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(FlowError::EmbeddingFailure("connection refused".into()))
    }
}

/// Fails the first `failures` fetches, then answers from `rows`.
pub struct FlakyCorpus {
    failures: Mutex<usize>,
    rows: Vec<RawRow>,
}

impl FlakyCorpus {
    pub fn new(failures: usize, rows: Vec<RawRow>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures),
            rows,
        })
    }
}

#[async_trait]
impl CorpusSource for FlakyCorpus {
    async fn fetch(&self, query: &CorpusQuery) -> Result<Vec<RawRow>> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(FlowError::QueryFailure("corpus unavailable".into()));
        }
        Ok(self.rows.iter().take(query.limit).cloned().collect())
    }
}

pub fn patent(id: &str, title: &str, abstract_text: &str, country: &str, date: &str) -> RawRow {
    RawRow {
        id: id.to_string(),
        title: Some(title.to_string()),
        abstract_text: Some(abstract_text.to_string()),
        publication_date: Some(date.to_string()),
        country_code: Some(country.to_string()),
        ipc_codes: vec!["C02F1/44,B01D61/02".to_string()],
        assignees: vec!["Sony".to_string()],
    }
}

/// Small corpus of water-treatment publications.
pub fn water_corpus() -> Vec<RawRow> {
    vec![
        patent(
            "JP-2021-0001",
            "Battery housing",
            "A battery housing with a cooling channel.",
            "JP",
            "2021-04-01",
        ),
        patent(
            "JP-2021-0002",
            "Fouling prediction for RO membranes",
            "A membrane fouling sensor feeds a learning model that predicts membrane fouling.",
            "JP",
            "2021-09-15",
        ),
        patent(
            "JP-2022-0003",
            "Membrane module",
            "A spiral wound membrane module.",
            "JP",
            "20220110",
        ),
        patent(
            "US-2022-0004",
            "Membrane fouling sensor",
            "A fouling sensor for membranes.",
            "US",
            "2022-02-01",
        ),
        patent(
            "JP-2019-0005",
            "Old membrane",
            "A membrane.",
            "JP",
            "2019-01-01",
        ),
    ]
}

pub const FIRST_EXTRACTION: &str = r#"{"keywords": ["reverse osmosis membrane", "machine learning"], "ipc_codes": ["B01D61/02", "C02F1/44", "G06N20/00"]}"#;

pub const SECOND_EXTRACTION: &str =
    r#"{"countries": ["JP"], "assignees": ["Sony"], "publication_from": "2021-01-01"}"#;
