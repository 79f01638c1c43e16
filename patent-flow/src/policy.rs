use serde::{Deserialize, Serialize};

use crate::params::SearchParameters;

/// One fillable field of [`SearchParameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    IpcCodes,
    Countries,
    Assignees,
    PublicationFrom,
    Keywords,
}

impl Slot {
    pub const ALL: [Slot; 5] = [
        Slot::IpcCodes,
        Slot::Countries,
        Slot::Assignees,
        Slot::PublicationFrom,
        Slot::Keywords,
    ];

    /// Key used for this slot in the extractor's JSON contract.
    pub fn key(self) -> &'static str {
        match self {
            Slot::IpcCodes => "ipc_codes",
            Slot::Countries => "countries",
            Slot::Assignees => "assignees",
            Slot::PublicationFrom => "publication_from",
            Slot::Keywords => "keywords",
        }
    }

    pub fn from_key(key: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| slot.key() == key)
    }

    pub fn label(self) -> &'static str {
        match self {
            Slot::IpcCodes => "IPC codes",
            Slot::Countries => "countries (two-letter codes)",
            Slot::Assignees => "assignees",
            Slot::PublicationFrom => "earliest publication date (YYYY-MM-DD)",
            Slot::Keywords => "keywords",
        }
    }

    /// Concrete value shown to the user when this slot is asked for.
    pub fn example(self) -> &'static str {
        match self {
            Slot::IpcCodes => "C02F1/44",
            Slot::Countries => "JP",
            Slot::Assignees => "Sony",
            Slot::PublicationFrom => "2021-01-01",
            Slot::Keywords => "reverse osmosis membrane",
        }
    }

    pub fn is_filled(self, params: &SearchParameters) -> bool {
        match self {
            Slot::IpcCodes => !params.ipc_codes.is_empty(),
            Slot::Countries => !params.countries.is_empty(),
            Slot::Assignees => !params.assignees.is_empty(),
            Slot::PublicationFrom => params.publication_from.is_some(),
            Slot::Keywords => !params.keywords.is_empty(),
        }
    }
}

/// Closed set of slots a dialog must fill before a search can run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessPolicy {
    required: Vec<Slot>,
    /// Show the collected parameters and wait for an explicit "yes"
    pub require_confirmation: bool,
    /// Answer the very first turn with related sub-topics instead of extracting
    pub suggest_topics_first: bool,
}

impl CompletenessPolicy {
    /// Builds a policy requiring `slots`. Order is kept for follow-up messages,
    /// duplicates are dropped.
    pub fn new(slots: impl IntoIterator<Item = Slot>) -> Self {
        let mut required = Vec::new();
        for slot in slots {
            if !required.contains(&slot) {
                required.push(slot);
            }
        }
        Self {
            required,
            require_confirmation: false,
            suggest_topics_first: false,
        }
    }

    pub fn ipc_only() -> Self {
        Self::new([Slot::IpcCodes])
    }

    pub fn full_search() -> Self {
        Self::new([
            Slot::IpcCodes,
            Slot::Countries,
            Slot::Assignees,
            Slot::PublicationFrom,
        ])
    }

    pub fn keyword_search() -> Self {
        Self::new([
            Slot::IpcCodes,
            Slot::Countries,
            Slot::PublicationFrom,
            Slot::Keywords,
        ])
    }

    /// Resolves a preset by the name used in configuration.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ipc-only" | "ipc_only" => Some(Self::ipc_only()),
            "full" | "full-search" | "full_search" => Some(Self::full_search()),
            "keywords" | "keyword-search" | "keyword_search" => Some(Self::keyword_search()),
            _ => None,
        }
    }

    pub fn with_confirmation(mut self, enabled: bool) -> Self {
        self.require_confirmation = enabled;
        self
    }

    pub fn with_topic_suggestion(mut self, enabled: bool) -> Self {
        self.suggest_topics_first = enabled;
        self
    }

    pub fn required(&self) -> &[Slot] {
        &self.required
    }

    pub fn missing(&self, params: &SearchParameters) -> Vec<Slot> {
        self.required
            .iter()
            .copied()
            .filter(|slot| !slot.is_filled(params))
            .collect()
    }

    pub fn is_complete(&self, params: &SearchParameters) -> bool {
        self.missing(params).is_empty()
    }
}

impl Default for CompletenessPolicy {
    fn default() -> Self {
        Self::full_search()
    }
}
