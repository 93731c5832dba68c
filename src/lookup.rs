//! Biomarker dictionary lookup
//!
//! The engine does not own the biomarker dictionary. It resolves display names
//! and categories through [`BiomarkerLookup`], keyed by the raw test-name text
//! printed on the lab report.

use crate::error::AnalysisError;
use crate::types::BiomarkerInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trait for biomarker dictionaries
pub trait BiomarkerLookup {
    /// Resolve raw report text to a display name and category
    fn lookup(&self, raw_text: &str) -> Option<BiomarkerInfo>;
}

impl<F> BiomarkerLookup for F
where
    F: Fn(&str) -> Option<BiomarkerInfo>,
{
    fn lookup(&self, raw_text: &str) -> Option<BiomarkerInfo> {
        self(raw_text)
    }
}

/// Lookup that never matches; names fall back to raw text
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl BiomarkerLookup for NoLookup {
    fn lookup(&self, _raw_text: &str) -> Option<BiomarkerInfo> {
        None
    }
}

/// One dictionary entry with the report spellings that map to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Alternative spellings seen on lab reports
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// In-memory dictionary matching raw text case-insensitively against names and aliases
#[derive(Debug, Clone, Default)]
pub struct BiomarkerDictionary {
    by_key: HashMap<String, BiomarkerInfo>,
}

fn normalize_key(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl BiomarkerDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry under its name and every alias
    pub fn insert(&mut self, entry: DictionaryEntry) {
        let info = BiomarkerInfo {
            name: entry.name.clone(),
            category: entry.category.clone(),
        };
        self.by_key.insert(normalize_key(&entry.name), info.clone());
        for alias in &entry.aliases {
            self.by_key.insert(normalize_key(alias), info.clone());
        }
    }

    /// Load a dictionary from a JSON array of entries
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let entries: Vec<DictionaryEntry> = serde_json::from_str(json)?;
        let mut dictionary = Self::new();
        for entry in entries {
            dictionary.insert(entry);
        }
        Ok(dictionary)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl BiomarkerLookup for BiomarkerDictionary {
    fn lookup(&self, raw_text: &str) -> Option<BiomarkerInfo> {
        self.by_key.get(&normalize_key(raw_text)).cloned()
    }
}
