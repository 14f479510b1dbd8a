//! Category consolidation pass
//!
//! After a scan the category set is usually noisy ("Finance/Invoice" next to
//! "Finance/Invoices"). One batched request shows the backend every category
//! with a few member filenames and asks for rename instructions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::client::ClassificationAdapter;
use super::config::ProviderConfig;
use super::prompts::{build_optimization_prompt, OPTIMIZE_SAMPLE_SIZE, OPTIMIZE_SYSTEM_PROMPT};
use super::provider::CompletionRequest;
use crate::error::Result;
use crate::scan::model::Row;
use crate::security::PathSanitizer;

/// One rename instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOptimization {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub reason: String,
}

/// Files grouped under one category
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryBranch {
    /// Display names (`proposed_name` + extension), in row order
    pub files: Vec<String>,
}

/// Category → member files, over rows that have a destination
pub fn category_tree(rows: &[Row]) -> BTreeMap<String, CategoryBranch> {
    let mut tree: BTreeMap<String, CategoryBranch> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.destination.is_some()) {
        tree.entry(row.category.clone())
            .or_default()
            .files
            .push(format!("{}{}", row.proposed_name, row.extension));
    }
    tree
}

/// Rewrite row categories in place.
///
/// The first instruction for a given `from` wins; later duplicates are
/// ignored. Rules are not chained: a row renamed by one rule is not renamed
/// again by a rule whose `from` matches the new name. Returns the number of
/// rows changed.
pub fn apply_optimizations(rows: &mut [Row], optimizations: &[CategoryOptimization]) -> usize {
    let mut rules: BTreeMap<&str, String> = BTreeMap::new();
    for opt in optimizations {
        let from = opt.from.trim();
        if from.is_empty() || rules.contains_key(from) {
            continue;
        }
        rules.insert(from, PathSanitizer::sanitize_dir_path(&opt.to));
    }

    let mut changed = 0;
    for row in rows.iter_mut() {
        if let Some(to) = rules.get(row.category.as_str()) {
            if row.category != *to {
                row.category = to.clone();
                changed += 1;
            }
        }
    }
    changed
}

pub struct CategoryOptimizer {
    adapter: Arc<ClassificationAdapter>,
}

impl CategoryOptimizer {
    pub fn new(adapter: Arc<ClassificationAdapter>) -> Self {
        Self { adapter }
    }

    /// Ask the backend for rename instructions.
    ///
    /// Only an invalid config is an error; transport and parse failures
    /// yield an empty list. Instructions whose `from` is not a current
    /// category are dropped.
    pub async fn optimize(
        &self,
        config: &ProviderConfig,
        tree: &BTreeMap<String, CategoryBranch>,
    ) -> Result<Vec<CategoryOptimization>> {
        config.validate()?;

        if tree.len() < 2 {
            return Ok(Vec::new());
        }

        let summary: Vec<(String, Vec<String>, usize)> = tree
            .iter()
            .map(|(category, branch)| {
                let samples = branch.files.iter().take(OPTIMIZE_SAMPLE_SIZE).cloned().collect();
                (category.clone(), samples, branch.files.len())
            })
            .collect();

        let prompt = build_optimization_prompt(&summary);
        let request = CompletionRequest {
            system: OPTIMIZE_SYSTEM_PROMPT,
            prompt: &prompt,
            image: None,
        };

        let value = match self.adapter.complete(config, &request).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(kind = e.kind(), "Category optimization failed: {}", e);
                return Ok(Vec::new());
            }
        };

        let known: HashSet<&str> = tree.keys().map(String::as_str).collect();
        let optimizations: Vec<CategoryOptimization> = parse_optimizations(&value)
            .into_iter()
            .filter(|o| known.contains(o.from.as_str()) && o.from != o.to)
            .collect();

        tracing::info!(
            categories = tree.len(),
            suggestions = optimizations.len(),
            "Category optimization finished"
        );
        Ok(optimizations)
    }
}

/// Accept `{"optimizations": [...]}` or a bare array; skip malformed entries.
fn parse_optimizations(value: &Value) -> Vec<CategoryOptimization> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("optimizations") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| serde_json::from_value::<CategoryOptimization>(item.clone()).ok())
        .map(|o| CategoryOptimization {
            from: o.from.trim().to_string(),
            to: o.to.trim().to_string(),
            reason: o.reason,
        })
        .filter(|o| !o.from.is_empty() && !o.to.is_empty())
        .collect()
}
