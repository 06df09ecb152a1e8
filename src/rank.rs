use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::FixError;

/// One model offered by a provider's catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateModel {
    pub id: String,
    pub context_length: u64,
    /// Price per prompt token; `None` when the catalog gives no pricing.
    pub prompt_price: Option<f64>,
    pub completion_price: Option<f64>,
    /// Explicit free marker (a `:free` variant id).
    pub free: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

impl CandidateModel {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let free = id.ends_with(":free");
        Self {
            id,
            context_length: 0,
            prompt_price: None,
            completion_price: None,
            free,
            description: None,
            size_bytes: None,
            modified: None,
            family: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.free || self.prompt_price == Some(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Free first, largest context among them; then cheapest paid model.
    #[default]
    Price,
    /// Largest context window first; ties go to the cheaper model.
    Context,
    /// Catalog order.
    Default,
}

/// Order `catalog` by `key` and return at most `1 + max_fallbacks` ids:
/// the primary followed by its fallbacks.
pub fn rank(catalog: &[CandidateModel], key: SortKey, max_fallbacks: usize) -> Result<Vec<String>, FixError> {
    if catalog.is_empty() {
        return Err(FixError::NoCandidates);
    }
    let mut ordered: Vec<&CandidateModel> = catalog.iter().collect();
    sort_models(&mut ordered, key);
    Ok(ordered
        .into_iter()
        .take(max_fallbacks.saturating_add(1))
        .map(|m| m.id.clone())
        .collect())
}

/// Stable sort by `key`; also used by the catalog listing.
pub fn sort_models(models: &mut [&CandidateModel], key: SortKey) {
    match key {
        SortKey::Price => models.sort_by(|a, b| match (a.is_free(), b.is_free()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => b.context_length.cmp(&a.context_length),
            (false, false) => cmp_price(a.prompt_price, b.prompt_price)
                .then_with(|| b.context_length.cmp(&a.context_length)),
        }),
        SortKey::Context => models.sort_by(|a, b| {
            b.context_length
                .cmp(&a.context_length)
                .then_with(|| cmp_price(a.prompt_price, b.prompt_price))
        }),
        SortKey::Default => {}
    }
}

/// Unknown prices sort after every known price.
fn cmp_price(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Keep the free models of a remote catalog, dropping the auto-router entry
/// and entries without pricing.
pub fn free_models(catalog: Vec<CandidateModel>) -> Vec<CandidateModel> {
    catalog
        .into_iter()
        .filter(|m| m.id != "openrouter/auto")
        .filter(|m| m.prompt_price.is_some())
        .filter(CandidateModel::is_free)
        .collect()
}

/// Decode a remote catalog listing (`{"data":[{"id":..,"context_length":..,
/// "pricing":{"prompt":..}}]}` or a bare array). Prices may be strings.
pub fn parse_remote_catalog(body: &serde_json::Value) -> Vec<CandidateModel> {
    entries(body, "data")
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id")?.as_str()?;
            let mut model = CandidateModel::new(id);
            model.context_length = entry.get("context_length").and_then(as_u64).unwrap_or(0);
            if let Some(pricing) = entry.get("pricing") {
                model.prompt_price = pricing.get("prompt").and_then(as_f64);
                model.completion_price = pricing.get("completion").and_then(as_f64);
            }
            model.description = entry
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string);
            Some(model)
        })
        .collect()
}

/// Decode a local catalog listing (`{"models":[{"name":..,"size":..}]}` or a
/// bare array). Local models cost nothing.
pub fn parse_local_catalog(body: &serde_json::Value) -> Vec<CandidateModel> {
    entries(body, "models")
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            let mut model = CandidateModel::new(name);
            model.prompt_price = Some(0.0);
            model.size_bytes = entry.get("size").and_then(as_u64);
            model.modified = entry
                .get("modified_at")
                .or_else(|| entry.get("modified"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            model.family = entry
                .get("details")
                .and_then(|d| d.get("family"))
                .and_then(|f| f.as_str())
                .map(str::to_string);
            Some(model)
        })
        .collect()
}

fn entries<'a>(body: &'a serde_json::Value, key: &str) -> &'a [serde_json::Value] {
    body.get(key)
        .and_then(|v| v.as_array())
        .or_else(|| body.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_u64(v: &serde_json::Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}
