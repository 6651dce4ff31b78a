//! Edits on an existing map object's `spec.map`
//!
//! Maps are edited as unstructured JSON so fields this crate does not model
//! survive the round trip. Operations apply in a fixed order: remove, add,
//! update.

use crate::error::MappingError;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// One edit batch
#[derive(Debug, Clone, Default)]
pub struct MapPatch {
    /// Pairs appended unless their source is already mapped
    pub add: Vec<Value>,
    /// Pairs replacing the one with a matching source, else appended
    pub update: Vec<Value>,
    /// Source names or ids whose pairs are dropped
    pub remove: Vec<String>,
}

impl MapPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Serialize>(mut self, pairs: &[T]) -> Result<Self, MappingError> {
        for pair in pairs {
            self.add.push(serde_json::to_value(pair)?);
        }
        Ok(self)
    }

    pub fn update<T: Serialize>(mut self, pairs: &[T]) -> Result<Self, MappingError> {
        for pair in pairs {
            self.update.push(serde_json::to_value(pair)?);
        }
        Ok(self)
    }

    pub fn remove(mut self, sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.remove.extend(sources.into_iter().map(Into::into));
        self
    }
}

/// What a patch changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub removed: usize,
    pub added: usize,
    pub updated: usize,
    /// Sources skipped by `add` because they were already mapped
    pub skipped: Vec<String>,
}

fn source_field<'a>(pair: &'a Value, field: &str) -> Option<&'a str> {
    pair.get("source")?.get(field)?.as_str().filter(|s| !s.is_empty())
}

fn source_label(pair: &Value) -> String {
    source_field(pair, "name")
        .or_else(|| source_field(pair, "id"))
        .or_else(|| source_field(pair, "type"))
        .unwrap_or_default()
        .to_string()
}

/// Whether two pairs name the same source by id or by name.
fn same_source(a: &Value, b: &Value) -> bool {
    let same = |field: &str| matches!((source_field(a, field), source_field(b, field)), (Some(x), Some(y)) if x == y);
    same("id") || same("name")
}

fn names_source(pair: &Value, key: &str) -> bool {
    source_field(pair, "name") == Some(key) || source_field(pair, "id") == Some(key)
}

/// Apply `patch` to a map object in place.
pub fn apply_patch(map_object: &mut Value, patch: &MapPatch) -> Result<PatchReport, MappingError> {
    let spec = map_object
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| MappingError::InvalidMap("object has no spec".to_string()))?;
    let pairs = spec
        .entry("map")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| MappingError::InvalidMap("spec.map is not a list".to_string()))?;

    let mut report = PatchReport::default();

    let before = pairs.len();
    pairs.retain(|pair| !patch.remove.iter().any(|key| names_source(pair, key)));
    report.removed = before - pairs.len();

    for pair in &patch.add {
        if pairs.iter().any(|existing| same_source(existing, pair)) {
            let label = source_label(pair);
            warn!("Source {} is already mapped, skipping", label);
            report.skipped.push(label);
            continue;
        }
        pairs.push(pair.clone());
        report.added += 1;
    }

    for pair in &patch.update {
        match pairs.iter_mut().find(|existing| same_source(existing, pair)) {
            Some(existing) => *existing = pair.clone(),
            None => pairs.push(pair.clone()),
        }
        report.updated += 1;
    }

    Ok(report)
}
