//! Resolved stage parameters and stage results.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use crate::ParamValue;

/// The flat parameter map produced by the resolver. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParams(BTreeMap<String, ParamValue>);

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> BTreeMap<String, ParamValue> {
        self.0
    }

    /// Decode into a plugin-specific parameter struct.
    ///
    /// Absent fields are left out of the decoded object, so a struct field
    /// with `#[serde(default)]` takes its default and a required field fails
    /// with "missing field".
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .filter(|(_, v)| !v.is_absent())
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
    }
}

impl From<BTreeMap<String, ParamValue>> for ResolvedParams {
    fn from(map: BTreeMap<String, ParamValue>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ResolvedParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Structured output of a succeeded stage, keyed by result field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult(BTreeMap<String, ParamValue>);

impl StageResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a result from an executor's typed result struct.
    pub fn from_serialize<T: Serialize>(result: &T) -> serde_json::Result<Self> {
        match ParamValue::from_serialize(result)? {
            ParamValue::Map(fields) => Ok(Self(fields)),
            ParamValue::Absent => Ok(Self::default()),
            other => Ok(Self(BTreeMap::from([("value".to_string(), other)]))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&ParamValue> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for StageResult {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Terminal, non-failure states of an executor run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(StageResult),
    /// Stopped by cancellation. Carries no result and is not a failure.
    Canceled,
}

impl Outcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }
}
