//! Merging of independent rounds into combined statistics.

use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{error::BenchError, outcome::value_as_f64, round::RoundResult};

/// Value of the varying dimension a row is keyed on.
///
/// Numeric strings are read as numbers so `"10"` and `10` land on the same row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionKey {
    Number(f64),
    Text(String),
}

impl DimensionKey {
    pub fn number(value: f64) -> Self {
        // -0.0 and 0.0 must compare equal.
        Self::Number(if value == 0.0 { 0.0 } else { value })
    }

    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        if let Some(n) = value_as_f64(value) {
            return Some(Self::number(n));
        }
        match value {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(Self::Text(s.trim().to_string())),
            serde_json::Value::Bool(b) => Some(Self::Text(b.to_string())),
            _ => None,
        }
    }
}

impl PartialEq for DimensionKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DimensionKey {}

impl PartialOrd for DimensionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DimensionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One round's contribution to a statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundValue {
    pub round: u32,
    pub value: f64,
}

/// Statistic over the rounds that actually sampled a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedStat {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
    pub values: Vec<RoundValue>,
}

impl KeyedStat {
    pub fn from_values(values: Vec<RoundValue>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().map(|v| v.value).sum();
        let min = values.iter().map(|v| v.value).fold(f64::INFINITY, f64::min);
        let max = values.iter().map(|v| v.value).fold(f64::NEG_INFINITY, f64::max);
        Some(Self { avg: sum / values.len() as f64, min, max, samples: values.len(), values })
    }
}

/// A payload field tracked across rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub field: String,
    /// Column label; defaults to the field name with its first letter capitalised.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl FieldSpec {
    pub fn new(field: &str, label: &str, unit: &str) -> Self {
        Self { field: field.into(), label: Some(label.into()), unit: Some(unit.into()) }
    }

    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| capitalize(&self.field))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map(|c| c.to_uppercase().chain(chars).collect()).unwrap_or_default()
}

/// A dimension to tabulate: which category to read, which payload field is
/// the key and which fields are the values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub name: String,
    pub category: String,
    pub key_field: String,
    #[serde(default)]
    pub key_label: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl DimensionSpec {
    pub fn key_label(&self) -> String {
        self.key_label.clone().unwrap_or_else(|| capitalize(&self.key_field))
    }
}

/// Per-key row of a dimension table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRow {
    pub key: DimensionKey,
    /// Rounds that sampled this key.
    pub rounds: Vec<u32>,
    pub fields: BTreeMap<String, KeyedStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionTable {
    pub spec: DimensionSpec,
    pub rows: Vec<DimensionRow>,
}

/// Category metrics merged by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAggregate {
    pub rounds: Vec<u32>,
    pub metrics: BTreeMap<String, KeyedStat>,
}

/// A round source that was left out of the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationGap {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDocument {
    pub generated_at: DateTime<Utc>,
    pub rounds_included: Vec<u32>,
    pub gaps: Vec<AggregationGap>,
    pub categories: BTreeMap<String, CategoryAggregate>,
    pub dimensions: Vec<DimensionTable>,
}

/// A round as handed to the aggregator: loaded, or the reason it could not be.
#[derive(Debug)]
pub struct RoundSource {
    pub label: String,
    pub round: Result<RoundResult, BenchError>,
}

impl RoundSource {
    pub fn loaded(label: impl Into<String>, round: RoundResult) -> Self {
        Self { label: label.into(), round: Ok(round) }
    }
}

/// Merges rounds by key equality, never by position.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    dimensions: Vec<DimensionSpec>,
}

impl Aggregator {
    pub const fn new(dimensions: Vec<DimensionSpec>) -> Self {
        Self { dimensions }
    }

    pub fn aggregate(
        &self,
        sources: impl IntoIterator<Item = RoundSource>,
    ) -> Result<AggregateDocument, BenchError> {
        let mut rounds = Vec::new();
        let mut gaps = Vec::new();
        for source in sources {
            match source.round {
                Ok(round) => rounds.push(round),
                Err(e) => {
                    let gap = BenchError::AggregationGap {
                        source_label: source.label.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %gap, "Excluding round from aggregate");
                    gaps.push(AggregationGap { source: source.label, reason: e.to_string() });
                }
            }
        }

        if rounds.is_empty() {
            return Err(BenchError::InsufficientData(format!(
                "no usable rounds among {} source(s)",
                gaps.len()
            )));
        }

        let document = AggregateDocument {
            generated_at: Utc::now(),
            rounds_included: rounds.iter().map(|r| r.round).collect(),
            gaps,
            categories: merge_categories(&rounds),
            dimensions: self.dimensions.iter().map(|spec| merge_dimension(spec, &rounds)).collect(),
        };
        info!(
            rounds = document.rounds_included.len(),
            gaps = document.gaps.len(),
            categories = document.categories.len(),
            "Aggregated rounds"
        );
        Ok(document)
    }
}

fn merge_categories(rounds: &[RoundResult]) -> BTreeMap<String, CategoryAggregate> {
    let mut values: BTreeMap<String, (Vec<u32>, BTreeMap<&'static str, Vec<RoundValue>>)> =
        BTreeMap::new();
    for round in rounds {
        for (name, report) in &round.categories {
            let Some(metrics) = &report.metrics else {
                continue;
            };
            let (sampled, fields) = values.entry(name.clone()).or_default();
            sampled.push(round.round);
            for (metric, value) in metrics.scalars() {
                fields.entry(metric).or_default().push(RoundValue { round: round.round, value });
            }
        }
    }

    values
        .into_iter()
        .map(|(name, (rounds, fields))| {
            let metrics = fields
                .into_iter()
                .filter_map(|(metric, vals)| KeyedStat::from_values(vals).map(|s| (metric.to_string(), s)))
                .collect();
            (name, CategoryAggregate { rounds, metrics })
        })
        .collect()
}

fn merge_dimension(spec: &DimensionSpec, rounds: &[RoundResult]) -> DimensionTable {
    let mut sampled: BTreeMap<DimensionKey, Vec<u32>> = BTreeMap::new();
    let mut values: BTreeMap<DimensionKey, BTreeMap<String, Vec<RoundValue>>> = BTreeMap::new();

    for round in rounds {
        let Some(report) = round.categories.get(&spec.category) else {
            continue;
        };

        // Several outcomes of one round may share a key; they collapse to their mean.
        let mut within: BTreeMap<DimensionKey, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
        for outcome in &report.results {
            let Some(key) = outcome.payload().get(&spec.key_field).and_then(DimensionKey::from_value)
            else {
                continue;
            };
            let fields = within.entry(key).or_default();
            for field in &spec.fields {
                if let Some(v) = outcome.numeric_field(&field.field) {
                    fields.entry(field.field.as_str()).or_default().push(v);
                }
            }
        }

        for (key, fields) in within {
            sampled.entry(key.clone()).or_default().push(round.round);
            let row = values.entry(key).or_default();
            for (field, vals) in fields {
                let mean = vals.iter().sum::<f64>() / vals.len() as f64;
                row.entry(field.to_string()).or_default().push(RoundValue { round: round.round, value: mean });
            }
        }
    }

    let rows = sampled
        .into_iter()
        .map(|(key, rounds)| {
            let fields = values
                .remove(&key)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|(field, vals)| KeyedStat::from_values(vals).map(|s| (field, s)))
                .collect();
            DimensionRow { key, rounds, fields }
        })
        .collect();

    DimensionTable { spec: spec.clone(), rows }
}
