//! Core data types shared by the query engine and its collaborators
//!
//! - `MetricKey`: name of a family of series
//! - `TagSet`: key/value pairs identifying one series within a family
//! - `SampleMethod`: reducer applied when downsampling onto the query grid
//! - `Series` / `SeriesList`: grid-aligned results of evaluation

use crate::api::Timerange;
use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Name of a metric series family (e.g. `cpu.load`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricKey(String);

impl MetricKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MetricKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag key/value pairs of one series
///
/// Keys are kept sorted, so equality, ordering and the canonical
/// `key=value,key2=value2` form all agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical string form, keys in lexicographic order
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Restrict to the given keys; keys absent here stay absent
    pub fn project(&self, keys: &[String]) -> TagSet {
        TagSet(
            keys.iter()
                .filter_map(|k| self.0.get(k).map(|v| (k.clone(), v.clone())))
                .collect(),
        )
    }

    /// Union of two tag sets, or `None` if they disagree on a shared key
    pub fn merge(&self, other: &TagSet) -> Option<TagSet> {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            match merged.get(key) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        Some(TagSet(merged))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.serialize())
    }
}

/// Reducer applied when a backend holds several samples for one grid slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMethod {
    /// Average of values
    #[default]
    Mean,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Sum of values
    Sum,
    /// Number of values
    Count,
}

impl SampleMethod {
    /// Reduce the samples of one slot; `None` when the slot is empty
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        Some(match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
        })
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mean" | "avg" | "average" => Some(Self::Mean),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "sum" => Some(Self::Sum),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

impl std::fmt::Display for SampleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Sum => write!(f, "sum"),
            Self::Count => write!(f, "count"),
        }
    }
}

/// One series aligned to a query grid
///
/// `values[i]` is the sample for slot `i` of the owning `Timerange`;
/// a missing sample is NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub tagset: TagSet,
    pub values: Vec<f64>,
}

impl Series {
    pub fn new(tagset: TagSet, values: Vec<f64>) -> Self {
        Self { tagset, values }
    }

    /// Series with every slot set to `value`
    pub fn constant(tagset: TagSet, value: f64, slots: usize) -> Self {
        Self {
            tagset,
            values: vec![value; slots],
        }
    }

    /// Series with every slot missing
    pub fn empty(tagset: TagSet, slots: usize) -> Self {
        Self::constant(tagset, f64::NAN, slots)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// All series produced by one expression over one timerange
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesList {
    /// Canonical rendering of the producing expression
    pub name: String,
    pub timerange: Timerange,
    pub series: Vec<Series>,
}

impl SeriesList {
    pub fn new(name: impl Into<String>, timerange: Timerange, series: Vec<Series>) -> Self {
        Self {
            name: name.into(),
            timerange,
            series,
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Find the series carrying exactly this tag set
    pub fn get(&self, tagset: &TagSet) -> Option<&Series> {
        self.series.iter().find(|s| &s.tagset == tagset)
    }
}

/// Encodes one series as `{"tagset": {...}, "points": [[ts, value], ...]}`
struct PointsView<'a> {
    timerange: &'a Timerange,
    values: &'a [f64],
}

impl Serialize for PointsView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.values.len()))?;
        for (timestamp, value) in self.timerange.timestamps().zip(self.values) {
            // NaN encodes as null
            let value = if value.is_nan() { None } else { Some(*value) };
            seq.serialize_element(&(timestamp, value))?;
        }
        seq.end()
    }
}

struct SeriesView<'a> {
    timerange: &'a Timerange,
    series: &'a Series,
}

impl Serialize for SeriesView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Series", 2)?;
        state.serialize_field("tagset", &self.series.tagset)?;
        state.serialize_field(
            "points",
            &PointsView {
                timerange: self.timerange,
                values: &self.series.values,
            },
        )?;
        state.end()
    }
}

impl Serialize for SeriesList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let series: Vec<SeriesView<'_>> = self
            .series
            .iter()
            .map(|series| SeriesView {
                timerange: &self.timerange,
                series,
            })
            .collect();

        let mut state = serializer.serialize_struct("SeriesList", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("timerange", &self.timerange)?;
        state.serialize_field("series", &series)?;
        state.end()
    }
}
