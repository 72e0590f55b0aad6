pub mod errors;

pub use errors::{SweepError, SweepErrorCategory, SweepResult};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// A swept value. Integers and floats are kept apart so that directory names
/// and substituted arguments render `100` and `100.0` the way they were
/// written in the sweep configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    pub fn is_finite(self) -> bool {
        match self {
            Self::Int(_) => true,
            Self::Float(value) => value.is_finite(),
        }
    }

    pub fn to_json(self) -> serde_json::Value {
        match self {
            Self::Int(value) => serde_json::Value::from(value),
            Self::Float(value) => serde_json::Value::from(value),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl Display for ParameterValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Int(value) => write!(f, "{}", value),
            Self::Float(value) => {
                if value.is_finite() && value.fract() == 0.0 {
                    write!(f, "{:.1}", value)
                } else {
                    write!(f, "{}", value)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterEntry {
    pub name: String,
    pub label: String,
    pub suffix: String,
    pub value: ParameterValue,
}

/// One point of a sweep: parameter names mapped to values, in axis order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSet {
    entries: Vec<ParameterEntry>,
}

impl ParameterSet {
    pub fn new(entries: Vec<ParameterEntry>) -> Self {
        Self { entries }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, ParameterValue)>,
        S: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(name, value)| {
                let name = name.into();
                ParameterEntry {
                    label: name.clone(),
                    suffix: String::new(),
                    name,
                    value,
                }
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<ParameterValue> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value)
    }

    pub fn entries(&self) -> &[ParameterEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Directory name such as `dst1.0_sca0.1_abs100` or `esca0.05_r1.5rdom`.
    pub fn directory_name(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}{}{}", entry.label, entry.value, entry.suffix))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}={}", entry.name, entry.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Values computed from a parameter set before dispatch.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DerivedFields {
    fields: Vec<(String, f64)>,
}

impl DerivedFields {
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        if let Some(existing) = self.fields.iter_mut().find(|(key, _)| *key == name) {
            existing.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Selected,
    Skipped,
    Dispatched,
    Collected,
    Failed { reason: String },
}

impl JobStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::Skipped => "skipped",
            Self::Dispatched => "dispatched",
            Self::Collected => "collected",
            Self::Failed { .. } => "failed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Collected | Self::Failed { .. })
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed ({})", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A parameter set bound to its result directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub index: usize,
    pub parameters: ParameterSet,
    pub derived: DerivedFields,
    pub result_dir: PathBuf,
    pub status: JobStatus,
}

impl Job {
    pub fn new(
        index: usize,
        parameters: ParameterSet,
        derived: DerivedFields,
        results_root: &Path,
    ) -> Self {
        let result_dir = results_root.join(parameters.directory_name());
        Self {
            index,
            parameters,
            derived,
            result_dir,
            status: JobStatus::Selected,
        }
    }

    pub fn mark_skipped(&mut self) {
        self.status = JobStatus::Skipped;
    }

    pub fn mark_dispatched(&mut self) {
        self.status = JobStatus::Dispatched;
    }

    pub fn mark_collected(&mut self) {
        self.status = JobStatus::Collected;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed {
            reason: reason.into(),
        };
    }

    /// Configuration snapshot persisted next to the simulator's results.
    pub fn configuration_snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut snapshot = serde_json::Map::new();
        for entry in self.parameters.entries() {
            snapshot.insert(entry.name.clone(), entry.value.to_json());
        }
        for (name, value) in self.derived.iter() {
            snapshot.insert(name.to_string(), serde_json::Value::from(value));
        }
        snapshot.insert(
            "parameter_set_index".to_string(),
            serde_json::Value::from(self.index),
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::{DerivedFields, Job, JobStatus, ParameterSet, ParameterValue};
    use std::path::Path;

    #[test]
    fn values_render_like_the_configuration() {
        assert_eq!(ParameterValue::Int(100).to_string(), "100");
        assert_eq!(ParameterValue::Float(100.0).to_string(), "100.0");
        assert_eq!(ParameterValue::Float(0.1).to_string(), "0.1");
        assert_eq!(ParameterValue::Float(0.001).to_string(), "0.001");
        assert_eq!(ParameterValue::Float(0.033_02).to_string(), "0.03302");
    }

    #[test]
    fn integer_and_float_json_values_stay_distinct() {
        let values: Vec<ParameterValue> =
            serde_json::from_str("[100, 1.0, 0.25]").expect("values should parse");
        assert_eq!(
            values,
            vec![
                ParameterValue::Int(100),
                ParameterValue::Float(1.0),
                ParameterValue::Float(0.25)
            ]
        );
    }

    #[test]
    fn whole_floats_never_render_like_integers() {
        assert_eq!(ParameterValue::Float(1.0e16).to_string(), "10000000000000000.0");
        assert_eq!(ParameterValue::Int(10_000_000_000_000_000).to_string(), "10000000000000000");
        assert_eq!(ParameterValue::Float(-3.0).to_string(), "-3.0");
        assert_eq!(ParameterValue::Float(2.5e-7).to_string(), "0.00000025");
    }

    #[test]
    fn directory_name_concatenates_labels_and_values_in_order() {
        let set = ParameterSet::from_pairs([
            ("sca", ParameterValue::Float(0.1)),
            ("abs", ParameterValue::Int(100)),
            ("dst", ParameterValue::Float(1.0)),
        ]);
        assert_eq!(set.directory_name(), "sca0.1_abs100_dst1.0");
        assert_eq!(set.describe(), "sca=0.1, abs=100, dst=1.0");
    }

    #[test]
    fn job_starts_selected_and_snapshot_carries_parameters() {
        let set = ParameterSet::from_pairs([("distance", ParameterValue::Float(2.0))]);
        let mut derived = DerivedFields::default();
        derived.insert("radius", 0.1651);
        let mut job = Job::new(3, set, derived, Path::new("results"));

        assert_eq!(job.status, JobStatus::Selected);
        assert_eq!(job.result_dir, Path::new("results/distance2.0"));

        let snapshot = job.configuration_snapshot();
        assert_eq!(snapshot["distance"], serde_json::json!(2.0));
        assert_eq!(snapshot["radius"], serde_json::json!(0.1651));
        assert_eq!(snapshot["parameter_set_index"], serde_json::json!(3));

        job.mark_failed("missing log");
        assert!(job.status.is_terminal());
        assert_eq!(job.status.to_string(), "failed (missing log)");
    }
}
