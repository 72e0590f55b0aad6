use crate::domain::{ParameterEntry, ParameterSet, ParameterValue, SweepError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One swept dimension. Axes are listed outermost first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Axis {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Text after the value in directory names, as in `r2.0rdom`.
    #[serde(default)]
    pub suffix: Option<String>,
    pub values: Vec<ParameterValue>,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        Self {
            name: name.into(),
            label: None,
            suffix: None,
            values,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn suffix(&self) -> &str {
        self.suffix.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("sweep has no axes")]
    NoAxes,
    #[error("axis '{name}' has no values")]
    EmptyAxis { name: String },
    #[error("axis '{name}' is declared more than once")]
    DuplicateAxis { name: String },
    #[error("axis '{name}' contains a non-finite value")]
    NonFiniteValue { name: String },
    #[error("sweep has no parameter points")]
    NoPoints,
    #[error("parameter point {index} has keys {found:?}, expected {expected:?}")]
    InconsistentPoint {
        index: usize,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("parameter point {index} has a non-numeric value for '{name}'")]
    InvalidPointValue { index: usize, name: String },
}

impl From<GridError> for SweepError {
    fn from(error: GridError) -> Self {
        let placeholder = match error {
            GridError::NoAxes | GridError::NoPoints => "CONFIG.GRID_EMPTY",
            GridError::EmptyAxis { .. } => "CONFIG.AXIS_EMPTY",
            GridError::DuplicateAxis { .. } => "CONFIG.AXIS_DUPLICATE",
            GridError::NonFiniteValue { .. } => "CONFIG.AXIS_VALUE",
            GridError::InconsistentPoint { .. } | GridError::InvalidPointValue { .. } => {
                "CONFIG.POINT"
            }
        };
        SweepError::configuration(placeholder, error.to_string())
    }
}

/// The ordered list of parameter sets of a sweep.
///
/// For axes the order is the nested-loop order with the first axis outermost,
/// so a 1-based index names the same combination in every process that
/// loads the same configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGrid {
    parameter_names: Vec<String>,
    sets: Vec<ParameterSet>,
}

impl ParameterGrid {
    pub fn from_axes(axes: &[Axis]) -> Result<Self, GridError> {
        if axes.is_empty() {
            return Err(GridError::NoAxes);
        }

        let mut seen = BTreeSet::new();
        for axis in axes {
            if !seen.insert(axis.name.as_str()) {
                return Err(GridError::DuplicateAxis {
                    name: axis.name.clone(),
                });
            }
            if axis.values.is_empty() {
                return Err(GridError::EmptyAxis {
                    name: axis.name.clone(),
                });
            }
            if axis.values.iter().any(|value| !value.is_finite()) {
                return Err(GridError::NonFiniteValue {
                    name: axis.name.clone(),
                });
            }
        }

        let mut combinations: Vec<Vec<ParameterEntry>> = vec![Vec::new()];
        for axis in axes {
            let mut extended = Vec::with_capacity(combinations.len() * axis.values.len());
            for prefix in &combinations {
                for value in &axis.values {
                    let mut entries = prefix.clone();
                    entries.push(ParameterEntry {
                        name: axis.name.clone(),
                        label: axis.label().to_string(),
                        suffix: axis.suffix().to_string(),
                        value: *value,
                    });
                    extended.push(entries);
                }
            }
            combinations = extended;
        }

        Ok(Self {
            parameter_names: axes.iter().map(|axis| axis.name.clone()).collect(),
            sets: combinations.into_iter().map(ParameterSet::new).collect(),
        })
    }

    /// Explicit points, e.g. hand-picked or randomly drawn within a region.
    /// Every point must carry the same keys as the first one.
    pub fn from_points(points: &[Map<String, Value>]) -> Result<Self, GridError> {
        let Some(first) = points.first() else {
            return Err(GridError::NoPoints);
        };
        let parameter_names: Vec<String> = first.keys().cloned().collect();
        let expected: BTreeSet<&str> = parameter_names.iter().map(String::as_str).collect();

        let mut sets = Vec::with_capacity(points.len());
        for (offset, point) in points.iter().enumerate() {
            let index = offset + 1;
            let found: BTreeSet<&str> = point.keys().map(String::as_str).collect();
            if found != expected {
                return Err(GridError::InconsistentPoint {
                    index,
                    expected: parameter_names.clone(),
                    found: point.keys().cloned().collect(),
                });
            }

            let mut entries = Vec::with_capacity(parameter_names.len());
            for name in &parameter_names {
                let value = point
                    .get(name)
                    .and_then(|raw| serde_json::from_value::<ParameterValue>(raw.clone()).ok())
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| GridError::InvalidPointValue {
                        index,
                        name: name.clone(),
                    })?;
                entries.push(ParameterEntry {
                    name: name.clone(),
                    label: name.clone(),
                    suffix: String::new(),
                    value,
                });
            }
            sets.push(ParameterSet::new(entries));
        }

        Ok(Self {
            parameter_names,
            sets,
        })
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// 1-based lookup.
    pub fn get(&self, index: usize) -> Option<&ParameterSet> {
        index.checked_sub(1).and_then(|offset| self.sets.get(offset))
    }

    /// `(1-based index, set)` pairs in grid order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ParameterSet)> {
        self.sets
            .iter()
            .enumerate()
            .map(|(offset, set)| (offset + 1, set))
    }
}
