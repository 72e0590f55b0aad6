//! Physical quantities computed from a parameter set before dispatch.
//!
//! Scans are often configured in units that are convenient for plotting
//! (radius in DOM radii, effective scattering length) while the simulator
//! expects geometric quantities in metres. Each rule reads an existing
//! parameter (or an earlier derived field) and adds new named fields.

use crate::common::constants::{DOM_RADIUS_METERS, MEAN_SCATTERING_ANGLE_COSINE};
use crate::domain::{DerivedFields, ParameterSet, SweepError};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedRule {
    /// `name = from * r_dom`
    DomRadiiToMeters { from: String, name: String },
    /// `name = from * (1 - g)`
    EffectiveToGeometricScattering {
        from: String,
        name: String,
        #[serde(default = "default_mean_cosine")]
        g: f64,
    },
    /// Position shifted by `offset` towards `azimuth` degrees, away from
    /// `origin`. Produces `{name}_x` and `{name}_y`.
    OffsetPosition {
        offset: String,
        azimuth: String,
        name: String,
        origin: [f64; 2],
    },
}

fn default_mean_cosine() -> f64 {
    MEAN_SCATTERING_ANGLE_COSINE
}

impl DerivedRule {
    pub fn output_names(&self) -> Vec<String> {
        match self {
            Self::DomRadiiToMeters { name, .. }
            | Self::EffectiveToGeometricScattering { name, .. } => vec![name.clone()],
            Self::OffsetPosition { name, .. } => vec![format!("{name}_x"), format!("{name}_y")],
        }
    }

    pub fn input_names(&self) -> Vec<&str> {
        match self {
            Self::DomRadiiToMeters { from, .. }
            | Self::EffectiveToGeometricScattering { from, .. } => vec![from.as_str()],
            Self::OffsetPosition {
                offset, azimuth, ..
            } => vec![offset.as_str(), azimuth.as_str()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DerivedError {
    #[error("derived field '{output}' needs '{input}', which is neither a parameter nor an earlier derived field")]
    UnknownInput { output: String, input: String },
}

impl From<DerivedError> for SweepError {
    fn from(error: DerivedError) -> Self {
        SweepError::configuration("CONFIG.DERIVED_INPUT", error.to_string())
    }
}

pub fn compute_derived(
    rules: &[DerivedRule],
    parameters: &ParameterSet,
) -> Result<DerivedFields, DerivedError> {
    let mut derived = DerivedFields::default();
    for rule in rules {
        let lookup = |input: &str| -> Result<f64, DerivedError> {
            parameters
                .get(input)
                .map(|value| value.as_f64())
                .or_else(|| derived.get(input))
                .ok_or_else(|| DerivedError::UnknownInput {
                    output: rule.output_names().join(","),
                    input: input.to_string(),
                })
        };

        match rule {
            DerivedRule::DomRadiiToMeters { from, name } => {
                let value = lookup(from)? * DOM_RADIUS_METERS;
                derived.insert(name.clone(), value);
            }
            DerivedRule::EffectiveToGeometricScattering { from, name, g } => {
                let value = lookup(from)? * (1.0 - g);
                derived.insert(name.clone(), value);
            }
            DerivedRule::OffsetPosition {
                offset,
                azimuth,
                name,
                origin,
            } => {
                let offset = lookup(offset)?;
                let azimuth = lookup(azimuth)?.to_radians();
                derived.insert(format!("{name}_x"), origin[0] - offset * azimuth.cos());
                derived.insert(format!("{name}_y"), origin[1] - offset * azimuth.sin());
            }
        }
    }
    Ok(derived)
}

/// Checks that every rule only reads names available at its position.
pub fn validate_rules(rules: &[DerivedRule], parameter_names: &[String]) -> Result<(), DerivedError> {
    let mut available: Vec<String> = parameter_names.to_vec();
    for rule in rules {
        for input in rule.input_names() {
            if !available.iter().any(|name| name == input) {
                return Err(DerivedError::UnknownInput {
                    output: rule.output_names().join(","),
                    input: input.to_string(),
                });
            }
        }
        available.extend(rule.output_names());
    }
    Ok(())
}
