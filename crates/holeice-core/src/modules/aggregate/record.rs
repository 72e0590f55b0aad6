use crate::domain::ParameterValue;
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// One configuration record reduced to the values the table needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub parameters: Vec<ParameterValue>,
    pub statistics: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Unreadable(String),
    Unparseable(String),
    NotAnObject,
    MissingParameter(String),
    MissingStatistic(String),
    NonNumericStatistic(String),
    ColumnMismatch { expected: Vec<String>, found: Vec<String> },
}

impl Display for DropReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable(message) => write!(f, "unreadable: {message}"),
            Self::Unparseable(message) => write!(f, "not valid JSON: {message}"),
            Self::NotAnObject => f.write_str("record is not a JSON object"),
            Self::MissingParameter(name) => write!(f, "missing parameter '{name}'"),
            Self::MissingStatistic(key) => write!(f, "missing statistic '{key}'"),
            Self::NonNumericStatistic(key) => {
                write!(f, "first entry of '{key}' carries no numeric value")
            }
            Self::ColumnMismatch { expected, found } => write!(
                f,
                "statistic columns [{}] differ from [{}]",
                found.join(", "),
                expected.join(", ")
            ),
        }
    }
}

pub fn parse_record(
    content: &str,
    parameter_names: &[String],
    statistic: &str,
) -> Result<ParsedRecord, DropReason> {
    let value: Value = serde_json::from_str(content)
        .map_err(|error| DropReason::Unparseable(error.to_string()))?;
    let Value::Object(record) = value else {
        return Err(DropReason::NotAnObject);
    };

    let parameters = parameter_names
        .iter()
        .map(|name| {
            record
                .get(name)
                .and_then(parameter_value)
                .ok_or_else(|| DropReason::MissingParameter(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let statistics = extract_statistic(&record, statistic)?;
    Ok(ParsedRecord {
        parameters,
        statistics,
    })
}

/// Columns from the first entry of the nested statistic mapping.
///
/// A mapping entry contributes every numeric (or numeric-string) field; a
/// bare number becomes a single column named after the statistic key.
fn extract_statistic(
    record: &Map<String, Value>,
    statistic: &str,
) -> Result<Vec<(String, f64)>, DropReason> {
    let first = match record.get(statistic) {
        Some(Value::Object(results)) => results.values().next(),
        Some(Value::Array(results)) => results.first(),
        Some(Value::Null) | None => None,
        Some(other) => Some(other),
    }
    .ok_or_else(|| DropReason::MissingStatistic(statistic.to_string()))?;

    let columns: Vec<(String, f64)> = match first {
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(name, value)| numeric(value).map(|number| (name.clone(), number)))
            .collect(),
        other => numeric(other)
            .map(|number| vec![(statistic.to_string(), number)])
            .unwrap_or_default(),
    };
    if columns.is_empty() {
        return Err(DropReason::NonNumericStatistic(statistic.to_string()));
    }
    Ok(columns)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn parameter_value(value: &Value) -> Option<ParameterValue> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(ParameterValue::Int)
            .or_else(|| number.as_f64().map(ParameterValue::Float)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .map(ParameterValue::Int)
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(ParameterValue::Float))
        }
        _ => None,
    }
    .filter(|value| value.is_finite())
}
