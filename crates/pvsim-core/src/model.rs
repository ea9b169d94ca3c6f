//! Simulator data model types.
//!
//! These types represent the structures shared by every layer:
//! - Module kinds and value types parsed from the instrument tree
//! - Device descriptions extracted from module declarations
//! - Control variables served to clients (scalar value plus metadata)
//! - Persisted target entries driving the simulation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while interpreting declarations and values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Unknown module kind: {0}")]
    UnknownModuleKind(String),

    #[error("Unknown dtype: {0}")]
    UnknownDtype(String),

    #[error("Cannot convert {value} to {dtype}")]
    InvalidValue { dtype: Dtype, value: String },
}

/// Wire-message schema used by a module declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Scalar log data (one value with a timestamp).
    F144,
    /// Trigger/event timestamps with a sequence counter.
    Tdct,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::F144 => "f144",
            ModuleKind::Tdct => "tdct",
        }
    }
}

impl FromStr for ModuleKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f144" => Ok(ModuleKind::F144),
            "tdct" => Ok(ModuleKind::Tdct),
            other => Err(ModelError::UnknownModuleKind(other.to_string())),
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value type of a served channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    Int,
    Double,
    Float,
    String,
}

impl Dtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::Int => "int",
            Dtype::Double => "double",
            Dtype::Float => "float",
            Dtype::String => "string",
        }
    }
}

impl FromStr for Dtype {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(Dtype::Bool),
            "int" => Ok(Dtype::Int),
            "double" => Ok(Dtype::Double),
            "float" => Ok(Dtype::Float),
            "string" => Ok(Dtype::String),
            other => Err(ModelError::UnknownDtype(other.to_string())),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device description extracted from a module declaration.
///
/// Optional fields that the declaration does not carry are `None` rather
/// than an extraction failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Module kind as written in the tree (e.g. "f144")
    pub module: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_units: Option<String>,
}

/// Persisted simulation parameters for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    #[serde(default)]
    pub target_value: Option<f64>,

    #[serde(default)]
    pub std_dev: Option<f64>,

    /// Update period in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_period: Option<f64>,
}

impl TargetEntry {
    /// Placeholder written for newly discovered channels.
    pub fn placeholder() -> serde_json::Value {
        serde_json::json!({
            "target_value": null,
            "std_dev": null,
        })
    }
}

/// A dtype-specialised scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    Float(f32),
    String(String),
}

impl ScalarValue {
    /// Canonical zero value for a dtype.
    pub fn zero(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Bool => ScalarValue::Bool(false),
            Dtype::Int => ScalarValue::Int(0),
            Dtype::Double => ScalarValue::Double(0.0),
            Dtype::Float => ScalarValue::Float(0.0),
            Dtype::String => ScalarValue::String(String::new()),
        }
    }

    /// Convert an externally supplied JSON value to the layout of `dtype`.
    ///
    /// Numbers are accepted for every dtype: integers are rounded, booleans
    /// are true when non-zero, strings take the number's text.
    pub fn coerce(dtype: Dtype, value: &serde_json::Value) -> Result<Self, ModelError> {
        use serde_json::Value;

        let invalid = || ModelError::InvalidValue {
            dtype,
            value: value.to_string(),
        };

        match (dtype, value) {
            (Dtype::Bool, Value::Bool(b)) => Ok(ScalarValue::Bool(*b)),
            (Dtype::Bool, Value::Number(n)) => n
                .as_f64()
                .map(|f| ScalarValue::Bool(f != 0.0))
                .ok_or_else(invalid),
            (Dtype::Int, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    i32::try_from(i).map(ScalarValue::Int).map_err(|_| invalid())
                } else {
                    let f = n.as_f64().ok_or_else(invalid)?;
                    let rounded = f.round();
                    if rounded.is_finite()
                        && rounded >= f64::from(i32::MIN)
                        && rounded <= f64::from(i32::MAX)
                    {
                        Ok(ScalarValue::Int(rounded as i32))
                    } else {
                        Err(invalid())
                    }
                }
            }
            (Dtype::Double, Value::Number(n)) => {
                n.as_f64().map(ScalarValue::Double).ok_or_else(invalid)
            }
            (Dtype::Float, Value::Number(n)) => n
                .as_f64()
                .map(|f| ScalarValue::Float(f as f32))
                .ok_or_else(invalid),
            (Dtype::String, Value::String(s)) => Ok(ScalarValue::String(s.clone())),
            (Dtype::String, Value::Number(n)) => Ok(ScalarValue::String(n.to_string())),
            (Dtype::String, Value::Bool(b)) => Ok(ScalarValue::String(b.to_string())),
            _ => Err(invalid()),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ScalarValue::Int(i) => Some(f64::from(*i)),
            ScalarValue::Double(d) => Some(*d),
            ScalarValue::Float(f) => Some(f64::from(*f)),
            ScalarValue::String(_) => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Double(d) => write!(f, "{:.3}", d),
            ScalarValue::Float(v) => write!(f, "{:.3}", v),
            ScalarValue::String(s) => f.write_str(s),
        }
    }
}

/// Alarm state of a control variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    pub severity: i32,
    pub status: i32,
    pub message: String,
}

/// Wall-clock timestamp attached to every value.
///
/// Derived from the system clock, so it is not guaranteed to be monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeStamp {
    pub seconds_past_epoch: i64,
    pub nanoseconds: i32,
    pub user_tag: i32,
}

impl TimeStamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_past_epoch: now.timestamp(),
            nanoseconds: now.timestamp_subsec_nanos() as i32,
            user_tag: 0,
        }
    }

    /// Nanoseconds since the Unix epoch.
    pub fn unix_ns(&self) -> i64 {
        self.seconds_past_epoch * 1_000_000_000 + i64::from(self.nanoseconds)
    }
}

/// Enumerated display form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayForm {
    pub index: i32,
    pub choices: Vec<String>,
}

/// Display metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Display {
    pub limit_low: f64,
    pub limit_high: f64,
    pub description: String,
    pub units: String,
    pub precision: i32,
    pub form: DisplayForm,
}

/// Control limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    pub limit_low: f64,
    pub limit_high: f64,
    pub min_step: f64,
}

/// Alarm thresholds and severities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueAlarm {
    pub active: bool,
    pub low_alarm_limit: f64,
    pub low_warning_limit: f64,
    pub high_warning_limit: f64,
    pub high_alarm_limit: f64,
    pub low_alarm_severity: i32,
    pub low_warning_severity: i32,
    pub high_warning_severity: i32,
    pub high_alarm_severity: i32,
    pub hysteresis: u8,
}

/// A served, externally writable value with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlVariable {
    pub value: ScalarValue,
    pub alarm: Alarm,
    pub time_stamp: TimeStamp,
    pub display: Display,
    pub control: Control,
    pub value_alarm: ValueAlarm,
}

impl ControlVariable {
    /// Create a variable holding `value`, stamped with the current time.
    pub fn new(value: ScalarValue) -> Self {
        Self {
            value,
            alarm: Alarm::default(),
            time_stamp: TimeStamp::now(),
            display: Display::default(),
            control: Control::default(),
            value_alarm: ValueAlarm::default(),
        }
    }

    /// Fill display metadata.
    pub fn with_display(mut self, description: &str, units: Option<&str>) -> Self {
        self.display.description = description.to_string();
        self.display.units = units.unwrap_or_default().to_string();
        self
    }

    /// Overwrite the value and stamp the current time.
    pub fn update(&mut self, value: ScalarValue) {
        self.value = value;
        self.time_stamp = TimeStamp::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_kind_lookup() {
        assert_eq!("f144".parse::<ModuleKind>(), Ok(ModuleKind::F144));
        assert_eq!("tdct".parse::<ModuleKind>(), Ok(ModuleKind::Tdct));
        assert_eq!(
            "ev44".parse::<ModuleKind>(),
            Err(ModelError::UnknownModuleKind("ev44".to_string()))
        );
    }

    #[test]
    fn test_dtype_lookup() {
        assert_eq!("double".parse::<Dtype>(), Ok(Dtype::Double));
        assert!("int64".parse::<Dtype>().is_err());
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(ScalarValue::zero(Dtype::Int), ScalarValue::Int(0));
        assert_eq!(ScalarValue::zero(Dtype::Bool), ScalarValue::Bool(false));
        assert_eq!(
            ScalarValue::zero(Dtype::String),
            ScalarValue::String(String::new())
        );
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(
            ScalarValue::coerce(Dtype::Int, &json!(2.6)).unwrap(),
            ScalarValue::Int(3)
        );
        assert_eq!(
            ScalarValue::coerce(Dtype::Double, &json!(5)).unwrap(),
            ScalarValue::Double(5.0)
        );
        assert_eq!(
            ScalarValue::coerce(Dtype::Bool, &json!(0)).unwrap(),
            ScalarValue::Bool(false)
        );
        assert_eq!(
            ScalarValue::coerce(Dtype::String, &json!(1.5)).unwrap(),
            ScalarValue::String("1.5".to_string())
        );
    }

    #[test]
    fn test_coerce_rejects_mismatch() {
        assert!(ScalarValue::coerce(Dtype::Double, &json!("abc")).is_err());
        assert!(ScalarValue::coerce(Dtype::Int, &json!(1e12)).is_err());
        assert!(ScalarValue::coerce(Dtype::Bool, &serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_control_variable_serialize() {
        let var = ControlVariable::new(ScalarValue::Double(1.5)).with_display("SIM_temp", Some("K"));
        let json = serde_json::to_value(&var).unwrap();

        assert_eq!(json["value"], 1.5);
        assert!(json["timeStamp"]["secondsPastEpoch"].is_i64());
        assert_eq!(json["display"]["units"], "K");
        assert_eq!(json["display"]["limitLow"], 0.0);
        assert_eq!(json["valueAlarm"]["hysteresis"], 0);
        assert_eq!(json["alarm"]["message"], "");
    }

    #[test]
    fn test_target_entry_defaults() {
        let entry: TargetEntry = serde_json::from_value(json!({"target_value": 5})).unwrap();
        assert_eq!(entry.target_value, Some(5.0));
        assert_eq!(entry.std_dev, None);
        assert_eq!(entry.update_period, None);
    }
}
