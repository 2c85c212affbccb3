use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered string-keyed map used for objects, arguments and outputs
pub type Map = IndexMap<String, Value>;

/// Evaluated data. This is what outputs, caller arguments and callable
/// arguments are made of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Map(Map),
}

impl Value {
    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "numeric",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Value::Map(value)
    }
}

/// Formats numbers without a trailing `.0` when they are integral
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A list of numbers with the statistics used by builtins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumericArray(pub Vec<f64>);

impl NumericArray {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Arithmetic mean; `None` for an empty array
    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            None
        } else {
            Some(self.sum() / self.0.len() as f64)
        }
    }

    /// Sample standard deviation (n - 1); zero with fewer than two values
    pub fn stddev(&self) -> f64 {
        let n = self.0.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.sum() / n as f64;
        let squares: f64 = self.0.iter().map(|v| (v - mean).powi(2)).sum();
        (squares / (n - 1) as f64).sqrt()
    }

    pub fn min(&self) -> Option<f64> {
        self.0.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.0.iter().copied().reduce(f64::max)
    }

    /// Whether `value` lies more than three standard deviations from the
    /// mean of the other observations. One occurrence of `value` is left out
    /// of the baseline so the probe does not widen its own band.
    pub fn is_anomaly(&self, value: f64) -> bool {
        let mut baseline = self.0.clone();
        if let Some(index) = baseline.iter().position(|v| *v == value) {
            baseline.remove(index);
        }
        let baseline = NumericArray(baseline);

        match baseline.mean() {
            Some(mean) => (value - mean).abs() > 3.0 * baseline.stddev(),
            None => false,
        }
    }
}

impl From<Vec<f64>> for NumericArray {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics() {
        let data = NumericArray(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(data.sum(), 40.0);
        assert_eq!(data.mean(), Some(5.0));
        assert!((data.stddev() - 2.138_089_935).abs() < 1e-6);
        assert_eq!(data.min(), Some(2.0));
        assert_eq!(data.max(), Some(9.0));
    }

    #[test]
    fn test_statistics_of_small_arrays() {
        let empty = NumericArray::default();
        assert_eq!(empty.mean(), None);
        assert_eq!(empty.stddev(), 0.0);
        assert_eq!(empty.min(), None);

        let single = NumericArray(vec![3.0]);
        assert_eq!(single.mean(), Some(3.0));
        assert_eq!(single.stddev(), 0.0);
    }

    #[test]
    fn test_anomaly() {
        let data = NumericArray(vec![10.0, 10.0, 10.0, 10.0, 100.0]);
        assert!(data.is_anomaly(100.0));
        assert!(!data.is_anomaly(10.0));
        assert!(!NumericArray::default().is_anomaly(1.0));
    }

    #[test]
    fn test_display() {
        let mut map = Map::new();
        map.insert("a".to_string(), Value::Number(1.0));
        map.insert("b".to_string(), Value::Array(vec![Value::Number(1.5), Value::Null]));
        assert_eq!(Value::Map(map).to_string(), "{a: 1, b: [1.5, null]}");
    }

    #[test]
    fn test_json_round_trip_shape() {
        let value: Value = serde_json::from_str(r#"{"a": 1, "b": ["x", true, null]}"#).unwrap();
        let Value::Map(map) = &value else {
            panic!("expected a map, got {value:?}");
        };
        assert_eq!(map["a"], Value::Number(1.0));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"a":1.0,"b":["x",true,null]}"#
        );
    }
}
