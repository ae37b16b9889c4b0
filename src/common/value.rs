//! Generic decoded values for name → value result maps

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single decoded quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecodedValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    BoolVec(Vec<bool>),
    IntVec(Vec<i64>),
    DoubleVec(Vec<f64>),
}

/// Ordered result dictionary
pub type ValueMap = BTreeMap<String, DecodedValue>;

impl DecodedValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value as f64 (ints are widened)
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Number of elements (1 for scalars)
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(_) | Self::Int(_) | Self::Double(_) => 1,
            Self::BoolVec(v) => v.len(),
            Self::IntVec(v) => v.len(),
            Self::DoubleVec(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<bool> for DecodedValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for DecodedValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for DecodedValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Vec<i64>> for DecodedValue {
    fn from(v: Vec<i64>) -> Self {
        Self::IntVec(v)
    }
}

impl From<&[i32]> for DecodedValue {
    fn from(v: &[i32]) -> Self {
        Self::IntVec(v.iter().map(|&x| x as i64).collect())
    }
}

impl From<Vec<f64>> for DecodedValue {
    fn from(v: Vec<f64>) -> Self {
        Self::DoubleVec(v)
    }
}

impl From<Vec<bool>> for DecodedValue {
    fn from(v: Vec<bool>) -> Self {
        Self::BoolVec(v)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::BoolVec(v) => write_list(f, v),
            Self::IntVec(v) => write_list(f, v),
            Self::DoubleVec(v) => write_list(f, v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(DecodedValue::Int(5).as_int(), Some(5));
        assert_eq!(DecodedValue::Int(5).as_double(), Some(5.0));
        assert_eq!(DecodedValue::Double(2.5).as_int(), None);
        assert_eq!(DecodedValue::Bool(true).as_bool(), Some(true));
        assert_eq!(DecodedValue::IntVec(vec![]).as_bool(), None);
    }

    #[test]
    fn test_len() {
        assert_eq!(DecodedValue::Double(1.0).len(), 1);
        assert_eq!(DecodedValue::from(&[1, 2, 3][..]).len(), 3);
        assert!(DecodedValue::DoubleVec(vec![]).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(DecodedValue::Bool(false).to_string(), "false");
        assert_eq!(DecodedValue::IntVec(vec![1, -2]).to_string(), "[1, -2]");
        assert_eq!(DecodedValue::Double(8.0).to_string(), "8");
    }

    #[test]
    fn test_json_untagged() {
        let mut map = ValueMap::new();
        map.insert("start_time".to_string(), 8.0.into());
        map.insert("lc_bit".to_string(), true.into());
        map.insert("fadc".to_string(), vec![1i64, 2].into());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"fadc":[1,2],"lc_bit":true,"start_time":8.0}"#);
    }
}
