//! Values carried by unconnected slots.

use ndarray::ArrayD;
use std::sync::Arc;

/// A concrete slot value.
///
/// Arrays are reference counted so fanning one value out to many downstream
/// slots never copies the data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Arc<ArrayD<f64>>),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<ArrayD<f64>>> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Shape of the value: the array shape, or `[]` for scalars.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            Value::Array(a) => a.shape().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Element type name recorded in slot metadata.
    pub fn dtype(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "i64",
            Value::Float(_) | Value::Array(_) => "f64",
            Value::String(_) => "string",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(v: ArrayD<f64>) -> Self {
        Value::Array(Arc::new(v))
    }
}

impl From<Arc<ArrayD<f64>>> for Value {
    fn from(v: Arc<ArrayD<f64>>) -> Self {
        Value::Array(v)
    }
}
