use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::DataError;

/// Declared type of an attribute. Values are coerced to it on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Params,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Any => "any",
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Object => "object",
            DataType::Array => "array",
            DataType::Params => "params",
        };
        f.write_str(name)
    }
}

impl DataType {
    /// Converts `value` to this type. `Null` passes through for every type.
    pub fn coerce(&self, value: Value) -> Result<Value, DataError> {
        if value.is_null() {
            return Ok(value);
        }

        let shown = value.to_string();
        let coerced = match (self, value) {
            (DataType::Any, v) => Some(v),

            (DataType::String, Value::String(s)) => Some(Value::String(s)),
            (DataType::String, v) => Some(Value::String(v.to_string())),

            (DataType::Integer, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::from(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0)
                        .map(|f| Value::from(f as i64))
                }
            }
            (DataType::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(Value::from)
            }
            (DataType::Integer, Value::Bool(b)) => Some(Value::from(b as i64)),

            (DataType::Number, Value::Number(n)) => Some(Value::Number(n)),
            (DataType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (DataType::Number, Value::Bool(b)) => Some(Value::from(b as i64)),

            (DataType::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            (DataType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (DataType::Boolean, Value::Number(n)) => n.as_f64().map(|f| Value::Bool(f != 0.0)),

            (DataType::Object | DataType::Params, Value::Object(o)) => Some(Value::Object(o)),
            (DataType::Object | DataType::Params, Value::String(s)) => {
                serde_json::from_str::<Value>(&s).ok().filter(Value::is_object)
            }

            (DataType::Array, Value::Array(a)) => Some(Value::Array(a)),
            (DataType::Array, Value::String(s)) => {
                serde_json::from_str::<Value>(&s).ok().filter(Value::is_array)
            }

            _ => None,
        };

        coerced.ok_or(DataError::Coercion {
            value: shown,
            data_type: *self,
        })
    }
}

/// A named, typed value holder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    #[serde(rename = "type", default)]
    data_type: DataType,
    #[serde(default)]
    value: Value,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType, value: Value) -> Result<Self, DataError> {
        let value = data_type.coerce(value)?;
        Ok(Self {
            name: name.into(),
            data_type,
            value,
        })
    }

    /// An attribute of type `any`, which accepts every value.
    pub fn untyped(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Any,
            value,
        }
    }

    /// An attribute without a value, as declared in activity metadata.
    pub fn declared(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            value: Value::Null,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn set_value(&mut self, value: Value) -> Result<(), DataError> {
        self.value = self.data_type.coerce(value)?;
        Ok(())
    }
}
