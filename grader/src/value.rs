use std::fmt;

use serde::{Deserialize, Serialize};

/// A Python value read back from the kernel after execution.
/// Containers are truncated by the kernel; anything without a JSON shape
/// arrives as `Object` with its type name and `repr()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelValue {
    None,
    Bool { value: bool },
    Int { value: i64 },
    Float { value: f64 },
    Str { value: String },
    List { items: Vec<KernelValue> },
    Dict { entries: Vec<(KernelValue, KernelValue)> },
    Object { type_name: String, repr: String },
}

impl KernelValue {
    /// Numeric view. Booleans are not numbers here.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KernelValue::Int { value } => Some(*value as f64),
            KernelValue::Float { value } => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            KernelValue::None => "NoneType",
            KernelValue::Bool { .. } => "bool",
            KernelValue::Int { .. } => "int",
            KernelValue::Float { .. } => "float",
            KernelValue::Str { .. } => "str",
            KernelValue::List { .. } => "list",
            KernelValue::Dict { .. } => "dict",
            KernelValue::Object { type_name, .. } => type_name,
        }
    }
}

impl fmt::Display for KernelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelValue::None => write!(f, "None"),
            KernelValue::Bool { value } => write!(f, "{}", if *value { "True" } else { "False" }),
            KernelValue::Int { value } => write!(f, "{}", value),
            KernelValue::Float { value } => write!(f, "{}", value),
            KernelValue::Str { value } => write!(f, "'{}'", value),
            KernelValue::List { items } => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            KernelValue::Dict { entries } => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            KernelValue::Object { repr, .. } => write!(f, "{}", repr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_kernel_encoding() {
        let value: KernelValue = serde_json::from_value(json!({
            "kind": "dict",
            "entries": [[{"kind": "str", "value": "satisfaccion"}, {"kind": "float", "value": 72.5}]]
        }))
        .unwrap();
        assert_eq!(value.to_string(), "{'satisfaccion': 72.5}");

        let none: KernelValue = serde_json::from_value(json!({"kind": "none"})).unwrap();
        assert_eq!(none, KernelValue::None);
    }

    #[test]
    fn numeric_view() {
        assert_eq!(KernelValue::Int { value: 7 }.as_f64(), Some(7.0));
        assert_eq!(KernelValue::Float { value: 72.5 }.as_f64(), Some(72.5));
        assert_eq!(KernelValue::Bool { value: true }.as_f64(), None);
        let sim = KernelValue::Object {
            type_name: "ControlSystemSimulation".into(),
            repr: "<ControlSystemSimulation>".into(),
        };
        assert_eq!(sim.as_f64(), None);
        assert_eq!(sim.type_name(), "ControlSystemSimulation");
    }
}
