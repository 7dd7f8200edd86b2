//! Dynamically typed option bag.
//!
//! Options are a small name/value store attached to a model. The value is a
//! tagged enum; the setter API keeps one entry point per payload type so a
//! thin FFI layer can forward each C setter verbatim.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A single option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

impl OptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            OptValue::Bool(_) => "boolean",
            OptValue::Int(_) => "integer",
            OptValue::Double(_) => "double",
            OptValue::Str(_) => "string",
        }
    }
}

/// Name → value store with type-checked updates.
///
/// An option must be declared (via [`Options::declare`]) before it can be
/// set; setting an undeclared name is `NotFound` and setting a declared one
/// with the wrong payload type is `InvalidArgument`.
#[derive(Debug, Clone, Default)]
pub struct Options {
    values: HashMap<String, OptValue>,
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    /// Register an option with its default value.
    pub fn declare(&mut self, name: &str, default: OptValue) {
        self.values.insert(name.to_string(), default);
    }

    fn set(&mut self, name: &str, value: OptValue) -> CoreResult<()> {
        match self.values.get_mut(name) {
            None => Err(CoreError::NotFound(format!("unknown option '{name}'"))),
            Some(slot) if std::mem::discriminant(slot) != std::mem::discriminant(&value) => {
                Err(CoreError::InvalidArgument(format!(
                    "option '{name}' is {}, got {}",
                    slot.type_name(),
                    value.type_name()
                )))
            }
            Some(slot) => {
                *slot = value;
                Ok(())
            }
        }
    }

    pub fn set_bool(&mut self, name: &str, value: bool) -> CoreResult<()> {
        self.set(name, OptValue::Bool(value))
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> CoreResult<()> {
        self.set(name, OptValue::Int(value))
    }

    pub fn set_double(&mut self, name: &str, value: f64) -> CoreResult<()> {
        self.set(name, OptValue::Double(value))
    }

    /// String values are copied; the caller keeps ownership of its argument.
    pub fn set_str(&mut self, name: &str, value: &str) -> CoreResult<()> {
        self.set(name, OptValue::Str(value.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&OptValue> {
        self.values.get(name)
    }
}
