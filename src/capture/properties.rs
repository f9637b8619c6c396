//! Named device settings shared between the device IO thread and its users

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::error::{Error, Result};

/// Shared handle to an integer property
///
/// Cloned handles observe the same value, so one can be read from inside a
/// device callback without going through the device.
#[derive(Debug, Clone)]
pub struct IntProperty {
    name: Arc<str>,
    value: Arc<AtomicI32>,
    min: i32,
    max: i32,
}

impl IntProperty {
    fn new(name: &str, value: i32, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            value: Arc::new(AtomicI32::new(value)),
            min,
            max,
        }
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i32) -> Result<()> {
        let max = self.max();
        if value < self.min || value > max {
            return Err(Error::PropertyRange {
                name: self.name.to_string(),
                value,
                min: self.min,
                max,
            });
        }
        self.value.store(value, Ordering::Release);
        Ok(())
    }

    pub fn max(&self) -> i32 {
        self.max
    }
}

#[derive(Debug, Clone)]
enum Property {
    Int(IntProperty),
    Bool(Arc<AtomicBool>),
    Str(Arc<RwLock<String>>),
}

/// A fixed set of named int/bool/string properties
#[derive(Debug, Clone, Default)]
pub struct Properties {
    props: BTreeMap<String, Property>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_int(&mut self, name: &str, value: i32, min: i32, max: i32) -> IntProperty {
        let prop = IntProperty::new(name, value, min, max);
        self.props.insert(name.into(), Property::Int(prop.clone()));
        prop
    }

    pub fn add_bool(&mut self, name: &str, value: bool) -> Arc<AtomicBool> {
        let cell = Arc::new(AtomicBool::new(value));
        self.props.insert(name.into(), Property::Bool(Arc::clone(&cell)));
        cell
    }

    pub fn add_string(&mut self, name: &str, value: impl Into<String>) {
        self.props
            .insert(name.into(), Property::Str(Arc::new(RwLock::new(value.into()))));
    }

    fn lookup(&self, name: &str) -> Result<&Property> {
        self.props
            .get(name)
            .ok_or_else(|| Error::MissingProperty(name.into()))
    }

    /// Shared handle to an int property
    pub fn int(&self, name: &str) -> Result<IntProperty> {
        match self.lookup(name)? {
            Property::Int(prop) => Ok(prop.clone()),
            _ => Err(type_error(name, "int")),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i32> {
        self.int(name).map(|prop| prop.get())
    }

    pub fn set_int(&self, name: &str, value: i32) -> Result<()> {
        self.int(name)?.set(value)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.lookup(name)? {
            Property::Bool(cell) => Ok(cell.load(Ordering::Acquire)),
            _ => Err(type_error(name, "bool")),
        }
    }

    pub fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        match self.lookup(name)? {
            Property::Bool(cell) => {
                cell.store(value, Ordering::Release);
                Ok(())
            }
            _ => Err(type_error(name, "bool")),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String> {
        match self.lookup(name)? {
            Property::Str(cell) => Ok(cell
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()),
            _ => Err(type_error(name, "string")),
        }
    }

    pub fn set_string(&self, name: &str, value: impl Into<String>) -> Result<()> {
        match self.lookup(name)? {
            Property::Str(cell) => {
                *cell.write().unwrap_or_else(PoisonError::into_inner) = value.into();
                Ok(())
            }
            _ => Err(type_error(name, "string")),
        }
    }

    /// Apply a `{"name": value, ...}` object, matching JSON types to
    /// property types
    pub fn apply_json(&self, values: &Value) -> Result<()> {
        let Some(values) = values.as_object() else {
            return Err(Error::Contract("property overrides must be a JSON object".into()));
        };

        for (name, value) in values {
            match (self.lookup(name)?, value) {
                (Property::Int(prop), Value::Number(n)) => {
                    let v = n
                        .as_i64()
                        .and_then(|v| i32::try_from(v).ok())
                        .ok_or_else(|| type_error(name, "int"))?;
                    prop.set(v)?;
                }
                (Property::Bool(_), Value::Bool(b)) => self.set_bool(name, *b)?,
                (Property::Str(_), Value::String(s)) => self.set_string(name, s.as_str())?,
                (Property::Int(_), _) => return Err(type_error(name, "int")),
                (Property::Bool(_), _) => return Err(type_error(name, "bool")),
                (Property::Str(_), _) => return Err(type_error(name, "string")),
            }
        }
        Ok(())
    }
}

fn type_error(name: &str, expected: &'static str) -> Error {
    Error::PropertyType {
        name: name.into(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props() -> Properties {
        let mut props = Properties::new();
        props.add_int("frame", 0, 0, 9);
        props.add_bool("loop", true);
        props.add_string("path", "/tmp/rec");
        props
    }

    #[test]
    fn int_handles_share_value() {
        let props = props();
        let handle = props.int("frame").unwrap();
        props.set_int("frame", 4).unwrap();
        assert_eq!(handle.get(), 4);
        assert_eq!(handle.max(), 9);
    }

    #[test]
    fn int_range_is_enforced() {
        let props = props();
        assert!(matches!(
            props.set_int("frame", 10),
            Err(Error::PropertyRange { value: 10, .. })
        ));
        assert_eq!(props.get_int("frame").unwrap(), 0);
    }

    #[test]
    fn type_mismatch_and_missing_names_are_errors() {
        let props = props();
        assert!(matches!(props.get_bool("frame"), Err(Error::PropertyType { .. })));
        assert!(matches!(props.get_int("nope"), Err(Error::MissingProperty(_))));
    }

    #[test]
    fn json_overrides_apply_by_type() {
        let props = props();
        props
            .apply_json(&json!({"frame": 3, "loop": false, "path": "/data"}))
            .unwrap();
        assert_eq!(props.get_int("frame").unwrap(), 3);
        assert!(!props.get_bool("loop").unwrap());
        assert_eq!(props.get_string("path").unwrap(), "/data");

        assert!(props.apply_json(&json!({"loop": 1})).is_err());
    }
}
