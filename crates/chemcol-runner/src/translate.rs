//! Conversions between the backend's internal conventions and the
//! module-agnostic schema shared with collaborating modules.
//!
//! Internal pressure is in tenths of the external unit and internal height in
//! hundredths, so importing multiplies and exporting divides.

use crate::error::ControllerError;
use crate::grid::Column;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const PRESSURE_SCALE: f64 = 1e1;
pub const HEIGHT_SCALE: f64 = 1e2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Import,
    Export,
}

pub fn translate_pressure(direction: Direction, pressure: f64) -> f64 {
    match direction {
        Direction::Import => pressure * PRESSURE_SCALE,
        Direction::Export => pressure / PRESSURE_SCALE,
    }
}

pub fn translate_height(direction: Direction, height: f64) -> f64 {
    match direction {
        Direction::Import => height * HEIGHT_SCALE,
        Direction::Export => height / HEIGHT_SCALE,
    }
}

/// Column identifier in the external schema: `(layer, x, y)`.
///
/// Serialized as the string `"(2, 0, 1)"` so it can key a JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExternalColumn {
    pub layer: u32,
    pub x: u32,
    pub y: u32,
}

impl ExternalColumn {
    pub fn new(layer: u32, x: u32, y: u32) -> Self {
        Self { layer, x, y }
    }

    pub fn to_column(self, width: usize) -> Column {
        Column {
            layer: self.layer,
            x: self.x,
            y: self.y,
            width,
        }
    }
}

impl From<Column> for ExternalColumn {
    fn from(c: Column) -> Self {
        Self::new(c.layer, c.x, c.y)
    }
}

impl fmt::Display for ExternalColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.layer, self.x, self.y)
    }
}

impl FromStr for ExternalColumn {
    type Err = ControllerError;

    /// Accepts `(2, 0, 1)`, `[2,0,1]` and `2,0,1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ControllerError::InvalidColumn { raw: s.to_string() };
        let inner = s
            .trim()
            .trim_start_matches(['(', '['])
            .trim_end_matches([')', ']']);
        let parts = inner
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        match parts.as_slice() {
            [layer, x, y] => Ok(Self::new(*layer, *x, *y)),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ExternalColumn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExternalColumn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn column_to_external(internal: &str) -> Result<ExternalColumn, ControllerError> {
    Column::decode(internal).map(ExternalColumn::from)
}

pub fn column_from_external(external: ExternalColumn, width: usize) -> String {
    external.to_column(width).encode()
}

pub type ImportMap = BTreeMap<ExternalColumn, BTreeMap<String, Value>>;

/// Convert one inbound override into backend units. Keys naming a height or a
/// pressure are scaled; numbers inside arrays are scaled element-wise and
/// anything non-numeric passes through.
pub fn import_override_value(key: &str, value: &Value) -> Value {
    let scale: fn(Direction, f64) -> f64 = if key.contains("Height") {
        translate_height
    } else if key.contains("Pressure") {
        translate_pressure
    } else {
        return value.clone();
    };
    scale_numbers(value, &|v| scale(Direction::Import, v))
}

fn scale_numbers(value: &Value, f: &dyn Fn(f64) -> f64) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|v| serde_json::Number::from_f64(f(v)))
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| scale_numbers(v, f)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn units_round_trip() {
        for h in [0.0, 1.0, -2.5, 0.1, 123456.789, 1e-9, 3.3e7] {
            let back = translate_height(Direction::Export, translate_height(Direction::Import, h));
            assert!(close(back, h), "height {} -> {}", h, back);
            let back =
                translate_pressure(Direction::Export, translate_pressure(Direction::Import, h));
            assert!(close(back, h), "pressure {} -> {}", h, back);
        }
        assert_eq!(translate_height(Direction::Import, 5.0), 500.0);
        assert_eq!(translate_pressure(Direction::Export, 1e5), 1e4);
    }

    #[test]
    fn column_round_trip() {
        for raw in ["200", "212", "299", "21102", "3000000"] {
            let ext = column_to_external(raw).unwrap();
            let width = (raw.len() - 1) / 2;
            assert_eq!(column_from_external(ext, width), raw);
        }
        assert_eq!(column_to_external("212").unwrap(), ExternalColumn::new(2, 1, 2));
    }

    #[test]
    fn external_column_parses_common_spellings() {
        let want = ExternalColumn::new(2, 0, 1);
        assert_eq!("(2, 0, 1)".parse::<ExternalColumn>().unwrap(), want);
        assert_eq!("[2,0,1]".parse::<ExternalColumn>().unwrap(), want);
        assert_eq!("2,0,1".parse::<ExternalColumn>().unwrap(), want);
        assert!("2,0".parse::<ExternalColumn>().is_err());
        assert_eq!(want.to_string(), "(2, 0, 1)");
    }

    #[test]
    fn import_overrides_scale_height_and_pressure() {
        assert_eq!(import_override_value("upperHeight", &json!(5.0)), json!(500.0));
        assert_eq!(
            import_override_value("levelPressure", &json!([1.0, 2.0])),
            json!([10.0, 20.0])
        );
        assert_eq!(import_override_value("OH", &json!(1e17)), json!(1e17));
        assert_eq!(import_override_value("upperHeight", &json!("n/a")), json!("n/a"));
    }
}
