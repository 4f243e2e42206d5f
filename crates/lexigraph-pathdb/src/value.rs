//! Typed field values: coercion from JSON, comparison and rendering.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Number, Value as Json};

use crate::schema::{FieldType, PrimitiveType, Schema};
use crate::DbConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Boolean(bool),
    /// `xsd:decimal`, `xsd:double` and `xsd:float`.
    Decimal(f64),
    /// Every integer subtype; the declared type bounds the range.
    Integer(i128),
    DateTime(DateTime<Utc>),
    Enum(String),
    /// Relative instance id.
    Ref(String),
}

/// Why a JSON value could not be coerced to a field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoerceError {
    TypeMismatch,
    OutOfRange(PrimitiveType),
    InvalidEnumValue,
}

impl Value {
    /// Coerce one JSON value to `ty`. Reference values may be relative or
    /// expanded ids; they are stored relative.
    pub fn coerce(
        ty: &FieldType,
        json: &Json,
        schema: &Schema,
        config: &DbConfig,
    ) -> Result<Value, CoerceError> {
        match ty {
            FieldType::Primitive(p) => coerce_primitive(*p, json),
            FieldType::Enum(name) => {
                let s = json.as_str().ok_or(CoerceError::TypeMismatch)?;
                match schema.enum_def(name) {
                    Some(def) if def.contains(s) => Ok(Value::Enum(s.to_string())),
                    _ => Err(CoerceError::InvalidEnumValue),
                }
            }
            FieldType::Class(_) => {
                let id = match json {
                    Json::String(s) => s.as_str(),
                    // `{"@id": ...}` link objects.
                    Json::Object(obj) => obj
                        .get("@id")
                        .and_then(Json::as_str)
                        .ok_or(CoerceError::TypeMismatch)?,
                    _ => return Err(CoerceError::TypeMismatch),
                };
                if id.is_empty() {
                    return Err(CoerceError::TypeMismatch);
                }
                Ok(Value::Ref(config.relative_id(id).to_string()))
            }
        }
    }

    /// Same-variant comparison; `None` across variants.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.total_cmp(b)),
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.cmp(b)),
            (Value::Ref(a), Value::Ref(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Text used when the value participates in a key.
    pub fn key_text(&self) -> String {
        match self {
            Value::String(s) | Value::Enum(s) | Value::Ref(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Decimal(d) => format_decimal(*d),
            Value::Integer(i) => i.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// Render for a query result. Small integer types and decimals become
    /// JSON numbers; unbounded integer types become decimal strings.
    pub fn to_json(&self, ty: &FieldType, config: &DbConfig) -> Json {
        match self {
            Value::String(s) | Value::Enum(s) => Json::String(s.clone()),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Decimal(d) => decimal_json(*d),
            Value::Integer(i) => match ty {
                FieldType::Primitive(
                    PrimitiveType::Int | PrimitiveType::Short | PrimitiveType::Byte,
                ) => i64::try_from(*i)
                    .map(Json::from)
                    .unwrap_or_else(|_| Json::String(i.to_string())),
                _ => Json::String(i.to_string()),
            },
            Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Ref(id) => Json::String(config.expand_id(id)),
        }
    }
}

fn coerce_primitive(ty: PrimitiveType, json: &Json) -> Result<Value, CoerceError> {
    match ty {
        PrimitiveType::String => json
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or(CoerceError::TypeMismatch),
        PrimitiveType::Boolean => match json {
            Json::Bool(b) => Ok(Value::Boolean(*b)),
            Json::String(s) if s == "true" => Ok(Value::Boolean(true)),
            Json::String(s) if s == "false" => Ok(Value::Boolean(false)),
            _ => Err(CoerceError::TypeMismatch),
        },
        PrimitiveType::Decimal | PrimitiveType::Double => {
            let d = match json {
                Json::Number(n) => n.as_f64(),
                Json::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or(CoerceError::TypeMismatch)?;
            if d.is_finite() {
                Ok(Value::Decimal(d))
            } else {
                Err(CoerceError::TypeMismatch)
            }
        }
        PrimitiveType::DateTime => {
            let s = json.as_str().ok_or(CoerceError::TypeMismatch)?;
            DateTime::parse_from_rfc3339(s)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| CoerceError::TypeMismatch)
        }
        integer => {
            let (min, max) = integer.integer_range().ok_or(CoerceError::TypeMismatch)?;
            let i = json_integer(json).ok_or(CoerceError::TypeMismatch)?;
            if i < min || i > max {
                return Err(CoerceError::OutOfRange(integer));
            }
            Ok(Value::Integer(i))
        }
    }
}

fn json_integer(json: &Json) -> Option<i128> {
    match json {
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i as i128)
            } else if let Some(u) = n.as_u64() {
                Some(u as i128)
            } else {
                let f = n.as_f64()?;
                (f.fract() == 0.0 && f.abs() < 1e38).then_some(f as i128)
            }
        }
        Json::String(s) => s.trim().parse::<i128>().ok(),
        _ => None,
    }
}

const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

fn decimal_json(d: f64) -> Json {
    if d.fract() == 0.0 && d.abs() < MAX_EXACT_F64_INT {
        Json::from(d as i64)
    } else {
        Number::from_f64(d).map(Json::Number).unwrap_or(Json::Null)
    }
}

fn format_decimal(d: f64) -> String {
    if d.fract() == 0.0 && d.abs() < MAX_EXACT_F64_INT {
        (d as i64).to_string()
    } else {
        d.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::from_json_str(
            r#"[{ "@id": "Color", "@type": "Enum", "@value": ["red", "blue"] }]"#,
        )
        .unwrap()
    }

    fn prim(p: PrimitiveType, json: Json) -> Result<Value, CoerceError> {
        Value::coerce(&FieldType::Primitive(p), &json, &schema(), &DbConfig::default())
    }

    #[test]
    fn integer_subtypes_are_range_checked() {
        assert_eq!(prim(PrimitiveType::Byte, json!(127)), Ok(Value::Integer(127)));
        assert_eq!(
            prim(PrimitiveType::Byte, json!(128)),
            Err(CoerceError::OutOfRange(PrimitiveType::Byte))
        );
        assert_eq!(
            prim(PrimitiveType::NonNegativeInteger, json!(-1)),
            Err(CoerceError::OutOfRange(PrimitiveType::NonNegativeInteger))
        );
        assert_eq!(prim(PrimitiveType::Integer, json!("42")), Ok(Value::Integer(42)));
        assert_eq!(prim(PrimitiveType::Int, json!(1.5)), Err(CoerceError::TypeMismatch));
    }

    #[test]
    fn decimals_accept_numbers_and_numeric_strings() {
        assert_eq!(prim(PrimitiveType::Decimal, json!(61)), Ok(Value::Decimal(61.0)));
        assert_eq!(prim(PrimitiveType::Decimal, json!("2.5")), Ok(Value::Decimal(2.5)));
        assert_eq!(prim(PrimitiveType::Decimal, json!("NaN")), Err(CoerceError::TypeMismatch));
        assert_eq!(prim(PrimitiveType::Decimal, json!(true)), Err(CoerceError::TypeMismatch));
    }

    #[test]
    fn enums_reject_unknown_values() {
        let ty = FieldType::Enum("Color".into());
        let cfg = DbConfig::default();
        assert_eq!(
            Value::coerce(&ty, &json!("red"), &schema(), &cfg),
            Ok(Value::Enum("red".into()))
        );
        assert_eq!(
            Value::coerce(&ty, &json!("green"), &schema(), &cfg),
            Err(CoerceError::InvalidEnumValue)
        );
    }

    #[test]
    fn references_are_stored_relative_and_rendered_expanded() {
        let cfg = DbConfig::default();
        let ty = FieldType::Class("Person".into());
        let v = Value::coerce(&ty, &json!("terminusdb:///data/Person/Plato"), &schema(), &cfg)
            .unwrap();
        assert_eq!(v, Value::Ref("Person/Plato".into()));
        assert_eq!(v.to_json(&ty, &cfg), json!("terminusdb:///data/Person/Plato"));
    }

    #[test]
    fn rendering_follows_the_declared_type() {
        let cfg = DbConfig::default();
        let integer = FieldType::Primitive(PrimitiveType::Integer);
        let byte = FieldType::Primitive(PrimitiveType::Byte);
        let decimal = FieldType::Primitive(PrimitiveType::Decimal);
        assert_eq!(Value::Integer(3).to_json(&integer, &cfg), json!("3"));
        assert_eq!(Value::Integer(3).to_json(&byte, &cfg), json!(3));
        assert_eq!(Value::Decimal(61.0).to_json(&decimal, &cfg), json!(61));
        assert_eq!(Value::Decimal(1.25).to_json(&decimal, &cfg), json!(1.25));
    }

    #[test]
    fn comparison_is_per_variant() {
        assert_eq!(
            Value::Decimal(1.0).compare(&Value::Decimal(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Integer(1).compare(&Value::Decimal(1.0)), None);
        assert_eq!(
            Value::String("Kurt".into()).compare(&Value::String("K".into())),
            Some(Ordering::Greater)
        );
    }
}
