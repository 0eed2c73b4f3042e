//! JSON documents ↔ typed values

use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Number, Value as Json};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::QueryTypeResolver;
use crate::types::{ResourceType, Type, camel_case};
use crate::value::{
    DateLiteral, DateTimeValue, EnumValue, Entity, Value, offset_literal_text, parse_date_literal,
};

/// Key naming the concrete type of an object in a polymorphic collection
pub const TYPE_KEY: &str = "_type";

#[derive(Error, Debug)]
pub enum JsonError {
    #[error("Expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },

    #[error("'{value}' is not a valid {expected}")]
    InvalidValue { expected: String, value: String },

    #[error("Type '{derived}' does not derive from {base}")]
    NotDerived { derived: String, base: String },

    #[error("Cannot read values of type {0} from JSON")]
    Unsupported(String),

    #[error("{0}")]
    Resolve(#[from] crate::error::ResolveError),
}

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn mismatch(expected: &Type, json: &Json) -> JsonError {
    JsonError::Mismatch {
        expected: expected.to_string(),
        found: json_kind(json).to_string(),
    }
}

fn invalid(expected: &Type, value: impl ToString) -> JsonError {
    JsonError::InvalidValue {
        expected: expected.to_string(),
        value: value.to_string(),
    }
}

impl Value {
    /// Read a JSON document as a value of type `ty`
    pub fn from_json(
        json: &Json,
        ty: &Type,
        resolver: &dyn QueryTypeResolver,
    ) -> Result<Value, JsonError> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let ty = ty.underlying();
        let value = match ty {
            Type::Bool => Value::Bool(json.as_bool().ok_or_else(|| mismatch(ty, json))?),
            Type::Char => {
                let s = json.as_str().ok_or_else(|| mismatch(ty, json))?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => return Err(invalid(ty, s)),
                }
            }
            Type::Int32 => {
                let n = json.as_i64().ok_or_else(|| mismatch(ty, json))?;
                Value::Int32(i32::try_from(n).map_err(|_| invalid(ty, n))?)
            }
            Type::Int64 => Value::Int64(json.as_i64().ok_or_else(|| mismatch(ty, json))?),
            Type::Float => Value::Float(json.as_f64().ok_or_else(|| mismatch(ty, json))? as f32),
            Type::Double => Value::Double(json.as_f64().ok_or_else(|| mismatch(ty, json))?),
            Type::Decimal => {
                let text = match json {
                    Json::Number(n) => n.to_string(),
                    Json::String(s) => s.clone(),
                    other => return Err(mismatch(ty, other)),
                };
                let parsed = Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text));
                Value::Decimal(parsed.map_err(|_| invalid(ty, &text))?)
            }
            Type::String => Value::String(json.as_str().ok_or_else(|| mismatch(ty, json))?.into()),
            Type::Guid => {
                let s = json.as_str().ok_or_else(|| mismatch(ty, json))?;
                Value::Guid(Uuid::parse_str(s).map_err(|_| invalid(ty, s))?)
            }
            Type::DateTime => {
                let s = json.as_str().ok_or_else(|| mismatch(ty, json))?;
                match parse_date_literal(s).ok_or_else(|| invalid(ty, s))? {
                    DateLiteral::DateTime(d) => Value::DateTime(d),
                    DateLiteral::DateTimeOffset(d) => {
                        Value::DateTime(DateTimeValue::utc(d.naive_utc()))
                    }
                }
            }
            Type::DateTimeOffset => {
                let s = json.as_str().ok_or_else(|| mismatch(ty, json))?;
                match parse_date_literal(s).ok_or_else(|| invalid(ty, s))? {
                    DateLiteral::DateTimeOffset(d) => Value::DateTimeOffset(d),
                    DateLiteral::DateTime(d) => {
                        Value::DateTimeOffset(d.naive.and_utc().fixed_offset())
                    }
                }
            }
            Type::Enum(enum_type) => match json {
                Json::String(s) => {
                    Value::Enum(EnumValue::parse(enum_type, s).ok_or_else(|| invalid(ty, s))?)
                }
                Json::Number(n) => {
                    let n = n.as_i64().ok_or_else(|| invalid(ty, n))?;
                    Value::Enum(EnumValue::new(enum_type, n))
                }
                other => return Err(mismatch(ty, other)),
            },
            Type::Resource(resource) => {
                let Json::Object(fields) = json else {
                    return Err(mismatch(ty, json));
                };
                entity_from_json(fields, resource, resolver)?
            }
            Type::Array(element) | Type::Enumerable(element) => {
                let items = json.as_array().ok_or_else(|| mismatch(ty, json))?;
                Value::Array(
                    items
                        .iter()
                        .map(|item| Value::from_json(item, element, resolver))
                        .collect::<Result<_, _>>()?,
                )
            }
            Type::Dictionary(_, value_type) => {
                let fields = json.as_object().ok_or_else(|| mismatch(ty, json))?;
                let mut map = IndexMap::with_capacity(fields.len());
                for (key, item) in fields {
                    map.insert(key.clone(), Value::from_json(item, value_type, resolver)?);
                }
                Value::Map(map)
            }
            Type::Object => untyped(json),
            other => return Err(JsonError::Unsupported(other.to_string())),
        };
        Ok(value)
    }

    /// Render as JSON; resource fields use their camelCase query names
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null | Value::Lambda(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Char(c) => Json::String(c.to_string()),
            Value::Int32(n) => Json::from(*n),
            Value::Int64(n) => Json::from(*n),
            Value::Float(n) => float(f64::from(*n)),
            Value::Double(n) => float(*n),
            Value::Decimal(d) => d.to_f64().map_or(Json::Null, float),
            Value::String(s) => Json::String(s.clone()),
            Value::Guid(g) => Json::String(g.to_string()),
            Value::DateTime(d) => Json::String(d.to_literal_text()),
            Value::DateTimeOffset(d) => Json::String(offset_literal_text(d)),
            Value::Enum(e) => match e.name() {
                Some(name) => Json::String(name.to_string()),
                None => Json::from(e.value),
            },
            Value::Object(entity) => {
                let mut out = Map::new();
                for property in entity.ty.properties() {
                    out.insert(property.query_name(), entity.get(&property.name).to_json());
                }
                Json::Object(out)
            }
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Type(t) => Json::String(t.type_name()),
        }
    }
}

fn float(n: f64) -> Json {
    Number::from_f64(n).map_or(Json::Null, Json::Number)
}

fn entity_from_json(
    fields: &Map<String, Json>,
    declared: &Arc<ResourceType>,
    resolver: &dyn QueryTypeResolver,
) -> Result<Value, JsonError> {
    let resource = match fields.get(TYPE_KEY).and_then(Json::as_str) {
        Some(name) => {
            let ty = resolver.resolve_type(name)?;
            match ty.as_resource() {
                Some(derived) if derived.is_subtype_of(declared) => derived.clone(),
                _ => {
                    return Err(JsonError::NotDerived {
                        derived: name.to_string(),
                        base: declared.name().to_string(),
                    });
                }
            }
        }
        None => declared.clone(),
    };

    let mut entity = Entity::new(&resource);
    for property in resource.properties() {
        let json = fields
            .get(&camel_case(&property.name))
            .or_else(|| fields.get(&property.name));
        let value = match json {
            Some(json) => Value::from_json(json, &property.ty, resolver)?,
            None => Value::Null,
        };
        entity.fields.insert(property.name.clone(), value);
    }
    Ok(entity.into_value())
}

/// Natural mapping for `Object`-typed slots
fn untyped(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => i32::try_from(i).map_or(Value::Int64(i), Value::Int32),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(untyped).collect()),
        Json::Object(fields) => Value::Map(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), untyped(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::Schema;

    fn schema() -> Schema {
        Schema::from_json(
            r#"{
                "enums": [{ "name": "Kind", "members": ["Cat", "Dog"] }],
                "types": [
                    { "name": "Pet", "properties": { "Name": "String", "Kind": "Kind", "Age": "Int32?" } },
                    { "name": "ShowDog", "base": "Pet", "properties": { "Prizes": "Decimal[]" } }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn reads_typed_entities() {
        let schema = schema();
        let pet = Type::Resource(schema.resource("Pet").unwrap().clone());
        let value = Value::from_json(
            &json!({ "name": "Rex", "Kind": "dog", "age": null }),
            &pet,
            &schema,
        )
        .unwrap();
        let entity = value.as_entity().unwrap();
        assert_eq!(entity.get("Name"), &Value::from("Rex"));
        assert_eq!(entity.get("Kind").as_i64(), Some(1));
        assert!(entity.get("Age").is_null());
    }

    #[test]
    fn type_key_selects_derived_type() {
        let schema = schema();
        let pet = Type::Resource(schema.resource("Pet").unwrap().clone());
        let value = Value::from_json(
            &json!({ "_type": "ShowDog", "name": "Rex", "prizes": [1.5, "2.25"] }),
            &pet,
            &schema,
        )
        .unwrap();
        let entity = value.as_entity().unwrap();
        assert_eq!(entity.ty.name(), "ShowDog");
        assert_eq!(
            entity.get("Prizes"),
            &Value::Array(vec![
                Value::Decimal(Decimal::new(15, 1)),
                Value::Decimal(Decimal::new(225, 2))
            ])
        );
    }

    #[test]
    fn rejects_mismatched_values() {
        let schema = schema();
        assert!(matches!(
            Value::from_json(&json!("x"), &Type::Int32, &schema),
            Err(JsonError::Mismatch { .. })
        ));
        assert!(matches!(
            Value::from_json(&json!(1i64 << 40), &Type::Int32, &schema),
            Err(JsonError::InvalidValue { .. })
        ));
    }

    #[test]
    fn writes_camel_case_fields() {
        let schema = schema();
        let pet = schema.resource("Pet").unwrap();
        let kind = schema.enum_type("Kind").unwrap();
        let value = Entity::new(pet)
            .with("Name", "Tom")
            .with("Kind", EnumValue::new(kind, 0))
            .into_value();
        assert_eq!(
            value.to_json(),
            json!({ "name": "Tom", "kind": "Cat", "age": null })
        );
    }
}
