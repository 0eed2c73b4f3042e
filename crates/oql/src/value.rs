//! Runtime values of the host object model

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use indexmap::IndexMap;
use regex::Regex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::eval::Closure;
use crate::types::{EnumType, ResourceType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateTimeKind {
    Unspecified,
    Utc,
    Local,
}

/// A date and time without offset, tagged with the kind it was written in
#[derive(Debug, Clone, Copy)]
pub struct DateTimeValue {
    pub naive: NaiveDateTime,
    pub kind: DateTimeKind,
}

impl DateTimeValue {
    pub fn new(naive: NaiveDateTime, kind: DateTimeKind) -> Self {
        DateTimeValue { naive, kind }
    }

    pub fn utc(naive: NaiveDateTime) -> Self {
        Self::new(naive, DateTimeKind::Utc)
    }

    /// Round-trip text: whole seconds when there is no fraction, `Z` for UTC
    pub fn to_literal_text(&self) -> String {
        let format = if self.naive.nanosecond() == 0 {
            "%Y-%m-%dT%H:%M:%S"
        } else {
            "%Y-%m-%dT%H:%M:%S%.f"
        };
        let mut text = self.naive.format(format).to_string();
        if self.kind == DateTimeKind::Utc {
            text.push('Z');
        }
        text
    }
}

// Ordering and equality compare the clock value only, like .NET ticks
impl PartialEq for DateTimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.naive == other.naive
    }
}

impl PartialOrd for DateTimeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.naive.cmp(&other.naive))
    }
}

pub fn offset_literal_text(value: &DateTime<FixedOffset>) -> String {
    let format = if value.nanosecond() == 0 {
        "%Y-%m-%dT%H:%M:%S%:z"
    } else {
        "%Y-%m-%dT%H:%M:%S%.f%:z"
    };
    value.format(format).to_string()
}

static OFFSET_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[+-]\d{2}:\d{2}$").unwrap_or_else(|e| panic!("invalid offset regex: {e}"))
});

/// Either flavour of date literal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateLiteral {
    DateTime(DateTimeValue),
    DateTimeOffset(DateTime<FixedOffset>),
}

/// Parse the body of a `datetime'…'` literal. A trailing `±HH:MM` selects an
/// offset value; otherwise `Z` marks UTC and no designator is unspecified.
pub fn parse_date_literal(text: &str) -> Option<DateLiteral> {
    if OFFSET_SUFFIX.is_match(text) {
        return ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"]
            .iter()
            .find_map(|format| DateTime::parse_from_str(text, format).ok())
            .map(DateLiteral::DateTimeOffset);
    }

    let (body, kind) = match text.strip_suffix('Z') {
        Some(body) => (body, DateTimeKind::Utc),
        None => (text, DateTimeKind::Unspecified),
    };
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(body, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(body, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(DateLiteral::DateTime(DateTimeValue::new(naive, kind)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValue {
    pub ty: Arc<EnumType>,
    pub value: i64,
}

impl EnumValue {
    pub fn new(ty: &Arc<EnumType>, value: i64) -> Self {
        EnumValue {
            ty: ty.clone(),
            value,
        }
    }

    /// Look up a member by name, case-insensitively
    pub fn parse(ty: &Arc<EnumType>, name: &str) -> Option<Self> {
        ty.parse_member(name).map(|value| Self::new(ty, value))
    }

    pub fn name(&self) -> Option<&str> {
        self.ty.member_name(self.value)
    }
}

/// An instance of a resource type. Fields are keyed by member name.
#[derive(Debug, Clone)]
pub struct Entity {
    pub ty: Arc<ResourceType>,
    pub fields: IndexMap<String, Value>,
}

impl Entity {
    pub fn new(ty: &Arc<ResourceType>) -> Self {
        Entity {
            ty: ty.clone(),
            fields: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(Arc::new(self))
    }

    /// Missing fields read as null
    pub fn get(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.fields == other.fields
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    Guid(Uuid),
    DateTime(DateTimeValue),
    DateTimeOffset(DateTime<FixedOffset>),
    Enum(EnumValue),
    Object(Arc<Entity>),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
    Lambda(Arc<Closure>),
    Type(Type),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            Value::Enum(e) => Some(e.value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match self {
            Value::Lambda(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Arc<Entity>> {
        match self {
            Value::Object(e) => Some(e),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "Boolean",
            Value::Char(_) => "Char",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Float(_) => "Single",
            Value::Double(_) => "Double",
            Value::Decimal(_) => "Decimal",
            Value::String(_) => "String",
            Value::Guid(_) => "Guid",
            Value::DateTime(_) => "DateTime",
            Value::DateTimeOffset(_) => "DateTimeOffset",
            Value::Enum(_) => "Enum",
            Value::Object(_) => "Object",
            Value::Array(_) => "Array",
            Value::Map(_) => "Dictionary",
            Value::Lambda(_) => "Lambda",
            Value::Type(_) => "Type",
        }
    }

    /// The static type a constant of this value gets when none is given
    pub fn natural_type(&self) -> Type {
        match self {
            Value::Null | Value::Lambda(_) => Type::Object,
            Value::Bool(_) => Type::Bool,
            Value::Char(_) => Type::Char,
            Value::Int32(_) => Type::Int32,
            Value::Int64(_) => Type::Int64,
            Value::Float(_) => Type::Float,
            Value::Double(_) => Type::Double,
            Value::Decimal(_) => Type::Decimal,
            Value::String(_) => Type::String,
            Value::Guid(_) => Type::Guid,
            Value::DateTime(_) => Type::DateTime,
            Value::DateTimeOffset(_) => Type::DateTimeOffset,
            Value::Enum(e) => Type::Enum(e.ty.clone()),
            Value::Object(e) => Type::Resource(e.ty.clone()),
            Value::Array(items) => Type::array_of(
                items
                    .iter()
                    .find(|v| !v.is_null())
                    .map(Value::natural_type)
                    .unwrap_or(Type::Object),
            ),
            Value::Map(_) => Type::dictionary_of(Type::String, Type::Object),
            Value::Type(_) => Type::TypeRef,
        }
    }

    /// Runtime type test used by `isof` and `as`
    pub fn is_instance_of(&self, ty: &Type) -> bool {
        match (self, ty.underlying()) {
            (Value::Null, _) => false,
            (_, Type::Object) => true,
            (Value::Object(entity), Type::Resource(target)) => entity.ty.is_subtype_of(target),
            (Value::Enum(e), Type::Enum(target)) => e.ty == *target,
            (Value::Array(_), Type::Array(_) | Type::Enumerable(_)) => true,
            (Value::Map(_), Type::Dictionary(..)) => true,
            (value, target) => value.natural_type() == *target,
        }
    }

    /// Ordering between two non-null values of compatible kinds
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(_) | Value::Int32(_), Value::Int64(_) | Value::Int32(_)) => {
                Some(self.as_i64()?.cmp(&other.as_i64()?))
            }
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Guid(a), Value::Guid(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            (Value::DateTimeOffset(a), Value::DateTimeOffset(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.value.cmp(&b.value)),
            _ => None,
        }
    }

    /// Ordering for sorting: null first, then [`Value::compare`]
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Lambda(a), Value::Lambda(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Char(c) => write!(f, "{c}"),
            Value::Int32(n) => write!(f, "{n}"),
            Value::Int64(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Double(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Guid(g) => write!(f, "{g}"),
            Value::DateTime(d) => write!(f, "{}", d.to_literal_text()),
            Value::DateTimeOffset(d) => write!(f, "{}", offset_literal_text(d)),
            Value::Enum(e) => match e.name() {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "{}", e.value),
            },
            Value::Object(e) => write!(f, "<{}>", e.ty.name()),
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
            Value::Map(map) => write!(f, "<dictionary of {}>", map.len()),
            Value::Lambda(_) => write!(f, "<lambda>"),
            Value::Type(t) => write!(f, "{t}"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    char => Char,
    i32 => Int32,
    i64 => Int64,
    f32 => Float,
    f64 => Double,
    Decimal => Decimal,
    String => String,
    Uuid => Guid,
    DateTimeValue => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
    EnumValue => Enum,
    Vec<Value> => Array,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Entity> for Value {
    fn from(v: Entity) -> Self {
        v.into_value()
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
