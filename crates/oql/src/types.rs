//! Static types of the host object model

use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Char,
    Int32,
    Int64,
    Float,
    Double,
    Decimal,
    String,
    Guid,
    DateTime,
    DateTimeOffset,
    Object,
    Enum(Arc<EnumType>),
    Resource(Arc<ResourceType>),
    Nullable(Box<Type>),
    Array(Box<Type>),
    Enumerable(Box<Type>),
    Dictionary(Box<Type>, Box<Type>),
    Function(Vec<Type>, Box<Type>),
    Expression(Box<Type>),
    /// The type of a `t'…'` literal
    TypeRef,
}

impl Type {
    pub fn nullable_of(inner: Type) -> Type {
        Type::Nullable(Box::new(inner))
    }

    pub fn array_of(inner: Type) -> Type {
        Type::Array(Box::new(inner))
    }

    pub fn enumerable_of(inner: Type) -> Type {
        Type::Enumerable(Box::new(inner))
    }

    pub fn dictionary_of(key: Type, value: Type) -> Type {
        Type::Dictionary(Box::new(key), Box::new(value))
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Type {
        Type::Function(params, Box::new(ret))
    }

    /// Value types cannot hold null unless wrapped in `Nullable`
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::Char
                | Type::Int32
                | Type::Int64
                | Type::Float
                | Type::Double
                | Type::Decimal
                | Type::Guid
                | Type::DateTime
                | Type::DateTimeOffset
                | Type::Enum(_)
                | Type::Nullable(_)
        )
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, Type::Nullable(_))
    }

    pub fn can_be_null(&self) -> bool {
        self.is_nullable() || !self.is_value_type()
    }

    /// `T` for `Nullable<T>`, the type itself otherwise
    pub fn underlying(&self) -> &Type {
        match self {
            Type::Nullable(inner) => inner,
            other => other,
        }
    }

    /// Lift a non-nullable value type to `Nullable<T>`; other types are returned as-is
    pub fn to_nullable(&self) -> Type {
        if self.is_value_type() && !self.is_nullable() {
            Type::nullable_of(self.clone())
        } else {
            self.clone()
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Type::Int32 | Type::Int64 | Type::Float | Type::Double | Type::Decimal
        )
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.underlying(), Type::Enum(_))
    }

    /// Element type of arrays and enumerables
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(inner) | Type::Enumerable(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn dictionary_types(&self) -> Option<(&Type, &Type)> {
        match self {
            Type::Dictionary(k, v) => Some((k, v)),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Arc<ResourceType>> {
        match self {
            Type::Resource(r) => Some(r),
            _ => None,
        }
    }

    /// Whether a value of type `other` can be stored in a slot of type `self`
    pub fn is_assignable_from(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Type::Object, _) => true,
            (Type::Resource(target), Type::Resource(source)) => source.is_subtype_of(target),
            (Type::Enumerable(target), Type::Array(source) | Type::Enumerable(source)) => {
                target == source || (!source.is_value_type() && target.is_assignable_from(source))
            }
            (Type::Function(tp, tr), Type::Function(sp, sr)) => {
                tp == sp && tr.is_assignable_from(sr)
            }
            (Type::Expression(target), Type::Expression(source)) => {
                target.is_assignable_from(source)
            }
            _ => false,
        }
    }

    /// Name used in `t'…'` literals
    pub fn type_name(&self) -> String {
        match self {
            Type::Bool => "Boolean".into(),
            Type::Char => "Char".into(),
            Type::Int32 => "Int32".into(),
            Type::Int64 => "Int64".into(),
            Type::Float => "Single".into(),
            Type::Double => "Double".into(),
            Type::Decimal => "Decimal".into(),
            Type::String => "String".into(),
            Type::Guid => "Guid".into(),
            Type::DateTime => "DateTime".into(),
            Type::DateTimeOffset => "DateTimeOffset".into(),
            Type::Object => "Object".into(),
            Type::Enum(e) => e.name().into(),
            Type::Resource(r) => r.name().into(),
            Type::Nullable(inner) => inner.type_name(),
            other => other.to_string(),
        }
    }

    /// Primitive types addressable by name
    pub fn primitive(name: &str) -> Option<Type> {
        let ty = match name {
            "Boolean" | "Bool" => Type::Bool,
            "Char" => Type::Char,
            "Int32" => Type::Int32,
            "Int64" => Type::Int64,
            "Single" | "Float" => Type::Float,
            "Double" => Type::Double,
            "Decimal" => Type::Decimal,
            "String" => Type::String,
            "Guid" => Type::Guid,
            "DateTime" => Type::DateTime,
            "DateTimeOffset" => Type::DateTimeOffset,
            "Object" => Type::Object,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Nullable(inner) => write!(f, "Nullable<{inner}>"),
            Type::Array(inner) => write!(f, "{inner}[]"),
            Type::Enumerable(inner) => write!(f, "IEnumerable<{inner}>"),
            Type::Dictionary(k, v) => write!(f, "IDictionary<{k},{v}>"),
            Type::Function(params, ret) => {
                write!(f, "Func<")?;
                for p in params {
                    write!(f, "{p},")?;
                }
                write!(f, "{ret}>")
            }
            Type::Expression(inner) => write!(f, "Expression<{inner}>"),
            Type::TypeRef => write!(f, "Type"),
            other => f.write_str(&other.type_name()),
        }
    }
}

/// A named enum with integral member values
#[derive(Debug, Clone)]
pub struct EnumType {
    name: String,
    members: Vec<(String, i64)>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, members: Vec<(String, i64)>) -> Arc<Self> {
        Arc::new(EnumType {
            name: name.into(),
            members,
        })
    }

    /// Members numbered from zero in declaration order
    pub fn sequential(name: impl Into<String>, members: &[&str]) -> Arc<Self> {
        let members = members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.to_string(), i as i64))
            .collect();
        Self::new(name, members)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[(String, i64)] {
        &self.members
    }

    /// Case-insensitive member lookup
    pub fn parse_member(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn member_name(&self, value: i64) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(m, _)| m.as_str())
    }
}

impl PartialEq for EnumType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EnumType {}

impl std::hash::Hash for EnumType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A property declared on a resource type. `name` is the host member name.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub ty: Type,
}

impl Property {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Property {
            name: name.into(),
            ty,
        }
    }

    /// camelCase name used in query text
    pub fn query_name(&self) -> String {
        camel_case(&self.name)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.query_name() == name || self.name.eq_ignore_ascii_case(name)
    }
}

/// Lowercase the first character
pub fn camel_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A resource (entity) type with single inheritance.
///
/// Properties are set once; the two-step construction allows resource types
/// that reference each other.
pub struct ResourceType {
    name: String,
    base: Option<Arc<ResourceType>>,
    closure: bool,
    properties: OnceLock<Vec<Arc<Property>>>,
}

impl ResourceType {
    pub fn new(name: impl Into<String>, base: Option<Arc<ResourceType>>) -> Self {
        ResourceType {
            name: name.into(),
            base,
            closure: false,
            properties: OnceLock::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> ResourceTypeBuilder {
        ResourceTypeBuilder {
            ty: ResourceType::new(name, None),
            properties: Vec::new(),
        }
    }

    /// Set the declared properties. Returns false if they were already set.
    pub fn define_properties(&self, properties: Vec<Property>) -> bool {
        self.properties
            .set(properties.into_iter().map(Arc::new).collect())
            .is_ok()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Option<&Arc<ResourceType>> {
        self.base.as_ref()
    }

    /// Closure types hold captured client-side values and fold away before serialization
    pub fn is_closure(&self) -> bool {
        self.closure
    }

    pub fn declared_properties(&self) -> &[Arc<Property>] {
        self.properties.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// All properties, base type first
    pub fn properties(&self) -> Vec<Arc<Property>> {
        let mut all = match &self.base {
            Some(base) => base.properties(),
            None => Vec::new(),
        };
        all.extend(self.declared_properties().iter().cloned());
        all
    }

    /// Look up a property by query name or member name, walking the base chain
    pub fn find_property(&self, name: &str) -> Option<Arc<Property>> {
        self.declared_properties()
            .iter()
            .find(|p| p.matches(name))
            .cloned()
            .or_else(|| self.base.as_ref().and_then(|b| b.find_property(name)))
    }

    pub fn is_subtype_of(&self, other: &ResourceType) -> bool {
        if self.name == other.name {
            return true;
        }
        self.base.as_ref().is_some_and(|b| b.is_subtype_of(other))
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ResourceType {}

impl std::hash::Hash for ResourceType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("base", &self.base.as_ref().map(|b| b.name()))
            .finish_non_exhaustive()
    }
}

pub struct ResourceTypeBuilder {
    ty: ResourceType,
    properties: Vec<Property>,
}

impl ResourceTypeBuilder {
    pub fn base(mut self, base: &Arc<ResourceType>) -> Self {
        self.ty.base = Some(base.clone());
        self
    }

    pub fn closure(mut self) -> Self {
        self.ty.closure = true;
        self
    }

    pub fn property(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.properties.push(Property::new(name, ty));
        self
    }

    pub fn build(self) -> Arc<ResourceType> {
        self.ty.define_properties(self.properties);
        Arc::new(self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animals() -> (Arc<ResourceType>, Arc<ResourceType>) {
        let animal = ResourceType::builder("Animal")
            .property("Id", Type::Int32)
            .property("Name", Type::String)
            .build();
        let dog = ResourceType::builder("Dog")
            .base(&animal)
            .property("BarkVolume", Type::Int32)
            .build();
        (animal, dog)
    }

    #[test]
    fn nullable_not_assignable_from_underlying() {
        let nullable = Type::nullable_of(Type::Int32);
        assert!(!nullable.is_assignable_from(&Type::Int32));
        assert!(!Type::Int32.is_assignable_from(&nullable));
        assert!(Type::Object.is_assignable_from(&nullable));
    }

    #[test]
    fn resource_assignability_follows_inheritance() {
        let (animal, dog) = animals();
        let animal = Type::Resource(animal);
        let dog = Type::Resource(dog);
        assert!(animal.is_assignable_from(&dog));
        assert!(!dog.is_assignable_from(&animal));
        assert!(Type::enumerable_of(animal.clone()).is_assignable_from(&Type::array_of(dog)));
        assert!(!Type::enumerable_of(Type::Int64).is_assignable_from(&Type::array_of(Type::Int32)));
    }

    #[test]
    fn property_lookup_walks_base_and_ignores_case() {
        let (_, dog) = animals();
        assert_eq!(dog.find_property("name").unwrap().name, "Name");
        assert_eq!(dog.find_property("BARKVOLUME").unwrap().name, "BarkVolume");
        assert!(dog.find_property("missing").is_none());
        let names: Vec<_> = dog.properties().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, ["Id", "Name", "BarkVolume"]);
    }

    #[test]
    fn cyclic_types_via_two_step_definition() {
        let person = Arc::new(ResourceType::new("Person", None));
        let pet = ResourceType::builder("Pet")
            .property("Owner", Type::Resource(person.clone()))
            .build();
        assert!(person.define_properties(vec![Property::new(
            "Pets",
            Type::array_of(Type::Resource(pet.clone())),
        )]));
        assert!(!person.define_properties(Vec::new()));
        let owner = pet.find_property("owner").unwrap();
        let pets = owner.ty.as_resource().unwrap().find_property("pets").unwrap();
        assert_eq!(pets.ty.to_string(), "Pet[]");
    }

    #[test]
    fn enum_members_parse_case_insensitively() {
        let status = EnumType::sequential("Status", &["Active", "Inactive"]);
        assert_eq!(status.parse_member("inactive"), Some(1));
        assert_eq!(status.member_name(0), Some("Active"));
        assert_eq!(status.parse_member("gone"), None);
    }

    #[test]
    fn type_names() {
        assert_eq!(Type::nullable_of(Type::Int32).type_name(), "Int32");
        assert_eq!(
            Type::function(vec![Type::Int32], Type::Bool).to_string(),
            "Func<Int32,Boolean>"
        );
        assert_eq!(camel_case("BarkVolume"), "barkVolume");
    }
}
