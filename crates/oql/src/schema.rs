//! Type registry and the resolver contract consumed by the converter

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::error::ResolveError;
use crate::expr::Expr;
use crate::types::{EnumType, Property, ResourceType, Type};

/// Resolves type names and property paths for the converter
pub trait QueryTypeResolver: Send + Sync {
    /// Resolve the name inside a `t'…'` literal
    fn resolve_type(&self, name: &str) -> Result<Type, ResolveError>;

    /// Resolve a (possibly dotted) property path against `instance`
    fn resolve_property(&self, instance: &Expr, path: &str) -> Result<Expr, ResolveError>;
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Duplicate type '{0}'")]
    DuplicateType(String),

    #[error("Type '{type_name}' derives from unknown type '{base}'")]
    UnknownBase { type_name: String, base: String },

    #[error("Inheritance cycle involving '{0}'")]
    CyclicInheritance(String),

    #[error("Property '{type_name}.{property}': {source}")]
    PropertyType {
        type_name: String,
        property: String,
        source: ResolveError,
    },

    #[error("Invalid schema document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable description of a schema
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub enums: Vec<EnumDefinition>,
    #[serde(default)]
    pub types: Vec<TypeDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    /// Member name → type name, e.g. `"Tags": "String[]"` or `"Age": "Int32?"`
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// Registry of resource and enum types.
///
/// Property lookups are cached per (type, name); the cache is concurrent so a
/// shared schema can serve parallel conversions.
#[derive(Debug, Default)]
pub struct Schema {
    resources: IndexMap<String, Arc<ResourceType>>,
    enums: IndexMap<String, Arc<EnumType>>,
    property_cache: DashMap<(String, String), Arc<Property>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_resource(&mut self, ty: Arc<ResourceType>) -> &mut Self {
        self.resources.insert(ty.name().to_string(), ty);
        self
    }

    pub fn add_enum(&mut self, ty: Arc<EnumType>) -> &mut Self {
        self.enums.insert(ty.name().to_string(), ty);
        self
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<ResourceType>> {
        self.resources.get(name)
    }

    pub fn enum_type(&self, name: &str) -> Option<&Arc<EnumType>> {
        self.enums.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<ResourceType>> {
        self.resources.values()
    }

    pub fn from_json(json: &str) -> Result<Schema, SchemaError> {
        let definition: SchemaDefinition = serde_json::from_str(json)?;
        Schema::from_definition(&definition)
    }

    /// Build a schema in two steps: type shells in inheritance order, then
    /// properties, so types may reference each other freely
    pub fn from_definition(definition: &SchemaDefinition) -> Result<Schema, SchemaError> {
        let mut schema = Schema::new();
        for e in &definition.enums {
            if schema.enums.contains_key(&e.name) {
                return Err(SchemaError::DuplicateType(e.name.clone()));
            }
            let members: Vec<&str> = e.members.iter().map(String::as_str).collect();
            schema.add_enum(EnumType::sequential(&e.name, &members));
        }

        let mut pending: Vec<&TypeDefinition> = definition.types.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for def in pending {
                if schema.resources.contains_key(&def.name) || schema.enums.contains_key(&def.name)
                {
                    return Err(SchemaError::DuplicateType(def.name.clone()));
                }
                let base = match &def.base {
                    None => None,
                    Some(base) => match schema.resources.get(base) {
                        Some(ty) => Some(ty.clone()),
                        None => {
                            deferred.push(def);
                            continue;
                        }
                    },
                };
                schema.add_resource(Arc::new(ResourceType::new(&def.name, base)));
            }
            if deferred.len() == before {
                let stuck = deferred[0];
                let base = stuck.base.clone().unwrap_or_default();
                let known = definition.types.iter().any(|t| t.name == base);
                return Err(if known {
                    SchemaError::CyclicInheritance(stuck.name.clone())
                } else {
                    SchemaError::UnknownBase {
                        type_name: stuck.name.clone(),
                        base,
                    }
                });
            }
            pending = deferred;
        }

        for def in &definition.types {
            let mut properties = Vec::with_capacity(def.properties.len());
            for (name, type_name) in &def.properties {
                let ty = schema
                    .parse_type_name(type_name)
                    .map_err(|source| SchemaError::PropertyType {
                        type_name: def.name.clone(),
                        property: name.clone(),
                        source,
                    })?;
                properties.push(Property::new(name, ty));
            }
            if let Some(ty) = schema.resources.get(&def.name) {
                ty.define_properties(properties);
            }
        }

        debug!(
            "Built schema with {} resource types and {} enums",
            schema.resources.len(),
            schema.enums.len()
        );
        Ok(schema)
    }

    /// Parse a type name such as `Int32?`, `String[]`, `IEnumerable<Order>`
    /// or `Dictionary<String,Int32>`
    pub fn parse_type_name(&self, text: &str) -> Result<Type, ResolveError> {
        let text = text.trim();
        if let Some(inner) = text.strip_suffix('?') {
            return Ok(Type::nullable_of(self.parse_type_name(inner)?));
        }
        if let Some(inner) = text.strip_suffix("[]") {
            return Ok(Type::array_of(self.parse_type_name(inner)?));
        }
        if let Some((outer, args)) = generic_arguments(text) {
            return match (outer, args.as_slice()) {
                ("Nullable", [inner]) => Ok(Type::nullable_of(self.parse_type_name(inner)?)),
                ("IEnumerable", [inner]) => Ok(Type::enumerable_of(self.parse_type_name(inner)?)),
                ("Dictionary" | "IDictionary", [key, value]) => Ok(Type::dictionary_of(
                    self.parse_type_name(key)?,
                    self.parse_type_name(value)?,
                )),
                _ => Err(ResolveError::UnknownType(text.to_string())),
            };
        }
        self.named_type(text)
    }

    fn named_type(&self, name: &str) -> Result<Type, ResolveError> {
        if let Some(ty) = Type::primitive(name) {
            return Ok(ty);
        }
        if let Some(ty) = self.resources.get(name) {
            return Ok(Type::Resource(ty.clone()));
        }
        if let Some(ty) = self.enums.get(name) {
            return Ok(Type::Enum(ty.clone()));
        }
        let resource = self
            .resources
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, ty)| Type::Resource(ty.clone()));
        let enumeration = || {
            self.enums
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, ty)| Type::Enum(ty.clone()))
        };
        resource
            .or_else(enumeration)
            .ok_or_else(|| ResolveError::UnknownType(name.to_string()))
    }

    fn lookup_property(&self, ty: &Arc<ResourceType>, name: &str) -> Option<Arc<Property>> {
        let key = (ty.name().to_string(), name.to_string());
        if let Some(hit) = self.property_cache.get(&key) {
            return Some(hit.clone());
        }
        // Names come from clients: cache only hits under a canonical spelling.
        let found = ty.find_property(name)?;
        if name == found.name || name == found.query_name() {
            self.property_cache.insert(key, found.clone());
        }
        Some(found)
    }
}

/// Split `Outer<A,B>` at top-level commas
fn generic_arguments(text: &str) -> Option<(&str, Vec<&str>)> {
    let open = text.find('<')?;
    let inner = text[open + 1..].strip_suffix('>')?;
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    Some((text[..open].trim(), args))
}

impl QueryTypeResolver for Schema {
    fn resolve_type(&self, name: &str) -> Result<Type, ResolveError> {
        self.parse_type_name(name)
    }

    fn resolve_property(&self, instance: &Expr, path: &str) -> Result<Expr, ResolveError> {
        let mut current = instance.clone();
        for segment in path.split('.') {
            let ty = current.ty();
            if ty.dictionary_types().is_some() {
                current = current.get(segment);
                continue;
            }
            let Some(resource) = ty.as_resource() else {
                return Err(ResolveError::NotAResource {
                    type_name: ty.to_string(),
                    property: segment.to_string(),
                });
            };
            let property = self.lookup_property(resource, segment).ok_or_else(|| {
                ResolveError::UnknownProperty {
                    type_name: resource.name().to_string(),
                    property: segment.to_string(),
                }
            })?;
            current = Expr::Property {
                instance: Box::new(current),
                property,
            };
        }
        Ok(current)
    }
}
