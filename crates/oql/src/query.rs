//! Compiled `$filter`/`$orderby`/`$select` queries over in-memory collections

use std::cmp::Ordering;

use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;

use crate::convert::Converter;
use crate::error::QueryParseError;
use crate::eval::EvalError;
use crate::expr::Lambda;
use crate::functions::FunctionTable;
use crate::grammar;
use crate::node::{Node, NodeKind, NodeType};
use crate::schema::QueryTypeResolver;
use crate::tree::TreeBuilder;
use crate::types::Type;
use crate::value::Value;

/// Query options of a collection request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub filter: Option<String>,
    pub order_by: Option<String>,
    pub select: Option<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OrderKey {
    pub selector: Lambda,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub name: String,
    pub selector: Lambda,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Matches before paging
    pub total_count: usize,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    filter: Option<Lambda>,
    order_by: Vec<OrderKey>,
    select: Vec<Projection>,
    top: Option<usize>,
    skip: usize,
}

impl CompiledQuery {
    pub fn compile(
        request: &QueryRequest,
        root: &Type,
        resolver: &dyn QueryTypeResolver,
        functions: &FunctionTable,
    ) -> Result<CompiledQuery, QueryParseError> {
        let filter = match non_blank(&request.filter) {
            Some(text) => {
                let node = crate::tree::parse(text)?;
                let lambda = Converter::new(resolver, functions, root.clone(), text).parse_lambda(&node)?;
                let ty = lambda.body.ty();
                if ty.underlying() != &Type::Bool {
                    return Err(QueryParseError::resolution(format!(
                        "Filter must be a Boolean expression, found {ty}"
                    ))
                    .at(text, node.offset));
                }
                Some(lambda)
            }
            None => None,
        };

        let mut order_by = Vec::new();
        if let Some(text) = non_blank(&request.order_by) {
            let builder = TreeBuilder::new(text);
            for item in grammar::parse_order_by(text)? {
                let (node, descending) = builder.build_order_item(&item)?;
                order_by.push(OrderKey {
                    selector: Converter::new(resolver, functions, root.clone(), text)
                        .parse_lambda(&node)?,
                    descending,
                });
            }
        }

        let mut select = Vec::new();
        if let Some(text) = non_blank(&request.select) {
            let builder = TreeBuilder::new(text);
            for cst in grammar::parse_select(text)? {
                let node = builder.build(&cst)?;
                let (name, node) = projection_name(&node)
                    .ok_or_else(|| {
                        QueryParseError::syntax("Select item needs an alias ('expr as name')")
                            .at(text, node.offset)
                    })?;
                if select.iter().any(|p: &Projection| p.name == name) {
                    return Err(QueryParseError::syntax(format!(
                        "Duplicate select name '{name}'"
                    ))
                    .at(text, node.offset));
                }
                select.push(Projection {
                    selector: Converter::new(resolver, functions, root.clone(), text)
                        .parse_lambda(node)?,
                    name,
                });
            }
        }

        let compiled = CompiledQuery {
            filter,
            order_by,
            select,
            top: request.top,
            skip: request.skip.unwrap_or(0),
        };
        debug!("Compiled query: {compiled}");
        Ok(compiled)
    }

    pub fn filter(&self) -> Option<&Lambda> {
        self.filter.as_ref()
    }

    pub fn order_by(&self) -> &[OrderKey] {
        &self.order_by
    }

    pub fn select(&self) -> &[Projection] {
        &self.select
    }

    /// Filter, count, order, page and project
    pub fn apply(&self, items: &[Value]) -> Result<QueryResult, EvalError> {
        let mut matched = Vec::new();
        for item in items {
            let keep = match &self.filter {
                Some(filter) => filter.test(std::slice::from_ref(item))?,
                None => true,
            };
            if keep {
                matched.push(item);
            }
        }
        let total_count = matched.len();

        if !self.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(matched.len());
            for item in matched {
                let keys = self
                    .order_by
                    .iter()
                    .map(|k| k.selector.invoke(std::slice::from_ref(item)))
                    .collect::<Result<Vec<_>, _>>()?;
                keyed.push((keys, item));
            }
            keyed.sort_by(|(a, _), (b, _)| self.compare_keys(a, b));
            matched = keyed.into_iter().map(|(_, item)| item).collect();
        }

        let page = matched
            .into_iter()
            .skip(self.skip)
            .take(self.top.unwrap_or(usize::MAX));

        let mut out = Vec::new();
        for item in page {
            out.push(self.project(item)?);
        }
        Ok(QueryResult {
            total_count,
            items: out,
        })
    }

    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), key) in a.iter().zip(b).zip(&self.order_by) {
            let ordering = x.sort_cmp(y);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    fn project(&self, item: &Value) -> Result<Value, EvalError> {
        if self.select.is_empty() {
            return Ok(item.clone());
        }
        let mut fields = IndexMap::with_capacity(self.select.len());
        for projection in &self.select {
            let value = projection.selector.invoke(std::slice::from_ref(item))?;
            fields.insert(projection.name.clone(), value);
        }
        Ok(Value::Map(fields))
    }
}

impl std::fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.filter {
            Some(filter) => write!(f, "where {}", filter.body)?,
            None => write!(f, "all")?,
        }
        for key in &self.order_by {
            let direction = if key.descending { "desc" } else { "asc" };
            write!(f, ", order by {} {direction}", key.selector.body)?;
        }
        if !self.select.is_empty() {
            let names: Vec<&str> = self.select.iter().map(|p| p.name.as_str()).collect();
            write!(f, ", select {}", names.join(", "))?;
        }
        write!(f, ", skip {}", self.skip)?;
        if let Some(top) = self.top {
            write!(f, ", top {top}")?;
        }
        Ok(())
    }
}

fn non_blank(text: &Option<String>) -> Option<&str> {
    text.as_deref().filter(|t| !t.trim().is_empty())
}

/// Output name of a select item: its alias, else the last path segment
fn projection_name(node: &Node) -> Option<(String, &Node)> {
    match &node.kind {
        NodeKind::Binary {
            op: NodeType::As,
            left,
            right,
        } => right.as_plain_symbol().map(|alias| (alias.to_string(), left.as_ref())),
        NodeKind::Binary {
            op: NodeType::Dot,
            right,
            ..
        } => right.as_plain_symbol().map(|name| (name.to_string(), node)),
        _ => node.as_plain_symbol().map(|name| (name.to_string(), node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::value::Entity;

    fn fixture() -> (Schema, Type, Vec<Value>) {
        let schema = Schema::from_json(
            r#"{ "types": [{ "name": "City", "properties": {
                "Name": "String", "Population": "Int32?", "Country": "String"
            } }] }"#,
        )
        .unwrap();
        let city = schema.resource("City").unwrap().clone();
        let rows = [
            ("Oslo", Some(700), "NO"),
            ("Bergen", Some(285), "NO"),
            ("Lund", None, "SE"),
            ("Malmo", Some(350), "SE"),
        ];
        let items = rows
            .iter()
            .map(|(name, pop, country)| {
                Entity::new(&city)
                    .with("Name", *name)
                    .with("Population", *pop)
                    .with("Country", *country)
                    .into_value()
            })
            .collect();
        (schema, Type::Resource(city), items)
    }

    fn names(result: &QueryResult) -> Vec<String> {
        result
            .items
            .iter()
            .map(|v| v.as_entity().unwrap().get("Name").to_string())
            .collect()
    }

    #[test]
    fn filter_order_and_page() {
        let (schema, ty, items) = fixture();
        let request = QueryRequest {
            filter: Some("population gt 300 or population eq null".into()),
            order_by: Some("country desc, name".into()),
            top: Some(2),
            ..Default::default()
        };
        let query = CompiledQuery::compile(&request, &ty, &schema, &FunctionTable::builtin()).unwrap();
        let result = query.apply(&items).unwrap();
        assert_eq!(result.total_count, 3);
        assert_eq!(names(&result), ["Lund", "Malmo"]);
    }

    #[test]
    fn nulls_sort_first() {
        let (schema, ty, items) = fixture();
        let request = QueryRequest {
            order_by: Some("population".into()),
            ..Default::default()
        };
        let query = CompiledQuery::compile(&request, &ty, &schema, &FunctionTable::builtin()).unwrap();
        let result = query.apply(&items).unwrap();
        assert_eq!(names(&result), ["Lund", "Bergen", "Malmo", "Oslo"]);
    }

    #[test]
    fn select_uses_alias_or_last_segment() {
        let (schema, ty, items) = fixture();
        let request = QueryRequest {
            select: Some("name, length(name) as size".into()),
            skip: Some(3),
            ..Default::default()
        };
        let query = CompiledQuery::compile(&request, &ty, &schema, &FunctionTable::builtin()).unwrap();
        let result = query.apply(&items).unwrap();
        let Value::Map(row) = &result.items[0] else {
            panic!("expected projected row");
        };
        assert_eq!(row.get("name"), Some(&Value::from("Malmo")));
        assert_eq!(row.get("size"), Some(&Value::Int32(5)));
    }

    #[test]
    fn filter_must_be_boolean() {
        let (schema, ty, _) = fixture();
        let request = QueryRequest {
            filter: Some("name".into()),
            ..Default::default()
        };
        let err = CompiledQuery::compile(&request, &ty, &schema, &FunctionTable::builtin()).unwrap_err();
        assert!(err.message().contains("Boolean"));
    }

    #[test]
    fn select_needs_a_name() {
        let (schema, ty, _) = fixture();
        let request = QueryRequest {
            select: Some("length(name)".into()),
            ..Default::default()
        };
        assert!(CompiledQuery::compile(&request, &ty, &schema, &FunctionTable::builtin()).is_err());
    }
}
