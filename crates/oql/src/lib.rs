//! OQL - an OData-style query language over typed object graphs
//!
//! Query text is compiled in stages:
//!
//! ```text
//! text ─grammar→ Cst ─tree→ Node ─Converter→ Expr ─evaluate→ Value
//!                                            Expr ─QueryPredicateBuilder→ text
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use oql::{compile_filter, FunctionTable, Schema, Type};
//!
//! let schema = Schema::from_json(SCHEMA_JSON)?;
//! let functions = FunctionTable::builtin();
//! let order = Type::Resource(schema.resource("Order").unwrap().clone());
//!
//! let predicate = compile_filter("customer.name eq 'Ann' and total gt 10m", &order, &schema, &functions)?;
//! let matches = predicate.test(&[some_order])?;
//!
//! // And back to text
//! let text = oql::to_query_string(&predicate, &functions)?;
//! ```
//!
//! ## Grammar
//!
//! - `and or not eq ne gt ge lt le add sub mul div mod`, `as`, `in`
//! - `a.b.c` member access, `dict[key]` indexers, `x:body` lambdas
//! - `iif(c,a,b)`, `cast(x,t'T')`, `isof(x,t'T')`, table functions
//! - literals: `'…'`, `42`, `42L`, `4.2`, `4.2f`, `4.2m`, `[a,b]`, `t'T'`,
//!   `guid'…'`, `datetime'…'`

mod convert;
mod error;
mod eval;
mod expr;
mod functions;
mod grammar;
mod json;
mod node;
mod query;
mod schema;
mod serialize;
mod tree;
mod types;
mod value;

// ============ Primary Public API ============

pub use convert::{Converter, THIS};
pub use error::{ErrorKind, Position, QueryParseError, ResolveError};
pub use query::{CompiledQuery, OrderKey, Projection, QueryRequest, QueryResult};
pub use schema::{
    EnumDefinition, QueryTypeResolver, Schema, SchemaDefinition, SchemaError, TypeDefinition,
};
pub use serialize::{BuildError, PreBuildFolder, QueryPredicateBuilder};

// ============ Object Model ============

pub use eval::{Closure, Env, EvalError, apply_binary, convert_value};
pub use expr::{BinaryOp, Expr, Lambda, Parameter, lift_enum_comparison};
pub use functions::{
    Bindings, CallStyle, FunctionTable, FunctionTableError, Invoke, Member, MemberKind,
    MemberMapping, TypeSig,
};
pub use json::{JsonError, TYPE_KEY};
pub use types::{EnumType, Property, ResourceType, ResourceTypeBuilder, Type, camel_case};
pub use value::{
    DateLiteral, DateTimeKind, DateTimeValue, EnumValue, Entity, Value, parse_date_literal,
};

// ============ Syntax Trees ============

pub use grammar::{Cst, CstKind, OrderItem, parse_expression, parse_order_by, parse_select};
pub use node::{Node, NodeKind, NodeType, NumberLiteral, SymbolKind, SymbolNode};
pub use tree::TreeBuilder;

/// Parse query text into an untyped node tree
pub fn parse(query: &str) -> Result<Node, QueryParseError> {
    tree::parse(query)
}

/// Compile a filter into a lambda over `this_type`
pub fn compile_filter(
    query: &str,
    this_type: &Type,
    resolver: &dyn QueryTypeResolver,
    functions: &FunctionTable,
) -> Result<Lambda, QueryParseError> {
    let node = tree::parse(query)?;
    Converter::new(resolver, functions, this_type.clone(), query).parse_lambda(&node)
}

/// Render a lambda back into query text
pub fn to_query_string(lambda: &Lambda, functions: &FunctionTable) -> Result<String, BuildError> {
    QueryPredicateBuilder::new(functions).build(lambda)
}
