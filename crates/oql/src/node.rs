//! Untyped syntax tree produced by the tree builder

use std::fmt;

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::value::{DateTimeValue, offset_literal_text};

/// Tag of a [`Node`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    AndAlso,
    OrElse,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Dot,
    As,
    In,
    Symbol,
    MethodCall,
    IndexerAccess,
    NumberLiteral,
    StringLiteral,
    GuidLiteral,
    DateTimeLiteral,
    DateTimeOffsetLiteral,
    TypeNameLiteral,
    Lambda,
    ArrayLiteral,
    Not,
    Unhandled,
}

impl NodeType {
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            NodeType::AndAlso
                | NodeType::OrElse
                | NodeType::Add
                | NodeType::Subtract
                | NodeType::Multiply
                | NodeType::Divide
                | NodeType::Modulo
                | NodeType::Equal
                | NodeType::NotEqual
                | NodeType::GreaterThan
                | NodeType::GreaterThanOrEqual
                | NodeType::LessThan
                | NodeType::LessThanOrEqual
                | NodeType::Dot
                | NodeType::As
                | NodeType::In
        )
    }

    /// Query keyword of a binary operator
    pub fn keyword(self) -> Option<&'static str> {
        let kw = match self {
            NodeType::AndAlso => "and",
            NodeType::OrElse => "or",
            NodeType::Add => "add",
            NodeType::Subtract => "sub",
            NodeType::Multiply => "mul",
            NodeType::Divide => "div",
            NodeType::Modulo => "mod",
            NodeType::Equal => "eq",
            NodeType::NotEqual => "ne",
            NodeType::GreaterThan => "gt",
            NodeType::GreaterThanOrEqual => "ge",
            NodeType::LessThan => "lt",
            NodeType::LessThanOrEqual => "le",
            NodeType::Dot => ".",
            NodeType::As => "as",
            NodeType::In => "in",
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Plain,
    MethodCall,
    Indexer,
}

/// A name, optionally followed by call arguments or indexer arguments
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolNode {
    pub name: String,
    pub kind: SymbolKind,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
}

impl NumberLiteral {
    /// Parse a numeric token by its suffix: `m`/`M` decimal, `f`/`F` single,
    /// `L` 64-bit; unsuffixed tokens are 32-bit without a dot and double with one.
    pub fn parse(text: &str) -> Result<NumberLiteral, String> {
        let invalid = || format!("Invalid number literal '{text}'");
        let (body, suffix) = match text.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&text[..i], Some(c)),
            _ => (text, None),
        };
        let literal = match suffix {
            Some('m' | 'M') => NumberLiteral::Decimal(body.parse().map_err(|_| invalid())?),
            Some('f' | 'F') => NumberLiteral::Float(body.parse().map_err(|_| invalid())?),
            Some('L') => NumberLiteral::Int64(body.parse().map_err(|_| invalid())?),
            Some(_) => return Err(invalid()),
            None => match body.matches('.').count() {
                0 => NumberLiteral::Int32(body.parse().map_err(|_| invalid())?),
                1 => NumberLiteral::Double(body.parse().map_err(|_| invalid())?),
                _ => return Err(invalid()),
            },
        };
        if let NumberLiteral::Float(f) = literal
            && !f.is_finite()
        {
            return Err(invalid());
        }
        if let NumberLiteral::Double(d) = literal
            && !d.is_finite()
        {
            return Err(invalid());
        }
        Ok(literal)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Binary {
        op: NodeType,
        left: Box<Node>,
        right: Box<Node>,
    },
    Symbol(SymbolNode),
    Number(NumberLiteral),
    String(String),
    Guid(Uuid),
    DateTime(DateTimeValue),
    DateTimeOffset(DateTime<FixedOffset>),
    TypeName(String),
    Lambda {
        parameter: String,
        body: Box<Node>,
    },
    Array(Vec<Node>),
    Not(Box<Node>),
    Unhandled(String),
}

/// Node with the byte offset it started at in the query text
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub offset: Option<usize>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Node { kind, offset: None }
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn binary(op: NodeType, left: Node, right: Node) -> Self {
        debug_assert!(op.is_binary(), "{op:?} is not a binary operator");
        let offset = left.offset;
        Node {
            kind: NodeKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            offset,
        }
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self::symbol_with(name, SymbolKind::Plain, Vec::new())
    }

    pub fn symbol_with(name: impl Into<String>, kind: SymbolKind, children: Vec<Node>) -> Self {
        let name = name.into();
        let name = match name.strip_prefix('@') {
            Some(stripped) => stripped.to_string(),
            None => name,
        };
        Node::new(NodeKind::Symbol(SymbolNode {
            name,
            kind,
            children,
        }))
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::Binary { op, .. } => *op,
            NodeKind::Symbol(s) => match s.kind {
                SymbolKind::Plain => NodeType::Symbol,
                SymbolKind::MethodCall => NodeType::MethodCall,
                SymbolKind::Indexer => NodeType::IndexerAccess,
            },
            NodeKind::Number(_) => NodeType::NumberLiteral,
            NodeKind::String(_) => NodeType::StringLiteral,
            NodeKind::Guid(_) => NodeType::GuidLiteral,
            NodeKind::DateTime(_) => NodeType::DateTimeLiteral,
            NodeKind::DateTimeOffset(_) => NodeType::DateTimeOffsetLiteral,
            NodeKind::TypeName(_) => NodeType::TypeNameLiteral,
            NodeKind::Lambda { .. } => NodeType::Lambda,
            NodeKind::Array(_) => NodeType::ArrayLiteral,
            NodeKind::Not(_) => NodeType::Not,
            NodeKind::Unhandled(_) => NodeType::Unhandled,
        }
    }

    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Binary { left, right, .. } => vec![left, right],
            NodeKind::Symbol(s) => s.children.iter().collect(),
            NodeKind::Lambda { body, .. } => vec![body],
            NodeKind::Array(items) => items.iter().collect(),
            NodeKind::Not(inner) => vec![inner],
            _ => Vec::new(),
        }
    }

    /// The name of a plain symbol
    pub fn as_plain_symbol(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Symbol(s) if s.kind == SymbolKind::Plain => Some(&s.name),
            _ => None,
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Node]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    write!(f, "'{}'", text.replace('\'', "''"))
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Binary { op, left, right } => match op {
                NodeType::Dot => write!(f, "{left}.{right}"),
                _ => write!(f, "({left} {} {right})", op.keyword().unwrap_or("?")),
            },
            NodeKind::Symbol(s) => match s.kind {
                SymbolKind::Plain => write!(f, "{}", s.name),
                SymbolKind::MethodCall => {
                    write!(f, "{}(", s.name)?;
                    write_args(f, &s.children)?;
                    write!(f, ")")
                }
                SymbolKind::Indexer => {
                    write!(f, "{}[", s.name)?;
                    write_args(f, &s.children)?;
                    write!(f, "]")
                }
            },
            NodeKind::Number(n) => match n {
                NumberLiteral::Int32(v) => write!(f, "{v}"),
                NumberLiteral::Int64(v) => write!(f, "{v}L"),
                NumberLiteral::Float(v) => write!(f, "{v}f"),
                NumberLiteral::Double(v) => write!(f, "{v:?}"),
                NumberLiteral::Decimal(v) => write!(f, "{v}m"),
            },
            NodeKind::String(s) => write_quoted(f, s),
            NodeKind::Guid(g) => write!(f, "guid'{g}'"),
            NodeKind::DateTime(d) => write!(f, "datetime'{}'", d.to_literal_text()),
            NodeKind::DateTimeOffset(d) => write!(f, "datetime'{}'", offset_literal_text(d)),
            NodeKind::TypeName(t) => write!(f, "t'{t}'"),
            NodeKind::Lambda { parameter, body } => write!(f, "{parameter}:{body}"),
            NodeKind::Array(items) => {
                write!(f, "[")?;
                write_args(f, items)?;
                write!(f, "]")
            }
            NodeKind::Not(inner) => write!(f, "not {inner}"),
            NodeKind::Unhandled(text) => write!(f, "{text}"),
        }
    }
}
