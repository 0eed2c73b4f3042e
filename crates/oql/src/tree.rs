//! Reduce the concrete parse tree into [`Node`]s

use std::collections::VecDeque;

use log::trace;
use uuid::Uuid;

use crate::error::QueryParseError;
use crate::grammar::{Cst, CstKind, OrderItem};
use crate::node::{Node, NodeKind, NodeType, NumberLiteral, SymbolKind};
use crate::value::{DateLiteral, parse_date_literal};

/// Concrete token kinds that are binary operators
const BINARY_OPERATORS: &[(CstKind, NodeType)] = &[
    (CstKind::Or, NodeType::OrElse),
    (CstKind::And, NodeType::AndAlso),
    (CstKind::Eq, NodeType::Equal),
    (CstKind::Ne, NodeType::NotEqual),
    (CstKind::Gt, NodeType::GreaterThan),
    (CstKind::Ge, NodeType::GreaterThanOrEqual),
    (CstKind::Lt, NodeType::LessThan),
    (CstKind::Le, NodeType::LessThanOrEqual),
    (CstKind::In, NodeType::In),
    (CstKind::Add, NodeType::Add),
    (CstKind::Sub, NodeType::Subtract),
    (CstKind::Mul, NodeType::Multiply),
    (CstKind::Div, NodeType::Divide),
    (CstKind::Mod, NodeType::Modulo),
    (CstKind::As, NodeType::As),
    (CstKind::Dot, NodeType::Dot),
];

fn binary_node_type(kind: CstKind) -> Option<NodeType> {
    BINARY_OPERATORS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, t)| *t)
}

/// Builds nodes for one query string; the text is kept for error messages
pub struct TreeBuilder<'q> {
    query: &'q str,
}

impl<'q> TreeBuilder<'q> {
    pub fn new(query: &'q str) -> Self {
        TreeBuilder { query }
    }

    pub fn build(&self, cst: &Cst) -> Result<Node, QueryParseError> {
        self.build_at(cst, 0)
    }

    pub fn build_order_item(&self, item: &OrderItem) -> Result<(Node, bool), QueryParseError> {
        Ok((self.build(&item.expr)?, item.descending))
    }

    fn error(&self, cst: &Cst, message: String) -> QueryParseError {
        QueryParseError::syntax(message).at(self.query, Some(cst.offset))
    }

    fn build_at(&self, cst: &Cst, depth: usize) -> Result<Node, QueryParseError> {
        trace!("{:indent$}{:?} '{}'", "", cst.kind, cst.text, indent = depth * 2);

        if let Some(op) = binary_node_type(cst.kind) {
            return self.build_binary(cst, op, depth);
        }

        let node = match cst.kind {
            CstKind::Parens => match cst.children.as_slice() {
                [inner] => return self.build_at(inner, depth + 1),
                _ => return Err(self.error(cst, "Malformed parenthesized expression".into())),
            },
            CstKind::Not => match cst.children.as_slice() {
                [operand] => Node::new(NodeKind::Not(Box::new(self.build_at(operand, depth + 1)?))),
                _ => return Err(self.error(cst, "Malformed not expression".into())),
            },
            CstKind::Lambda => self.build_lambda(cst, depth)?,
            CstKind::Identifier => Node::symbol(&cst.text),
            CstKind::Call => {
                Node::symbol_with(&cst.text, SymbolKind::MethodCall, self.build_all(cst, depth)?)
            }
            CstKind::Indexer => {
                Node::symbol_with(&cst.text, SymbolKind::Indexer, self.build_all(cst, depth)?)
            }
            CstKind::Array => Node::new(NodeKind::Array(self.build_all(cst, depth)?)),
            CstKind::Number => {
                let literal = NumberLiteral::parse(&cst.text).map_err(|m| self.error(cst, m))?;
                Node::new(NodeKind::Number(literal))
            }
            CstKind::String => Node::new(NodeKind::String(unquote(&cst.text))),
            CstKind::PrefixedString => self.build_prefixed(cst)?,
            other => Node::new(NodeKind::Unhandled(format!("{other:?} '{}'", cst.text))),
        };
        Ok(node.at(cst.offset))
    }

    fn build_all(&self, cst: &Cst, depth: usize) -> Result<Vec<Node>, QueryParseError> {
        cst.children
            .iter()
            .map(|child| self.build_at(child, depth + 1))
            .collect()
    }

    /// Fold the operands left-associatively: `a op b op c` → `((a op b) op c)`
    fn build_binary(&self, cst: &Cst, op: NodeType, depth: usize) -> Result<Node, QueryParseError> {
        let mut queue: VecDeque<Node> = self.build_all(cst, depth)?.into();
        let (Some(first), Some(second)) = (queue.pop_front(), queue.pop_front()) else {
            return Err(self.error(cst, format!("Operator '{}' needs two operands", cst.text)));
        };
        let mut acc = Node::binary(op, first, second);
        while let Some(next) = queue.pop_front() {
            acc = Node::binary(op, acc, next);
        }
        Ok(acc.at(cst.offset))
    }

    fn build_lambda(&self, cst: &Cst, depth: usize) -> Result<Node, QueryParseError> {
        let [param, body] = cst.children.as_slice() else {
            return Err(self.error(cst, "Lambda expression needs a parameter and a body".into()));
        };
        let param_node = self.build_at(param, depth + 1)?;
        let Some(parameter) = param_node.as_plain_symbol() else {
            return Err(self.error(
                param,
                format!("Lambda parameter must be a symbol, found '{param_node}'"),
            ));
        };
        Ok(Node::new(NodeKind::Lambda {
            parameter: parameter.to_string(),
            body: Box::new(self.build_at(body, depth + 1)?),
        }))
    }

    fn build_prefixed(&self, cst: &Cst) -> Result<Node, QueryParseError> {
        let Some(quote) = cst.text.find('\'') else {
            return Ok(Node::new(NodeKind::Unhandled(cst.text.clone())));
        };
        let (prefix, quoted) = cst.text.split_at(quote);
        let content = unquote(quoted);
        let kind = match prefix {
            "t" => NodeKind::TypeName(content),
            "guid" => match Uuid::parse_str(&content) {
                Ok(guid) => NodeKind::Guid(guid),
                Err(_) => return Err(self.error(cst, format!("Invalid guid literal '{content}'"))),
            },
            "datetime" => match parse_date_literal(&content) {
                Some(DateLiteral::DateTime(value)) => NodeKind::DateTime(value),
                Some(DateLiteral::DateTimeOffset(value)) => NodeKind::DateTimeOffset(value),
                None => {
                    return Err(self.error(cst, format!("Invalid datetime literal '{content}'")));
                }
            },
            _ => NodeKind::Unhandled(cst.text.clone()),
        };
        Ok(Node::new(kind))
    }
}

/// Strip the surrounding quotes and collapse `''` escapes
fn unquote(raw: &str) -> String {
    let inner = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(raw);
    inner.replace("''", "'")
}

/// Parse query text into a node tree
pub fn parse(query: &str) -> Result<Node, QueryParseError> {
    let cst = crate::grammar::parse_expression(query)?;
    TreeBuilder::new(query).build(&cst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::value::DateTimeKind;

    #[test]
    fn chain_folds_left() {
        let node = parse("a sub b sub c").unwrap();
        let NodeKind::Binary { op, left, right } = &node.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, NodeType::Subtract);
        assert_eq!(right.as_plain_symbol(), Some("c"));
        assert_eq!(left.to_string(), "(a sub b)");
    }

    #[test]
    fn parens_unwrap() {
        assert_eq!(parse("((a))").unwrap(), parse("a").unwrap());
    }

    #[test]
    fn dot_chain_is_left_nested() {
        let node = parse("a.b.c").unwrap();
        let NodeKind::Binary { op: NodeType::Dot, left, .. } = &node.kind else {
            panic!("expected dot");
        };
        assert_eq!(left.node_type(), NodeType::Dot);
    }

    #[test]
    fn prefixed_literals() {
        assert!(matches!(parse("t'Dog'").unwrap().kind, NodeKind::TypeName(ref t) if t == "Dog"));
        assert!(matches!(
            parse("guid'c6b5f2a4-3f0e-4b5e-9d5b-7e9c3c1d2a10'").unwrap().kind,
            NodeKind::Guid(_)
        ));
        assert!(matches!(parse("foo'bar'").unwrap().kind, NodeKind::Unhandled(_)));

        let NodeKind::DateTime(d) = parse("datetime'2020-05-01T10:00:00Z'").unwrap().kind else {
            panic!("expected datetime");
        };
        assert_eq!(d.kind, DateTimeKind::Utc);
        assert!(matches!(
            parse("datetime'2020-05-01T10:00:00-05:00'").unwrap().kind,
            NodeKind::DateTimeOffset(_)
        ));
    }

    #[test]
    fn bad_guid_is_syntax_error() {
        let err = parse("id eq guid'nope'").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert_eq!(err.column(), Some(7));
    }

    #[test]
    fn malformed_number_points_at_token() {
        let err = parse("price eq 42.5.6").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert_eq!(err.column(), Some(10));
        assert!(err.message().contains("42.5.6"));
    }

    #[test]
    fn lambda_parameter_must_be_symbol() {
        let err = parse("items.any(1:true)").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
        assert!(parse("items.any(x:x gt 1)").is_ok());
    }

    #[test]
    fn string_escapes() {
        assert_eq!(parse("'it''s'").unwrap().kind, NodeKind::String("it's".into()));
    }
}
