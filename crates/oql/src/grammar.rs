//! Grammar for the query language
//!
//! Produces a concrete parse tree ([`Cst`]) which the tree builder reduces into
//! [`crate::node::Node`]s. Operands of a chain of the same operator are kept
//! together in one node; mixed operators nest.

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::error::QueryParseError;

type PResult<T> = winnow::ModalResult<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CstKind {
    Or,
    And,
    Not,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    As,
    Dot,
    Lambda,
    Parens,
    Identifier,
    Call,
    Indexer,
    Array,
    Number,
    String,
    PrefixedString,
}

/// Concrete parse tree node
#[derive(Debug, Clone, PartialEq)]
pub struct Cst {
    pub kind: CstKind,
    pub text: String,
    /// Byte offset into the query text
    pub offset: usize,
    pub children: Vec<Cst>,
}

impl Cst {
    // While parsing, `offset` holds the remaining input length; `locate` fixes it up.
    fn new(kind: CstKind, text: &str, remaining: usize, children: Vec<Cst>) -> Self {
        Cst {
            kind,
            text: text.to_string(),
            offset: remaining,
            children,
        }
    }

    fn leaf(kind: CstKind, text: &str, remaining: usize) -> Self {
        Self::new(kind, text, remaining, Vec::new())
    }

    fn locate(&mut self, total: usize) {
        self.offset = total.saturating_sub(self.offset);
        for child in &mut self.children {
            child.locate(total);
        }
    }
}

/// An `order by` item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Cst,
    pub descending: bool,
}

/// Parse a full expression
pub fn parse_expression(input: &str) -> Result<Cst, QueryParseError> {
    let mut cst = run(input, expr)?;
    cst.locate(input.len());
    Ok(cst)
}

/// Parse `expr [asc|desc], …`
pub fn parse_order_by(input: &str) -> Result<Vec<OrderItem>, QueryParseError> {
    let mut items = run(input, order_list)?;
    for item in &mut items {
        item.expr.locate(input.len());
    }
    Ok(items)
}

/// Parse `expr [as alias], …`
pub fn parse_select(input: &str) -> Result<Vec<Cst>, QueryParseError> {
    let mut items = run(input, expr_list)?;
    for item in &mut items {
        item.locate(input.len());
    }
    Ok(items)
}

fn run<T>(input: &str, mut parser: impl FnMut(&mut &str) -> PResult<T>) -> Result<T, QueryParseError> {
    let mut stream = input;
    let parsed = preceded(ws, |i: &mut &str| parser(i)).parse_next(&mut stream);
    match parsed {
        Ok(parsed) if stream.trim().is_empty() => Ok(parsed),
        Ok(_) => {
            let offset = trailing_input_offset(input, stream);
            let found: String = input[offset..].chars().take(16).collect();
            Err(QueryParseError::syntax(format!("Unexpected input '{found}'")).at(input, Some(offset)))
        }
        Err(_) => {
            let offset = trailing_input_offset(input, stream);
            let message = if input.trim().is_empty() {
                "Empty expression".to_string()
            } else {
                "Unable to parse expression".to_string()
            };
            Err(QueryParseError::syntax(message).at(input, Some(offset)))
        }
    }
}

fn trailing_input_offset(input: &str, trailing: &str) -> usize {
    let base = input.len().saturating_sub(trailing.len());
    let non_ws = trailing
        .char_indices()
        .find(|(_, ch)| !ch.is_whitespace())
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    base + non_ws
}

// ============ Lists ============

fn expr_list(input: &mut &str) -> PResult<Vec<Cst>> {
    separated(1.., expr, (ws, ',', ws)).parse_next(input)
}

fn order_list(input: &mut &str) -> PResult<Vec<OrderItem>> {
    separated(1.., order_item, (ws, ',', ws)).parse_next(input)
}

fn order_item(input: &mut &str) -> PResult<OrderItem> {
    let expr = expr.parse_next(input)?;
    let direction = opt(preceded(
        ws,
        alt((keyword("asc").value(false), keyword("desc").value(true))),
    ))
    .parse_next(input)?;
    Ok(OrderItem {
        expr,
        descending: direction.unwrap_or(false),
    })
}

// ============ Expressions (lowest precedence first) ============

fn expr(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    let head = or_expr.parse_next(input)?;
    let body = opt(preceded((ws, ':', ws), or_expr)).parse_next(input)?;
    Ok(match body {
        Some(body) => Cst::new(CstKind::Lambda, ":", remaining, vec![head, body]),
        None => head,
    })
}

fn or_expr(input: &mut &str) -> PResult<Cst> {
    chain(input, and_expr, &[("or", CstKind::Or)])
}

fn and_expr(input: &mut &str) -> PResult<Cst> {
    chain(input, not_expr, &[("and", CstKind::And)])
}

fn not_expr(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    let negated = opt(terminated(keyword("not"), ws)).parse_next(input)?;
    match negated {
        Some(()) => {
            let operand = not_expr.parse_next(input)?;
            Ok(Cst::new(CstKind::Not, "not", remaining, vec![operand]))
        }
        None => rel_expr.parse_next(input),
    }
}

fn rel_expr(input: &mut &str) -> PResult<Cst> {
    chain(
        input,
        add_expr,
        &[
            ("eq", CstKind::Eq),
            ("ne", CstKind::Ne),
            ("gt", CstKind::Gt),
            ("ge", CstKind::Ge),
            ("lt", CstKind::Lt),
            ("le", CstKind::Le),
            ("in", CstKind::In),
        ],
    )
}

fn add_expr(input: &mut &str) -> PResult<Cst> {
    chain(input, mul_expr, &[("add", CstKind::Add), ("sub", CstKind::Sub)])
}

fn mul_expr(input: &mut &str) -> PResult<Cst> {
    chain(
        input,
        as_expr,
        &[
            ("mul", CstKind::Mul),
            ("div", CstKind::Div),
            ("mod", CstKind::Mod),
        ],
    )
}

fn as_expr(input: &mut &str) -> PResult<Cst> {
    chain(input, postfix_expr, &[("as", CstKind::As)])
}

/// `operand (op operand)*`, grouping consecutive operands of the same operator
fn chain(
    input: &mut &str,
    operand: fn(&mut &str) -> PResult<Cst>,
    ops: &[(&'static str, CstKind)],
) -> PResult<Cst> {
    let remaining = input.len();
    let first = operand(input)?;
    let rest: Vec<(CstKind, Cst)> = repeat(
        0..,
        (ws, |i: &mut &str| operator(i, ops), ws, operand).map(|(_, op, _, e)| (op, e)),
    )
    .parse_next(input)?;

    let mut rest = rest.into_iter();
    let Some((mut kind, second)) = rest.next() else {
        return Ok(first);
    };
    let mut operands = vec![first, second];
    for (op, rhs) in rest {
        if op != kind {
            let closed = Cst::new(
                kind,
                keyword_text(ops, kind),
                remaining,
                std::mem::take(&mut operands),
            );
            operands.push(closed);
            kind = op;
        }
        operands.push(rhs);
    }
    Ok(Cst::new(kind, keyword_text(ops, kind), remaining, operands))
}

fn keyword_text(ops: &[(&'static str, CstKind)], kind: CstKind) -> &'static str {
    ops.iter()
        .find(|(_, k)| *k == kind)
        .map(|(text, _)| *text)
        .unwrap_or("")
}

fn operator(input: &mut &str, ops: &[(&'static str, CstKind)]) -> PResult<CstKind> {
    for &(text, kind) in ops {
        if opt(keyword(text)).parse_next(input)?.is_some() {
            return Ok(kind);
        }
    }
    Err(winnow::error::ErrMode::Backtrack(
        winnow::error::ContextError::new(),
    ))
}

/// A word that is not the prefix of a longer identifier
fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, (), winnow::error::ErrMode<winnow::error::ContextError>> {
    terminated(word, not(one_of(is_ident_char))).void()
}

// ============ Postfix (.member, call, index) ============

fn postfix_expr(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    let base = primary.parse_next(input)?;
    let members: Vec<Cst> = repeat(0.., preceded((ws, '.', ws), member)).parse_next(input)?;
    if members.is_empty() {
        return Ok(base);
    }
    let mut children = Vec::with_capacity(members.len() + 1);
    children.push(base);
    children.extend(members);
    Ok(Cst::new(CstKind::Dot, ".", remaining, children))
}

/// `name`, `name(args)` or `name[args]`
fn member(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    let name = ident.parse_next(input)?;
    let call = opt(delimited(('(', ws), args, (ws, ')'))).parse_next(input)?;
    if let Some(args) = call {
        return Ok(Cst::new(CstKind::Call, name, remaining, args));
    }
    let index = opt(delimited(('[', ws), args, (ws, ']'))).parse_next(input)?;
    if let Some(args) = index {
        return Ok(Cst::new(CstKind::Indexer, name, remaining, args));
    }
    Ok(Cst::leaf(CstKind::Identifier, name, remaining))
}

fn args(input: &mut &str) -> PResult<Vec<Cst>> {
    separated(0.., expr, (ws, ',', ws)).parse_next(input)
}

// ============ Primary ============

fn primary(input: &mut &str) -> PResult<Cst> {
    alt((
        paren_expr,
        array_expr,
        number,
        prefixed_string,
        string,
        member,
    ))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    delimited(('(', ws), expr, (ws, ')'))
        .map(|inner| Cst::new(CstKind::Parens, "()", remaining, vec![inner]))
        .parse_next(input)
}

fn array_expr(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    delimited(('[', ws), args, (ws, ']'))
        .map(|items| Cst::new(CstKind::Array, "[]", remaining, items))
        .parse_next(input)
}

/// Numeric token; shape and suffix are validated by the tree builder
fn number(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    (
        opt('-'),
        digit1,
        take_while(0.., |c: char| c.is_ascii_digit() || c == '.'),
        opt(one_of(['m', 'M', 'f', 'F', 'L'])),
        not(one_of(is_ident_char)),
    )
        .take()
        .map(|text| Cst::leaf(CstKind::Number, text, remaining))
        .parse_next(input)
}

/// `prefix'…'` such as `t'Dog'`, `guid'…'`, `datetime'…'`
fn prefixed_string(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    (ident_raw, quoted)
        .take()
        .map(|text| Cst::leaf(CstKind::PrefixedString, text, remaining))
        .parse_next(input)
}

fn string(input: &mut &str) -> PResult<Cst> {
    let remaining = input.len();
    quoted
        .map(|text| Cst::leaf(CstKind::String, text, remaining))
        .parse_next(input)
}

/// Raw quoted text including the quotes; `''` is an escaped quote
fn quoted<'a>(input: &mut &'a str) -> PResult<&'a str> {
    (
        '\'',
        repeat::<_, _, (), _, _>(0.., alt(("''".void(), take_while(1.., |c: char| c != '\'').void()))),
        '\'',
    )
        .take()
        .parse_next(input)
}

// ============ Identifiers ============

const RESERVED: &[&str] = &[
    "and", "or", "not", "eq", "ne", "gt", "ge", "lt", "le", "add", "sub", "mul", "div", "mod",
    "in", "as",
];

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident_raw<'a>(input: &mut &'a str) -> PResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

/// Identifier, optionally `@`-escaped; keywords are only accepted escaped
fn ident<'a>(input: &mut &'a str) -> PResult<&'a str> {
    alt((
        ('@', ident_raw).take(),
        ident_raw.verify(|name: &str| !RESERVED.contains(&name)),
    ))
    .parse_next(input)
}

// ============ Whitespace ============

fn ws(input: &mut &str) -> PResult<()> {
    multispace0.void().parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(cst: &Cst) -> Vec<CstKind> {
        cst.children.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn same_operator_chain_is_flat() {
        let cst = parse_expression("a add b add c").unwrap();
        assert_eq!(cst.kind, CstKind::Add);
        assert_eq!(cst.children.len(), 3);
    }

    #[test]
    fn mixed_operators_nest() {
        let cst = parse_expression("a add b sub c").unwrap();
        assert_eq!(cst.kind, CstKind::Sub);
        assert_eq!(kinds(&cst), [CstKind::Add, CstKind::Identifier]);
    }

    #[test]
    fn precedence() {
        let cst = parse_expression("a eq 1 or b gt 2 and not c").unwrap();
        assert_eq!(cst.kind, CstKind::Or);
        assert_eq!(kinds(&cst), [CstKind::Eq, CstKind::And]);
        assert_eq!(kinds(&cst.children[1]), [CstKind::Gt, CstKind::Not]);

        let cst = parse_expression("a mul b add c").unwrap();
        assert_eq!(cst.kind, CstKind::Add);
        assert_eq!(cst.children[0].kind, CstKind::Mul);
    }

    #[test]
    fn keywords_need_a_boundary() {
        let cst = parse_expression("android eq order").unwrap();
        assert_eq!(cst.kind, CstKind::Eq);
        assert_eq!(cst.children[0].text, "android");
        assert!(parse_expression("and eq 1").is_err());
        assert!(parse_expression("@and eq 1").is_ok());
    }

    #[test]
    fn postfix_members() {
        let cst = parse_expression("owner.pets.any(x:x.age gt 1)").unwrap();
        assert_eq!(cst.kind, CstKind::Dot);
        assert_eq!(
            kinds(&cst),
            [CstKind::Identifier, CstKind::Identifier, CstKind::Call]
        );
        let call = &cst.children[2];
        assert_eq!(call.text, "any");
        assert_eq!(call.children[0].kind, CstKind::Lambda);

        let cst = parse_expression("attributes['color']").unwrap();
        assert_eq!(cst.kind, CstKind::Indexer);
        assert_eq!(cst.children[0].kind, CstKind::String);
    }

    #[test]
    fn literals() {
        let cst = parse_expression("[1, -2.5, 3m, 'it''s', guid'00000000-0000-0000-0000-000000000000', t'Dog']").unwrap();
        assert_eq!(cst.kind, CstKind::Array);
        assert_eq!(
            kinds(&cst),
            [
                CstKind::Number,
                CstKind::Number,
                CstKind::Number,
                CstKind::String,
                CstKind::PrefixedString,
                CstKind::PrefixedString
            ]
        );
        assert_eq!(cst.children[1].text, "-2.5");
        assert_eq!(cst.children[3].text, "'it''s'");
    }

    #[test]
    fn malformed_number_is_one_token() {
        let cst = parse_expression("42.5.6").unwrap();
        assert_eq!(cst.kind, CstKind::Number);
        assert_eq!(cst.text, "42.5.6");
    }

    #[test]
    fn offsets_point_into_the_query() {
        let cst = parse_expression("  name eq 'x'").unwrap();
        assert_eq!(cst.offset, 2);
        assert_eq!(cst.children[1].offset, 10);
    }

    #[test]
    fn trailing_input_reports_column() {
        let err = parse_expression("name eq 'x' foo").unwrap_err();
        assert_eq!(err.column(), Some(13));
        assert!(err.message().contains("foo"));

        let err = parse_expression("name eq").unwrap_err();
        assert_eq!(err.column(), Some(6));
    }

    #[test]
    fn order_and_select_lists() {
        let items = parse_order_by("name desc, age asc, id").unwrap();
        let flags: Vec<bool> = items.iter().map(|i| i.descending).collect();
        assert_eq!(flags, [true, false, false]);

        let items = parse_select("name, length(name) as len").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].kind, CstKind::As);
    }
}
