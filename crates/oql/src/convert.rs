//! Node tree → typed expression tree
//!
//! The converter resolves symbols against a [`QueryTypeResolver`], applies the
//! implicit conversions of the query language and binds function calls through
//! a [`FunctionTable`]. Every failure is reported as a [`QueryParseError`]
//! carrying the offending node's position.

use std::sync::Arc;

use log::trace;

use crate::error::{ErrorKind, QueryParseError, ResolveError};
use crate::expr::{BinaryOp, Expr, Lambda, Parameter, lift_enum_comparison};
use crate::functions::{Bindings, FunctionTable, Member};
use crate::node::{Node, NodeKind, NodeType, NumberLiteral, SymbolKind, SymbolNode};
use crate::schema::QueryTypeResolver;
use crate::types::Type;
use crate::value::{EnumValue, Value};

type Result<T> = std::result::Result<T, QueryParseError>;

/// Name of the root parameter in query text
pub const THIS: &str = "this";

/// Outcome of trying one overload
enum Candidate {
    Matched(Expr),
    Rejected,
}

pub struct Converter<'a> {
    resolver: &'a dyn QueryTypeResolver,
    functions: &'a FunctionTable,
    query: &'a str,
    this: Parameter,
    /// Lambda parameters in scope, innermost last
    scopes: Vec<Parameter>,
}

impl<'a> Converter<'a> {
    pub fn new(
        resolver: &'a dyn QueryTypeResolver,
        functions: &'a FunctionTable,
        this_type: Type,
        query: &'a str,
    ) -> Self {
        Converter {
            resolver,
            functions,
            query,
            this: Parameter::new(THIS, this_type),
            scopes: Vec::new(),
        }
    }

    pub fn this_parameter(&self) -> &Parameter {
        &self.this
    }

    pub fn parse_expression(&mut self, node: &Node) -> Result<Expr> {
        self.parse(node, None)
    }

    /// Convert `node` and wrap it into a lambda over `this`
    pub fn parse_lambda(&mut self, node: &Node) -> Result<Lambda> {
        let body = self.parse_expression(node)?;
        Ok(Lambda::new(vec![self.this.clone()], body))
    }

    // ============ Errors ============

    fn fail(&self, kind: ErrorKind, message: impl Into<String>, node: &Node) -> QueryParseError {
        QueryParseError::new(kind, message).at(self.query, node.offset)
    }

    fn resolution(&self, error: ResolveError, node: &Node) -> QueryParseError {
        match error {
            ResolveError::Other(_) => QueryParseError::unexpected(error).at(self.query, node.offset),
            known => self.fail(ErrorKind::Resolution, known.to_string(), node),
        }
    }

    // ============ Dispatch ============

    fn parse(&mut self, node: &Node, expected: Option<&Type>) -> Result<Expr> {
        match &node.kind {
            NodeKind::Binary { op, left, right } => self.parse_binary(node, *op, left, right, expected),
            NodeKind::Symbol(symbol) => match symbol.kind {
                SymbolKind::Plain => self.parse_symbol(None, &symbol.name, expected, node),
                SymbolKind::MethodCall => self.parse_method_call(symbol, expected, node),
                SymbolKind::Indexer => self.parse_indexer(None, symbol, node),
            },
            NodeKind::Number(n) => Ok(match *n {
                NumberLiteral::Int32(v) => Expr::constant(v),
                NumberLiteral::Int64(v) => Expr::constant(v),
                NumberLiteral::Float(v) => Expr::constant(v),
                NumberLiteral::Double(v) => Expr::constant(v),
                NumberLiteral::Decimal(v) => Expr::constant(v),
            }),
            NodeKind::String(text) => self.parse_string_literal(text, expected, node),
            NodeKind::Guid(g) => Ok(Expr::constant(*g)),
            NodeKind::DateTime(d) => Ok(Expr::constant(*d)),
            NodeKind::DateTimeOffset(d) => Ok(Expr::constant(*d)),
            NodeKind::TypeName(name) => {
                let ty = self
                    .resolver
                    .resolve_type(name)
                    .map_err(|e| self.resolution(e, node))?;
                Ok(Expr::typed_constant(Value::Type(ty), Type::TypeRef))
            }
            NodeKind::Not(inner) => {
                let operand = self.parse(inner, Some(&Type::Bool))?;
                if operand.ty().underlying() != &Type::Bool {
                    return Err(self.fail(
                        ErrorKind::Resolution,
                        format!("Operand of 'not' must be Boolean, found {}", operand.ty()),
                        inner,
                    ));
                }
                Ok(operand.not())
            }
            NodeKind::Lambda { parameter, body } => {
                let shape = expected.and_then(lambda_parameter_type);
                let Some((param_ty, quoted)) = shape else {
                    return Err(self.fail(
                        ErrorKind::Resolution,
                        format!("Unable to infer the type of lambda parameter '{parameter}'"),
                        node,
                    ));
                };
                let lambda = self.parse_lambda_body(parameter, body, param_ty)?;
                Ok(wrap_lambda(lambda, quoted))
            }
            NodeKind::Array(items) => {
                let element = expected.and_then(Type::element_type);
                self.parse_array(items, element, node)
            }
            NodeKind::Unhandled(text) => Err(self.fail(
                ErrorKind::Unsupported,
                format!("Unable to handle expression '{text}'"),
                node,
            )),
        }
    }

    fn parse_lambda_body(&mut self, parameter: &str, body: &Node, ty: Type) -> Result<Lambda> {
        let parameter = Parameter::new(parameter, ty);
        self.scopes.push(parameter.clone());
        let result = self.parse(body, None);
        self.scopes.pop();
        Ok(Lambda::new(vec![parameter], result?))
    }

    // ============ Symbols ============

    fn parse_symbol(
        &mut self,
        base: Option<Expr>,
        name: &str,
        expected: Option<&Type>,
        node: &Node,
    ) -> Result<Expr> {
        let base = match base {
            Some(base) => base,
            None => {
                match name {
                    THIS => return Ok(self.this.expr()),
                    "true" => return Ok(Expr::constant(true)),
                    "false" => return Ok(Expr::constant(false)),
                    "null" => {
                        let ty = match expected {
                            Some(ty) if ty.can_be_null() => ty.clone(),
                            _ => Type::Object,
                        };
                        return Ok(Expr::null(ty));
                    }
                    _ => {}
                }
                if let Some(p) = self.scopes.iter().rev().find(|p| p.name() == name) {
                    return Ok(p.expr());
                }
                self.this.expr()
            }
        };

        if let Some((key, _)) = base.ty().dictionary_types() {
            if key != &Type::String {
                return Err(self.fail(
                    ErrorKind::Unsupported,
                    format!("Dictionary keys of type {key} are not supported"),
                    node,
                ));
            }
            return Ok(base.get(name));
        }

        self.resolver
            .resolve_property(&base, name)
            .map_err(|e| self.resolution(e, node))
    }

    fn parse_indexer(&mut self, base: Option<Expr>, symbol: &SymbolNode, node: &Node) -> Result<Expr> {
        let target = self.parse_symbol(base, &symbol.name, None, node)?;
        let target_ty = target.ty();
        let value_ty = match target_ty.dictionary_types() {
            Some((Type::String, value)) => value.clone(),
            _ => {
                return Err(self.fail(
                    ErrorKind::Unsupported,
                    format!(
                        "Indexer access on '{}' requires a dictionary with string keys, found {target_ty}",
                        symbol.name
                    ),
                    node,
                ));
            }
        };
        let [index] = symbol.children.as_slice() else {
            return Err(self.fail(
                ErrorKind::Unsupported,
                "Only single-argument indexers are supported",
                node,
            ));
        };
        let key = self.parse(index, Some(&Type::String))?;
        if key.ty() != Type::String {
            return Err(self.fail(
                ErrorKind::Resolution,
                format!("Dictionary key must be a String, found {}", key.ty()),
                index,
            ));
        }
        Ok(Expr::DictionaryGet {
            instance: Box::new(target),
            key: Box::new(key),
            ty: value_ty,
        })
    }

    // ============ Literals ============

    fn parse_string_literal(&self, text: &str, expected: Option<&Type>, node: &Node) -> Result<Expr> {
        let Some(expected) = expected else {
            return Ok(Expr::constant(text));
        };
        match expected.underlying() {
            Type::String | Type::Object => Ok(Expr::constant(text)),
            Type::Enum(enum_type) => match EnumValue::parse(enum_type, text) {
                Some(value) => Ok(Expr::constant(value)),
                None => Err(self.fail(
                    ErrorKind::Resolution,
                    format!("'{text}' is not a member of enum {}", enum_type.name()),
                    node,
                )),
            },
            Type::Char if text.chars().count() == 1 => {
                Ok(Expr::constant(text.chars().next().unwrap_or_default()))
            }
            other => Err(self.fail(
                ErrorKind::Unsupported,
                format!("A string literal cannot be used as {other}"),
                node,
            )),
        }
    }

    fn parse_array(&mut self, items: &[Node], element: Option<&Type>, node: &Node) -> Result<Expr> {
        let mut parsed = Vec::with_capacity(items.len());
        for item in items {
            parsed.push(self.parse(item, element)?);
        }

        let element = match element {
            Some(ty) => ty.clone(),
            None => {
                let Some(first) = parsed.iter().find(|e| !is_null_constant(e)) else {
                    return Err(self.fail(
                        ErrorKind::Resolution,
                        "Unable to infer the element type of an empty array",
                        node,
                    ));
                };
                let ty = first.ty();
                if parsed.iter().any(is_null_constant) {
                    ty.to_nullable()
                } else {
                    ty
                }
            }
        };

        let mut items_out = Vec::with_capacity(parsed.len());
        for (expr, item) in parsed.into_iter().zip(items) {
            let ty = expr.ty();
            let fitted = if ty == element {
                expr
            } else if is_null_constant(&expr) && element.can_be_null() {
                Expr::null(element.clone())
            } else if element.is_nullable() && element.underlying() == &ty {
                expr.retyped(element.clone())
            } else if element.is_assignable_from(&ty) && !ty.is_value_type() {
                expr
            } else {
                return Err(self.fail(
                    ErrorKind::Resolution,
                    format!("Array element of type {ty} does not fit element type {element}"),
                    item,
                ));
            };
            items_out.push(fitted);
        }

        Ok(make_array(element, items_out))
    }

    // ============ Operators ============

    fn parse_binary(
        &mut self,
        node: &Node,
        op: NodeType,
        left: &Node,
        right: &Node,
        expected: Option<&Type>,
    ) -> Result<Expr> {
        match op {
            NodeType::Dot => self.parse_member_access(left, right, expected),
            NodeType::As => {
                let NodeKind::TypeName(name) = &right.kind else {
                    return Err(self.fail(
                        ErrorKind::Syntax,
                        "Right side of 'as' must be a type literal",
                        right,
                    ));
                };
                let ty = self
                    .resolver
                    .resolve_type(name)
                    .map_err(|e| self.resolution(e, right))?;
                let operand = self.parse(left, None)?;
                Ok(operand.type_as(ty))
            }
            NodeType::In => self.parse_in(left, right),
            _ => {
                let Some(op) = binary_op(op) else {
                    return Err(self.fail(
                        ErrorKind::Unsupported,
                        format!("Operator {op:?} is not supported"),
                        node,
                    ));
                };
                self.parse_operator(node, op, left, right)
            }
        }
    }

    fn parse_member_access(&mut self, left: &Node, right: &Node, expected: Option<&Type>) -> Result<Expr> {
        let NodeKind::Symbol(symbol) = &right.kind else {
            return Err(self.fail(
                ErrorKind::Syntax,
                "Expected a member name after '.'",
                right,
            ));
        };
        match symbol.kind {
            SymbolKind::MethodCall => {
                // a.Foo(b) is Foo(a, b)
                let mut children = Vec::with_capacity(symbol.children.len() + 1);
                children.push(left.clone());
                children.extend(symbol.children.iter().cloned());
                let call = SymbolNode {
                    name: symbol.name.clone(),
                    kind: SymbolKind::MethodCall,
                    children,
                };
                self.parse_method_call(&call, expected, right)
            }
            SymbolKind::Plain => {
                let base = self.parse(left, None)?;
                self.parse_symbol(Some(base), &symbol.name, expected, right)
            }
            SymbolKind::Indexer => {
                let base = self.parse(left, None)?;
                self.parse_indexer(Some(base), symbol, right)
            }
        }
    }

    fn parse_operator(&mut self, node: &Node, op: BinaryOp, left: &Node, right: &Node) -> Result<Expr> {
        let string_on_left =
            matches!(left.kind, NodeKind::String(_)) && !matches!(right.kind, NodeKind::String(_));
        let (l, r) = if string_on_left {
            let r = self.parse(right, None)?;
            let l = self.parse(left, Some(&r.ty()))?;
            (l, r)
        } else {
            let l = self.parse(left, None)?;
            let r = self.parse(right, Some(&l.ty()))?;
            (l, r)
        };

        let (l, r) = match op {
            BinaryOp::Eq | BinaryOp::Ne => lift_enum_comparison(&l, &r).unwrap_or((l, r)),
            _ => (l, r),
        };
        let (l, r) = reconcile(l, r);
        self.make_binary(node, op, l, r)
    }

    fn make_binary(&self, node: &Node, op: BinaryOp, l: Expr, r: Expr) -> Result<Expr> {
        let (lt, rt) = (l.ty(), r.ty());
        let valid = if op.is_logical() {
            lt.underlying() == &Type::Bool && rt.underlying() == &Type::Bool
        } else if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            lt == rt
                || (!lt.is_value_type() && !rt.is_value_type()
                    && (lt.is_assignable_from(&rt) || rt.is_assignable_from(&lt)))
        } else if op.is_comparison() {
            lt == rt
                && (lt.underlying().is_numeric()
                    || matches!(
                        lt.underlying(),
                        Type::DateTime | Type::DateTimeOffset | Type::Char | Type::Enum(_)
                    ))
        } else {
            lt == rt
                && (lt.underlying().is_numeric() || (op == BinaryOp::Add && lt == Type::String))
        };
        if !valid {
            return Err(self.fail(
                ErrorKind::Unsupported,
                format!(
                    "Operator '{}' is not defined for operands of type {lt} and {rt}",
                    op.keyword()
                ),
                node,
            ));
        }
        Ok(Expr::binary(op, l, r))
    }

    fn parse_in(&mut self, left: &Node, right: &Node) -> Result<Expr> {
        let NodeKind::Array(items) = &right.kind else {
            return Err(self.fail(
                ErrorKind::Syntax,
                "Right side of 'in' must be an array literal",
                right,
            ));
        };
        let needle = self.parse(left, None)?;
        let needle_ty = needle.ty();

        let (array, needle) = if needle_ty == Type::Object {
            let array = self.parse_array(items, None, right)?;
            let element = array.ty().element_type().cloned().unwrap_or(Type::Object);
            if element.is_value_type() {
                let lifted = element.to_nullable();
                (retype_array(array, &lifted), needle.type_as(lifted))
            } else {
                (array, needle)
            }
        } else {
            (self.parse_array(items, Some(&needle_ty), right)?, needle)
        };

        let functions = self.functions;
        let member = functions
            .candidates("contains", 2)
            .iter()
            .map(|m| m.member())
            .find(|m| m.infer_return(&[array.ty(), needle.ty()]).is_some())
            .cloned();
        let Some(member) = member else {
            return Err(self.fail(
                ErrorKind::Resolution,
                format!("No 'contains' function accepts {} in {}", needle.ty(), array.ty()),
                right,
            ));
        };
        Expr::call(&member, vec![array, needle]).ok_or_else(|| {
            self.fail(ErrorKind::Resolution, "Unable to bind 'in' operator", right)
        })
    }

    // ============ Calls ============

    fn parse_method_call(&mut self, call: &SymbolNode, expected: Option<&Type>, node: &Node) -> Result<Expr> {
        let args = &call.children;
        match call.name.as_str() {
            "iif" => return self.parse_iif(args, expected, node),
            "cast" | "isof" => return self.parse_type_operation(&call.name, args, node),
            _ => {}
        }

        let functions = self.functions;
        let candidates = functions.candidates(&call.name, args.len());
        if candidates.is_empty() {
            return Err(self.fail(
                ErrorKind::Resolution,
                format!(
                    "Could not recognize method '{}' with {} argument(s)",
                    call.name,
                    args.len()
                ),
                node,
            ));
        }

        let textual: Vec<&Node> = args.iter().collect();
        let mut first_error = None;
        for mapping in candidates {
            let Some(ordered) = mapping.reorder(&textual) else {
                continue;
            };
            match self.try_candidate(mapping.member(), &ordered) {
                Ok(Candidate::Matched(expr)) => {
                    trace!("Bound {} to {}", call.name, mapping.member().id());
                    return Ok(expr);
                }
                Ok(Candidate::Rejected) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| {
            self.fail(
                ErrorKind::Resolution,
                format!("No overload of '{}' matches the given arguments", call.name),
                node,
            )
        }))
    }

    /// Parse arguments against one member signature, inferring generic
    /// parameters as they become known. Lambda arguments wait until their
    /// parameter types are bound.
    fn try_candidate(&mut self, member: &Arc<Member>, args: &[&Node]) -> Result<Candidate> {
        let params = member.params();
        let mut bindings = Bindings::new(member.type_params());
        let mut parsed: Vec<Option<Expr>> = vec![None; args.len()];
        let mut pending: Vec<usize> = (0..args.len()).collect();

        while !pending.is_empty() {
            let mut deferred = Vec::new();
            for &i in &pending {
                let sig = &params[i];
                let expr = match (&args[i].kind, sig.lambda_shape()) {
                    (NodeKind::Lambda { parameter, body }, Some((lambda_params, _, quoted))) => {
                        let [param_sig] = lambda_params else {
                            return Ok(Candidate::Rejected);
                        };
                        let Some(param_ty) = param_sig.substitute(&bindings) else {
                            deferred.push(i);
                            continue;
                        };
                        let lambda = self.parse_lambda_body(parameter, body, param_ty)?;
                        wrap_lambda(lambda, quoted)
                    }
                    _ => {
                        let expected = sig.substitute(&bindings).filter(informative);
                        self.parse(args[i], expected.as_ref())?
                    }
                };
                if !sig.unify(&expr.ty(), &mut bindings) {
                    return Ok(Candidate::Rejected);
                }
                parsed[i] = Some(expr);
            }
            if deferred.len() == pending.len() {
                return Ok(Candidate::Rejected);
            }
            pending = deferred;
        }

        let mut fitted = Vec::with_capacity(parsed.len());
        for (sig, expr) in params.iter().zip(parsed) {
            let (Some(target), Some(expr)) = (sig.substitute(&bindings), expr) else {
                return Ok(Candidate::Rejected);
            };
            match fit_argument(expr, &target) {
                Some(expr) => fitted.push(expr),
                None => return Ok(Candidate::Rejected),
            }
        }
        Ok(Expr::call(member, fitted).map_or(Candidate::Rejected, Candidate::Matched))
    }

    fn parse_iif(&mut self, args: &[Node], expected: Option<&Type>, node: &Node) -> Result<Expr> {
        let [test, if_true, if_false] = args else {
            return Err(self.fail(
                ErrorKind::Syntax,
                format!("iif takes exactly 3 arguments, found {}", args.len()),
                node,
            ));
        };
        let test_expr = self.parse(test, Some(&Type::Bool))?;
        if test_expr.ty().underlying() != &Type::Bool {
            return Err(self.fail(
                ErrorKind::Resolution,
                format!("iif condition must be Boolean, found {}", test_expr.ty()),
                test,
            ));
        }
        let when_true = self.parse(if_true, expected)?;
        let when_false = self.parse(if_false, Some(&when_true.ty()))?;
        let (when_true, when_false) = reconcile(when_true, when_false);
        if when_true.ty() != when_false.ty() {
            return Err(self.fail(
                ErrorKind::Resolution,
                format!(
                    "iif branches have different types {} and {}",
                    when_true.ty(),
                    when_false.ty()
                ),
                node,
            ));
        }
        Ok(Expr::conditional(test_expr, when_true, when_false))
    }

    /// `cast(t'T')`, `cast(x,t'T')`, `isof(t'T')`, `isof(x,t'T')`
    fn parse_type_operation(&mut self, name: &str, args: &[Node], node: &Node) -> Result<Expr> {
        let (operand, type_node) = match args {
            [type_node] => (self.this.expr(), type_node),
            [operand, type_node] => (self.parse(operand, None)?, type_node),
            _ => {
                return Err(self.fail(
                    ErrorKind::Syntax,
                    format!("{name} takes 1 or 2 arguments, found {}", args.len()),
                    node,
                ));
            }
        };
        let NodeKind::TypeName(type_name) = &type_node.kind else {
            return Err(self.fail(
                ErrorKind::Syntax,
                format!("Last argument of {name} must be a type literal"),
                type_node,
            ));
        };
        let ty = self
            .resolver
            .resolve_type(type_name)
            .map_err(|e| self.resolution(e, type_node))?;
        Ok(if name == "cast" {
            operand.convert(ty)
        } else {
            operand.type_is(ty)
        })
    }
}

fn binary_op(node_type: NodeType) -> Option<BinaryOp> {
    Some(match node_type {
        NodeType::AndAlso => BinaryOp::And,
        NodeType::OrElse => BinaryOp::Or,
        NodeType::Equal => BinaryOp::Eq,
        NodeType::NotEqual => BinaryOp::Ne,
        NodeType::GreaterThan => BinaryOp::Gt,
        NodeType::GreaterThanOrEqual => BinaryOp::Ge,
        NodeType::LessThan => BinaryOp::Lt,
        NodeType::LessThanOrEqual => BinaryOp::Le,
        NodeType::Add => BinaryOp::Add,
        NodeType::Subtract => BinaryOp::Sub,
        NodeType::Multiply => BinaryOp::Mul,
        NodeType::Divide => BinaryOp::Div,
        NodeType::Modulo => BinaryOp::Mod,
        _ => return None,
    })
}

/// Parameter type and quoting of an expected single-parameter function type
fn lambda_parameter_type(expected: &Type) -> Option<(Type, bool)> {
    let (function, quoted) = match expected {
        Type::Expression(inner) => (inner.as_ref(), true),
        other => (other, false),
    };
    match function {
        Type::Function(params, _) if params.len() == 1 => Some((params[0].clone(), quoted)),
        _ => None,
    }
}

fn wrap_lambda(lambda: Lambda, quoted: bool) -> Expr {
    let lambda = Arc::new(lambda);
    if quoted {
        Expr::Quote(lambda)
    } else {
        Expr::Lambda(lambda)
    }
}

/// Expected types worth passing down to an argument: those that change how a
/// literal is read
fn informative(ty: &Type) -> bool {
    ty.is_enum() || ty.element_type().is_some() || ty.is_nullable() || ty == &Type::Char
}

fn is_null_constant(expr: &Expr) -> bool {
    matches!(expr.as_constant(), Some(Value::Null))
}

fn make_array(element: Type, items: Vec<Expr>) -> Expr {
    if items.iter().all(Expr::is_constant) {
        let values = items
            .into_iter()
            .filter_map(|e| match e {
                Expr::Constant { value, .. } => Some(value),
                _ => None,
            })
            .collect::<Vec<_>>();
        Expr::typed_constant(Value::Array(values), Type::array_of(element))
    } else {
        Expr::NewArray { element, items }
    }
}

/// Rebuild an array expression with a wider element type
fn retype_array(array: Expr, element: &Type) -> Expr {
    match array {
        Expr::Constant { value, .. } => Expr::typed_constant(value, Type::array_of(element.clone())),
        Expr::NewArray { items, .. } => Expr::NewArray {
            element: element.clone(),
            items: items.into_iter().map(|e| e.retyped(element.clone())).collect(),
        },
        other => other,
    }
}

/// Make an argument fit its parameter type, widening to nullable if needed
fn fit_argument(expr: Expr, target: &Type) -> Option<Expr> {
    let ty = expr.ty();
    if target.is_assignable_from(&ty) {
        Some(expr)
    } else if target.is_nullable() && target.underlying() == &ty {
        Some(expr.retyped(target.clone()))
    } else {
        None
    }
}

/// Bring two operands to a common type: `Nullable<T>` vs `T` widens the
/// plain side, `Object` vs anything else promotes the other side to nullable
/// and narrows the object side with `as`. Operands that cannot be reconciled
/// are returned unchanged.
fn reconcile(l: Expr, r: Expr) -> (Expr, Expr) {
    match reconcile_left(l, r) {
        Ok(pair) => pair,
        Err((l, r)) => match reconcile_left(r, l) {
            Ok((r, l)) => (l, r),
            Err((r, l)) => (l, r),
        },
    }
}

fn reconcile_left(l: Expr, r: Expr) -> std::result::Result<(Expr, Expr), (Expr, Expr)> {
    let (lt, rt) = (l.ty(), r.ty());
    if lt == rt {
        return Ok((l, r));
    }
    if lt.is_nullable() && lt.underlying() == &rt {
        return Ok((l, r.retyped(lt)));
    }
    if lt == Type::Object {
        let target = rt.to_nullable();
        let l = if l.is_constant() {
            l.retyped(target.clone())
        } else {
            l.type_as(target.clone())
        };
        let r = if rt == target { r } else { r.retyped(target) };
        return Ok((l, r));
    }
    Err((l, r))
}
