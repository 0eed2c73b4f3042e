//! Typed expression tree
//!
//! Produced by the converter, consumed by the evaluator and the serializer.
//! Client code can also build predicates directly through the builder methods.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ResolveError;
use crate::functions::Member;
use crate::types::{Property, Type};
use crate::value::{EnumValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn keyword(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le
        )
    }

    pub fn is_arithmetic(self) -> bool {
        !self.is_logical() && !self.is_comparison()
    }
}

static NEXT_PARAMETER: AtomicU64 = AtomicU64::new(1);

/// A lambda parameter. Identity is by id, not by name.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    ty: Type,
    id: u64,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Parameter {
            name: name.into(),
            ty,
            id: NEXT_PARAMETER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn expr(&self) -> Expr {
        Expr::Parameter(self.clone())
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub parameters: Vec<Parameter>,
    pub body: Expr,
}

impl Lambda {
    pub fn new(parameters: Vec<Parameter>, body: Expr) -> Self {
        Lambda { parameters, body }
    }

    pub fn ty(&self) -> Type {
        Type::function(
            self.parameters.iter().map(|p| p.ty.clone()).collect(),
            self.body.ty(),
        )
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Constant {
        value: Value,
        ty: Type,
    },
    Parameter(Parameter),
    Property {
        instance: Box<Expr>,
        property: Arc<Property>,
    },
    DictionaryGet {
        instance: Box<Expr>,
        key: Box<Expr>,
        ty: Type,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: Type,
    },
    Not(Box<Expr>),
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        ty: Type,
    },
    Call {
        member: Arc<Member>,
        args: Vec<Expr>,
        ty: Type,
    },
    Convert {
        operand: Box<Expr>,
        ty: Type,
    },
    TypeAs {
        operand: Box<Expr>,
        ty: Type,
    },
    TypeIs {
        operand: Box<Expr>,
        target: Type,
    },
    Lambda(Arc<Lambda>),
    /// A lambda passed as an expression tree rather than a delegate
    Quote(Arc<Lambda>),
    NewArray {
        element: Type,
        items: Vec<Expr>,
    },
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    /// Static type of the expression
    pub fn ty(&self) -> Type {
        match self {
            Expr::Constant { ty, .. }
            | Expr::DictionaryGet { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Conditional { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Convert { ty, .. }
            | Expr::TypeAs { ty, .. } => ty.clone(),
            Expr::Parameter(p) => p.ty.clone(),
            Expr::Property { property, .. } => property.ty.clone(),
            Expr::Not(_) | Expr::TypeIs { .. } => Type::Bool,
            Expr::Lambda(l) => l.ty(),
            Expr::Quote(l) => Type::Expression(Box::new(l.ty())),
            Expr::NewArray { element, .. } => Type::array_of(element.clone()),
        }
    }

    // ============ Builders ============

    /// A constant typed by its value
    pub fn constant(value: impl Into<Value>) -> Expr {
        let value = value.into();
        let ty = value.natural_type();
        Expr::Constant { value, ty }
    }

    pub fn typed_constant(value: impl Into<Value>, ty: Type) -> Expr {
        Expr::Constant {
            value: value.into(),
            ty,
        }
    }

    pub fn null(ty: Type) -> Expr {
        Expr::Constant {
            value: Value::Null,
            ty,
        }
    }

    /// Access a property of a resource-typed expression by query or member name
    pub fn property(self, name: &str) -> Result<Expr, ResolveError> {
        let ty = self.ty();
        let Some(resource) = ty.as_resource() else {
            return Err(ResolveError::NotAResource {
                type_name: ty.to_string(),
                property: name.to_string(),
            });
        };
        let property = resource
            .find_property(name)
            .ok_or_else(|| ResolveError::UnknownProperty {
                type_name: resource.name().to_string(),
                property: name.to_string(),
            })?;
        Ok(Expr::Property {
            instance: Box::new(self),
            property,
        })
    }

    /// Read a key of a dictionary-typed expression
    pub fn get(self, key: impl Into<Value>) -> Expr {
        let ty = match self.ty().dictionary_types() {
            Some((_, value)) => value.clone(),
            None => Type::Object,
        };
        Expr::DictionaryGet {
            instance: Box::new(self),
            key: Box::new(Expr::constant(key)),
            ty,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let ty = if op.is_arithmetic() { left.ty() } else { Type::Bool };
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn eq(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    pub fn ne(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Ne, self, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn ge(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Ge, self, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Le, self, other)
    }

    pub fn add(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn convert(self, ty: Type) -> Expr {
        Expr::Convert {
            operand: Box::new(self),
            ty,
        }
    }

    pub fn type_as(self, ty: Type) -> Expr {
        Expr::TypeAs {
            operand: Box::new(self),
            ty: ty.to_nullable(),
        }
    }

    pub fn type_is(self, target: Type) -> Expr {
        Expr::TypeIs {
            operand: Box::new(self),
            target,
        }
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Expr {
        let ty = if_true.ty();
        Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
            ty,
        }
    }

    pub fn lambda(parameters: Vec<Parameter>, body: Expr) -> Expr {
        Expr::Lambda(Arc::new(Lambda::new(parameters, body)))
    }

    /// Call a member, inferring its generic arguments from the argument types
    pub fn call(member: &Arc<Member>, args: Vec<Expr>) -> Option<Expr> {
        let arg_types: Vec<Type> = args.iter().map(Expr::ty).collect();
        let ty = member.infer_return(&arg_types)?;
        Some(Expr::Call {
            member: member.clone(),
            args,
            ty,
        })
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant { .. })
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Rebuild a constant with a new static type; other expressions are converted
    pub fn retyped(self, ty: Type) -> Expr {
        match self {
            Expr::Constant { value, .. } => Expr::Constant { value, ty },
            other => other.convert(ty),
        }
    }
}

/// Debug-oriented rendering, close to C# expression syntax
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant { value, .. } => match value {
                Value::String(s) => write!(f, "\"{s}\""),
                other => write!(f, "{other}"),
            },
            Expr::Parameter(p) => write!(f, "{}", p.name),
            Expr::Property { instance, property } => write!(f, "{instance}.{}", property.name),
            Expr::DictionaryGet { instance, key, .. } => write!(f, "{instance}[{key}]"),
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({left} {} {right})", op.keyword()),
            Expr::Not(inner) => write!(f, "!{inner}"),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => write!(f, "({test} ? {if_true} : {if_false})"),
            Expr::Call { member, args, .. } => {
                write!(f, "{}(", member.id())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Convert { operand, ty } => write!(f, "Convert({operand}, {ty})"),
            Expr::TypeAs { operand, ty } => write!(f, "({operand} as {ty})"),
            Expr::TypeIs { operand, target } => write!(f, "({operand} is {target})"),
            Expr::Lambda(l) | Expr::Quote(l) => {
                let names: Vec<&str> = l.parameters.iter().map(|p| p.name()).collect();
                write!(f, "({}) => {}", names.join(", "), l.body)
            }
            Expr::NewArray { items, .. } => {
                write!(f, "new[] {{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Rewrite an enum compared with an integer constant as an enum comparison.
///
/// Matches `Convert(e) op 42` or `e op 42` with `e` enum-typed, one level deep
/// and in either operand order; the result keeps the operand order.
pub fn lift_enum_comparison(left: &Expr, right: &Expr) -> Option<(Expr, Expr)> {
    fn lift(enum_side: &Expr, constant: &Expr) -> Option<(Expr, Expr)> {
        let operand = match enum_side {
            Expr::Convert { operand, .. } => operand.as_ref(),
            other => other,
        };
        let ty = operand.ty();
        let Type::Enum(enum_type) = ty.underlying() else {
            return None;
        };
        let raw = match constant.as_constant()? {
            Value::Int32(n) => i64::from(*n),
            Value::Int64(n) => *n,
            _ => return None,
        };
        let value = EnumValue::new(enum_type, raw);
        Some((operand.clone(), Expr::typed_constant(value, ty.clone())))
    }
    lift(left, right).or_else(|| lift(right, left).map(|(e, c)| (c, e)))
}
