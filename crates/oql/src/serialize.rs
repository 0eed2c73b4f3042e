//! Typed expression → query text

use std::sync::Arc;

use thiserror::Error;

use crate::eval::{EvalError, convert_value};
use crate::expr::{BinaryOp, Expr, Lambda, Parameter, lift_enum_comparison};
use crate::functions::FunctionTable;
use crate::types::Type;
use crate::value::{Value, offset_literal_text};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("Cannot express {0} in a query")]
    Unsupported(String),

    #[error("No query function is mapped to {0}")]
    UnmappedMember(String),

    #[error("Constant {0} has no literal form")]
    UnsupportedConstant(String),

    #[error("Failed to fold constant: {0}")]
    Fold(#[from] EvalError),
}

type Result<T> = std::result::Result<T, BuildError>;

const CONCAT: &str = "String.Concat";
const CONTAINS: &str = "Enumerable.Contains";

/// Simplifies an expression before it is rendered: evaluates calls and
/// conversions over constants, reads captured closure values and turns string
/// `+` into `concat`
pub struct PreBuildFolder<'a> {
    functions: &'a FunctionTable,
}

impl<'a> PreBuildFolder<'a> {
    pub fn new(functions: &'a FunctionTable) -> Self {
        PreBuildFolder { functions }
    }

    pub fn fold_lambda(&self, lambda: &Lambda) -> Result<Lambda> {
        Ok(Lambda::new(
            lambda.parameters.clone(),
            self.fold(lambda.body.clone())?,
        ))
    }

    pub fn fold(&self, expr: Expr) -> Result<Expr> {
        Ok(match expr {
            Expr::Constant { .. } | Expr::Parameter(_) => expr,
            Expr::Property { instance, property } => {
                let instance = self.fold(*instance)?;
                let captured = match instance.as_constant() {
                    Some(Value::Object(entity)) if entity.ty.is_closure() => {
                        Some(entity.get(&property.name).clone())
                    }
                    _ => None,
                };
                match captured {
                    Some(value) => Expr::typed_constant(value, property.ty.clone()),
                    None => Expr::Property {
                        instance: Box::new(instance),
                        property,
                    },
                }
            }
            Expr::DictionaryGet { instance, key, ty } => Expr::DictionaryGet {
                instance: Box::new(self.fold(*instance)?),
                key: Box::new(self.fold(*key)?),
                ty,
            },
            Expr::Binary {
                op,
                left,
                right,
                ty,
            } => {
                let left = self.fold(*left)?;
                let right = self.fold(*right)?;
                let concat = self.functions.member(CONCAT);
                match concat {
                    Some(member) if op == BinaryOp::Add && ty == Type::String => {
                        let call = Expr::Call {
                            member: member.clone(),
                            args: vec![left, right],
                            ty: Type::String,
                        };
                        self.fold_call(call)?
                    }
                    _ => Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                        ty,
                    },
                }
            }
            Expr::Not(inner) => Expr::Not(Box::new(self.fold(*inner)?)),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ty,
            } => Expr::Conditional {
                test: Box::new(self.fold(*test)?),
                if_true: Box::new(self.fold(*if_true)?),
                if_false: Box::new(self.fold(*if_false)?),
                ty,
            },
            Expr::Call { member, args, ty } => {
                let args = args
                    .into_iter()
                    .map(|a| self.fold(a))
                    .collect::<Result<Vec<_>>>()?;
                self.fold_call(Expr::Call { member, args, ty })?
            }
            Expr::Convert { operand, ty } => {
                let operand = self.fold(*operand)?;
                match operand {
                    Expr::Constant { value, ty: from } => {
                        Expr::typed_constant(convert_value(value, &from, &ty)?, ty)
                    }
                    operand => operand.convert(ty),
                }
            }
            Expr::TypeAs { operand, ty } => Expr::TypeAs {
                operand: Box::new(self.fold(*operand)?),
                ty,
            },
            Expr::TypeIs { operand, target } => self.fold(*operand)?.type_is(target),
            Expr::Lambda(lambda) => Expr::Lambda(Arc::new(self.fold_lambda(&lambda)?)),
            Expr::Quote(lambda) => Expr::Quote(Arc::new(self.fold_lambda(&lambda)?)),
            Expr::NewArray { element, items } => {
                let items = items
                    .into_iter()
                    .map(|i| self.fold(i))
                    .collect::<Result<Vec<_>>>()?;
                if items.iter().all(Expr::is_constant) {
                    let values = items
                        .iter()
                        .filter_map(|i| i.as_constant().cloned())
                        .collect::<Vec<_>>();
                    Expr::typed_constant(Value::Array(values), Type::array_of(element))
                } else {
                    Expr::NewArray { element, items }
                }
            }
        })
    }

    /// Evaluate a call whose arguments are all constants
    fn fold_call(&self, call: Expr) -> Result<Expr> {
        let Expr::Call { member, args, ty } = call else {
            return Ok(call);
        };
        let values: Option<Vec<Value>> = args.iter().map(|a| a.as_constant().cloned()).collect();
        match values {
            Some(values) => Ok(Expr::typed_constant(member.invoke(&values)?, ty)),
            None => Ok(Expr::Call { member, args, ty }),
        }
    }
}

/// Renders lambdas as query text that the converter reads back into an
/// equivalent expression
pub struct QueryPredicateBuilder<'a> {
    functions: &'a FunctionTable,
}

impl<'a> QueryPredicateBuilder<'a> {
    pub fn new(functions: &'a FunctionTable) -> Self {
        QueryPredicateBuilder { functions }
    }

    pub fn build(&self, lambda: &Lambda) -> Result<String> {
        let folded = PreBuildFolder::new(self.functions).fold_lambda(lambda)?;
        let Some(root) = folded.parameters.first() else {
            return Err(BuildError::Unsupported("a lambda without parameters".into()));
        };
        let text = Renderer {
            functions: self.functions,
            root,
        }
        .render(&folded.body)?;
        Ok(strip_outer_parens(&text).to_string())
    }
}

struct Renderer<'a> {
    functions: &'a FunctionTable,
    root: &'a Parameter,
}

impl Renderer<'_> {
    fn is_root(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Parameter(p) if p == self.root)
    }

    fn render(&self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Constant { value, .. } => literal(value),
            Expr::Parameter(p) if p == self.root => Ok("this".to_string()),
            Expr::Parameter(p) => Ok(p.name().to_string()),
            Expr::Property { instance, property } => {
                if self.is_root(instance) {
                    Ok(property.query_name())
                } else {
                    Ok(format!("{}.{}", self.render(instance)?, property.query_name()))
                }
            }
            Expr::DictionaryGet { instance, key, .. } => {
                Ok(format!("{}[{}]", self.render(instance)?, self.render(key)?))
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let lifted = match op {
                    BinaryOp::Eq | BinaryOp::Ne => lift_enum_comparison(left, right),
                    _ => None,
                };
                let (l, r) = match &lifted {
                    Some((l, r)) => (l, r),
                    None => (left.as_ref(), right.as_ref()),
                };
                Ok(format!(
                    "({} {} {})",
                    self.render(l)?,
                    op.keyword(),
                    self.render(r)?
                ))
            }
            Expr::Not(inner) => Ok(format!("not {}", self.render(inner)?)),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => Ok(format!(
                "iif({},{},{})",
                self.render(test)?,
                self.render(if_true)?,
                self.render(if_false)?
            )),
            Expr::Call { member, args, .. } => {
                if member.id() == CONTAINS
                    && let [haystack, needle] = args.as_slice()
                    && (matches!(haystack, Expr::NewArray { .. })
                        || matches!(haystack.as_constant(), Some(Value::Array(_))))
                {
                    return Ok(format!(
                        "({} in {})",
                        self.render(needle)?,
                        self.render(haystack)?
                    ));
                }
                let mapping = self
                    .functions
                    .mapping_for(member)
                    .ok_or_else(|| BuildError::UnmappedMember(member.id().to_string()))?;
                let rendered = args
                    .iter()
                    .map(|a| self.render(a))
                    .collect::<Result<Vec<_>>>()?;
                Ok(mapping.format(mapping.style(), &rendered))
            }
            Expr::Convert { operand, ty } => {
                let from = operand.ty();
                if from.is_enum() || (ty.is_nullable() && ty.underlying() == &from) {
                    self.render(operand)
                } else if self.is_root(operand) {
                    Ok(format!("cast(t'{}')", cast_target(ty)))
                } else {
                    Ok(format!("cast({},t'{}')", self.render(operand)?, cast_target(ty)))
                }
            }
            Expr::TypeAs { operand, ty } => Ok(format!(
                "({} as t'{}')",
                self.render(operand)?,
                ty.type_name()
            )),
            Expr::TypeIs { operand, target } => {
                if self.is_root(operand) {
                    Ok(format!("isof(t'{}')", target.type_name()))
                } else {
                    Ok(format!(
                        "isof({},t'{}')",
                        self.render(operand)?,
                        target.type_name()
                    ))
                }
            }
            Expr::Lambda(lambda) | Expr::Quote(lambda) => {
                let [parameter] = lambda.parameters.as_slice() else {
                    return Err(BuildError::Unsupported(format!(
                        "a lambda with {} parameters",
                        lambda.parameters.len()
                    )));
                };
                Ok(format!("{}:{}", parameter.name(), self.render(&lambda.body)?))
            }
            Expr::NewArray { items, .. } => {
                let rendered = items
                    .iter()
                    .map(|i| self.render(i))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("[{}]", rendered.join(",")))
            }
        }
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Literal text of a constant
/// Cast targets keep their nullability, `Int32?` rather than `Int32`
fn cast_target(ty: &Type) -> String {
    match ty {
        Type::Nullable(inner) => format!("{}?", inner.type_name()),
        other => other.type_name(),
    }
}

pub fn literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Char(c) => quote(&c.to_string()),
        Value::String(s) => quote(s),
        Value::Int32(n) => n.to_string(),
        Value::Int64(n) => format!("{n}L"),
        Value::Float(n) if n.is_finite() => format!("{n}f"),
        Value::Double(n) if n.is_finite() => {
            let text = n.to_string();
            if text.contains('.') {
                text
            } else {
                format!("{text}.0")
            }
        }
        Value::Decimal(d) => format!("{d}m"),
        Value::Guid(g) => format!("guid'{g}'"),
        Value::DateTime(d) => format!("datetime'{}'", d.to_literal_text()),
        Value::DateTimeOffset(d) => format!("datetime'{}'", offset_literal_text(d)),
        Value::Enum(e) => match e.name() {
            Some(name) => quote(name),
            None => return Err(BuildError::UnsupportedConstant(value.to_string())),
        },
        Value::Array(items) => {
            let rendered = items.iter().map(literal).collect::<Result<Vec<_>>>()?;
            format!("[{}]", rendered.join(","))
        }
        Value::Type(t) => format!("t'{}'", t.type_name()),
        other => return Err(BuildError::UnsupportedConstant(other.kind_name().to_string())),
    })
}

/// Remove one pair of parentheses enclosing the whole text
fn strip_outer_parens(text: &str) -> &str {
    let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) else {
        return text;
    };
    let mut depth = 0usize;
    let mut in_string = false;
    for c in inner.chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return text,
            },
            _ => {}
        }
    }
    if depth == 0 && !in_string { inner } else { text }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::types::{EnumType, ResourceType};
    use crate::value::Entity;

    fn build(lambda: &Lambda) -> String {
        QueryPredicateBuilder::new(&FunctionTable::builtin())
            .build(lambda)
            .unwrap()
    }

    #[test]
    fn literal_table() {
        assert_eq!(literal(&Value::from("it's")).unwrap(), "'it''s'");
        assert_eq!(literal(&Value::Int64(5)).unwrap(), "5L");
        assert_eq!(literal(&Value::Double(5.0)).unwrap(), "5.0");
        assert_eq!(literal(&Value::Double(0.1)).unwrap(), "0.1");
        assert_eq!(literal(&Value::Float(1.5)).unwrap(), "1.5f");
        assert_eq!(literal(&Value::Decimal(Decimal::new(125, 2))).unwrap(), "1.25m");
        assert!(literal(&Value::Double(f64::NAN)).is_err());
    }

    #[test]
    fn strips_only_enclosing_parens() {
        assert_eq!(strip_outer_parens("(a eq b)"), "a eq b");
        assert_eq!(strip_outer_parens("(a) and (b)"), "(a) and (b)");
        assert_eq!(strip_outer_parens("(a eq ')(')"), "a eq ')('");
    }

    #[test]
    fn renders_properties_and_enum_comparisons() {
        let kind = EnumType::sequential("Kind", &["Cat", "Dog"]);
        let pet = ResourceType::builder("Pet")
            .property("Name", Type::String)
            .property("Kind", Type::Enum(kind))
            .build();
        let this = Parameter::new("p", Type::Resource(pet));
        let body = this
            .expr()
            .property("Kind")
            .unwrap()
            .convert(Type::Int32)
            .eq(Expr::constant(1))
            .and(this.expr().property("Name").unwrap().ne(Expr::null(Type::String)));
        let text = build(&Lambda::new(vec![this], body));
        assert_eq!(text, "(kind eq 'Dog') and (name ne null)");
    }

    #[test]
    fn folds_closure_values_and_concat() {
        let captured = ResourceType::builder("<>Closure")
            .closure()
            .property("Prefix", Type::String)
            .build();
        let closure = Entity::new(&captured).with("Prefix", "ab").into_value();
        let pet = ResourceType::builder("Pet")
            .property("Name", Type::String)
            .build();
        let this = Parameter::new("p", Type::Resource(pet));
        let prefix = Expr::typed_constant(closure, Type::Resource(captured))
            .property("Prefix")
            .unwrap();
        let body = this
            .expr()
            .property("Name")
            .unwrap()
            .eq(prefix.add(Expr::constant("c")));
        assert_eq!(build(&Lambda::new(vec![this], body)), "name eq 'abc'");
    }

    #[test]
    fn casts_of_this_and_others() {
        let pet = ResourceType::builder("Pet").property("Age", Type::Int32).build();
        let dog = ResourceType::builder("Dog").base(&pet).build();
        let this = Parameter::new("p", Type::Resource(pet));
        let body = this
            .expr()
            .type_is(Type::Resource(dog.clone()))
            .and(
                this.expr()
                    .property("Age")
                    .unwrap()
                    .convert(Type::Int64)
                    .gt(Expr::constant(3i64)),
            );
        assert_eq!(
            build(&Lambda::new(vec![this], body)),
            "isof(t'Dog') and (cast(age,t'Int64') gt 3L)"
        );
    }

    #[test]
    fn nullable_cast_targets_keep_their_marker() {
        let pet = ResourceType::builder("Pet").property("Extra", Type::Object).build();
        let this = Parameter::new("p", Type::Resource(pet));
        let target = Type::nullable_of(Type::Int32);
        let body = this
            .expr()
            .property("Extra")
            .unwrap()
            .convert(target.clone())
            .eq(Expr::null(target));
        assert_eq!(
            build(&Lambda::new(vec![this], body)),
            "cast(extra,t'Int32?') eq null"
        );
    }

    #[test]
    fn unmapped_member_is_an_error() {
        let member = Arc::new(crate::functions::Member::method(
            "Custom.Thing",
            vec![crate::functions::TypeSig::exact(Type::Int32)],
            crate::functions::TypeSig::exact(Type::Bool),
            |_| Ok(Value::Bool(true)),
        ));
        let x = Parameter::new("x", Type::Int32);
        let body = Expr::call(&member, vec![x.expr()]).unwrap();
        let err = QueryPredicateBuilder::new(&FunctionTable::builtin())
            .build(&Lambda::new(vec![x], body))
            .unwrap_err();
        assert_eq!(err, BuildError::UnmappedMember("Custom.Thing".into()));
    }
}
