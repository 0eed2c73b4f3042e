//! Interpreter for typed expressions over in-memory values

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use thiserror::Error;

use crate::expr::{BinaryOp, Expr, Lambda, Parameter};
use crate::types::Type;
use crate::value::{EnumValue, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Null reference: {0}")]
    NullReference(String),

    #[error("Invalid cast from {from} to {to}")]
    InvalidCast { from: String, to: String },

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Arithmetic overflow in {0}")]
    Overflow(String),

    #[error("Unbound parameter '{0}'")]
    UnboundParameter(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Argument error: {0}")]
    ArgError(String),
}

impl EvalError {
    pub fn type_error(expected: impl Into<String>, got: &Value) -> Self {
        EvalError::TypeError {
            expected: expected.into(),
            got: got.kind_name().to_string(),
        }
    }
}

type Result<T> = std::result::Result<T, EvalError>;

/// Parameter bindings visible to an expression
#[derive(Debug, Clone, Default)]
pub struct Env {
    bindings: Vec<(u64, Value)>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, parameter: &Parameter, value: Value) -> Env {
        let mut bindings = self.bindings.clone();
        bindings.push((parameter.id(), value));
        Env { bindings }
    }

    fn lookup(&self, parameter: &Parameter) -> Option<&Value> {
        self.bindings
            .iter()
            .rev()
            .find(|(id, _)| *id == parameter.id())
            .map(|(_, v)| v)
    }
}

/// A lambda together with the environment it was created in
pub struct Closure {
    lambda: Arc<Lambda>,
    env: Env,
}

impl Closure {
    pub fn new(lambda: Arc<Lambda>, env: Env) -> Self {
        Closure { lambda, env }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.lambda.invoke_in(&self.env, args)
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.lambda.body)
    }
}

impl Lambda {
    /// Invoke with the given arguments bound to the parameters
    pub fn invoke(&self, args: &[Value]) -> Result<Value> {
        self.invoke_in(&Env::default(), args)
    }

    fn invoke_in(&self, env: &Env, args: &[Value]) -> Result<Value> {
        if args.len() != self.parameters.len() {
            return Err(EvalError::ArgError(format!(
                "lambda expects {} arguments, got {}",
                self.parameters.len(),
                args.len()
            )));
        }
        let mut scope = env.clone();
        for (param, arg) in self.parameters.iter().zip(args) {
            scope = scope.bind(param, arg.clone());
        }
        self.body.evaluate(&scope)
    }

    /// Evaluate as a predicate; null counts as false
    pub fn test(&self, args: &[Value]) -> Result<bool> {
        match self.invoke(args)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(EvalError::type_error("Boolean", &other)),
        }
    }
}

impl Expr {
    pub fn evaluate(&self, env: &Env) -> Result<Value> {
        match self {
            Expr::Constant { value, .. } => Ok(value.clone()),
            Expr::Parameter(p) => env
                .lookup(p)
                .cloned()
                .ok_or_else(|| EvalError::UnboundParameter(p.name().to_string())),
            Expr::Property { instance, property } => match instance.evaluate(env)? {
                Value::Object(entity) => Ok(entity.get(&property.name).clone()),
                Value::Null => Err(EvalError::NullReference(format!(
                    "reading property '{}'",
                    property.name
                ))),
                other => Err(EvalError::type_error("resource", &other)),
            },
            Expr::DictionaryGet { instance, key, .. } => {
                let key = key.evaluate(env)?;
                match instance.evaluate(env)? {
                    Value::Map(map) => {
                        let Some(key) = key.as_str() else {
                            return Err(EvalError::type_error("String", &key));
                        };
                        Ok(map.get(key).cloned().unwrap_or(Value::Null))
                    }
                    Value::Null => Err(EvalError::NullReference(format!(
                        "reading dictionary key '{key}'"
                    ))),
                    other => Err(EvalError::type_error("dictionary", &other)),
                }
            }
            Expr::Binary {
                op, left, right, ..
            } => eval_binary(*op, left, right, env),
            Expr::Not(inner) => match inner.evaluate(env)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Null => Ok(Value::Null),
                other => Err(EvalError::type_error("Boolean", &other)),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => match test.evaluate(env)? {
                Value::Bool(true) => if_true.evaluate(env),
                Value::Bool(false) | Value::Null => if_false.evaluate(env),
                other => Err(EvalError::type_error("Boolean", &other)),
            },
            Expr::Call { member, args, .. } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(env))
                    .collect::<Result<Vec<_>>>()?;
                member.invoke(&values)
            }
            Expr::Convert { operand, ty } => convert_value(operand.evaluate(env)?, &operand.ty(), ty),
            Expr::TypeAs { operand, ty } => {
                let value = operand.evaluate(env)?;
                Ok(if value.is_instance_of(ty) { value } else { Value::Null })
            }
            Expr::TypeIs { operand, target } => {
                Ok(Value::Bool(operand.evaluate(env)?.is_instance_of(target)))
            }
            Expr::Lambda(lambda) | Expr::Quote(lambda) => {
                Ok(Value::Lambda(Arc::new(Closure::new(lambda.clone(), env.clone()))))
            }
            Expr::NewArray { items, .. } => Ok(Value::Array(
                items
                    .iter()
                    .map(|i| i.evaluate(env))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }
}

fn as_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(EvalError::type_error("Boolean", other)),
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, env: &Env) -> Result<Value> {
    match op {
        BinaryOp::And => {
            if !as_bool(&left.evaluate(env)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(as_bool(&right.evaluate(env)?)?))
        }
        BinaryOp::Or => {
            if as_bool(&left.evaluate(env)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(as_bool(&right.evaluate(env)?)?))
        }
        _ => {
            let l = left.evaluate(env)?;
            let r = right.evaluate(env)?;
            apply_binary(op, &l, &r)
        }
    }
}

/// Apply a non short-circuit operator with lifted null semantics
pub fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l == r)),
        BinaryOp::Ne => Ok(Value::Bool(l != r)),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Bool(false));
            }
            let ordering = l.compare(r).ok_or_else(|| EvalError::TypeError {
                expected: l.kind_name().to_string(),
                got: r.kind_name().to_string(),
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::Ge => ordering.is_ge(),
                BinaryOp::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            }))
        }
        BinaryOp::And => Ok(Value::Bool(as_bool(l)? && as_bool(r)?)),
        BinaryOp::Or => Ok(Value::Bool(as_bool(l)? || as_bool(r)?)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            arithmetic(op, l, r)
        }
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    match (l, r) {
        (Value::Int32(a), Value::Int32(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Int32(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            }))
        }
        (Value::Int64(a), Value::Int64(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Value::Int64(match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            }))
        }
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(float_op(op, *a, *b))),
        (Value::Float(a), Value::Float(b)) => {
            Ok(Value::Float(float_op(op, f64::from(*a), f64::from(*b)) as f32))
        }
        (Value::Decimal(a), Value::Decimal(b)) => {
            let (a, b) = (*a, *b);
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b.is_zero() {
                return Err(EvalError::DivisionByZero);
            }
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Decimal)
                .ok_or_else(|| EvalError::Overflow(format!("decimal {}", op.keyword())))
        }
        (Value::String(a), Value::String(b)) if op == BinaryOp::Add => {
            Ok(Value::String(format!("{a}{b}")))
        }
        _ => Err(EvalError::TypeError {
            expected: format!("matching numeric operands for '{}'", op.keyword()),
            got: format!("{} and {}", l.kind_name(), r.kind_name()),
        }),
    }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }
}

/// Runtime conversion for `cast` and implicit widening
pub fn convert_value(value: Value, from: &Type, to: &Type) -> Result<Value> {
    if value.is_null() {
        if to.can_be_null() {
            return Ok(Value::Null);
        }
        return Err(EvalError::InvalidOperation(format!(
            "cannot convert null to non-nullable {to}"
        )));
    }
    if from == to || matches!(to, Type::Object) {
        return Ok(value);
    }
    let target = to.underlying();
    let invalid = |value: &Value| EvalError::InvalidCast {
        from: value.kind_name().to_string(),
        to: to.to_string(),
    };

    match target {
        Type::Resource(_) | Type::String | Type::Bool | Type::Char | Type::Guid
        | Type::DateTime | Type::DateTimeOffset | Type::Array(_) | Type::Enumerable(_)
        | Type::Dictionary(..) => {
            if value.is_instance_of(target) {
                Ok(value)
            } else {
                Err(invalid(&value))
            }
        }
        Type::Enum(e) => match value.as_i64() {
            Some(n) => Ok(Value::Enum(EnumValue::new(e, n))),
            None => Err(invalid(&value)),
        },
        Type::Int32 => {
            let n = numeric_as_i128(&value).ok_or_else(|| invalid(&value))?;
            i32::try_from(n)
                .map(Value::Int32)
                .map_err(|_| EvalError::Overflow(format!("conversion to {to}")))
        }
        Type::Int64 => {
            let n = numeric_as_i128(&value).ok_or_else(|| invalid(&value))?;
            i64::try_from(n)
                .map(Value::Int64)
                .map_err(|_| EvalError::Overflow(format!("conversion to {to}")))
        }
        Type::Double => numeric_as_f64(&value)
            .map(Value::Double)
            .ok_or_else(|| invalid(&value)),
        Type::Float => numeric_as_f64(&value)
            .map(|f| Value::Float(f as f32))
            .ok_or_else(|| invalid(&value)),
        Type::Decimal => match &value {
            Value::Decimal(d) => Ok(Value::Decimal(*d)),
            Value::Int32(_) | Value::Int64(_) | Value::Enum(_) => value
                .as_i64()
                .map(|n| Value::Decimal(Decimal::from(n)))
                .ok_or_else(|| invalid(&value)),
            Value::Double(_) | Value::Float(_) => numeric_as_f64(&value)
                .and_then(Decimal::from_f64)
                .map(Value::Decimal)
                .ok_or_else(|| EvalError::Overflow(format!("conversion to {to}"))),
            other => Err(invalid(other)),
        },
        _ => Err(invalid(&value)),
    }
}

fn numeric_as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::Int32(_) | Value::Int64(_) | Value::Enum(_) => value.as_i64().map(i128::from),
        Value::Char(c) => Some(i128::from(u32::from(*c))),
        // Truncates toward zero like an explicit cast
        Value::Double(d) if d.is_finite() => Some(d.trunc() as i128),
        Value::Float(f) if f.is_finite() => Some(f.trunc() as i128),
        Value::Decimal(d) => d.trunc().to_i128(),
        _ => None,
    }
}

fn numeric_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int32(n) => Some(f64::from(*n)),
        Value::Int64(n) => Some(*n as f64),
        Value::Double(d) => Some(*d),
        Value::Float(f) => Some(f64::from(*f)),
        Value::Decimal(d) => d.to_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceType;
    use crate::value::Entity;

    fn pet() -> Arc<ResourceType> {
        ResourceType::builder("Pet")
            .property("Name", Type::String)
            .property("Age", Type::Int32)
            .property("Weight", Type::nullable_of(Type::Double))
            .build()
    }

    #[test]
    fn predicate_over_entity() {
        let pet = pet();
        let this = Parameter::new("this", Type::Resource(pet.clone()));
        let body = this
            .expr()
            .property("age")
            .unwrap()
            .gt(Expr::constant(2))
            .and(this.expr().property("name").unwrap().ne(Expr::null(Type::String)));
        let lambda = Lambda::new(vec![this], body);

        let rex = Entity::new(&pet).with("Name", "Rex").with("Age", 5).into_value();
        let pup = Entity::new(&pet).with("Name", "Pup").with("Age", 1).into_value();
        assert!(lambda.test(&[rex]).unwrap());
        assert!(!lambda.test(&[pup]).unwrap());
    }

    #[test]
    fn lifted_nulls() {
        assert_eq!(apply_binary(BinaryOp::Add, &Value::Null, &Value::Int32(1)), Ok(Value::Null));
        assert_eq!(
            apply_binary(BinaryOp::Lt, &Value::Null, &Value::Int32(1)),
            Ok(Value::Bool(false))
        );
        assert_eq!(apply_binary(BinaryOp::Eq, &Value::Null, &Value::Null), Ok(Value::Bool(true)));
    }

    #[test]
    fn integer_division_by_zero_fails() {
        assert_eq!(
            apply_binary(BinaryOp::Div, &Value::Int32(1), &Value::Int32(0)),
            Err(EvalError::DivisionByZero)
        );
        let inf = apply_binary(BinaryOp::Div, &Value::Double(1.0), &Value::Double(0.0)).unwrap();
        assert_eq!(inf, Value::Double(f64::INFINITY));
    }

    #[test]
    fn short_circuit_skips_right_side() {
        let pet = pet();
        let this = Parameter::new("this", Type::Resource(pet));
        let failing = Expr::null(Type::Resource(self::pet()))
            .property("age")
            .unwrap()
            .gt(Expr::constant(1));
        let body = Expr::constant(false).and(failing.clone());
        let lambda = Lambda::new(vec![this.clone()], body);
        assert_eq!(lambda.invoke(&[Value::Null]), Ok(Value::Bool(false)));

        let lambda = Lambda::new(vec![this], Expr::constant(true).and(failing));
        assert!(matches!(lambda.invoke(&[Value::Null]), Err(EvalError::NullReference(_))));
    }

    #[test]
    fn casts() {
        let animal = ResourceType::builder("Animal").build();
        let dog = ResourceType::builder("Dog").base(&animal).build();
        let a = Entity::new(&animal).into_value();
        let err = convert_value(a.clone(), &Type::Resource(animal.clone()), &Type::Resource(dog.clone()));
        assert!(matches!(err, Err(EvalError::InvalidCast { .. })));
        let d = Entity::new(&dog).into_value();
        assert_eq!(
            convert_value(d.clone(), &Type::Resource(animal), &Type::Resource(dog)),
            Ok(d)
        );
        assert_eq!(
            convert_value(Value::Double(2.9), &Type::Double, &Type::Int32),
            Ok(Value::Int32(2))
        );
        assert!(convert_value(Value::Null, &Type::Object, &Type::Int32).is_err());
    }

    #[test]
    fn closures_capture_outer_parameters() {
        let outer = Parameter::new("x", Type::Int32);
        let inner = Parameter::new("y", Type::Int32);
        let inner_lambda = Expr::lambda(vec![inner.clone()], inner.expr().add(outer.expr()));
        let make = Lambda::new(vec![outer], inner_lambda);
        let closure = make.invoke(&[Value::Int32(10)]).unwrap();
        let closure = closure.as_closure().unwrap();
        assert_eq!(closure.call(&[Value::Int32(5)]), Ok(Value::Int32(15)));
    }
}
