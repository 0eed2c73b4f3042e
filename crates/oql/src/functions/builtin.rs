//! Built-in query functions

use std::sync::Arc;

use chrono::{Datelike, Timelike};
use rust_decimal::Decimal;

use super::{CallStyle, FunctionTable, FunctionTableError, Member, TypeSig};
use crate::eval::{Closure, EvalError};
use crate::types::Type;
use crate::value::Value;

type Result<T> = std::result::Result<T, EvalError>;
type Registration = std::result::Result<(), FunctionTableError>;

pub(super) fn register_all(table: &mut FunctionTable) -> Registration {
    register_string_functions(table)?;
    register_date_functions(table)?;
    register_math_functions(table)?;
    register_collection_functions(table)
}

fn add(table: &mut FunctionTable, format: &str, member: Member, style: CallStyle) -> Registration {
    table.add(format, member, style).map(drop)
}

fn exact(ty: Type) -> TypeSig {
    TypeSig::exact(ty)
}

// ============ Argument helpers ============

fn receiver<'a>(args: &'a [Value], member: &str) -> Result<&'a Value> {
    match args.first() {
        Some(Value::Null) | None => Err(EvalError::NullReference(format!("calling {member}"))),
        Some(value) => Ok(value),
    }
}

fn receiver_str<'a>(args: &'a [Value], member: &str) -> Result<&'a str> {
    let value = receiver(args, member)?;
    value
        .as_str()
        .ok_or_else(|| EvalError::type_error("String", value))
}

fn str_arg<'a>(args: &'a [Value], index: usize, member: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Null) | None => Err(EvalError::ArgError(format!(
            "argument {index} of {member} is null"
        ))),
        Some(other) => Err(EvalError::type_error("String", other)),
    }
}

fn int_arg(args: &[Value], index: usize, member: &str) -> Result<usize> {
    match args.get(index) {
        Some(Value::Int32(n)) => usize::try_from(*n).map_err(|_| {
            EvalError::ArgError(format!("argument {index} of {member} is out of range"))
        }),
        Some(other) => Err(EvalError::type_error("Int32", other)),
        None => Err(EvalError::ArgError(format!("missing argument {index} of {member}"))),
    }
}

fn source<'a>(args: &'a [Value], member: &str) -> Result<&'a [Value]> {
    match args.first() {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(EvalError::ArgError(format!(
            "source sequence of {member} is null"
        ))),
        Some(other) => Err(EvalError::type_error("sequence", other)),
    }
}

fn closure_arg<'a>(args: &'a [Value], index: usize) -> Result<&'a Arc<Closure>> {
    match args.get(index) {
        Some(Value::Lambda(c)) => Ok(c),
        Some(other) => Err(EvalError::type_error("lambda", other)),
        None => Err(EvalError::ArgError(format!("missing lambda argument {index}"))),
    }
}

fn matches(predicate: &Closure, item: &Value) -> Result<bool> {
    match predicate.call(std::slice::from_ref(item))? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(EvalError::type_error("Boolean", &other)),
    }
}

fn no_elements() -> EvalError {
    EvalError::InvalidOperation("Sequence contains no elements".into())
}

fn char_count(s: &str) -> i32 {
    i32::try_from(s.chars().count()).unwrap_or(i32::MAX)
}

// ============ Strings ============

fn register_string_functions(table: &mut FunctionTable) -> Registration {
    let string = || exact(Type::String);

    add(
        table,
        "length({0})",
        Member::property("String.Length", Type::String, Type::Int32, |args| {
            Ok(Value::Int32(char_count(receiver_str(args, "length")?)))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "startswith({0},{1})",
        Member::method("String.StartsWith", vec![string(), string()], exact(Type::Bool), |args| {
            let s = receiver_str(args, "startswith")?;
            Ok(Value::Bool(s.starts_with(str_arg(args, 1, "startswith")?)))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "endswith({0},{1})",
        Member::method("String.EndsWith", vec![string(), string()], exact(Type::Bool), |args| {
            let s = receiver_str(args, "endswith")?;
            Ok(Value::Bool(s.ends_with(str_arg(args, 1, "endswith")?)))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "substringof({1},{0})",
        Member::method("String.Contains", vec![string(), string()], exact(Type::Bool), |args| {
            let s = receiver_str(args, "substringof")?;
            Ok(Value::Bool(s.contains(str_arg(args, 1, "substringof")?)))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "indexof({0},{1})",
        Member::method("String.IndexOf", vec![string(), string()], exact(Type::Int32), |args| {
            let s = receiver_str(args, "indexof")?;
            let needle = str_arg(args, 1, "indexof")?;
            let index = s.find(needle).map_or(-1, |byte| char_count(&s[..byte]));
            Ok(Value::Int32(index))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "replace({0},{1},{2})",
        Member::method(
            "String.Replace",
            vec![string(), string(), string()],
            string(),
            |args| {
                let s = receiver_str(args, "replace")?;
                let from = str_arg(args, 1, "replace")?;
                if from.is_empty() {
                    return Err(EvalError::ArgError("replace: old value is empty".into()));
                }
                Ok(Value::String(s.replace(from, str_arg(args, 2, "replace")?)))
            },
        ),
        CallStyle::Static,
    )?;
    add(
        table,
        "substring({0},{1})",
        Member::method(
            "String.Substring",
            vec![string(), exact(Type::Int32)],
            string(),
            |args| {
                let s = receiver_str(args, "substring")?;
                let start = int_arg(args, 1, "substring")?;
                if start > s.chars().count() {
                    return Err(EvalError::ArgError("substring: start is past the end".into()));
                }
                Ok(Value::String(s.chars().skip(start).collect()))
            },
        ),
        CallStyle::Static,
    )?;
    add(
        table,
        "substring({0},{1},{2})",
        Member::method(
            "String.Substring(Int32,Int32)",
            vec![string(), exact(Type::Int32), exact(Type::Int32)],
            string(),
            |args| {
                let s = receiver_str(args, "substring")?;
                let start = int_arg(args, 1, "substring")?;
                let length = int_arg(args, 2, "substring")?;
                if start + length > s.chars().count() {
                    return Err(EvalError::ArgError("substring: range is past the end".into()));
                }
                Ok(Value::String(s.chars().skip(start).take(length).collect()))
            },
        ),
        CallStyle::Static,
    )?;
    add(
        table,
        "tolower({0})",
        Member::method("String.ToLower", vec![string()], string(), |args| {
            Ok(Value::String(receiver_str(args, "tolower")?.to_lowercase()))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "toupper({0})",
        Member::method("String.ToUpper", vec![string()], string(), |args| {
            Ok(Value::String(receiver_str(args, "toupper")?.to_uppercase()))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "trim({0})",
        Member::method("String.Trim", vec![string()], string(), |args| {
            Ok(Value::String(receiver_str(args, "trim")?.trim().to_string()))
        }),
        CallStyle::Static,
    )?;
    add(
        table,
        "concat({0},{1})",
        Member::method("String.Concat", vec![string(), string()], string(), |args| {
            // Null concatenates as empty
            let part = |i: usize| args.get(i).and_then(Value::as_str).unwrap_or("");
            Ok(Value::String(format!("{}{}", part(0), part(1))))
        })
        .static_member(),
        CallStyle::Static,
    )
}

// ============ Dates ============

fn register_date_functions(table: &mut FunctionTable) -> Registration {
    type Part = fn(&Value) -> Option<i32>;
    let parts: [(&str, &str, Part, Part); 6] = [
        (
            "year",
            "Year",
            |v| date_time(v).map(|d| d.year()),
            |v| date_time_offset(v).map(|d| d.year()),
        ),
        (
            "month",
            "Month",
            |v| date_time(v).map(|d| d.month() as i32),
            |v| date_time_offset(v).map(|d| d.month() as i32),
        ),
        (
            "day",
            "Day",
            |v| date_time(v).map(|d| d.day() as i32),
            |v| date_time_offset(v).map(|d| d.day() as i32),
        ),
        (
            "hour",
            "Hour",
            |v| date_time(v).map(|d| d.hour() as i32),
            |v| date_time_offset(v).map(|d| d.hour() as i32),
        ),
        (
            "minute",
            "Minute",
            |v| date_time(v).map(|d| d.minute() as i32),
            |v| date_time_offset(v).map(|d| d.minute() as i32),
        ),
        (
            "second",
            "Second",
            |v| date_time(v).map(|d| d.second() as i32),
            |v| date_time_offset(v).map(|d| d.second() as i32),
        ),
    ];

    for (name, member, of_date_time, of_offset) in parts {
        let format = format!("{name}({{0}})");
        for (ty, extract) in [(Type::DateTime, of_date_time), (Type::DateTimeOffset, of_offset)] {
            let expected = ty.type_name();
            // Nullable receivers lift: null in, null out
            for lifted in [false, true] {
                let (receiver_ty, ret) = if lifted {
                    (Type::nullable_of(ty.clone()), Type::nullable_of(Type::Int32))
                } else {
                    (ty.clone(), Type::Int32)
                };
                let id = format!("{receiver_ty}.{member}");
                let expected = expected.clone();
                add(
                    table,
                    &format,
                    Member::property(id, receiver_ty, ret, move |args| {
                        if lifted && matches!(args.first(), Some(Value::Null)) {
                            return Ok(Value::Null);
                        }
                        let value = receiver(args, name)?;
                        extract(value)
                            .map(Value::Int32)
                            .ok_or_else(|| EvalError::type_error(expected.clone(), value))
                    }),
                    CallStyle::Static,
                )?;
            }
        }
    }
    Ok(())
}

fn date_time(value: &Value) -> Option<chrono::NaiveDateTime> {
    match value {
        Value::DateTime(d) => Some(d.naive),
        _ => None,
    }
}

fn date_time_offset(value: &Value) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    match value {
        Value::DateTimeOffset(d) => Some(*d),
        _ => None,
    }
}

// ============ Math ============

fn register_math_functions(table: &mut FunctionTable) -> Registration {
    type DoubleOp = fn(f64) -> f64;
    type DecimalOp = fn(Decimal) -> Decimal;
    let ops: [(&str, &str, DoubleOp, DecimalOp); 3] = [
        ("round", "Round", f64::round_ties_even, |d| d.round()),
        ("floor", "Floor", f64::floor, |d| d.floor()),
        ("ceiling", "Ceiling", f64::ceil, |d| d.ceil()),
    ];

    for (name, member, on_double, on_decimal) in ops {
        let format = format!("{name}({{0}})");
        add(
            table,
            &format,
            Member::method(
                format!("Math.{member}(Double)"),
                vec![exact(Type::Double)],
                exact(Type::Double),
                move |args| match args.first() {
                    Some(Value::Double(d)) => Ok(Value::Double(on_double(*d))),
                    Some(other) => Err(EvalError::type_error("Double", other)),
                    None => Err(EvalError::ArgError(format!("{name} needs an argument"))),
                },
            )
            .static_member(),
            CallStyle::Static,
        )?;
        add(
            table,
            &format,
            Member::method(
                format!("Math.{member}(Decimal)"),
                vec![exact(Type::Decimal)],
                exact(Type::Decimal),
                move |args| match args.first() {
                    Some(Value::Decimal(d)) => Ok(Value::Decimal(on_decimal(*d))),
                    Some(other) => Err(EvalError::type_error("Decimal", other)),
                    None => Err(EvalError::ArgError(format!("{name} needs an argument"))),
                },
            )
            .static_member(),
            CallStyle::Static,
        )?;
    }
    Ok(())
}

// ============ Collections ============

fn register_collection_functions(table: &mut FunctionTable) -> Registration {
    let t = || TypeSig::param(0);
    let seq_t = || TypeSig::enumerable(TypeSig::param(0));
    let predicate = || TypeSig::function(vec![TypeSig::param(0)], exact(Type::Bool));
    let chained = CallStyle::Chained;

    add(
        table,
        "any({0})",
        Member::method("Enumerable.Any", vec![seq_t()], exact(Type::Bool), |args| {
            Ok(Value::Bool(!source(args, "any")?.is_empty()))
        })
        .generic(1),
        chained,
    )?;
    add(
        table,
        "any({0},{1})",
        Member::method(
            "Enumerable.Any(predicate)",
            vec![seq_t(), predicate()],
            exact(Type::Bool),
            |args| {
                let pred = closure_arg(args, 1)?;
                for item in source(args, "any")? {
                    if matches(pred, item)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            },
        )
        .generic(1),
        chained,
    )?;
    add(
        table,
        "all({0},{1})",
        Member::method(
            "Enumerable.All",
            vec![seq_t(), predicate()],
            exact(Type::Bool),
            |args| {
                let pred = closure_arg(args, 1)?;
                for item in source(args, "all")? {
                    if !matches(pred, item)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            },
        )
        .generic(1),
        chained,
    )?;
    add(
        table,
        "count({0})",
        Member::method("Enumerable.Count", vec![seq_t()], exact(Type::Int32), |args| {
            let items = source(args, "count")?;
            Ok(Value::Int32(i32::try_from(items.len()).unwrap_or(i32::MAX)))
        })
        .generic(1),
        chained,
    )?;
    add(
        table,
        "count({0},{1})",
        Member::method(
            "Enumerable.Count(predicate)",
            vec![seq_t(), predicate()],
            exact(Type::Int32),
            |args| {
                let pred = closure_arg(args, 1)?;
                let mut count = 0i32;
                for item in source(args, "count")? {
                    if matches(pred, item)? {
                        count = count
                            .checked_add(1)
                            .ok_or_else(|| EvalError::Overflow("count".into()))?;
                    }
                }
                Ok(Value::Int32(count))
            },
        )
        .generic(1),
        chained,
    )?;

    for ty in [Type::Int32, Type::Int64, Type::Double, Type::Decimal] {
        let name = ty.type_name();
        let zero = zero_of(&ty);
        add(
            table,
            "sum({0})",
            Member::method(
                format!("Enumerable.Sum({name})"),
                vec![exact(Type::enumerable_of(ty.clone()))],
                exact(ty.clone()),
                move |args| sum(source(args, "sum")?.iter().cloned(), zero.clone()),
            ),
            chained,
        )?;
    }
    for ty in [Type::Int32, Type::Int64, Type::Double, Type::Decimal] {
        let name = ty.type_name();
        let zero = zero_of(&ty);
        add(
            table,
            "sum({0},{1})",
            Member::method(
                format!("Enumerable.Sum(Func<T,{name}>)"),
                vec![seq_t(), TypeSig::function(vec![t()], exact(ty.clone()))],
                exact(ty.clone()),
                move |args| sum(project(args, "sum")?.into_iter(), zero.clone()),
            )
            .generic(1),
            chained,
        )?;
    }

    for ty in [Type::Double, Type::Decimal] {
        let name = ty.type_name();
        add(
            table,
            "average({0})",
            Member::method(
                format!("Enumerable.Average({name})"),
                vec![exact(Type::enumerable_of(ty.clone()))],
                exact(ty.clone()),
                |args| average(source(args, "average")?.to_vec()),
            ),
            chained,
        )?;
        add(
            table,
            "average({0},{1})",
            Member::method(
                format!("Enumerable.Average(Func<T,{name}>)"),
                vec![seq_t(), TypeSig::function(vec![t()], exact(ty.clone()))],
                exact(ty.clone()),
                |args| average(project(args, "average")?),
            )
            .generic(1),
            chained,
        )?;
    }

    for (name, member, pick_greater) in [("max", "Max", true), ("min", "Min", false)] {
        add(
            table,
            &format!("{name}({{0}})"),
            Member::method(format!("Enumerable.{member}"), vec![seq_t()], t(), move |args| {
                extreme(source(args, name)?.iter().cloned(), pick_greater)
            })
            .generic(1),
            chained,
        )?;
        add(
            table,
            &format!("{name}({{0}},{{1}})"),
            Member::method(
                format!("Enumerable.{member}(selector)"),
                vec![seq_t(), TypeSig::function(vec![t()], TypeSig::param(1))],
                TypeSig::param(1),
                move |args| extreme(project(args, name)?.into_iter(), pick_greater),
            )
            .generic(2),
            chained,
        )?;
    }

    for (name, member, or_default) in [
        ("first", "First", false),
        ("firstordefault", "FirstOrDefault", true),
    ] {
        add(
            table,
            &format!("{name}({{0}})"),
            Member::method(format!("Enumerable.{member}"), vec![seq_t()], t(), move |args| {
                match source(args, name)?.first() {
                    Some(item) => Ok(item.clone()),
                    None if or_default => Ok(Value::Null),
                    None => Err(no_elements()),
                }
            })
            .generic(1),
            chained,
        )?;
        add(
            table,
            &format!("{name}({{0}},{{1}})"),
            Member::method(
                format!("Enumerable.{member}(predicate)"),
                vec![seq_t(), predicate()],
                t(),
                move |args| {
                    let pred = closure_arg(args, 1)?;
                    for item in source(args, name)? {
                        if matches(pred, item)? {
                            return Ok(item.clone());
                        }
                    }
                    if or_default {
                        Ok(Value::Null)
                    } else {
                        Err(EvalError::InvalidOperation(
                            "Sequence contains no matching element".into(),
                        ))
                    }
                },
            )
            .generic(1),
            chained,
        )?;
    }

    add(
        table,
        "where({0},{1})",
        Member::method(
            "Enumerable.Where",
            vec![seq_t(), predicate()],
            seq_t(),
            |args| {
                let pred = closure_arg(args, 1)?;
                let mut kept = Vec::new();
                for item in source(args, "where")? {
                    if matches(pred, item)? {
                        kept.push(item.clone());
                    }
                }
                Ok(Value::Array(kept))
            },
        )
        .generic(1),
        chained,
    )?;
    add(
        table,
        "select({0},{1})",
        Member::method(
            "Enumerable.Select",
            vec![seq_t(), TypeSig::function(vec![t()], TypeSig::param(1))],
            TypeSig::enumerable(TypeSig::param(1)),
            |args| Ok(Value::Array(project(args, "select")?)),
        )
        .generic(2),
        chained,
    )?;
    add(
        table,
        "contains({0},{1})",
        Member::method("Enumerable.Contains", vec![seq_t(), t()], exact(Type::Bool), |args| {
            let needle = args.get(1).unwrap_or(&Value::Null);
            Ok(Value::Bool(source(args, "contains")?.contains(needle)))
        })
        .generic(1),
        chained,
    )?;
    Ok(())
}

/// Apply the selector in argument 1 to every element of the source
fn project(args: &[Value], member: &str) -> Result<Vec<Value>> {
    let selector = closure_arg(args, 1)?;
    source(args, member)?
        .iter()
        .map(|item| selector.call(std::slice::from_ref(item)))
        .collect()
}

fn zero_of(ty: &Type) -> Value {
    match ty {
        Type::Int64 => Value::Int64(0),
        Type::Double => Value::Double(0.0),
        Type::Decimal => Value::Decimal(Decimal::ZERO),
        _ => Value::Int32(0),
    }
}

/// Sum skipping nulls; integral sums are checked
fn sum(items: impl Iterator<Item = Value>, zero: Value) -> Result<Value> {
    let mut total: Option<Value> = None;
    for item in items.filter(|v| !v.is_null()) {
        total = Some(match (total, item) {
            (None, item) => item,
            (Some(Value::Int32(a)), Value::Int32(b)) => Value::Int32(
                a.checked_add(b)
                    .ok_or_else(|| EvalError::Overflow("sum".into()))?,
            ),
            (Some(Value::Int64(a)), Value::Int64(b)) => Value::Int64(
                a.checked_add(b)
                    .ok_or_else(|| EvalError::Overflow("sum".into()))?,
            ),
            (Some(Value::Double(a)), Value::Double(b)) => Value::Double(a + b),
            (Some(Value::Decimal(a)), Value::Decimal(b)) => Value::Decimal(
                a.checked_add(b)
                    .ok_or_else(|| EvalError::Overflow("sum".into()))?,
            ),
            (Some(acc), other) => {
                return Err(EvalError::TypeError {
                    expected: acc.kind_name().to_string(),
                    got: other.kind_name().to_string(),
                });
            }
        });
    }
    Ok(total.unwrap_or(zero))
}

fn average(items: Vec<Value>) -> Result<Value> {
    let items: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();
    if items.is_empty() {
        return Err(no_elements());
    }
    let count = items.len();
    match sum(items.into_iter(), Value::Null)? {
        Value::Double(total) => Ok(Value::Double(total / count as f64)),
        Value::Decimal(total) => total
            .checked_div(Decimal::from(count))
            .map(Value::Decimal)
            .ok_or_else(|| EvalError::Overflow("average".into())),
        other => Err(EvalError::type_error("Double or Decimal", &other)),
    }
}

fn extreme(items: impl Iterator<Item = Value>, pick_greater: bool) -> Result<Value> {
    let mut seen_any = false;
    let mut best: Option<Value> = None;
    for item in items {
        seen_any = true;
        if item.is_null() {
            continue;
        }
        best = match best {
            None => Some(item),
            Some(current) => {
                let ordering = item.compare(&current).ok_or_else(|| EvalError::TypeError {
                    expected: current.kind_name().to_string(),
                    got: item.kind_name().to_string(),
                })?;
                let replace = if pick_greater {
                    ordering.is_gt()
                } else {
                    ordering.is_lt()
                };
                Some(if replace { item } else { current })
            }
        };
    }
    match best {
        Some(value) => Ok(value),
        None if seen_any => Ok(Value::Null),
        None => Err(no_elements()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DateLiteral, parse_date_literal};

    fn call(table: &FunctionTable, id: &str, args: &[Value]) -> Result<Value> {
        table.member(id).unwrap().invoke(args)
    }

    #[test]
    fn string_functions() {
        let table = FunctionTable::builtin();
        let hello = Value::from("Hello");
        assert_eq!(call(&table, "String.Length", &[hello.clone()]), Ok(Value::Int32(5)));
        assert_eq!(
            call(&table, "String.Contains", &[hello.clone(), "ell".into()]),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            call(&table, "String.IndexOf", &[hello.clone(), "lo".into()]),
            Ok(Value::Int32(3))
        );
        assert_eq!(
            call(&table, "String.Substring(Int32,Int32)", &[hello.clone(), 1.into(), 3.into()]),
            Ok(Value::from("ell"))
        );
        assert!(call(&table, "String.Substring", &[hello, 9.into()]).is_err());
        assert!(matches!(
            call(&table, "String.ToLower", &[Value::Null]),
            Err(EvalError::NullReference(_))
        ));
        assert_eq!(
            call(&table, "String.Concat", &[Value::Null, "x".into()]),
            Ok(Value::from("x"))
        );
    }

    #[test]
    fn date_parts_for_both_kinds() {
        let table = FunctionTable::builtin();
        let Some(DateLiteral::DateTimeOffset(d)) = parse_date_literal("2021-03-04T05:06:07+01:00")
        else {
            panic!("expected offset");
        };
        assert_eq!(
            call(&table, "DateTimeOffset.Hour", &[Value::DateTimeOffset(d)]),
            Ok(Value::Int32(5))
        );
        assert_eq!(table.candidates("year", 1).len(), 4);
    }

    #[test]
    fn nullable_date_parts_lift_null() {
        let table = FunctionTable::builtin();
        let Some(DateLiteral::DateTime(d)) = parse_date_literal("2021-03-04T05:06:07Z") else {
            panic!("expected date time");
        };
        assert_eq!(
            call(&table, "Nullable<DateTime>.Month", &[Value::DateTime(d)]),
            Ok(Value::Int32(3))
        );
        assert_eq!(
            call(&table, "Nullable<DateTimeOffset>.Year", &[Value::Null]),
            Ok(Value::Null)
        );
        assert!(matches!(
            call(&table, "DateTime.Year", &[Value::Null]),
            Err(EvalError::NullReference(_))
        ));
    }

    #[test]
    fn every_builtin_format_registers() {
        let table = FunctionTable::try_builtin().unwrap();
        assert_eq!(table.len(), FunctionTable::builtin().len());
        assert_eq!(table.candidates("substringof", 2).len(), 1);
    }

    #[test]
    fn rounding_is_bankers() {
        let table = FunctionTable::builtin();
        assert_eq!(
            call(&table, "Math.Round(Double)", &[Value::Double(2.5)]),
            Ok(Value::Double(2.0))
        );
        assert_eq!(
            call(&table, "Math.Round(Decimal)", &[Value::Decimal(Decimal::new(35, 1))]),
            Ok(Value::Decimal(Decimal::new(4, 0)))
        );
    }

    #[test]
    fn aggregates() {
        let items = vec![Value::Int32(3), Value::Null, Value::Int32(9), Value::Int32(1)];
        assert_eq!(sum(items.clone().into_iter(), Value::Int32(0)), Ok(Value::Int32(13)));
        assert_eq!(sum(std::iter::empty(), Value::Double(0.0)), Ok(Value::Double(0.0)));
        assert_eq!(extreme(items.clone().into_iter(), true), Ok(Value::Int32(9)));
        assert_eq!(extreme(items.into_iter(), false), Ok(Value::Int32(1)));
        assert_eq!(extreme(std::iter::empty(), true), Err(no_elements()));
        assert_eq!(
            average(vec![Value::Double(1.0), Value::Double(2.0)]),
            Ok(Value::Double(1.5))
        );
        assert!(matches!(
            sum([Value::Int32(i32::MAX), Value::Int32(1)].into_iter(), Value::Int32(0)),
            Err(EvalError::Overflow(_))
        ));
    }

    #[test]
    fn contains_uses_value_equality() {
        let table = FunctionTable::builtin();
        let items = Value::Array(vec![1.into(), 2.into()]);
        assert_eq!(
            call(&table, "Enumerable.Contains", &[items.clone(), 2.into()]),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            call(&table, "Enumerable.Contains", &[items, Value::Null]),
            Ok(Value::Bool(false))
        );
    }
}
