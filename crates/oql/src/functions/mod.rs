//! Known-function table: query function names mapped onto host members
//!
//! A [`MemberMapping`] ties a function name and argument count to a [`Member`]
//! along with the argument reordering and the text formats used by the
//! serializer. The table is built once and shared read-only.

mod builtin;
mod signature;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use signature::{Bindings, TypeSig};

use crate::eval::EvalError;
use crate::types::Type;
use crate::value::Value;

/// Evaluation entry point of a member. Instance members get the receiver first.
pub type Invoke = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FunctionTableError {
    #[error("Invalid function format '{0}'")]
    InvalidFormat(String),

    #[error("Format '{format}' does not map the {arity} parameters of {member}")]
    ArityMismatch {
        format: String,
        member: String,
        arity: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Property,
}

/// A host method or property with a generic signature
pub struct Member {
    id: String,
    kind: MemberKind,
    is_static: bool,
    type_params: usize,
    params: Vec<TypeSig>,
    ret: TypeSig,
    invoke: Invoke,
}

impl Member {
    pub fn method<F>(id: impl Into<String>, params: Vec<TypeSig>, ret: TypeSig, invoke: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Member {
            id: id.into(),
            kind: MemberKind::Method,
            is_static: false,
            type_params: 0,
            params,
            ret,
            invoke: Arc::new(invoke),
        }
    }

    pub fn property<F>(id: impl Into<String>, receiver: Type, ret: Type, invoke: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Member {
            kind: MemberKind::Property,
            ..Self::method(id, vec![TypeSig::Exact(receiver)], TypeSig::Exact(ret), invoke)
        }
    }

    pub fn generic(mut self, type_params: usize) -> Self {
        self.type_params = type_params;
        self
    }

    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn type_params(&self) -> usize {
        self.type_params
    }

    pub fn params(&self) -> &[TypeSig] {
        &self.params
    }

    pub fn ret(&self) -> &TypeSig {
        &self.ret
    }

    pub fn invoke(&self, args: &[Value]) -> Result<Value, EvalError> {
        if args.len() != self.params.len() {
            return Err(EvalError::ArgError(format!(
                "{} expects {} arguments, got {}",
                self.id,
                self.params.len(),
                args.len()
            )));
        }
        (self.invoke)(args)
    }

    /// Infer generic arguments from fully typed arguments and return the
    /// result type, or `None` if the arguments do not fit the signature
    pub fn infer_return(&self, arg_types: &[Type]) -> Option<Type> {
        if arg_types.len() != self.params.len() {
            return None;
        }
        let mut bindings = Bindings::new(self.type_params);
        for (sig, actual) in self.params.iter().zip(arg_types) {
            if !sig.unify(actual, &mut bindings) {
                return None;
            }
        }
        for (sig, actual) in self.params.iter().zip(arg_types) {
            if !sig.substitute(&bindings)?.is_assignable_from(actual) {
                return None;
            }
        }
        self.ret.substitute(&bindings)
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// Preferred rendering of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    /// `name(a, b)`
    Static,
    /// `a.name(b)`
    Chained,
}

/// A query function bound to a member
#[derive(Debug)]
pub struct MemberMapping {
    name: String,
    member: Arc<Member>,
    /// Member parameter index for each textual argument position
    argument_order: Vec<usize>,
    style: CallStyle,
    static_format: String,
    chained_format: String,
}

impl MemberMapping {
    /// Parse a static format such as `substringof({1},{0})`; placeholder `{n}`
    /// refers to parameter `n` of the member.
    pub fn new(
        static_format: &str,
        member: Arc<Member>,
        style: CallStyle,
    ) -> Result<Self, FunctionTableError> {
        let invalid = || FunctionTableError::InvalidFormat(static_format.to_string());
        let open = static_format.find('(').ok_or_else(invalid)?;
        let name = &static_format[..open];
        let inner = static_format[open + 1..]
            .strip_suffix(')')
            .ok_or_else(invalid)?;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }

        let argument_order = if inner.trim().is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|part| {
                    part.trim()
                        .strip_prefix('{')
                        .and_then(|p| p.strip_suffix('}'))
                        .and_then(|p| p.parse::<usize>().ok())
                        .ok_or_else(invalid)
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let arity = member.params().len();
        let mut seen = vec![false; arity];
        for &index in &argument_order {
            match seen.get_mut(index) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(FunctionTableError::ArityMismatch {
                        format: static_format.to_string(),
                        member: member.id().to_string(),
                        arity,
                    });
                }
            }
        }
        if argument_order.len() != arity {
            return Err(FunctionTableError::ArityMismatch {
                format: static_format.to_string(),
                member: member.id().to_string(),
                arity,
            });
        }

        let placeholders: Vec<String> = argument_order.iter().map(|i| format!("{{{i}}}")).collect();
        let chained_format = match placeholders.split_first() {
            Some((receiver, rest)) => format!("{receiver}.{name}({})", rest.join(",")),
            None => static_format.to_string(),
        };

        Ok(MemberMapping {
            name: name.to_string(),
            member,
            argument_order,
            style,
            static_format: static_format.to_string(),
            chained_format,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member(&self) -> &Arc<Member> {
        &self.member
    }

    pub fn arity(&self) -> usize {
        self.argument_order.len()
    }

    pub fn style(&self) -> CallStyle {
        self.style
    }

    pub fn static_format(&self) -> &str {
        &self.static_format
    }

    pub fn chained_format(&self) -> &str {
        &self.chained_format
    }

    /// Textual argument order → member parameter order
    pub fn reorder<T: Clone>(&self, textual: &[T]) -> Option<Vec<T>> {
        if textual.len() != self.argument_order.len() {
            return None;
        }
        let mut slots: Vec<Option<T>> = vec![None; textual.len()];
        for (arg, &target) in textual.iter().zip(&self.argument_order) {
            slots[target] = Some(arg.clone());
        }
        slots.into_iter().collect()
    }

    /// Render a call from arguments already rendered in member order
    pub fn format(&self, style: CallStyle, member_args: &[String]) -> String {
        let template = match style {
            CallStyle::Static => &self.static_format,
            CallStyle::Chained => &self.chained_format,
        };
        let mut out = String::with_capacity(template.len() + 16);
        let mut rest = template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let placeholder = after
                .find('}')
                .and_then(|close| Some((after[..close].parse::<usize>().ok()?, close)));
            match placeholder.and_then(|(i, close)| Some((member_args.get(i)?, close))) {
                Some((arg, close)) => {
                    out.push_str(arg);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// Registry of query functions keyed by (name, argument count)
#[derive(Default, Clone)]
pub struct FunctionTable {
    by_name: HashMap<(String, usize), Vec<Arc<MemberMapping>>>,
    by_member: HashMap<String, Arc<MemberMapping>>,
}

impl FunctionTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in string, date, math and collection functions
    pub fn builtin() -> Self {
        let mut table = Self::default();
        let registered = builtin::register_all(&mut table);
        debug_assert!(registered.is_ok(), "built-in function table: {registered:?}");
        if let Err(e) = registered {
            log::error!("Built-in function table is incomplete: {e}");
        }
        table
    }

    /// Like [`FunctionTable::builtin`], failing on the first mapping that
    /// does not register
    pub fn try_builtin() -> Result<Self, FunctionTableError> {
        let mut table = Self::default();
        builtin::register_all(&mut table)?;
        Ok(table)
    }

    /// Add a mapping. Candidates for the same (name, arity) are tried in
    /// registration order; the first mapping of a member is used for rendering.
    pub fn register(&mut self, mapping: MemberMapping) {
        let mapping = Arc::new(mapping);
        self.by_member
            .entry(mapping.member.id().to_string())
            .or_insert_with(|| mapping.clone());
        self.by_name
            .entry((mapping.name.clone(), mapping.arity()))
            .or_default()
            .push(mapping);
    }

    /// Convenience for `register(MemberMapping::new(..)?)`
    pub fn add(
        &mut self,
        static_format: &str,
        member: Member,
        style: CallStyle,
    ) -> Result<Arc<Member>, FunctionTableError> {
        let member = Arc::new(member);
        self.register(MemberMapping::new(static_format, member.clone(), style)?);
        Ok(member)
    }

    pub fn candidates(&self, name: &str, arity: usize) -> &[Arc<MemberMapping>] {
        self.by_name
            .get(&(name.to_string(), arity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn mapping_for(&self, member: &Member) -> Option<&Arc<MemberMapping>> {
        self.by_member.get(member.id())
    }

    pub fn member(&self, id: &str) -> Option<&Arc<Member>> {
        self.by_member.get(id).map(|m| m.member())
    }

    pub fn len(&self) -> usize {
        self.by_member.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("members", &self.by_member.len())
            .finish()
    }
}
