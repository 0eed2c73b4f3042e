//! Generic member signatures and structural unification

use std::fmt;

use crate::types::Type;

/// A parameter or return type that may mention generic type parameters
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSig {
    Exact(Type),
    /// Generic parameter by index
    Param(usize),
    Enumerable(Box<TypeSig>),
    Nullable(Box<TypeSig>),
    Function(Vec<TypeSig>, Box<TypeSig>),
    Expression(Box<TypeSig>),
}

impl TypeSig {
    pub fn exact(ty: Type) -> Self {
        TypeSig::Exact(ty)
    }

    pub fn param(index: usize) -> Self {
        TypeSig::Param(index)
    }

    pub fn enumerable(inner: TypeSig) -> Self {
        TypeSig::Enumerable(Box::new(inner))
    }

    pub fn nullable(inner: TypeSig) -> Self {
        TypeSig::Nullable(Box::new(inner))
    }

    pub fn function(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        TypeSig::Function(params, Box::new(ret))
    }

    /// Parameter types of a (possibly quoted) function signature
    pub fn lambda_shape(&self) -> Option<(&[TypeSig], &TypeSig, bool)> {
        match self {
            TypeSig::Function(params, ret) => Some((params, ret, false)),
            TypeSig::Expression(inner) => match inner.as_ref() {
                TypeSig::Function(params, ret) => Some((params, ret, true)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Bind generic parameters so that `self` matches `actual`.
    /// Returns false on a structural mismatch.
    pub fn unify(&self, actual: &Type, bindings: &mut Bindings) -> bool {
        match self {
            TypeSig::Exact(_) => true,
            TypeSig::Param(index) => {
                if bindings.get(*index).is_none() {
                    bindings.bind(*index, actual.clone());
                }
                true
            }
            TypeSig::Enumerable(inner) => match actual.element_type() {
                Some(element) => inner.unify(element, bindings),
                None => false,
            },
            TypeSig::Nullable(inner) => match actual {
                Type::Nullable(underlying) => inner.unify(underlying, bindings),
                _ => false,
            },
            TypeSig::Function(params, ret) => match actual {
                Type::Function(actual_params, actual_ret) if actual_params.len() == params.len() => {
                    params
                        .iter()
                        .zip(actual_params)
                        .all(|(p, a)| p.unify(a, bindings))
                        && ret.unify(actual_ret, bindings)
                }
                _ => false,
            },
            TypeSig::Expression(inner) => match actual {
                Type::Expression(actual_inner) => inner.unify(actual_inner, bindings),
                _ => false,
            },
        }
    }

    /// The concrete type, if every generic parameter it mentions is bound
    pub fn substitute(&self, bindings: &Bindings) -> Option<Type> {
        Some(match self {
            TypeSig::Exact(ty) => ty.clone(),
            TypeSig::Param(index) => bindings.get(*index)?.clone(),
            TypeSig::Enumerable(inner) => Type::enumerable_of(inner.substitute(bindings)?),
            TypeSig::Nullable(inner) => Type::nullable_of(inner.substitute(bindings)?),
            TypeSig::Function(params, ret) => Type::function(
                params
                    .iter()
                    .map(|p| p.substitute(bindings))
                    .collect::<Option<Vec<_>>>()?,
                ret.substitute(bindings)?,
            ),
            TypeSig::Expression(inner) => Type::Expression(Box::new(inner.substitute(bindings)?)),
        })
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Exact(ty) => write!(f, "{ty}"),
            TypeSig::Param(index) => write!(f, "T{index}"),
            TypeSig::Enumerable(inner) => write!(f, "IEnumerable<{inner}>"),
            TypeSig::Nullable(inner) => write!(f, "Nullable<{inner}>"),
            TypeSig::Function(params, ret) => {
                write!(f, "Func<")?;
                for p in params {
                    write!(f, "{p},")?;
                }
                write!(f, "{ret}>")
            }
            TypeSig::Expression(inner) => write!(f, "Expression<{inner}>"),
        }
    }
}

/// Generic arguments inferred so far
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    slots: Vec<Option<Type>>,
}

impl Bindings {
    pub fn new(count: usize) -> Self {
        Bindings {
            slots: vec![None; count],
        }
    }

    pub fn get(&self, index: usize) -> Option<&Type> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn bind(&mut self, index: usize, ty: Type) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(ty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_binds_through_enumerable_and_function() {
        let sig = TypeSig::function(
            vec![TypeSig::enumerable(TypeSig::param(0))],
            TypeSig::param(1),
        );
        let actual = Type::function(vec![Type::array_of(Type::String)], Type::Int32);
        let mut bindings = Bindings::new(2);
        assert!(sig.unify(&actual, &mut bindings));
        assert_eq!(bindings.get(0), Some(&Type::String));
        assert_eq!(
            sig.substitute(&bindings),
            Some(Type::function(
                vec![Type::enumerable_of(Type::String)],
                Type::Int32
            ))
        );
    }

    #[test]
    fn structural_mismatch_rejects() {
        let mut bindings = Bindings::new(1);
        assert!(!TypeSig::enumerable(TypeSig::param(0)).unify(&Type::Int32, &mut bindings));
        assert!(!TypeSig::nullable(TypeSig::param(0)).unify(&Type::Int32, &mut bindings));
    }

    #[test]
    fn first_binding_sticks() {
        let mut bindings = Bindings::new(1);
        assert!(TypeSig::param(0).unify(&Type::Int32, &mut bindings));
        assert!(TypeSig::param(0).unify(&Type::String, &mut bindings));
        assert_eq!(bindings.get(0), Some(&Type::Int32));
    }

    #[test]
    fn unbound_parameter_does_not_substitute() {
        let bindings = Bindings::new(1);
        assert_eq!(TypeSig::param(0).substitute(&bindings), None);
    }
}
