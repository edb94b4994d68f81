//! Method signatures and their transferable descriptors.
//!
//! A method is identified by name plus parameter type names, never by the
//! identity of a descriptor object. The first call for a method id carries
//! the descriptor produced by a [`MethodSerializer`]; the peer turns it back
//! into a [`MethodSignature`] and matches it against the resolved target.

use std::fmt;

use rmpv::Value;

use crate::error::InvocationError;

/// Name and parameter type names of a callable method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodSignature {
    pub fn new<I, S>(name: impl Into<String>, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameter_types: parameter_types.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.parameter_types.join(", "))
    }
}

/// Converts signatures to and from the value sent in `ExtendedRpc`.
pub trait MethodSerializer: Send + Sync + 'static {
    fn to_descriptor(&self, signature: &MethodSignature) -> Value;

    /// # Errors
    ///
    /// [`InvocationError::NoSuchMethod`] when the descriptor cannot be read.
    fn from_descriptor(&self, descriptor: &Value) -> Result<MethodSignature, InvocationError>;
}

/// Descriptor layout `[name, [parameter type, ...]]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamedMethodSerializer;

impl MethodSerializer for NamedMethodSerializer {
    fn to_descriptor(&self, signature: &MethodSignature) -> Value {
        let types = signature
            .parameter_types
            .iter()
            .map(|t| Value::from(t.as_str()))
            .collect();
        Value::Array(vec![Value::from(signature.name.as_str()), Value::Array(types)])
    }

    fn from_descriptor(&self, descriptor: &Value) -> Result<MethodSignature, InvocationError> {
        let unresolvable = || InvocationError::NoSuchMethod(format!("unresolvable descriptor {}", descriptor));

        let parts = descriptor.as_array().ok_or_else(unresolvable)?;
        let [name, types] = parts.as_slice() else {
            return Err(unresolvable());
        };
        let name = name.as_str().ok_or_else(unresolvable)?;
        let parameter_types = types
            .as_array()
            .ok_or_else(unresolvable)?
            .iter()
            .map(|t| t.as_str().map(str::to_string).ok_or_else(unresolvable))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MethodSignature::new(name, parameter_types))
    }
}
