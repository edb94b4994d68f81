//! Invocable targets and the typed method table behind them.
//!
//! A [`Target`] is anything a call identifier can resolve to. [`Service`] is
//! the stock implementation: a table of typed async methods keyed by
//! [`MethodSignature`], built with [`ServiceBuilder`].
//!
//! Arguments arrive as the call's value list and are decoded as one tuple,
//! so a method with parameters `(i64, i64)` takes `(a, b): (i64, i64)` and a
//! method without parameters takes `()`.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use statewire::dispatch::Service;
//!
//! let calc = Service::builder("calc")
//!     .method("sum", &["i64", "i64"], |(a, b): (i64, i64)| async move {
//!         Ok::<_, Infallible>(a + b)
//!     })
//!     .context_method("whoami", &[], |ctx, (): ()| async move {
//!         Ok::<_, Infallible>(ctx.call_id())
//!     })
//!     .build();
//!
//! assert_eq!(calc.len(), 2);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ExecutionContext, MethodSignature};
use crate::error::InvocationError;
use crate::executor::BoxFuture;

/// Outcome of one invocation: the encoded return value or the failure.
pub type InvokeResult = std::result::Result<Value, InvocationError>;

/// Invoke capability of a resolved call target.
///
/// Implementations match `signature` by name and parameter types against
/// whatever they actually provide.
pub trait Target: Send + Sync + 'static {
    fn invoke(
        &self,
        ctx: ExecutionContext,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> BoxFuture<'static, InvokeResult>;
}

/// One entry of a [`Service`] method table.
pub trait Method: Send + Sync + 'static {
    fn call(
        &self,
        ctx: ExecutionContext,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> BoxFuture<'static, InvokeResult>;
}

/// Wrapper that decodes arguments before calling the handler and encodes
/// its return value after.
pub struct TypedMethod<F, A, Fut> {
    handler: F,
    _phantom: PhantomData<fn(A) -> Fut>,
}

impl<F, A, Fut> TypedMethod<F, A, Fut>
where
    F: Fn(ExecutionContext, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    Fut: Future + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, A, Fut, R, E> Method for TypedMethod<F, A, Fut>
where
    F: Fn(ExecutionContext, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn call(
        &self,
        ctx: ExecutionContext,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> BoxFuture<'static, InvokeResult> {
        let parsed: A = match decode_args(signature, args) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(ctx, parsed);
        Box::pin(async move {
            let value = fut
                .await
                .map_err(|e| InvocationError::Failed(e.to_string()))?;
            rmpv::ext::to_value(&value)
                .map_err(|e| InvocationError::Failed(format!("unencodable return value: {}", e)))
        })
    }
}

fn decode_args<A: DeserializeOwned>(
    signature: &MethodSignature,
    args: Vec<Value>,
) -> std::result::Result<A, InvocationError> {
    let packed = if args.is_empty() {
        Value::Nil
    } else {
        Value::Array(args)
    };

    rmpv::ext::from_value(packed).map_err(|e| InvocationError::InvalidArguments {
        method: signature.to_string(),
        reason: e.to_string(),
    })
}

struct MethodEntry {
    method: Box<dyn Method>,
    /// Handler receives the [`ExecutionContext`].
    context_aware: bool,
}

/// Named table of typed async methods.
pub struct Service {
    name: String,
    methods: HashMap<MethodSignature, MethodEntry>,
}

impl Service {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            service: Service {
                name: name.into(),
                methods: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signatures(&self) -> impl Iterator<Item = &MethodSignature> {
        self.methods.keys()
    }

    /// `None` when the service has no such method.
    pub fn is_context_aware(&self, signature: &MethodSignature) -> Option<bool> {
        self.methods.get(signature).map(|e| e.context_aware)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Target for Service {
    fn invoke(
        &self,
        ctx: ExecutionContext,
        signature: &MethodSignature,
        args: Vec<Value>,
    ) -> BoxFuture<'static, InvokeResult> {
        let Some(entry) = self.methods.get(signature) else {
            let err = InvocationError::NoSuchMethod(format!("{} has no method {}", self.name, signature));
            return Box::pin(async move { Err(err) });
        };

        if args.len() != signature.arity() {
            let err = InvocationError::InvalidArguments {
                method: signature.to_string(),
                reason: format!("expected {} arguments, got {}", signature.arity(), args.len()),
            };
            return Box::pin(async move { Err(err) });
        }

        entry.method.call(ctx, signature, args)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Fluent builder for [`Service`].
pub struct ServiceBuilder {
    service: Service,
}

impl ServiceBuilder {
    /// Register a plain method. A later registration with the same name and
    /// parameter types replaces the earlier one.
    pub fn method<F, A, Fut, R, E>(self, name: &str, parameter_types: &[&str], handler: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let typed = TypedMethod::new(move |_ctx: ExecutionContext, args: A| handler(args));
        self.insert(name, parameter_types, Box::new(typed), false)
    }

    /// Register a method whose handler also receives the
    /// [`ExecutionContext`] of the call.
    pub fn context_method<F, A, Fut, R, E>(
        self,
        name: &str,
        parameter_types: &[&str],
        handler: F,
    ) -> Self
    where
        F: Fn(ExecutionContext, A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.insert(name, parameter_types, Box::new(TypedMethod::new(handler)), true)
    }

    fn insert(
        mut self,
        name: &str,
        parameter_types: &[&str],
        method: Box<dyn Method>,
        context_aware: bool,
    ) -> Self {
        let signature = MethodSignature::new(name, parameter_types.iter().copied());
        self.service.methods.insert(
            signature,
            MethodEntry {
                method,
                context_aware,
            },
        );
        self
    }

    pub fn build(self) -> Service {
        self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::context::testing;
    use crate::protocol::Rpc;
    use std::convert::Infallible;

    fn calc() -> Service {
        Service::builder("calc")
            .method("sum", &["i64", "i64"], |(a, b): (i64, i64)| async move {
                Ok::<_, Infallible>(a + b)
            })
            .method("sum", &["f64", "f64"], |(a, b): (f64, f64)| async move {
                Ok::<_, Infallible>(a + b)
            })
            .method("ping", &[], |(): ()| async move { Ok::<_, Infallible>("pong") })
            .method("div", &["i64", "i64"], |(a, b): (i64, i64)| async move {
                if b == 0 {
                    Err("division by zero")
                } else {
                    Ok(a / b)
                }
            })
            .context_method("whoami", &[], |ctx, (): ()| async move {
                Ok::<_, Infallible>((ctx.call_id(), ctx.method_id()))
            })
            .build()
    }

    fn ctx() -> ExecutionContext {
        testing::context(&Rpc::with_id(100, 1, Value::from("calc"), vec![]))
    }

    #[tokio::test]
    async fn test_invoke_by_name_and_parameter_types() {
        let calc = calc();

        let int = calc
            .invoke(ctx(), &MethodSignature::new("sum", ["i64", "i64"]), vec![Value::from(2), Value::from(3)])
            .await;
        assert_eq!(int, Ok(Value::from(5)));

        let float = calc
            .invoke(ctx(), &MethodSignature::new("sum", ["f64", "f64"]), vec![Value::from(0.5), Value::from(0.25)])
            .await;
        assert_eq!(float, Ok(Value::from(0.75)));
    }

    #[tokio::test]
    async fn test_zero_argument_method() {
        let result = calc()
            .invoke(ctx(), &MethodSignature::new("ping", Vec::<String>::new()), vec![])
            .await;
        assert_eq!(result, Ok(Value::from("pong")));
    }

    #[tokio::test]
    async fn test_context_method_sees_the_call() {
        let calc = calc();
        let signature = MethodSignature::new("whoami", Vec::<String>::new());

        assert_eq!(calc.is_context_aware(&signature), Some(true));
        let result = calc.invoke(ctx(), &signature, vec![]).await;
        assert_eq!(result, Ok(Value::Array(vec![Value::from(100), Value::from(1)])));
    }

    #[tokio::test]
    async fn test_unknown_signature() {
        let result = calc()
            .invoke(ctx(), &MethodSignature::new("sum", ["i64"]), vec![Value::from(1)])
            .await;
        assert!(matches!(result, Err(InvocationError::NoSuchMethod(_))));
    }

    #[tokio::test]
    async fn test_bad_arguments() {
        let calc = calc();
        let sum = MethodSignature::new("sum", ["i64", "i64"]);

        let wrong_count = calc.invoke(ctx(), &sum, vec![Value::from(1)]).await;
        assert!(matches!(wrong_count, Err(InvocationError::InvalidArguments { .. })));

        let wrong_type = calc
            .invoke(ctx(), &sum, vec![Value::from("two"), Value::from(3)])
            .await;
        assert!(matches!(wrong_type, Err(InvocationError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_failed() {
        let result = calc()
            .invoke(ctx(), &MethodSignature::new("div", ["i64", "i64"]), vec![Value::from(1), Value::from(0)])
            .await;
        assert_eq!(result, Err(InvocationError::Failed("division by zero".to_string())));
    }
}
