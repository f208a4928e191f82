//! Typed callables bound on the server and the registry that dispatches to
//! them by name.
//!
//! Plain closures and function pointers with up to six deserializable
//! parameters and a serializable return value implement [`Handler`].
//! Callables returning `Result<R, E>` with a displayable `E` implement
//! [`FallibleHandler`]; their errors reach the caller as remote errors.

use crate::error::{Error, HandlerError, Result};
use crate::protocol::codec;
use ciborium::Value;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::warn;

/// Type-erased callable stored in the registry.
pub type BoxedHandler = Arc<dyn Fn(Vec<Value>) -> std::result::Result<Value, HandlerError> + Send + Sync>;

/// A callable whose return value is sent back as the call result.
///
/// `Args` is the tuple of parameter types and is inferred at the bind site.
pub trait Handler<Args>: Send + Sync + 'static {
    /// Erase the parameter types.
    fn into_boxed(self) -> BoxedHandler;
}

/// A callable returning `Result`; `Err` values become remote errors.
pub trait FallibleHandler<Args>: Send + Sync + 'static {
    /// Erase the parameter types.
    fn into_boxed(self) -> BoxedHandler;
}

fn check_arity(expected: usize, args: &[Value]) -> std::result::Result<(), HandlerError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(HandlerError::ArgumentCount {
            expected,
            actual: args.len(),
        })
    }
}

fn decode_arg<T: DeserializeOwned>(
    args: &[Value],
    index: &mut usize,
) -> std::result::Result<T, HandlerError> {
    let position = *index;
    *index += 1;
    let value = args.get(position).ok_or(HandlerError::ArgumentCount {
        expected: position + 1,
        actual: args.len(),
    })?;
    codec::from_value(value).or_else(|e| {
        widen_integer(value)
            .and_then(|float| codec::from_value(&float).ok())
            .ok_or_else(|| HandlerError::InvalidArgument {
                index: position,
                reason: e.to_string(),
            })
    })
}

/// Integers also satisfy floating-point parameters.
#[allow(clippy::cast_precision_loss)]
fn widen_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Integer(n) => Some(Value::Float(i128::from(*n) as f64)),
        _ => None,
    }
}

fn encode_result<R: Serialize>(result: &R) -> std::result::Result<Value, HandlerError> {
    codec::to_value(result).map_err(|e| HandlerError::Failed(format!("Failed to encode result: {e}")))
}

macro_rules! impl_handler {
    ($($name:ident: $ty:ident),*) => {
        impl<F, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: Serialize,
            $($ty: DeserializeOwned,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn into_boxed(self) -> BoxedHandler {
                Arc::new(move |args: Vec<Value>| {
                    let names: &[&str] = &[$(stringify!($name)),*];
                    check_arity(names.len(), &args)?;
                    let mut index = 0;
                    $(let $name: $ty = decode_arg(&args, &mut index)?;)*
                    encode_result(&(self)($($name),*))
                })
            }
        }

        impl<F, R, E, $($ty,)*> FallibleHandler<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> std::result::Result<R, E> + Send + Sync + 'static,
            R: Serialize,
            E: Display,
            $($ty: DeserializeOwned,)*
        {
            #[allow(unused_mut, unused_variables)]
            fn into_boxed(self) -> BoxedHandler {
                Arc::new(move |args: Vec<Value>| {
                    let names: &[&str] = &[$(stringify!($name)),*];
                    check_arity(names.len(), &args)?;
                    let mut index = 0;
                    $(let $name: $ty = decode_arg(&args, &mut index)?;)*
                    match (self)($($name),*) {
                        Ok(result) => encode_result(&result),
                        Err(e) => Err(HandlerError::Failed(e.to_string())),
                    }
                })
            }
        }
    };
}

impl_handler!();
impl_handler!(a1: A1);
impl_handler!(a1: A1, a2: A2);
impl_handler!(a1: A1, a2: A2, a3: A3);
impl_handler!(a1: A1, a2: A2, a3: A3, a4: A4);
impl_handler!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
impl_handler!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6);

/// Name-to-callable table shared by all sessions of a server.
#[derive(Default)]
pub(crate) struct Registry {
    handlers: DashMap<String, BoxedHandler>,
}

impl Registry {
    /// Register `handler` under `name`, refusing to replace an existing entry.
    pub(crate) fn insert(&self, name: &str, handler: BoxedHandler) -> Result<()> {
        match self.handlers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::AlreadyBound(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Look up a callable; the map guard is released before returning.
    pub(crate) fn get(&self, name: &str) -> std::result::Result<BoxedHandler, HandlerError> {
        self.handlers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HandlerError::NotFound(name.to_string()))
    }

    /// Sorted names of all bound functions.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Run a callable.
///
/// With `suppress` set, a panic is caught and reported as
/// [`HandlerError::Panicked`]. Otherwise the panic propagates to the caller.
pub(crate) fn invoke(
    handler: &BoxedHandler,
    function: &str,
    args: Vec<Value>,
    suppress: bool,
) -> std::result::Result<Value, HandlerError> {
    if !suppress {
        return handler(args);
    }
    match catch_unwind(AssertUnwindSafe(|| handler(args))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("Handler for '{}' panicked: {}", function, message);
            Err(HandlerError::Panicked(message))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed<Args, H: Handler<Args>>(handler: H) -> BoxedHandler {
        handler.into_boxed()
    }

    fn boxed_fallible<Args, H: FallibleHandler<Args>>(handler: H) -> BoxedHandler {
        handler.into_boxed()
    }

    fn args(values: &[f64]) -> Vec<Value> {
        values.iter().map(|v| Value::Float(*v)).collect()
    }

    #[test]
    fn test_typed_dispatch() {
        let add = boxed(|a: f64, b: f64| a + b);
        assert_eq!(add(args(&[10.5, 20.3])).unwrap(), Value::Float(10.5 + 20.3));

        let greet = boxed(|name: String| format!("Hello, {name}!"));
        assert_eq!(
            greet(vec![Value::Text("World".into())]).unwrap(),
            Value::Text("Hello, World!".into())
        );

        let unit = boxed(|| ());
        assert_eq!(unit(Vec::new()).unwrap(), Value::Null);
    }

    #[test]
    fn test_integer_arguments_widen_to_float() {
        let add = boxed(|a: f64, b: f64| a + b);
        let sum = add(vec![Value::Integer(1i32.into()), Value::Float(2.5)]).unwrap();
        assert_eq!(sum, Value::Float(3.5));

        // Integer parameters still take integers as-is
        let double = boxed(|n: i64| n * 2);
        assert_eq!(
            double(vec![Value::Integer(21i32.into())]).unwrap(),
            Value::Integer(42i32.into())
        );

        let greet = boxed(|name: String| name);
        assert!(matches!(
            greet(vec![Value::Integer(7i32.into())]),
            Err(HandlerError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn test_argument_errors() {
        let square = boxed(|x: f64| x * x);
        assert!(matches!(
            square(Vec::new()),
            Err(HandlerError::ArgumentCount {
                expected: 1,
                actual: 0
            })
        ));
        assert!(matches!(
            square(vec![Value::Text("seven".into())]),
            Err(HandlerError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn test_fallible_error_becomes_failure() {
        let divide = boxed_fallible(|a: f64, b: f64| {
            if b == 0.0 {
                Err("Division by zero")
            } else {
                Ok(a / b)
            }
        });
        assert_eq!(divide(args(&[9.0, 3.0])).unwrap(), Value::Float(3.0));
        let err = divide(args(&[1.0, 0.0])).unwrap_err();
        assert_eq!(err.code(), "HANDLER_ERROR");
        assert_eq!(err.to_string(), "Division by zero");
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = Registry::default();
        registry.insert("b", boxed(|| 1)).unwrap();
        registry.insert("a", boxed(|| 2)).unwrap();
        assert!(matches!(
            registry.insert("a", boxed(|| 3)),
            Err(Error::AlreadyBound(name)) if name == "a"
        ));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

        let handler = registry.get("a").unwrap();
        assert_eq!(handler(Vec::new()).unwrap(), Value::Integer(2i32.into()));
        assert!(matches!(registry.get("c"), Err(HandlerError::NotFound(_))));
    }

    #[test]
    fn test_suppressed_panic() {
        let handler = boxed(|| -> i32 { panic!("kaboom") });
        let err = invoke(&handler, "explode", Vec::new(), true).unwrap_err();
        assert!(matches!(err, HandlerError::Panicked(ref msg) if msg == "kaboom"));
    }
}
