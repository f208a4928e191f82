//! Conversion of call arguments into positional CBOR values.

use super::codec;
use crate::error::CodecError;
use ciborium::Value;
use serde::Serialize;

/// Argument list accepted by the client call methods.
///
/// Implemented for `()`, for tuples of up to six serializable values and for
/// a pre-built `Vec<Value>`. A single argument is passed as a one-element
/// tuple: `client.call("square", (7.0,))`.
pub trait IntoArgs {
    /// Encode the arguments in call order.
    ///
    /// # Errors
    ///
    /// Returns an error if any argument cannot be represented in CBOR.
    fn into_args(self) -> Result<Vec<Value>, CodecError>;
}

impl IntoArgs for () {
    fn into_args(self) -> Result<Vec<Value>, CodecError> {
        Ok(Vec::new())
    }
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, CodecError> {
        Ok(self)
    }
}

macro_rules! impl_into_args {
    ($($name:ident: $ty:ident),+) => {
        impl<$($ty: Serialize),+> IntoArgs for ($($ty,)+) {
            fn into_args(self) -> Result<Vec<Value>, CodecError> {
                let ($($name,)+) = self;
                Ok(vec![$(codec::to_value(&$name)?),+])
            }
        }
    };
}

impl_into_args!(a1: A1);
impl_into_args!(a1: A1, a2: A2);
impl_into_args!(a1: A1, a2: A2, a3: A3);
impl_into_args!(a1: A1, a2: A2, a3: A3, a4: A4);
impl_into_args!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5);
impl_into_args!(a1: A1, a2: A2, a3: A3, a4: A4, a5: A5, a6: A6);
