//! Extractor system for the Switchyard framework.
//!
//! [`FromInvocation`] defines how a handler parameter is produced from an
//! [`Invocation`]. Extraction failures abort the method with
//! [`ExtractError`], which reaches the error handler.

use std::ops::Deref;

use switchyard_core::{BoxedPlatform, ConversationState, Update};

use crate::context::HandlerContext;
use crate::error::{ExtractError, ExtractResult};
use crate::handler::Invocation;
use crate::mapper::{Args, FromArg};

pub trait FromInvocation: Sized {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self>;
}

impl FromInvocation for HandlerContext {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(inv.ctx.clone())
    }
}

impl FromInvocation for Args {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(inv.args.clone())
    }
}

impl FromInvocation for Update {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(inv.ctx.update().clone())
    }
}

impl FromInvocation for BoxedPlatform {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(inv.ctx.platform().clone())
    }
}

/// A snapshot of the conversation state taken when the method starts.
///
/// Use [`HandlerContext`] to modify the state.
impl FromInvocation for ConversationState {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(inv.ctx.state_snapshot())
    }
}

impl<T: FromInvocation> FromInvocation for Option<T> {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        Ok(T::from_invocation(inv).ok())
    }
}

// ============================================================================
// Update payloads
// ============================================================================

/// Text of the message that triggered the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text(pub String);

impl Deref for Text {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl FromInvocation for Text {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        inv.ctx
            .text()
            .map(|text| Text(text.to_string()))
            .ok_or_else(|| ExtractError::custom("update carries no message text"))
    }
}

/// Data of the button press that triggered the method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackData(pub String);

impl Deref for CallbackData {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl FromInvocation for CallbackData {
    fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
        inv.ctx
            .callback_data()
            .map(|data| CallbackData(data.to_string()))
            .ok_or_else(|| ExtractError::custom("update is not a button press"))
    }
}

// ============================================================================
// Typed arguments
// ============================================================================

/// Bound arguments converted to a tuple of scalar types.
///
/// ```rust,ignore
/// async fn args(Params((a, b)): Params<(i32, Option<String>)>) -> String {
///     format!("a = {a}, b = {b:?}")
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Params<T>(pub T);

macro_rules! impl_params {
    ($($ty:ident => $idx:tt),+) => {
        impl<$($ty: FromArg,)+> FromInvocation for Params<($($ty,)+)> {
            fn from_invocation(inv: &Invocation) -> ExtractResult<Self> {
                Ok(Params(($(inv.args.get::<$ty>($idx)?,)+)))
            }
        }
    };
}

impl_params!(A => 0);
impl_params!(A => 0, B => 1);
impl_params!(A => 0, B => 1, C => 2);
impl_params!(A => 0, B => 1, C => 2, D => 3);
impl_params!(A => 0, B => 1, C => 2, D => 3, E => 4);
impl_params!(A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);
