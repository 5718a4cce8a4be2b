//! Handler system for the Switchyard framework.
//!
//! Any async function whose parameters implement [`FromInvocation`] is a
//! [`Handler`]. Blanket implementations cover functions of up to six
//! parameters, in the style of Axum:
//!
//! ```rust,ignore
//! async fn greet(ctx: HandlerContext) -> anyhow::Result<()> {
//!     ctx.reply("Hello!").await?;
//!     Ok(())
//! }
//!
//! async fn sum(Params((a, b)): Params<(i64, i64)>) -> String {
//!     format!("{a} + {b} = {}", a + b)
//! }
//! ```
//!
//! The return value is turned into a side effect by [`HandlerResponse`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use switchyard_core::Keyboard;

use crate::context::HandlerContext;
use crate::extractor::FromInvocation;
use crate::mapper::Args;

/// Everything a method receives for one update.
#[derive(Clone)]
pub struct Invocation {
    pub ctx: HandlerContext,
    /// Arguments bound from the method's command or capture condition.
    pub args: Args,
}

// ============================================================================
// HandlerResponse - Handle handler return values
// ============================================================================

/// Turns a handler's return value into its effect.
#[async_trait]
pub trait HandlerResponse: Send {
    async fn into_response(self, ctx: &HandlerContext) -> anyhow::Result<()>;
}

#[async_trait]
impl HandlerResponse for () {
    async fn into_response(self, _ctx: &HandlerContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl HandlerResponse for String {
    async fn into_response(self, ctx: &HandlerContext) -> anyhow::Result<()> {
        ctx.reply(self).await?;
        Ok(())
    }
}

#[async_trait]
impl HandlerResponse for &'static str {
    async fn into_response(self, ctx: &HandlerContext) -> anyhow::Result<()> {
        ctx.reply(self).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: HandlerResponse> HandlerResponse for Option<T> {
    async fn into_response(self, ctx: &HandlerContext) -> anyhow::Result<()> {
        match self {
            Some(t) => t.into_response(ctx).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T, E> HandlerResponse for Result<T, E>
where
    T: HandlerResponse,
    E: Into<anyhow::Error> + Send,
{
    async fn into_response(self, ctx: &HandlerContext) -> anyhow::Result<()> {
        match self {
            Ok(t) => t.into_response(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

/// A text response with an optional keyboard.
///
/// Sent as a new message by default; [`Reply::edit`] edits the message the
/// update belongs to instead (falling back to sending for plain messages).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
    pub edit: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
            edit: false,
        }
    }

    pub fn keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub fn edit(mut self) -> Self {
        self.edit = true;
        self
    }
}

#[async_trait]
impl HandlerResponse for Reply {
    async fn into_response(self, ctx: &HandlerContext) -> anyhow::Result<()> {
        if self.edit {
            ctx.edit_or_send(self.text, self.keyboard.as_ref()).await?;
        } else {
            ctx.reply_with(self.text, self.keyboard.as_ref()).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// An async function usable as a method body.
///
/// `T` is the tuple of extractor types; it only exists to keep the blanket
/// implementations apart.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    async fn call(self, inv: Invocation) -> anyhow::Result<()>;
}

// ============================================================================
// BoxedMethod - Type-erased handler stored in entries
// ============================================================================

pub type BoxedMethod =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Erases a handler's extractor types.
pub fn into_method<H, T>(handler: H) -> BoxedMethod
where
    H: Handler<T>,
    T: 'static,
{
    Arc::new(move |inv| {
        let handler = handler.clone();
        handler.call(inv)
    })
}

// ============================================================================
// Handler implementations for functions
// ============================================================================

macro_rules! impl_handler {
    ($($ty:ident),*) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, R, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: HandlerResponse + 'static,
            $( $ty: FromInvocation + Send + 'static, )*
        {
            async fn call(self, inv: Invocation) -> anyhow::Result<()> {
                $(
                    let $ty = $ty::from_invocation(&inv)?;
                )*
                let response = (self)($($ty,)*).await;
                response.into_response(&inv.ctx).await
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
