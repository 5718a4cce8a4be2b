//! # Switchyard Framework
//!
//! Routing, scheduling and handler registration for conversational bots.
//!
//! This layer provides:
//! - Conditions and selectors that match updates ([`Condition`], [`Selector`])
//! - Handler entries and methods, registered through a builder
//!   ([`HandlerEntry`], [`Method`], [`DispatcherBuilder`])
//! - Deterministic first-match resolution over the registry ([`Router`])
//! - Per-conversation serialization of method executions ([`Scheduler`])
//! - Slash-command parsing and typed argument binding ([`Command`],
//!   [`TypeMapper`])
//! - Axum-style handlers with extractors ([`Handler`], [`FromInvocation`])
//!
//! Core types (updates, state, stores, platform clients) live in
//! `switchyard-core`.

pub mod command;
pub mod condition;
pub mod context;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod mapper;
pub mod router;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use command::{COMMAND_PREFIX, Command, CommandInfo, CommandSpec};
pub use condition::{Condition, MatchContext, MatchOp, Predicate, Selector};
pub use context::HandlerContext;
pub use dispatcher::{
    CommandErrorHandler, DispatchOptions, Dispatcher, DispatcherBuilder, ErrorHandler,
    ErrorSource, LogErrors, Outcome,
};
pub use entry::{HandlerEntry, Method};
pub use error::{
    BindError, CommandBindError, DefinitionError, DispatchError, DispatchResult, ExtractError,
    ExtractResult, MapError, NoHandlerError,
};
pub use extractor::{CallbackData, FromInvocation, Params, Text};
pub use handler::{BoxedMethod, Handler, HandlerResponse, Invocation, Reply, into_method};
pub use mapper::{Arg, Args, CoreMapper, CustomMapper, FromArg, Param, ParamType, TypeMapper};
pub use router::{Resolution, Route, Router};
pub use scheduler::{Completion, Execution, Job, LaneKey, Placement, Scheduler, Threading};
