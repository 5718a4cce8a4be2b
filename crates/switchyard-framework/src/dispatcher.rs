//! Update dispatcher for the Switchyard framework.
//!
//! The [`Dispatcher`] owns the handler registry and everything needed to run
//! an update through it:
//!
//! 1. The conversation state is loaded (with carry-forward).
//! 2. The [`Router`] resolves a method, or the update is filtered, declined
//!    or reported as unroutable.
//! 3. Button presses are acknowledged unless the method opts out.
//! 4. The method is submitted to the [`Scheduler`] under its threading
//!    policy. The scheduled job reloads the state, so a job queued behind
//!    another of the same key sees its saved changes, then binds arguments,
//!    runs the method and auto-saves.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::builder()
//!     .register(
//!         HandlerEntry::new("main")
//!             .private_only()
//!             .method(Method::new("start", start).when(Condition::command("start")))
//!             .method(Method::new("fallback", fallback).as_default()),
//!     )
//!     .default_threading(Threading::PerUser)
//!     .build()?;
//!
//! dispatcher.dispatch(update, platform).await;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use switchyard_core::{BoxedPlatform, BoxedStateStore, MemoryStateStore, Update};
use tracing::{Instrument, Level, debug, error, span, trace, warn};

use crate::command::CommandInfo;
use crate::condition::{Condition, MatchContext};
use crate::context::HandlerContext;
use crate::entry::{HandlerEntry, Method};
use crate::error::{
    BindError, CommandBindError, DefinitionError, DispatchError, DispatchResult, ExtractError,
    MapError,
};
use crate::handler::Invocation;
use crate::mapper::{Args, CustomMapper, TypeMapper};
use crate::router::{Resolution, Route, Router};
use crate::scheduler::{Completion, Execution, Job, Placement, Scheduler, Threading};

// ============================================================================
// Options
// ============================================================================

/// Dispatcher-wide behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchOptions {
    /// Threading for methods and entries that do not set their own.
    pub default_threading: Threading,
    /// Acknowledge button presses before the method runs.
    pub answer_callbacks: bool,
    /// Treat every entry as private-only when falling back to defaults.
    pub private_only: bool,
    /// Persist a changed state after the method returns.
    pub auto_save: bool,
    /// Username for `/command@username` routing; defaults to the platform's.
    pub bot_username: Option<String>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            default_threading: Threading::default(),
            answer_callbacks: true,
            private_only: false,
            auto_save: true,
            bot_username: None,
        }
    }
}

// ============================================================================
// Error collaborators
// ============================================================================

/// Where an error reported to an [`ErrorHandler`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// Loading state, resolving or acknowledging an update.
    Dispatch,
    /// Running a scheduled method.
    Execution,
    /// Receiving updates from the platform.
    Source,
}

/// Receives every error except command binding failures.
#[async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    async fn handle(&self, platform: &BoxedPlatform, error: &DispatchError, source: ErrorSource);
}

/// Receives command argument binding failures.
///
/// Errors handled here never reach the [`ErrorHandler`].
#[async_trait]
pub trait CommandErrorHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &HandlerContext, error: &CommandBindError, command: &CommandInfo);
}

/// Default collaborator that logs errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrors;

#[async_trait]
impl ErrorHandler for LogErrors {
    async fn handle(&self, platform: &BoxedPlatform, error: &DispatchError, source: ErrorSource) {
        match error {
            DispatchError::NoHandler(_) => {
                warn!(platform = platform.id(), ?source, "{error}");
            }
            _ => error!(platform = platform.id(), ?source, "{error}"),
        }
    }
}

#[async_trait]
impl CommandErrorHandler for LogErrors {
    async fn handle(&self, ctx: &HandlerContext, error: &CommandBindError, command: &CommandInfo) {
        warn!(
            chat_id = ?ctx.chat_id(),
            command = %command.name,
            usage = %command.usage(),
            "{error}"
        );
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// What happened to a dispatched update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The method ran to completion on the caller.
    Completed,
    /// The method was handed to a worker or task.
    Scheduled,
    /// A global filter dropped the update.
    Filtered,
    /// The update matched nothing and was left unanswered.
    Declined,
    /// A command error was handled by the command-error collaborator.
    Suppressed,
    /// No handler could serve the update.
    NotFound,
    Failed,
}

// ============================================================================
// Engine
// ============================================================================

/// Shared dispatch machinery, also reachable from handler contexts.
pub(crate) struct Engine {
    pub(crate) router: Router,
    pub(crate) options: DispatchOptions,
    pub(crate) mapper: TypeMapper,
    pub(crate) store: BoxedStateStore,
    pub(crate) scheduler: Scheduler,
    pub(crate) errors: Arc<dyn ErrorHandler>,
    pub(crate) command_errors: Arc<dyn CommandErrorHandler>,
}

impl Engine {
    pub(crate) fn bot_username<'a>(&'a self, platform: &'a BoxedPlatform) -> Option<&'a str> {
        self.options
            .bot_username
            .as_deref()
            .or_else(|| platform.username())
    }

    fn bind_args(&self, ctx: &HandlerContext, method: &Method) -> Result<Args, BindError> {
        let state = ctx.state_snapshot();
        let cx = MatchContext {
            update: ctx.update(),
            state: &state,
            bot_username: self.bot_username(ctx.platform()),
        };
        method
            .conditions()
            .iter()
            .find_map(|condition| condition.extract(&cx, method.params(), &self.mapper))
            .unwrap_or_else(|| Ok(Args::default()))
    }

    /// Binds arguments, runs the method and auto-saves the state.
    pub(crate) async fn run_method(
        &self,
        ctx: HandlerContext,
        route: Route,
    ) -> DispatchResult<Completion> {
        let method = self.router.method(route);
        let args = match self.bind_args(&ctx, method) {
            Ok(args) => args,
            Err(BindError::Command(err)) => {
                let command = CommandInfo {
                    name: method.command_name().unwrap_or(method.name()).to_string(),
                    params: method.params().to_vec(),
                };
                debug!(method = method.name(), error = %err, "Command arguments rejected");
                self.command_errors.handle(&ctx, &err, &command).await;
                return Ok(Completion::Suppressed);
            }
            Err(BindError::Capture(err)) => return Err(err.into()),
        };

        trace!(method = method.name(), args = args.len(), "Invoking method");
        let handler = Arc::clone(method.handler());
        handler(Invocation {
            ctx: ctx.clone(),
            args,
        })
        .await
        .map_err(|source| match source.downcast::<ExtractError>() {
            Ok(err) => DispatchError::Extract(err),
            Err(source) => DispatchError::Handler {
                method: method.name().to_string(),
                source,
            },
        })?;

        if self.options.auto_save && ctx.is_dirty() {
            ctx.save_state().await?;
        }
        Ok(Completion::Done)
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes updates to registered methods.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) engine: Arc<Engine>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.engine.options
    }

    pub fn router(&self) -> &Router {
        &self.engine.router
    }

    pub fn store(&self) -> &BoxedStateStore {
        &self.engine.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.engine.scheduler
    }

    /// Reports an error raised outside dispatch, such as a failing update
    /// source.
    pub async fn report(&self, platform: &BoxedPlatform, error: &DispatchError, source: ErrorSource) {
        self.engine.errors.handle(platform, error, source).await;
    }

    /// Waits for every scheduled method to finish.
    pub async fn drain(&self) {
        self.engine.scheduler.drain().await;
    }

    /// Dispatches one update.
    ///
    /// Returns once the method has been scheduled, or has run for
    /// [`Threading::Disabled`].
    pub async fn dispatch(&self, update: Update, platform: BoxedPlatform) -> Outcome {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            update_id = update.id,
            kind = update.kind_name(),
            chat_id = ?update.chat_id(),
            user_id = ?update.user_id(),
        );
        self.dispatch_update(update, platform).instrument(span).await
    }

    async fn dispatch_update(&self, update: Update, platform: BoxedPlatform) -> Outcome {
        let engine = &self.engine;

        let state = match engine.store.state_for_event(&update).await {
            Ok(state) => state,
            Err(err) => {
                self.report(&platform, &err.into(), ErrorSource::Dispatch)
                    .await;
                return Outcome::Failed;
            }
        };

        let resolution = {
            let cx = MatchContext {
                update: &update,
                state: &state,
                bot_username: engine.bot_username(&platform),
            };
            engine.router.resolve(&cx, engine.options.private_only)
        };
        let route = match resolution {
            Ok(Resolution::Method(route)) => route,
            Ok(Resolution::Filtered) => return Outcome::Filtered,
            Ok(Resolution::Declined) => return Outcome::Declined,
            Err(err) => {
                self.report(&platform, &err.into(), ErrorSource::Dispatch)
                    .await;
                return Outcome::NotFound;
            }
        };

        let method = engine.router.method(route);
        let entry = &engine.router.entries()[route.entry];
        debug!(entry = entry.name(), method = method.name(), "Resolved method");

        if engine.options.answer_callbacks
            && !method.suppresses_auto_ack()
            && let Some(callback_id) = update.callback_id()
            && let Err(err) = platform.answer_callback(callback_id, None).await
        {
            self.report(&platform, &err.into(), ErrorSource::Dispatch)
                .await;
            return Outcome::Failed;
        }

        let threading = engine.router.threading(route, engine.options.default_threading);
        let (user_id, chat_id) = (update.user_id(), update.chat_id());
        // Only an inline run can reuse the routing snapshot. A scheduled job
        // may start after earlier jobs of its key saved, so it reloads.
        let snapshot = (threading == Threading::Disabled).then_some(state);

        let job_engine = Arc::clone(engine);
        let job_platform = Arc::clone(&platform);
        let errors = Arc::clone(&engine.errors);
        let job = Job::new(
            method.name(),
            async move {
                let state = match snapshot {
                    Some(state) => state,
                    None => job_engine.store.state_for_event(&update).await?,
                };
                let ctx = HandlerContext::new(
                    Arc::new(update),
                    job_platform,
                    Arc::new(Mutex::new(state)),
                    Arc::clone(&job_engine),
                    route.entry,
                );
                job_engine.run_method(ctx, route).await
            }
            .in_current_span(),
        )
        .on_error(move |err| async move {
            errors.handle(&platform, &err, ErrorSource::Execution).await;
        });

        match engine.scheduler.submit(threading, user_id, chat_id, job).await {
            Placement::Inline(Execution::Completed) => Outcome::Completed,
            Placement::Inline(Execution::Suppressed) => Outcome::Suppressed,
            Placement::Inline(Execution::Failed) => Outcome::Failed,
            placement => {
                trace!(?placement, ?threading, "Method scheduled");
                Outcome::Scheduled
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("entries", &self.engine.router.entries().len())
            .field("options", &self.engine.options)
            .field("scheduler", &self.engine.scheduler)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Registration surface for a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    entries: Vec<HandlerEntry>,
    filters: Vec<Condition>,
    options: DispatchOptions,
    mapper: TypeMapper,
    store: Option<BoxedStateStore>,
    errors: Option<Arc<dyn ErrorHandler>>,
    command_errors: Option<Arc<dyn CommandErrorHandler>>,
}

impl DispatcherBuilder {
    /// Registers an entry. Entries are tried in registration order.
    pub fn register(mut self, entry: HandlerEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Registers an entry under a scope id, replacing any id it carries.
    pub fn register_as(mut self, id: impl Into<String>, mut entry: HandlerEntry) -> Self {
        entry.set_scope_id(Some(id.into()));
        self.entries.push(entry);
        self
    }

    /// Replaces the global filters.
    pub fn global_filters(mut self, filters: Vec<Condition>) -> Self {
        self.filters = filters;
        self
    }

    /// Adds a global filter.
    pub fn filter(mut self, filter: Condition) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn default_threading(mut self, threading: Threading) -> Self {
        self.options.default_threading = threading;
        self
    }

    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(mut self, store: BoxedStateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn mapper(mut self, mapper: TypeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Registers a mapper for application types.
    pub fn map_type<M: CustomMapper>(mut self, mapper: M) -> Result<Self, MapError> {
        self.mapper.register(mapper)?;
        Ok(self)
    }

    pub fn on_error(mut self, handler: impl ErrorHandler) -> Self {
        self.errors = Some(Arc::new(handler));
        self
    }

    pub fn on_command_error(mut self, handler: impl CommandErrorHandler) -> Self {
        self.command_errors = Some(Arc::new(handler));
        self
    }

    /// Verifies every entry and builds the dispatcher.
    pub fn build(self) -> Result<Dispatcher, DefinitionError> {
        let mut scopes = HashSet::new();
        for entry in &self.entries {
            entry.verify(&self.mapper)?;
            if let Some(id) = entry.scope_id()
                && !scopes.insert(id)
            {
                return Err(DefinitionError::DuplicateScope(id.to_string()));
            }
        }
        for filter in &self.filters {
            if let Some(reason) = filter.selector().and_then(|s| s.compile_error()) {
                return Err(DefinitionError::InvalidPattern {
                    method: "<global filter>".to_string(),
                    pattern: filter
                        .selector()
                        .and_then(|s| s.pattern())
                        .unwrap_or_default()
                        .to_string(),
                    reason: reason.to_string(),
                });
            }
        }

        debug!(
            entries = self.entries.len(),
            filters = self.filters.len(),
            "Dispatcher built"
        );
        Ok(Dispatcher {
            engine: Arc::new(Engine {
                router: Router::new(self.entries, self.filters),
                options: self.options,
                mapper: self.mapper,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemoryStateStore::new())),
                scheduler: Scheduler::new(),
                errors: self.errors.unwrap_or_else(|| Arc::new(LogErrors)),
                command_errors: self.command_errors.unwrap_or_else(|| Arc::new(LogErrors)),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use switchyard_core::{
        Chat, ConversationState, Keyboard, Message, ScopeKey, StateStore, StoreError, StoreResult,
        UpdateKind, User,
    };

    use crate::condition::Selector;
    use crate::extractor::{Params, Text};
    use crate::mapper::Param;
    use crate::testing::{platform, press, text};

    // =========================================================================
    // Test doubles
    // =========================================================================

    #[derive(Clone, Default)]
    struct Collect {
        errors: Arc<Mutex<Vec<(String, ErrorSource)>>>,
        commands: Arc<Mutex<Vec<(usize, String)>>>,
    }

    #[async_trait]
    impl ErrorHandler for Collect {
        async fn handle(&self, _: &BoxedPlatform, error: &DispatchError, source: ErrorSource) {
            self.errors.lock().push((error.to_string(), source));
        }
    }

    #[async_trait]
    impl CommandErrorHandler for Collect {
        async fn handle(&self, ctx: &HandlerContext, error: &CommandBindError, info: &CommandInfo) {
            self.commands
                .lock()
                .push((error.parameter_index, info.usage()));
            let _ = ctx.reply(format!("Usage: {}", info.usage())).await;
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn fallback() -> &'static str {
        "fallback"
    }

    async fn echo(Text(text): Text) -> String {
        format!("echo: {}", text.strip_prefix("echo ").unwrap_or(&text))
    }

    async fn pick(Params((n,)): Params<(i64,)>) -> String {
        format!("picked {n}")
    }

    async fn args(Params((a, b)): Params<(i32, String)>) -> String {
        format!("a={a} b={b}")
    }

    async fn count(ctx: HandlerContext) -> anyhow::Result<()> {
        let seen: i64 = ctx.get_state("count")?.unwrap_or(0);
        ctx.set_state("count", &(seen + 1))?;
        Ok(())
    }

    async fn open_settings(ctx: HandlerContext) -> anyhow::Result<()> {
        ctx.change_handler(Some("settings"), true).await?;
        Ok(())
    }

    async fn settings_menu(ctx: HandlerContext) -> anyhow::Result<()> {
        let keyboard = ctx.reply_keyboard();
        ctx.reply_with("Settings", Some(&keyboard)).await?;
        Ok(())
    }

    async fn noop() {}

    async fn failing() -> anyhow::Result<()> {
        anyhow::bail!("database is down")
    }

    fn dispatcher(collect: &Collect) -> Dispatcher {
        Dispatcher::builder()
            .register(
                HandlerEntry::new("global")
                    .private_only()
                    .method(Method::new("echo", echo).when(Condition::text(Selector::starts_with("echo "))))
                    .method(
                        Method::new("args", args)
                            .when(Condition::command("args"))
                            .param(Param::of::<i32>("a"))
                            .param(Param::of::<String>("b")),
                    )
                    .method(
                        Method::new("pick", pick)
                            .when(Condition::text(Selector::capture(r"^pick (\d+)$")))
                            .param(Param::of::<i64>("n")),
                    )
                    .method(Method::new("count", count).when(Condition::text("count")))
                    .method(Method::new("open", open_settings).when(Condition::text("settings")))
                    .method(Method::new("boom", failing).when(Condition::text("boom")))
                    .method(Method::new("press", noop).when(Condition::button("ok")))
                    .method(
                        Method::new("manual", noop)
                            .when(Condition::button("manual"))
                            .suppress_auto_ack(),
                    )
                    .method(Method::new("fallback", fallback).as_default()),
            )
            .register_as(
                "settings",
                HandlerEntry::new("settings")
                    .private_only()
                    .method(Method::new("language", noop).when(Condition::text("Language\n")))
                    .method(Method::new("theme", noop).when(Condition::text("Theme")))
                    .method(Method::new("secret", noop).when(Condition::text("Secret").hidden()))
                    .method(
                        Method::new("admin", noop)
                            .when(Condition::text("Admin"))
                            .when(Condition::group()),
                    )
                    .method(Method::new("menu", settings_menu).as_default()),
            )
            .default_threading(Threading::Disabled)
            .on_error(collect.clone())
            .on_command_error(collect.clone())
            .build()
            .unwrap()
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn test_unmatched_text_runs_global_default() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        let outcome = dispatcher.dispatch(text(1, "hi"), platform).await;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(recorder.texts(), vec!["fallback"]);
        assert!(collect.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_extractors_and_string_response() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        dispatcher.dispatch(text(1, "echo ping"), platform.clone()).await;
        dispatcher.dispatch(text(2, "pick 42"), platform).await;
        assert_eq!(recorder.texts(), vec!["echo: ping", "picked 42"]);
    }

    #[tokio::test]
    async fn test_command_arguments_are_bound() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        let outcome = dispatcher.dispatch(text(1, "/args 5 hello"), platform).await;
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(recorder.texts(), vec!["a=5 b=hello"]);
    }

    #[tokio::test]
    async fn test_command_error_is_suppressed() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        let outcome = dispatcher
            .dispatch(text(1, "/args notanumber x"), platform)
            .await;
        assert_eq!(outcome, Outcome::Suppressed);
        assert_eq!(
            *collect.commands.lock(),
            vec![(0, "/args <a: i32> <b: string>".to_string())]
        );
        assert_eq!(recorder.texts(), vec!["Usage: /args <a: i32> <b: string>"]);
        assert!(collect.errors.lock().is_empty());
    }

    #[tokio::test]
    async fn test_state_is_saved_and_carried_forward() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (_, platform) = platform();

        dispatcher.dispatch(text(1, "count"), platform.clone()).await;
        dispatcher.dispatch(text(2, "count"), platform).await;

        let stored = dispatcher
            .store()
            .find(&ScopeKey::new(7, Some(7), 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get::<i64>("count").unwrap(), Some(2));
        assert!(!stored.is_dirty());
    }

    #[tokio::test]
    async fn test_change_handler_runs_default_with_menu() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        let outcome = dispatcher.dispatch(text(1, "settings"), platform).await;
        assert_eq!(outcome, Outcome::Completed);

        let sent = recorder.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Settings");
        assert_eq!(
            sent[0].2,
            Some(Keyboard::Reply {
                rows: vec![vec!["Language".to_string()], vec!["Theme".to_string()]],
            })
        );

        // The sent message carries the new active handler.
        let attached = dispatcher
            .store()
            .find(&ScopeKey::new(7, Some(7), 100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attached.handler_id.as_deref(), Some("settings"));
    }

    #[tokio::test]
    async fn test_active_handler_is_carried_forward() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        dispatcher.dispatch(text(1, "settings"), platform.clone()).await;
        // No record for message 200: it continues from the menu message.
        dispatcher.dispatch(text(200, "unknown"), platform).await;
        assert_eq!(recorder.texts(), vec!["Settings", "fallback"]);

        let reply = dispatcher
            .store()
            .find(&ScopeKey::new(7, Some(7), 101))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.handler_id.as_deref(), Some("settings"));
    }

    #[tokio::test]
    async fn test_button_presses_are_acknowledged() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        dispatcher.dispatch(press("ok"), platform.clone()).await;
        assert_eq!(*recorder.answered.lock(), vec!["cb-1".to_string()]);

        dispatcher.dispatch(press("manual"), platform).await;
        assert_eq!(recorder.answered.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_unroutable_press_is_reported() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (recorder, platform) = platform();

        let outcome = dispatcher.dispatch(press("nothing"), platform).await;
        assert_eq!(outcome, Outcome::NotFound);
        assert!(recorder.answered.lock().is_empty());

        let errors = collect.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, ErrorSource::Dispatch);
        assert!(errors[0].0.starts_with("no handler found"));
    }

    #[tokio::test]
    async fn test_handler_error_is_reported() {
        let collect = Collect::default();
        let dispatcher = dispatcher(&collect);
        let (_, platform) = platform();

        let outcome = dispatcher.dispatch(text(1, "boom"), platform).await;
        assert_eq!(outcome, Outcome::Failed);

        let errors = collect.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, ErrorSource::Execution);
        assert!(errors[0].0.contains("database is down"));
    }

    #[tokio::test]
    async fn test_global_filter() {
        let dispatcher = Dispatcher::builder()
            .filter(Condition::private())
            .register(HandlerEntry::new("any").method(Method::new("any", noop)))
            .build()
            .unwrap();
        let (_, platform) = platform();
        let update = Update::new(
            1,
            UpdateKind::Message(Message::text(1, Chat::group(-3), Some(User::new(7)), "hi")),
        );
        assert_eq!(dispatcher.dispatch(update, platform).await, Outcome::Filtered);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keyed_dispatch_is_scheduled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let dispatcher = Dispatcher::builder()
            .register(HandlerEntry::new("count").method(Method::new("count", move || {
                let seen = Arc::clone(&seen);
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })))
            .build()
            .unwrap();
        let (_, platform) = platform();

        for id in 1..=5 {
            let outcome = dispatcher.dispatch(text(id, "x"), platform.clone()).await;
            assert_eq!(outcome, Outcome::Scheduled);
        }
        dispatcher.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(dispatcher.scheduler().active_keys(), 0);
    }

    async fn slow_increment(ctx: HandlerContext) -> anyhow::Result<()> {
        let n: i64 = ctx.get_state("n")?.unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.set_state("n", &(n + 1))?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queued_jobs_see_earlier_writes() {
        let dispatcher = Dispatcher::builder()
            .register(
                HandlerEntry::new("counter")
                    .method(Method::new("inc", slow_increment).when(Condition::button("inc"))),
            )
            .default_threading(Threading::PerUser)
            .build()
            .unwrap();
        let (_, platform) = platform();

        for _ in 0..3 {
            let outcome = dispatcher.dispatch(press("inc"), platform.clone()).await;
            assert_eq!(outcome, Outcome::Scheduled);
        }
        dispatcher.drain().await;

        let stored = dispatcher
            .store()
            .find(&ScopeKey::new(7, Some(7), 100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get::<i64>("n").unwrap(), Some(3));
    }

    struct DownStore;

    #[async_trait]
    impl StateStore for DownStore {
        async fn find(&self, _: &ScopeKey) -> StoreResult<Option<ConversationState>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn find_latest(&self, _: &ScopeKey) -> StoreResult<Option<ConversationState>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn upsert(&self, _: &ConversationState) -> StoreResult<()> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let collect = Collect::default();
        let dispatcher = Dispatcher::builder()
            .register(HandlerEntry::new("any").method(Method::new("any", noop)))
            .store(Arc::new(DownStore))
            .on_error(collect.clone())
            .build()
            .unwrap();
        let (recorder, platform) = platform();

        let outcome = dispatcher.dispatch(text(1, "hi"), platform).await;
        assert_eq!(outcome, Outcome::Failed);
        assert!(recorder.texts().is_empty());

        let errors = collect.errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, ErrorSource::Dispatch);
        assert!(errors[0].0.contains("connection refused"));
    }

    #[test]
    fn test_duplicate_scope_is_rejected() {
        let result = Dispatcher::builder()
            .register_as("main", HandlerEntry::new("a"))
            .register_as("main", HandlerEntry::new("b"))
            .build();
        assert!(matches!(result, Err(DefinitionError::DuplicateScope(id)) if id == "main"));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: DispatchOptions =
            serde_json::from_str(r#"{"default_threading":"per-chat","auto_save":false}"#).unwrap();
        assert_eq!(options.default_threading, Threading::PerChat);
        assert!(!options.auto_save);
        assert!(options.answer_callbacks);
    }
}
