//! Runtime orchestration.
//!
//! [`SwitchyardRuntime`] ties configuration, logging and the dispatcher
//! together and drives the receive loop over an [`UpdateSource`].
//!
//! ```rust,ignore
//! use switchyard_runtime::SwitchyardRuntime;
//!
//! let runtime = SwitchyardRuntime::builder()
//!     .register(main_menu())
//!     .register_as("settings", settings_menu())
//!     .build()?;
//!
//! // Runs until the source ends or Ctrl+C, then waits for running methods.
//! let stats = runtime.run(source).await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use switchyard_core::{BoxedPlatform, BoxedStateStore, Update};
use switchyard_framework::{
    CommandErrorHandler, Condition, CustomMapper, DispatchError, Dispatcher, DispatcherBuilder,
    ErrorHandler, ErrorSource, HandlerEntry, Outcome,
};
use tokio::signal;
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigLoader, SwitchyardConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::source::UpdateSource;

/// Counters collected by one run of the receive loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub received: u64,
    pub completed: u64,
    pub scheduled: u64,
    pub filtered: u64,
    pub declined: u64,
    pub suppressed: u64,
    pub not_found: u64,
    pub failed: u64,
    pub source_errors: u64,
}

impl RuntimeStats {
    fn record(&mut self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Completed => &mut self.completed,
            Outcome::Scheduled => &mut self.scheduled,
            Outcome::Filtered => &mut self.filtered,
            Outcome::Declined => &mut self.declined,
            Outcome::Suppressed => &mut self.suppressed,
            Outcome::NotFound => &mut self.not_found,
            Outcome::Failed => &mut self.failed,
        };
        *counter += 1;
    }
}

/// Configured dispatcher plus the receive loop that feeds it.
pub struct SwitchyardRuntime {
    config: SwitchyardConfig,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
}

impl SwitchyardRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &SwitchyardConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Receives updates until the source ends or a shutdown signal (Ctrl+C,
    /// or SIGTERM on unix) arrives.
    pub async fn run<S: UpdateSource>(&self, source: S) -> RuntimeResult<RuntimeStats> {
        self.run_until(source, shutdown_signal()).await
    }

    /// Receives updates until the source ends or `shutdown` completes.
    ///
    /// Updates are dispatched in arrival order, so per-conversation ordering
    /// is preserved. After the loop stops, no further updates are taken and
    /// the call waits for every scheduled method to finish.
    pub async fn run_until<S, F>(&self, mut source: S, shutdown: F) -> RuntimeResult<RuntimeStats>
    where
        S: UpdateSource,
        F: Future<Output = ()>,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyRunning);
        }
        let _running = RunningGuard(Arc::clone(&self.running));

        let platform = source.platform();
        info!(platform = platform.id(), "Receiving updates");

        let mut stats = RuntimeStats::default();
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                next = source.next_update() => next,
            };

            match next {
                Ok(Some(update)) => {
                    stats.received += 1;
                    let outcome = self.dispatch(update, &platform).await;
                    stats.record(outcome);
                }
                Ok(None) => {
                    info!("Update source ended");
                    break;
                }
                Err(err) => {
                    stats.source_errors += 1;
                    self.dispatcher
                        .report(&platform, &DispatchError::Source(err), ErrorSource::Source)
                        .await;
                }
            }
        }

        debug!("Waiting for running methods");
        self.dispatcher.drain().await;
        info!(
            received = stats.received,
            failed = stats.failed,
            source_errors = stats.source_errors,
            "Runtime stopped"
        );
        Ok(stats)
    }

    async fn dispatch(&self, update: Update, platform: &BoxedPlatform) -> Outcome {
        let update_id = update.id;
        let outcome = self.dispatcher.dispatch(update, Arc::clone(platform)).await;
        trace!(update_id, ?outcome, "Update dispatched");
        outcome
    }
}

impl fmt::Debug for SwitchyardRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchyardRuntime")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("running", &self.is_running())
            .finish()
    }
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Completes on Ctrl+C or SIGTERM. Never completes if no signal can be
/// registered.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to register SIGTERM handler");
                    futures::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            () = ctrl_c => info!("Received Ctrl+C, shutting down"),
            () = terminate => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("Received Ctrl+C, shutting down");
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`SwitchyardRuntime`].
///
/// Configuration is loaded when [`build`](Self::build) runs; the `[dispatch]`
/// section replaces any options set on the dispatcher builder.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<SwitchyardConfig>,
    dispatcher: DispatcherBuilder,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            dispatcher: DispatcherBuilder::default(),
            init_logging: true,
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges programmatic values under files and environment variables.
    pub fn merge(mut self, config: SwitchyardConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is, skipping file and environment loading.
    pub fn config(mut self, config: SwitchyardConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Leaves subscriber installation to the caller.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn register(mut self, entry: HandlerEntry) -> Self {
        self.dispatcher = self.dispatcher.register(entry);
        self
    }

    pub fn register_as(mut self, id: impl Into<String>, entry: HandlerEntry) -> Self {
        self.dispatcher = self.dispatcher.register_as(id, entry);
        self
    }

    pub fn filter(mut self, filter: Condition) -> Self {
        self.dispatcher = self.dispatcher.filter(filter);
        self
    }

    pub fn store(mut self, store: BoxedStateStore) -> Self {
        self.dispatcher = self.dispatcher.store(store);
        self
    }

    pub fn map_type<M: CustomMapper>(mut self, mapper: M) -> RuntimeResult<Self> {
        self.dispatcher = self.dispatcher.map_type(mapper)?;
        Ok(self)
    }

    pub fn on_error(mut self, handler: impl ErrorHandler) -> Self {
        self.dispatcher = self.dispatcher.on_error(handler);
        self
    }

    pub fn on_command_error(mut self, handler: impl CommandErrorHandler) -> Self {
        self.dispatcher = self.dispatcher.on_command_error(handler);
        self
    }

    /// Applies arbitrary changes to the dispatcher builder.
    pub fn configure_dispatcher(
        mut self,
        f: impl FnOnce(DispatcherBuilder) -> DispatcherBuilder,
    ) -> Self {
        self.dispatcher = f(self.dispatcher);
        self
    }

    /// Loads configuration, installs logging and builds the dispatcher.
    pub fn build(self) -> RuntimeResult<SwitchyardRuntime> {
        let config = match self.config {
            Some(config) => {
                crate::config::validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let dispatcher = self.dispatcher.options(config.dispatch.clone()).build()?;
        info!(
            entries = dispatcher.router().entries().len(),
            threading = ?config.dispatch.default_threading,
            log_level = %config.logging.level,
            "Runtime initialized"
        );

        Ok(SwitchyardRuntime {
            config,
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
