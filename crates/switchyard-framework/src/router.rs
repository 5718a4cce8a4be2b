//! Handler resolution.
//!
//! The [`Router`] picks the method that serves an update, given the
//! conversation state. Resolution is a pure function of the registry, the
//! update and the state:
//!
//! 1. Global filters are checked first; a failing filter drops the update.
//! 2. Entries are eligible when their scope id fits the conversation's active
//!    handler and their entry-level conditions match. They are scanned in
//!    registration order.
//! 3. The first non-default method whose conditions match, in the first
//!    entry that has one, wins.
//! 4. Otherwise, unless the update is a button press, the first eligible
//!    entry decides: a private-only entry answers with its matching default
//!    method, any other entry declines the update.
//! 5. If nothing resolved, resolution fails with [`NoHandlerError`].

use tracing::trace;

use crate::condition::{Condition, MatchContext};
use crate::entry::{HandlerEntry, Method};
use crate::error::NoHandlerError;
use crate::scheduler::Threading;

/// Position of a method in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    pub entry: usize,
    pub method: usize,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A global filter rejected the update.
    Filtered,
    /// The update matched nothing and the entry serving it does not answer
    /// unmatched updates.
    Declined,
    Method(Route),
}

/// Ordered handler registry.
#[derive(Debug, Clone, Default)]
pub struct Router {
    entries: Vec<HandlerEntry>,
    filters: Vec<Condition>,
}

impl Router {
    pub fn new(entries: Vec<HandlerEntry>, filters: Vec<Condition>) -> Self {
        Self { entries, filters }
    }

    pub fn entries(&self) -> &[HandlerEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> Option<&HandlerEntry> {
        self.entries.get(idx)
    }

    pub fn filters(&self) -> &[Condition] {
        &self.filters
    }

    /// Returns the method at `route`.
    ///
    /// # Panics
    ///
    /// Routes are only produced by this router, so an out-of-range route is
    /// a bug.
    pub fn method(&self, route: Route) -> &Method {
        &self.entries[route.entry].methods()[route.method]
    }

    /// Returns the index of the entry registered under `id`.
    pub fn find_by_scope(&self, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.scope_id() == Some(id))
    }

    /// Returns the index of the first entry that has a scope id.
    pub fn first_scoped(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.scope_id().is_some())
    }

    /// Effective threading for `route`: the method's override, then the
    /// entry's, then `fallback`.
    pub fn threading(&self, route: Route, fallback: Threading) -> Threading {
        let entry = &self.entries[route.entry];
        self.method(route)
            .threading_override()
            .or(entry.threading_override())
            .unwrap_or(fallback)
    }

    /// Resolves the method for an update.
    ///
    /// `private_only` is the dispatcher-wide counterpart of
    /// [`HandlerEntry::private_only`].
    pub fn resolve(
        &self,
        cx: &MatchContext<'_>,
        private_only: bool,
    ) -> Result<Resolution, NoHandlerError> {
        if !self.filters.iter().all(|filter| filter.matches(cx)) {
            trace!("Update rejected by global filters");
            return Ok(Resolution::Filtered);
        }

        let active = cx.state.handler_id.as_deref();
        let eligible: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_eligible(active) && entry.matches(cx))
            .map(|(idx, _)| idx)
            .collect();

        for &entry in &eligible {
            if let Some(method) = self.entries[entry].find_method(cx) {
                return Ok(Resolution::Method(Route { entry, method }));
            }
        }

        if !cx.update.is_callback() {
            for &entry in &eligible {
                let candidate = &self.entries[entry];
                if !candidate.is_private_only() && !private_only {
                    trace!(entry = candidate.name(), "Unmatched update declined");
                    return Ok(Resolution::Declined);
                }
                if let Some(method) = candidate.find_default(cx) {
                    return Ok(Resolution::Method(Route { entry, method }));
                }
            }
        }

        Err(NoHandlerError {
            update: Box::new(cx.update.clone()),
        })
    }
}
