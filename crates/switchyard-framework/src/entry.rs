//! Handler registry entries.
//!
//! A [`HandlerEntry`] is one "screen" of a conversation: a named group of
//! [`Method`]s guarded by entry-level conditions. Entries with a scope id are
//! only eligible while the conversation's active handler is that id; entries
//! without one are global and eligible for every conversation.
//!
//! ```rust,ignore
//! let main = HandlerEntry::new("main")
//!     .scoped("main")
//!     .private_only()
//!     .method(Method::new("menu", show_menu).as_default())
//!     .method(Method::new("settings", settings).when(Condition::text("Settings")));
//! ```

use std::fmt;

use crate::condition::{Condition, MatchContext};
use crate::error::DefinitionError;
use crate::handler::{BoxedMethod, Handler, into_method};
use crate::mapper::{Param, TypeMapper};
use crate::scheduler::Threading;

// ============================================================================
// Method
// ============================================================================

/// A handler function together with the conditions that select it.
#[derive(Clone)]
pub struct Method {
    name: String,
    handler: BoxedMethod,
    conditions: Vec<Condition>,
    default: bool,
    suppress_auto_ack: bool,
    threading: Option<Threading>,
    params: Vec<Param>,
}

impl Method {
    pub fn new<H, T>(name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T>,
        T: 'static,
    {
        Self {
            name: name.into(),
            handler: into_method(handler),
            conditions: Vec::new(),
            default: false,
            suppress_auto_ack: false,
            threading: None,
            params: Vec::new(),
        }
    }

    /// Adds a condition. All conditions must match for the method to run.
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Marks the method as the entry's fallback.
    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    /// Leaves acknowledging button presses to the method itself.
    pub fn suppress_auto_ack(mut self) -> Self {
        self.suppress_auto_ack = true;
        self
    }

    /// Overrides the entry's threading policy.
    pub fn threading(mut self, threading: Threading) -> Self {
        self.threading = Some(threading);
        self
    }

    /// Declares the next positional parameter bound by a command or capture
    /// condition.
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &BoxedMethod {
        &self.handler
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_default(&self) -> bool {
        self.default
    }

    pub fn suppresses_auto_ack(&self) -> bool {
        self.suppress_auto_ack
    }

    pub fn threading_override(&self) -> Option<Threading> {
        self.threading
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Returns `true` if every method-level condition matches.
    pub fn matches(&self, cx: &MatchContext<'_>) -> bool {
        self.conditions.iter().all(|condition| condition.matches(cx))
    }

    /// Name of the first command condition, if the method is a command.
    pub fn command_name(&self) -> Option<&str> {
        self.conditions.iter().find_map(|condition| match condition {
            Condition::Command(spec) => Some(spec.name.as_str()),
            _ => None,
        })
    }

    /// Checks the method for definition defects.
    pub fn verify(&self, mapper: &TypeMapper) -> Result<(), DefinitionError> {
        for condition in &self.conditions {
            let Some(selector) = condition.selector() else {
                continue;
            };
            if let Some(reason) = selector.compile_error() {
                return Err(DefinitionError::InvalidPattern {
                    method: self.name.clone(),
                    pattern: selector.pattern().unwrap_or_default().to_string(),
                    reason: reason.to_string(),
                });
            }
            if let Some(captures) = selector.capture_count()
                && captures != self.params.len()
            {
                return Err(DefinitionError::ArityMismatch {
                    method: self.name.clone(),
                    captures,
                    params: self.params.len(),
                });
            }
        }

        let optional = self.params.iter().filter(|param| !param.required).count();
        if optional > 1 {
            return Err(DefinitionError::MultipleOptional {
                method: self.name.clone(),
            });
        }
        let last = self.params.len().saturating_sub(1);
        for (idx, param) in self.params.iter().enumerate() {
            if !param.required && idx != last {
                return Err(DefinitionError::OptionalNotLast {
                    method: self.name.clone(),
                    param: param.name.clone(),
                });
            }
            if !mapper.supports(&param.ty) {
                return Err(DefinitionError::UnmappedType {
                    method: self.name.clone(),
                    param: param.name.clone(),
                    ty: param.ty.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("conditions", &self.conditions)
            .field("default", &self.default)
            .field("suppress_auto_ack", &self.suppress_auto_ack)
            .field("threading", &self.threading)
            .field("params", &self.params)
            .finish()
    }
}

// ============================================================================
// HandlerEntry
// ============================================================================

/// A registered group of methods.
#[derive(Debug, Clone)]
pub struct HandlerEntry {
    name: String,
    scope_id: Option<String>,
    conditions: Vec<Condition>,
    private_only: bool,
    threading: Option<Threading>,
    methods: Vec<Method>,
}

impl HandlerEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope_id: None,
            conditions: Vec::new(),
            private_only: false,
            threading: None,
            methods: Vec::new(),
        }
    }

    /// Gives the entry a scope id, making it eligible only while it is the
    /// conversation's active handler.
    pub fn scoped(mut self, id: impl Into<String>) -> Self {
        self.scope_id = Some(id.into());
        self
    }

    /// Adds an entry-level condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Lets the entry's default method answer unmatched updates.
    ///
    /// Without this flag (or the dispatcher-wide `private_only` option) an
    /// update that matches no method is left unanswered.
    pub fn private_only(mut self) -> Self {
        self.private_only = true;
        self
    }

    pub fn threading(mut self, threading: Threading) -> Self {
        self.threading = Some(threading);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope_id(&self) -> Option<&str> {
        self.scope_id.as_deref()
    }

    pub(crate) fn set_scope_id(&mut self, id: Option<String>) {
        self.scope_id = id;
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_private_only(&self) -> bool {
        self.private_only
    }

    pub fn threading_override(&self) -> Option<Threading> {
        self.threading
    }

    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Returns `true` if the entry may serve a conversation whose active
    /// handler is `active`.
    pub fn is_eligible(&self, active: Option<&str>) -> bool {
        match (active, self.scope_id()) {
            (None, _) | (_, None) => true,
            (Some(active), Some(id)) => active == id,
        }
    }

    /// Returns `true` if every entry-level condition matches.
    pub fn matches(&self, cx: &MatchContext<'_>) -> bool {
        self.conditions.iter().all(|condition| condition.matches(cx))
    }

    /// Returns the index of the first non-default method that matches.
    pub fn find_method(&self, cx: &MatchContext<'_>) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| !method.is_default() && method.matches(cx))
    }

    /// Returns the index of the first default method that matches.
    pub fn find_default(&self, cx: &MatchContext<'_>) -> Option<usize> {
        self.methods
            .iter()
            .position(|method| method.is_default() && method.matches(cx))
    }

    /// Checks the entry and all its methods for definition defects.
    pub fn verify(&self, mapper: &TypeMapper) -> Result<(), DefinitionError> {
        for condition in &self.conditions {
            if let Some(selector) = condition.selector()
                && let Some(reason) = selector.compile_error()
            {
                return Err(DefinitionError::InvalidPattern {
                    method: self.name.clone(),
                    pattern: selector.pattern().unwrap_or_default().to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        self.methods
            .iter()
            .try_for_each(|method| method.verify(mapper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Selector;
    use crate::mapper::{Param, ParamType};

    async fn noop() {}

    #[test]
    fn test_capture_arity_mismatch() {
        let method = Method::new("pick", noop)
            .when(Condition::text(Selector::capture(r"^pick (\d+) (\w+)$")))
            .param(Param::of::<i32>("n"));
        let err = method.verify(&TypeMapper::new()).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::ArityMismatch {
                captures: 2,
                params: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_matching_capture_arity_verifies() {
        let method = Method::new("pick", noop)
            .when(Condition::text(Selector::capture(r"^pick (\d+) (\w+)$")))
            .param(Param::of::<i32>("n"))
            .param(Param::of::<String>("name"));
        assert!(method.verify(&TypeMapper::new()).is_ok());
    }

    #[test]
    fn test_optional_parameter_rules() {
        let mapper = TypeMapper::new();
        let two_optional = Method::new("opt", noop)
            .when(Condition::command("opt"))
            .param(Param::of::<Option<i32>>("a"))
            .param(Param::of::<Option<i32>>("b"));
        assert!(matches!(
            two_optional.verify(&mapper),
            Err(DefinitionError::MultipleOptional { .. })
        ));

        let optional_first = Method::new("opt", noop)
            .when(Condition::command("opt"))
            .param(Param::of::<Option<i32>>("a"))
            .param(Param::of::<i32>("b"));
        assert!(matches!(
            optional_first.verify(&mapper),
            Err(DefinitionError::OptionalNotLast { param, .. }) if param == "a"
        ));
    }

    #[test]
    fn test_unmapped_type() {
        let method = Method::new("paint", noop)
            .when(Condition::command("paint"))
            .param(Param::custom("color", "color"));
        let err = method.verify(&TypeMapper::new()).unwrap_err();
        assert!(matches!(err, DefinitionError::UnmappedType { ty, .. } if ty == "color"));
        assert_eq!(Param::custom("color", "color").ty, ParamType::Custom("color"));
    }

    #[test]
    fn test_invalid_pattern() {
        let entry = HandlerEntry::new("broken")
            .method(Method::new("bad", noop).when(Condition::text(Selector::regex("("))));
        assert!(matches!(
            entry.verify(&TypeMapper::new()),
            Err(DefinitionError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_eligibility() {
        let global = HandlerEntry::new("global");
        let scoped = HandlerEntry::new("settings").scoped("settings");

        assert!(global.is_eligible(None));
        assert!(global.is_eligible(Some("settings")));
        assert!(scoped.is_eligible(None));
        assert!(scoped.is_eligible(Some("settings")));
        assert!(!scoped.is_eligible(Some("main")));
    }
}
