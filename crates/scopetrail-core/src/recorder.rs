use std::fmt::{Debug, Display};
use std::ops::{Deref, DerefMut};

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};
use serde_json::Value;

use crate::{Entries, EntryKey, TrailError};

/// Operations seen by [`Recorder::scoped_call`], grouped by the type name of
/// their target.
pub type Instrumented = IndexMap<String, IndexSet<String>>;

/// Outcome of [`Recorder::push_scope`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[must_use]
pub enum Pushed {
    Recording,
    NotRecording,
}

/// Builds the conventional `"<identity>.<operation>"` scope label.
#[must_use]
pub fn scope_label(identity: impl Display, operation: &str) -> String {
    format!("{identity}.{operation}")
}

#[derive(Debug)]
struct Scope {
    // None only for the root.
    label: Option<String>,
    path: Vec<String>,
    entries: Entries,
}

impl Scope {
    fn root() -> Self {
        Self {
            label: None,
            path: Vec::new(),
            entries: Entries::new(),
        }
    }
}

#[derive(Debug)]
struct Context {
    stack: Vec<Scope>,
    depth: usize,
    live: bool,
}

impl Context {
    fn root_mut(&mut self) -> &mut Scope {
        if self.stack.is_empty() {
            self.stack.push(Scope::root());
        }
        &mut self.stack[0]
    }

    fn top_mut(&mut self) -> &mut Scope {
        if self.stack.is_empty() {
            self.stack.push(Scope::root());
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn pop_merge(&mut self) -> Result<(), TrailError> {
        if self.stack.len() <= 1 {
            return Err(TrailError::ScopeUnderflow {
                path: self.stack.last().map(|s| s.path.clone()).unwrap_or_default(),
            });
        }
        let Some(scope) = self.stack.pop() else {
            return Err(TrailError::ScopeUnderflow { path: Vec::new() });
        };
        let label = scope.label.unwrap_or_default();
        debug!(
            "pop scope `{label}` ({} entries) at depth {}",
            scope.entries.len(),
            self.stack.len()
        );
        self.top_mut().entries.merge_prefixed(&label, scope.entries);
        Ok(())
    }
}

/// Stack of recording scopes for one logical thread of execution.
///
/// Nothing is recorded until [`activate`](Self::activate) is called; while
/// inactive, [`record`](Self::record) and [`push_scope`](Self::push_scope)
/// are no-ops so instrumented code can stay in place.
#[derive(Debug, Default)]
pub struct Recorder {
    context: Option<Context>,
    instrumented: Instrumented,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session, or joins the running one when already active.
    ///
    /// Returns the entries merged into the root so far.
    pub fn activate(&mut self) -> &Entries {
        let context = self.context.get_or_insert_with(|| Context {
            stack: vec![Scope::root()],
            depth: 0,
            live: true,
        });
        context.depth += 1;
        debug!("activate recording (depth {})", context.depth);
        &context.root_mut().entries
    }

    /// Leaves one activation level.
    ///
    /// Returns the final root entries when the outermost activation ends and
    /// `None` otherwise, including when nothing was active.
    pub fn deactivate(&mut self) -> Option<Entries> {
        let context = self.context.as_mut()?;
        context.depth = context.depth.saturating_sub(1);
        debug!("deactivate recording (depth {})", context.depth);
        if context.depth > 0 {
            return None;
        }

        let mut context = self.context.take()?;
        if context.stack.len() > 1 {
            warn!(
                "recording ended with {} unpopped scope(s); merging them into the root",
                context.stack.len() - 1
            );
            while context.stack.len() > 1 {
                if let Err(err) = context.pop_merge() {
                    warn!("failed to merge scope: {err}");
                    break;
                }
            }
        }
        context.stack.pop().map(|root| root.entries)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }

    /// Active and not paused.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.context.as_ref().is_some_and(|c| c.live)
    }

    /// Number of nested activations currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.context.as_ref().map_or(0, |c| c.depth)
    }

    /// Labels of the open scopes, outermost first.
    #[must_use]
    pub fn current_path(&self) -> &[String] {
        self.context
            .as_ref()
            .and_then(|c| c.stack.last())
            .map(|scope| scope.path.as_slice())
            .unwrap_or_default()
    }

    /// Stops accepting entries without discarding the session.
    pub fn pause(&mut self) {
        if let Some(context) = self.context.as_mut() {
            context.live = false;
        }
    }

    pub fn resume(&mut self) {
        if let Some(context) = self.context.as_mut() {
            context.live = true;
        }
    }

    /// Entries merged into the root scope so far.
    #[must_use]
    pub fn entries(&self) -> Option<&Entries> {
        self.context
            .as_ref()
            .and_then(|c| c.stack.first())
            .map(|root| &root.entries)
    }

    /// Clears the root scope's entries. Open scopes are kept.
    pub fn clear(&mut self) {
        if let Some(root) = self.context.as_mut().and_then(|c| c.stack.first_mut()) {
            root.entries.clear();
        }
    }

    /// Everything recorded so far, merged as if every open scope were popped now.
    #[must_use]
    pub fn snapshot(&self) -> Entries {
        let Some(context) = self.context.as_ref() else {
            return Entries::new();
        };

        let mut pending: Option<(&str, Entries)> = None;
        for scope in context.stack.iter().rev() {
            let mut level = scope.entries.clone();
            if let Some((label, child)) = pending.take() {
                level.merge_prefixed(label, child);
            }
            match scope.label.as_deref() {
                Some(label) => pending = Some((label, level)),
                None => return level,
            }
        }
        Entries::new()
    }

    /// Opens a nested scope labelled `label`.
    ///
    /// The label should be non-empty: [`build_tree`](crate::build_tree)
    /// rejects entries under an empty scope label.
    pub fn push_scope(&mut self, label: impl Into<String>) -> Pushed {
        let Some(context) = self.context.as_mut().filter(|c| c.live) else {
            return Pushed::NotRecording;
        };
        let label = label.into();
        let mut path = context.top_mut().path.clone();
        path.push(label.clone());
        debug!("push scope `{label}` at depth {}", context.stack.len());
        context.stack.push(Scope {
            label: Some(label),
            path,
            entries: Entries::new(),
        });
        Pushed::Recording
    }

    /// Pops the innermost scope and merges its entries into its parent,
    /// prefixed with the popped scope's label.
    ///
    /// # Errors
    /// Returns [`TrailError::ScopeUnderflow`] when only the root scope is left.
    /// Without an active session there is no stack and the call returns
    /// `Ok(())`, matching the [`Pushed::NotRecording`] result of a
    /// [`push_scope`](Self::push_scope) made in the same state. Callers pairing
    /// raw pushes and pops should pop only after [`Pushed::Recording`].
    pub fn pop_scope(&mut self) -> Result<(), TrailError> {
        match self.context.as_mut() {
            Some(context) => context.pop_merge(),
            None => Ok(()),
        }
    }

    /// Records each `field -> value` pair in the innermost scope.
    pub fn record<I, K, V>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let Some(context) = self.context.as_mut().filter(|c| c.live) else {
            return;
        };
        let scope = context.top_mut();
        for (field, value) in fields {
            scope.entries.insert(EntryKey::field(field), value.into());
        }
    }

    /// Activates and returns a guard that deactivates when dropped.
    pub fn session(&mut self) -> Session<'_> {
        self.activate();
        Session {
            recorder: self,
            done: false,
        }
    }

    /// Pushes `label` and returns a guard that pops it when dropped.
    pub fn enter(&mut self, label: impl Into<String>) -> ScopeGuard<'_> {
        let pushed = self.push_scope(label);
        ScopeGuard {
            recorder: self,
            pushed,
            done: false,
        }
    }

    /// Runs `f` inside a scope labelled `label`.
    ///
    /// The scope is popped on every exit path of `f`, including unwinding.
    ///
    /// # Errors
    /// Returns [`TrailError::ScopeUnderflow`] when `f` popped more scopes than
    /// it pushed.
    pub fn scoped<T>(
        &mut self,
        label: impl Into<String>,
        f: impl FnOnce(&mut Recorder) -> T,
    ) -> Result<T, TrailError> {
        let mut guard = self.enter(label);
        let output = f(&mut *guard);
        guard.exit()?;
        Ok(output)
    }

    /// Like [`scoped`](Self::scoped) with the label derived from `target`'s
    /// `Debug` form and `operation`. The operation is registered under the
    /// target's type name whether or not recording is active.
    ///
    /// # Errors
    /// See [`scoped`](Self::scoped).
    pub fn scoped_call<R, T>(
        &mut self,
        target: &R,
        operation: &str,
        f: impl FnOnce(&mut Recorder) -> T,
    ) -> Result<T, TrailError>
    where
        R: Debug + ?Sized,
    {
        self.register(std::any::type_name::<R>(), operation);
        self.scoped(scope_label(format_args!("{target:?}"), operation), f)
    }

    /// Notes that `operation` of `origin` is instrumented.
    pub fn register(&mut self, origin: &str, operation: &str) {
        if let Some(operations) = self.instrumented.get_mut(origin) {
            operations.insert(operation.to_string());
        } else {
            self.instrumented.insert(
                origin.to_string(),
                IndexSet::from([operation.to_string()]),
            );
        }
    }

    #[must_use]
    pub fn instrumented(&self) -> &Instrumented {
        &self.instrumented
    }
}

/// Guard returned by [`Recorder::session`].
#[must_use]
pub struct Session<'a> {
    recorder: &'a mut Recorder,
    done: bool,
}

impl Session<'_> {
    /// Deactivates and returns the final entries if this was the outermost
    /// activation.
    pub fn finish(mut self) -> Option<Entries> {
        self.done = true;
        self.recorder.deactivate()
    }
}

impl Deref for Session<'_> {
    type Target = Recorder;

    fn deref(&self) -> &Recorder {
        self.recorder
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Recorder {
        self.recorder
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.done && self.recorder.deactivate().is_some() {
            debug!("recording session dropped without finish; entries discarded");
        }
    }
}

/// Guard returned by [`Recorder::enter`].
#[must_use]
pub struct ScopeGuard<'a> {
    recorder: &'a mut Recorder,
    pushed: Pushed,
    done: bool,
}

impl ScopeGuard<'_> {
    #[must_use]
    pub fn pushed(&self) -> Pushed {
        self.pushed
    }

    /// Pops the scope now.
    ///
    /// # Errors
    /// Returns [`TrailError::ScopeUnderflow`] when the scope was already
    /// popped by someone else.
    pub fn exit(mut self) -> Result<(), TrailError> {
        self.done = true;
        match self.pushed {
            Pushed::Recording => self.recorder.pop_scope(),
            Pushed::NotRecording => Ok(()),
        }
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Recorder;

    fn deref(&self) -> &Recorder {
        self.recorder
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Recorder {
        self.recorder
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if self.done || self.pushed == Pushed::NotRecording {
            return;
        }
        if let Err(err) = self.recorder.pop_scope() {
            warn!("scope guard could not pop: {err}");
        }
    }
}
