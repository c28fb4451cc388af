//! A [`Recorder`] bound to the current thread.
//!
//! Lets instrumented code call [`record`] without threading a handle through
//! every signature. Each thread gets its own recorder, so concurrent workers
//! never share a scope stack. The thread-local borrow is released while user
//! closures run, so they may record and open scopes themselves.

use std::cell::RefCell;
use std::fmt::Debug;

use serde_json::Value;

use crate::{Entries, Instrumented, Pushed, Recorder, TrailError};

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::new(Recorder::new());
}

/// Runs `f` with this thread's recorder.
///
/// # Panics
/// Panics if called re-entrantly from inside another `with_recorder` closure.
pub fn with_recorder<T>(f: impl FnOnce(&mut Recorder) -> T) -> T {
    RECORDER.with(|cell| f(&mut *cell.borrow_mut()))
}

// Instrumented helpers may run inside a `with_recorder` closure; while the
// recorder is borrowed their writes are dropped instead of panicking.
fn try_with_recorder<T>(f: impl FnOnce(&mut Recorder) -> T) -> Option<T> {
    RECORDER.with(|cell| cell.try_borrow_mut().ok().map(|mut rec| f(&mut *rec)))
}

pub fn activate() {
    with_recorder(|rec| {
        rec.activate();
    });
}

#[must_use]
pub fn deactivate() -> Option<Entries> {
    with_recorder(Recorder::deactivate)
}

#[must_use]
pub fn is_recording() -> bool {
    with_recorder(|rec| rec.is_recording())
}

pub fn record<I, K, V>(fields: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    if try_with_recorder(|rec| rec.record(fields)).is_none() {
        log::debug!("recorder busy; dropping fields");
    }
}

/// Returns [`Pushed::NotRecording`] when inactive or when the recorder is
/// already borrowed by an enclosing [`with_recorder`].
pub fn push_scope(label: impl Into<String>) -> Pushed {
    try_with_recorder(|rec| rec.push_scope(label)).unwrap_or(Pushed::NotRecording)
}

/// # Errors
/// See [`Recorder::pop_scope`].
pub fn pop_scope() -> Result<(), TrailError> {
    with_recorder(Recorder::pop_scope)
}

#[must_use]
pub fn snapshot() -> Entries {
    with_recorder(|rec| rec.snapshot())
}

#[must_use]
pub fn instrumented() -> Instrumented {
    with_recorder(|rec| rec.instrumented().clone())
}

struct LocalScope {
    pushed: Pushed,
    done: bool,
}

impl LocalScope {
    fn enter(label: String) -> Self {
        Self {
            pushed: push_scope(label),
            done: false,
        }
    }

    fn exit(mut self) -> Result<(), TrailError> {
        self.done = true;
        match self.pushed {
            Pushed::Recording => pop_scope(),
            Pushed::NotRecording => Ok(()),
        }
    }
}

impl Drop for LocalScope {
    fn drop(&mut self) {
        if self.done || self.pushed == Pushed::NotRecording {
            return;
        }
        // Still borrowed when unwinding out of `with_recorder`; leave the
        // stack as is rather than panic inside drop.
        let popped = RECORDER.with(|cell| {
            cell.try_borrow_mut()
                .map(|mut rec| rec.pop_scope())
                .ok()
        });
        if let Some(Err(err)) = popped {
            log::warn!("scope guard could not pop: {err}");
        }
    }
}

/// Runs `f` inside a scope labelled `label` on this thread's recorder.
///
/// # Errors
/// Returns [`TrailError::ScopeUnderflow`] when `f` popped more scopes than it
/// pushed.
pub fn scoped<T>(label: impl Into<String>, f: impl FnOnce() -> T) -> Result<T, TrailError> {
    let scope = LocalScope::enter(label.into());
    let output = f();
    scope.exit()?;
    Ok(output)
}

/// [`Recorder::scoped_call`] on this thread's recorder.
///
/// # Errors
/// See [`scoped`].
pub fn scoped_call<R, T>(target: &R, operation: &str, f: impl FnOnce() -> T) -> Result<T, TrailError>
where
    R: Debug + ?Sized,
{
    with_recorder(|rec| rec.register(std::any::type_name::<R>(), operation));
    scoped(crate::scope_label(format_args!("{target:?}"), operation), f)
}

/// Activates, runs `f`, deactivates.
///
/// The final entries are returned when this call was the outermost
/// activation on the thread.
pub fn session<T>(f: impl FnOnce() -> T) -> (T, Option<Entries>) {
    struct Deactivate(bool);

    impl Drop for Deactivate {
        fn drop(&mut self) {
            if !self.0 {
                let _ = RECORDER.with(|cell| {
                    cell.try_borrow_mut().map(|mut rec| rec.deactivate()).ok()
                });
            }
        }
    }

    activate();
    let mut guard = Deactivate(false);
    let output = f();
    guard.0 = true;
    (output, deactivate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Foo(&'static str);

    impl Foo {
        fn bar(&self, baz: &str, barz: &str) -> (String, String) {
            match scoped_call(self, "bar", || {
                let (first, second) = self.do_something(baz, barz);
                record([("a_key", first.clone()), ("another_key", second.clone())]);
                (first, second)
            }) {
                Ok(values) => values,
                Err(err) => panic!("unbalanced scopes: {err}"),
            }
        }

        fn do_something(&self, baz: &str, barz: &str) -> (String, String) {
            match scoped_call(self, "do_something", || {
                record([("again_a_key", baz), ("so_creative", barz)]);
                ("That's".to_string(), "great".to_string())
            }) {
                Ok(values) => values,
                Err(err) => panic!("unbalanced scopes: {err}"),
            }
        }
    }

    #[test]
    fn thread_local_session_collects_nested_calls() {
        let (_, entries) = session(|| {
            let foo = Foo("Rom");
            foo.do_something("baz", "barz");
            foo.bar("baz", "barz");
        });
        let entries = match entries {
            Some(entries) => entries,
            None => panic!("session should be outermost"),
        };

        let bar = "Foo(\"Rom\").bar";
        let do_something = "Foo(\"Rom\").do_something";
        assert_eq!(entries.len(), 6);
        assert_eq!(entries.get(&[do_something, "again_a_key"]), Some(&json!("baz")));
        assert_eq!(entries.get(&[bar, "a_key"]), Some(&json!("That's")));
        assert_eq!(
            entries.get(&[bar, do_something, "so_creative"]),
            Some(&json!("barz"))
        );

        let origin = std::any::type_name::<Foo>();
        let registered = instrumented();
        let operations: Vec<&String> = match registered.get(origin) {
            Some(operations) => operations.iter().collect(),
            None => panic!("missing origin {origin}"),
        };
        assert_eq!(operations, ["do_something", "bar"]);
    }

    #[test]
    fn recording_outside_a_session_is_silent() {
        record([("ignored", 1)]);
        assert!(!is_recording());
        assert!(snapshot().is_empty());
        assert_eq!(deactivate(), None);
    }

    #[test]
    fn nested_sessions_compose() {
        let ((), outer) = session(|| {
            record([("outer", 1)]);
            let ((), inner) = session(|| record([("inner", 2)]));
            assert_eq!(inner, None);
            assert_eq!(snapshot().len(), 2);
        });
        assert_eq!(outer.map(|entries| entries.len()), Some(2));
    }

    #[test]
    fn threads_do_not_share_recorders() {
        activate();
        record([("main", 1)]);

        let other = std::thread::spawn(|| {
            record([("worker", 2)]);
            is_recording()
        })
        .join();
        assert!(matches!(other, Ok(false)));

        let entries = deactivate().unwrap_or_default();
        assert!(entries.contains(&["main"]));
        assert!(!entries.contains(&["worker"]));
    }

    #[test]
    fn helpers_inside_with_recorder_stay_quiet() {
        activate();
        let pushed = with_recorder(|rec| {
            rec.record([("outer", 1)]);
            record([("nested", 2)]);
            push_scope("nested")
        });
        assert_eq!(pushed, Pushed::NotRecording);
        assert!(with_recorder(|rec| rec.current_path().is_empty()));

        let entries = deactivate().unwrap_or_default();
        assert!(entries.contains(&["outer"]));
        assert!(!entries.contains(&["nested"]));
    }

    #[test]
    fn scoped_pops_after_panic() {
        activate();
        let unwound = std::panic::catch_unwind(|| {
            let _ = scoped("A", || panic!("boom"));
        });
        assert!(unwound.is_err());
        assert!(with_recorder(|rec| rec.current_path().is_empty()));
        let _ = deactivate();
    }
}
