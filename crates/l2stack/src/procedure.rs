//! Cooperative procedure scheduler.
//!
//! Used to serialize asynchronous control flow (attach, PLMN search, PDU-session
//! establishment — none implemented here, only the collaborator contracts they'd
//! plug into in `bearer.rs`) on a single logical thread, without blocking. The
//! RLC-AM/PDCP entities themselves are driven directly by
//! `read_pdu`/`write_pdu`/`step` and do not need this machinery; it exists for the
//! upper-layer control procedures that consume this stack.
//!
//! Built as owned Rust values in place of virtual-inheritance/`std::function`
//! callback trees:
//! - [`Outcome`] is the step result: yield, success, or error.
//! - [`Procedure`] is the `init`/`step`/`get_result` trio a procedure implements.
//! - [`Reactive<E>`] is the optional out-of-band event hook a procedure may add.
//! - [`CallbackGroup`] is a vector of closures with `{active, call_always}` flags,
//!   activated/deactivated by index.
//! - [`ProcFuture`] is a shared completion cell: a producer (the owning
//!   [`ProcManager`]) publishes into it once; any number of futures issued for the
//!   same run observe the same cell.

use std::cell::RefCell;
use std::rc::Rc;

/// Outcome of one `init`/`step`/`react` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The procedure performed work but has not completed.
    Yield,
    /// The procedure completed successfully.
    Success,
    /// The procedure completed unsuccessfully.
    Error,
}

/// The outcome of a completed (or still-pending) procedure run, as observed through
/// a [`ProcFuture`] or a `then` callback.
#[derive(Debug, Clone)]
pub enum ProcResult<T> {
    Pending,
    Value(T),
    Error,
}

impl<T> ProcResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcResult::Value(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ProcResult::Error)
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self, ProcResult::Pending)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            ProcResult::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// A resumable micro-procedure. `Args` are the parameters passed to `init`; `Output`
/// is produced on success and retrieved via `get_result`.
pub trait Procedure {
    type Args;
    type Output;

    fn init(&mut self, args: Self::Args) -> Outcome;
    fn step(&mut self) -> Outcome;

    /// Called exactly once, only after a `Success` outcome.
    fn get_result(&self) -> Self::Output;

    /// Optional completion hook run synchronously before `then`/`then_always`
    /// callbacks fire. Default is a no-op.
    fn then(&mut self, _result: &ProcResult<Self::Output>) {}
}

/// Optional capability: a procedure that can be externally triggered by an event of
/// type `E` while running. Not every procedure needs this, so it is a separate
/// trait rather than a required method.
pub trait Reactive<E> {
    fn react(&mut self, event: E) -> Outcome;
}

struct CallbackEntry<T> {
    active: bool,
    call_always: bool,
    func: Box<dyn FnMut(&ProcResult<T>)>,
}

/// Bundles several completion callbacks. Calling `fire` invokes every active
/// callback once; one-shot callbacks (`on_next`) then deactivate, persistent ones
/// (`on_every`) stay active. Active indices are snapshotted before iterating so a
/// callback cannot be re-entered mid-iteration by code it triggers.
#[derive(Default)]
pub struct CallbackGroup<T> {
    entries: Vec<CallbackEntry<T>>,
}

impl<T> CallbackGroup<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn on_next(&mut self, f: impl FnMut(&ProcResult<T>) + 'static) -> usize {
        self.push(f, false)
    }

    pub fn on_every(&mut self, f: impl FnMut(&ProcResult<T>) + 'static) -> usize {
        self.push(f, true)
    }

    fn push(&mut self, f: impl FnMut(&ProcResult<T>) + 'static, call_always: bool) -> usize {
        // reuse a deactivated slot first, so a busy group doesn't grow unboundedly.
        if let Some(idx) = self.entries.iter().position(|e| !e.active) {
            self.entries[idx] = CallbackEntry {
                active: true,
                call_always,
                func: Box::new(f),
            };
            return idx;
        }
        self.entries.push(CallbackEntry {
            active: true,
            call_always,
            func: Box::new(f),
        });
        self.entries.len() - 1
    }

    pub fn fire(&mut self, result: &ProcResult<T>) {
        let active: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.active)
            .map(|(i, _)| i)
            .collect();
        for idx in active {
            let call_always = self.entries[idx].call_always;
            (self.entries[idx].func)(result);
            if !call_always {
                self.entries[idx].active = false;
            }
        }
    }
}

/// A handle to a procedure run's eventual result, shared between however many
/// callers requested one via [`ProcManager::get_future`].
pub struct ProcFuture<T> {
    cell: Option<Rc<RefCell<ProcResult<T>>>>,
}

impl<T> ProcFuture<T> {
    fn empty() -> Self {
        Self { cell: None }
    }

    pub fn is_empty(&self) -> bool {
        self.cell.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.borrow().is_complete())
    }

    pub fn is_success(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.borrow().is_success())
    }

    pub fn is_error(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.borrow().is_error())
    }

    pub fn value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.cell.as_ref().and_then(|c| c.borrow().value().cloned())
    }
}

/// Owns one procedure instance and drives it through `launch`/`run`/`trigger`,
/// tracking busy/idle state.
pub struct ProcManager<P: Procedure> {
    proc: P,
    busy: bool,
    future: Option<Rc<RefCell<ProcResult<P::Output>>>>,
    callbacks: CallbackGroup<P::Output>,
}

impl<P: Procedure> ProcManager<P> {
    pub fn new(proc: P) -> Self {
        Self {
            proc,
            busy: false,
            future: None,
            callbacks: CallbackGroup::new(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_idle(&self) -> bool {
        !self.busy
    }

    /// Launches the procedure. A procedure may only be (re)launched once it has
    /// reached a terminal state; launching a busy procedure is a no-op returning
    /// `false`.
    pub fn launch(&mut self, args: P::Args) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        let outcome = self.proc.init(args);
        self.handle_outcome(outcome);
        outcome != Outcome::Error
    }

    /// Resumes a running procedure. Returns whether it is still busy afterward.
    pub fn run(&mut self) -> bool {
        if self.busy {
            let outcome = self.proc.step();
            self.handle_outcome(outcome);
        }
        self.busy
    }

    /// Delivers an external event. A no-op on an idle procedure.
    pub fn trigger<E>(&mut self, event: E) -> bool
    where
        P: Reactive<E>,
    {
        if self.busy {
            let outcome = self.proc.react(event);
            self.handle_outcome(outcome);
        }
        self.busy
    }

    /// Returns a future tracking this run's result. Empty if the procedure is idle.
    pub fn get_future(&mut self) -> ProcFuture<P::Output> {
        if !self.busy {
            return ProcFuture::empty();
        }
        let cell = self
            .future
            .get_or_insert_with(|| Rc::new(RefCell::new(ProcResult::Pending)));
        ProcFuture {
            cell: Some(Rc::clone(cell)),
        }
    }

    pub fn then(&mut self, f: impl FnMut(&ProcResult<P::Output>) + 'static) {
        self.callbacks.on_next(f);
    }

    pub fn then_always(&mut self, f: impl FnMut(&ProcResult<P::Output>) + 'static) {
        self.callbacks.on_every(f);
    }

    fn handle_outcome(&mut self, outcome: Outcome)
    where
        P::Output: Clone,
    {
        if outcome == Outcome::Yield {
            return;
        }
        self.busy = false;
        let result = if outcome == Outcome::Success {
            ProcResult::Value(self.proc.get_result())
        } else {
            ProcResult::Error
        };
        if let Some(cell) = self.future.take() {
            *cell.borrow_mut() = result.clone();
        }
        self.proc.then(&result);
        self.callbacks.fire(&result);
    }
}

/// Anything a [`ProcedureManager`] can drive generically, regardless of the
/// concrete procedure type, via type-erased storage.
pub trait Runnable {
    /// Returns whether the procedure is still busy after this call.
    fn run(&mut self) -> bool;
}

impl<P: Procedure> Runnable for ProcManager<P>
where
    P::Output: Clone,
{
    fn run(&mut self) -> bool {
        ProcManager::run(self)
    }
}

/// Runs every registered procedure's `step()` once per host tick and reaps the ones
/// that have reached a terminal state.
#[derive(Default)]
pub struct ProcedureManager {
    procs: Vec<Box<dyn Runnable>>,
}

impl ProcedureManager {
    pub fn new() -> Self {
        Self { procs: Vec::new() }
    }

    pub fn add(&mut self, proc: Box<dyn Runnable>) {
        self.procs.push(proc);
    }

    pub fn run_once(&mut self) {
        self.procs.retain_mut(|p| p.run());
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A toy procedure that yields `attempts` times before succeeding, used only to
    /// exercise the scheduler machinery.
    struct CountdownProcedure {
        remaining: u32,
    }

    impl Procedure for CountdownProcedure {
        type Args = u32;
        type Output = u32;

        fn init(&mut self, attempts: u32) -> Outcome {
            self.remaining = attempts;
            self.step()
        }

        fn step(&mut self) -> Outcome {
            if self.remaining == 0 {
                Outcome::Success
            } else {
                self.remaining -= 1;
                Outcome::Yield
            }
        }

        fn get_result(&self) -> u32 {
            0
        }
    }

    #[test]
    fn procedure_yields_then_succeeds() {
        let mut mgr = ProcManager::new(CountdownProcedure { remaining: 0 });
        assert!(mgr.launch(2));
        assert!(mgr.is_busy());
        assert!(mgr.run());
        assert!(!mgr.run());
        assert!(mgr.is_idle());
    }

    #[test]
    fn relaunch_while_busy_is_noop() {
        let mut mgr = ProcManager::new(CountdownProcedure { remaining: 0 });
        mgr.launch(5);
        assert!(!mgr.launch(1));
    }

    #[test]
    fn future_observes_completion() {
        let mut mgr = ProcManager::new(CountdownProcedure { remaining: 0 });
        mgr.launch(1);
        let fut = mgr.get_future();
        assert!(!fut.is_complete());
        mgr.run();
        assert!(fut.is_complete());
        assert!(fut.is_success());
    }

    #[test]
    fn trigger_on_idle_is_noop() {
        struct Reactor;
        impl Procedure for Reactor {
            type Args = ();
            type Output = ();
            fn init(&mut self, _: ()) -> Outcome {
                Outcome::Yield
            }
            fn step(&mut self) -> Outcome {
                Outcome::Yield
            }
            fn get_result(&self) {}
        }
        impl Reactive<u8> for Reactor {
            fn react(&mut self, _event: u8) -> Outcome {
                Outcome::Success
            }
        }

        let mut mgr = ProcManager::new(Reactor);
        assert!(mgr.is_idle());
        assert!(!mgr.trigger(1u8));
        assert!(mgr.is_idle());
    }

    #[test]
    fn then_callback_fires_once() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut mgr = ProcManager::new(CountdownProcedure { remaining: 0 });
        let calls = Rc::new(Cell::new(0));
        let calls_clone = Rc::clone(&calls);
        mgr.then(move |_| calls_clone.set(calls_clone.get() + 1));
        mgr.launch(0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn procedure_manager_reaps_completed() {
        let mut manager = ProcedureManager::new();
        manager.add(Box::new(ProcManager::new(CountdownProcedure { remaining: 0 })));
        let mut only = ProcManager::new(CountdownProcedure { remaining: 0 });
        only.launch(2);
        manager.add(Box::new(only));
        assert_eq!(manager.len(), 2);
        manager.run_once();
        assert_eq!(manager.len(), 1);
    }
}
