//! The layout algorithm abstraction.
//!
//! A [`Layout`] is a cancellable, possibly iterative computation bound to one
//! graph component and the shared position mapping. The scheduler calls
//! [`Layout::execute`] once per pass; other threads may call
//! [`CancelFlag::cancel`] at any moment to make an in-flight iteration return
//! early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ComponentId;

/// Shared cooperative cancellation flag.
///
/// Cloning yields another handle to the same flag, so the scheduler can keep a
/// handle while the layout itself is busy on the worker thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How many times a layout wants to be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Iterations {
    /// Run exactly this many times. `Bounded(0)` means no work.
    Bounded(u32),
    /// Run until removed; convergence is reported through `should_pause`.
    Unbounded,
}

impl Iterations {
    /// Whether at least one more execution is wanted.
    pub fn has_remaining(self) -> bool {
        !matches!(self, Iterations::Bounded(0))
    }

    /// Count one execution.
    pub fn decrement(&mut self) {
        if let Iterations::Bounded(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

impl Default for Iterations {
    fn default() -> Self {
        Iterations::Bounded(1)
    }
}

/// A cancellable computation over one graph component.
///
/// Implementors provide [`Layout::execute_real`]; that is the only place the
/// position mapping for the component's nodes may be written.
pub trait Layout: Send {
    /// The component this instance is bound to.
    fn component_id(&self) -> ComponentId;

    /// The instance's cancellation flag.
    fn cancel_flag(&self) -> &CancelFlag;

    /// Configured iteration count.
    fn iterations(&self) -> Iterations;

    /// Change the configured iteration count.
    fn set_iterations(&mut self, iterations: Iterations);

    /// Run one unit of work. Must check [`Layout::should_cancel`] at a fine
    /// enough granularity that cancellation is observed promptly.
    fn execute_real(&mut self);

    /// Clear any pending cancellation and run one unit of work.
    fn execute(&mut self) {
        self.cancel_flag().reset();
        self.execute_real();
    }

    /// Request that the running (or next) iteration stops early.
    fn cancel(&self) {
        self.cancel_flag().cancel();
    }

    fn should_cancel(&self) -> bool {
        self.cancel_flag().is_cancelled()
    }

    /// True when the layout has no useful work left, without being cancelled.
    fn should_pause(&self) -> bool {
        false
    }

    fn iterative(&self) -> bool {
        self.iterations() != Iterations::Bounded(1)
    }

    /// True once the algorithm considers its result final.
    fn finished(&self) -> bool {
        false
    }

    /// Leave the finished state, e.g. after the component's topology changed.
    fn unfinish(&mut self) {}

    /// Optional progress estimate in percent.
    fn progress(&self) -> Option<u8> {
        None
    }
}

/// Creates layout instances for components.
pub trait LayoutFactory: Send + Sync {
    /// Human readable algorithm name.
    fn name(&self) -> &str;

    /// Build an instance for a component, or `None` if the component is unknown.
    fn create(&self, component: ComponentId) -> Option<Box<dyn Layout>>;
}
