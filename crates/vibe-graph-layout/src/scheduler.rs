//! The layout worker.
//!
//! [`LayoutThread`] owns one [`Layout`] per component and a single background
//! thread that executes them round-robin: every pass gives each component one
//! iteration, in insertion order, skipping layouts that report
//! [`Layout::should_pause`]. Clients pause, resume, add and remove components
//! from any thread.
//!
//! A layout is taken out of its slot while it executes, so the state lock is
//! never held during an iteration. Pausing cancels the in-flight iteration
//! through the slot's [`CancelFlag`] and the worker parks at the next
//! iteration boundary. When every layout with work left reports
//! [`Layout::should_pause`] the worker parks on its own; adding a component or
//! requesting [`LayoutThread::unfinish`] wakes it. When no layout has
//! iterations left the thread exits, and the next [`LayoutThread::add`]
//! starts a new one. [`LayoutThread::stop`] is final.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{LayoutError, LayoutResult};
use crate::events::{EventSink, LayoutEvent};
use crate::layout::{CancelFlag, Iterations, Layout, LayoutFactory};
use crate::ComponentId;

/// Coarse worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No worker thread is running.
    Idle,
    /// The worker is executing layouts.
    Running,
    /// The worker is parked.
    Paused,
    /// `stop` was called. Terminal.
    Stopped,
}

struct Slot {
    /// `None` while the worker executes it.
    layout: Option<Box<dyn Layout>>,
    cancel: CancelFlag,
    unfinish_requested: bool,
    executed: u64,
    last_progress: Option<u8>,
    complete_reported: bool,
    /// Initial count for bounded layouts that report no progress of their own.
    bounded_total: Option<u32>,
}

impl Slot {
    fn new(layout: Box<dyn Layout>) -> Self {
        let bounded_total = match layout.iterations() {
            Iterations::Bounded(n) => Some(n),
            Iterations::Unbounded => None,
        };
        Self {
            bounded_total,
            cancel: layout.cancel_flag().clone(),
            layout: Some(layout),
            unfinish_requested: false,
            executed: 0,
            last_progress: None,
            complete_reported: false,
        }
    }

    fn has_remaining(&self) -> bool {
        self.layout
            .as_ref()
            .is_some_and(|l| l.iterations().has_remaining())
    }

    fn wants_to_run(&self) -> bool {
        self.has_remaining()
            && (self.unfinish_requested || self.layout.as_ref().is_some_and(|l| !l.should_pause()))
    }
}

#[derive(Default)]
struct State {
    slots: IndexMap<ComponentId, Slot>,
    /// A client asked the worker to park.
    pause_requested: bool,
    /// `remove` calls waiting for the worker to park.
    removals: usize,
    /// The worker is parked.
    parked: bool,
    stop: bool,
    worker_alive: bool,
    /// Where an interrupted pass continues.
    cursor: Option<ComponentId>,
    handle: Option<JoinHandle<()>>,
}

impl State {
    fn has_work(&self) -> bool {
        self.slots.values().any(Slot::has_remaining)
    }

    /// Every layout with iterations left has converged.
    fn all_should_pause(&self) -> bool {
        !self.slots.values().any(Slot::wants_to_run)
    }

    /// The current pass must end at the next iteration boundary.
    fn interrupted(&self) -> bool {
        self.stop || self.pause_requested || self.removals > 0
    }

    fn must_park(&self) -> bool {
        self.pause_requested || self.removals > 0 || self.all_should_pause()
    }

    fn cancel_all(&self) {
        for slot in self.slots.values() {
            slot.cancel.cancel();
        }
    }
}

struct Shared {
    factory: Arc<dyn LayoutFactory>,
    state: Mutex<State>,
    /// Signalled when the worker parks or exits.
    parked: Condvar,
    /// Signalled when the worker should re-evaluate whether to stay parked.
    wake: Condvar,
    events: EventSink,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Marks the worker as gone if it unwinds out of a layout.
struct WorkerExit {
    shared: Arc<Shared>,
    clean: bool,
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        if !self.clean {
            let mut state = self.shared.lock();
            mark_exited(&self.shared, &mut state);
        }
    }
}

/// Must run under the same lock hold that decided to exit, so `add` never
/// sees a live worker that is about to leave.
fn mark_exited(shared: &Shared, state: &mut State) {
    state.worker_alive = false;
    state.parked = false;
    shared.events.emit(LayoutEvent::Stopped);
    shared.parked.notify_all();
    info!("layout_worker_stopped");
}

/// Schedules one layout per component on a single background thread.
pub struct LayoutThread {
    shared: Arc<Shared>,
    events: Receiver<LayoutEvent>,
}

impl LayoutThread {
    pub fn new(factory: Arc<dyn LayoutFactory>) -> Self {
        let (events, rx) = EventSink::new();
        Self {
            shared: Arc::new(Shared {
                factory,
                state: Mutex::new(State::default()),
                parked: Condvar::new(),
                wake: Condvar::new(),
                events,
            }),
            events: rx,
        }
    }

    /// Name of the algorithm this scheduler creates.
    pub fn factory_name(&self) -> &str {
        self.shared.factory.name()
    }

    /// Start laying out `component`. Adding a component twice, or after
    /// [`LayoutThread::stop`], is a no-op.
    ///
    /// Failures to start the worker are logged; use [`LayoutThread::try_add`]
    /// to observe them.
    pub fn add(&self, component: ComponentId) {
        if let Err(e) = self.try_add(component) {
            warn!(component = component.0, error = %e, "layout_add_failed");
        }
    }

    /// Like [`LayoutThread::add`], returning whether an instance was created.
    pub fn try_add(&self, component: ComponentId) -> LayoutResult<bool> {
        let mut state = self.shared.lock();

        if state.stop {
            warn!(component = component.0, "layout_add_after_stop");
            return Ok(false);
        }
        if state.slots.contains_key(&component) {
            return Ok(false);
        }

        let Some(layout) = self.shared.factory.create(component) else {
            warn!(
                component = component.0,
                factory = self.shared.factory.name(),
                "layout_component_unknown"
            );
            return Ok(false);
        };

        state.slots.insert(component, Slot::new(layout));
        info!(component = component.0, total = state.slots.len(), "layout_component_added");

        if state.worker_alive {
            self.shared.wake.notify_all();
            return Ok(true);
        }

        let previous = state.handle.take();
        let shared = self.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("layout-worker".to_string())
            .spawn(move || run(shared));

        match spawned {
            Ok(handle) => {
                state.worker_alive = true;
                state.handle = Some(handle);
            }
            Err(e) => {
                state.slots.shift_remove(&component);
                drop(state);
                join(previous);
                return Err(LayoutError::WorkerSpawn(e));
            }
        }

        drop(state);
        join(previous);
        Ok(true)
    }

    /// Drop the instance for `component`.
    ///
    /// The worker is parked first so the instance is never removed while it
    /// executes. The worker resumes afterwards unless a client has paused it.
    pub fn remove(&self, component: ComponentId) {
        let mut state = self.shared.lock();
        if !state.slots.contains_key(&component) {
            return;
        }

        if state.worker_alive && !state.parked {
            state.removals += 1;
            state.cancel_all();
            self.shared.wake.notify_all();
            while state.worker_alive && !state.parked {
                state = self
                    .shared
                    .parked
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
            state.removals -= 1;
        }

        if let Some(index) = state.slots.get_index_of(&component) {
            state.slots.shift_remove_index(index);
            if state.cursor == Some(component) {
                state.cursor = state.slots.get_index(index).map(|(id, _)| *id);
            }
        }
        info!(component = component.0, total = state.slots.len(), "layout_component_removed");
        self.shared.wake.notify_all();
    }

    /// Ask the worker to park at the next iteration boundary. Returns at once.
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        state.pause_requested = true;
        state.cancel_all();
        self.shared.wake.notify_all();
    }

    /// Ask the worker to park and block until it has.
    ///
    /// Returns immediately when no worker is running.
    pub fn pause_and_wait(&self) {
        let mut state = self.shared.lock();
        state.pause_requested = true;
        state.cancel_all();
        self.shared.wake.notify_all();

        while state.worker_alive && !state.parked {
            state = self
                .shared
                .parked
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// True when the worker is parked, or when a pause was requested and no
    /// worker is running.
    pub fn is_paused(&self) -> bool {
        let state = self.shared.lock();
        state.parked || (state.pause_requested && !state.worker_alive)
    }

    /// Clear a pause request and wake the worker.
    ///
    /// If every layout has converged the worker parks again right away.
    pub fn resume(&self) {
        let mut state = self.shared.lock();
        state.pause_requested = false;
        self.shared.wake.notify_all();
    }

    /// Stop the worker, drop every instance and wait for the thread to exit.
    ///
    /// The scheduler stays stopped: later calls to `add` are ignored.
    pub fn stop(&self) {
        let mut state = self.shared.lock();
        if !state.stop {
            info!(components = state.slots.len(), "layout_thread_stop");
        }
        state.stop = true;
        state.pause_requested = false;
        state.cancel_all();
        state.slots.clear();
        state.cursor = None;
        let handle = state.handle.take();
        self.shared.wake.notify_all();
        drop(state);

        join(handle);
    }

    pub fn state(&self) -> SchedulerState {
        let state = self.shared.lock();
        if state.stop {
            SchedulerState::Stopped
        } else if !state.worker_alive {
            SchedulerState::Idle
        } else if state.parked {
            SchedulerState::Paused
        } else {
            SchedulerState::Running
        }
    }

    pub fn contains(&self, component: ComponentId) -> bool {
        self.shared.lock().slots.contains_key(&component)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().slots.is_empty()
    }

    /// Components in scheduling order.
    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.shared.lock().slots.keys().copied().collect()
    }

    /// Number of iterations the worker has run for `component`.
    pub fn iterations_executed(&self, component: ComponentId) -> Option<u64> {
        self.shared.lock().slots.get(&component).map(|s| s.executed)
    }

    /// Take `component` out of its finished state, e.g. after its topology
    /// changed. Applied by the worker before the next iteration.
    pub fn unfinish(&self, component: ComponentId) {
        let mut state = self.shared.lock();
        if let Some(slot) = state.slots.get_mut(&component) {
            slot.unfinish_requested = true;
            slot.complete_reported = false;
            self.shared.wake.notify_all();
        }
    }

    pub fn unfinish_all(&self) {
        let mut state = self.shared.lock();
        for slot in state.slots.values_mut() {
            slot.unfinish_requested = true;
            slot.complete_reported = false;
        }
        self.shared.wake.notify_all();
    }

    /// Receiver for worker notifications. Clones share one queue.
    pub fn events(&self) -> Receiver<LayoutEvent> {
        self.events.clone()
    }
}

impl Drop for LayoutThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LayoutThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutThread")
            .field("factory", &self.shared.factory.name())
            .field("components", &self.len())
            .field("state", &self.state())
            .finish()
    }
}

fn join(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            warn!("layout_worker_panicked");
        }
    }
}

fn run(shared: Arc<Shared>) {
    let mut exit = WorkerExit {
        shared: shared.clone(),
        clean: false,
    };
    info!(factory = shared.factory.name(), "layout_worker_started");

    let mut state = shared.lock();
    loop {
        if state.stop || !state.has_work() {
            mark_exited(&shared, &mut state);
            exit.clean = true;
            break;
        }

        if state.must_park() {
            state = park(&shared, state);
            continue;
        }

        let start = state
            .cursor
            .take()
            .and_then(|id| state.slots.get_index_of(&id))
            .unwrap_or(0);
        let pass: Vec<ComponentId> = state.slots.keys().skip(start).copied().collect();

        for id in pass {
            if state.interrupted() {
                state.cursor = Some(id);
                break;
            }
            state = execute_one(&shared, state, id);
        }
    }
}

fn park<'a>(shared: &'a Shared, mut state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
    state.parked = true;
    debug!(
        requested = state.pause_requested,
        components = state.slots.len(),
        "layout_worker_parked"
    );
    shared.events.emit(LayoutEvent::Parked);
    shared.parked.notify_all();

    while !state.stop && state.has_work() && state.must_park() {
        state = shared.wake.wait(state).unwrap_or_else(|e| e.into_inner());
    }

    state.parked = false;
    if !state.stop {
        debug!("layout_worker_resumed");
        shared.events.emit(LayoutEvent::Resumed);
    }
    state
}

fn execute_one<'a>(
    shared: &'a Shared,
    mut state: MutexGuard<'a, State>,
    id: ComponentId,
) -> MutexGuard<'a, State> {
    let Some(slot) = state.slots.get_mut(&id) else {
        return state;
    };
    if !slot.wants_to_run() {
        return state;
    }
    let Some(mut layout) = slot.layout.take() else {
        return state;
    };
    let unfinish = std::mem::take(&mut slot.unfinish_requested);
    drop(state);

    if unfinish {
        layout.unfinish();
    }
    layout.execute();
    let mut iterations = layout.iterations();
    iterations.decrement();
    layout.set_iterations(iterations);

    let mut state = shared.lock();
    let Some(slot) = state.slots.get_mut(&id) else {
        // Removed by `stop` while executing.
        return state;
    };

    slot.executed += 1;

    let progress = layout.progress().or_else(|| {
        slot.bounded_total.map(|total| {
            let total = u64::from(total.max(1));
            (slot.executed.min(total) * 100 / total) as u8
        })
    });
    if progress.is_some() && progress != slot.last_progress {
        slot.last_progress = progress;
        if let Some(percentage) = progress {
            shared.events.emit(LayoutEvent::Progress {
                component: id,
                percentage,
            });
        }
    }

    let complete = layout.finished() || iterations == Iterations::Bounded(0);
    if complete && !slot.complete_reported {
        slot.complete_reported = true;
        info!(component = id.0, iterations = slot.executed, "layout_component_complete");
        shared.events.emit(LayoutEvent::Complete { component: id });
    }

    slot.layout = Some(layout);
    state
}
