//! Hand-off simulation: units of work begun on the dispatcher thread and
//! continued on a pool of worker threads.

use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Context as _, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use threadscope_core::{
    ContextId, Key, ListenerError, ScopeError, ScopeEvent, ScopeListener, ScopeManager,
    ScopedContext,
};
use threadscope_provider::{ScopedProvider, UnitOfWork};
use tracing::{debug, info, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationConfig {
    /// Units of work to dispatch
    pub units: usize,
    /// Worker threads continuing the units
    pub workers: usize,
    /// Recording listeners stored in each unit
    pub listeners_per_unit: usize,
    /// Every n-th unit gets a listener that rejects LEAVE
    pub fail_every: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            units: 8,
            workers: 4,
            listeners_per_unit: 2,
            fail_every: None,
        }
    }
}

/// One event as seen by a recording listener.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub event: ScopeEvent,
    pub thread: String,
    pub at: DateTime<Utc>,
}

/// What happened to one unit of work.
#[derive(Debug, Serialize)]
pub struct UnitReport {
    pub unit: usize,
    pub context: ContextId,
    pub handled_by: Option<String>,
    pub timelines: Vec<Vec<TimelineEntry>>,
    pub failures: Vec<String>,
}

/// Result of a simulation run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub config: SimulationConfig,
    pub units: Vec<UnitReport>,
    pub failure_count: usize,
}

impl SimulationReport {
    /// Print a human-readable summary.
    pub fn print(&self) {
        println!(
            "Simulated {} units on {} workers",
            self.units.len(),
            self.config.workers
        );
        for unit in &self.units {
            println!(
                "  unit {} | context {} | handled by {}",
                unit.unit,
                unit.context,
                unit.handled_by.as_deref().unwrap_or("-"),
            );
            for (i, timeline) in unit.timelines.iter().enumerate() {
                let steps: Vec<String> = timeline
                    .iter()
                    .map(|e| format!("{}@{}", e.event, e.thread))
                    .collect();
                println!("    listener {}: {}", i, steps.join(" -> "));
            }
            for failure in &unit.failures {
                println!("    failure: {}", failure);
            }
        }
        println!("Listener failures: {}", self.failure_count);
    }
}

/// Listener recording which thread saw which event.
#[derive(Debug, Default)]
struct Timeline {
    entries: Mutex<Vec<TimelineEntry>>,
    reject_leave: bool,
}

impl Timeline {
    fn new(reject_leave: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            reject_leave,
        }
    }

    fn entries(&self) -> Vec<TimelineEntry> {
        self.entries.lock().clone()
    }
}

impl ScopeListener for Timeline {
    fn event(&self, event: ScopeEvent) -> Result<(), ListenerError> {
        self.entries.lock().push(TimelineEntry {
            event,
            thread: thread_name(),
            at: Utc::now(),
        });
        if self.reject_leave && event == ScopeEvent::Leave {
            return Err(ListenerError::new("flaky listener rejected LEAVE"));
        }
        Ok(())
    }
}

/// Built lazily by the worker in the unit's context.
#[derive(Debug)]
struct Handler {
    thread: String,
}

impl Handler {
    fn here() -> Self {
        Self {
            thread: thread_name(),
        }
    }
}

struct Job {
    unit: usize,
    context: Arc<ScopedContext>,
}

struct WorkerOutcome {
    unit: usize,
    handled_by: Option<String>,
    failures: Vec<String>,
}

struct Pending {
    unit: usize,
    context: ContextId,
    listeners: Vec<Arc<Timeline>>,
    failures: Vec<String>,
}

fn unit_key() -> Key<usize> {
    Key::named("unit")
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}

fn describe(err: &ScopeError) -> Vec<String> {
    match err.listener_failures() {
        [] => vec![err.to_string()],
        failures => failures.iter().map(ToString::to_string).collect(),
    }
}

/// Run the simulation on the calling thread as dispatcher.
pub fn run(config: &SimulationConfig) -> Result<SimulationReport> {
    if config.workers == 0 {
        return Err(anyhow!("at least one worker thread is required"));
    }

    let manager = Arc::new(ScopeManager::new());
    let (done_tx, done_rx) = mpsc::channel::<WorkerOutcome>();

    let mut queues = Vec::with_capacity(config.workers);
    let mut handles = Vec::with_capacity(config.workers);
    for n in 0..config.workers {
        let (tx, rx) = mpsc::channel::<Job>();
        let manager = manager.clone();
        let done = done_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("worker-{}", n))
            .spawn(move || worker_loop(manager, rx, done))
            .context("failed to spawn worker thread")?;
        queues.push(tx);
        handles.push(handle);
    }
    drop(done_tx);

    let mut pending = Vec::with_capacity(config.units);
    for unit in 0..config.units {
        let (job, dispatched) = dispatch(&manager, config, unit)?;
        let worker = unit % config.workers;
        queues[worker]
            .send(job)
            .map_err(|_| anyhow!("worker {} hung up", worker))?;
        pending.push(dispatched);
    }
    drop(queues);

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))?;
    }
    if let Err(error) = manager.release() {
        warn!(%error, "dispatcher context released with failures");
    }

    let mut outcomes: HashMap<usize, WorkerOutcome> =
        done_rx.iter().map(|o| (o.unit, o)).collect();

    let units: Vec<UnitReport> = pending
        .into_iter()
        .map(|p| {
            let mut failures = p.failures;
            let handled_by = match outcomes.remove(&p.unit) {
                Some(outcome) => {
                    failures.extend(outcome.failures);
                    outcome.handled_by
                }
                None => {
                    failures.push("unit never reached a worker".to_string());
                    None
                }
            };
            UnitReport {
                unit: p.unit,
                context: p.context,
                handled_by,
                timelines: p.listeners.iter().map(|l| l.entries()).collect(),
                failures,
            }
        })
        .collect();

    let failure_count = units.iter().map(|u| u.failures.len()).sum();
    info!(units = units.len(), failure_count, "simulation finished");

    Ok(SimulationReport {
        config: config.clone(),
        units,
        failure_count,
    })
}

/// Begin a unit on the dispatcher, populate it, and detach it for a worker.
fn dispatch(
    manager: &Arc<ScopeManager>,
    config: &SimulationConfig,
    unit: usize,
) -> Result<(Job, Pending)> {
    let work = UnitOfWork::begin(manager.clone(), None)?;
    let context = work.context();
    context.put(&unit_key(), Some(Arc::new(unit)))?;

    let flaky = config.fail_every.is_some_and(|n| n > 0 && unit % n == 0);
    let mut listeners = Vec::with_capacity(config.listeners_per_unit);
    for i in 0..config.listeners_per_unit {
        let listener = Arc::new(Timeline::new(flaky && i == 0));
        context.put_listener(&Key::named(format!("listener-{}", i)), listener.clone())?;
        listeners.push(listener);
    }

    let failures = work.finish().err().map(|e| describe(&e)).unwrap_or_default();
    debug!(unit, context = %context.id(), "dispatched unit of work");

    let pending = Pending {
        unit,
        context: context.id(),
        listeners,
        failures,
    };
    Ok((Job { unit, context }, pending))
}

fn worker_loop(
    manager: Arc<ScopeManager>,
    jobs: mpsc::Receiver<Job>,
    done: mpsc::Sender<WorkerOutcome>,
) {
    let handler = ScopedProvider::new(manager.clone(), Key::<Handler>::of(), Handler::here);
    for job in jobs {
        let outcome = continue_unit(&manager, &handler, job);
        if done.send(outcome).is_err() {
            break;
        }
    }
    if let Err(error) = manager.release() {
        warn!(%error, "worker context released with failures");
    }
}

fn continue_unit(
    manager: &Arc<ScopeManager>,
    handler: &ScopedProvider<Handler>,
    job: Job,
) -> WorkerOutcome {
    let mut failures = Vec::new();
    let work = match UnitOfWork::begin(manager.clone(), Some(job.context)) {
        Ok(work) => work,
        Err(err) => {
            failures.extend(describe(&err));
            return WorkerOutcome {
                unit: job.unit,
                handled_by: None,
                failures,
            };
        }
    };

    match manager.get_context().get(&unit_key()) {
        Ok(Some(seen)) if *seen == job.unit => {}
        Ok(other) => failures.push(format!(
            "expected unit {} in context, found {:?}",
            job.unit,
            other.map(|v| *v)
        )),
        Err(err) => failures.extend(describe(&err)),
    }

    let handled_by = match handler.get() {
        Ok(h) => Some(h.thread.clone()),
        Err(err) => {
            failures.extend(describe(&err));
            None
        }
    };

    if let Err(err) = work.finish() {
        failures.extend(describe(&err));
    }
    debug!(unit = job.unit, "worker finished unit of work");

    WorkerOutcome {
        unit: job.unit,
        handled_by,
        failures,
    }
}
