//! Job Scheduler & Deferred Notifier
//!
//! The runtime is the central coordinator of the reactive core. It owns a
//! FIFO job queue, drains it synchronously, and batches the resulting
//! subscriber notifications into a single deferred pass.
//!
//! # How Scheduling Works
//!
//! 1. `ingest` appends a job to the tail of the queue. With `perform` set,
//!    it immediately dequeues from the head and performs until the queue is
//!    empty.
//!
//! 2. Performing a job dispatches to the observer's behavior, then ingests
//!    the observer's dependents with `perform = false` so the running drain
//!    loop picks them up in FIFO order. If a side effect ingests further
//!    jobs mid-perform, those are fully drained before the outermost
//!    `ingest` call returns.
//!
//! 3. Jobs that should rerender are parked on a ready-to-notify list.
//!    Nothing is notified inline: the notification pass runs at an explicit
//!    flush point, coalescing every job from one synchronous burst of
//!    mutations into a single pass.
//!
//! # Not-Ready Replay
//!
//! A container whose render target has not finished mounting is not notified
//! and not forgotten: its job is parked on a pending list and retried on a
//! future pass once the container flips ready. This is a deferred retry, not
//! a failure path.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::job::{Job, UpdateConfig};
use super::observer::ObserverId;
use super::subscription::{ContainerId, Delivery, StageOutcome};
use crate::context::Prism;

/// The synchronous job scheduler plus deferred notification batcher.
pub struct Runtime {
    /// The observer whose job is currently being performed. Non-empty only
    /// during the synchronous extent of one `perform` call.
    current: Mutex<Option<ObserverId>>,

    /// FIFO queue of not-yet-performed jobs.
    queue: Mutex<VecDeque<Job>>,

    /// Performed jobs waiting for the next notification pass.
    jobs_to_notify: Mutex<Vec<Job>>,

    /// Jobs whose containers were not ready, oldest first, awaiting replay.
    not_ready_jobs: Mutex<Vec<Job>>,
}

impl Runtime {
    /// Create an idle runtime.
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            jobs_to_notify: Mutex::new(Vec::new()),
            not_ready_jobs: Mutex::new(Vec::new()),
        }
    }

    /// Append a job to the queue and, when `perform` is set, drain the queue
    /// from the head until it is empty.
    ///
    /// Draining is strictly FIFO and re-entrant: a job performed here may
    /// ingest further jobs, and all of them complete before this call
    /// returns. The notification pass never runs inline; it waits for
    /// [`Runtime::flush`].
    pub fn ingest(&self, ctx: &Prism, job: Job, perform: bool) {
        trace!(
            observer = job.observer.raw(),
            key = job.key.as_deref().unwrap_or(""),
            perform,
            "ingesting job"
        );
        self.queue.lock().push_back(job);

        if perform {
            let next = self.queue.lock().pop_front();
            if let Some(job) = next {
                self.perform(ctx, job);
            }
        }
    }

    /// Perform one job, then keep draining the queue iteratively. Only a
    /// genuinely re-entrant ingest (from inside a side effect) adds a stack
    /// frame; a long queued burst does not.
    fn perform(&self, ctx: &Prism, job: Job) {
        let mut job = job;
        loop {
            debug!(
                observer = job.observer.raw(),
                key = job.key.as_deref().unwrap_or(""),
                "performing job"
            );
            *self.current.lock() = Some(job.observer);

            ctx.graph().perform(ctx, &job);
            job.performed = true;

            // Queue the observer's dependents; the loop below picks them up
            // in order.
            for dependent in ctx.graph().dependents_of(job.observer) {
                if let Some(behavior) = ctx.graph().behavior(dependent) {
                    behavior.ingest(
                        ctx,
                        UpdateConfig {
                            perform: false,
                            ..UpdateConfig::default()
                        },
                    );
                }
            }

            if job.rerender && !job.config.background {
                self.jobs_to_notify.lock().push(job);
            }

            *self.current.lock() = None;

            match self.queue.lock().pop_front() {
                Some(next) => job = next,
                None => break,
            }
        }
    }

    /// The observer currently being performed, if any.
    pub fn current_observer(&self) -> Option<ObserverId> {
        *self.current.lock()
    }

    /// Number of jobs waiting in the queue.
    pub fn queued_jobs(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether a notification pass would deliver or park anything.
    pub fn has_pending_notifications(&self) -> bool {
        !self.jobs_to_notify.lock().is_empty() || !self.not_ready_jobs.lock().is_empty()
    }

    /// Run the deferred notification pass.
    ///
    /// This is the explicit flush point standing in for "after the current
    /// call stack unwinds": call it at the end of a logical action (or from
    /// tests) to deliver every coalesced notification exactly once.
    pub fn flush(&self, ctx: &Prism) {
        self.notify_subscribers(ctx);
    }

    /// One notification pass over ready jobs, then parked not-ready jobs.
    fn notify_subscribers(&self, ctx: &Prism) {
        let jobs: Vec<Job> = {
            let mut ready = self.jobs_to_notify.lock();
            let mut parked = self.not_ready_jobs.lock();
            ready.drain(..).chain(parked.drain(..)).collect()
        };
        if jobs.is_empty() {
            trace!("notification pass with nothing to deliver");
            return;
        }

        // Phase 1: stage each (job, container) pair. Containers are
        // deduplicated so several jobs from one burst produce a single
        // notification per container.
        let mut to_deliver: Vec<ContainerId> = Vec::new();
        let mut still_parked: Vec<Job> = Vec::new();

        for mut job in jobs {
            let observer = job.observer;
            job.pending.retain(|&container| {
                match ctx.sub_controller().stage(container, observer) {
                    StageOutcome::Gone => false,
                    StageOutcome::Ready => {
                        if !to_deliver.contains(&container) {
                            to_deliver.push(container);
                        }
                        false
                    }
                    StageOutcome::NotReady => {
                        trace!(
                            observer = observer.raw(),
                            "container not ready; parking job for replay"
                        );
                        true
                    }
                }
            });
            if job.pending_containers() > 0 {
                still_parked.push(job);
            }
        }

        self.not_ready_jobs.lock().append(&mut still_parked);

        // Phase 2: deliver with no lock held. A failing container never
        // aborts its siblings.
        for container in to_deliver {
            match ctx.sub_controller().take_delivery(ctx, container) {
                Some(Delivery::Callback(notify)) => notify(),
                Some(Delivery::Component { target, changed }) => {
                    if let Some(integration) = ctx.integration() {
                        if let Err(err) = integration.update(&target, &changed) {
                            error!(
                                integration = integration.key(),
                                %err,
                                "render integration update failed; continuing"
                            );
                        }
                    }
                }
                None => {}
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
