//! The job scheduler: a priority queue of ready targets feeding a bounded
//! pool of child-process jobs.
//!
//! Anonymous targets sort ahead of named ones; ties break lexicographically
//! on the sort key. A dependent is never queued while any dependency is
//! unfinished.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    sync::mpsc::{Receiver, Sender, channel},
};

use ahash::AHashSet;

use crate::{
    diagnostics::Diagnostics,
    evaluator::Evaluator,
    graph::{NodeId, NodeKind},
    object::Attr,
    process::{OutputSink, ProcessExit, ProcessHandle, spawn},
    source::SourceMap,
    target::{TargetId, TargetState},
    target_mgr::TargetMgr,
};

/// One step of a job: run a command or print a message.
#[derive(Debug, Clone)]
pub enum Action {
    Command { program: String, args: Vec<String> },
    Message(String),
}

/// Ready-queue entry. `BinaryHeap` pops the greatest element, so the
/// ordering puts anonymous targets first, then ascending sort keys.
#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    anonymous: bool,
    key: String,
    target: TargetId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.anonymous
            .cmp(&other.anonymous)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single build job: the target being built and its remaining actions.
struct Job {
    target: TargetId,
    actions: VecDeque<Action>,
    cwd: String,
    handle: Option<ProcessHandle>,
}

/// Manages the ready queue and the running job pool.
pub struct JobMgr {
    ready: BinaryHeap<QueueEntry>,
    jobs: Vec<Option<Job>>,
    active: usize,
    max_jobs: usize,
    sink: OutputSink,
    events_tx: Sender<ProcessExit>,
    events_rx: Receiver<ProcessExit>,
}

impl JobMgr {
    #[must_use]
    pub fn new(max_jobs: usize, sink: OutputSink) -> Self {
        let (events_tx, events_rx) = channel();
        Self {
            ready: BinaryHeap::new(),
            jobs: Vec::new(),
            active: 0,
            max_jobs: max_jobs.max(1),
            sink,
            events_tx,
            events_rx,
        }
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Adds a target to the ready queue if its up-to-date check says it
    /// needs building; waiting targets enqueue their dependencies instead.
    pub fn add_ready(
        &mut self,
        mgr: &mut TargetMgr,
        diags: &mut Diagnostics,
        sources: &SourceMap,
        target: TargetId,
    ) {
        let mut guard = AHashSet::new();
        self.add_ready_guarded(mgr, diags, sources, target, &mut guard);
    }

    fn add_ready_guarded(
        &mut self,
        mgr: &mut TargetMgr,
        diags: &mut Diagnostics,
        sources: &SourceMap,
        target: TargetId,
        guard: &mut AHashSet<TargetId>,
    ) {
        if !guard.insert(target) {
            return;
        }
        if mgr.target(target).state == TargetState::Initialized {
            mgr.check_state(target, diags, sources);
        }
        match mgr.target(target).state {
            TargetState::Ready => {
                mgr.target_mut(target).state = TargetState::ReadyInQueue;
                self.ready.push(QueueEntry {
                    anonymous: mgr.target(target).path.is_none(),
                    key: mgr.target(target).sort_key.clone(),
                    target,
                });
            }
            TargetState::ReadyInQueue
            | TargetState::Finished
            | TargetState::Building
            | TargetState::Error => {}
            TargetState::Waiting => {
                let depends = mgr.target(target).depends.clone();
                for dep in depends {
                    self.add_ready_guarded(mgr, diags, sources, dep, guard);
                }
            }
            state => {
                let name = mgr.target_display(target);
                diags.error(
                    crate::source::Location::NONE,
                    sources,
                    &format!("Invalid state for target {name}: {state}"),
                );
            }
        }
    }

    /// Adds every named target that participates in the default build.
    pub fn add_all_ready(
        &mut self,
        mgr: &mut TargetMgr,
        diags: &mut Diagnostics,
        sources: &SourceMap,
    ) {
        let ids: Vec<TargetId> = mgr.target_ids().collect();
        for id in ids {
            let target = mgr.target(id);
            if target.path.is_some() && !target.exclude_from_all && !target.source_only {
                self.add_ready(mgr, diags, sources, id);
            }
        }
    }

    fn next_ready(&mut self) -> Option<TargetId> {
        self.ready.pop().map(|entry| entry.target)
    }

    /// Runs jobs until the queue drains and all running jobs complete.
    pub fn run(&mut self, ev: &mut Evaluator<'_>, mgr: &mut TargetMgr) {
        loop {
            while self.active < self.max_jobs {
                let Some(target) = self.next_ready() else {
                    break;
                };
                self.start_job(ev, mgr, target);
            }
            if self.active == 0 {
                return;
            }
            let Ok(exit) = self.events_rx.recv() else {
                return;
            };
            self.handle_exit(ev, mgr, exit);
        }
    }

    fn start_job(&mut self, ev: &mut Evaluator<'_>, mgr: &mut TargetMgr, target: TargetId) {
        mgr.target_mut(target).state = TargetState::Building;
        let name = mgr.target_display(target);
        ev.diags
            .status(crate::source::Location::NONE, ev.sources, &format!("Building {name}"));

        let definition = mgr.target(target).definition;
        let names = *ev.interns.names();
        let action_nodes = ev.attribute_value_as_list(definition, names.actions);
        let module = ev
            .graph
            .object(definition)
            .module
            .unwrap_or(ev.module());
        let cwd = ev
            .attribute_value_as_string(definition, names.output_dir)
            .unwrap_or_else(|| ev.graph.module(module).build_dir.clone());
        let _ = std::fs::create_dir_all(&cwd);

        let mut actions = VecDeque::new();
        for node in action_nodes {
            if let Some(action) = parse_action(ev, node) {
                actions.push_back(action);
            }
        }

        let slot = self
            .jobs
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| {
                self.jobs.push(None);
                self.jobs.len() - 1
            });
        self.jobs[slot] = Some(Job {
            target,
            actions,
            cwd,
            handle: None,
        });
        self.active += 1;
        self.launch_next(ev, mgr, slot);
    }

    /// Launches the job's next action; messages print immediately, commands
    /// spawn a child whose exit re-enters via the event channel. When no
    /// actions remain the job completes.
    fn launch_next(&mut self, ev: &mut Evaluator<'_>, mgr: &mut TargetMgr, slot: usize) {
        loop {
            let job = self.jobs[slot].as_mut().expect("job slot empty");
            match job.actions.pop_front() {
                Some(Action::Message(text)) => {
                    let mut out = self.sink.lock().expect("output lock poisoned");
                    let _ = out.write_all(text.as_bytes());
                    let _ = out.write_all(b"\n");
                }
                Some(Action::Command { program, args }) => {
                    let cwd = job.cwd.clone();
                    match spawn(slot, &program, &args, &cwd, &self.sink, &self.events_tx) {
                        Ok(handle) => {
                            self.jobs[slot].as_mut().expect("job slot empty").handle =
                                Some(handle);
                            return;
                        }
                        Err(err) => {
                            let target = job.target;
                            let name = mgr.target_display(target);
                            ev.diags.error(
                                mgr.target(target).loc,
                                ev.sources,
                                &format!("Failed to run '{program}' for target {name}: {err}"),
                            );
                            ev.diags.recovered();
                            self.fail_job(mgr, slot);
                            return;
                        }
                    }
                }
                None => {
                    self.complete_job(ev, mgr, slot);
                    return;
                }
            }
        }
    }

    fn handle_exit(&mut self, ev: &mut Evaluator<'_>, mgr: &mut TargetMgr, exit: ProcessExit) {
        let Some(job) = self.jobs[exit.job].as_mut() else {
            return;
        };
        if let Some(handle) = job.handle.take() {
            handle.join_pumps();
        }
        if exit.success {
            self.launch_next(ev, mgr, exit.job);
        } else {
            let target = job.target;
            let name = mgr.target_display(target);
            ev.diags.error(
                mgr.target(target).loc,
                ev.sources,
                &format!("Build command failed for target {name}"),
            );
            ev.diags.recovered();
            self.fail_job(mgr, exit.job);
        }
    }

    fn complete_job(&mut self, ev: &mut Evaluator<'_>, mgr: &mut TargetMgr, slot: usize) {
        let job = self.jobs[slot].take().expect("job slot empty");
        self.active -= 1;
        mgr.target_mut(job.target).state = TargetState::Finished;

        // Re-check waiting dependents now that this target is satisfied.
        let dependents = mgr.target(job.target).dependents.clone();
        for dependent in dependents {
            if mgr.target(dependent).state == TargetState::Waiting {
                mgr.target_mut(dependent).state = TargetState::Initialized;
            }
            self.add_ready(mgr, ev.diags, ev.sources, dependent);
        }
    }

    fn fail_job(&mut self, mgr: &mut TargetMgr, slot: usize) {
        let job = self.jobs[slot].take().expect("job slot empty");
        self.active -= 1;
        mgr.target_mut(job.target).state = TargetState::Error;
        mark_dependents_unbuildable(mgr, job.target);
    }
}

/// Interprets one element of a target's `actions` list: a command line
/// string, a `[program, arg, ...]` list, or a `{message = '...'}` dict.
fn parse_action(ev: &mut Evaluator<'_>, node: NodeId) -> Option<Action> {
    match ev.graph.kind(node).clone() {
        NodeKind::Str(s) => {
            let text = ev.interns.get(s).to_owned();
            let mut words = text.split_whitespace().map(str::to_owned);
            let program = words.next()?;
            Some(Action::Command {
                program,
                args: words.collect(),
            })
        }
        NodeKind::List(elements) => {
            let mut words = Vec::with_capacity(elements.len());
            for e in elements {
                match ev.graph.as_str(e) {
                    Some(s) => words.push(ev.interns.get(s).to_owned()),
                    None => {
                        ev.diags.error(
                            ev.graph.loc(e),
                            ev.sources,
                            "Action arguments must be strings",
                        );
                        return None;
                    }
                }
            }
            let mut iter = words.into_iter();
            let program = iter.next()?;
            Some(Action::Command {
                program,
                args: iter.collect(),
            })
        }
        NodeKind::Dict(obj) => {
            let key = ev.interns.names().message;
            let message = ev.graph.object(obj).own_attr(key).map(Attr::node)?;
            let text = ev.display(message);
            Some(Action::Message(text))
        }
        _ => {
            ev.diags
                .error(ev.graph.loc(node), ev.sources, "Invalid action for target");
            None
        }
    }
}

/// A failed target makes every transitive dependent unbuildable.
fn mark_dependents_unbuildable(mgr: &mut TargetMgr, target: TargetId) {
    let dependents = mgr.target(target).dependents.clone();
    for dependent in dependents {
        if mgr.target(dependent).state != TargetState::Error {
            mgr.target_mut(dependent).state = TargetState::Error;
            mark_dependents_unbuildable(mgr, dependent);
        }
    }
}
