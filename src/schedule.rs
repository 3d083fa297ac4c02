//! Phased system scheduler.
//!
//! Each frame walks the nine phases in fixed order. Within a phase, systems
//! run in a dependency- and priority-ordered schedule: the per-phase DAG is
//! built from `depends_on` plus reversed `runs_before` edges, cycles are
//! detected with Tarjan's SCC algorithm and broken deterministically, and
//! ready systems are dispatched to the worker pool subject to the declared
//! read/write conflict predicate. The deferred command buffer is drained
//! after every phase.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crossbeam::channel;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{EcsError, Result};
use crate::executor::{SystemProfiler, SystemStats};
use crate::query::QueryDescriptor;
use crate::system::{
    BoxedSystem, FrameState, ParallelStrategy, Phase, SystemDescriptor, SystemId, SystemState,
};
use crate::world::World;

/// Per-frame inputs handed down by the world.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameParams {
    pub delta_seconds: f32,
    pub frame_number: u64,
    pub frame_start: Instant,
    pub frame_budget_ns: u64,
    pub per_system_budget_ns: u64,
}

pub(crate) struct RegisteredSystem {
    pub id: SystemId,
    pub descriptor: SystemDescriptor,
    pub system: BoxedSystem,
    pub state: SystemState,
}

/// Cached execution plan for one phase.
#[derive(Clone, Default)]
struct PhasePlan {
    /// Registration indices in stable topological order
    order: Vec<usize>,
    /// Registration index -> in-phase dependencies (post cycle break)
    deps: FxHashMap<usize, Vec<usize>>,
    /// Cycles found while building, as member name lists
    cycles: Vec<Vec<String>>,
}

/// Phased, dependency-ordered system scheduler.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<RegisteredSystem>,
    by_name: FxHashMap<String, usize>,
    plans: FxHashMap<Phase, PhasePlan>,
    plans_dirty: bool,
    profiler: SystemProfiler,
    unsafe_allow_concurrent_writes: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            plans_dirty: true,
            ..Self::default()
        }
    }

    /// Register a system. Names are unique; a duplicate replaces the name
    /// binding (and is logged) but both systems stay registered.
    pub fn register(&mut self, descriptor: SystemDescriptor, system: BoxedSystem) -> SystemId {
        let index = self.systems.len();
        let id = SystemId(index as u32);

        if self.by_name.insert(descriptor.name.clone(), index).is_some() {
            tracing::warn!(name = %descriptor.name, "duplicate system name; later registration wins for dependency edges");
        }

        self.systems.push(RegisteredSystem {
            id,
            descriptor,
            system,
            state: SystemState::Ready,
        });
        self.plans_dirty = true;
        id
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    pub fn system_state(&self, name: &str) -> Option<SystemState> {
        self.by_name.get(name).map(|&i| self.systems[i].state)
    }

    pub fn pause_system(&mut self, name: &str) -> bool {
        self.set_state(name, SystemState::Paused)
    }

    pub fn resume_system(&mut self, name: &str) -> bool {
        self.set_state(name, SystemState::Ready)
    }

    fn set_state(&mut self, name: &str, state: SystemState) -> bool {
        match self.by_name.get(name) {
            Some(&i) => {
                self.systems[i].state = state;
                true
            }
            None => false,
        }
    }

    /// Disable the conservative conflict predicate. Systems then run
    /// concurrently whenever dependencies allow, even with overlapping
    /// writes; the caller vouches for disjoint data.
    pub fn set_unsafe_allow_concurrent_writes(&mut self, allow: bool) {
        self.unsafe_allow_concurrent_writes = allow;
    }

    pub fn get_stats(&self, id: SystemId) -> Option<SystemStats> {
        self.profiler.get_stats(id)
    }

    /// Cycles detected in the given phase during the last plan build.
    pub fn dependency_cycles(&mut self, phase: Phase) -> Vec<Vec<String>> {
        self.ensure_plans();
        self.plans
            .get(&phase)
            .map(|p| p.cycles.clone())
            .unwrap_or_default()
    }

    /// Mark every system shut down; subsequent frames run nothing.
    pub fn shutdown(&mut self) {
        for system in &mut self.systems {
            system.state = SystemState::Shutdown;
        }
        self.plans_dirty = true;
    }

    pub(crate) fn run_frame(&mut self, world: &mut World, params: &FrameParams) -> Result<()> {
        for phase in Phase::ALL {
            self.run_phase(world, phase, params)?;
            world.drain_deferred()?;
        }
        Ok(())
    }

    fn ensure_plans(&mut self) {
        if !self.plans_dirty {
            return;
        }
        self.plans.clear();
        for phase in Phase::ALL {
            let plan = self.build_phase_plan(phase);
            self.plans.insert(phase, plan);
        }
        self.plans_dirty = false;
    }

    /// Tie-break key for cycle breaking and topological ordering:
    /// priority, then name, then registration order.
    fn order_key(&self, index: usize) -> (i32, String, usize) {
        let descriptor = &self.systems[index].descriptor;
        (descriptor.priority, descriptor.name.clone(), index)
    }

    fn build_phase_plan(&self, phase: Phase) -> PhasePlan {
        let members: Vec<usize> = self
            .systems
            .iter()
            .enumerate()
            .filter(|(_, s)| s.descriptor.phase == phase && s.state != SystemState::Shutdown)
            .map(|(i, _)| i)
            .collect();

        if members.is_empty() {
            return PhasePlan::default();
        }

        let position: FxHashMap<usize, usize> = members
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (idx, pos))
            .collect();

        // Edge u -> v: u must complete before v.
        let n = members.len();
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut push_edge = |adj: &mut Vec<Vec<usize>>, from: usize, to: usize| {
            if from != to && !adj[from].contains(&to) {
                adj[from].push(to);
            }
        };

        for (pos, &idx) in members.iter().enumerate() {
            let descriptor = &self.systems[idx].descriptor;
            for dep in &descriptor.depends_on {
                match self.by_name.get(dep).and_then(|i| position.get(i)) {
                    Some(&dep_pos) => push_edge(&mut adj, dep_pos, pos),
                    None => tracing::warn!(
                        system = %descriptor.name,
                        depends_on = %dep,
                        "dependency not found in phase; edge ignored"
                    ),
                }
            }
            for target in &descriptor.runs_before {
                match self.by_name.get(target).and_then(|i| position.get(i)) {
                    Some(&target_pos) => push_edge(&mut adj, pos, target_pos),
                    None => tracing::warn!(
                        system = %descriptor.name,
                        runs_before = %target,
                        "ordering target not found in phase; edge ignored"
                    ),
                }
            }
        }

        // Every SCC with more than one member is a cycle. Break it by
        // ordering the members (priority, name, registration) and replacing
        // the internal edges with that chain.
        let mut cycles = Vec::new();
        for scc in tarjan_sccs(n, &adj) {
            if scc.len() < 2 {
                continue;
            }
            let mut sorted = scc.clone();
            sorted.sort_by_key(|&pos| self.order_key(members[pos]));

            let names: Vec<String> = sorted
                .iter()
                .map(|&pos| self.systems[members[pos]].descriptor.name.clone())
                .collect();
            tracing::warn!(
                error = %EcsError::DependencyCycle { members: names.clone() },
                "breaking system dependency cycle by priority order"
            );
            cycles.push(names);

            let in_scc: Vec<bool> = {
                let mut flags = vec![false; n];
                for &pos in &scc {
                    flags[pos] = true;
                }
                flags
            };
            for &pos in &scc {
                adj[pos].retain(|&to| !in_scc[to]);
            }
            for pair in sorted.windows(2) {
                push_edge(&mut adj, pair[0], pair[1]);
            }
        }

        // Stable topological order: among ready nodes, lowest
        // (priority, name, registration) first.
        let mut in_degree = vec![0usize; n];
        for targets in &adj {
            for &to in targets {
                in_degree[to] += 1;
            }
        }

        let mut heap: BinaryHeap<Reverse<((i32, String, usize), usize)>> = BinaryHeap::new();
        for pos in 0..n {
            if in_degree[pos] == 0 {
                heap.push(Reverse((self.order_key(members[pos]), pos)));
            }
        }

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse((_, pos))) = heap.pop() {
            order.push(members[pos]);
            for &to in &adj[pos] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    heap.push(Reverse((self.order_key(members[to]), to)));
                }
            }
        }
        debug_assert_eq!(order.len(), n, "cycle breaking left the graph cyclic");

        let mut deps: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for (pos, targets) in adj.iter().enumerate() {
            for &to in targets {
                deps.entry(members[to]).or_default().push(members[pos]);
            }
        }

        PhasePlan {
            order,
            deps,
            cycles,
        }
    }

    fn should_skip_for_budget(&self, id: SystemId, params: &FrameParams) -> bool {
        let Some(avg) = self.profiler.average_nanos(id) else {
            return false;
        };
        if params.per_system_budget_ns > 0 && avg > params.per_system_budget_ns {
            return true;
        }
        if params.frame_budget_ns > 0 {
            let elapsed = params.frame_start.elapsed().as_nanos() as u64;
            if elapsed > params.frame_budget_ns {
                return true;
            }
            let remaining = params.frame_budget_ns - elapsed;
            if avg > remaining {
                return true;
            }
        }
        false
    }

    fn run_phase(&mut self, world: &mut World, phase: Phase, params: &FrameParams) -> Result<()> {
        self.ensure_plans();
        let plan = match self.plans.get(&phase) {
            Some(plan) if !plan.order.is_empty() => plan.clone(),
            _ => return Ok(()),
        };

        let mut state: FxHashMap<usize, FrameState> = plan
            .order
            .iter()
            .map(|&i| (i, FrameState::NotStarted))
            .collect();

        // Gate paused and tick-interval systems up front; skipped systems
        // count as completed for readiness.
        for &idx in &plan.order {
            let reg = &self.systems[idx];
            let gated = reg.state == SystemState::Paused
                || reg
                    .descriptor
                    .tick
                    .is_some_and(|t| !t.should_run(params.frame_number));
            if gated {
                state.insert(idx, FrameState::Skipped);
            }
        }

        let (done_tx, done_rx) = channel::unbounded::<(usize, Duration, Result<()>)>();

        let systems = &self.systems;
        let world_ref: &World = &*world;
        // SAFETY anchors for pool tasks: both pointers stay valid because
        // this function joins every dispatched task before returning, and
        // neither `self.systems` nor the world is structurally mutated while
        // tasks are in flight.
        let systems_base = systems.as_ptr() as usize;
        let world_addr = world_ref as *const World as usize;

        let mut running: Vec<usize> = Vec::new();
        let mut first_error: Option<EcsError> = None;
        let mut failed_indices: Vec<usize> = Vec::new();
        let params = *params;

        loop {
            if first_error.is_none() {
                for &idx in &plan.order {
                    if state[&idx] != FrameState::NotStarted {
                        continue;
                    }
                    let ready = plan.deps.get(&idx).is_none_or(|deps| {
                        deps.iter().all(|d| {
                            matches!(state[d], FrameState::Completed | FrameState::Skipped)
                        })
                    });
                    if !ready {
                        continue;
                    }

                    let reg = &systems[idx];
                    if self.should_skip_for_budget(reg.id, &params) {
                        tracing::debug!(system = %reg.descriptor.name, "skipping: frame budget exhausted");
                        state.insert(idx, FrameState::Skipped);
                        continue;
                    }

                    if !self.unsafe_allow_concurrent_writes
                        && running.iter().any(|&r| {
                            systems[r]
                                .descriptor
                                .access
                                .conflicts_with(&reg.descriptor.access)
                        })
                    {
                        continue;
                    }

                    state.insert(idx, FrameState::Running);
                    running.push(idx);

                    // Strategy-none systems count as short main-thread items
                    // and inline through the safe executor; everything else
                    // goes to the pool unless it is saturated.
                    let short = matches!(reg.descriptor.strategy, ParallelStrategy::None);
                    let done = done_tx.clone();
                    let task = move || {
                        // SAFETY: see the anchors above; `idx` is in bounds
                        // and each index is dispatched at most once per phase.
                        let reg = unsafe { &*(systems_base as *const RegisteredSystem).add(idx) };
                        let world = unsafe { &*(world_addr as *const World) };
                        let started = Instant::now();
                        let result = execute_system(reg, world, &params);
                        let _ = done.send((idx, started.elapsed(), result));
                    };
                    world_ref.executor().execute(short, Box::new(task));
                }
            }

            let all_done = plan.order.iter().all(|&i| {
                matches!(
                    state[&i],
                    FrameState::Completed | FrameState::Skipped | FrameState::Failed
                )
            });
            if running.is_empty() && (all_done || first_error.is_some()) {
                break;
            }

            match done_rx.recv() {
                Ok((idx, duration, result)) => {
                    running.retain(|&r| r != idx);
                    self.profiler.record_execution(systems[idx].id, duration);
                    match result {
                        Ok(()) => {
                            state.insert(idx, FrameState::Completed);
                        }
                        Err(err) => {
                            state.insert(idx, FrameState::Failed);
                            failed_indices.push(idx);
                            let wrapped = match err {
                                wrapped @ EcsError::SystemError { .. } => wrapped,
                                other => EcsError::SystemError {
                                    system: systems[idx].descriptor.name.clone(),
                                    message: other.to_string(),
                                },
                            };
                            // First error wins; in-flight systems drain out.
                            first_error.get_or_insert(wrapped);
                        }
                    }
                }
                Err(_) => break,
            }
        }

        for idx in failed_indices {
            self.systems[idx].state = SystemState::Error;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Snapshot of the planned execution order for diagnostics.
    pub fn debug_info(&mut self) -> ScheduleDebugInfo {
        self.ensure_plans();
        let phases = Phase::ALL
            .iter()
            .map(|phase| {
                let plan = self.plans.get(phase).cloned().unwrap_or_default();
                PhaseDebugInfo {
                    phase: format!("{phase:?}"),
                    order: plan
                        .order
                        .iter()
                        .map(|&i| self.systems[i].descriptor.name.clone())
                        .collect(),
                    cycles: plan.cycles,
                }
            })
            .collect();

        ScheduleDebugInfo {
            total_systems: self.systems.len(),
            phases,
        }
    }
}

fn execute_system(reg: &RegisteredSystem, world: &World, params: &FrameParams) -> Result<()> {
    let ctx = world.system_context(params.delta_seconds, params.frame_number, params.frame_start);

    let mut query = QueryDescriptor::new();
    query.required = reg.descriptor.required.clone();
    query.excluded = reg.descriptor.excluded.clone();
    query.optional = reg.descriptor.optional.clone();
    let archetype_ids = world.query_archetypes_pinned(&query);

    match reg.descriptor.strategy {
        ParallelStrategy::Archetypes | ParallelStrategy::Full
            if ctx.executor.has_workers() && archetype_ids.len() > 1 =>
        {
            let error = parking_lot::Mutex::new(None::<EcsError>);
            let tasks: Vec<Box<dyn FnOnce() + Send + '_>> = archetype_ids
                .iter()
                .map(|&id| {
                    let ctx = &ctx;
                    let error = &error;
                    let system = &reg.system;
                    Box::new(move || {
                        let Some(archetype) = world.archetype(id) else {
                            return;
                        };
                        if let Err(err) = system.update(ctx, archetype) {
                            error.lock().get_or_insert(err);
                        }
                    }) as Box<dyn FnOnce() + Send + '_>
                })
                .collect();
            ctx.executor.run_scoped(tasks);
            match error.into_inner() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        _ => {
            for id in archetype_ids {
                if let Some(archetype) = world.archetype(id) {
                    reg.system.update(&ctx, archetype)?;
                }
            }
            Ok(())
        }
    }
}

/// Iterative-stack Tarjan over `adj`, returning strongly connected
/// components.
fn tarjan_sccs(n: usize, adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct State<'a> {
        adj: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        sccs: Vec<Vec<usize>>,
    }

    fn connect(v: usize, st: &mut State<'_>) {
        st.index[v] = Some(st.next_index);
        st.low[v] = st.next_index;
        st.next_index += 1;
        st.stack.push(v);
        st.on_stack[v] = true;

        for i in 0..st.adj[v].len() {
            let w = st.adj[v][i];
            match st.index[w] {
                None => {
                    connect(w, st);
                    st.low[v] = st.low[v].min(st.low[w]);
                }
                Some(w_index) if st.on_stack[w] => {
                    st.low[v] = st.low[v].min(w_index);
                }
                _ => {}
            }
        }

        if st.low[v] == st.index[v].unwrap() {
            let mut scc = Vec::new();
            loop {
                let w = st.stack.pop().unwrap();
                st.on_stack[w] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            st.sccs.push(scc);
        }
    }

    let mut st = State {
        adj,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        sccs: Vec::new(),
    };

    for v in 0..n {
        if st.index[v].is_none() {
            connect(v, &mut st);
        }
    }

    st.sccs
}

/// Debug information about the planned schedule
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDebugInfo {
    pub total_systems: usize,
    pub phases: Vec<PhaseDebugInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseDebugInfo {
    pub phase: String,
    pub order: Vec<String>,
    pub cycles: Vec<Vec<String>>,
}

impl ScheduleDebugInfo {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("schedule debug info serializes")
    }

    pub fn export_json(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_json())
    }
}
