#![allow(dead_code)]

use ai_bt::{
    BehaviorTreeComponent, BtNodeResult, MemoryInit, NodeContext, NodeMemory, TaskNode,
};
use ai_core::{BbKey, TickContext, WorldMut, WorldView};
use ai_tools::{TraceLog, TRACE_LOG};

pub const ALARM: BbKey<bool> = BbKey::new(1);

#[derive(Debug, Default)]
pub struct RecordingWorld {
    pub executed: Vec<&'static str>,
    pub ticked: Vec<&'static str>,
    pub aborted: Vec<&'static str>,
    pub counts: Vec<u32>,
}

impl WorldView for RecordingWorld {
    type Agent = u64;
}

impl WorldMut for RecordingWorld {}

impl RecordingWorld {
    pub fn ticks_of(&self, name: &str) -> usize {
        self.ticked.iter().filter(|n| **n == name).count()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Finishes in the frame it starts.
pub struct Instant {
    name: &'static str,
    result: BtNodeResult,
}

impl Instant {
    pub fn new(name: &'static str, result: BtNodeResult) -> Self {
        Self { name, result }
    }
}

impl TaskNode<RecordingWorld> for Instant {
    fn execute(
        &self,
        ctx: &mut NodeContext<'_, RecordingWorld>,
        _memory: &mut NodeMemory,
    ) -> BtNodeResult {
        ctx.world.executed.push(self.name);
        self.result
    }
}

#[derive(Debug, Clone, Default)]
struct LatentState {
    ticks_left: u32,
    aborting_left: Option<u32>,
}

/// Runs for `ticks` ticks. With `abort_ticks` the abort itself takes that many ticks.
pub struct Latent {
    name: &'static str,
    ticks: u32,
    result: BtNodeResult,
    abort_ticks: Option<u32>,
}

impl Latent {
    pub fn new(name: &'static str, ticks: u32) -> Self {
        Self {
            name,
            ticks,
            result: BtNodeResult::Succeeded,
            abort_ticks: None,
        }
    }

    pub fn with_latent_abort(mut self, ticks: u32) -> Self {
        self.abort_ticks = Some(ticks);
        self
    }
}

impl TaskNode<RecordingWorld> for Latent {
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::state(LatentState::default())
    }

    fn execute(
        &self,
        ctx: &mut NodeContext<'_, RecordingWorld>,
        memory: &mut NodeMemory,
    ) -> BtNodeResult {
        ctx.world.executed.push(self.name);
        let Some(state) = memory.get_mut::<LatentState>() else {
            return BtNodeResult::Failed;
        };
        state.ticks_left = self.ticks;
        state.aborting_left = None;
        BtNodeResult::InProgress
    }

    fn tick(
        &self,
        ctx: &mut NodeContext<'_, RecordingWorld>,
        memory: &mut NodeMemory,
    ) -> Option<BtNodeResult> {
        let state = memory.get_mut::<LatentState>()?;
        if let Some(left) = state.aborting_left.as_mut() {
            *left = left.saturating_sub(1);
            return (*left == 0).then_some(BtNodeResult::Aborted);
        }
        ctx.world.ticked.push(self.name);
        state.ticks_left = state.ticks_left.saturating_sub(1);
        (state.ticks_left == 0).then_some(self.result)
    }

    fn abort(
        &self,
        ctx: &mut NodeContext<'_, RecordingWorld>,
        memory: &mut NodeMemory,
    ) -> BtNodeResult {
        ctx.world.aborted.push(self.name);
        match (self.abort_ticks, memory.get_mut::<LatentState>()) {
            (Some(ticks), Some(state)) if ticks > 0 => {
                state.aborting_left = Some(ticks);
                BtNodeResult::InProgress
            }
            _ => BtNodeResult::Aborted,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Count(u32);

/// Counts its executions in memory that survives subtree restores.
pub struct Counter;

impl TaskNode<RecordingWorld> for Counter {
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::state(Count::default())
    }

    fn init_memory(&self, memory: &mut NodeMemory, init: MemoryInit) {
        if init == MemoryInit::Initialize {
            if let Some(count) = memory.get_mut::<Count>() {
                count.0 = 0;
            }
        }
    }

    fn execute(
        &self,
        ctx: &mut NodeContext<'_, RecordingWorld>,
        memory: &mut NodeMemory,
    ) -> BtNodeResult {
        let Some(count) = memory.get_mut::<Count>() else {
            return BtNodeResult::Failed;
        };
        count.0 += 1;
        ctx.world.counts.push(count.0);
        BtNodeResult::Succeeded
    }
}

/// Drives `comp` for `ticks` frames starting at `*tick`.
pub fn run(
    comp: &mut BehaviorTreeComponent<RecordingWorld>,
    world: &mut RecordingWorld,
    tick: &mut u64,
    ticks: u32,
) {
    for _ in 0..ticks {
        let ctx = TickContext::new(*tick, 0.1);
        comp.tick(&ctx, world);
        *tick += 1;
    }
}

pub fn component_with_trace() -> BehaviorTreeComponent<RecordingWorld> {
    let mut comp = BehaviorTreeComponent::new(1);
    comp.blackboard_mut().set(TRACE_LOG, TraceLog::default());
    comp
}

pub fn traced_tasks(comp: &BehaviorTreeComponent<RecordingWorld>) -> Vec<u16> {
    comp.blackboard()
        .get(TRACE_LOG)
        .map(|log| log.nodes_tagged("bt.task.execute"))
        .unwrap_or_default()
}
