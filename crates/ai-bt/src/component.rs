use std::collections::BTreeMap;
use std::rc::Rc;

use ai_core::{Blackboard, BlackboardNotificationResult, ObserverHandle, TickContext, WorldMut};
use ai_tools::TraceEvent;
use tracing::{debug, info, warn};

use crate::config::BtComponentConfig;
use crate::index::{BtNodeIndex, ExecutionIndex, NodeRelativePriority};
use crate::instance::{BehaviorTreeInstance, KnownInstance};
use crate::memory::{MemoryClear, NodeMemory};
use crate::node::{ActiveNodeType, BtNodeResult, NodeContext, TaskStatus};
use crate::search::SearchData;
use crate::tree::{BehaviorTree, ChildExecutionIndex, NodeKind, TaskBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Restart from the root when the tree runs out of nodes.
    #[default]
    Looped,
    SingleRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Wait for latent aborts before tearing the instances down.
    Safe,
    Forced,
}

/// Search waiting to be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Composite the search starts from; `None` means no request.
    pub execute_node: Option<BtNodeIndex>,
    pub search_start: BtNodeIndex,
    pub search_end: BtNodeIndex,
    pub continue_with_result: BtNodeResult,
    /// False when the search restarts a branch instead of picking its next child.
    pub try_next_child: bool,
}

impl Default for ExecutionRequest {
    fn default() -> Self {
        Self {
            execute_node: None,
            search_start: BtNodeIndex::UNSET,
            search_end: BtNodeIndex::UNSET,
            continue_with_result: BtNodeResult::Succeeded,
            try_next_child: false,
        }
    }
}

/// Outcome of a finished search, applied once aborting tasks are done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingExecution {
    /// Task in the active instance.
    pub next_task: Option<ExecutionIndex>,
    pub out_of_nodes: bool,
    /// A new request arrived; this result is stale until the request is searched.
    pub locked: bool,
}

impl PendingExecution {
    pub fn is_set(&self) -> bool {
        (self.next_task.is_some() || self.out_of_nodes) && !self.locked
    }
}

struct TreeStartInfo<W>
where
    W: WorldMut + 'static,
{
    tree: Option<Rc<BehaviorTree<W>>>,
    mode: ExecutionMode,
    pending_initialize: bool,
}

/// Per-call access to the caller's tick and world.
pub(crate) struct Frame<'a, W>
where
    W: WorldMut + 'static,
{
    pub(crate) tick: &'a TickContext,
    pub(crate) world: &'a mut W,
}

/// Runs behavior trees for one agent.
///
/// Flow changes are requested, searched and applied in [`BehaviorTreeComponent::tick`]; node
/// hooks never call back into the component.
pub struct BehaviorTreeComponent<W>
where
    W: WorldMut + 'static,
{
    pub(crate) agent: W::Agent,
    pub(crate) blackboard: Blackboard,
    pub(crate) config: BtComponentConfig,
    pub(crate) instance_stack: Vec<BehaviorTreeInstance<W>>,
    pub(crate) known_instances: Vec<KnownInstance<W>>,
    pub(crate) active_instance_idx: u16,
    pub(crate) search_data: SearchData,
    pub(crate) execution_request: ExecutionRequest,
    pub(crate) pending_execution: PendingExecution,
    pub(crate) observers: BTreeMap<ObserverHandle, BtNodeIndex>,
    tree_start: TreeStartInfo<W>,
    pub(crate) loop_execution: bool,
    pub(crate) is_running: bool,
    pub(crate) is_paused: bool,
    pub(crate) requested_flow_update: bool,
    pub(crate) requested_stop: bool,
    pub(crate) deferred_stop: bool,
    pub(crate) waiting_for_aborting_tasks: bool,
}

impl<W> BehaviorTreeComponent<W>
where
    W: WorldMut + 'static,
{
    pub fn new(agent: W::Agent) -> Self {
        Self::with_config(agent, BtComponentConfig::default())
    }

    pub fn with_config(agent: W::Agent, config: BtComponentConfig) -> Self {
        Self {
            agent,
            blackboard: Blackboard::new(),
            config,
            instance_stack: Vec::new(),
            known_instances: Vec::new(),
            active_instance_idx: 0,
            search_data: SearchData::new(),
            execution_request: ExecutionRequest::default(),
            pending_execution: PendingExecution::default(),
            observers: BTreeMap::new(),
            tree_start: TreeStartInfo {
                tree: None,
                mode: ExecutionMode::Looped,
                pending_initialize: false,
            },
            loop_execution: false,
            is_running: false,
            is_paused: false,
            requested_flow_update: false,
            requested_stop: false,
            deferred_stop: false,
            waiting_for_aborting_tasks: false,
        }
    }

    pub fn agent(&self) -> W::Agent {
        self.agent
    }

    pub fn config(&self) -> &BtComponentConfig {
        &self.config
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    /// Writes here are seen by observing decorators on the next tick.
    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Starts `tree` as the root instance. Does nothing if it is already the running root.
    pub fn start_tree(
        &mut self,
        ctx: &TickContext,
        world: &mut W,
        tree: Rc<BehaviorTree<W>>,
        mode: ExecutionMode,
    ) {
        let already_running = self
            .root_tree()
            .is_some_and(|current| Rc::ptr_eq(current, &tree))
            && self.is_running
            && !self.requested_stop;
        if already_running {
            debug!(tree = tree.name(), "start ignored, tree already running");
            return;
        }

        info!(tree = tree.name(), ?mode, "starting behavior tree");
        self.tree_start = TreeStartInfo {
            tree: Some(tree),
            mode,
            pending_initialize: true,
        };
        let mut f = Frame { tick: ctx, world };
        self.process_pending_initialize(&mut f);
    }

    pub fn stop_tree(&mut self, ctx: &TickContext, world: &mut W, mode: StopMode) {
        let mut f = Frame { tick: ctx, world };
        self.stop_tree_in_frame(&mut f, mode);
    }

    pub fn restart_tree(&mut self, ctx: &TickContext, world: &mut W) {
        let mut f = Frame { tick: ctx, world };
        self.restart_tree_in_frame(&mut f);
    }

    /// Stops everything and forgets stored subtree memory.
    pub fn cleanup(&mut self, ctx: &TickContext, world: &mut W) {
        let mut f = Frame { tick: ctx, world };
        self.remove_all_instances(&mut f);
        self.tree_start.tree = None;
        self.tree_start.pending_initialize = false;
    }

    pub fn pause_logic(&mut self, reason: &str) {
        info!(reason, "behavior tree paused");
        self.is_paused = true;
    }

    pub fn resume_logic(&mut self, reason: &str) {
        if !self.is_paused {
            return;
        }
        info!(reason, "behavior tree resumed");
        self.is_paused = false;
        if self.execution_request.execute_node.is_some() {
            self.schedule_execution_update();
        }
    }

    pub(crate) fn process_pending_initialize(&mut self, f: &mut Frame<'_, W>) {
        self.stop_tree_in_frame(f, StopMode::Safe);
        if self.waiting_for_aborting_tasks {
            return;
        }

        self.remove_all_instances(f);
        self.tree_start.pending_initialize = false;
        let Some(tree) = self.tree_start.tree.clone() else {
            return;
        };
        self.loop_execution = self.tree_start.mode == ExecutionMode::Looped;
        self.is_running = true;
        if let Err(err) = self.push_instance(f, tree) {
            warn!(error = %err, "failed to start behavior tree");
            self.is_running = false;
        }
    }

    pub(crate) fn restart_tree_in_frame(&mut self, f: &mut Frame<'_, W>) {
        if !self.is_running {
            if self.tree_start.tree.is_some() {
                self.tree_start.pending_initialize = true;
                self.process_pending_initialize(f);
            }
        } else if self.requested_stop {
            self.tree_start.pending_initialize = true;
        } else if !self.instance_stack.is_empty() {
            let root = BtNodeIndex::new(0, 0);
            self.request_execution(f, root, root, None, BtNodeResult::Aborted);
        }
    }

    pub(crate) fn stop_tree_in_frame(&mut self, f: &mut Frame<'_, W>, mode: StopMode) {
        if !self.requested_stop {
            self.requested_stop = true;
            for idx in (0..self.instance_stack.len()).rev() {
                self.abort_instance_for_stop(f, idx as u16);
            }
        }

        if self.waiting_for_aborting_tasks {
            if mode == StopMode::Safe {
                debug!("stop waits for aborting tasks");
                self.deferred_stop = true;
                return;
            }
            warn!("forced stop while tasks are still aborting");
        }

        let had_instances = !self.instance_stack.is_empty();
        let mut stack = std::mem::take(&mut self.instance_stack);
        for instance in stack.iter_mut() {
            if let Some(known) = self.known_instances.get_mut(instance.instance_id) {
                instance.cleanup(known, MemoryClear::Destroy);
            }
        }
        self.search_data.reset();
        self.execution_request = ExecutionRequest::default();
        self.pending_execution = PendingExecution::default();
        self.active_instance_idx = 0;
        self.requested_flow_update = false;
        self.requested_stop = false;
        self.deferred_stop = false;
        self.waiting_for_aborting_tasks = false;
        self.is_running = false;
        if had_instances {
            info!("behavior tree stopped");
        }
    }

    fn abort_instance_for_stop(&mut self, f: &mut Frame<'_, W>, idx: u16) {
        let Some(instance) = self.instance_stack.get_mut(usize::from(idx)) else {
            return;
        };
        let aux = std::mem::take(&mut instance.active_aux_nodes);
        for exec in aux {
            self.aux_cease_relevant(f, BtNodeIndex::new(idx, exec));
        }

        let tasks: Vec<_> = self
            .instance_stack
            .get(usize::from(idx))
            .map(|i| i.parallel_tasks.clone())
            .unwrap_or_default();
        for info in tasks {
            if info.status != TaskStatus::Active {
                continue;
            }
            let node = BtNodeIndex::new(idx, info.task);
            let result = self.abort_task_node(f, node);
            let Some(instance) = self.instance_stack.get_mut(usize::from(idx)) else {
                return;
            };
            if let Some(pos) = instance.parallel_task(info.task) {
                if result == BtNodeResult::InProgress {
                    instance.parallel_tasks[pos].status = TaskStatus::Aborting;
                    self.waiting_for_aborting_tasks = true;
                }
                self.on_task_finished(f, node, result);
            }
        }

        let Some(instance) = self.instance_stack.get_mut(usize::from(idx)) else {
            return;
        };
        if instance.active_node_type != ActiveNodeType::ActiveTask {
            return;
        }
        let Some(task) = instance.active_node else {
            return;
        };
        instance.active_node_type = ActiveNodeType::AbortingTask;
        let node = BtNodeIndex::new(idx, task);
        let result = self.abort_task_node(f, node);
        let still_aborting = self
            .instance_stack
            .get(usize::from(idx))
            .is_some_and(|i| i.active_node_type == ActiveNodeType::AbortingTask);
        if still_aborting {
            self.on_task_finished(f, node, result);
        }
    }

    /// Forced stop, then drops every known instance and its stored memory.
    pub(crate) fn remove_all_instances(&mut self, f: &mut Frame<'_, W>) {
        if !self.instance_stack.is_empty() {
            self.stop_tree_in_frame(f, StopMode::Forced);
        }
        for known in self.known_instances.iter_mut() {
            if !known.persistent_memory.is_empty() {
                known
                    .tree
                    .cleanup_memory(&mut known.persistent_memory, MemoryClear::Destroy);
            }
        }
        self.known_instances.clear();
    }

    // ---------------------------------------------------------------------
    // Tick
    // ---------------------------------------------------------------------

    pub fn tick(&mut self, ctx: &TickContext, world: &mut W) {
        let mut f = Frame { tick: ctx, world };

        let mut updates = 0;
        let budget = self.config.max_flow_updates_per_tick.max(1);
        while self.requested_flow_update && updates < budget {
            self.process_execution_request(&mut f);
            updates += 1;
        }

        if self.instance_stack.is_empty() || !self.is_running || self.is_paused {
            return;
        }

        self.dispatch_blackboard_notifications(&mut f);

        for idx in 0..self.instance_stack.len() {
            let aux = self.instance_stack[idx].active_aux_nodes.clone();
            for exec in aux {
                let node = BtNodeIndex::new(idx as u16, exec);
                if self.is_aux_node_active(node) {
                    self.tick_aux_node(&mut f, node, true);
                }
            }
        }

        for idx in 0..self.instance_stack.len() {
            let tasks = self.instance_stack[idx].parallel_tasks.clone();
            for info in tasks {
                let node = BtNodeIndex::new(idx as u16, info.task);
                if self.get_task_status(node) != TaskStatus::Inactive {
                    self.tick_task(&mut f, node);
                }
            }
        }

        let active = usize::from(self.active_instance_idx);
        if let Some(instance) = self.instance_stack.get(active) {
            if let Some(task) = instance.active_node {
                if matches!(
                    instance.active_node_type,
                    ActiveNodeType::ActiveTask | ActiveNodeType::AbortingTask
                ) {
                    self.tick_task(&mut f, BtNodeIndex::new(active as u16, task));
                }
            }
        }

        let last = self.instance_stack.len().saturating_sub(1);
        if last > usize::from(self.active_instance_idx) {
            let instance = &self.instance_stack[last];
            if instance.active_node_type == ActiveNodeType::AbortingTask {
                if let Some(task) = instance.active_node {
                    self.tick_task(&mut f, BtNodeIndex::new(last as u16, task));
                }
            }
        }
    }

    fn tick_task(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let Some(entry) = tree.task(node.execution_index) else {
            return;
        };
        let TaskBehavior::Custom(task) = &entry.behavior else {
            return;
        };

        let agent = self.agent;
        let result = match self.node_access(node) {
            Some((memory, blackboard)) => {
                let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                task.tick(&mut ctx, memory)
            }
            None => None,
        };
        if let Some(result) = result {
            let aborting = self.get_task_status(node) == TaskStatus::Aborting;
            let result = if aborting { BtNodeResult::Aborted } else { result };
            self.on_task_finished(f, node, result);
        }
    }

    pub(crate) fn tick_aux_node(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex, recheck: bool) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let Some(tree_node) = tree.node(node.execution_index) else {
            return;
        };
        let agent = self.agent;
        match &tree_node.kind {
            NodeKind::Service(service) => {
                if let Some((memory, blackboard)) = self.node_access(node) {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    service.tick(&mut ctx, memory);
                }
            }
            NodeKind::Decorator(decorator) => {
                if let Some((memory, blackboard)) = self.node_access(node) {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    decorator.node.tick(&mut ctx, memory);
                }
                if recheck && decorator.observed_keys.is_empty() {
                    self.recheck_decorator(f, node);
                }
            }
            _ => {}
        }
    }

    fn dispatch_blackboard_notifications(&mut self, f: &mut Frame<'_, W>) {
        let notifications = self.blackboard.drain_notifications();
        for (handle, key_id) in notifications {
            let Some(&node) = self.observers.get(&handle) else {
                continue;
            };
            if !self.is_aux_node_active(node) {
                continue;
            }
            let Some(tree) = self.tree_at(node.instance_index) else {
                continue;
            };
            let Some(decorator) = tree.decorator(node.execution_index) else {
                continue;
            };

            let agent = self.agent;
            let response = match self.node_access(node) {
                Some((memory, blackboard)) => {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    decorator.node.on_blackboard_key_change(&mut ctx, memory, key_id)
                }
                None => continue,
            };
            if response == BlackboardNotificationResult::RemoveObserver {
                self.blackboard.unregister_observer(handle);
                self.observers.remove(&handle);
                continue;
            }
            debug!(node = %node, key_id, "observed key changed");
            self.recheck_decorator(f, node);
        }
    }

    /// Requests a flow change when the decorator's condition disagrees with its branch state.
    pub(crate) fn recheck_decorator(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let Some(child_index) = tree.node(node.execution_index).and_then(|n| n.child_index)
        else {
            return;
        };
        let passes = self.decorator_allows(f, node);
        let executing = self.is_executing_branch(node, child_index);
        if passes != executing {
            self.request_execution_by_decorator(f, node);
        }
    }

    // ---------------------------------------------------------------------
    // Aux node relevance
    // ---------------------------------------------------------------------

    pub(crate) fn aux_become_relevant(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let Some(tree_node) = tree.node(node.execution_index) else {
            return;
        };
        let agent = self.agent;
        match &tree_node.kind {
            NodeKind::Service(service) => {
                if let Some((memory, blackboard)) = self.node_access(node) {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    service.on_become_relevant(&mut ctx, memory);
                }
            }
            NodeKind::Decorator(decorator) => {
                if let Some((memory, blackboard)) = self.node_access(node) {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    decorator.node.on_become_relevant(&mut ctx, memory);
                }
                for &key in &decorator.observed_keys {
                    let handle = self.blackboard.register_observer(key);
                    self.observers.insert(handle, node);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn aux_cease_relevant(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let Some(tree_node) = tree.node(node.execution_index) else {
            return;
        };
        let agent = self.agent;
        match &tree_node.kind {
            NodeKind::Service(service) => {
                if let Some((memory, blackboard)) = self.node_access(node) {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    service.on_cease_relevant(&mut ctx, memory);
                }
            }
            NodeKind::Decorator(decorator) => {
                if let Some((memory, blackboard)) = self.node_access(node) {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    decorator.node.on_cease_relevant(&mut ctx, memory);
                }
                let handles: Vec<ObserverHandle> = self
                    .observers
                    .iter()
                    .filter(|(_, owner)| **owner == node)
                    .map(|(handle, _)| *handle)
                    .collect();
                for handle in handles {
                    self.blackboard.unregister_observer(handle);
                    self.observers.remove(&handle);
                }
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_waiting_for_aborting_tasks(&self) -> bool {
        self.waiting_for_aborting_tasks
    }

    /// True while a request restarts a branch rather than continuing it.
    pub fn is_restart_pending(&self) -> bool {
        self.execution_request.execute_node.is_some() && !self.execution_request.try_next_child
    }

    pub fn execution_request(&self) -> &ExecutionRequest {
        &self.execution_request
    }

    pub fn search_data(&self) -> &SearchData {
        &self.search_data
    }

    pub fn root_tree(&self) -> Option<&Rc<BehaviorTree<W>>> {
        self.instance_stack.first().map(|i| &i.tree)
    }

    pub fn instance_count(&self) -> usize {
        self.instance_stack.len()
    }

    pub fn instance(&self, idx: u16) -> Option<&BehaviorTreeInstance<W>> {
        self.instance_stack.get(usize::from(idx))
    }

    pub fn active_instance_index(&self) -> u16 {
        self.active_instance_idx
    }

    pub fn active_node(&self) -> Option<BtNodeIndex> {
        let instance = self.instance_stack.get(usize::from(self.active_instance_idx))?;
        instance
            .active_node
            .map(|exec| BtNodeIndex::new(self.active_instance_idx, exec))
    }

    /// Name of the active node when it is a task.
    pub fn active_task_name(&self) -> Option<&str> {
        let instance = self.instance_stack.get(usize::from(self.active_instance_idx))?;
        let exec = instance.active_node?;
        instance.tree.task(exec)?;
        Some(instance.tree.node_name(exec))
    }

    pub fn is_aux_node_active(&self, node: BtNodeIndex) -> bool {
        self.instance_stack
            .get(usize::from(node.instance_index))
            .is_some_and(|i| i.is_aux_active(node.execution_index))
    }

    /// Parallel task entries first, then the active node of the instance.
    pub fn get_task_status(&self, node: BtNodeIndex) -> TaskStatus {
        let Some(instance) = self.instance_stack.get(usize::from(node.instance_index)) else {
            return TaskStatus::Inactive;
        };
        if let Some(pos) = instance.parallel_task(node.execution_index) {
            return instance.parallel_tasks[pos].status;
        }
        if instance.active_node == Some(node.execution_index) {
            return match instance.active_node_type {
                ActiveNodeType::ActiveTask => TaskStatus::Active,
                ActiveNodeType::AbortingTask => TaskStatus::Aborting,
                _ => TaskStatus::Inactive,
            };
        }
        TaskStatus::Inactive
    }

    /// True when the active node is `node` or lies inside child slot `child_index` of its parent.
    pub fn is_executing_branch(&self, node: BtNodeIndex, child_index: usize) -> bool {
        let Some(instance) = self.instance_stack.get(usize::from(node.instance_index)) else {
            return false;
        };
        let Some(active) = instance.active_node else {
            return false;
        };
        if node.execution_index == instance.root() || node.execution_index == active {
            return true;
        }
        let Some(parent) = instance.tree.parent(node.execution_index) else {
            return false;
        };
        let next = instance.tree.child_execution_index(
            parent,
            child_index + 1,
            ChildExecutionIndex::FirstNode,
        );
        active >= node.execution_index && active < next
    }

    pub fn calculate_relative_priority(
        &self,
        node_a: BtNodeIndex,
        node_b: BtNodeIndex,
    ) -> NodeRelativePriority {
        if node_a == node_b {
            NodeRelativePriority::Same
        } else if node_a.takes_priority_over(node_b) {
            NodeRelativePriority::Higher
        } else {
            NodeRelativePriority::Lower
        }
    }

    /// Deepest composite shared by the active paths leading to `node_a` and `node_b`.
    ///
    /// Nodes in different instances meet in the lower instance, at the parent of the task that
    /// pushed the upper one.
    pub fn find_common_parent(
        &self,
        node_a: BtNodeIndex,
        node_b: BtNodeIndex,
    ) -> Option<BtNodeIndex> {
        let common_instance = node_a.instance_index.min(node_b.instance_index);
        let instance = self.instance_stack.get(usize::from(common_instance))?;
        let tree = &instance.tree;
        let path_parent = instance
            .active_node
            .and_then(|n| tree.parent(n))
            .unwrap_or(instance.root());

        let mut a = if node_a.instance_index == common_instance {
            node_a.execution_index
        } else {
            path_parent
        };
        let mut b = if node_b.instance_index == common_instance {
            node_b.execution_index
        } else {
            path_parent
        };

        let depth = |idx: ExecutionIndex| tree.node(idx).map_or(0, |n| n.depth);
        while depth(a) > depth(b) {
            a = tree.parent(a)?;
        }
        while depth(b) > depth(a) {
            b = tree.parent(b)?;
        }
        while a != b {
            a = tree.parent(a)?;
            b = tree.parent(b)?;
        }
        Some(BtNodeIndex::new(common_instance, a))
    }

    // ---------------------------------------------------------------------
    // Internal access
    // ---------------------------------------------------------------------

    pub(crate) fn tree_at(&self, instance: u16) -> Option<Rc<BehaviorTree<W>>> {
        self.instance_stack
            .get(usize::from(instance))
            .map(|i| Rc::clone(&i.tree))
    }

    /// Memory slot of `node` together with the blackboard, for building a [`NodeContext`].
    pub(crate) fn node_access(
        &mut self,
        node: BtNodeIndex,
    ) -> Option<(&mut NodeMemory, &mut Blackboard)> {
        let slot = self
            .instance_stack
            .get_mut(usize::from(node.instance_index))?
            .memory
            .slot_mut(node.execution_index)?;
        Some((slot, &mut self.blackboard))
    }

    pub(crate) fn pending_initialize(&self) -> bool {
        self.tree_start.pending_initialize
    }

    pub(crate) fn schedule_execution_update(&mut self) {
        self.requested_flow_update = true;
    }

    pub(crate) fn trace(
        &mut self,
        f: &Frame<'_, W>,
        tag: &'static str,
        node: Option<BtNodeIndex>,
        value: i64,
    ) {
        let mut event = TraceEvent::new(f.tick.tick, tag).with_value(value);
        if let Some(node) = node {
            event = event.at_node(node.instance_index, node.execution_index);
        }
        ai_tools::emit(&mut self.blackboard, event);
    }
}
