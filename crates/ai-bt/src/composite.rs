use std::rc::Rc;

use ai_core::WorldMut;

use crate::component::{BehaviorTreeComponent, Frame};
use crate::index::{BtNodeIndex, ChildIndex, ExecutionIndex};
use crate::node::{
    BtNodeResult, CompositeKind, FlowAbortMode, NodeContext, ParallelFinishMode, ProcessedFlow,
};
use crate::search::{SearchUpdate, UpdateMode, UpdateTarget};
use crate::tree::{BehaviorTree, ChildExecutionIndex};

/// Child slot of a parallel composite that holds the main task.
pub const PARALLEL_MAIN_TASK: usize = 0;
/// Child slot of a parallel composite that holds the background branch.
pub const PARALLEL_BACKGROUND: usize = 1;

impl<W> BehaviorTreeComponent<W>
where
    W: WorldMut + 'static,
{
    /// Picks the next child of `composite` in the active instance whose decorators pass.
    ///
    /// Children rejected by their decorators turn `last_result` into `Failed`.
    pub(crate) fn find_child_to_execute(
        &mut self,
        f: &mut Frame<'_, W>,
        composite: ExecutionIndex,
        last_result: &mut BtNodeResult,
    ) -> ChildIndex {
        let inst = self.active_instance_idx;
        let Some(tree) = self.tree_at(inst) else {
            return ChildIndex::ReturnToParent;
        };
        let Some(node) = tree.composite(composite) else {
            return ChildIndex::ReturnToParent;
        };
        let current = self
            .instance_stack
            .get_mut(usize::from(inst))
            .and_then(|i| i.memory.composite_mut(composite))
            .map(|m| m.current_child)
            .unwrap_or_default();

        let mut child = self.get_next_child(&tree, inst, composite, current, *last_result);
        while let ChildIndex::Child(idx) = child {
            if idx >= node.children.len() || self.search_data.postpone_search {
                break;
            }
            if self.do_decorators_allow_execution(f, inst, composite, idx) {
                self.on_child_activation(f, &tree, inst, composite, idx);
                return child;
            }

            *last_result = BtNodeResult::Failed;
            self.notify_decorators_on_failed_activation(&tree, inst, composite, idx);
            child = self.get_next_child(&tree, inst, composite, child, *last_result);
        }
        ChildIndex::ReturnToParent
    }

    fn get_next_child(
        &mut self,
        tree: &Rc<BehaviorTree<W>>,
        inst: u16,
        composite: ExecutionIndex,
        last_child: ChildIndex,
        last_result: BtNodeResult,
    ) -> ChildIndex {
        let Some(node) = tree.composite(composite) else {
            return ChildIndex::ReturnToParent;
        };

        let search_start = self.search_data.search_start;
        if last_child == ChildIndex::NotInitialized
            && search_start.is_set()
            && BtNodeIndex::new(inst, composite).takes_priority_over(search_start)
        {
            return matching_child_index(tree, inst, composite, search_start);
        }

        let restart_pending = self.is_restart_pending();
        let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) else {
            return ChildIndex::ReturnToParent;
        };
        if let Some(memory) = instance.memory.composite_mut(composite) {
            if memory.override_child != ChildIndex::NotInitialized && !restart_pending {
                return std::mem::take(&mut memory.override_child);
            }
        }

        let next_in_order = |wanted: BtNodeResult| match last_child {
            ChildIndex::NotInitialized => ChildIndex::Child(0),
            ChildIndex::Child(prev) if last_result == wanted && prev + 1 < node.children.len() => {
                ChildIndex::Child(prev + 1)
            }
            _ => ChildIndex::ReturnToParent,
        };
        match node.kind {
            CompositeKind::Sequence => next_in_order(BtNodeResult::Succeeded),
            CompositeKind::Selector => next_in_order(BtNodeResult::Failed),
            CompositeKind::Parallel(_) => self.parallel_next_child(inst, composite, last_child),
        }
    }

    fn parallel_next_child(
        &mut self,
        inst: u16,
        composite: ExecutionIndex,
        last_child: ChildIndex,
    ) -> ChildIndex {
        let search_id = self.search_data.search_id;
        let restart_pending = self.is_restart_pending();
        let Some(memory) = self
            .instance_stack
            .get_mut(usize::from(inst))
            .and_then(|i| i.memory.parallel_mut(composite))
        else {
            return ChildIndex::ReturnToParent;
        };

        let mut next = ChildIndex::ReturnToParent;
        if last_child == ChildIndex::NotInitialized {
            next = ChildIndex::Child(PARALLEL_MAIN_TASK);
            memory.main_task_result = BtNodeResult::Failed;
            memory.repeat_main = false;
        } else if (memory.main_task_active || memory.force_background) && !restart_pending {
            next = ChildIndex::Child(PARALLEL_BACKGROUND);
            memory.force_background = false;
        } else if memory.repeat_main {
            next = ChildIndex::Child(PARALLEL_MAIN_TASK);
            memory.repeat_main = false;
        }

        let revisited = last_child == next && memory.last_search_id == Some(search_id);
        memory.last_search_id = Some(search_id);
        if revisited {
            // background branch finished instantly; wait for the next tick
            self.search_data.postpone_search = true;
        }
        next
    }

    pub(crate) fn do_decorators_allow_execution(
        &mut self,
        f: &mut Frame<'_, W>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
    ) -> bool {
        let Some(tree) = self.tree_at(inst) else {
            return false;
        };
        let Some(slot) = tree.composite(composite).and_then(|c| c.children.get(child)) else {
            return false;
        };
        for &decorator in &slot.decorators {
            if !self.decorator_allows(f, BtNodeIndex::new(inst, decorator)) {
                tracing::debug!(
                    decorator = tree.node_name(decorator),
                    instance = inst,
                    "decorator blocks execution"
                );
                return false;
            }
        }
        true
    }

    /// Condition of one decorator with the inverse flag applied.
    pub(crate) fn decorator_allows(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex) -> bool {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return false;
        };
        let Some(entry) = tree.decorator(node.execution_index) else {
            return false;
        };
        let agent = self.agent;
        let Some((memory, blackboard)) = self.node_access(node) else {
            return false;
        };
        let ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
        entry.node.condition(&ctx, memory) != entry.inverse
    }

    fn on_child_activation(
        &mut self,
        f: &mut Frame<'_, W>,
        tree: &Rc<BehaviorTree<W>>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
    ) {
        let Some(slot) = tree.composite(composite).and_then(|c| c.children.get(child)) else {
            return;
        };
        self.notify_decorators_on_activation(f, tree, inst, composite, child);
        if tree.is_composite(slot.child) {
            self.on_node_activation(tree, inst, slot.child);
        }
        if let Some(memory) = self
            .instance_stack
            .get_mut(usize::from(inst))
            .and_then(|i| i.memory.composite_mut(composite))
        {
            memory.current_child = ChildIndex::Child(child);
        }
    }

    fn notify_decorators_on_activation(
        &mut self,
        f: &mut Frame<'_, W>,
        tree: &Rc<BehaviorTree<W>>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
    ) {
        let Some(node) = tree.composite(composite) else {
            return;
        };
        let Some(slot) = node.children.get(child) else {
            return;
        };
        let current = self
            .instance_stack
            .get_mut(usize::from(inst))
            .and_then(|i| i.memory.composite_mut(composite))
            .map(|m| m.current_child)
            .unwrap_or_default();
        let repeated = match node.kind {
            CompositeKind::Parallel(_) => current != ChildIndex::NotInitialized,
            _ => current == ChildIndex::Child(child),
        };

        let agent = self.agent;
        for &decorator in &slot.decorators {
            let Some(entry) = tree.decorator(decorator) else {
                continue;
            };
            let index = BtNodeIndex::new(inst, decorator);
            let flow = match self.node_access(index) {
                Some((memory, blackboard)) => {
                    let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                    entry.node.on_node_activation(&mut ctx, memory, repeated)
                }
                None => ProcessedFlow::Continue,
            };
            if flow == ProcessedFlow::RepeatBranch {
                self.set_child_override(inst, composite, node.kind, child);
            }

            match entry.abort_mode {
                FlowAbortMode::LowerPriority => {
                    self.queue_update(index, UpdateTarget::Decorator, UpdateMode::Remove)
                }
                FlowAbortMode::SelfBranch | FlowAbortMode::Both => {
                    self.queue_update(index, UpdateTarget::Decorator, UpdateMode::Add)
                }
                FlowAbortMode::None => {}
            }
        }
    }

    fn notify_decorators_on_failed_activation(
        &mut self,
        tree: &Rc<BehaviorTree<W>>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
    ) {
        let Some(slot) = tree.composite(composite).and_then(|c| c.children.get(child)) else {
            return;
        };
        for &decorator in &slot.decorators {
            let watches_lower = tree.decorator(decorator).is_some_and(|d| {
                matches!(d.abort_mode, FlowAbortMode::LowerPriority | FlowAbortMode::Both)
            });
            if watches_lower {
                self.queue_update(
                    BtNodeIndex::new(inst, decorator),
                    UpdateTarget::Decorator,
                    UpdateMode::Add,
                );
            }
        }
    }

    /// Runs the slot's decorators after its child finished. `queue_updates` is off when the
    /// parallel main task finishes outside of a search.
    pub(crate) fn notify_decorators_on_deactivation(
        &mut self,
        f: &mut Frame<'_, W>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
        result: &mut BtNodeResult,
        queue_updates: bool,
    ) {
        let Some(tree) = self.tree_at(inst) else {
            return;
        };
        let Some(slot) = tree.composite(composite).and_then(|c| c.children.get(child)) else {
            return;
        };

        let agent = self.agent;
        for &decorator in &slot.decorators {
            let Some(entry) = tree.decorator(decorator) else {
                continue;
            };
            let index = BtNodeIndex::new(inst, decorator);
            if let Some((memory, blackboard)) = self.node_access(index) {
                let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                if *result != BtNodeResult::Aborted {
                    entry.node.on_node_processed(&mut ctx, memory, result);
                }
                entry.node.on_node_deactivation(&mut ctx, memory, *result);
            }

            if *result == BtNodeResult::Aborted || !queue_updates {
                continue;
            }
            match entry.abort_mode {
                FlowAbortMode::SelfBranch => {
                    self.queue_update(index, UpdateTarget::Decorator, UpdateMode::Remove)
                }
                FlowAbortMode::LowerPriority => {
                    self.queue_update(index, UpdateTarget::Decorator, UpdateMode::Add)
                }
                _ => {}
            }
        }
    }

    /// The search left child slot `child` of `composite` with `result`.
    pub(crate) fn on_child_deactivation(
        &mut self,
        f: &mut Frame<'_, W>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
        result: &mut BtNodeResult,
    ) {
        let Some(tree) = self.tree_at(inst) else {
            return;
        };
        let Some(node) = tree.composite(composite) else {
            return;
        };
        let Some(slot) = node.children.get(child) else {
            return;
        };

        if let Some(task) = tree.task(slot.child) {
            for &service in &task.services {
                self.queue_update(
                    BtNodeIndex::new(inst, service),
                    UpdateTarget::Service,
                    UpdateMode::Remove,
                );
            }
        } else if tree.is_composite(slot.child) {
            self.on_node_deactivation(&tree, inst, slot.child, result);
        }

        let main_task_running = matches!(node.kind, CompositeKind::Parallel(_))
            && child == PARALLEL_MAIN_TASK
            && self
                .instance_stack
                .get_mut(usize::from(inst))
                .and_then(|i| i.memory.parallel_mut(composite))
                .is_some_and(|m| m.main_task_active);
        if !main_task_running {
            self.notify_decorators_on_deactivation(f, inst, composite, child, result, true);
        }
    }

    /// Resets the composite's child cursor and queues its services.
    pub(crate) fn on_node_activation(
        &mut self,
        tree: &Rc<BehaviorTree<W>>,
        inst: u16,
        composite: ExecutionIndex,
    ) {
        self.on_node_restart(inst, composite);
        let Some(node) = tree.composite(composite) else {
            return;
        };
        for &service in &node.services {
            self.queue_update(
                BtNodeIndex::new(inst, service),
                UpdateTarget::Service,
                UpdateMode::Add,
            );
        }
    }

    pub(crate) fn on_node_deactivation(
        &mut self,
        tree: &Rc<BehaviorTree<W>>,
        inst: u16,
        composite: ExecutionIndex,
        result: &mut BtNodeResult,
    ) {
        let Some(node) = tree.composite(composite) else {
            return;
        };

        if matches!(node.kind, CompositeKind::Parallel(_)) {
            if let Some(memory) = self
                .instance_stack
                .get_mut(usize::from(inst))
                .and_then(|i| i.memory.parallel_mut(composite))
            {
                if !memory.main_task_active {
                    *result = memory.main_task_result;
                }
            }
            if let Some(main) = node.children.get(PARALLEL_MAIN_TASK) {
                self.queue_update(
                    BtNodeIndex::new(inst, main.child),
                    UpdateTarget::ParallelTask,
                    UpdateMode::Remove,
                );
            }
        }

        for &service in &node.services {
            self.queue_update(
                BtNodeIndex::new(inst, service),
                UpdateTarget::Service,
                UpdateMode::Remove,
            );
        }
    }

    pub(crate) fn on_node_restart(&mut self, inst: u16, composite: ExecutionIndex) {
        if let Some(memory) = self
            .instance_stack
            .get_mut(usize::from(inst))
            .and_then(|i| i.memory.composite_mut(composite))
        {
            memory.current_child = ChildIndex::NotInitialized;
            memory.override_child = ChildIndex::NotInitialized;
        }
    }

    fn set_child_override(
        &mut self,
        inst: u16,
        composite: ExecutionIndex,
        kind: CompositeKind,
        child: usize,
    ) {
        let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) else {
            return;
        };
        match kind {
            CompositeKind::Parallel(_) => {
                if child == PARALLEL_MAIN_TASK {
                    if let Some(memory) = instance.memory.parallel_mut(composite) {
                        memory.repeat_main = true;
                    }
                }
            }
            _ => {
                if let Some(memory) = instance.memory.composite_mut(composite) {
                    memory.override_child = ChildIndex::Child(child);
                }
            }
        }
    }

    /// Parallel bookkeeping for a change of the main task's state.
    pub(crate) fn notify_child_execution(
        &mut self,
        f: &mut Frame<'_, W>,
        inst: u16,
        composite: ExecutionIndex,
        child: usize,
        result: BtNodeResult,
    ) {
        let Some(tree) = self.tree_at(inst) else {
            return;
        };
        let Some(node) = tree.composite(composite) else {
            return;
        };
        let CompositeKind::Parallel(finish_mode) = node.kind else {
            return;
        };
        if child != PARALLEL_MAIN_TASK {
            return;
        }
        let Some(main) = node.children.get(PARALLEL_MAIN_TASK).map(|s| s.child) else {
            return;
        };
        let main_index = BtNodeIndex::new(inst, main);

        let Some(memory) = self
            .instance_stack
            .get_mut(usize::from(inst))
            .and_then(|i| i.memory.parallel_mut(composite))
        else {
            return;
        };
        memory.main_task_result = result;
        let was_active = memory.main_task_active;
        let repeat_main = memory.repeat_main;

        if result == BtNodeResult::InProgress {
            if self.get_task_status(main_index) == crate::node::TaskStatus::Active {
                if let Some(memory) = self
                    .instance_stack
                    .get_mut(usize::from(inst))
                    .and_then(|i| i.memory.parallel_mut(composite))
                {
                    memory.main_task_active = true;
                    memory.force_background = false;
                }
                self.register_parallel_task(inst, main);
                self.request_execution_with_result(f, BtNodeResult::Succeeded);
            }
        } else if was_active {
            if let Some(memory) = self
                .instance_stack
                .get_mut(usize::from(inst))
                .and_then(|i| i.memory.parallel_mut(composite))
            {
                memory.main_task_active = false;
            }

            let mut decorated = result;
            self.notify_decorators_on_deactivation(
                f,
                inst,
                composite,
                PARALLEL_MAIN_TASK,
                &mut decorated,
                false,
            );
            self.unregister_parallel_task(inst, main);

            if decorated != BtNodeResult::Aborted {
                let background = BtNodeIndex::new(
                    inst,
                    tree.child_execution_index(
                        composite,
                        PARALLEL_BACKGROUND,
                        ChildExecutionIndex::FirstNode,
                    ),
                );
                let background_running = self.is_executing_branch(background, PARALLEL_BACKGROUND);
                if repeat_main
                    || finish_mode == ParallelFinishMode::AbortBackground
                    || !background_running
                {
                    self.request_execution(
                        f,
                        BtNodeIndex::new(inst, composite),
                        main_index,
                        Some(PARALLEL_MAIN_TASK),
                        decorated,
                    );
                }
            }
        } else if result == BtNodeResult::Succeeded
            && finish_mode == ParallelFinishMode::WaitForBackground
        {
            if let Some(memory) = self
                .instance_stack
                .get_mut(usize::from(inst))
                .and_then(|i| i.memory.parallel_mut(composite))
            {
                memory.force_background = true;
            }
            self.request_execution_with_result(f, BtNodeResult::Succeeded);
        }
    }

    pub(crate) fn queue_update(&mut self, node: BtNodeIndex, target: UpdateTarget, mode: UpdateMode) {
        let update = SearchUpdate::new(node, target, mode);
        self.search_data
            .add_unique_update(update, self.instance_stack.as_slice());
    }
}

/// Child slot of `composite` whose range contains `node`.
///
/// A node in a lower instance allows every slot; one in a higher instance allows none.
fn matching_child_index<W>(
    tree: &BehaviorTree<W>,
    inst: u16,
    composite: ExecutionIndex,
    node: BtNodeIndex,
) -> ChildIndex
where
    W: WorldMut + 'static,
{
    let Some(c) = tree.composite(composite) else {
        return ChildIndex::ReturnToParent;
    };
    if node.instance_index != inst {
        return match c.children.len().checked_sub(1) {
            Some(last) if inst > node.instance_index => ChildIndex::Child(last),
            _ => ChildIndex::ReturnToParent,
        };
    }
    if composite > node.execution_index {
        return ChildIndex::ReturnToParent;
    }
    (0..c.children.len())
        .find(|&idx| {
            node.execution_index
                < tree.child_execution_index(composite, idx + 1, ChildExecutionIndex::FirstNode)
        })
        .map_or(ChildIndex::ReturnToParent, ChildIndex::Child)
}
