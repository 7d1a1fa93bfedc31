use std::rc::Rc;

use ai_core::{TickContext, WorldMut};
use tracing::{debug, warn};

use crate::component::{BehaviorTreeComponent, Frame, StopMode};
use crate::error::{BtError, Result};
use crate::index::{BtNodeIndex, ChildIndex, ExecutionIndex};
use crate::instance::{BehaviorTreeInstance, KnownInstance, ParallelTaskInfo};
use crate::memory::{InstanceMemory, MemoryClear};
use crate::node::{ActiveNodeType, BtNodeResult, CompositeKind, FlowAbortMode, NodeContext, TaskStatus};
use crate::search::{SearchUpdate, UpdateMode, UpdateTarget};
use crate::tree::{BehaviorTree, ChildExecutionIndex, TaskBehavior};

impl<W> BehaviorTreeComponent<W>
where
    W: WorldMut + 'static,
{
    // ---------------------------------------------------------------------
    // Requests
    // ---------------------------------------------------------------------

    /// A decorator's condition no longer matches the state of its branch.
    pub(crate) fn request_execution_by_decorator(
        &mut self,
        f: &mut Frame<'_, W>,
        decorator: BtNodeIndex,
    ) {
        let Some(tree) = self.tree_at(decorator.instance_index) else {
            return;
        };
        let Some(entry) = tree.decorator(decorator.execution_index) else {
            return;
        };
        let Some(node) = tree.node(decorator.execution_index) else {
            return;
        };
        let (Some(parent), Some(child)) = (node.parent, node.child_index) else {
            return;
        };

        let mode = match entry.abort_mode {
            FlowAbortMode::None => return,
            FlowAbortMode::Both if self.is_executing_branch(decorator, child) => {
                FlowAbortMode::SelfBranch
            }
            FlowAbortMode::Both => FlowAbortMode::LowerPriority,
            other => other,
        };
        let continue_with = if mode == FlowAbortMode::SelfBranch {
            BtNodeResult::Failed
        } else {
            BtNodeResult::Aborted
        };
        debug!(
            decorator = tree.node_name(decorator.execution_index),
            ?mode,
            "decorator requests execution"
        );
        self.request_execution(
            f,
            BtNodeIndex::new(decorator.instance_index, parent),
            decorator,
            Some(child),
            continue_with,
        );
    }

    /// The active node finished with `result`; continue from its parent.
    pub(crate) fn request_execution_with_result(
        &mut self,
        f: &mut Frame<'_, W>,
        result: BtNodeResult,
    ) {
        if matches!(result, BtNodeResult::Aborted | BtNodeResult::InProgress) {
            return;
        }
        let inst = self.active_instance_idx;
        let Some(instance) = self.instance_stack.get(usize::from(inst)) else {
            return;
        };
        let tree = &instance.tree;
        let root = instance.root();
        let (execute, requested_by) = match instance.active_node {
            None => (root, root),
            Some(active) if tree.is_composite(active) => (active, active),
            Some(active) => (tree.parent(active).unwrap_or(root), active),
        };
        self.request_execution(
            f,
            BtNodeIndex::new(inst, execute),
            BtNodeIndex::new(inst, requested_by),
            None,
            result,
        );
    }

    /// Queues a search on `requested_on`.
    ///
    /// `Aborted` switches to a higher priority branch: the search covers only the slot
    /// `requested_by_child` and starts from the common parent of that slot and the active node.
    /// Any other result continues the composite from `requested_by`.
    pub(crate) fn request_execution(
        &mut self,
        f: &mut Frame<'_, W>,
        requested_on: BtNodeIndex,
        requested_by: BtNodeIndex,
        requested_by_child: Option<usize>,
        continue_with: BtNodeResult,
    ) {
        if self.is_paused || self.requested_stop {
            return;
        }
        let inst = requested_on.instance_index;
        let Some(tree) = self.tree_at(inst) else {
            return;
        };
        if self.pending_execution.is_set() && self.pending_execution.out_of_nodes {
            return;
        }

        let switch_to_higher = continue_with == BtNodeResult::Aborted;
        let already_requested = self.execution_request.execute_node.is_some();

        let mut execution_idx = BtNodeIndex::new(inst, requested_by.execution_index);
        let mut last_exec = u16::MAX;
        if switch_to_higher {
            if let Some(child) = requested_by_child {
                let on = requested_on.execution_index;
                execution_idx.execution_index =
                    tree.child_execution_index(on, child, ChildExecutionIndex::FirstNode);
                last_exec =
                    tree.child_execution_index(on, child + 1, ChildExecutionIndex::FirstNode);
            }
        }
        let search_end = BtNodeIndex::new(inst, last_exec);

        if already_requested && self.execution_request.search_start.takes_priority_over(execution_idx)
        {
            debug!(
                start = %self.execution_request.search_start,
                ignored = %execution_idx,
                "request ignored, a higher priority one is pending"
            );
            return;
        }

        if switch_to_higher {
            let active = self.active_instance_idx;
            let Some(active_instance) = self.instance_stack.get(usize::from(active)) else {
                return;
            };
            let active_parent = active_instance
                .active_node
                .and_then(|n| active_instance.tree.parent(n))
                .unwrap_or(active_instance.root());
            let Some(common) =
                self.find_common_parent(requested_on, BtNodeIndex::new(active, active_parent))
            else {
                warn!(requested_on = %requested_on, "no common parent with the active node");
                return;
            };

            let mut it = requested_on;
            while it != common {
                let Some(it_tree) = self.tree_at(it.instance_index) else {
                    return;
                };
                let step = match it_tree.node(it.execution_index) {
                    Some(node) if node.parent.is_some() => node
                        .parent
                        .zip(node.child_index)
                        .map(|(p, c)| (it.instance_index, p, c)),
                    _ => {
                        // root of a subtree: continue at the task that pushed it
                        if it.instance_index == 0 {
                            break;
                        }
                        let below = it.instance_index - 1;
                        self.instance_stack
                            .get(usize::from(below))
                            .and_then(|i| i.active_node.map(|task| (i, task)))
                            .and_then(|(i, task)| {
                                let node = i.tree.node(task)?;
                                Some((below, node.parent?, node.child_index?))
                            })
                    }
                };
                let Some((step_inst, parent, child)) = step else {
                    break;
                };
                if !self.do_decorators_allow_execution(f, step_inst, parent, child) {
                    debug!(requested_on = %requested_on, "request blocked on the path to the common parent");
                    return;
                }
                it = BtNodeIndex::new(step_inst, parent);
            }
            self.execution_request.execute_node = Some(common);
        } else {
            let should_check = requested_by_child.is_some_and(|child| {
                tree.decorator(requested_by.execution_index).is_some()
                    && tree
                        .composite(requested_on.execution_index)
                        .and_then(|c| c.children.get(child))
                        .is_some_and(|slot| !slot.decorators.is_empty())
            });
            if should_check {
                if let Some(child) = requested_by_child {
                    if self.do_decorators_allow_execution(f, inst, requested_on.execution_index, child)
                    {
                        return;
                    }
                }
            }
            self.execution_request.execute_node = Some(requested_on);
        }

        let request = &mut self.execution_request;
        if (!already_requested && switch_to_higher)
            || (request.search_end.is_set() && request.search_end.takes_priority_over(search_end))
        {
            request.search_end = search_end;
        }
        request.search_start = execution_idx;
        request.continue_with_result = continue_with;
        request.try_next_child = !switch_to_higher;
        self.pending_execution.locked = true;

        if self.search_data.search_in_progress {
            debug!("request arrived mid-search, postponing the search");
            self.search_data.postpone_search = true;
        }

        let last_aborting = self
            .instance_stack
            .last()
            .is_some_and(|i| i.active_node_type == ActiveNodeType::AbortingTask);
        if self.waiting_for_aborting_tasks || last_aborting {
            if self.execution_request.search_end.is_set() {
                self.execution_request.search_end = BtNodeIndex::UNSET;
            }
            self.rollback_search_changes(f);
        }

        if !self.waiting_for_aborting_tasks {
            self.schedule_execution_update();
        }
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    pub(crate) fn process_execution_request(&mut self, f: &mut Frame<'_, W>) {
        self.requested_flow_update = false;
        if self.is_paused || self.instance_stack.is_empty() {
            return;
        }
        if self.pending_execution.is_set() {
            self.process_pending_execution(f);
            return;
        }
        let request = self.execution_request;
        let Some(execute) = request.execute_node else {
            return;
        };

        self.search_data.rollback_instance_idx = Some(self.active_instance_idx);
        self.copy_instance_memory_to_persistent();

        let mut node_result = request.continue_with_result;
        let at_execute_node = self
            .instance_stack
            .get(usize::from(self.active_instance_idx))
            .is_some_and(|i| {
                self.active_instance_idx == execute.instance_index
                    && i.active_node == Some(execute.execution_index)
            });
        if !at_execute_node && !self.deactivate_up_to(f, execute, &mut node_result) {
            self.search_data.pending_updates.clear();
            return;
        }

        let search_id = self.search_data.assign_search_id();
        self.search_data.postpone_search = false;
        self.search_data.search_in_progress = true;
        debug!(
            search_id,
            execute = %execute,
            start = %request.search_start,
            end = %request.search_end,
            "search started"
        );
        self.trace(f, "bt.search", Some(execute), search_id as i64);

        let inst = self.active_instance_idx;
        let Some(tree) = self.tree_at(inst) else {
            self.search_data.search_in_progress = false;
            return;
        };
        if let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) {
            if instance.active_node.is_none() {
                instance.active_node = Some(instance.root());
                let root = instance.root();
                self.on_node_activation(&tree, inst, root);
            }
        }

        if !request.try_next_child {
            let start = request.search_start;
            let deactivate_to = if start.execution_index > 0 {
                BtNodeIndex::new(start.instance_index, start.execution_index - 1)
            } else {
                start
            };
            self.unregister_aux_nodes_up_to(deactivate_to);
            self.on_node_restart(execute.instance_index, execute.execution_index);
            self.search_data.search_start = request.search_start;
            self.search_data.search_end = request.search_end;
        } else {
            if request.continue_with_result == BtNodeResult::Failed {
                self.unregister_aux_nodes_up_to(request.search_start);
            }
            self.search_data.search_start = BtNodeIndex::UNSET;
            self.search_data.search_end = BtNodeIndex::UNSET;
        }

        let mut next_task: Option<ExecutionIndex> = None;
        let mut is_search_valid = true;
        let mut test_node = Some(execute.execution_index);
        while let Some(node) = test_node {
            let child = self.find_child_to_execute(f, node, &mut node_result);
            if self.search_data.postpone_search {
                is_search_valid = false;
                break;
            }

            let active = self.active_instance_idx;
            let Some(tree) = self.tree_at(active) else {
                break;
            };
            match child {
                ChildIndex::Child(idx) => {
                    let Some(slot) = tree.composite(node).and_then(|c| c.children.get(idx)) else {
                        break;
                    };
                    if tree.is_composite(slot.child) {
                        test_node = Some(slot.child);
                    } else {
                        next_task = Some(slot.child);
                        test_node = None;
                    }
                }
                _ => {
                    let mut deactivated = node;
                    let mut parent_inst = active;
                    test_node = tree.parent(node);
                    if test_node.is_none() {
                        self.on_node_deactivation(&tree, active, node, &mut node_result);
                        if active > 0 {
                            BehaviorTreeInstance::deactivate_nodes(
                                &self.instance_stack,
                                active,
                                &mut self.search_data,
                            );
                            self.search_data.pending_notifies.push((active, node_result));
                            parent_inst = active - 1;
                            self.active_instance_idx = parent_inst;
                            if let Some(instance) = self.instance_stack.get(usize::from(parent_inst))
                            {
                                if let Some(task) = instance.active_node {
                                    deactivated = task;
                                    test_node = instance.tree.parent(task);
                                }
                            }
                        }
                    }
                    if let Some(parent) = test_node {
                        let slot = self
                            .tree_at(parent_inst)
                            .and_then(|t| t.node(deactivated).and_then(|n| n.child_index));
                        if let Some(slot) = slot {
                            self.on_child_deactivation(f, parent_inst, parent, slot, &mut node_result);
                        }
                    }
                }
            }
        }

        if let Some(task) = next_task {
            let active = self.active_instance_idx;
            let found = BtNodeIndex::new(active, task);
            is_search_valid = found.takes_priority_over(request.search_end);
            let ignores_restart = self.tree_at(active).is_some_and(|t| {
                t.task(task).is_some_and(|entry| match &entry.behavior {
                    TaskBehavior::Custom(node) => node.ignore_restart_self(),
                    TaskBehavior::RunBehavior(_) => false,
                })
            });
            if is_search_valid
                && ignores_restart
                && self
                    .instance_stack
                    .get(usize::from(active))
                    .is_some_and(|i| i.has_active_node(task))
            {
                debug!(task = %found, "search found the running task, keeping it");
                is_search_valid = false;
            }
        }

        let postponed = self.search_data.postpone_search;
        if !is_search_valid || postponed {
            self.rollback_search_changes(f);
        }
        self.search_data.search_in_progress = false;

        if postponed {
            debug!(search_id, "search postponed");
            self.schedule_execution_update();
            return;
        }

        self.execution_request = Default::default();
        self.pending_execution.locked = false;
        if is_search_valid {
            let last_active_task = self
                .instance_stack
                .last()
                .is_some_and(|i| i.active_node_type == ActiveNodeType::ActiveTask);
            if last_active_task {
                self.abort_current_task(f);
            }
            if !self.pending_execution.locked {
                self.pending_execution.next_task = next_task;
                self.pending_execution.out_of_nodes = next_task.is_none();
            }
        }
        debug!(search_id, valid = is_search_valid, ?next_task, "search finished");
        self.process_pending_execution(f);
    }

    /// Leaves every node between the active node and `target`, moving down the instance stack
    /// when needed. Returns false when `target` is not on the active path.
    fn deactivate_up_to(
        &mut self,
        f: &mut Frame<'_, W>,
        target: BtNodeIndex,
        result: &mut BtNodeResult,
    ) -> bool {
        let mut inst = self.active_instance_idx;
        let Some(instance) = self.instance_stack.get(usize::from(inst)) else {
            return false;
        };
        let mut deactivated = instance.active_node;
        let mut deactivate_root = true;
        if deactivated.is_none() && inst > target.instance_index {
            deactivated = Some(instance.root());
            deactivate_root = false;
        }

        while let Some(child) = deactivated {
            let Some(tree) = self.tree_at(inst) else {
                return false;
            };
            match tree.node(child).and_then(|n| n.parent.zip(n.child_index)) {
                Some((parent, slot)) => {
                    self.on_child_deactivation(f, inst, parent, slot, result);
                    deactivated = Some(parent);
                }
                None => {
                    if deactivate_root {
                        self.on_node_deactivation(&tree, inst, child, result);
                    }
                    deactivate_root = true;

                    if inst == 0 {
                        warn!(target = %target, "deactivation target is not on the active path, restarting");
                        self.restart_tree_in_frame(f);
                        return false;
                    }
                    BehaviorTreeInstance::deactivate_nodes(
                        &self.instance_stack,
                        inst,
                        &mut self.search_data,
                    );
                    self.search_data.pending_notifies.push((inst, *result));
                    inst -= 1;
                    self.active_instance_idx = inst;
                    deactivated = self
                        .instance_stack
                        .get(usize::from(inst))
                        .and_then(|i| i.active_node);
                }
            }
            if deactivated == Some(target.execution_index) && inst == target.instance_index {
                break;
            }
        }
        true
    }

    // ---------------------------------------------------------------------
    // Applying search results
    // ---------------------------------------------------------------------

    pub(crate) fn process_pending_execution(&mut self, f: &mut Frame<'_, W>) {
        if self.waiting_for_aborting_tasks || !self.pending_execution.is_set() {
            return;
        }
        let saved = std::mem::take(&mut self.pending_execution);
        let active = self.active_instance_idx;

        let keep_up_to = match saved.next_task {
            Some(task) => BtNodeIndex::new(active, task),
            None => BtNodeIndex::new(0, 0),
        };
        self.unregister_aux_nodes_up_to(keep_up_to);
        self.apply_search_data(f, saved.next_task.map(|t| BtNodeIndex::new(active, t)));

        while self.instance_stack.len() > usize::from(self.active_instance_idx) + 1 {
            let Some(mut instance) = self.instance_stack.pop() else {
                break;
            };
            if let Some(known) = self.known_instances.get_mut(instance.instance_id) {
                instance.cleanup(known, MemoryClear::StoreSubtree);
            }
            debug!(tree = instance.tree.name(), "subtree instance removed");
        }

        match saved.next_task {
            Some(task) if usize::from(self.active_instance_idx) < self.instance_stack.len() => {
                self.execute_task(f, task)
            }
            _ => self.on_tree_finished(f),
        }
    }

    fn apply_search_data(&mut self, f: &mut Frame<'_, W>, new_active: Option<BtNodeIndex>) {
        self.search_data.rollback_instance_idx = None;
        self.search_data.preserve_active_node_memory_on_rollback = false;

        let notifies = std::mem::take(&mut self.search_data.pending_notifies);
        for (instance, result) in notifies {
            debug!(instance, ?result, "subtree finished");
            self.trace(f, "bt.subtree.finished", None, result.code());
        }

        let updates = std::mem::take(&mut self.search_data.pending_updates);
        let limit = new_active.unwrap_or(BtNodeIndex::new(0, 0));
        self.apply_search_updates(f, &updates, limit, false);
        self.apply_search_updates(f, &updates, limit, true);

        for update in &updates {
            if update.mode == UpdateMode::Add && update.is_aux() && self.is_aux_node_active(update.node)
            {
                self.tick_aux_node(f, update.node, false);
            }
        }
    }

    /// Applies one pass of `updates`. Adds of nodes that `new_active` outranks are skipped.
    fn apply_search_updates(
        &mut self,
        f: &mut Frame<'_, W>,
        updates: &[SearchUpdate],
        new_active: BtNodeIndex,
        post_update: bool,
    ) {
        for update in updates {
            if update.post_update != post_update {
                continue;
            }
            let inst = update.node.instance_index;
            let exec = update.node.execution_index;
            let Some(instance) = self.instance_stack.get(usize::from(inst)) else {
                continue;
            };

            let is_active = if update.is_aux() {
                instance.is_aux_active(exec)
            } else {
                instance
                    .parallel_task(exec)
                    .is_some_and(|pos| instance.parallel_tasks[pos].status == TaskStatus::Active)
            };
            let skip = match update.mode {
                UpdateMode::Remove => !is_active,
                UpdateMode::Add => is_active || new_active.takes_priority_over(update.node),
            };
            if skip {
                continue;
            }

            if update.is_aux() {
                let looped_root_service = self.loop_execution
                    && inst == 0
                    && update.target == UpdateTarget::Service
                    && instance.tree.parent(exec) == Some(instance.root());
                if looped_root_service && update.mode == UpdateMode::Remove {
                    continue;
                }
                self.apply_aux_update(f, update.node, update.mode);
            } else {
                self.apply_parallel_task_update(f, update.node, update.mode);
            }
        }
    }

    fn apply_aux_update(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex, mode: UpdateMode) {
        let Some(instance) = self.instance_stack.get_mut(usize::from(node.instance_index)) else {
            return;
        };
        match mode {
            UpdateMode::Remove => {
                instance.active_aux_nodes.retain(|&a| a != node.execution_index);
                self.aux_cease_relevant(f, node);
            }
            UpdateMode::Add => {
                instance.active_aux_nodes.push(node.execution_index);
                self.aux_become_relevant(f, node);
            }
        }
    }

    fn apply_parallel_task_update(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex, mode: UpdateMode) {
        match mode {
            UpdateMode::Remove => {
                let result = self.abort_task_node(f, node);
                let Some(instance) = self.instance_stack.get_mut(usize::from(node.instance_index))
                else {
                    return;
                };
                let Some(pos) = instance.parallel_task(node.execution_index) else {
                    return;
                };
                if result == BtNodeResult::InProgress {
                    instance.parallel_tasks[pos].status = TaskStatus::Aborting;
                    self.waiting_for_aborting_tasks = true;
                }
                self.on_task_finished(f, node, result);
            }
            UpdateMode::Add => {
                if let Some(instance) = self.instance_stack.get_mut(usize::from(node.instance_index)) {
                    instance.parallel_tasks.push(ParallelTaskInfo {
                        task: node.execution_index,
                        status: TaskStatus::Active,
                    });
                }
            }
        }
    }

    /// Keeps only decorator activations that lie before the discarded search range.
    fn apply_discarded_search(&mut self, f: &mut Frame<'_, W>) {
        let end = self.search_data.search_end;
        let updates: Vec<SearchUpdate> = std::mem::take(&mut self.search_data.pending_updates)
            .into_iter()
            .filter(|u| {
                u.mode == UpdateMode::Add
                    && u.target == UpdateTarget::Decorator
                    && u.node.takes_priority_over(end)
            })
            .collect();
        self.apply_search_updates(f, &updates, BtNodeIndex::UNSET, false);
        self.search_data.pending_notifies.clear();
    }

    pub(crate) fn rollback_search_changes(&mut self, f: &mut Frame<'_, W>) {
        let Some(idx) = self.search_data.rollback_instance_idx.take() else {
            return;
        };
        debug!(instance = idx, "rolling back search");
        self.active_instance_idx = idx;
        self.copy_instance_memory_from_persistent();
        self.search_data.preserve_active_node_memory_on_rollback = false;
        self.apply_discarded_search(f);
    }

    fn copy_instance_memory_to_persistent(&mut self) {
        for instance in &self.instance_stack {
            if let Some(known) = self.known_instances.get_mut(instance.instance_id) {
                known.persistent_memory = instance.memory.clone();
            }
        }
    }

    fn copy_instance_memory_from_persistent(&mut self) {
        let preserve = self.search_data.preserve_active_node_memory_on_rollback;
        let last = self.instance_stack.len().saturating_sub(1);
        for (idx, instance) in self.instance_stack.iter_mut().enumerate() {
            let Some(known) = self.known_instances.get(instance.instance_id) else {
                continue;
            };
            let keep = if preserve
                && idx == last
                && instance.active_node_type == ActiveNodeType::AbortingTask
            {
                instance.active_node
            } else {
                None
            };
            instance.memory.restore_from(&known.persistent_memory, keep);
        }
    }

    // ---------------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------------

    fn execute_task(&mut self, f: &mut Frame<'_, W>, task: ExecutionIndex) {
        let inst = self.active_instance_idx;
        let Some(tree) = self.tree_at(inst) else {
            return;
        };
        let Some(entry) = tree.task(task) else {
            warn!(node = task, "pending node is not a task");
            return;
        };

        for &service in &entry.services {
            let node = BtNodeIndex::new(inst, service);
            if self.is_aux_node_active(node) {
                continue;
            }
            if let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) {
                instance.active_aux_nodes.push(service);
            }
            self.aux_become_relevant(f, node);
        }

        let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) else {
            return;
        };
        instance.active_node = Some(task);
        instance.active_node_type = ActiveNodeType::ActiveTask;

        let index = BtNodeIndex::new(inst, task);
        debug!(task = tree.node_name(task), node = %index, "executing task");
        self.trace(f, "bt.task.execute", Some(index), 0);

        let result = match &entry.behavior {
            TaskBehavior::Custom(node) => {
                let agent = self.agent;
                match self.node_access(index) {
                    Some((memory, blackboard)) => {
                        let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                        node.execute(&mut ctx, memory)
                    }
                    None => BtNodeResult::Failed,
                }
            }
            TaskBehavior::RunBehavior(subtree) => match self.push_instance(f, Rc::clone(subtree)) {
                Ok(()) => BtNodeResult::InProgress,
                Err(err) => {
                    warn!(error = %err, "subtree push failed");
                    BtNodeResult::Failed
                }
            },
        };

        let still_active = self.active_instance_idx == inst
            && self
                .instance_stack
                .get(usize::from(inst))
                .is_some_and(|i| i.active_node == Some(task));
        if still_active {
            self.on_task_finished(f, index, result);
        }
    }

    pub(crate) fn on_task_finished(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex, result: BtNodeResult) {
        let inst = node.instance_index;
        let Some(tree) = self.tree_at(inst) else {
            return;
        };
        let Some((parent, slot)) = tree
            .node(node.execution_index)
            .and_then(|n| n.parent.zip(n.child_index))
        else {
            return;
        };
        let was_waiting = self.waiting_for_aborting_tasks;

        self.notify_child_execution(f, inst, parent, slot, result);

        if result == BtNodeResult::InProgress {
            self.update_aborting_tasks();
            return;
        }

        debug!(task = tree.node_name(node.execution_index), node = %node, ?result, "task finished");
        self.trace(f, "bt.task.finished", Some(node), result.code());
        if let Some(TaskBehavior::Custom(task)) = tree.task(node.execution_index).map(|t| &t.behavior) {
            let agent = self.agent;
            if let Some((memory, blackboard)) = self.node_access(node) {
                let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                task.on_task_finished(&mut ctx, memory, result);
            }
        }

        let active_idx = self.active_instance_idx;
        if let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) {
            if instance.active_node == Some(node.execution_index) {
                if inst == active_idx {
                    let was_aborting = instance.active_node_type == ActiveNodeType::AbortingTask;
                    instance.active_node_type = ActiveNodeType::InactiveTask;
                    if !was_aborting {
                        self.request_execution_with_result(f, result);
                    }
                } else if result == BtNodeResult::Aborted {
                    instance.active_node_type = ActiveNodeType::InactiveTask;
                }
            }
        }

        self.update_aborting_tasks();
        if was_waiting && !self.waiting_for_aborting_tasks {
            self.on_aborts_finished(f);
        }
    }

    fn on_aborts_finished(&mut self, f: &mut Frame<'_, W>) {
        debug!("aborting tasks finished");
        if self.deferred_stop {
            self.stop_tree_in_frame(f, StopMode::Safe);
            if self.pending_initialize() {
                self.process_pending_initialize(f);
            }
        } else if self.pending_initialize() {
            self.process_pending_initialize(f);
        } else {
            self.schedule_execution_update();
        }
    }

    fn on_tree_finished(&mut self, f: &mut Frame<'_, W>) {
        self.active_instance_idx = 0;
        self.trace(f, "bt.tree.finished", None, 0);

        if !self.loop_execution || self.instance_stack.is_empty() {
            debug!("tree finished");
            self.stop_tree_in_frame(f, StopMode::Safe);
            return;
        }

        debug!("tree finished, looping");
        if let Some(root) = self.instance_stack.first_mut() {
            root.active_node = None;
            root.active_node_type = ActiveNodeType::Composite;
        }
        self.unregister_aux_nodes_up_to(BtNodeIndex::new(0, 0));
        self.apply_search_data(f, None);

        while self.instance_stack.len() > 1 {
            let Some(mut instance) = self.instance_stack.pop() else {
                break;
            };
            if let Some(known) = self.known_instances.get_mut(instance.instance_id) {
                instance.cleanup(known, MemoryClear::Destroy);
            }
        }

        let root = BtNodeIndex::new(0, 0);
        self.request_execution(f, root, root, Some(0), BtNodeResult::InProgress);
    }

    /// Aborts the task running in the top instance.
    fn abort_current_task(&mut self, f: &mut Frame<'_, W>) {
        let Some(last) = self.instance_stack.len().checked_sub(1) else {
            return;
        };
        let instance = &mut self.instance_stack[last];
        let Some(task) = instance.active_node else {
            return;
        };
        instance.active_node_type = ActiveNodeType::AbortingTask;
        self.search_data.preserve_active_node_memory_on_rollback = true;

        let node = BtNodeIndex::new(last as u16, task);
        debug!(node = %node, "aborting task");
        let result = self.abort_task_node(f, node);

        let still_aborting = self.instance_stack.len() == last + 1
            && self.instance_stack[last].active_node_type == ActiveNodeType::AbortingTask;
        if still_aborting {
            self.on_task_finished(f, node, result);
        }
    }

    /// Calls the task's abort hook. Subtree tasks abort instantly.
    pub(crate) fn abort_task_node(&mut self, f: &mut Frame<'_, W>, node: BtNodeIndex) -> BtNodeResult {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return BtNodeResult::Aborted;
        };
        let Some(TaskBehavior::Custom(task)) = tree.task(node.execution_index).map(|t| &t.behavior)
        else {
            return BtNodeResult::Aborted;
        };
        let agent = self.agent;
        match self.node_access(node) {
            Some((memory, blackboard)) => {
                let mut ctx = NodeContext::new(f.tick, agent, &mut *f.world, blackboard);
                task.abort(&mut ctx, memory)
            }
            None => BtNodeResult::Aborted,
        }
    }

    pub(crate) fn register_parallel_task(&mut self, inst: u16, task: ExecutionIndex) {
        let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) else {
            return;
        };
        if instance.parallel_task(task).is_none() {
            instance.parallel_tasks.push(ParallelTaskInfo {
                task,
                status: TaskStatus::Active,
            });
        }
        if instance.active_node == Some(task) {
            instance.active_node_type = ActiveNodeType::InactiveTask;
        }
    }

    pub(crate) fn unregister_parallel_task(&mut self, inst: u16, task: ExecutionIndex) {
        if let Some(instance) = self.instance_stack.get_mut(usize::from(inst)) {
            instance.parallel_tasks.retain(|t| t.task != task);
        }
        self.update_aborting_tasks();
    }

    pub(crate) fn update_aborting_tasks(&mut self) {
        let last_aborting = self
            .instance_stack
            .last()
            .is_some_and(|i| i.active_node_type == ActiveNodeType::AbortingTask);
        self.waiting_for_aborting_tasks = last_aborting
            || self.instance_stack.iter().any(|i| {
                i.parallel_tasks
                    .iter()
                    .any(|t| t.status == TaskStatus::Aborting)
            });
    }

    // ---------------------------------------------------------------------
    // Instance stack
    // ---------------------------------------------------------------------

    pub(crate) fn push_instance(&mut self, f: &mut Frame<'_, W>, tree: Rc<BehaviorTree<W>>) -> Result<()> {
        if self.instance_stack.len() >= self.config.max_instance_stack_depth {
            return Err(BtError::TooManyInstances(self.config.max_instance_stack_depth));
        }

        let origin = self.instance_stack.last().and_then(|i| i.active_node);
        if let (Some(instance), Some(task)) = (self.instance_stack.last(), origin) {
            let parent_kind = instance
                .tree
                .parent(task)
                .and_then(|p| instance.tree.composite(p))
                .map(|c| c.kind);
            let slot = instance.tree.node(task).and_then(|n| n.child_index);
            if matches!(parent_kind, Some(CompositeKind::Parallel(_)))
                && slot == Some(crate::composite::PARALLEL_MAIN_TASK)
            {
                return Err(BtError::SubtreeNotAllowed(tree.name().to_string()));
            }
        }

        let instance_id = self.update_instance_id(&tree, origin);
        let stored: Option<InstanceMemory> = self
            .known_instances
            .get(instance_id)
            .map(|k| k.persistent_memory.clone())
            .filter(|m| !m.is_empty());
        let instance = BehaviorTreeInstance::initialize(Rc::clone(&tree), instance_id, stored.as_ref());
        let root_services = tree.composite(instance.root()).map(|c| c.services.clone()).unwrap_or_default();
        self.instance_stack.push(instance);
        let idx = (self.instance_stack.len() - 1) as u16;
        self.active_instance_idx = idx;
        debug!(tree = tree.name(), instance = idx, instance_id, "tree instance pushed");

        for service in root_services {
            if let Some(instance) = self.instance_stack.get_mut(usize::from(idx)) {
                instance.active_aux_nodes.push(service);
            }
            self.aux_become_relevant(f, BtNodeIndex::new(idx, service));
        }

        let root = BtNodeIndex::new(idx, 0);
        self.request_execution(f, root, root, Some(0), BtNodeResult::InProgress);
        Ok(())
    }

    /// Known instance id for `tree` reached through the current active path.
    fn update_instance_id(&mut self, tree: &Rc<BehaviorTree<W>>, origin: Option<ExecutionIndex>) -> usize {
        let mut path = vec![origin.unwrap_or(u16::MAX)];
        if let Some(top) = self.instance_stack.len().checked_sub(1) {
            for instance in self.instance_stack[..top].iter().rev() {
                path.push(instance.active_node.unwrap_or(u16::MAX));
            }
        }

        if let Some(id) = self.known_instances.iter().position(|k| k.matches(tree, &path)) {
            return id;
        }
        self.known_instances.push(KnownInstance {
            tree: Rc::clone(tree),
            path,
            persistent_memory: InstanceMemory::default(),
        });
        self.known_instances.len() - 1
    }

    // ---------------------------------------------------------------------
    // Aux node removal
    // ---------------------------------------------------------------------

    /// Queues removal of every active aux node that `index` outranks.
    pub(crate) fn unregister_aux_nodes_up_to(&mut self, index: BtNodeIndex) {
        let mut removals = Vec::new();
        for (inst, instance) in self.instance_stack.iter().enumerate() {
            for &aux in &instance.active_aux_nodes {
                let aux_index = BtNodeIndex::new(inst as u16, aux);
                if index.takes_priority_over(aux_index) {
                    removals.push((aux_index, instance.aux_target(aux)));
                }
            }
        }
        for (node, target) in removals {
            self.queue_update(node, target, UpdateMode::Remove);
        }
    }

    /// Removes aux nodes inside the subtree of `node`, optionally applying right away.
    pub fn unregister_aux_nodes_in_branch(
        &mut self,
        ctx: &TickContext,
        world: &mut W,
        node: BtNodeIndex,
        apply_immediately: bool,
    ) {
        let Some(tree) = self.tree_at(node.instance_index) else {
            return;
        };
        let first = node.execution_index;
        let last = tree.last_execution_index(first);

        let saved = if apply_immediately {
            std::mem::take(&mut self.search_data.pending_updates)
        } else {
            Vec::new()
        };

        let removals: Vec<(BtNodeIndex, UpdateTarget)> = self
            .instance_stack
            .get(usize::from(node.instance_index))
            .map(|instance| {
                instance
                    .active_aux_nodes
                    .iter()
                    .filter(|&&aux| aux >= first && aux <= last)
                    .map(|&aux| (BtNodeIndex::new(node.instance_index, aux), instance.aux_target(aux)))
                    .collect()
            })
            .unwrap_or_default();
        for (aux, target) in removals {
            self.queue_update(aux, target, UpdateMode::Remove);
        }

        if apply_immediately {
            let mut f = Frame { tick: ctx, world };
            let updates = std::mem::replace(&mut self.search_data.pending_updates, saved);
            self.apply_search_updates(&mut f, &updates, BtNodeIndex::new(0, 0), false);
        }
    }

}
