use std::rc::Rc;

use ai_core::WorldMut;

use crate::index::{BtNodeIndex, ExecutionIndex};
use crate::memory::{InstanceMemory, MemoryClear, MemoryInit};
use crate::node::{ActiveNodeType, TaskStatus};
use crate::search::{AuxNodeLookup, SearchData, SearchUpdate, UpdateMode, UpdateTarget};
use crate::tree::{BehaviorTree, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelTaskInfo {
    pub task: ExecutionIndex,
    pub status: TaskStatus,
}

/// Identity of a stacked tree: which tree, reached through which path of active nodes.
///
/// Also keeps the memory copy used for search rollback and `StoreSubtree` restores.
pub struct KnownInstance<W>
where
    W: WorldMut + 'static,
{
    pub tree: Rc<BehaviorTree<W>>,
    pub path: Vec<ExecutionIndex>,
    pub persistent_memory: InstanceMemory,
}

impl<W> KnownInstance<W>
where
    W: WorldMut + 'static,
{
    pub fn matches(&self, tree: &Rc<BehaviorTree<W>>, path: &[ExecutionIndex]) -> bool {
        Rc::ptr_eq(&self.tree, tree) && self.path == path
    }
}

/// One entry of the instance stack: a running tree plus its memory and active nodes.
pub struct BehaviorTreeInstance<W>
where
    W: WorldMut + 'static,
{
    pub tree: Rc<BehaviorTree<W>>,
    pub memory: InstanceMemory,
    pub active_node: Option<ExecutionIndex>,
    pub active_node_type: ActiveNodeType,
    pub active_aux_nodes: Vec<ExecutionIndex>,
    pub parallel_tasks: Vec<ParallelTaskInfo>,
    /// Index into the component's known instances.
    pub instance_id: usize,
}

impl<W> BehaviorTreeInstance<W>
where
    W: WorldMut + 'static,
{
    /// Prepares memory for every node of `tree`. A restore starts from the stored copy.
    pub fn initialize(
        tree: Rc<BehaviorTree<W>>,
        instance_id: usize,
        stored: Option<&InstanceMemory>,
    ) -> Self {
        let (mut memory, init) = match stored {
            Some(saved) if saved.len() == tree.len() => (saved.clone(), MemoryInit::RestoreSubtree),
            _ => (tree.new_memory(), MemoryInit::Initialize),
        };
        tree.init_memory(&mut memory, init);
        Self {
            tree,
            memory,
            active_node: None,
            active_node_type: ActiveNodeType::Composite,
            active_aux_nodes: Vec::new(),
            parallel_tasks: Vec::new(),
            instance_id,
        }
    }

    /// Releases node memory; `StoreSubtree` keeps a copy in `known` for a later restore.
    pub fn cleanup(&mut self, known: &mut KnownInstance<W>, clear: MemoryClear) {
        self.tree.cleanup_memory(&mut self.memory, clear);
        known.persistent_memory = match clear {
            MemoryClear::Destroy => InstanceMemory::default(),
            MemoryClear::StoreSubtree => self.memory.clone(),
        };
    }

    pub fn root(&self) -> ExecutionIndex {
        0
    }

    /// True when `execution_index` is the active node, an active parallel task or an active aux node.
    pub fn has_active_node(&self, execution_index: ExecutionIndex) -> bool {
        if self.active_node == Some(execution_index) {
            return true;
        }
        if self
            .parallel_tasks
            .iter()
            .any(|t| t.task == execution_index && t.status == TaskStatus::Active)
        {
            return true;
        }
        self.active_aux_nodes.contains(&execution_index)
    }

    pub fn is_aux_active(&self, execution_index: ExecutionIndex) -> bool {
        self.active_aux_nodes.contains(&execution_index)
    }

    pub fn parallel_task(&self, task: ExecutionIndex) -> Option<usize> {
        self.parallel_tasks.iter().position(|t| t.task == task)
    }

    /// Update target for an aux node of this tree.
    pub fn aux_target(&self, execution_index: ExecutionIndex) -> UpdateTarget {
        match self.tree.node(execution_index).map(|n| &n.kind) {
            Some(NodeKind::Service(_)) => UpdateTarget::Service,
            _ => UpdateTarget::Decorator,
        }
    }

    /// Queues removal of everything this instance keeps active, after cancelling its queued adds.
    pub fn deactivate_nodes(stack: &[Self], instance_index: u16, search: &mut SearchData) {
        let Some(instance) = stack.get(usize::from(instance_index)) else {
            return;
        };
        search.remove_pending_adds(instance_index);

        for task in &instance.parallel_tasks {
            if task.status == TaskStatus::Active {
                search.add_unique_update(
                    SearchUpdate::new(
                        BtNodeIndex::new(instance_index, task.task),
                        UpdateTarget::ParallelTask,
                        UpdateMode::Remove,
                    ),
                    stack,
                );
            }
        }
        for &aux in &instance.active_aux_nodes {
            search.add_unique_update(
                SearchUpdate::new(
                    BtNodeIndex::new(instance_index, aux),
                    instance.aux_target(aux),
                    UpdateMode::Remove,
                ),
                stack,
            );
        }
    }
}

impl<W> AuxNodeLookup for [BehaviorTreeInstance<W>]
where
    W: WorldMut + 'static,
{
    fn is_aux_node_active(&self, node: BtNodeIndex) -> bool {
        self.get(usize::from(node.instance_index))
            .is_some_and(|i| i.is_aux_active(node.execution_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_core::{Blackboard, TickContext, WorldView};

    use crate::decorators::Condition;
    use crate::node::BtNodeResult;
    use crate::services::FnService;
    use crate::tasks::FnTask;
    use crate::tree::{Child, Composite, Decorator};

    struct World;

    impl WorldView for World {
        type Agent = u64;
    }

    impl WorldMut for World {}

    fn succeed(_: &TickContext, _: u64, _: &mut World, _: &mut Blackboard) -> BtNodeResult {
        BtNodeResult::Succeeded
    }

    fn tree() -> Rc<BehaviorTree<World>> {
        let root = Composite::sequence()
            .service("scan", FnService::new(|_: &TickContext, _: u64, _: &mut World, _: &mut Blackboard| {}))
            .child(
                Child::task("guarded", FnTask::new(succeed)).decorator(Decorator::new(
                    "gate",
                    Condition::new(|_: &TickContext, _: u64, _: &World, _: &Blackboard| true),
                )),
            )
            .child(Child::task("other", FnTask::new(succeed)));
        BehaviorTree::build("instance", root).expect("valid tree")
    }

    fn index_of(tree: &BehaviorTree<World>, name: &str) -> ExecutionIndex {
        (0..tree.len() as ExecutionIndex)
            .find(|i| tree.node(*i).is_some_and(|n| n.name == name))
            .expect("node in tree")
    }

    fn stack() -> Vec<BehaviorTreeInstance<World>> {
        vec![
            BehaviorTreeInstance::initialize(tree(), 0, None),
            BehaviorTreeInstance::initialize(tree(), 1, None),
        ]
    }

    #[test]
    fn active_node_parallel_task_and_aux_nodes_count_as_active() {
        let mut stack = stack();
        let tree = Rc::clone(&stack[0].tree);
        let (scan, gate, guarded, other) = (
            index_of(&tree, "scan"),
            index_of(&tree, "gate"),
            index_of(&tree, "guarded"),
            index_of(&tree, "other"),
        );
        let instance = &mut stack[0];
        assert!(!instance.has_active_node(guarded));

        instance.active_node = Some(other);
        assert!(instance.has_active_node(other));

        instance.parallel_tasks.push(ParallelTaskInfo {
            task: guarded,
            status: TaskStatus::Active,
        });
        assert!(instance.has_active_node(guarded));
        instance.parallel_tasks[0].status = TaskStatus::Aborting;
        assert!(!instance.has_active_node(guarded));

        instance.active_aux_nodes.push(scan);
        assert!(instance.has_active_node(scan));
        assert!(!instance.has_active_node(gate));
    }

    #[test]
    fn deactivation_cancels_own_adds_and_removes_active_nodes() {
        let mut stack = stack();
        let tree = Rc::clone(&stack[0].tree);
        let (scan, gate, guarded, other) = (
            index_of(&tree, "scan"),
            index_of(&tree, "gate"),
            index_of(&tree, "guarded"),
            index_of(&tree, "other"),
        );
        stack[1].active_aux_nodes = vec![scan, gate];
        stack[1].parallel_tasks = vec![
            ParallelTaskInfo {
                task: guarded,
                status: TaskStatus::Active,
            },
            ParallelTaskInfo {
                task: other,
                status: TaskStatus::Aborting,
            },
        ];

        let mut search = SearchData::new();
        let add = |instance, exec| {
            SearchUpdate::new(BtNodeIndex::new(instance, exec), UpdateTarget::Decorator, UpdateMode::Add)
        };
        search.add_unique_update(add(0, gate), stack.as_slice());
        search.add_unique_update(add(1, other), stack.as_slice());

        BehaviorTreeInstance::deactivate_nodes(&stack, 1, &mut search);

        let queued: Vec<_> = search
            .pending_updates
            .iter()
            .map(|u| (u.node, u.target, u.mode))
            .collect();
        assert_eq!(
            queued,
            vec![
                (BtNodeIndex::new(0, gate), UpdateTarget::Decorator, UpdateMode::Add),
                (BtNodeIndex::new(1, guarded), UpdateTarget::ParallelTask, UpdateMode::Remove),
                (BtNodeIndex::new(1, scan), UpdateTarget::Service, UpdateMode::Remove),
                (BtNodeIndex::new(1, gate), UpdateTarget::Decorator, UpdateMode::Remove),
            ]
        );
    }

    #[test]
    fn deactivating_a_missing_instance_queues_nothing() {
        let stack = stack();
        let mut search = SearchData::new();
        BehaviorTreeInstance::deactivate_nodes(&stack, 5, &mut search);
        assert!(search.pending_updates.is_empty());
    }
}
