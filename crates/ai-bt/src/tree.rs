use std::fmt;
use std::rc::Rc;

use ai_core::WorldMut;

use crate::error::{BtError, Result};
use crate::index::ExecutionIndex;
use crate::memory::{
    CompositeMemory, InstanceMemory, MemoryClear, MemoryInit, NodeMemory, ParallelMemory,
};
use crate::node::{
    CompositeKind, DecoratorNode, FlowAbortMode, ParallelFinishMode, ServiceNode, TaskNode,
};

/// Immutable node table of one tree, indexed by execution index (root is 0).
///
/// Shared through `Rc` by every instance running it; per-run state lives in [`InstanceMemory`].
pub struct BehaviorTree<W>
where
    W: WorldMut + 'static,
{
    name: String,
    nodes: Vec<TreeNode<W>>,
}

pub struct TreeNode<W>
where
    W: WorldMut + 'static,
{
    pub name: String,
    pub execution_index: ExecutionIndex,
    /// Composite owning the slot this node sits in (for services: the composite or task it is on).
    pub parent: Option<ExecutionIndex>,
    /// Slot index inside `parent` (composites, tasks and decorators).
    pub child_index: Option<usize>,
    pub depth: u16,
    pub kind: NodeKind<W>,
}

pub enum NodeKind<W>
where
    W: WorldMut + 'static,
{
    Composite(CompositeNode),
    Task(TaskEntry<W>),
    Decorator(DecoratorEntry<W>),
    Service(Box<dyn ServiceNode<W>>),
}

#[derive(Debug, Clone)]
pub struct CompositeNode {
    pub kind: CompositeKind,
    pub children: Vec<ChildSlot>,
    pub services: Vec<ExecutionIndex>,
    /// Highest execution index inside this composite's subtree.
    pub last_execution_index: ExecutionIndex,
}

#[derive(Debug, Clone)]
pub struct ChildSlot {
    pub decorators: Vec<ExecutionIndex>,
    pub child: ExecutionIndex,
    /// First decorator, or the child itself when undecorated.
    pub first_execution_index: ExecutionIndex,
}

pub enum TaskBehavior<W>
where
    W: WorldMut + 'static,
{
    Custom(Box<dyn TaskNode<W>>),
    /// Pushes the subtree as a new instance.
    RunBehavior(Rc<BehaviorTree<W>>),
}

pub struct TaskEntry<W>
where
    W: WorldMut + 'static,
{
    pub behavior: TaskBehavior<W>,
    pub services: Vec<ExecutionIndex>,
}

pub struct DecoratorEntry<W>
where
    W: WorldMut + 'static,
{
    pub node: Box<dyn DecoratorNode<W>>,
    pub abort_mode: FlowAbortMode,
    pub inverse: bool,
    /// Cached [`DecoratorNode::observed_keys`].
    pub observed_keys: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExecutionIndex {
    /// First node of the slot (its first decorator if any).
    FirstNode,
    /// The child node itself.
    MainNode,
}

impl<W> BehaviorTree<W>
where
    W: WorldMut + 'static,
{
    /// Assigns execution indices in preorder and validates the structure.
    pub fn build(name: impl Into<String>, root: Composite<W>) -> Result<Rc<Self>> {
        let name = name.into();
        let mut nodes = Vec::new();
        push_composite(&mut nodes, root, None, None, 0).map_err(|err| match err {
            BtError::TooManyNodes(_) => BtError::TooManyNodes(name.clone()),
            other => other,
        })?;
        tracing::debug!(tree = %name, nodes = nodes.len(), "behavior tree built");
        Ok(Rc::new(Self { name, nodes }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: ExecutionIndex) -> Option<&TreeNode<W>> {
        self.nodes.get(usize::from(idx))
    }

    pub fn node_name(&self, idx: ExecutionIndex) -> &str {
        self.node(idx).map_or("?", |n| n.name.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode<W>> {
        self.nodes.iter()
    }

    /// Execution index of the first node named `name`.
    pub fn find(&self, name: &str) -> Option<ExecutionIndex> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.execution_index)
    }

    pub fn parent(&self, idx: ExecutionIndex) -> Option<ExecutionIndex> {
        self.node(idx)?.parent
    }

    pub fn composite(&self, idx: ExecutionIndex) -> Option<&CompositeNode> {
        match &self.node(idx)?.kind {
            NodeKind::Composite(c) => Some(c),
            _ => None,
        }
    }

    pub fn task(&self, idx: ExecutionIndex) -> Option<&TaskEntry<W>> {
        match &self.node(idx)?.kind {
            NodeKind::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn decorator(&self, idx: ExecutionIndex) -> Option<&DecoratorEntry<W>> {
        match &self.node(idx)?.kind {
            NodeKind::Decorator(d) => Some(d),
            _ => None,
        }
    }

    pub fn service(&self, idx: ExecutionIndex) -> Option<&dyn ServiceNode<W>> {
        match &self.node(idx)?.kind {
            NodeKind::Service(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn is_composite(&self, idx: ExecutionIndex) -> bool {
        self.composite(idx).is_some()
    }

    /// Past the last child this returns `last_execution_index + 1`.
    pub fn child_execution_index(
        &self,
        composite: ExecutionIndex,
        child: usize,
        which: ChildExecutionIndex,
    ) -> ExecutionIndex {
        let Some(c) = self.composite(composite) else {
            return u16::MAX;
        };
        match c.children.get(child) {
            Some(slot) => match which {
                ChildExecutionIndex::FirstNode => slot.first_execution_index,
                ChildExecutionIndex::MainNode => slot.child,
            },
            None => c.last_execution_index.saturating_add(1),
        }
    }

    pub fn last_execution_index(&self, idx: ExecutionIndex) -> ExecutionIndex {
        match self.composite(idx) {
            Some(c) => c.last_execution_index,
            None => idx,
        }
    }

    pub(crate) fn new_memory(&self) -> InstanceMemory {
        let slots = self
            .nodes
            .iter()
            .map(|n| match &n.kind {
                NodeKind::Composite(c) => match c.kind {
                    CompositeKind::Parallel(_) => NodeMemory::Parallel(ParallelMemory::default()),
                    _ => NodeMemory::Composite(CompositeMemory::default()),
                },
                NodeKind::Task(t) => match &t.behavior {
                    TaskBehavior::Custom(task) => task.new_memory(),
                    TaskBehavior::RunBehavior(_) => NodeMemory::Empty,
                },
                NodeKind::Decorator(d) => d.node.new_memory(),
                NodeKind::Service(s) => s.new_memory(),
            })
            .collect();
        InstanceMemory::with_slots(slots)
    }

    pub(crate) fn init_memory(&self, memory: &mut InstanceMemory, init: MemoryInit) {
        for node in &self.nodes {
            let Some(slot) = memory.slot_mut(node.execution_index) else {
                continue;
            };
            match &node.kind {
                NodeKind::Composite(_) => {}
                NodeKind::Task(t) => {
                    if let TaskBehavior::Custom(task) = &t.behavior {
                        task.init_memory(slot, init);
                    }
                }
                NodeKind::Decorator(d) => d.node.init_memory(slot, init),
                NodeKind::Service(s) => s.init_memory(slot, init),
            }
        }
    }

    pub(crate) fn cleanup_memory(&self, memory: &mut InstanceMemory, clear: MemoryClear) {
        for node in &self.nodes {
            let Some(slot) = memory.slot_mut(node.execution_index) else {
                continue;
            };
            match &node.kind {
                NodeKind::Composite(_) => {}
                NodeKind::Task(t) => {
                    if let TaskBehavior::Custom(task) = &t.behavior {
                        task.cleanup_memory(slot, clear);
                    }
                }
                NodeKind::Decorator(d) => d.node.cleanup_memory(slot, clear),
                NodeKind::Service(s) => s.cleanup_memory(slot, clear),
            }
        }
    }
}

impl<W> fmt::Debug for BehaviorTree<W>
where
    W: WorldMut + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorTree")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

/// Declarative composite description consumed by [`BehaviorTree::build`].
pub struct Composite<W>
where
    W: WorldMut + 'static,
{
    name: Option<String>,
    kind: CompositeKind,
    services: Vec<(String, Box<dyn ServiceNode<W>>)>,
    children: Vec<Child<W>>,
}

impl<W> Composite<W>
where
    W: WorldMut + 'static,
{
    pub fn new(kind: CompositeKind) -> Self {
        Self {
            name: None,
            kind,
            services: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn sequence() -> Self {
        Self::new(CompositeKind::Sequence)
    }

    pub fn selector() -> Self {
        Self::new(CompositeKind::Selector)
    }

    /// First child is the main task, second the background branch.
    pub fn parallel(finish_mode: ParallelFinishMode) -> Self {
        Self::new(CompositeKind::Parallel(finish_mode))
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn service(mut self, name: impl Into<String>, service: impl ServiceNode<W>) -> Self {
        self.services.push((name.into(), Box::new(service)));
        self
    }

    pub fn child(mut self, child: impl Into<Child<W>>) -> Self {
        self.children.push(child.into());
        self
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            match self.kind {
                CompositeKind::Sequence => "Sequence",
                CompositeKind::Selector => "Selector",
                CompositeKind::Parallel(_) => "Parallel",
            }
            .to_string()
        })
    }
}

/// One child slot: decorators plus a task, subtree or composite.
pub struct Child<W>
where
    W: WorldMut + 'static,
{
    decorators: Vec<Decorator<W>>,
    node: ChildNode<W>,
}

enum ChildNode<W>
where
    W: WorldMut + 'static,
{
    Task {
        name: String,
        behavior: TaskBehavior<W>,
        services: Vec<(String, Box<dyn ServiceNode<W>>)>,
    },
    Composite(Composite<W>),
}

impl<W> Child<W>
where
    W: WorldMut + 'static,
{
    pub fn task(name: impl Into<String>, task: impl TaskNode<W>) -> Self {
        Self {
            decorators: Vec::new(),
            node: ChildNode::Task {
                name: name.into(),
                behavior: TaskBehavior::Custom(Box::new(task)),
                services: Vec::new(),
            },
        }
    }

    pub fn subtree(name: impl Into<String>, tree: Rc<BehaviorTree<W>>) -> Self {
        Self {
            decorators: Vec::new(),
            node: ChildNode::Task {
                name: name.into(),
                behavior: TaskBehavior::RunBehavior(tree),
                services: Vec::new(),
            },
        }
    }

    pub fn composite(composite: Composite<W>) -> Self {
        Self {
            decorators: Vec::new(),
            node: ChildNode::Composite(composite),
        }
    }

    pub fn decorator(mut self, decorator: Decorator<W>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Attaches a service to the task (or to the composite) in this slot.
    pub fn service(mut self, name: impl Into<String>, service: impl ServiceNode<W>) -> Self {
        let entry: (String, Box<dyn ServiceNode<W>>) = (name.into(), Box::new(service));
        match &mut self.node {
            ChildNode::Task { services, .. } => services.push(entry),
            ChildNode::Composite(c) => c.services.push(entry),
        }
        self
    }
}

impl<W> From<Composite<W>> for Child<W>
where
    W: WorldMut + 'static,
{
    fn from(composite: Composite<W>) -> Self {
        Child::composite(composite)
    }
}

pub struct Decorator<W>
where
    W: WorldMut + 'static,
{
    name: String,
    node: Box<dyn DecoratorNode<W>>,
    abort_mode: FlowAbortMode,
    inverse: bool,
}

impl<W> Decorator<W>
where
    W: WorldMut + 'static,
{
    pub fn new(name: impl Into<String>, node: impl DecoratorNode<W>) -> Self {
        Self {
            name: name.into(),
            node: Box::new(node),
            abort_mode: FlowAbortMode::None,
            inverse: false,
        }
    }

    pub fn abort(mut self, mode: FlowAbortMode) -> Self {
        self.abort_mode = mode;
        self
    }

    pub fn inverse(mut self) -> Self {
        self.inverse = !self.inverse;
        self
    }
}

fn next_index(nodes: &[impl Sized]) -> Result<ExecutionIndex> {
    u16::try_from(nodes.len())
        .ok()
        .filter(|idx| *idx < u16::MAX)
        .ok_or_else(|| BtError::TooManyNodes(String::new()))
}

fn push_services<W>(
    nodes: &mut Vec<TreeNode<W>>,
    services: Vec<(String, Box<dyn ServiceNode<W>>)>,
    owner: ExecutionIndex,
    depth: u16,
) -> Result<Vec<ExecutionIndex>>
where
    W: WorldMut + 'static,
{
    let mut out = Vec::with_capacity(services.len());
    for (name, service) in services {
        let idx = next_index(nodes)?;
        nodes.push(TreeNode {
            name,
            execution_index: idx,
            parent: Some(owner),
            child_index: None,
            depth,
            kind: NodeKind::Service(service),
        });
        out.push(idx);
    }
    Ok(out)
}

fn push_composite<W>(
    nodes: &mut Vec<TreeNode<W>>,
    composite: Composite<W>,
    parent: Option<ExecutionIndex>,
    child_index: Option<usize>,
    depth: u16,
) -> Result<ExecutionIndex>
where
    W: WorldMut + 'static,
{
    let name = composite.display_name();
    if composite.children.is_empty() {
        return Err(BtError::EmptyComposite(name));
    }
    if let CompositeKind::Parallel(_) = composite.kind {
        if composite.children.len() != 2 {
            return Err(BtError::InvalidParallel {
                name,
                reason: "needs exactly a main task and a background branch",
            });
        }
        let main_is_task = matches!(
            composite.children[0].node,
            ChildNode::Task {
                behavior: TaskBehavior::Custom(_),
                ..
            }
        );
        if !main_is_task {
            return Err(BtError::InvalidParallel {
                name,
                reason: "main child must be a plain task",
            });
        }
    }

    let kind = composite.kind;
    let idx = next_index(nodes)?;
    nodes.push(TreeNode {
        name,
        execution_index: idx,
        parent,
        child_index,
        depth,
        kind: NodeKind::Composite(CompositeNode {
            kind,
            children: Vec::new(),
            services: Vec::new(),
            last_execution_index: idx,
        }),
    });

    let services = push_services(nodes, composite.services, idx, depth + 1)?;

    let mut slots = Vec::with_capacity(composite.children.len());
    for (slot_idx, child) in composite.children.into_iter().enumerate() {
        let first = next_index(nodes)?;
        let mut decorators = Vec::with_capacity(child.decorators.len());
        for decorator in child.decorators {
            let aborts_lower = matches!(
                decorator.abort_mode,
                FlowAbortMode::LowerPriority | FlowAbortMode::Both
            );
            if aborts_lower && !kind.can_abort_lower_priority() {
                return Err(BtError::UnsupportedAbortMode {
                    decorator: decorator.name,
                    mode: decorator.abort_mode,
                    parent: kind,
                });
            }
            let d_idx = next_index(nodes)?;
            nodes.push(TreeNode {
                name: decorator.name,
                execution_index: d_idx,
                parent: Some(idx),
                child_index: Some(slot_idx),
                depth: depth + 1,
                kind: NodeKind::Decorator(DecoratorEntry {
                    observed_keys: decorator.node.observed_keys(),
                    node: decorator.node,
                    abort_mode: decorator.abort_mode,
                    inverse: decorator.inverse,
                }),
            });
            decorators.push(d_idx);
        }

        let child_idx = match child.node {
            ChildNode::Task {
                name,
                behavior,
                services,
            } => {
                let t_idx = next_index(nodes)?;
                nodes.push(TreeNode {
                    name,
                    execution_index: t_idx,
                    parent: Some(idx),
                    child_index: Some(slot_idx),
                    depth: depth + 1,
                    kind: NodeKind::Task(TaskEntry {
                        behavior,
                        services: Vec::new(),
                    }),
                });
                let task_services = push_services(nodes, services, t_idx, depth + 2)?;
                if let NodeKind::Task(t) = &mut nodes[usize::from(t_idx)].kind {
                    t.services = task_services;
                }
                t_idx
            }
            ChildNode::Composite(c) => push_composite(nodes, c, Some(idx), Some(slot_idx), depth + 1)?,
        };

        slots.push(ChildSlot {
            decorators,
            child: child_idx,
            first_execution_index: first,
        });
    }

    let last = next_index(nodes)? - 1;
    if let NodeKind::Composite(c) = &mut nodes[usize::from(idx)].kind {
        c.children = slots;
        c.services = services;
        c.last_execution_index = last;
    }
    Ok(idx)
}
