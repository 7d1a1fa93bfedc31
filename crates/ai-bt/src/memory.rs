use std::any::Any;
use std::fmt::Debug;

use crate::index::ChildIndex;
use crate::node::BtNodeResult;

/// Per-instance state owned by one custom node.
///
/// Implemented for every `Any + Clone + Debug` type, so node authors only pick a struct.
pub trait NodeState: Debug {
    fn clone_box(&self) -> Box<dyn NodeState>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> NodeState for T
where
    T: Any + Clone + Debug,
{
    fn clone_box(&self) -> Box<dyn NodeState> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositeMemory {
    pub current_child: ChildIndex,
    /// Child forced for the next pick (set by looping decorators).
    pub override_child: ChildIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelMemory {
    pub base: CompositeMemory,
    /// Detects a background branch being revisited inside one search.
    pub last_search_id: Option<u64>,
    pub main_task_result: BtNodeResult,
    pub main_task_active: bool,
    pub force_background: bool,
    pub repeat_main: bool,
}

impl Default for ParallelMemory {
    fn default() -> Self {
        Self {
            base: CompositeMemory::default(),
            last_search_id: None,
            main_task_result: BtNodeResult::Failed,
            main_task_active: false,
            force_background: false,
            repeat_main: false,
        }
    }
}

/// One slot of an instance's memory block, addressed by execution index.
#[derive(Debug, Default)]
pub enum NodeMemory {
    #[default]
    Empty,
    Composite(CompositeMemory),
    Parallel(ParallelMemory),
    State(Box<dyn NodeState>),
}

impl Clone for NodeMemory {
    fn clone(&self) -> Self {
        match self {
            Self::Empty => Self::Empty,
            Self::Composite(m) => Self::Composite(*m),
            Self::Parallel(m) => Self::Parallel(*m),
            Self::State(s) => Self::State((**s).clone_box()),
        }
    }
}

impl NodeMemory {
    pub fn state<T: Any>(value: T) -> Self
    where
        T: Clone + Debug,
    {
        Self::State(Box::new(value))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        match self {
            Self::State(s) => (**s).as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self {
            Self::State(s) => (**s).as_any_mut().downcast_mut::<T>(),
            _ => None,
        }
    }

    pub fn composite(&self) -> Option<&CompositeMemory> {
        match self {
            Self::Composite(m) => Some(m),
            Self::Parallel(p) => Some(&p.base),
            _ => None,
        }
    }

    pub fn composite_mut(&mut self) -> Option<&mut CompositeMemory> {
        match self {
            Self::Composite(m) => Some(m),
            Self::Parallel(p) => Some(&mut p.base),
            _ => None,
        }
    }

    pub fn parallel_mut(&mut self) -> Option<&mut ParallelMemory> {
        match self {
            Self::Parallel(p) => Some(p),
            _ => None,
        }
    }
}

/// Memory block of one running tree instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceMemory {
    slots: Vec<NodeMemory>,
}

impl InstanceMemory {
    pub fn with_slots(slots: Vec<NodeMemory>) -> Self {
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, execution_index: u16) -> Option<&NodeMemory> {
        self.slots.get(usize::from(execution_index))
    }

    pub fn slot_mut(&mut self, execution_index: u16) -> Option<&mut NodeMemory> {
        self.slots.get_mut(usize::from(execution_index))
    }

    pub fn composite_mut(&mut self, execution_index: u16) -> Option<&mut CompositeMemory> {
        self.slot_mut(execution_index)?.composite_mut()
    }

    pub fn parallel_mut(&mut self, execution_index: u16) -> Option<&mut ParallelMemory> {
        self.slot_mut(execution_index)?.parallel_mut()
    }

    /// Copies every slot from `other` except `keep`, which retains its current contents.
    pub(crate) fn restore_from(&mut self, other: &InstanceMemory, keep: Option<u16>) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if keep.map(usize::from) == Some(idx) {
                continue;
            }
            if let Some(saved) = other.slots.get(idx) {
                *slot = saved.clone();
            }
        }
    }
}

/// How node memory is prepared when an instance is pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryInit {
    Initialize,
    /// Memory was stored by an earlier `StoreSubtree` cleanup.
    RestoreSubtree,
}

/// How node memory is released when an instance is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClear {
    Destroy,
    StoreSubtree,
}
