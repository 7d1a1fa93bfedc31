//! Behavior tree engine built on `ai-core`.
//!
//! Trees are immutable templates ([`BehaviorTree`]) built from a declarative description
//! ([`Composite`], [`Child`], [`Decorator`]). A [`BehaviorTreeComponent`] runs them for one
//! agent: an instance stack for subtrees, per-instance node memory, and an event driven flow
//! where decorators and finished tasks request a search, the search walks composites in
//! execution-index order, and its queued aux node updates are applied (or rolled back) once
//! the search is known to be valid.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod component;
pub mod composite;
pub mod config;
pub mod decorators;
pub mod error;
mod flow;
pub mod index;
pub mod instance;
pub mod memory;
pub mod node;
pub mod search;
pub mod services;
pub mod tasks;
pub mod tree;

pub use component::{
    BehaviorTreeComponent, ExecutionMode, ExecutionRequest, PendingExecution, StopMode,
};
pub use composite::{PARALLEL_BACKGROUND, PARALLEL_MAIN_TASK};
pub use config::BtComponentConfig;
pub use decorators::{BlackboardCondition, Condition, ForceSuccess, KeyQuery, Loop};
pub use error::{BtError, Result};
pub use index::{BtNodeIndex, ChildIndex, ExecutionIndex, NodeRelativePriority};
pub use instance::{BehaviorTreeInstance, KnownInstance, ParallelTaskInfo};
pub use memory::{
    CompositeMemory, InstanceMemory, MemoryClear, MemoryInit, NodeMemory, NodeState,
    ParallelMemory,
};
pub use node::{
    ActiveNodeType, BtNodeResult, CompositeKind, DecoratorNode, FlowAbortMode, NodeContext,
    ParallelFinishMode, ProcessedFlow, ServiceNode, TaskNode, TaskStatus,
};
pub use search::{SearchData, SearchUpdate, UpdateMode, UpdateTarget};
pub use services::FnService;
pub use tasks::{FnTask, Wait};
pub use tree::{BehaviorTree, Child, ChildExecutionIndex, Composite, Decorator};
