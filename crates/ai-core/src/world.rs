use crate::AgentId;

/// Read-only world access.
///
/// Subsystems that need more than agent identity (spatial queries, liveness checks) define
/// extension traits on top of this one.
pub trait WorldView {
    type Agent: AgentId;
}

/// Write access / effect sink handed to tree nodes while they run.
pub trait WorldMut: WorldView {}
