use ai_core::WorldView;

use crate::item::ActorId;
use crate::math::Vec3;

/// World access environment queries need on top of agent identity.
pub trait QueryWorld: WorldView + 'static {
    /// A dead querier finishes its queries with `OwnerLost`.
    fn is_querier_alive(&self, _querier: Self::Agent) -> bool {
        true
    }

    fn querier_location(&self, querier: Self::Agent) -> Option<Vec3>;

    /// Location of an actor item. `None` when the actor is gone.
    fn actor_location(&self, _actor: ActorId) -> Option<Vec3> {
        None
    }
}
