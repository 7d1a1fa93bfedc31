use crate::math::Vec3;
use crate::world::QueryWorld;

/// Source of reference locations for generators and tests ("around the querier",
/// "distance to these points").
///
/// An empty result makes the generation or test step that asked for it a no-op.
pub trait EnvQueryContext<W>: 'static
where
    W: QueryWorld,
{
    fn locations(&self, querier: W::Agent, world: &W) -> Vec<Vec3>;
}

/// The querier's own location.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuerierContext;

impl<W> EnvQueryContext<W> for QuerierContext
where
    W: QueryWorld,
{
    fn locations(&self, querier: W::Agent, world: &W) -> Vec<Vec3> {
        world.querier_location(querier).into_iter().collect()
    }
}

/// A fixed set of points.
#[derive(Debug, Clone, Default)]
pub struct PointsContext {
    points: Vec<Vec3>,
}

impl PointsContext {
    pub fn new(points: impl IntoIterator<Item = Vec3>) -> Self {
        Self {
            points: points.into_iter().collect(),
        }
    }
}

impl<W> EnvQueryContext<W> for PointsContext
where
    W: QueryWorld,
{
    fn locations(&self, _querier: W::Agent, _world: &W) -> Vec<Vec3> {
        self.points.clone()
    }
}

/// Context backed by a closure.
pub struct FnContext<F> {
    provide: F,
}

impl<F> FnContext<F> {
    pub fn new(provide: F) -> Self {
        Self { provide }
    }
}

impl<F, W> EnvQueryContext<W> for FnContext<F>
where
    F: Fn(W::Agent, &W) -> Vec<Vec3> + 'static,
    W: QueryWorld,
{
    fn locations(&self, querier: W::Agent, world: &W) -> Vec<Vec3> {
        (self.provide)(querier, world)
    }
}
