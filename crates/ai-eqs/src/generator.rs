use std::marker::PhantomData;

use tracing::warn;

use crate::context::{EnvQueryContext, QuerierContext};
use crate::item::{EnvQueryItem, ItemType, ItemTypeInfo, PointItem};
use crate::math::Vec3;
use crate::params::{QueryParam, QueryParams};
use crate::world::QueryWorld;

/// Produces the candidate items of one query option.
pub trait EnvQueryGenerator<W>: 'static
where
    W: QueryWorld,
{
    fn item_type(&self) -> ItemTypeInfo<W>;

    fn generate(&self, gen: &mut GenerationContext<'_, W>);
}

/// What a generator sees while it runs: the querier, the world, request params and the
/// item buffers it appends to.
pub struct GenerationContext<'a, W>
where
    W: QueryWorld,
{
    pub querier: W::Agent,
    pub world: &'a W,
    params: &'a QueryParams,
    item_type: ItemTypeInfo<W>,
    items: &'a mut Vec<EnvQueryItem>,
    raw_data: &'a mut Vec<u8>,
    missing_param: Option<String>,
}

impl<'a, W> GenerationContext<'a, W>
where
    W: QueryWorld,
{
    pub(crate) fn new(
        querier: W::Agent,
        world: &'a W,
        params: &'a QueryParams,
        item_type: ItemTypeInfo<W>,
        items: &'a mut Vec<EnvQueryItem>,
        raw_data: &'a mut Vec<u8>,
    ) -> Self {
        Self {
            querier,
            world,
            params,
            item_type,
            items,
            raw_data,
            missing_param: None,
        }
    }

    /// Resolves `param`. A missing named param is remembered and fails the query once
    /// generation returns.
    pub fn param(&mut self, param: &QueryParam) -> Option<f32> {
        match param.resolve(self.params) {
            Ok(v) => Some(v),
            Err(_) => {
                if let QueryParam::Named(name) = param {
                    self.missing_param.get_or_insert_with(|| name.clone());
                }
                None
            }
        }
    }

    pub fn context_locations(&self, context: &dyn EnvQueryContext<W>) -> Vec<Vec3> {
        context.locations(self.querier, self.world)
    }

    /// Appends one item. Values of a type other than the generator's are dropped.
    pub fn add_item<T: ItemType>(&mut self, value: T::Value) -> bool {
        if !self.item_type.is::<T>() || T::VALUE_SIZE != self.item_type.value_size {
            warn!(
                expected = self.item_type.name,
                got = T::NAME,
                "generator added an item of the wrong type"
            );
            return false;
        }
        let offset = self.raw_data.len();
        self.raw_data.resize(offset + T::VALUE_SIZE, 0);
        T::write(&value, &mut self.raw_data[offset..]);
        self.items.push(EnvQueryItem::new(offset));
        true
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn missing_param(&mut self) -> Option<String> {
        self.missing_param.take()
    }
}

/// Square grid of points around each location of a context.
pub struct SimpleGridGenerator<W>
where
    W: QueryWorld,
{
    grid_half_size: QueryParam,
    space_between: QueryParam,
    around: Box<dyn EnvQueryContext<W>>,
}

impl<W> SimpleGridGenerator<W>
where
    W: QueryWorld,
{
    /// Grid centered on the querier.
    pub fn new(grid_half_size: impl Into<QueryParam>, space_between: impl Into<QueryParam>) -> Self {
        Self {
            grid_half_size: grid_half_size.into(),
            space_between: space_between.into(),
            around: Box::new(QuerierContext),
        }
    }

    pub fn around(mut self, context: impl EnvQueryContext<W>) -> Self {
        self.around = Box::new(context);
        self
    }
}

impl<W> EnvQueryGenerator<W> for SimpleGridGenerator<W>
where
    W: QueryWorld,
{
    fn item_type(&self) -> ItemTypeInfo<W> {
        ItemTypeInfo::of::<PointItem>()
    }

    fn generate(&self, gen: &mut GenerationContext<'_, W>) {
        let (Some(half), Some(spacing)) = (gen.param(&self.grid_half_size), gen.param(&self.space_between))
        else {
            return;
        };
        if spacing <= 0.0 || half < 0.0 {
            warn!(half, spacing, "grid generator needs a positive spacing");
            return;
        }
        let centers = gen.context_locations(self.around.as_ref());
        if centers.is_empty() {
            warn!("grid context has no locations, skipping generation");
            return;
        }

        let per_side = ((half * 2.0) / spacing).floor() as i32 + 1;
        let offset = per_side / 2;
        for center in centers {
            for ix in 0..per_side {
                for iy in 0..per_side {
                    let point = center
                        + Vec3::new(
                            spacing * (ix - offset) as f32,
                            spacing * (iy - offset) as f32,
                            0.0,
                        );
                    gen.add_item::<PointItem>(point);
                }
            }
        }
    }
}

/// Generator backed by a closure returning item values of type `T`.
pub struct FnGenerator<T, F> {
    generate: F,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> FnGenerator<T, F> {
    pub fn new(generate: F) -> Self {
        Self {
            generate,
            _item: PhantomData,
        }
    }
}

impl<T, F, W> EnvQueryGenerator<W> for FnGenerator<T, F>
where
    T: ItemType,
    F: Fn(W::Agent, &W) -> Vec<T::Value> + 'static,
    W: QueryWorld,
{
    fn item_type(&self) -> ItemTypeInfo<W> {
        ItemTypeInfo::of::<T>()
    }

    fn generate(&self, gen: &mut GenerationContext<'_, W>) {
        for value in (self.generate)(gen.querier, gen.world) {
            gen.add_item::<T>(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_core::WorldView;

    struct World;

    impl WorldView for World {
        type Agent = u32;
    }

    impl QueryWorld for World {
        fn querier_location(&self, _querier: u32) -> Option<Vec3> {
            Some(Vec3::new(10.0, 0.0, 1.0))
        }
    }

    fn run(gen: &dyn EnvQueryGenerator<World>, params: &QueryParams) -> (Vec<EnvQueryItem>, Vec<u8>, Option<String>) {
        let mut items = Vec::new();
        let mut raw = Vec::new();
        let missing = {
            let mut ctx = GenerationContext::new(1, &World, params, gen.item_type(), &mut items, &mut raw);
            gen.generate(&mut ctx);
            ctx.missing_param()
        };
        (items, raw, missing)
    }

    #[test]
    fn grid_covers_the_square_around_the_querier() {
        let gen = SimpleGridGenerator::<World>::new(2.0, 1.0);
        let (items, raw, missing) = run(&gen, &QueryParams::new());
        assert_eq!(missing, None);
        assert_eq!(items.len(), 25);
        assert_eq!(raw.len(), 25 * PointItem::VALUE_SIZE);

        let first = PointItem::read(&raw[0..12]);
        assert_eq!(first, Some(Vec3::new(8.0, -2.0, 1.0)));
    }

    #[test]
    fn missing_named_param_is_reported() {
        let gen = SimpleGridGenerator::<World>::new(QueryParam::named("radius"), 1.0);
        let (items, _, missing) = run(&gen, &QueryParams::new());
        assert!(items.is_empty());
        assert_eq!(missing.as_deref(), Some("radius"));
    }

    #[test]
    fn wrong_item_type_is_dropped() {
        let gen = FnGenerator::<PointItem, _>::new(|_: u32, _: &World| vec![Vec3::ZERO]);
        let mut items = Vec::new();
        let mut raw = Vec::new();
        let params = QueryParams::new();
        let mut ctx = GenerationContext::new(
            1,
            &World,
            &params,
            EnvQueryGenerator::<World>::item_type(&gen),
            &mut items,
            &mut raw,
        );
        assert!(!ctx.add_item::<crate::item::ActorItem>(crate::item::ActorId(3)));
        assert!(ctx.add_item::<PointItem>(Vec3::ZERO));
        assert_eq!(ctx.item_count(), 1);
    }
}
