#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::cmp::Ordering;
use std::fmt;

use crate::math::Vec3;
use crate::world::QueryWorld;

/// Test result of an item a test chose not to evaluate. Ignored by normalization.
pub const SKIPPED_ITEM_VALUE: f32 = f32::MIN;

/// Stable handle of a world actor used as a query item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActorId(pub u64);

/// Fixed-size record type stored in a query's raw data buffer.
pub trait ItemType: 'static {
    type Value: Copy;

    const NAME: &'static str;
    const VALUE_SIZE: usize;

    /// `raw` is exactly `VALUE_SIZE` bytes.
    fn write(value: &Self::Value, raw: &mut [u8]);

    fn read(raw: &[u8]) -> Option<Self::Value>;

    fn location<W: QueryWorld>(raw: &[u8], world: &W) -> Option<Vec3>;
}

/// Item type erased to what the query pipeline needs.
pub struct ItemTypeInfo<W>
where
    W: QueryWorld,
{
    pub name: &'static str,
    pub value_size: usize,
    pub location: fn(&[u8], &W) -> Option<Vec3>,
}

impl<W> ItemTypeInfo<W>
where
    W: QueryWorld,
{
    pub fn of<T: ItemType>() -> Self {
        Self {
            name: T::NAME,
            value_size: T::VALUE_SIZE,
            location: T::location::<W>,
        }
    }

    pub fn is<T: ItemType>(&self) -> bool {
        self.name == T::NAME
    }
}

impl<W> Clone for ItemTypeInfo<W>
where
    W: QueryWorld,
{
    fn clone(&self) -> Self {
        *self
    }
}

impl<W> Copy for ItemTypeInfo<W> where W: QueryWorld {}

impl<W> fmt::Debug for ItemTypeInfo<W>
where
    W: QueryWorld,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemTypeInfo")
            .field("name", &self.name)
            .field("value_size", &self.value_size)
            .finish()
    }
}

/// A world location.
#[derive(Debug, Clone, Copy)]
pub struct PointItem;

impl ItemType for PointItem {
    type Value = Vec3;

    const NAME: &'static str = "point";
    const VALUE_SIZE: usize = 12;

    fn write(value: &Vec3, raw: &mut [u8]) {
        raw.copy_from_slice(&value.to_bytes());
    }

    fn read(raw: &[u8]) -> Option<Vec3> {
        Vec3::from_bytes(raw)
    }

    fn location<W: QueryWorld>(raw: &[u8], _world: &W) -> Option<Vec3> {
        Vec3::from_bytes(raw)
    }
}

/// A world actor, located through [`QueryWorld::actor_location`].
#[derive(Debug, Clone, Copy)]
pub struct ActorItem;

impl ItemType for ActorItem {
    type Value = ActorId;

    const NAME: &'static str = "actor";
    const VALUE_SIZE: usize = 8;

    fn write(value: &ActorId, raw: &mut [u8]) {
        raw.copy_from_slice(&value.0.to_le_bytes());
    }

    fn read(raw: &[u8]) -> Option<ActorId> {
        Some(ActorId(u64::from_le_bytes(raw.get(0..8)?.try_into().ok()?)))
    }

    fn location<W: QueryWorld>(raw: &[u8], world: &W) -> Option<Vec3> {
        world.actor_location(Self::read(raw)?)
    }
}

/// One generated item: its running score and where its record lives in the raw data.
///
/// Discarded items stay in place until the query finalizes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnvQueryItem {
    pub score: f32,
    pub data_offset: usize,
    pub discarded: bool,
}

impl EnvQueryItem {
    pub fn new(data_offset: usize) -> Self {
        Self {
            score: 0.0,
            data_offset,
            discarded: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.discarded
    }

    pub fn discard(&mut self) {
        self.discarded = true;
    }

    /// Valid items first, then by score, highest first.
    pub fn rank(&self, other: &Self) -> Ordering {
        match (self.discarded, other.discarded) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => other.score.total_cmp(&self.score),
        }
    }
}

/// Per-test breakdown of one item's score.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ItemDetails {
    /// Raw value each test produced, [`SKIPPED_ITEM_VALUE`] until the test runs.
    pub test_results: Vec<f32>,
    /// Contribution each test added to the score after normalization.
    pub weighted_scores: Vec<f32>,
    /// Index in the generated item order.
    pub item_index: usize,
    pub failed_test: Option<usize>,
}

impl ItemDetails {
    pub fn new(num_tests: usize, item_index: usize) -> Self {
        Self {
            test_results: vec![SKIPPED_ITEM_VALUE; num_tests],
            weighted_scores: vec![0.0; num_tests],
            item_index,
            failed_test: None,
        }
    }
}
