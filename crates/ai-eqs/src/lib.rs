//! Time-sliced environment queries built on `ai-core`.
//!
//! An [`EnvQuery`] is a template of ordered options. Each option pairs a generator, which
//! fills a raw item buffer, with tests that filter and score those items. An
//! [`EnvQueryInstance`] runs one request through generation, each test and finalization in
//! bounded steps, resuming a test at the first unprocessed item. The [`EnvQueryManager`]
//! shares a wall clock budget between running instances and reports results through finish
//! delegates.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod generator;
pub mod instance;
pub mod item;
pub mod iterator;
pub mod manager;
pub mod math;
pub mod params;
pub mod query;
pub mod settings;
mod store;
pub mod world;

pub use context::{EnvQueryContext, FnContext, PointsContext, QuerierContext};
pub use error::{EqsError, Result};
pub use generator::{EnvQueryGenerator, FnGenerator, GenerationContext, SimpleGridGenerator};
pub use instance::{EnvQueryInstance, EnvQueryResult, EnvQueryStatus, UNLIMITED_STEP_TIME};
pub use item::{
    ActorId, ActorItem, EnvQueryItem, ItemDetails, ItemType, ItemTypeInfo, PointItem,
    SKIPPED_ITEM_VALUE,
};
pub use iterator::ItemIterator;
pub use manager::{EnvQueryManager, EnvQueryManagerConfig, FinishDelegate, QueryId};
pub use math::Vec3;
pub use params::{QueryParam, QueryParams};
pub use query::{EnvQuery, EnvQueryOption, EnvQueryRequest, RunMode};
pub use query_test::{DistanceMode, DistanceTest, EnvQueryTest, FnTest, TestValue};
pub use settings::{
    ClampType, FilterOperator, FilterType, ResolvedSettings, ScoreOperator, ScoringEquation,
    TestPurpose, TestSettings,
};
pub use world::QueryWorld;
