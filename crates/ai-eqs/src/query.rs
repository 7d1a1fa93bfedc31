#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::fmt;
use std::rc::Rc;

use crate::generator::EnvQueryGenerator;
use crate::params::QueryParams;
use crate::query_test::EnvQueryTest;
use crate::world::QueryWorld;

/// How many items a finished query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RunMode {
    /// The best item. A final filter-only test stops at the first item passing it.
    #[default]
    SingleResult,
    /// A random item among those scoring at least 95% of the best.
    RandomBest5Pct,
    /// A random item among those scoring at least 75% of the best.
    RandomBest25Pct,
    /// Every valid item, best first, scores rescaled into `[0, 1]`.
    AllMatching,
}

/// One generator and the tests run on its items, in order.
pub struct EnvQueryOption<W>
where
    W: QueryWorld,
{
    pub(crate) generator: Box<dyn EnvQueryGenerator<W>>,
    pub(crate) tests: Vec<Box<dyn EnvQueryTest<W>>>,
}

impl<W> EnvQueryOption<W>
where
    W: QueryWorld,
{
    pub fn new(generator: impl EnvQueryGenerator<W>) -> Self {
        Self {
            generator: Box::new(generator),
            tests: Vec::new(),
        }
    }

    pub fn test(mut self, test: impl EnvQueryTest<W>) -> Self {
        self.tests.push(Box::new(test));
        self
    }

    pub fn test_count(&self) -> usize {
        self.tests.len()
    }
}

/// Query template shared by every request running it. Options are tried in order until one
/// leaves valid items.
pub struct EnvQuery<W>
where
    W: QueryWorld,
{
    name: String,
    pub(crate) options: Vec<EnvQueryOption<W>>,
}

impl<W> EnvQuery<W>
where
    W: QueryWorld,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Vec::new(),
        }
    }

    pub fn option(mut self, option: EnvQueryOption<W>) -> Self {
        self.options.push(option);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    pub fn into_shared(self) -> Rc<Self> {
        Rc::new(self)
    }
}

impl<W> fmt::Debug for EnvQuery<W>
where
    W: QueryWorld,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvQuery")
            .field("name", &self.name)
            .field("options", &self.options.len())
            .finish()
    }
}

/// A query template bound to a querier, request params and an RNG seed.
pub struct EnvQueryRequest<W>
where
    W: QueryWorld,
{
    pub query: Rc<EnvQuery<W>>,
    pub querier: W::Agent,
    pub params: QueryParams,
    pub seed: u64,
}

impl<W> EnvQueryRequest<W>
where
    W: QueryWorld,
{
    pub fn new(query: Rc<EnvQuery<W>>, querier: W::Agent) -> Self {
        Self {
            query,
            querier,
            params: QueryParams::new(),
            seed: 0,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f32) -> Self {
        self.params.set(name, value);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
