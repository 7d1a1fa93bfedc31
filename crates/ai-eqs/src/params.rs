#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::error::{EqsError, Result};

/// A numeric setting that is either fixed in the query template or supplied per request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QueryParam {
    Value(f32),
    Named(String),
}

impl QueryParam {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn resolve(&self, params: &QueryParams) -> Result<f32> {
        match self {
            Self::Value(v) => Ok(*v),
            Self::Named(name) => params
                .get(name)
                .ok_or_else(|| EqsError::MissingParam(name.clone())),
        }
    }
}

impl From<f32> for QueryParam {
    fn from(value: f32) -> Self {
        Self::Value(value)
    }
}

/// Named values attached to one query request.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueryParams {
    values: BTreeMap<String, f32>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: f32) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.values.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_params_resolve_or_report_the_name() {
        let mut params = QueryParams::new();
        params.set("radius", 4.0);
        assert_eq!(QueryParam::named("radius").resolve(&params), Ok(4.0));
        assert_eq!(QueryParam::from(2.5).resolve(&params), Ok(2.5));
        assert_eq!(
            QueryParam::named("spacing").resolve(&params),
            Err(EqsError::MissingParam("spacing".to_string()))
        );
    }
}
