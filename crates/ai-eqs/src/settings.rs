#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::{QueryParam, QueryParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TestPurpose {
    Filter,
    Score,
    #[default]
    FilterAndScore,
}

impl TestPurpose {
    pub fn filters(self) -> bool {
        self != Self::Score
    }

    pub fn scores(self) -> bool {
        self != Self::Filter
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FilterType {
    Minimum,
    Maximum,
    #[default]
    Range,
    /// Boolean tests only.
    Match,
}

/// How the values of several context locations fold into one item score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScoreOperator {
    #[default]
    AverageScore,
    MinScore,
    MaxScore,
}

/// How the filter results of several context locations fold into pass/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FilterOperator {
    #[default]
    AllPass,
    AnyPass,
}

/// Curve applied to the normalized value before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScoringEquation {
    #[default]
    Linear,
    InverseLinear,
    Square,
    SquareRoot,
    /// The full factor for any value above zero, nothing otherwise.
    Constant,
}

impl ScoringEquation {
    pub fn apply(self, normalized: f32) -> f32 {
        match self {
            Self::Linear => normalized,
            Self::InverseLinear => 1.0 - normalized,
            Self::Square => normalized * normalized,
            Self::SquareRoot => normalized.sqrt(),
            Self::Constant => {
                if normalized > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Where normalization takes one end of its range from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClampType {
    /// The extreme value over all valid items.
    #[default]
    None,
    /// The value in `score_clamp_min` / `score_clamp_max`.
    SpecifiedValue,
    /// The matching filter threshold.
    FilterThreshold,
}

/// Filter and scoring configuration shared by every test.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TestSettings {
    pub purpose: TestPurpose,
    pub filter_type: FilterType,
    pub float_min: QueryParam,
    pub float_max: QueryParam,
    pub bool_match: bool,
    pub score_op: ScoreOperator,
    pub filter_op: FilterOperator,
    pub equation: ScoringEquation,
    /// Weight of the normalized value; negative prefers lower values.
    pub scoring_factor: QueryParam,
    pub clamp_min: ClampType,
    pub clamp_max: ClampType,
    pub score_clamp_min: QueryParam,
    pub score_clamp_max: QueryParam,
    /// Normalize by distance to this value instead of by position between min and max.
    pub reference_value: Option<QueryParam>,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            purpose: TestPurpose::default(),
            filter_type: FilterType::default(),
            float_min: QueryParam::Value(0.0),
            float_max: QueryParam::Value(0.0),
            bool_match: true,
            score_op: ScoreOperator::default(),
            filter_op: FilterOperator::default(),
            equation: ScoringEquation::default(),
            scoring_factor: QueryParam::Value(1.0),
            clamp_min: ClampType::default(),
            clamp_max: ClampType::default(),
            score_clamp_min: QueryParam::Value(0.0),
            score_clamp_max: QueryParam::Value(0.0),
            reference_value: None,
        }
    }
}

impl TestSettings {
    pub fn score_only() -> Self {
        Self {
            purpose: TestPurpose::Score,
            ..Self::default()
        }
    }

    pub fn filter_only(filter_type: FilterType) -> Self {
        Self {
            purpose: TestPurpose::Filter,
            filter_type,
            ..Self::default()
        }
    }

    pub fn with_purpose(mut self, purpose: TestPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn with_filter(mut self, filter_type: FilterType) -> Self {
        self.filter_type = filter_type;
        self
    }

    pub fn with_min(mut self, min: impl Into<QueryParam>) -> Self {
        self.float_min = min.into();
        self
    }

    pub fn with_max(mut self, max: impl Into<QueryParam>) -> Self {
        self.float_max = max.into();
        self
    }

    pub fn with_bool_match(mut self, expected: bool) -> Self {
        self.bool_match = expected;
        self
    }

    pub fn with_score_op(mut self, op: ScoreOperator) -> Self {
        self.score_op = op;
        self
    }

    pub fn with_filter_op(mut self, op: FilterOperator) -> Self {
        self.filter_op = op;
        self
    }

    pub fn with_equation(mut self, equation: ScoringEquation) -> Self {
        self.equation = equation;
        self
    }

    pub fn with_factor(mut self, factor: impl Into<QueryParam>) -> Self {
        self.scoring_factor = factor.into();
        self
    }

    pub fn with_clamp_min(mut self, clamp: ClampType, value: impl Into<QueryParam>) -> Self {
        self.clamp_min = clamp;
        self.score_clamp_min = value.into();
        self
    }

    pub fn with_clamp_max(mut self, clamp: ClampType, value: impl Into<QueryParam>) -> Self {
        self.clamp_max = clamp;
        self.score_clamp_max = value.into();
        self
    }

    pub fn with_reference(mut self, value: impl Into<QueryParam>) -> Self {
        self.reference_value = Some(value.into());
        self
    }

    /// Resolves every param against a request. Params a setting does not use are still
    /// resolved so a misconfigured template fails the same way on every request.
    pub fn resolve(&self, params: &QueryParams) -> Result<ResolvedSettings> {
        Ok(ResolvedSettings {
            purpose: self.purpose,
            filter_type: self.filter_type,
            float_min: self.float_min.resolve(params)?,
            float_max: self.float_max.resolve(params)?,
            bool_match: self.bool_match,
            score_op: self.score_op,
            filter_op: self.filter_op,
            equation: self.equation,
            scoring_factor: self.scoring_factor.resolve(params)?,
            clamp_min: self.clamp_min,
            clamp_max: self.clamp_max,
            score_clamp_min: self.score_clamp_min.resolve(params)?,
            score_clamp_max: self.score_clamp_max.resolve(params)?,
            reference_value: self
                .reference_value
                .as_ref()
                .map(|r| r.resolve(params))
                .transpose()?,
        })
    }
}

/// [`TestSettings`] with every param bound to a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSettings {
    pub purpose: TestPurpose,
    pub filter_type: FilterType,
    pub float_min: f32,
    pub float_max: f32,
    pub bool_match: bool,
    pub score_op: ScoreOperator,
    pub filter_op: FilterOperator,
    pub equation: ScoringEquation,
    pub scoring_factor: f32,
    pub clamp_min: ClampType,
    pub clamp_max: ClampType,
    pub score_clamp_min: f32,
    pub score_clamp_max: f32,
    pub reference_value: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EqsError;

    #[test]
    fn equations_reshape_the_unit_range() {
        assert_eq!(ScoringEquation::Linear.apply(0.25), 0.25);
        assert_eq!(ScoringEquation::InverseLinear.apply(0.25), 0.75);
        assert_eq!(ScoringEquation::Square.apply(0.5), 0.25);
        assert_eq!(ScoringEquation::SquareRoot.apply(0.25), 0.5);
        assert_eq!(ScoringEquation::Constant.apply(0.0), 0.0);
        assert_eq!(ScoringEquation::Constant.apply(0.1), 1.0);
    }

    #[test]
    fn resolve_binds_named_params() {
        let mut params = QueryParams::new();
        params.set("max_range", 30.0);
        let settings = TestSettings::filter_only(FilterType::Maximum).with_max(QueryParam::named("max_range"));
        let resolved = settings.resolve(&params).expect("params present");
        assert_eq!(resolved.float_max, 30.0);

        let err = settings.resolve(&QueryParams::new()).unwrap_err();
        assert_eq!(err, EqsError::MissingParam("max_range".to_string()));
    }
}
