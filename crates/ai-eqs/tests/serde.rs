#![cfg(feature = "serde")]

use ai_eqs::{
    ClampType, EnvQueryManagerConfig, FilterType, QueryParam, RunMode, ScoringEquation,
    TestPurpose, TestSettings,
};

#[test]
fn test_settings_roundtrip_with_named_params() {
    let settings = TestSettings::filter_only(FilterType::Range)
        .with_min(QueryParam::named("near"))
        .with_max(25.0)
        .with_equation(ScoringEquation::SquareRoot)
        .with_clamp_max(ClampType::FilterThreshold, 0.0)
        .with_reference(QueryParam::named("ideal"));
    let json = serde_json::to_string(&settings).expect("serialize");
    let back: TestSettings = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, settings);
}

#[test]
fn partial_configs_fill_in_defaults() {
    let settings: TestSettings =
        serde_json::from_str(r#"{"purpose":"Score","scoring_factor":{"Value":-2.0}}"#).expect("deserialize");
    assert_eq!(settings.purpose, TestPurpose::Score);
    assert_eq!(settings.scoring_factor, QueryParam::Value(-2.0));
    assert_eq!(settings.filter_type, FilterType::Range);

    let config: EnvQueryManagerConfig =
        serde_json::from_str(r#"{"max_allowed_testing_time":0.5}"#).expect("deserialize");
    assert_eq!(config.max_allowed_testing_time, 0.5);
    assert!(config.test_queries_using_breadth);

    let mode: RunMode = serde_json::from_str(r#""AllMatching""#).expect("deserialize");
    assert_eq!(mode, RunMode::AllMatching);
}
