#![cfg(feature = "full")]

use ai::bt::BtComponentConfig;
use ai::eqs::{EnvQueryManagerConfig, RunMode};

#[test]
fn reexports_reach_both_engines() {
    assert_eq!(BtComponentConfig::default().max_instance_stack_depth, 32);
    assert!(EnvQueryManagerConfig::default().test_queries_using_breadth);
    assert_eq!(RunMode::default(), RunMode::SingleResult);
}

#[cfg(feature = "serde")]
#[test]
fn configs_roundtrip_through_json() {
    let bt = BtComponentConfig::default().with_flow_updates(4);
    let json = serde_json::to_string(&bt).expect("serialize");
    assert_eq!(serde_json::from_str::<BtComponentConfig>(&json).expect("deserialize"), bt);

    let eqs = EnvQueryManagerConfig::default().depth_first();
    let json = serde_json::to_string(&eqs).expect("serialize");
    assert_eq!(serde_json::from_str::<EnvQueryManagerConfig>(&json).expect("deserialize"), eqs);
}
