// tests/condition_roundtrip.rs
//! Condition-set documents must survive a JSON round trip with their null
//! criteria intact: a reloaded set skips exactly the same checks.

use surge_block_scanner::blocks::{
    BlockCondition, ChainCondition, ConditionSet, ExitConditionType, RedetectionCondition,
};

fn sample_set() -> ConditionSet {
    ConditionSet {
        id: "11111111-2222-3333-4444-555555555555".into(),
        name: "roundtrip".into(),
        seed: vec![
            ChainCondition {
                base: BlockCondition {
                    surge_rate_min: Some(5.0),
                    ma_period: Some(20),
                    close_above_ma: None,
                    deviation_max: Some(130.0),
                    trading_value_min: None,
                    volume_high_window: Some(20),
                    prev_volume_ratio_min: Some(300.0),
                    price_high_window: None,
                    exit_condition: ExitConditionType::MaBreak,
                    exit_ma_period: Some(60),
                    min_start_interval_days: Some(30),
                },
                volume_ratio_vs_parent_peak: None,
                low_price_margin_vs_parent_peak: None,
                min_candles_from_parent_start: None,
                max_candles_from_parent_start: None,
            },
            ChainCondition {
                base: BlockCondition {
                    surge_rate_min: Some(5.0),
                    ma_period: None,
                    close_above_ma: None,
                    deviation_max: None,
                    trading_value_min: None,
                    volume_high_window: None,
                    prev_volume_ratio_min: None,
                    price_high_window: None,
                    exit_condition: ExitConditionType::ThreeLineReversal,
                    exit_ma_period: None,
                    min_start_interval_days: None,
                },
                volume_ratio_vs_parent_peak: Some(300.0),
                low_price_margin_vs_parent_peak: Some(10.0),
                min_candles_from_parent_start: Some(2),
                max_candles_from_parent_start: Some(60),
            },
        ],
        redetect: vec![RedetectionCondition {
            base: BlockCondition {
                surge_rate_min: None,
                ma_period: None,
                close_above_ma: None,
                deviation_max: None,
                trading_value_min: None,
                volume_high_window: None,
                prev_volume_ratio_min: None,
                price_high_window: None,
                exit_condition: ExitConditionType::BodyMiddleBreak,
                exit_ma_period: None,
                min_start_interval_days: None,
            },
            tolerance_percent: 5.0,
            min_days_from_seed_start: 3,
            max_days_from_seed_start: 40,
        }],
    }
}

#[test]
fn json_round_trip_preserves_every_field() {
    let set = sample_set();
    let json = serde_json::to_string_pretty(&set).unwrap();
    let back: ConditionSet = serde_json::from_str(&json).unwrap();
    assert_eq!(back, set);
}

#[test]
fn null_and_missing_criteria_both_deserialize_to_none() {
    let json = r#"{
        "id": "cs-1",
        "name": "minimal",
        "seed": [{
            "surge_rate_min": 5.0,
            "ma_period": null,
            "exit_condition": "body_middle_break"
        }]
    }"#;
    let set: ConditionSet = serde_json::from_str(json).unwrap();
    let base = &set.seed[0].base;
    assert_eq!(base.surge_rate_min, Some(5.0));
    assert_eq!(base.ma_period, None);
    assert_eq!(base.deviation_max, None);
    assert_eq!(base.exit_condition, ExitConditionType::BodyMiddleBreak);
    assert!(set.redetect.is_empty());
    assert!(set.validate().is_ok());
}

#[test]
fn chain_fields_flatten_beside_base_criteria() {
    let set = sample_set();
    let value = serde_json::to_value(&set).unwrap();
    let level2 = &value["seed"][1];
    // Base and parent-relative criteria share one object.
    assert_eq!(level2["surge_rate_min"], 5.0);
    assert_eq!(level2["volume_ratio_vs_parent_peak"], 300.0);
    assert_eq!(level2["exit_condition"], "three_line_reversal");
    // Inactive criteria serialize as explicit nulls.
    assert!(level2["ma_period"].is_null());
}

#[test]
fn exit_condition_uses_snake_case_strings() {
    for (variant, expected) in [
        (ExitConditionType::MaBreak, "\"ma_break\""),
        (ExitConditionType::ThreeLineReversal, "\"three_line_reversal\""),
        (ExitConditionType::BodyMiddleBreak, "\"body_middle_break\""),
    ] {
        assert_eq!(serde_json::to_string(&variant).unwrap(), expected);
    }
}
