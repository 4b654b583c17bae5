// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use estel::{ClassifierConfig, ColumnProfile, FieldRole, FieldRoleClassifier};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_sample() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        (-1.0e6f64..1.0e6).prop_map(|f| json!(f)),
        "[a-z]{1,8}".prop_map(|s| json!(s)),
        Just(json!("2024-03-01")),
        Just(Value::Null),
    ]
}

fn arb_profile() -> impl Strategy<Value = ColumnProfile> {
    (
        "[a-z_]{1,10}",
        prop_oneof![Just("TEXT"), Just("INTEGER"), Just("REAL"), Just("DATE"), Just("")],
        1u64..500,
        0u64..500,
        0.0f64..100.0,
        prop::collection::vec(arb_sample(), 0..5),
    )
        .prop_map(|(name, declared, rows, unique, nulls, samples)| {
            let unique = unique.min(rows);
            ColumnProfile {
                name,
                declared_type: declared.to_string(),
                row_count: rows,
                unique_count: unique,
                cardinality_ratio: unique as f64 / rows as f64,
                null_percentage: nulls,
                sample_values: samples,
                min_value: None,
                max_value: None,
            }
        })
}

fn arb_profiles() -> impl Strategy<Value = Vec<ColumnProfile>> {
    prop::collection::vec(arb_profile(), 0..8).prop_map(|mut profiles| {
        for (i, p) in profiles.iter_mut().enumerate() {
            p.name = format!("{}_{i}", p.name);
        }
        profiles
    })
}

proptest! {
    #[test]
    fn heuristic_classification_is_deterministic(profiles in arb_profiles()) {
        let classifier = FieldRoleClassifier::heuristic(ClassifierConfig::default());
        let first = classifier.classify_heuristically(&profiles);
        let second = classifier.classify_heuristically(&profiles);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.fields.len(), profiles.len());
    }

    #[test]
    fn recommended_pair_respects_roles(profiles in arb_profiles()) {
        let classifier = FieldRoleClassifier::heuristic(ClassifierConfig::default());
        let analysis = classifier.classify_heuristically(&profiles);
        if let Some(dimension) = &analysis.recommendation.dimension {
            let field = analysis.field(dimension).unwrap();
            prop_assert_eq!(field.role, FieldRole::Dimension);
            prop_assert!((2..=20).contains(&field.profile.unique_count));
        }
        if let Some(measure) = &analysis.recommendation.measure {
            prop_assert_eq!(analysis.field(measure).unwrap().role, FieldRole::Measure);
        }
        prop_assert!((0.0..=1.0).contains(&analysis.data_quality.score));
    }
}

#[tokio::test]
async fn test_classify_without_generator_matches_heuristic() {
    let profiles = vec![ColumnProfile {
        name: "category".to_string(),
        declared_type: "TEXT".to_string(),
        row_count: 10,
        unique_count: 4,
        cardinality_ratio: 0.4,
        null_percentage: 0.0,
        sample_values: vec![json!("a"), json!("b")],
        min_value: None,
        max_value: None,
    }];
    let classifier = FieldRoleClassifier::heuristic(ClassifierConfig::default());
    let analysis = classifier.classify("t", &profiles, &[]).await;
    assert_eq!(analysis, classifier.classify_heuristically(&profiles));
}
