use labelmap::{
    classify_event_type, default_mappings, effective, labels_to_policies, policy_to_labels,
    Direction, LabelMapping,
};
use proptest::prelude::*;

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![
        Just(Direction::Inbound),
        Just(Direction::Outbound),
        Just(Direction::Both)
    ]
}

fn mapping_strategy() -> impl Strategy<Value = LabelMapping> {
    (
        prop_oneof![Just("HATE"), Just("SPAM"), Just("VIOLENCE"), Just("CUSTOM")],
        prop_oneof![Just("hate"), Just("spam"), Just("gore"), Just("x-label")],
        direction_strategy(),
    )
        .prop_map(|(p, l, d)| LabelMapping::new(p, l, d))
}

fn mappings_strategy() -> impl Strategy<Value = Vec<LabelMapping>> {
    prop::collection::vec(mapping_strategy(), 0..12)
}

proptest! {
    // A BOTH mapping guarantees the policy survives an outbound->inbound
    // round trip through its labels.
    #[test]
    fn both_mappings_round_trip(mappings in mappings_strategy()) {
        for m in mappings.iter().filter(|m| m.direction == Direction::Both) {
            let labels = policy_to_labels(&mappings, &m.policy_type);
            let policies = labels_to_policies(&mappings, &labels);
            prop_assert!(policies.contains(&m.policy_type));
        }
    }

    // Every inbound-capable row is reachable from its label; every
    // outbound-capable row is reachable from its policy.
    #[test]
    fn direction_membership(mappings in mappings_strategy()) {
        for m in &mappings {
            let inbound = labels_to_policies(&mappings, &[m.label_value.clone()]);
            let outbound = policy_to_labels(&mappings, &m.policy_type);
            match m.direction {
                Direction::Inbound => prop_assert!(inbound.contains(&m.policy_type)),
                Direction::Outbound => prop_assert!(outbound.contains(&m.label_value)),
                Direction::Both => {
                    prop_assert!(inbound.contains(&m.policy_type));
                    prop_assert!(outbound.contains(&m.label_value));
                }
            }
        }
    }

    // Strictly one-directional rows never leak into the other direction.
    #[test]
    fn strict_rows_do_not_leak(mappings in mappings_strategy()) {
        for m in &mappings {
            if m.direction == Direction::Inbound {
                let has_outbound_row = mappings.iter().any(|o| {
                    o.policy_type == m.policy_type
                        && o.label_value == m.label_value
                        && o.direction != Direction::Inbound
                });
                if !has_outbound_row {
                    prop_assert!(
                        !policy_to_labels(&mappings, &m.policy_type).contains(&m.label_value)
                    );
                }
            }
            if m.direction == Direction::Outbound {
                let has_inbound_row = mappings.iter().any(|o| {
                    o.policy_type == m.policy_type
                        && o.label_value == m.label_value
                        && o.direction != Direction::Outbound
                });
                if !has_inbound_row {
                    prop_assert!(!labels_to_policies(&mappings, &[m.label_value.clone()])
                        .contains(&m.policy_type));
                }
            }
        }
    }

    // effective() is exact: identity for non-empty rows, defaults otherwise.
    #[test]
    fn effective_is_exact(mappings in mappings_strategy()) {
        if mappings.is_empty() {
            prop_assert_eq!(effective(&mappings), default_mappings());
        } else {
            prop_assert_eq!(effective(&mappings), mappings.as_slice());
        }
    }

    // Outputs never contain duplicates.
    #[test]
    fn outputs_are_deduplicated(
        mappings in mappings_strategy(),
        labels in prop::collection::vec(
            prop_oneof![Just("hate".to_string()), Just("spam".to_string()), Just("gore".to_string())],
            0..6,
        ),
    ) {
        let policies = labels_to_policies(&mappings, &labels);
        let mut seen = std::collections::HashSet::new();
        prop_assert!(policies.iter().all(|p| seen.insert(p.clone())));
    }

    // Classification depends only on marker substring presence, in priority
    // order; unmarked strings classify to None.
    #[test]
    fn classification_matches_substring_priority(
        prefix in "[a-zA-Z#.]{0,12}",
        marker in prop_oneof![
            Just(""),
            Just("modEventReport"),
            Just("modEventTakedown"),
            Just("modEventLabel"),
            Just("modEventComment"),
            Just("modEventEscalate"),
        ],
        suffix in "[a-zA-Z#.]{0,12}",
    ) {
        let s = format!("{prefix}{marker}{suffix}");
        let markers = [
            "modEventReport",
            "modEventTakedown",
            "modEventLabel",
            "modEventComment",
            "modEventEscalate",
        ];
        let expected_some = markers.iter().any(|m| s.contains(m));
        prop_assert_eq!(classify_event_type(&s).is_some(), expected_some);
    }
}
