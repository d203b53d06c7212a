//! Translation between the platform's policy taxonomy and the external
//! labeler's label vocabulary.
//!
//! Resolution rules, all deterministic:
//! - A tenant's own mapping rows, when any exist, replace the defaults
//!   entirely; defaults are never merged in.
//! - Inbound translation (`labels_to_policies`) only considers rows with
//!   direction INBOUND or BOTH; outbound (`policy_to_labels`) only OUTBOUND
//!   or BOTH.
//! - Outputs are deduplicated preserving first-seen order.
//! - Event `$type` classification is a case-sensitive substring test in a
//!   fixed priority order; first match wins.

#![deny(unsafe_code)]

use bridge_core::event::EventCategory;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Which translation direction(s) a mapping row participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
    Both,
}

impl Direction {
    /// Canonical text form, as persisted in the mapping table.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
            Direction::Both => "BOTH",
        }
    }

    /// Parse the canonical text form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INBOUND" => Some(Direction::Inbound),
            "OUTBOUND" => Some(Direction::Outbound),
            "BOTH" => Some(Direction::Both),
            _ => None,
        }
    }

    fn inbound(self) -> bool {
        matches!(self, Direction::Inbound | Direction::Both)
    }

    fn outbound(self) -> bool {
        matches!(self, Direction::Outbound | Direction::Both)
    }
}

/// One policy-type / label-value mapping row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelMapping {
    /// Platform policy type (e.g. `SPAM`).
    pub policy_type: String,
    /// Labeler vocabulary value (e.g. `spam`).
    pub label_value: String,
    /// Direction(s) the row applies to.
    pub direction: Direction,
}

impl LabelMapping {
    /// Convenience constructor.
    pub fn new(policy_type: &str, label_value: &str, direction: Direction) -> Self {
        Self {
            policy_type: policy_type.to_owned(),
            label_value: label_value.to_owned(),
            direction,
        }
    }
}

static DEFAULT_MAPPINGS: Lazy<Vec<LabelMapping>> = Lazy::new(|| {
    use Direction::{Both, Outbound};
    vec![
        LabelMapping::new("HATE", "hate", Both),
        LabelMapping::new("VIOLENCE", "violence", Both),
        LabelMapping::new("VIOLENCE", "gore", Both),
        LabelMapping::new("SEXUAL_CONTENT", "sexual", Both),
        LabelMapping::new("SEXUAL_CONTENT", "porn", Both),
        LabelMapping::new("SEXUAL_CONTENT", "nudity", Both),
        LabelMapping::new("SPAM", "spam", Both),
        LabelMapping::new("HARASSMENT", "harassment", Both),
        LabelMapping::new("SELF_HARM_AND_SUICIDE", "self-harm", Both),
        LabelMapping::new("TERRORISM", "terrorism", Both),
        LabelMapping::new("SEXUAL_EXPLOITATION", "csam", Both),
        LabelMapping::new("SEXUAL_EXPLOITATION", "!hide", Outbound),
    ]
});

/// The frozen default mapping table, used for tenants with no rows of
/// their own.
pub fn default_mappings() -> &'static [LabelMapping] {
    &DEFAULT_MAPPINGS
}

/// Tenant rows when any exist, defaults otherwise. Never a merge.
pub fn effective(tenant_rows: &[LabelMapping]) -> &[LabelMapping] {
    if tenant_rows.is_empty() {
        default_mappings()
    } else {
        tenant_rows
    }
}

/// Translate labeler label values into platform policy types, using rows
/// whose direction permits inbound flow. Deduplicated, first-seen order.
pub fn labels_to_policies(mappings: &[LabelMapping], labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for label in labels {
        for m in mappings {
            if m.direction.inbound() && m.label_value == *label && !out.contains(&m.policy_type)
            {
                out.push(m.policy_type.clone());
            }
        }
    }
    out
}

/// Translate a platform policy type into labeler label values, using rows
/// whose direction permits outbound flow. Deduplicated, first-seen order.
pub fn policy_to_labels(mappings: &[LabelMapping], policy_type: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in mappings {
        if m.direction.outbound() && m.policy_type == policy_type && !out.contains(&m.label_value)
        {
            out.push(m.label_value.clone());
        }
    }
    out
}

const CATEGORY_MARKERS: &[(&str, EventCategory)] = &[
    ("modEventReport", EventCategory::Report),
    ("modEventTakedown", EventCategory::Takedown),
    ("modEventLabel", EventCategory::Label),
    ("modEventComment", EventCategory::Comment),
    ("modEventEscalate", EventCategory::Escalate),
];

/// Classify an external event `$type` string. Case-sensitive substring
/// match, first marker wins; `None` when no marker is present.
pub fn classify_event_type(event_type: &str) -> Option<EventCategory> {
    CATEGORY_MARKERS
        .iter()
        .find(|(marker, _)| event_type.contains(marker))
        .map(|(_, category)| *category)
}
