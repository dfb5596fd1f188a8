//! Static profile schema
//!
//! The profile tree is fixed at build time: eight dimensions, each a fixed
//! set of named fields that are either scalar or list-valued. Nothing that
//! arrives at runtime can add a dimension or a field.

/// Whether a field holds a single value or a set of strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Text or number
    Scalar,
    /// List of strings, merged by set union
    List,
}

/// A named field inside a dimension
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// A top-level group of related fields
#[derive(Debug, Clone, Copy)]
pub struct DimensionSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl DimensionSpec {
    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const fn scalar(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Scalar,
    }
}

const fn list(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::List,
    }
}

/// The profile schema, in presentation order.
pub static SCHEMA: &[DimensionSpec] = &[
    // Identity and language: forms of address, explanation depth
    DimensionSpec {
        name: "identity_language",
        fields: &[
            scalar("age"),
            scalar("gender"),
            scalar("region"),
            scalar("education_level"),
            scalar("explanation_depth_preference"),
        ],
    },
    // Health and risk: how cautious advice must be
    DimensionSpec {
        name: "health_safety",
        fields: &[
            list("chronic_conditions"),
            scalar("mobility_level"),
            scalar("daily_energy_level"),
            scalar("risk_sensitivity_level"),
        ],
    },
    DimensionSpec {
        name: "cognitive_interaction",
        fields: &[
            scalar("attention_span"),
            scalar("processing_speed"),
            scalar("digital_literacy"),
            scalar("instruction_following_ability"),
        ],
    },
    DimensionSpec {
        name: "emotional_support",
        fields: &[
            scalar("baseline_mood"),
            scalar("loneliness_level"),
            scalar("emotional_support_need"),
            scalar("preferred_conversation_mode"),
        ],
    },
    DimensionSpec {
        name: "lifestyle_social",
        fields: &[
            scalar("living_situation"),
            scalar("social_support_level"),
            scalar("independence_level"),
            list("core_interests"),
        ],
    },
    DimensionSpec {
        name: "values_preferences",
        fields: &[
            list("topic_preferences"),
            list("taboo_topics"),
            scalar("value_orientation"),
            list("motivational_factors"),
        ],
    },
    // Response-style controls read directly by the generator
    DimensionSpec {
        name: "response_style",
        fields: &[
            scalar("formality_level"),
            scalar("verbosity_level"),
            scalar("emotional_tone"),
            scalar("directive_strength"),
            scalar("information_density"),
            scalar("risk_cautiousness"),
        ],
    },
    // Learning layer, not injected into prompts
    DimensionSpec {
        name: "interaction_history",
        fields: &[
            list("successful_interaction_patterns"),
            list("failed_interaction_patterns"),
            scalar("preference_evolution_trend"),
            scalar("response_satisfaction_score"),
            scalar("last_interaction_feedback"),
        ],
    },
];

/// Look up a dimension by name
pub fn dimension(name: &str) -> Option<&'static DimensionSpec> {
    SCHEMA.iter().find(|d| d.name == name)
}

/// Look up a field by dimension and field name
pub fn field(dimension_name: &str, field_name: &str) -> Option<&'static FieldSpec> {
    dimension(dimension_name).and_then(|d| d.field(field_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_schema_has_eight_dimensions() {
        assert_eq!(SCHEMA.len(), 8);
        assert!(dimension("health_safety").is_some());
        assert!(dimension("lifestyle").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        let dims: HashSet<_> = SCHEMA.iter().map(|d| d.name).collect();
        assert_eq!(dims.len(), SCHEMA.len());
        for d in SCHEMA {
            let fields: HashSet<_> = d.fields.iter().map(|f| f.name).collect();
            assert_eq!(fields.len(), d.fields.len(), "duplicate field in {}", d.name);
        }
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(
            field("health_safety", "chronic_conditions").unwrap().kind,
            FieldKind::List
        );
        assert_eq!(field("identity_language", "age").unwrap().kind, FieldKind::Scalar);
        assert!(field("identity_language", "shoe_size").is_none());
    }
}
