//! Catalog validation

use crate::schema::RawCatalog;
use thiserror::Error;
use turnstile_api::{Component, Tier};

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Unknown tier name: {0}")]
    UnknownTier(String),

    #[error("Unknown component name: {0}")]
    UnknownComponent(String),

    #[error("Component '{component}': unknown min_tier '{value}'")]
    UnknownMinTier { component: String, value: String },

    #[error("Tier '{tier}': window_minutes must be greater than zero")]
    ZeroWindow { tier: String },

    #[error("Component '{component}': window_override_minutes must be greater than zero")]
    ZeroWindowOverride { component: String },

    #[error("Service config error: {0}")]
    ServiceError(String),
}

/// Validate a raw catalog
pub fn validate_catalog(catalog: &RawCatalog) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (name, tier) in &catalog.tiers {
        if name.parse::<Tier>().is_err() {
            errors.push(ValidationError::UnknownTier(name.clone()));
        }
        if tier.window_minutes == Some(0) {
            errors.push(ValidationError::ZeroWindow { tier: name.clone() });
        }
    }

    if let Some(components) = &catalog.components {
        for (name, component) in components {
            if name.parse::<Component>().is_err() {
                errors.push(ValidationError::UnknownComponent(name.clone()));
            }
            if component.window_override_minutes == Some(0) {
                errors.push(ValidationError::ZeroWindowOverride {
                    component: name.clone(),
                });
            }
            if let Some(min_tier) = &component.min_tier
                && min_tier.parse::<Tier>().is_err()
            {
                errors.push(ValidationError::UnknownMinTier {
                    component: name.clone(),
                    value: min_tier.clone(),
                });
            }
        }
    }

    if catalog.service.unlock_timeout_seconds == Some(0) {
        errors.push(ValidationError::ServiceError(
            "unlock_timeout_seconds must be greater than zero".into(),
        ));
    }
    if catalog.service.sweep_interval_seconds == Some(0) {
        errors.push(ValidationError::ServiceError(
            "sweep_interval_seconds must be greater than zero".into(),
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_raw(content: &str) -> RawCatalog {
        toml::from_str(content).unwrap()
    }

    #[test]
    fn valid_catalog_passes() {
        let raw = parse_raw(
            r#"
            catalog_version = 1

            [tiers.pro]
            window_minutes = 120

            [components.chart]
            cost = 10
            min_tier = "free"
        "#,
        );

        assert!(validate_catalog(&raw).is_empty());
    }

    #[test]
    fn unknown_tier_name_is_flagged() {
        let raw = parse_raw(
            r#"
            catalog_version = 1

            [tiers.platinum]
            window_minutes = 60
        "#,
        );

        let errors = validate_catalog(&raw);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownTier(_))));
    }

    #[test]
    fn unknown_component_and_min_tier_are_flagged() {
        let raw = parse_raw(
            r#"
            catalog_version = 1

            [components.heatmap]
            cost = 3

            [components.chart]
            cost = 10
            min_tier = "vip"
        "#,
        );

        let errors = validate_catalog(&raw);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownComponent(_))));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownMinTier { .. })));
    }

    #[test]
    fn zero_windows_are_flagged() {
        let raw = parse_raw(
            r#"
            catalog_version = 1

            [tiers.free]
            window_minutes = 0

            [components.chart]
            cost = 10
            window_override_minutes = 0
        "#,
        );

        let errors = validate_catalog(&raw);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroWindow { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::ZeroWindowOverride { .. })));
    }

    #[test]
    fn zero_cost_is_valid() {
        // A free component behaves like an unmetered grant; not an error.
        let raw = parse_raw(
            r#"
            catalog_version = 1

            [components.scores]
            cost = 0
        "#,
        );

        assert!(validate_catalog(&raw).is_empty());
    }
}
