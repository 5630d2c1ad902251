//! Validated catalog ready for use by the entitlement issuer

use crate::schema::{RawCatalog, RawServiceConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use turnstile_api::{CatalogEntryView, CatalogView, Component, Tier, TierWindowView};

/// Validated, immutable entitlement policy.
///
/// Built once from a `RawCatalog` (or `Catalog::default()`); never mutated
/// in place. Reloads construct a fresh instance and swap it.
#[derive(Debug, Clone)]
pub struct Catalog {
    service: ServiceConfig,
    tiers: BTreeMap<Tier, TierPolicy>,
    components: BTreeMap<Component, ComponentPolicy>,
}

/// Per-tier policy
#[derive(Debug, Clone)]
pub struct TierPolicy {
    /// How long a fresh grant stays valid
    pub window: Duration,
    /// Tier bypasses the credit charge (windows still apply)
    pub unmetered: bool,
}

/// Per-component policy
#[derive(Debug, Clone)]
pub struct ComponentPolicy {
    /// Credit cost per fresh grant
    pub cost: u32,
    /// Window applied regardless of tier
    pub window_override: Option<Duration>,
    /// Lowest tier allowed to unlock this component
    pub min_tier: Option<Tier>,
}

/// Service-level settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
    pub unlock_timeout: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(turnstile_util::socket_path_without_env),
            data_dir: raw
                .data_dir
                .unwrap_or_else(turnstile_util::data_dir_without_env),
            sweep_interval: Duration::from_secs(raw.sweep_interval_seconds.unwrap_or(60)),
            unlock_timeout: Duration::from_secs(raw.unlock_timeout_seconds.unwrap_or(5)),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

fn default_tier_window(tier: Tier) -> Duration {
    let minutes = match tier {
        Tier::Free => 30,
        Tier::Pro => 120,
        Tier::Elite => 240,
        Tier::Institutional => 480,
    };
    Duration::from_secs(minutes * 60)
}

fn default_components() -> BTreeMap<Component, ComponentPolicy> {
    let mut components = BTreeMap::new();
    components.insert(
        Component::Chart,
        ComponentPolicy {
            cost: 10,
            window_override: None,
            min_tier: None,
        },
    );
    components.insert(
        Component::Scores,
        ComponentPolicy {
            cost: 8,
            window_override: None,
            min_tier: None,
        },
    );
    components.insert(
        Component::SocialPosts,
        ComponentPolicy {
            cost: 5,
            window_override: None,
            min_tier: None,
        },
    );
    components.insert(
        Component::AiAnalysis,
        ComponentPolicy {
            cost: 20,
            window_override: None,
            min_tier: Some(Tier::Pro),
        },
    );
    components
}

impl Catalog {
    /// Convert from raw catalog (after validation).
    ///
    /// Tiers not listed in the raw catalog keep the built-in default
    /// window; an absent components table means the default price list.
    pub fn from_raw(raw: RawCatalog) -> Self {
        let mut tiers = BTreeMap::new();
        for tier in Tier::ALL {
            let raw_tier = raw.tiers.get(tier.as_str());
            tiers.insert(
                tier,
                TierPolicy {
                    window: raw_tier
                        .and_then(|t| t.window_minutes)
                        .map(|m| Duration::from_secs(m * 60))
                        .unwrap_or_else(|| default_tier_window(tier)),
                    // A catalog silent on a tier keeps the built-in
                    // default, including institutional's unmetered flag.
                    unmetered: raw_tier
                        .map(|t| t.unmetered)
                        .unwrap_or(tier == Tier::Institutional),
                },
            );
        }

        let components = match raw.components {
            Some(raw_components) => raw_components
                .into_iter()
                .filter_map(|(name, c)| {
                    let component: Component = name.parse().ok()?;
                    Some((
                        component,
                        ComponentPolicy {
                            cost: c.cost,
                            window_override: c
                                .window_override_minutes
                                .map(|m| Duration::from_secs(m * 60)),
                            min_tier: c.min_tier.and_then(|t| t.parse().ok()),
                        },
                    ))
                })
                .collect(),
            None => default_components(),
        };

        Self {
            service: ServiceConfig::from_raw(raw.service),
            tiers,
            components,
        }
    }

    pub fn service(&self) -> &ServiceConfig {
        &self.service
    }

    /// Look up a component's policy. None means the component is not
    /// priced in this catalog.
    pub fn entry(&self, component: Component) -> Option<&ComponentPolicy> {
        self.components.get(&component)
    }

    /// Authoritative credit cost for a component
    pub fn cost(&self, component: Component) -> Option<u32> {
        self.entry(component).map(|c| c.cost)
    }

    /// Grant window for (tier, component). A component override wins over
    /// the tier window.
    pub fn window(&self, tier: Tier, component: Component) -> Duration {
        if let Some(override_window) = self.entry(component).and_then(|c| c.window_override) {
            return override_window;
        }
        self.tiers[&tier].window
    }

    /// Whether a tier may unlock a component at all
    pub fn allows(&self, tier: Tier, component: Component) -> bool {
        match self.entry(component) {
            Some(policy) => policy.min_tier.is_none_or(|min| tier >= min),
            None => false,
        }
    }

    /// Whether a tier bypasses the credit charge
    pub fn unmetered(&self, tier: Tier) -> bool {
        self.tiers[&tier].unmetered
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Read-only dump for collaborators rendering "time remaining"
    pub fn to_view(&self) -> CatalogView {
        let entries = self
            .components
            .iter()
            .map(|(&component, policy)| CatalogEntryView {
                component,
                cost: policy.cost,
                min_tier: policy.min_tier,
                windows: Tier::ALL
                    .iter()
                    .map(|&tier| TierWindowView {
                        tier,
                        window_secs: self.window(tier, component).as_secs(),
                        unmetered: self.unmetered(tier),
                    })
                    .collect(),
            })
            .collect();

        CatalogView {
            catalog_version: crate::CURRENT_CATALOG_VERSION,
            entries,
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        for tier in Tier::ALL {
            tiers.insert(
                tier,
                TierPolicy {
                    window: default_tier_window(tier),
                    unmetered: tier == Tier::Institutional,
                },
            );
        }

        Self {
            service: ServiceConfig::default(),
            tiers,
            components: default_components(),
        }
    }
}
