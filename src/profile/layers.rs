//! Layered profile composition.
//!
//! The effective profile for an attempt is the base profile with an ordered
//! list of pure layers folded over it. Keeping the layers around (instead of
//! only the folded result) means any attempt's configuration can be rebuilt
//! and inspected after the fact.

use super::ConfigProfile;
use super::stability::{apply_fragile_host_rules, apply_global_guardrails, is_fragile_host};

/// One pure transformation of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileLayer {
    /// Clamp for a historically fragile provider.
    FragileHost,
    /// Process-wide concurrency/retry/backoff limits.
    Guardrails,
    /// Per-attempt escalation after a fragment or network failure.
    Escalation,
    /// Maximally conservative retry after an unclassified failure.
    SafeFallback,
}

impl ProfileLayer {
    /// Applies this layer to `profile`, returning a new profile.
    #[must_use]
    pub fn apply(self, profile: &ConfigProfile) -> ConfigProfile {
        match self {
            Self::FragileHost => apply_fragile_host_rules(profile),
            Self::Guardrails => apply_global_guardrails(profile),
            Self::Escalation => profile.escalated(),
            Self::SafeFallback => profile.safe_fallback(),
        }
    }
}

/// A base profile plus the layers applied on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredProfile {
    base: ConfigProfile,
    layers: Vec<ProfileLayer>,
}

impl LayeredProfile {
    /// Wraps a base profile with no layers.
    #[must_use]
    pub fn new(base: ConfigProfile) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    /// Builds the stability layers for a request URL.
    ///
    /// Produces the same effective profile as
    /// [`adjust_for_stability`](super::adjust_for_stability).
    #[must_use]
    pub fn for_request(base: ConfigProfile, url: &str) -> Self {
        let mut layered = Self::new(base);
        if is_fragile_host(url) {
            layered.layers.push(ProfileLayer::FragileHost);
        }
        layered.layers.push(ProfileLayer::Guardrails);
        layered
    }

    /// Returns a new stack with `layer` appended.
    #[must_use]
    pub fn push(&self, layer: ProfileLayer) -> Self {
        let mut layers = self.layers.clone();
        layers.push(layer);
        Self {
            base: self.base.clone(),
            layers,
        }
    }

    #[must_use]
    pub fn base(&self) -> &ConfigProfile {
        &self.base
    }

    #[must_use]
    pub fn layers(&self) -> &[ProfileLayer] {
        &self.layers
    }

    /// Whether `layer` has been applied at least once.
    #[must_use]
    pub fn contains(&self, layer: ProfileLayer) -> bool {
        self.layers.contains(&layer)
    }

    /// Folds every layer over the base profile.
    #[must_use]
    pub fn effective(&self) -> ConfigProfile {
        self.layers
            .iter()
            .fold(self.base.clone(), |profile, layer| layer.apply(&profile))
    }
}
