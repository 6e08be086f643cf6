/// Per-stratum retention policies.
///
/// A policy fixes how fast a stratum forgets (`base_decay_rate`), whether the
/// retention threshold is applied when it overflows (`adaptive`) and how many
/// entries it may hold (`capacity`). Defaults come from configuration; updates
/// are validated so decay keeps decreasing from Working to LongTerm.
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::config::{RetentionConfig, StrataConfig};
use crate::error::{MemoryError, MemoryResult};
use crate::types::Stratum;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub stratum: Stratum,
    /// Fraction of the retention score lost per maintenance pass, in [0, 1]
    pub base_decay_rate: f64,
    /// Threshold-based eviction when over capacity
    pub adaptive: bool,
    pub capacity: usize,
}

/// Partial policy change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub base_decay_rate: Option<f64>,
    pub adaptive: Option<bool>,
    pub capacity: Option<usize>,
}

/// The five live policies plus the defaults they reset to.
#[derive(Debug)]
pub struct PolicyTable {
    defaults: [RetentionPolicy; 5],
    live: RwLock<[RetentionPolicy; 5]>,
}

impl PolicyTable {
    pub fn new(retention: &RetentionConfig, strata: &StrataConfig) -> Self {
        let defaults = Stratum::ALL.map(|stratum| RetentionPolicy {
            stratum,
            base_decay_rate: retention.decay_rates.get(stratum),
            adaptive: retention.adaptive.get(stratum),
            capacity: strata.capacity(stratum),
        });
        Self {
            live: RwLock::new(defaults.clone()),
            defaults,
        }
    }

    pub fn get(&self, stratum: Stratum) -> RetentionPolicy {
        let live = self.live.read().unwrap_or_else(|e| e.into_inner());
        live[stratum.index()].clone()
    }

    pub fn all(&self) -> Vec<RetentionPolicy> {
        self.live.read().unwrap_or_else(|e| e.into_inner()).to_vec()
    }

    /// Apply `update`, returning the new policy.
    ///
    /// # Errors
    ///
    /// [`MemoryError::Config`] when the rate is outside [0, 1] or not finite,
    /// the capacity is zero, or the change would break the decay ordering
    /// Working > ShortTerm > Episodic > LongTerm. Nothing changes on error.
    pub fn update(&self, stratum: Stratum, update: PolicyUpdate) -> MemoryResult<RetentionPolicy> {
        let mut live = self.live.write().unwrap_or_else(|e| e.into_inner());
        let mut candidate = live.clone();
        let policy = &mut candidate[stratum.index()];

        if let Some(rate) = update.base_decay_rate {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(MemoryError::config(
                    format!("policy.{}.base_decay_rate", stratum),
                    format!("{} is outside [0, 1]", rate),
                ));
            }
            policy.base_decay_rate = rate;
        }
        if let Some(adaptive) = update.adaptive {
            policy.adaptive = adaptive;
        }
        if let Some(capacity) = update.capacity {
            if capacity == 0 {
                return Err(MemoryError::config(
                    format!("policy.{}.capacity", stratum),
                    "capacity must be at least 1",
                ));
            }
            policy.capacity = capacity;
        }

        check_ordering(&candidate)?;
        *live = candidate;
        Ok(live[stratum.index()].clone())
    }

    /// Restore every policy to its configured default.
    pub fn reset(&self) {
        *self.live.write().unwrap_or_else(|e| e.into_inner()) = self.defaults.clone();
    }
}

fn check_ordering(policies: &[RetentionPolicy; 5]) -> MemoryResult<()> {
    let ordered = [
        Stratum::Working,
        Stratum::ShortTerm,
        Stratum::Episodic,
        Stratum::LongTerm,
    ];
    for pair in ordered.windows(2) {
        let upper = &policies[pair[0].index()];
        let lower = &policies[pair[1].index()];
        if upper.base_decay_rate <= lower.base_decay_rate {
            return Err(MemoryError::config(
                format!("policy.{}.base_decay_rate", lower.stratum),
                format!(
                    "{} decay ({}) must stay below {} decay ({})",
                    lower.stratum, lower.base_decay_rate, upper.stratum, upper.base_decay_rate
                ),
            ));
        }
    }
    Ok(())
}
