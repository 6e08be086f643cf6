/// Configuration for continuum memory.
///
/// Everything is consumed once at initialization. Flags default to off and
/// the subsystem is inert until `enabled` is set; numeric tunables default to
/// the documented policy values.
///
/// ## Environment
///
/// [`ContinuumConfig::from_env`] reads `CONTINUUM_*` variables:
///
/// ```text
/// CONTINUUM_ENABLED=true
/// CONTINUUM_SURPRISE_ENABLED=true
/// CONTINUUM_CONSOLIDATION_ENABLED=true
/// CONTINUUM_PATTERN_DETECTION_ENABLED=true
/// CONTINUUM_OUTER_LOOP_FREQUENCY=5
/// CONTINUUM_REPAIR_THRESHOLD=0.7
/// CONTINUUM_SIMILARITY_THRESHOLD=0.6
/// CONTINUUM_SURPRISE_THRESHOLD=0.6
/// CONTINUUM_MOMENTUM_DECAY=0.7
/// CONTINUUM_RETAIN_THRESHOLD=0.3
/// CONTINUUM_CAPACITY_WORKING=50          (one per stratum)
/// CONTINUUM_DECAY_RATE_WORKING=0.3       (one per stratum)
/// CONTINUUM_RNG_SEED=42
/// ```
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

use crate::error::{MemoryError, MemoryResult};
use crate::types::Stratum;

/// One value per stratum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerStratum<T> {
    pub working: T,
    pub short_term: T,
    pub episodic: T,
    pub long_term: T,
    pub semantic: T,
}

impl<T: Copy> PerStratum<T> {
    pub fn get(&self, stratum: Stratum) -> T {
        match stratum {
            Stratum::Working => self.working,
            Stratum::ShortTerm => self.short_term,
            Stratum::Episodic => self.episodic,
            Stratum::LongTerm => self.long_term,
            Stratum::Semantic => self.semantic,
        }
    }

    pub fn set(&mut self, stratum: Stratum, value: T) {
        match stratum {
            Stratum::Working => self.working = value,
            Stratum::ShortTerm => self.short_term = value,
            Stratum::Episodic => self.episodic = value,
            Stratum::LongTerm => self.long_term = value,
            Stratum::Semantic => self.semantic = value,
        }
    }
}

/// Tier capacities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Capacity ceiling enforced by the retention gate
    pub capacities: PerStratum<usize>,

    /// Hard ceiling = capacity × factor; the stratum manager evicts beyond it
    pub hard_ceiling_factor: f64,
}

impl StrataConfig {
    pub fn capacity(&self, stratum: Stratum) -> usize {
        self.capacities.get(stratum)
    }

    pub fn hard_ceiling(&self, stratum: Stratum) -> usize {
        let cap = self.capacity(stratum) as f64 * self.hard_ceiling_factor.max(1.0);
        cap.ceil() as usize
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            capacities: PerStratum {
                working: Stratum::Working.default_capacity(),
                short_term: Stratum::ShortTerm.default_capacity(),
                episodic: Stratum::Episodic.default_capacity(),
                long_term: Stratum::LongTerm.default_capacity(),
                semantic: Stratum::Semantic.default_capacity(),
            },
            hard_ceiling_factor: 2.0,
        }
    }
}

/// Weights of the retention score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionWeights {
    pub importance: f64,
    pub access: f64,
    pub recency: f64,
    /// Maximum bonus reached at surprise 1.0
    pub surprise_bonus: f64,
    pub relational: f64,
}

impl Default for RetentionWeights {
    fn default() -> Self {
        Self {
            importance: 0.35,
            access: 0.20,
            recency: 0.25,
            surprise_bonus: 0.15,
            relational: 0.05,
        }
    }
}

/// Retention gate configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub weights: RetentionWeights,

    /// Recency time constant in hours (score = e^(-hours / tau))
    pub recency_tau_hours: f64,

    /// Accesses at which the frequency term reaches ~63%
    pub access_saturation: f64,

    /// Related links at which the relational term saturates
    pub relational_saturation: f64,

    /// Decayed score needed to survive when a tier is over capacity
    pub retain_threshold: f64,

    /// Base decay rate per stratum
    pub decay_rates: PerStratum<f64>,

    /// Whether capacity-triggered decay is enabled per stratum
    pub adaptive: PerStratum<bool>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            weights: RetentionWeights::default(),
            recency_tau_hours: 24.0,
            access_saturation: 5.0,
            relational_saturation: 10.0,
            retain_threshold: 0.3,
            decay_rates: PerStratum {
                working: 0.30,
                short_term: 0.15,
                episodic: 0.08,
                long_term: 0.02,
                semantic: 0.01,
            },
            adaptive: PerStratum {
                working: true,
                short_term: true,
                episodic: true,
                long_term: false,
                semantic: true,
            },
        }
    }
}

/// Surprise calculator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurpriseConfig {
    /// Momentum retention per tick (accumulated' = accumulated × decay + …)
    pub momentum_decay: f64,

    /// Real-time length of one momentum tick
    pub momentum_tick_ms: u64,

    /// Effective surprise at or above this is flagged as surprising
    pub surprise_threshold: f64,

    /// Outstanding predictions kept per scope (oldest evicted)
    pub max_predictions: usize,

    /// Recently seen contents used for novelty
    pub novelty_window: usize,

    /// Surprise values kept for statistics
    pub history_window: usize,
}

impl Default for SurpriseConfig {
    fn default() -> Self {
        Self {
            momentum_decay: 0.7,
            momentum_tick_ms: 1000,
            surprise_threshold: 0.6,
            max_predictions: 100,
            novelty_window: 50,
            history_window: 100,
        }
    }
}

/// Memory compressor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Target length ratio for light compression
    pub light_ratio: f64,
    /// Target length ratio for moderate compression
    pub moderate_ratio: f64,
    /// Target length ratio for heavy compression; must stay below 0.5
    pub heavy_ratio: f64,
    /// Shorter contents are never summarized
    pub min_compress_chars: usize,
    /// Default threshold for `are_similar`
    pub similarity_threshold: f64,
    pub content_weight: f64,
    pub tag_weight: f64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            light_ratio: 0.9,
            moderate_ratio: 0.6,
            heavy_ratio: 0.4,
            min_compress_chars: 80,
            similarity_threshold: 0.6,
            content_weight: 0.7,
            tag_weight: 0.3,
        }
    }
}

/// Process reward weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub surprise: f64,
    pub confidence: f64,
    pub tool_verification: f64,
    pub repair_cost: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            surprise: 0.3,
            confidence: 0.3,
            tool_verification: 0.25,
            repair_cost: 0.15,
        }
    }
}

/// Dual-loop orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Inner loops between outer loops
    pub outer_loop_frequency: u64,

    /// Verification confidence below this triggers repair
    pub repair_threshold: f64,

    pub reward_weights: RewardWeights,

    /// Promotion score needed to promote at all
    pub promotion_threshold: f64,

    /// Promotion score at which ShortTerm skips Episodic for LongTerm
    pub strong_promotion_threshold: f64,

    /// Entries promoted per stratum per outer loop
    pub promotion_batch: usize,

    /// Smallest similar group merged during consolidation
    pub min_consolidation_group: usize,

    /// Smallest similar Episodic group abstracted into a pattern
    pub min_pattern_support: usize,

    /// Verification confidence when no tool evidence is supplied
    pub base_confidence: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            outer_loop_frequency: 5,
            repair_threshold: 0.7,
            reward_weights: RewardWeights::default(),
            promotion_threshold: 0.5,
            strong_promotion_threshold: 0.8,
            promotion_batch: 5,
            min_consolidation_group: 2,
            min_pattern_support: 3,
            base_confidence: 0.5,
        }
    }
}

/// Size limits applied to untrusted input at the pipeline boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputLimits {
    pub max_content_chars: usize,
    pub max_tags: usize,
    pub max_tag_chars: usize,
    pub max_related: usize,
    pub max_transition_history: usize,
    pub max_trace_sentences: usize,
    pub max_tool_results: usize,
    pub max_query_limit: usize,
    /// Keys inspected when comparing structured outcomes
    pub max_outcome_fields: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_content_chars: 16_384,
            max_tags: 32,
            max_tag_chars: 64,
            max_related: 64,
            max_transition_history: 32,
            max_trace_sentences: 64,
            max_tool_results: 32,
            max_query_limit: 500,
            max_outcome_fields: 64,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContinuumConfig {
    /// Master switch; when off the whole subsystem is inert
    pub enabled: bool,
    pub surprise_enabled: bool,
    pub consolidation_enabled: bool,
    pub pattern_detection_enabled: bool,

    pub strata: StrataConfig,
    pub retention: RetentionConfig,
    pub surprise: SurpriseConfig,
    pub compression: CompressionConfig,
    pub orchestrator: OrchestratorConfig,
    pub limits: InputLimits,

    /// Seed for the eviction RNG (entropy when unset)
    pub rng_seed: Option<u64>,
}

impl ContinuumConfig {
    /// Everything switched on with default tunables.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            surprise_enabled: true,
            consolidation_enabled: true,
            pattern_detection_enabled: true,
            ..Default::default()
        }
    }

    /// Load from `CONTINUUM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key → value source.
    ///
    /// Unparseable and non-finite values are logged and ignored; numeric
    /// values are clamped into their valid ranges.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = EnvReader { lookup: &lookup };

        config.enabled = read.flag("CONTINUUM_ENABLED", config.enabled);
        config.surprise_enabled = read.flag("CONTINUUM_SURPRISE_ENABLED", config.surprise_enabled);
        config.consolidation_enabled =
            read.flag("CONTINUUM_CONSOLIDATION_ENABLED", config.consolidation_enabled);
        config.pattern_detection_enabled = read.flag(
            "CONTINUUM_PATTERN_DETECTION_ENABLED",
            config.pattern_detection_enabled,
        );

        config.orchestrator.outer_loop_frequency = read
            .number("CONTINUUM_OUTER_LOOP_FREQUENCY", config.orchestrator.outer_loop_frequency)
            .max(1);
        config.orchestrator.repair_threshold =
            read.fraction("CONTINUUM_REPAIR_THRESHOLD", config.orchestrator.repair_threshold);
        config.compression.similarity_threshold = read.fraction(
            "CONTINUUM_SIMILARITY_THRESHOLD",
            config.compression.similarity_threshold,
        );
        config.surprise.surprise_threshold =
            read.fraction("CONTINUUM_SURPRISE_THRESHOLD", config.surprise.surprise_threshold);
        config.surprise.momentum_decay =
            read.fraction("CONTINUUM_MOMENTUM_DECAY", config.surprise.momentum_decay);
        config.retention.retain_threshold =
            read.fraction("CONTINUUM_RETAIN_THRESHOLD", config.retention.retain_threshold);

        for stratum in Stratum::ALL {
            let key = stratum.as_str().to_uppercase();
            let capacity = read
                .number(
                    &format!("CONTINUUM_CAPACITY_{}", key),
                    config.strata.capacity(stratum),
                )
                .max(1);
            config.strata.capacities.set(stratum, capacity);

            let rate = read.fraction(
                &format!("CONTINUUM_DECAY_RATE_{}", key),
                config.retention.decay_rates.get(stratum),
            );
            config.retention.decay_rates.set(stratum, rate);
        }

        config.rng_seed = read.optional_number("CONTINUUM_RNG_SEED");
        config
    }

    /// Reject configurations that break the tier model.
    pub fn validate(&self) -> MemoryResult<()> {
        let rates = &self.retention.decay_rates;
        let ordered = [
            Stratum::Working,
            Stratum::ShortTerm,
            Stratum::Episodic,
            Stratum::LongTerm,
        ];
        for pair in ordered.windows(2) {
            if rates.get(pair[0]) <= rates.get(pair[1]) {
                return Err(MemoryError::config(
                    format!("retention.decay_rates.{}", pair[1]),
                    format!(
                        "decay rate must be lower than {} ({} <= {})",
                        pair[0],
                        rates.get(pair[0]),
                        rates.get(pair[1])
                    ),
                ));
            }
        }

        for stratum in Stratum::ALL {
            if self.strata.capacity(stratum) == 0 {
                return Err(MemoryError::config(
                    format!("strata.capacities.{}", stratum),
                    "capacity must be at least 1",
                ));
            }
            let rate = rates.get(stratum);
            if !(0.0..=1.0).contains(&rate) {
                return Err(MemoryError::config(
                    format!("retention.decay_rates.{}", stratum),
                    "decay rate must be within [0, 1]",
                ));
            }
        }

        let w = &self.orchestrator.reward_weights;
        for (name, value) in [
            ("surprise", w.surprise),
            ("confidence", w.confidence),
            ("tool_verification", w.tool_verification),
            ("repair_cost", w.repair_cost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::config(
                    format!("orchestrator.reward_weights.{}", name),
                    "weight must be within [0, 1]",
                ));
            }
        }

        if self.orchestrator.outer_loop_frequency == 0 {
            return Err(MemoryError::config(
                "orchestrator.outer_loop_frequency",
                "must be at least 1",
            ));
        }

        for (name, value) in [
            ("orchestrator.repair_threshold", self.orchestrator.repair_threshold),
            ("orchestrator.promotion_threshold", self.orchestrator.promotion_threshold),
            (
                "orchestrator.strong_promotion_threshold",
                self.orchestrator.strong_promotion_threshold,
            ),
            ("retention.retain_threshold", self.retention.retain_threshold),
            ("surprise.surprise_threshold", self.surprise.surprise_threshold),
            ("surprise.momentum_decay", self.surprise.momentum_decay),
            ("compression.similarity_threshold", self.compression.similarity_threshold),
            ("compression.moderate_ratio", self.compression.moderate_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MemoryError::config(name, "must be a number within [0, 1]"));
            }
        }

        let heavy = self.compression.heavy_ratio;
        if !(heavy > 0.0 && heavy < 0.5) {
            return Err(MemoryError::config(
                "compression.heavy_ratio",
                "heavy compression must target less than half the original length",
            ));
        }

        Ok(())
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn flag(&self, key: &str, default: bool) -> bool {
        match (self.lookup)(key) {
            None => default,
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    warn!(key, value = other, "Ignoring unrecognized boolean flag");
                    default
                }
            },
        }
    }

    fn number<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: Display,
    {
        match (self.lookup)(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(value) => value,
                Err(e) => {
                    warn!(key, value = %raw, error = %e, "Ignoring unparseable setting");
                    default
                }
            },
        }
    }

    /// A finite number clamped into [0, 1].
    fn fraction(&self, key: &str, default: f64) -> f64 {
        let value = self.number(key, default);
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            warn!(key, value, "Ignoring non-finite setting");
            default
        }
    }

    fn optional_number<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = (self.lookup)(key)?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, value = %raw, error = %e, "Ignoring unparseable setting");
                None
            }
        }
    }
}
