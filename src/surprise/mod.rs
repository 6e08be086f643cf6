/// Surprise Calculator
///
/// Turns the gap between what an agent expected and what actually happened
/// into a bounded signal used by promotion and retention.
///
/// ## Signal
///
/// ```text
/// Outcome ──prediction_id──→ stored Prediction?
///    │                          │ yes: distance(predicted, actual) × confidence weight
///    │                          │ no / degraded: novelty vs recent content
///    ↓                          ↓
///  momentary ∈ [0,1]     momentum (time-decayed running average)
///         \                    /
///          effective = clamp(momentary + momentum × 0.5)
/// ```
///
/// Momentum decays once per elapsed tick of the injected clock, so a burst of
/// surprise fades even when no new outcomes arrive.
///
/// Degraded input (no prediction, unknown prediction id, non-object
/// outcomes) never fails: scoring falls back to novelty.
mod distance;

pub use distance::outcome_distance;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

use crate::clock::SharedClock;
use crate::config::{InputLimits, SurpriseConfig};
use crate::text;
use crate::types::Scope;

/// Weight of accumulated momentum in the effective signal.
const MOMENTUM_WEIGHT: f64 = 0.5;

/// An expectation recorded before acting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub scope: Scope,
    pub content: String,
    pub predicted_outcome: JsonValue,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Stamped from the calculator's clock on store when unset
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Prediction {
    pub fn new(
        id: impl Into<String>,
        scope: Scope,
        content: impl Into<String>,
        predicted_outcome: JsonValue,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            content: content.into(),
            predicted_outcome,
            confidence,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// What actually happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub scope: Scope,
    pub content: String,
    pub actual_outcome: JsonValue,
    pub prediction_id: Option<String>,
    /// When the outcome was observed, if the caller knows
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Outcome {
    pub fn new(
        id: impl Into<String>,
        scope: Scope,
        content: impl Into<String>,
        actual_outcome: JsonValue,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            content: content.into(),
            actual_outcome,
            prediction_id: None,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn for_prediction(mut self, prediction_id: impl Into<String>) -> Self {
        self.prediction_id = Some(prediction_id.into());
        self
    }
}

/// Threshold check attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurpriseDetection {
    pub is_surprising: bool,
    pub score: f64,
    /// Echo of the outcome content, truncated
    pub input: String,
}

/// How the momentary value was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurpriseBasis {
    Prediction,
    Novelty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurpriseSignal {
    pub momentary_surprise: f64,
    /// Momentum before this outcome was folded in
    pub past_surprise: f64,
    pub effective_surprise: f64,
    pub basis: SurpriseBasis,
    pub detection: SurpriseDetection,
    pub timestamp: DateTime<Utc>,
}

impl SurpriseSignal {
    /// Signal with every component at zero.
    pub fn neutral(timestamp: DateTime<Utc>) -> Self {
        Self {
            momentary_surprise: 0.0,
            past_surprise: 0.0,
            effective_surprise: 0.0,
            basis: SurpriseBasis::Novelty,
            detection: SurpriseDetection {
                is_surprising: false,
                score: 0.0,
                input: String::new(),
            },
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SurpriseStatistics {
    pub average_surprise: f64,
    /// Signals in the history window at or above the surprise threshold
    pub recent_surprise_count: usize,
    pub momentum: f64,
    pub outstanding_predictions: usize,
    pub total_signals: u64,
}

#[derive(Debug)]
struct ScopeSurprise {
    predictions: VecDeque<Prediction>,
    momentum: f64,
    momentum_at: DateTime<Utc>,
    recent_content: VecDeque<HashSet<String>>,
    history: VecDeque<f64>,
    total_signals: u64,
}

impl ScopeSurprise {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            predictions: VecDeque::new(),
            momentum: 0.0,
            momentum_at: now,
            recent_content: VecDeque::new(),
            history: VecDeque::new(),
            total_signals: 0,
        }
    }
}

/// Per-scope prediction buffers, momentum and novelty baselines.
#[derive(Debug)]
pub struct SurpriseCalculator {
    scopes: DashMap<Scope, ScopeSurprise>,
    config: SurpriseConfig,
    limits: InputLimits,
    clock: SharedClock,
}

impl SurpriseCalculator {
    pub fn new(config: SurpriseConfig, limits: InputLimits, clock: SharedClock) -> Self {
        Self {
            scopes: DashMap::new(),
            config,
            limits,
            clock,
        }
    }

    pub fn config(&self) -> &SurpriseConfig {
        &self.config
    }

    /// Record a prediction. The per-scope buffer is bounded; the oldest
    /// outstanding prediction is dropped when it is full. A prediction with
    /// an id already in the buffer replaces it.
    pub fn store_prediction(&self, mut prediction: Prediction) {
        prediction.confidence = sanitize_unit(prediction.confidence, 0.5);
        prediction.content = text::truncate_chars(&prediction.content, self.limits.max_content_chars);

        let now = self.clock.now();
        prediction.timestamp = prediction.timestamp.or(Some(now));
        let mut state = self
            .scopes
            .entry(prediction.scope.clone())
            .or_insert_with(|| ScopeSurprise::new(now));
        state.predictions.retain(|p| p.id != prediction.id);
        state.predictions.push_back(prediction);
        while state.predictions.len() > self.config.max_predictions.max(1) {
            if let Some(dropped) = state.predictions.pop_front() {
                trace!(scope = %dropped.scope, id = %dropped.id, "Dropped oldest prediction");
            }
        }
    }

    /// Compute the surprise signal for an outcome and fold it into momentum.
    ///
    /// A referenced prediction is consumed.
    pub fn calculate_surprise(&self, outcome: &Outcome) -> SurpriseSignal {
        let now = self.clock.now();
        let mut state = self
            .scopes
            .entry(outcome.scope.clone())
            .or_insert_with(|| ScopeSurprise::new(now));
        self.decay_momentum(&mut state, now);

        let prediction = outcome.prediction_id.as_deref().and_then(|id| {
            let idx = state.predictions.iter().position(|p| p.id == id)?;
            state.predictions.remove(idx)
        });

        let tokens = content_tokens(&outcome.content, Some(&outcome.actual_outcome));
        let predicted = prediction.and_then(|p| {
            outcome_distance(
                &p.predicted_outcome,
                &outcome.actual_outcome,
                self.limits.max_outcome_fields,
            )
            .map(|d| d * (0.5 + 0.5 * p.confidence))
        });
        let (momentary, basis) = match predicted {
            Some(value) => (value, SurpriseBasis::Prediction),
            None => (
                novelty_against(&tokens, &state.recent_content),
                SurpriseBasis::Novelty,
            ),
        };
        let momentary = sanitize_unit(momentary, 0.0);

        let past = state.momentum;
        let effective = (momentary + past * MOMENTUM_WEIGHT).clamp(0.0, 1.0);
        let decay = self.config.momentum_decay;
        state.momentum = sanitize_unit(past * decay + momentary * (1.0 - decay), 0.0);

        remember(&mut state.recent_content, tokens, self.config.novelty_window);
        remember(&mut state.history, effective, self.config.history_window);
        state.total_signals = state.total_signals.saturating_add(1);

        let is_surprising = effective >= self.config.surprise_threshold;
        debug!(
            scope = %outcome.scope,
            momentary,
            past,
            effective,
            basis = ?basis,
            is_surprising,
            "Calculated surprise"
        );

        SurpriseSignal {
            momentary_surprise: momentary,
            past_surprise: past,
            effective_surprise: effective,
            basis,
            detection: SurpriseDetection {
                is_surprising,
                score: effective,
                input: text::truncate_chars(&outcome.content, 256),
            },
            timestamp: now,
        }
    }

    /// Novelty of `content` against the scope's recent content, in [0, 1].
    ///
    /// Read-only: the content is not added to the baseline. String fields of
    /// `context` count as content.
    pub fn calculate_novelty_score(
        &self,
        scope: &Scope,
        content: &str,
        context: Option<&JsonValue>,
    ) -> f64 {
        let tokens = content_tokens(content, context);
        match self.scopes.get(scope) {
            Some(state) => novelty_against(&tokens, &state.recent_content),
            None => novelty_against(&tokens, &VecDeque::new()),
        }
    }

    /// Current momentum for a scope, decayed to now.
    pub fn momentum(&self, scope: &Scope) -> f64 {
        let now = self.clock.now();
        self.scopes
            .get(scope)
            .map_or(0.0, |state| self.decayed(state.momentum, state.momentum_at, now).0)
    }

    pub fn outstanding_predictions(&self, scope: &Scope) -> usize {
        self.scopes.get(scope).map_or(0, |s| s.predictions.len())
    }

    /// Unconsumed predictions for a scope, oldest first.
    pub fn pending_predictions(&self, scope: &Scope) -> Vec<Prediction> {
        self.scopes
            .get(scope)
            .map(|s| s.predictions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_statistics(&self, scope: &Scope) -> SurpriseStatistics {
        let now = self.clock.now();
        let Some(state) = self.scopes.get(scope) else {
            return SurpriseStatistics::default();
        };
        let average_surprise = if state.history.is_empty() {
            0.0
        } else {
            state.history.iter().sum::<f64>() / state.history.len() as f64
        };
        SurpriseStatistics {
            average_surprise,
            recent_surprise_count: state
                .history
                .iter()
                .filter(|s| **s >= self.config.surprise_threshold)
                .count(),
            momentum: self.decayed(state.momentum, state.momentum_at, now).0,
            outstanding_predictions: state.predictions.len(),
            total_signals: state.total_signals,
        }
    }

    /// Drop all state for a scope.
    pub fn clear(&self, scope: &Scope) -> bool {
        self.scopes.remove(scope).is_some()
    }

    fn decay_momentum(&self, state: &mut ScopeSurprise, now: DateTime<Utc>) {
        let (momentum, at) = self.decayed(state.momentum, state.momentum_at, now);
        state.momentum = momentum;
        state.momentum_at = at;
    }

    /// Apply whole elapsed ticks; partial ticks carry over.
    fn decayed(&self, momentum: f64, since: DateTime<Utc>, now: DateTime<Utc>) -> (f64, DateTime<Utc>) {
        let tick_ms = self.config.momentum_tick_ms.max(1) as i64;
        let elapsed_ms = (now - since).num_milliseconds();
        if elapsed_ms < tick_ms {
            return (momentum, since);
        }
        let ticks = elapsed_ms / tick_ms;
        let factor = self.config.momentum_decay.powi(ticks.min(i32::MAX as i64) as i32);
        (
            sanitize_unit(momentum * factor, 0.0),
            since + Duration::milliseconds(ticks * tick_ms),
        )
    }
}

fn content_tokens(content: &str, context: Option<&JsonValue>) -> HashSet<String> {
    let mut tokens = text::keywords(content);
    if let Some(context) = context {
        collect_strings(context, &mut tokens, 0);
    }
    tokens
}

fn collect_strings(value: &JsonValue, out: &mut HashSet<String>, depth: usize) {
    if depth > 4 {
        return;
    }
    match value {
        JsonValue::String(s) => out.extend(text::keywords(s)),
        JsonValue::Array(items) => items.iter().for_each(|v| collect_strings(v, out, depth + 1)),
        JsonValue::Object(map) => map.values().for_each(|v| collect_strings(v, out, depth + 1)),
        _ => {}
    }
}

/// One minus the best overlap with any remembered content.
fn novelty_against(tokens: &HashSet<String>, recent: &VecDeque<HashSet<String>>) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let best = recent
        .iter()
        .map(|seen| text::jaccard(tokens, seen))
        .fold(0.0_f64, f64::max);
    (1.0 - best).clamp(0.0, 1.0)
}

fn remember<T>(buffer: &mut VecDeque<T>, value: T, window: usize) {
    buffer.push_back(value);
    while buffer.len() > window.max(1) {
        buffer.pop_front();
    }
}

fn sanitize_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}
