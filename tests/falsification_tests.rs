/// Falsification tests for continuum memory.
///
/// These tests try to break the subsystem rather than confirm it works. Each
/// property is attacked with generated inputs:
///
/// - Surprise signals stay inside [0, 1] whatever the prediction says
/// - Compression never grows content, and heavy compression halves it
/// - The retention gate never keeps more than a stratum's capacity
/// - Importance and access counts move scores and counters the right way
/// - Decay and transitions never lose or duplicate entries they shouldn't
///
/// Philosophy: If we can't break it, we gain confidence it's correct.
use continuum_memory::config::{
    CompressionConfig, InputLimits, RetentionConfig, StrataConfig, SurpriseConfig,
};
use continuum_memory::prelude::*;
use continuum_memory::{MemoryCompressor, RetentionGate, StratumManager, SurpriseCalculator};
use proptest::prelude::*;
use std::sync::Arc;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_now())
}

fn manager() -> StratumManager {
    StratumManager::with_parts(
        StrataConfig::default(),
        InputLimits::default(),
        clock(),
        Some(11),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

fn importance() -> impl Strategy<Value = Importance> {
    prop::sample::select(Importance::ALL.to_vec())
}

fn stratum() -> impl Strategy<Value = Stratum> {
    prop::sample::select(Stratum::ALL.to_vec())
}

fn json_leaf() -> impl Strategy<Value = JsonValue> {
    prop_oneof![
        "[a-z]{0,12}".prop_map(JsonValue::from),
        (-1.0e6f64..1.0e6).prop_map(JsonValue::from),
        any::<bool>().prop_map(JsonValue::from),
        Just(JsonValue::Null),
    ]
}

fn json_outcome() -> impl Strategy<Value = JsonValue> {
    prop_oneof![
        json_leaf(),
        prop::collection::btree_map("[a-e]", json_leaf(), 0..5)
            .prop_map(|m| JsonValue::Object(m.into_iter().collect())),
        prop::collection::vec(json_leaf(), 0..5).prop_map(JsonValue::Array),
    ]
}

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{2,9}", 4..12).prop_map(|words| {
        let mut s = words.join(" ");
        s.push('.');
        s
    })
}

fn long_text() -> impl Strategy<Value = String> {
    prop::collection::vec(sentence(), 3..10).prop_map(|s| s.join(" "))
}

// ============================================================================
// SECTION 1: SURPRISE BOUNDS
// ============================================================================

proptest! {
    /// Falsification: Can a prediction push surprise outside [0, 1]?
    #[test]
    fn falsify_surprise_bounds(
        predicted in json_outcome(),
        actual in json_outcome(),
        confidence in -2.0f64..3.0,
        linked in any::<bool>(),
        repeats in 1usize..6,
    ) {
        let surprise = SurpriseCalculator::new(SurpriseConfig::default(), InputLimits::default(), clock());
        let scope = Scope::agent("prop");

        for i in 0..repeats {
            let pid = format!("p{}", i);
            surprise.store_prediction(Prediction::new(
                pid.clone(),
                scope.clone(),
                "forecast",
                predicted.clone(),
                confidence,
            ));
            let mut outcome = Outcome::new(format!("o{}", i), scope.clone(), "forecast", actual.clone());
            if linked {
                outcome = outcome.for_prediction(pid);
            }
            let signal = surprise.calculate_surprise(&outcome);

            prop_assert!((0.0..=1.0).contains(&signal.momentary_surprise));
            prop_assert!((0.0..=1.0).contains(&signal.past_surprise));
            prop_assert!((0.0..=1.0).contains(&signal.effective_surprise));
            prop_assert!((0.0..=1.0).contains(&surprise.momentum(&scope)));
        }
    }

    /// Falsification: Does a non-finite confidence leak NaN into the signal?
    #[test]
    fn falsify_surprise_non_finite_confidence(
        confidence in prop_oneof![Just(f64::NAN), Just(f64::INFINITY), Just(f64::NEG_INFINITY)],
        actual in json_outcome(),
    ) {
        let surprise = SurpriseCalculator::new(SurpriseConfig::default(), InputLimits::default(), clock());
        let scope = Scope::agent("prop");
        surprise.store_prediction(Prediction::new("p", scope.clone(), "x", json!({ "a": 1 }), confidence));
        let signal = surprise.calculate_surprise(&Outcome::new("o", scope, "x", actual).for_prediction("p"));

        prop_assert!(signal.effective_surprise.is_finite());
        prop_assert!((0.0..=1.0).contains(&signal.effective_surprise));
    }
}

// ============================================================================
// SECTION 2: COMPRESSION NEVER EXPANDS
// ============================================================================

proptest! {
    /// Falsification: Can compression for any stratum make content longer?
    #[test]
    fn falsify_compression_non_expansion(
        content in prop_oneof!["[ a-zA-Z.!?]{0,200}", long_text()],
        target in stratum(),
    ) {
        let rt = runtime();
        let manager = manager();
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let entry = manager.add_memory(&Scope::agent("prop"), Stratum::Working, MemoryDraft::new(content));

        let compressed = rt.block_on(compressor.compress_memory(&entry, target));
        prop_assert!(compressed.content.chars().count() <= entry.content.chars().count());
        prop_assert_eq!(compressed.stratum, target);
        if let Some(meta) = &compressed.compression {
            prop_assert!(meta.original_length >= compressed.content.chars().count());
            prop_assert!((0.0..=1.0).contains(&meta.compression_ratio));
        }
    }

    /// Falsification: Does heavy compression ever keep half or more of a
    /// long input?
    #[test]
    fn falsify_heavy_compression_halves(content in long_text()) {
        prop_assume!(content.chars().count() >= CompressionConfig::default().min_compress_chars);
        let rt = runtime();
        let manager = manager();
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let entry = manager.add_memory(&Scope::agent("prop"), Stratum::Episodic, MemoryDraft::new(content));

        let compressed = rt.block_on(compressor.compress_memory(&entry, Stratum::Semantic));
        prop_assert!(compressed.content.chars().count() * 2 < entry.content.chars().count());
        prop_assert!(!compressed.content.is_empty());
    }

    /// Falsification: Does compressing twice forget the original length?
    #[test]
    fn falsify_original_length_survives_recompression(content in long_text()) {
        let rt = runtime();
        let manager = manager();
        let compressor = MemoryCompressor::new(CompressionConfig::default());
        let entry = manager.add_memory(&Scope::agent("prop"), Stratum::Working, MemoryDraft::new(content));
        let original = entry.content.chars().count();

        let once = rt.block_on(compressor.compress_memory(&entry, Stratum::Episodic));
        let twice = rt.block_on(compressor.compress_memory(&once, Stratum::Semantic));
        prop_assert_eq!(twice.compression.unwrap().original_length, original);
    }
}

// ============================================================================
// SECTION 3: RETENTION GATE
// ============================================================================

proptest! {
    /// Falsification: Can the gate keep more entries than the capacity?
    #[test]
    fn falsify_retention_capacity(
        specs in prop::collection::vec((importance(), 0u32..20), 0..40),
        capacity in 1usize..15,
        target in stratum(),
        momentum in prop::option::of(0.0f64..1.0),
    ) {
        let mut strata = StrataConfig::default();
        strata.capacities.set(target, capacity);
        let gate = RetentionGate::new(RetentionConfig::default(), &strata, clock());

        let manager = manager();
        let scope = Scope::agent("prop");
        let entries: Vec<MemoryEntry> = specs
            .iter()
            .enumerate()
            .map(|(i, (importance, reads))| {
                let mut entry = manager.add_memory(
                    &scope,
                    target,
                    MemoryDraft::new(format!("entry {}", i)).with_importance(*importance),
                );
                entry.access_count = u64::from(*reads);
                entry
            })
            .collect();

        let results = gate.apply_retention_gate_with_surprise(&entries, target, entries.len(), momentum);
        prop_assert_eq!(results.len(), entries.len());
        let retained = results.iter().filter(|r| r.should_retain).count();
        prop_assert!(retained <= capacity);
        if entries.len() <= capacity {
            prop_assert_eq!(retained, entries.len());
        }
        for result in &results {
            prop_assert!(result.decayed_score <= result.original_score);
            prop_assert!((0.0..=1.0).contains(&result.original_score));
        }
    }

    /// Falsification: Can a less important entry outscore a more important
    /// one with identical history?
    #[test]
    fn falsify_importance_ordering(
        a in importance(),
        b in importance(),
        reads in 0u64..50,
        surprise in prop::option::of(0.0f64..1.0),
    ) {
        let gate = RetentionGate::new(RetentionConfig::default(), &StrataConfig::default(), clock());
        let manager = manager();
        let scope = Scope::agent("prop");
        let mut low = manager.add_memory(&scope, Stratum::ShortTerm, MemoryDraft::new("same").with_importance(a.min(b)));
        let mut high = low.clone();
        high.importance = a.max(b);
        low.access_count = reads;
        high.access_count = reads;

        prop_assert!(
            gate.calculate_retention_score(&high, surprise)
                >= gate.calculate_retention_score(&low, surprise)
        );
    }
}

// ============================================================================
// SECTION 4: STRATUM MANAGER COUNTERS AND MOVES
// ============================================================================

#[derive(Debug, Clone)]
enum Read {
    Get,
    Peek,
    Query,
}

proptest! {
    /// Falsification: Can reads ever lower an access count, or peeks raise it?
    #[test]
    fn falsify_monotonic_access(
        reads in prop::collection::vec(
            prop_oneof![Just(Read::Get), Just(Read::Peek), Just(Read::Query)],
            0..30,
        ),
    ) {
        let manager = manager();
        let scope = Scope::agent("prop");
        let entry = manager.add_memory(&scope, Stratum::Working, MemoryDraft::new("invoice reconciliation notes"));
        let mut expected = 0u64;

        for read in reads {
            match read {
                Read::Get => {
                    manager.get_memory(&scope, &entry.id);
                    expected += 1;
                }
                Read::Peek => {
                    manager.peek_memory(&scope, &entry.id);
                }
                Read::Query => {
                    manager.query_memories(&scope, &MemoryQuery::new("invoice"));
                    expected += 1;
                }
            }
            let now = manager.peek_memory(&scope, &entry.id).unwrap();
            prop_assert_eq!(now.access_count, expected);
        }
    }

    /// Falsification: Can decay evict a Critical entry?
    #[test]
    fn falsify_decay_spares_critical(
        importances in prop::collection::vec(importance(), 1..30),
        rate in 0.0f64..=1.0,
        target in stratum(),
    ) {
        let manager = manager();
        let scope = Scope::agent("prop");
        for (i, importance) in importances.iter().enumerate() {
            manager.add_memory(&scope, target, MemoryDraft::new(format!("n{}", i)).with_importance(*importance));
        }
        let before = manager.entries(&scope, target);
        let critical = before.iter().filter(|e| e.importance == Importance::Critical).count();

        let removed = manager.apply_decay(&scope, target, rate);
        let after = manager.entries(&scope, target);
        prop_assert_eq!(before.len() - removed, after.len());
        prop_assert_eq!(
            after.iter().filter(|e| e.importance == Importance::Critical).count(),
            critical
        );
    }

    /// Falsification: Can a transition lose, duplicate or misplace an entry?
    #[test]
    fn falsify_transition_atomicity(
        home in stratum(),
        from in stratum(),
        to in stratum(),
    ) {
        let manager = manager();
        let scope = Scope::agent("prop");
        let entry = manager.add_memory(&scope, home, MemoryDraft::new("movable"));
        manager.add_memory(&scope, home, MemoryDraft::new("bystander"));

        let moved = manager.transition_memory(&scope, &entry.id, from, to, "prop");
        let stats = manager.get_statistics(&scope);
        prop_assert_eq!(stats.total_memories, 2);
        prop_assert_eq!(stats.by_stratum.values().sum::<usize>(), 2);

        let now = manager.peek_memory(&scope, &entry.id).unwrap();
        if moved {
            prop_assert_eq!(from, home);
            prop_assert_eq!(now.stratum, to);
            prop_assert_eq!(now.transitions.len(), 1);
        } else {
            prop_assert_ne!(from, home);
            prop_assert_eq!(now.stratum, home);
            prop_assert!(now.transitions.is_empty());
        }
    }
}

// ============================================================================
// SECTION 5: VERIFICATION AND REWARD BOUNDS
// ============================================================================

proptest! {
    /// Falsification: Can any trace or tool mix push confidence or reward
    /// outside [0, 1]?
    #[test]
    fn falsify_verification_bounds(
        trace in prop_oneof![long_text(), "[ a-z.]{0,80}"],
        tools in prop::collection::vec(("[a-z_]{1,12}", "[ a-z]{0,40}", any::<bool>()), 0..8),
    ) {
        let memory = ContinuumMemory::builder(ContinuumConfig::enabled())
            .with_clock(clock())
            .build()
            .unwrap();
        let scope = Scope::agent("prop");
        let tools: Vec<ToolResult> = tools
            .into_iter()
            .map(|(name, output, ok)| if ok { ToolResult::ok(name, output) } else { ToolResult::failed(name, output) })
            .collect();

        memory.begin_cycle(&scope);
        let orchestrator = memory.orchestrator();
        let verification = orchestrator.generate_verification(&scope, &trace, &tools).unwrap();
        prop_assert!((0.0..=1.0).contains(&verification.confidence));
        prop_assert!((-1.0..=1.0).contains(&verification.score));

        let reward = orchestrator.calculate_process_reward(&scope);
        prop_assert!((0.0..=1.0).contains(&reward.promotion_score));
        prop_assert!((0.0..=1.0).contains(&reward.tool_verification));
    }
}
