/// Verification of a reasoning trace against tool results.
///
/// Each sentence of the trace is a claim. A claim is **verified** when at
/// least half its keywords appear in successful tool evidence (outputs and
/// tool names), and **unverified** when it leans on evidence only failed
/// tools produced. `score = (verified - unverified) / claims`.
///
/// A tool is **inconsistent** with the trace when the trace mentions it and
/// reports the opposite outcome (claims success for a failed call, or failure
/// for a successful one).
///
/// ```text
/// confidence = 0.3
///            + 0.4 × success_rate × evidence      evidence = 1 - e^(-tools/3)
///            + 0.3 × agreement                    agreement = (score + 1) / 2
///            - 0.3 × inconsistency                share of inconsistent tools
/// ```
///
/// Without any tool results there is no evidence and confidence is the
/// configured base confidence.
use std::collections::HashSet;

use crate::config::InputLimits;
use crate::orchestrator::context::{ToolResult, ToolVerification, VerificationTuple};
use crate::text;

const FAILURE_WORDS: &[&str] = &[
    "couldn't", "error", "errored", "errors", "exception", "fail", "failed", "failing",
    "failure", "timed", "timeout", "unable", "unavailable",
];

pub(crate) fn verify(
    trace: &str,
    tool_results: &[ToolResult],
    limits: &InputLimits,
    base_confidence: f64,
) -> VerificationTuple {
    let claims: Vec<String> = text::sentences(trace)
        .into_iter()
        .take(limits.max_trace_sentences)
        .collect();
    let tools = &tool_results[..tool_results.len().min(limits.max_tool_results)];

    let mut supported: HashSet<String> = HashSet::new();
    let mut failed_only: HashSet<String> = HashSet::new();
    for tool in tools {
        let mut evidence = text::keywords(&text::truncate_chars(&tool.output, limits.max_content_chars));
        evidence.extend(name_words(&tool.tool_name));
        if tool.success {
            supported.extend(evidence);
        } else {
            failed_only.extend(evidence);
        }
    }
    failed_only.retain(|w| !supported.contains(w));

    let mut verified = 0usize;
    let mut unverified = 0usize;
    let mut counted = 0usize;
    for claim in &claims {
        let keywords = text::keywords(claim);
        if keywords.is_empty() {
            continue;
        }
        counted += 1;
        if text::coverage(&keywords, &supported) >= 0.5 {
            verified += 1;
        } else if text::coverage(&keywords, &failed_only) >= 0.5 {
            unverified += 1;
        }
    }
    let score = if counted == 0 {
        0.0
    } else {
        ((verified as f64 - unverified as f64) / counted as f64).clamp(-1.0, 1.0)
    };

    let tool_verifications: Vec<ToolVerification> = tools
        .iter()
        .map(|tool| check_tool(tool, &claims))
        .collect();

    let confidence = if tools.is_empty() {
        base_confidence.clamp(0.0, 1.0)
    } else {
        let n = tools.len() as f64;
        let success_rate = tools.iter().filter(|t| t.success).count() as f64 / n;
        let evidence = 1.0 - (-n / 3.0).exp();
        let agreement = (score + 1.0) / 2.0;
        let inconsistency = tool_verifications.iter().filter(|v| !v.consistent).count() as f64 / n;
        (0.3 + 0.4 * success_rate * evidence + 0.3 * agreement - 0.3 * inconsistency).clamp(0.0, 1.0)
    };

    let critique = critique(
        verified,
        unverified,
        counted,
        &tool_verifications,
        tool_results.len() > tools.len(),
    );

    VerificationTuple {
        score,
        confidence,
        critique,
        tool_verifications: if tool_verifications.is_empty() {
            None
        } else {
            Some(tool_verifications)
        },
    }
}

fn name_words(tool_name: &str) -> HashSet<String> {
    tool_name
        .split(|c: char| c == '_' || c == '-' || c == '.' || c.is_whitespace())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 1 && !text::is_stopword(w))
        .collect()
}

fn check_tool(tool: &ToolResult, claims: &[String]) -> ToolVerification {
    let name = name_words(&tool.tool_name);
    let output = text::keywords(&tool.output);

    let mentions: Vec<&String> = claims
        .iter()
        .filter(|claim| {
            let keywords = text::keywords(claim);
            keywords.iter().any(|k| name.contains(k))
                || (!output.is_empty() && text::coverage(&output, &keywords) >= 0.3)
        })
        .collect();

    let reports_failure = mentions.iter().any(|claim| {
        text::words(claim)
            .iter()
            .any(|w| FAILURE_WORDS.binary_search(&w.as_str()).is_ok())
    });

    ToolVerification {
        tool_name: tool.tool_name.clone(),
        success: tool.success,
        mentioned: !mentions.is_empty(),
        consistent: mentions.is_empty() || reports_failure != tool.success,
    }
}

fn critique(
    verified: usize,
    unverified: usize,
    claims: usize,
    tools: &[ToolVerification],
    truncated: bool,
) -> String {
    let mut parts = vec![format!(
        "{} of {} claims verified by tool evidence, {} rest on failed tools",
        verified, claims, unverified
    )];
    if tools.is_empty() {
        parts.push("no tool evidence supplied".to_string());
    } else {
        let ok = tools.iter().filter(|t| t.success).count();
        parts.push(format!("{} of {} tool calls succeeded", ok, tools.len()));
        let inconsistent: Vec<&str> = tools
            .iter()
            .filter(|t| !t.consistent)
            .map(|t| t.tool_name.as_str())
            .collect();
        if !inconsistent.is_empty() {
            parts.push(format!("trace contradicts: {}", inconsistent.join(", ")));
        }
    }
    if truncated {
        parts.push("extra tool results ignored".to_string());
    }
    parts.join("; ")
}
