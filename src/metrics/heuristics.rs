//! Quality and complexity heuristics.
//!
//! Deliberately coarse proxies: length/latency banding plus structural
//! signals, not semantic evaluation. The bounded [1,10] ranges are the
//! contract; the exact band edges are replaceable policy. Nothing in the
//! orchestration logic reads these numbers.

/// Keywords that mark a prompt as architecturally or analytically demanding.
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "architecture",
    "optimize",
    "integration",
    "refactor",
    "scalab",
    "distributed",
    "concurren",
    "trade-off",
    "tradeoff",
    "security",
];

/// Per-model quality prior. Larger models get a small head start; the
/// response itself still dominates the score.
fn model_prior(model: &str) -> f64 {
    let lower = model.to_ascii_lowercase();
    if lower.contains("mini") || lower.contains("haiku") || lower.contains("flash") {
        -0.5
    } else if lower.contains("gpt-4") || lower.contains("sonnet") || lower.contains("opus") {
        0.5
    } else {
        0.0
    }
}

/// Heuristic quality score in [1, 10] for a successful response.
///
/// Bands on content length and response time, a small per-model prior,
/// and bonuses for structural signals (code fences, list markers).
pub fn quality_score(content: &str, execution_time_ms: u64, model: &str) -> f64 {
    let mut score: f64 = 5.0;

    // Length banding: very short answers are penalized, substantial ones
    // rewarded, rambling ones slightly discounted.
    let len = content.len();
    score += match len {
        0..=49 => -2.0,
        50..=199 => 0.0,
        200..=1999 => 1.5,
        2000..=7999 => 1.0,
        _ => 0.5,
    };

    // Latency banding: fast is good, glacial is suspicious.
    score += match execution_time_ms {
        0..=999 => 1.0,
        1000..=4999 => 0.5,
        5000..=14999 => 0.0,
        _ => -1.0,
    };

    score += model_prior(model);

    if content.contains("```") {
        score += 1.0;
    }
    if content.lines().any(|l| {
        let t = l.trim_start();
        t.starts_with("- ") || t.starts_with("* ") || t.starts_with("1.")
    }) {
        score += 0.5;
    }

    score.clamp(1.0, 10.0)
}

/// Heuristic task-complexity score in [1, 10] for the original prompt.
///
/// Prompt length bands, presence of domain keywords, and multi-part
/// question structure.
pub fn task_complexity(prompt: &str) -> f64 {
    let mut score: f64 = 1.0;

    score += match prompt.len() {
        0..=99 => 0.0,
        100..=399 => 1.5,
        400..=1499 => 3.0,
        _ => 4.0,
    };

    let lower = prompt.to_ascii_lowercase();
    let keyword_hits = COMPLEXITY_KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .count();
    score += (keyword_hits as f64).min(3.0);

    // Multi-part structure: several questions or enumerated items.
    let questions = prompt.matches('?').count();
    if questions >= 2 {
        score += 1.0;
    }
    if prompt.lines().filter(|l| !l.trim().is_empty()).count() >= 4 {
        score += 1.0;
    }

    score.clamp(1.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_stays_in_bounds() {
        assert!(quality_score("", 120_000, "tiny-mini") >= 1.0);
        let rich = format!("{}\n```rust\nfn main() {{}}\n```\n- point", "word ".repeat(100));
        assert!(quality_score(&rich, 300, "gpt-4o") <= 10.0);
    }

    #[test]
    fn code_fences_raise_quality() {
        let plain = "here is an answer of reasonable length ".repeat(10);
        let fenced = format!("{plain}\n```\ncode\n```");
        assert!(
            quality_score(&fenced, 500, "m") > quality_score(&plain, 500, "m"),
            "fenced answer should score higher"
        );
    }

    #[test]
    fn slow_responses_score_lower() {
        let content = "a substantive answer ".repeat(20);
        assert!(quality_score(&content, 400, "m") > quality_score(&content, 30_000, "m"));
    }

    #[test]
    fn small_models_carry_a_lower_prior() {
        let content = "a substantive answer ".repeat(20);
        assert!(quality_score(&content, 400, "gpt-4o") > quality_score(&content, 400, "gpt-4o-mini"));
    }

    #[test]
    fn complexity_grows_with_structure() {
        let trivial = task_complexity("hi");
        let hard = task_complexity(
            "How should we design the architecture for a distributed cache?\n\
             What are the trade-offs of write-through vs write-back?\n\
             How do we optimize the integration with the existing store?\n\
             What security concerns apply?",
        );
        assert!(hard > trivial);
        assert!((1.0..=10.0).contains(&trivial));
        assert!((1.0..=10.0).contains(&hard));
    }

    #[test]
    fn complexity_is_capped_at_ten() {
        let monster = format!(
            "architecture optimize integration refactor security {}",
            "why? how? what? ".repeat(200)
        );
        assert!(task_complexity(&monster) <= 10.0);
    }
}
