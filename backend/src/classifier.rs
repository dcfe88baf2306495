//! Keyword-scoring problem classifier.
//!
//! Maps a free-text problem statement to complexity, bug type and priority by
//! counting substring matches against fixed keyword bags. Pure and
//! deterministic; identical input always yields identical output. The
//! confidence value is a heuristic score in the 30-95 range, not a calibrated
//! probability.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, utoipa::ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[strum(serialize = "simple")]
    Simple,
    #[strum(serialize = "medium")]
    Medium,
    #[strum(serialize = "complex")]
    Complex,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, utoipa::ToSchema,
)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub complexity: Complexity,
    pub bug_type: &'static str,
    pub priority: Priority,
    pub confidence: i32,
    pub reasoning: String,
}

const SIMPLE_KEYWORDS: &[&str] = &[
    "typo",
    "rename",
    "readme",
    "spelling",
    "whitespace",
    "formatting",
    "log message",
    "comment",
    "broken link",
    "wording",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "refactor",
    "validation",
    "error handling",
    "null check",
    "edge case",
    "endpoint",
    "pagination",
    "logging",
    "cleanup",
    "retry",
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "migration",
    "database schema",
    "schema migration",
    "race condition",
    "concurrency",
    "deadlock",
    "architecture",
    "redesign",
    "distributed",
    "memory leak",
    "authentication",
    "scalability",
];

/// Twelve bug-type categories in a fixed array. The highest raw match count
/// wins and earlier entries win ties, so iteration order is the tie-break.
/// The final entry is the catch-all for statements that match nothing.
const BUG_TYPES: &[(&str, &[&str])] = &[
    (
        "null_pointer",
        &[
            "null pointer",
            "nullpointerexception",
            "npe",
            "null reference",
            "nonetype",
            "undefined is not",
        ],
    ),
    (
        "memory_leak",
        &["memory leak", "out of memory", "oom", "heap usage", "leaking"],
    ),
    (
        "race_condition",
        &["race condition", "deadlock", "thread safety", "data race", "concurrent"],
    ),
    (
        "performance",
        &["slow", "performance", "latency", "takes too long", "high cpu", "timeout"],
    ),
    (
        "security",
        &["security", "vulnerability", "xss", "sql injection", "csrf", "exploit", "cve-"],
    ),
    (
        "api_integration",
        &["api", "endpoint", "http", "webhook", "integration", "third-party", "rate limit"],
    ),
    (
        "database",
        &["database", "query", "sql", "migration", "schema", "transaction", "index"],
    ),
    (
        "ui",
        &["button", "layout", "css", "render", "display", "frontend", "styling", "screen"],
    ),
    (
        "logic",
        &["logic", "incorrect result", "wrong value", "off by one", "calculation", "miscount"],
    ),
    (
        "configuration",
        &["config", "environment variable", "env var", "setting", "deployment", "yaml", "toml"],
    ),
    (
        "dependency",
        &["dependency", "upgrade", "version bump", "package", "library", "crate"],
    ),
    ("general", &[]),
];

const P0_KEYWORDS: &[&str] = &[
    "production down",
    "outage",
    "data loss",
    "critical",
    "emergency",
    "severe",
    "everyone is blocked",
];

const P1_KEYWORDS: &[&str] = &[
    "urgent",
    "blocking",
    "blocked",
    "major",
    "regression",
    "asap",
    "cannot log in",
];

const P2_KEYWORDS: &[&str] = &[
    "bug", "error", "broken", "fails", "incorrect", "issue", "should",
];

const P3_KEYWORDS: &[&str] = &[
    "nice to have",
    "minor",
    "cosmetic",
    "typo",
    "polish",
    "someday",
    "low priority",
];

/// Inputs of at most this many words with zero complex-keyword hits are
/// forced to `simple`.
const SHORT_INPUT_WORDS: usize = 10;

fn score(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn classify_complexity(lower: &str, word_count: usize) -> (Complexity, usize) {
    let simple = score(lower, SIMPLE_KEYWORDS);
    let medium = score(lower, MEDIUM_KEYWORDS);
    let complex = score(lower, COMPLEX_KEYWORDS);
    let total = simple + medium + complex;

    // Empty and whitespace-only input defaults to medium, not simple.
    if word_count == 0 {
        return (Complexity::Medium, total);
    }

    if word_count <= SHORT_INPUT_WORDS && complex == 0 {
        return (Complexity::Simple, total);
    }

    // Ties and the all-zero case default to medium.
    let complexity = if complex > simple && complex > medium {
        Complexity::Complex
    } else if simple > medium && simple > complex {
        Complexity::Simple
    } else {
        Complexity::Medium
    };
    (complexity, total)
}

fn classify_bug_type(lower: &str) -> (&'static str, usize) {
    let mut best = "general";
    let mut best_score = 0;
    for (name, keywords) in BUG_TYPES {
        let s = score(lower, keywords);
        if s > best_score {
            best = name;
            best_score = s;
        }
    }
    (best, best_score)
}

fn classify_priority(text: &str, lower: &str) -> (Priority, usize) {
    let p0 = score(lower, P0_KEYWORDS);
    let p1 = score(lower, P1_KEYWORDS);
    let p2 = score(lower, P2_KEYWORDS);
    let p3 = score(lower, P3_KEYWORDS);
    let total = p0 + p1 + p2 + p3;

    let exclamations = text.matches('!').count();
    let mentions_users = lower.contains("users") || lower.contains("customers");

    let priority = if exclamations >= 2 && lower.contains("production") {
        Priority::P0
    } else if p0 > 0 {
        Priority::P0
    } else if p1 > 0 {
        Priority::P1
    } else if mentions_users && p2 == 0 {
        Priority::P1
    } else if p3 > p2 {
        Priority::P3
    } else {
        Priority::P2
    };
    (priority, total)
}

fn confidence(word_count: usize, complexity_hits: usize, bug_type_hits: usize, priority_hits: usize) -> i32 {
    let mut confidence = 40;
    if complexity_hits > 0 {
        confidence += 10;
    }
    if bug_type_hits > 0 {
        confidence += 10;
    }
    if priority_hits > 0 {
        confidence += 10;
    }
    if word_count >= 8 {
        confidence += 5;
    }
    if word_count >= 25 {
        confidence += 10;
    }
    confidence.clamp(30, 95)
}

pub fn classify(text: &str) -> Classification {
    let lower = text.to_lowercase();
    let word_count = lower.split_whitespace().count();

    let (complexity, complexity_hits) = classify_complexity(&lower, word_count);
    let (bug_type, bug_type_hits) = classify_bug_type(&lower);
    let (priority, priority_hits) = classify_priority(text, &lower);

    let reasoning = format!(
        "{complexity_hits} complexity, {bug_type_hits} bug-type and {priority_hits} priority keyword matches over {word_count} words"
    );

    Classification {
        complexity,
        bug_type,
        priority,
        confidence: confidence(word_count, complexity_hits, bug_type_hits, priority_hits),
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let text = "Users report the dashboard fails with a null pointer after the last deploy";
        let a = classify(text);
        let b = classify(text);
        assert_eq!(a.complexity, b.complexity);
        assert_eq!(a.bug_type, b.bug_type);
        assert_eq!(a.priority, b.priority);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.reasoning, b.reasoning);
    }

    #[test]
    fn test_short_input_without_complex_hits_is_simple() {
        assert_eq!(classify("Fix typo in README").complexity, Complexity::Simple);
    }

    #[test]
    fn test_schema_migration_is_complex() {
        let c = classify(
            "The database schema migration for the orders table corrupts foreign keys \
             and needs a redesign of the rollout",
        );
        assert_eq!(c.complexity, Complexity::Complex);
    }

    #[test]
    fn test_empty_signal_defaults_to_medium() {
        // Long enough to dodge the short-input rule, no keyword hits anywhere.
        let c = classify(
            "the quarterly summary page shows numbers that differ from what finance \
             expects when the fiscal period spans two calendar years",
        );
        assert_eq!(c.complexity, Complexity::Medium);
    }

    #[test]
    fn test_production_down_is_p0() {
        assert_eq!(classify("production down since the morning deploy").priority, Priority::P0);
    }

    #[test]
    fn test_exclamations_with_production_force_p0() {
        let c = classify("production checkout is acting up!! please look!!");
        assert_eq!(c.priority, Priority::P0);
    }

    #[test]
    fn test_nice_to_have_beats_p2_only_on_strict_score() {
        // p3 hits ("nice to have") > p2 hits (zero).
        assert_eq!(classify("nice to have: darker sidebar").priority, Priority::P3);
        // A p2 keyword pulls it back to the default.
        assert_eq!(
            classify("nice to have, but the export is broken").priority,
            Priority::P2
        );
    }

    #[test]
    fn test_users_without_p2_keywords_push_p1() {
        let c = classify("customers keep asking why uploads stall midway");
        assert_eq!(c.priority, Priority::P1);
    }

    #[test]
    fn test_null_pointer_bug_type() {
        let c = classify("Fix null pointer in UserService");
        assert_eq!(c.bug_type, "null_pointer");
    }

    #[test]
    fn test_no_signal_maps_to_general() {
        assert_eq!(classify("things feel off lately").bug_type, "general");
    }

    #[test]
    fn test_confidence_stays_in_range() {
        for text in [
            "",
            "x",
            "Fix typo in README",
            "production down!! everything critical is failing for customers, urgent outage, \
             data loss in the orders database, null pointer everywhere, security vulnerability",
        ] {
            let c = classify(text);
            assert!((30..=95).contains(&c.confidence), "confidence {} for {text:?}", c.confidence);
        }
    }

    #[test]
    fn test_empty_input_defaults_to_medium() {
        assert_eq!(classify("").complexity, Complexity::Medium);
        assert_eq!(classify("   \n\t").complexity, Complexity::Medium);
    }
}
