//! `TaskAnalyzer` — deterministic classification of raw task text into a
//! complexity score, suggested model tier, and planning hint.
//!
//! A pure function over text plus optional context: fixed pattern tables,
//! no model call.

use crate::model::ModelTier;
use std::collections::HashSet;

/// Coarse time estimate surfaced alongside complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatedTime {
    Fast,
    Medium,
    Slow,
}

/// Coarse classification of what kind of work the task text is asking for.
/// A fixed set, same spirit as the pattern tables below: one needle list per
/// member, first match wins, `Edit` is the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskIntent {
    Edit,
    Refactor,
    Debug,
    Test,
    Explain,
    Plan,
}

#[derive(Debug, Clone)]
pub struct TaskAnalysis {
    pub intent: TaskIntent,
    pub complexity: u8,
    pub estimated_time: EstimatedTime,
    pub required_tools: HashSet<String>,
    pub suggested_tier: ModelTier,
    pub can_parallelize: bool,
    pub needs_planning: bool,
    pub confidence: f32,
}

struct WeightedPattern {
    needle: &'static str,
    weight: i32,
}

const COMPLEXITY_PATTERNS: &[WeightedPattern] = &[
    WeightedPattern { needle: "refactor", weight: 3 },
    WeightedPattern { needle: "migrate", weight: 3 },
    WeightedPattern { needle: "architecture", weight: 3 },
    WeightedPattern { needle: "across the codebase", weight: 2 },
    WeightedPattern { needle: "test", weight: 1 },
    WeightedPattern { needle: "bug", weight: 1 },
    WeightedPattern { needle: "rename", weight: 1 },
];

/// Small, local edits a fast-tier model handles well.
const FAST_TASK_PATTERNS: &[&str] = &["typo", "rename", "format", "lint", "add a comment", "bump version"];

/// Signals that this task is better served by first producing a plan.
const PLANNING_PATTERNS: &[&str] = &["and then", "multiple files", "across the codebase", "step by step", "design a"];

const PLANNING_VERBS: &[&str] = &["plan", "design", "architect"];

/// First matching needle wins; order matters (`"refactor"` must be checked
/// before the generic `"test"`/`"fix"` needles it could also contain).
const INTENT_PATTERNS: &[(&str, TaskIntent)] = &[
    ("refactor", TaskIntent::Refactor),
    ("migrate", TaskIntent::Refactor),
    ("design", TaskIntent::Plan),
    ("architect", TaskIntent::Plan),
    ("plan", TaskIntent::Plan),
    ("explain", TaskIntent::Explain),
    ("what does", TaskIntent::Explain),
    ("how does", TaskIntent::Explain),
    ("test", TaskIntent::Test),
    ("bug", TaskIntent::Debug),
    ("fix", TaskIntent::Debug),
    ("debug", TaskIntent::Debug),
];

/// Tool names a task's text implies are needed; `"editor"` is always
/// included since every task in scope here ends in a file edit.
const TOOL_PATTERNS: &[(&str, &str)] = &[
    ("test", "test_runner"),
    ("grep", "grep"),
    ("search", "grep"),
    ("across the codebase", "grep"),
    ("rename", "grep"),
    ("format", "formatter"),
    ("lint", "linter"),
];

fn classify_intent(lower: &str) -> TaskIntent {
    INTENT_PATTERNS
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, intent)| *intent)
        .unwrap_or(TaskIntent::Edit)
}

fn required_tools(lower: &str) -> HashSet<String> {
    let mut tools = HashSet::new();
    tools.insert("editor".to_string());
    for (needle, tool) in TOOL_PATTERNS {
        if lower.contains(needle) {
            tools.insert(tool.to_string());
        }
    }
    tools
}

/// Context accompanying raw task text; all fields optional and additive.
#[derive(Debug, Clone, Default)]
pub struct AnalysisContext {
    pub context_files: usize,
    pub has_constraints: bool,
}

pub struct TaskAnalyzer;

impl TaskAnalyzer {
    /// Classify `text`. Deterministic: same input always yields the same
    /// `TaskAnalysis`.
    pub fn analyze(text: &str, context: &AnalysisContext, default_tier: ModelTier) -> TaskAnalysis {
        let lower = text.to_lowercase();

        let mut complexity: i32 = 1;
        for pattern in COMPLEXITY_PATTERNS {
            if lower.contains(pattern.needle) {
                complexity += pattern.weight;
            }
        }
        complexity += (context.context_files as i32 - 3).clamp(0, 3);
        if context.has_constraints {
            complexity += 1;
        }
        if text.len() > 500 {
            complexity += 1;
        }
        if text.len() > 1000 {
            complexity += 1;
        }
        complexity = complexity.min(10);

        let is_fast_task = FAST_TASK_PATTERNS.iter().any(|p| lower.contains(p));
        let is_planning_task = PLANNING_PATTERNS.iter().any(|p| lower.contains(p));

        if is_fast_task && complexity < 5 {
            complexity = (complexity - 2).max(1);
        }
        if is_planning_task {
            complexity = complexity.max(8);
        }
        let complexity = complexity as u8;

        let suggested_tier = match complexity {
            0..=2 => ModelTier::Fast,
            3..=5 => {
                if is_fast_task {
                    ModelTier::Fast
                } else {
                    ModelTier::SmartMid
                }
            }
            6..=7 => ModelTier::SmartMid,
            _ => ModelTier::SmartHigh,
        };
        let suggested_tier = if suggested_tier == ModelTier::Auto { default_tier } else { suggested_tier };

        let contains_planning_verb = PLANNING_VERBS.iter().any(|v| lower.contains(v));
        let needs_planning = complexity >= 8 || is_planning_task || contains_planning_verb;

        let mut confidence: f32 = 0.5;
        if is_fast_task {
            confidence += 0.2;
        }
        if is_planning_task {
            confidence += 0.2;
        }
        if text.len() < 20 {
            confidence -= 0.2;
        }
        if text.len() > 2000 {
            confidence -= 0.1;
        }
        if (4..=6).contains(&complexity) {
            confidence -= 0.1;
        }
        let confidence = confidence.clamp(0.1, 1.0);

        let estimated_time = match complexity {
            0..=3 => EstimatedTime::Fast,
            4..=7 => EstimatedTime::Medium,
            _ => EstimatedTime::Slow,
        };

        TaskAnalysis {
            intent: classify_intent(&lower),
            complexity,
            estimated_time,
            required_tools: required_tools(&lower),
            suggested_tier,
            can_parallelize: !needs_planning || complexity < 10,
            needs_planning,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_input_is_low_complexity_fast_tier() {
        let analysis = TaskAnalyzer::analyze("fix a typo", &AnalysisContext::default(), ModelTier::Fast);
        assert!(analysis.complexity <= 2);
        assert_eq!(analysis.suggested_tier, ModelTier::Fast);
        assert!(!analysis.needs_planning);
    }

    #[test]
    fn refactor_across_codebase_triggers_planning_and_high_tier() {
        let analysis = TaskAnalyzer::analyze(
            "refactor the auth module across the codebase and then update the tests",
            &AnalysisContext::default(),
            ModelTier::Fast,
        );
        assert!(analysis.needs_planning);
        assert_eq!(analysis.suggested_tier, ModelTier::SmartHigh);
    }

    #[test]
    fn fast_task_pattern_pulls_complexity_down() {
        let with_typo = TaskAnalyzer::analyze("fix the typo in bug report", &AnalysisContext::default(), ModelTier::Fast);
        assert_eq!(with_typo.suggested_tier, ModelTier::Fast);
    }

    #[test]
    fn confidence_is_clamped() {
        let analysis = TaskAnalyzer::analyze("x", &AnalysisContext::default(), ModelTier::Fast);
        assert!(analysis.confidence >= 0.1 && analysis.confidence <= 1.0);
    }

    #[test]
    fn intent_and_required_tools_are_derived_from_the_text() {
        let refactor = TaskAnalyzer::analyze(
            "refactor the auth module across the codebase",
            &AnalysisContext::default(),
            ModelTier::Fast,
        );
        assert_eq!(refactor.intent, TaskIntent::Refactor);
        assert!(refactor.required_tools.contains("editor"));
        assert!(refactor.required_tools.contains("grep"));

        let typo = TaskAnalyzer::analyze("fix a typo", &AnalysisContext::default(), ModelTier::Fast);
        assert_eq!(typo.intent, TaskIntent::Debug);
    }

    #[test]
    fn context_files_add_bounded_complexity() {
        let few = TaskAnalyzer::analyze(
            "update config",
            &AnalysisContext { context_files: 1, has_constraints: false },
            ModelTier::Fast,
        );
        let many = TaskAnalyzer::analyze(
            "update config",
            &AnalysisContext { context_files: 20, has_constraints: false },
            ModelTier::Fast,
        );
        assert!(many.complexity >= few.complexity);
    }
}
