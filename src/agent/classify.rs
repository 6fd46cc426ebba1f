//! Step selection heuristics.
//!
//! Pure functions over the task text and the planning output; no model calls.

use std::collections::BTreeSet;

use super::plan::parse_plan;
use crate::store::StepType;

/// Phrases in a plan meaning the work is already done.
pub const COMPLETION_SIGNALS: &[&str] = &[
    "task has been completed",
    "task is now complete",
    "all files have been deleted",
    "file has been deleted",
    "files have been deleted",
    "successfully deleted",
    "deletion complete",
    "task completed",
];

const ANALYSIS_WORDS: &[&str] = &["analyze", "examine", "understand", "review"];
const GENERATION_WORDS: &[&str] = &["create", "implement", "write", "add", "generate"];
const EXECUTION_WORDS: &[&str] = &["run", "execute"];
const TESTING_WORDS: &[&str] = &["test", "verify"];
const REFINEMENT_WORDS: &[&str] = &["improve", "optimize", "refactor"];

const MULTI_STEP_PHRASES: &[&str] = &[
    "create and run",
    "write and execute",
    "implement and test",
    "build a",
    "develop a",
    "make a",
    "create a complete",
    "step by step",
    "sequence",
    "workflow",
    "pipeline",
    "multiple steps",
    "series of",
    "chain of",
    "first do",
    "then do",
    "after that",
    "finally",
    "multi-step",
    "multi step",
];

const IMPERATIVE_VERBS: &[&str] = &[
    "create", "make", "build", "write", "implement", "add", "update", "delete", "remove", "change",
    "modify", "run", "execute", "test", "check", "verify", "generate", "install", "configure",
    "set",
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn mentions_any(text: &str, vocabulary: &[&str]) -> bool {
    words(text).any(|w| vocabulary.contains(&w.as_str()))
}

/// Whether the plan reports the task as already done.
pub fn has_completion_signal(planning_output: &str) -> bool {
    let lower = planning_output.to_lowercase();
    COMPLETION_SIGNALS.iter().any(|s| lower.contains(s))
}

/// Steps to run for a task, in chain order. Planning and conclusion are
/// always present; at most one of `code_execution`/`testing` is chosen.
pub fn classify_needed_steps(task_description: &str, planning_output: &str) -> BTreeSet<StepType> {
    let mut steps = BTreeSet::from([StepType::Planning, StepType::Conclusion]);

    if mentions_any(task_description, ANALYSIS_WORDS) {
        steps.insert(StepType::Analysis);
    }

    if has_completion_signal(planning_output) {
        return steps;
    }

    if mentions_any(task_description, GENERATION_WORDS) {
        steps.insert(StepType::CodeGeneration);
    }

    let plan_runs_code = parse_plan(planning_output).is_some_and(|p| p.needs_tool("run_file"));
    if mentions_any(task_description, TESTING_WORDS) {
        steps.insert(StepType::Testing);
    } else if mentions_any(task_description, EXECUTION_WORDS) || plan_runs_code {
        steps.insert(StepType::CodeExecution);
    }

    let lower = task_description.to_lowercase();
    if mentions_any(task_description, REFINEMENT_WORDS) || lower.contains("clean up") {
        steps.insert(StepType::Refinement);
    }

    steps
}

/// Whether a chat message should go through the reasoning chain instead
/// of a single chat turn.
pub fn is_multi_step_task(message: &str) -> bool {
    let lower = message.to_lowercase();
    if MULTI_STEP_PHRASES.iter().any(|p| lower.contains(p)) {
        return true;
    }

    let imperative_sentences = lower
        .split(['.', '!', '?', '\n'])
        .filter(|sentence| {
            let mut ws = words(sentence);
            match ws.next() {
                Some(w) if w == "set" => ws.next().is_some_and(|next| next == "up"),
                Some(w) => IMPERATIVE_VERBS.contains(&w.as_str()),
                None => false,
            }
        })
        .count();
    imperative_sentences >= 2
}
