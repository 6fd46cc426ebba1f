//! Plan parsing for the planning step's output.
//!
//! The planning prompt asks for a JSON plan. Models often wrap it in a
//! fenced block or ignore the format altogether, so parsing tries, in order:
//! the whole text as JSON, the first fenced block, the outermost `{...}`
//! span, and finally a numbered markdown list.

use serde::{Deserialize, Serialize};

/// One step of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanStep {
    pub title: String,
    pub description: String,
    pub files_involved: Vec<String>,
    pub tools_needed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plan {
    pub introduction: String,
    pub steps: Vec<PlanStep>,
    pub conclusion: String,
}

impl Plan {
    /// Whether any step names `tool` among the tools it needs.
    pub fn needs_tool(&self, tool: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.tools_needed.iter().any(|t| t.trim() == tool))
    }
}

/// Parse planning output. Returns `None` when nothing plan-shaped is found.
pub fn parse_plan(text: &str) -> Option<Plan> {
    json_candidates(text)
        .into_iter()
        .find_map(|candidate| serde_json::from_str::<Plan>(candidate).ok())
        .filter(|plan| !plan.steps.is_empty() || !plan.introduction.is_empty())
        .or_else(|| parse_numbered_list(text))
}

fn json_candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text.trim()];
    if let Some(block) = fenced_block(text) {
        out.push(block);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push(&text[start..=end]);
        }
    }
    out
}

/// Body of the first ``` fenced block (language tag skipped).
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// Numbered-list fallback:
///
/// ```text
/// 1. **Title**: Create the script
///    **Description**: ...
///    **Files**: hello.py
///    **Tools**: write_file, run_file
/// ```
fn parse_numbered_list(text: &str) -> Option<Plan> {
    let mut steps = Vec::new();
    let mut current: Option<PlanStep> = None;
    let mut introduction = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(title) = try_parse_step_start(trimmed) {
            if let Some(step) = current.take() {
                steps.push(step);
            }
            current = Some(PlanStep {
                title,
                ..PlanStep::default()
            });
            continue;
        }

        match current.as_mut() {
            Some(step) => {
                if let Some(value) = try_extract_field(trimmed, &["Description", "Goal"]) {
                    step.description = value;
                } else if let Some(value) = try_extract_field(trimmed, &["Files"]) {
                    step.files_involved = split_list(&value);
                } else if let Some(value) = try_extract_field(trimmed, &["Tools"]) {
                    step.tools_needed = split_list(&value);
                }
            }
            None if !trimmed.is_empty() => introduction.push(trimmed),
            None => {}
        }
    }

    if let Some(step) = current {
        steps.push(step);
    }
    if steps.is_empty() {
        return None;
    }
    Some(Plan {
        introduction: introduction.join(" "),
        steps,
        conclusion: String::new(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_matches('`').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// "1. Title" or "1. **Title**: ..."
fn try_parse_step_start(line: &str) -> Option<String> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let after_dot = line[digits..].strip_prefix(". ")?;

    let title = after_dot
        .trim_start_matches("**")
        .trim_start_matches("Title")
        .trim_start_matches("**")
        .trim_start_matches(':')
        .trim_start_matches("**")
        .trim();

    if title.is_empty() {
        Some(after_dot.trim().to_string())
    } else {
        Some(title.to_string())
    }
}

/// "**Field**: value", "**Field:** value" or "- Field: value".
fn try_extract_field(line: &str, fields: &[&str]) -> Option<String> {
    for field in fields {
        let bold = format!("**{field}**:");
        if let Some(idx) = line.find(&bold) {
            return Some(line[idx + bold.len()..].trim().to_string());
        }
        let bold_colon = format!("**{field}:");
        if let Some(idx) = line.find(&bold_colon) {
            let rest = &line[idx + bold_colon.len()..];
            return Some(rest.trim_start_matches("**").trim().to_string());
        }
        let bullet = format!("- {field}:");
        if let Some(idx) = line.find(&bullet) {
            return Some(line[idx + bullet.len()..].trim().to_string());
        }
    }
    None
}
