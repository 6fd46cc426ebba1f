//! System prompt templates and per-step user prompts for the reasoning chain.
//!
//! One system prompt per step type. Planning and conclusion prompts forbid
//! tool use; the rest list the tools the step is expected to call.

use crate::store::StepType;
use crate::tools::ToolDefinition;

pub const PLANNING_PROMPT: &str = "\
You are an expert software developer planning a coding task inside a project workspace.
Break the task down into clear, actionable steps.

Respond with a JSON object of this shape:
{
    \"introduction\": \"Brief introduction to the task\",
    \"steps\": [
        {
            \"title\": \"Step title\",
            \"description\": \"What this step involves\",
            \"files_involved\": [\"files to examine or modify\"],
            \"tools_needed\": [\"tools that might be needed\"]
        }
    ],
    \"conclusion\": \"Brief conclusion\"
}

Do not execute any tools and do not implement any code in this step. \
The plan is carried out in later steps.";

pub const ANALYSIS_PROMPT: &str = "\
You are an expert code analyst. Examine the relevant code and report on:
1. The overall structure and purpose
2. Key components and their relationships
3. Potential issues or areas for improvement
4. How the code relates to the user's request

Use the read_file and list_files tools to look at the code rather than guessing.";

pub const CODE_GENERATION_PROMPT: &str = "\
You are an expert software developer writing code for the plan you are given.
Write well-structured code that fits the existing project.

You must create files with the write_file tool; do not just describe the code. \
For changes to existing files, read the file first, then use generate_diff and apply_patch.";

pub const CODE_EXECUTION_PROMPT: &str = "\
You run code in the project's sandbox and interpret the results.
Execute the relevant files with the run_file tool; do not just describe how to run them. \
If execution fails, fix the code and run it again. \
Install missing Python packages with pip_install.";

pub const TESTING_PROMPT: &str = "\
You are an expert in software testing.
Design test cases for the code, write them with write_file, run them with run_file, \
and check that the code meets the requirements. \
Create and run the tests; do not just describe them.";

pub const REFINEMENT_PROMPT: &str = "\
You refine and optimize code produced in earlier steps.
Identify concrete improvements and implement them with the tools. \
Prefer generate_diff and apply_patch for small edits to existing files.";

pub const CONCLUSION_PROMPT: &str = "\
You summarize development work.

Respond with a JSON object of this shape:
{
    \"summary\": \"What was accomplished\",
    \"key_changes\": [{\"description\": \"...\", \"impact\": \"...\"}],
    \"files_modified\": [\"...\"],
    \"remaining_issues\": [\"...\"],
    \"future_work\": [\"...\"],
    \"conclusion\": \"Final thoughts\"
}

Do not execute any tools in this step.";

pub fn system_prompt(step_type: StepType) -> &'static str {
    match step_type {
        StepType::Planning => PLANNING_PROMPT,
        StepType::Analysis => ANALYSIS_PROMPT,
        StepType::CodeGeneration => CODE_GENERATION_PROMPT,
        StepType::CodeExecution => CODE_EXECUTION_PROMPT,
        StepType::Testing => TESTING_PROMPT,
        StepType::Refinement => REFINEMENT_PROMPT,
        StepType::Conclusion => CONCLUSION_PROMPT,
    }
}

/// System prompt with the available tools appended.
pub fn build_system_prompt(step_type: StepType, tools: &[ToolDefinition]) -> String {
    let mut prompt = system_prompt(step_type).to_string();

    if step_type.uses_tools() && !tools.is_empty() {
        prompt.push_str("\n\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!("- **{}**: {}\n", tool.name, tool.description));
        }
    }

    prompt
}

/// Task context accumulated as the chain progresses.
#[derive(Debug, Clone, Default)]
pub struct StepContext<'a> {
    pub task: &'a str,
    pub current_file: Option<&'a str>,
    pub current_file_content: Option<&'a str>,
    pub plan: Option<&'a str>,
    pub analysis: Option<&'a str>,
    pub implementation: Option<&'a str>,
    pub execution: Option<&'a str>,
}

/// User prompt for a step.
pub fn step_prompt(step_type: StepType, ctx: &StepContext<'_>) -> String {
    let mut prompt = format!("Task: {}\n", ctx.task);
    let mut section = |label: &str, value: Option<&str>| {
        if let Some(v) = value {
            prompt.push_str(&format!("\n{label}: {v}\n"));
        }
    };
    let file_content = ctx
        .current_file_content
        .map(|content| format!("```\n{content}\n```"));

    let instruction = match step_type {
        StepType::Planning => {
            section("The user is currently working on", ctx.current_file);
            "Create a detailed plan to accomplish this task. For each step give its goal, \
             the files to examine or modify, and the tools it may need."
        }
        StepType::Analysis => {
            section("Plan", ctx.plan);
            section("Current file", ctx.current_file);
            section("File content", file_content.as_deref());
            "Analyze the relevant code in relation to the task."
        }
        StepType::CodeGeneration => {
            section("Plan", ctx.plan);
            section("Analysis", ctx.analysis);
            "Implement the code needed for this task using the write_file tool. \
             Check each tool result to confirm the file was written."
        }
        StepType::CodeExecution => {
            section("Plan", ctx.plan);
            section("Code implementation", ctx.implementation);
            "Run the code with the run_file tool and analyze the output. \
             If there are errors, fix the code and run it again."
        }
        StepType::Testing => {
            section("Plan", ctx.plan);
            section("Code implementation", ctx.implementation);
            "Test the implementation and verify it works correctly. Use the run_file tool."
        }
        StepType::Refinement => {
            section("Plan", ctx.plan);
            section("Code implementation", ctx.implementation);
            section("Execution results", ctx.execution);
            "Refine and optimize the implementation. Make any necessary improvements."
        }
        StepType::Conclusion => {
            section("Plan", ctx.plan);
            section("Implementation", ctx.implementation);
            section("Execution results", ctx.execution);
            "Summarize what was accomplished: files created or modified, what the code does, \
             results of running it, and any remaining issues."
        }
    };

    prompt.push('\n');
    prompt.push_str(instruction);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::request::FileArgs;

    #[test]
    fn planning_and_conclusion_forbid_tools() {
        assert!(PLANNING_PROMPT.contains("Do not execute any tools"));
        assert!(CONCLUSION_PROMPT.contains("Do not execute any tools"));
    }

    #[test]
    fn build_system_prompt_lists_tools_for_tool_steps() {
        let tools = vec![ToolDefinition::derive::<FileArgs>("read_file", "Read a file")];
        let prompt = build_system_prompt(StepType::Analysis, &tools);
        assert!(prompt.contains("Available tools"));
        assert!(prompt.contains("**read_file**"));

        let planning = build_system_prompt(StepType::Planning, &tools);
        assert!(!planning.contains("Available tools"));
    }

    #[test]
    fn step_prompt_includes_known_context() {
        let ctx = StepContext {
            task: "write hello.py",
            plan: Some("1. write it"),
            ..Default::default()
        };
        let prompt = step_prompt(StepType::CodeGeneration, &ctx);
        assert!(prompt.starts_with("Task: write hello.py"));
        assert!(prompt.contains("Plan: 1. write it"));
        assert!(!prompt.contains("Analysis:"));
        assert!(prompt.contains("write_file"));
    }

    #[test]
    fn planning_prompt_mentions_current_file() {
        let ctx = StepContext {
            task: "t",
            current_file: Some("main.py"),
            ..Default::default()
        };
        let prompt = step_prompt(StepType::Planning, &ctx);
        assert!(prompt.contains("currently working on: main.py"));
    }
}
