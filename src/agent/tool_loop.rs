//! Tool-call loop for one direct-API step.
//!
//! The first model response may request tools. Each batch runs in the order
//! the model returned it, the results go back to the model, and the model
//! gets up to `max_follow_up_rounds` follow-up turns. The loop ends in one
//! of three explicit [`LoopState`]s.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ChainConfig;
use crate::llm::{CompletionModel, CompletionRequest, LlmError, ToolCall, ToolOutcome, Turn};
use crate::notify::{publish_best_effort, Notifier, ProgressEvent};
use crate::store::RecordedToolCall;
use crate::tools::{Dispatcher, ToolArguments, ToolResult};

/// How the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// A response came back with no tool calls.
    Converged { rounds: usize },
    /// The follow-up bound was reached while the model still wanted tools.
    Truncated { rounds: usize },
    /// A follow-up request failed; the transcript so far is kept.
    FollowUpFailed { round: usize, error: String },
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Model text interleaved with tool results.
    pub response: String,
    pub tool_calls: Vec<RecordedToolCall>,
    pub state: LoopState,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopLimits {
    pub max_follow_up_rounds: usize,
    pub preview_chars: usize,
}

impl From<&ChainConfig> for LoopLimits {
    fn from(config: &ChainConfig) -> Self {
        Self {
            max_follow_up_rounds: config.max_follow_up_rounds,
            preview_chars: config.tool_result_preview_chars,
        }
    }
}

pub struct LoopContext<'a> {
    pub model: &'a dyn CompletionModel,
    pub dispatcher: &'a Dispatcher,
    pub notifier: &'a dyn Notifier,
    /// Notification group for `tool_executed` events.
    pub group: &'a str,
    pub limits: LoopLimits,
}

/// Run a step's model call and its tool calls to completion.
///
/// Only the initial request can fail the step. A failed follow-up is
/// recorded in the response and ends the loop.
pub async fn run_tool_loop(
    ctx: &LoopContext<'_>,
    request: CompletionRequest,
) -> Result<LoopOutcome, LlmError> {
    let first = ctx.model.complete(request.clone()).await?;

    let mut response = first.content.clone();
    let mut recorded = Vec::new();
    if first.tool_calls.is_empty() {
        return Ok(LoopOutcome {
            response,
            tool_calls: recorded,
            state: LoopState::Converged { rounds: 0 },
        });
    }

    let max = ctx.limits.max_follow_up_rounds;
    let mut history = request.history.clone();
    let mut pending = first;
    let mut round = 0;

    let state = loop {
        info!(round, calls = pending.tool_calls.len(), "executing tool calls");
        let outcomes = execute_batch(
            ctx,
            &pending.tool_calls,
            round,
            &mut response,
            &mut recorded,
        )
        .await;
        history.push(Turn::Assistant {
            text: pending.content,
            tool_calls: pending.tool_calls,
        });
        history.push(Turn::ToolResults(outcomes));

        if round >= max {
            warn!(max, "reached maximum number of follow-up rounds");
            response.push_str(&format!(
                "\n\nNote: Reached maximum number of follow-up rounds ({max}). \
                 Some actions may not have been completed."
            ));
            break LoopState::Truncated { rounds: round };
        }

        round += 1;
        let follow_up = CompletionRequest {
            history: history.clone(),
            ..request.clone()
        };
        match ctx.model.complete(follow_up).await {
            Err(e) => {
                warn!(round, error = %e, "follow-up request failed");
                response.push_str(&format!("\n\nError in follow-up request: {e}"));
                break LoopState::FollowUpFailed {
                    round,
                    error: e.to_string(),
                };
            }
            Ok(next) => {
                if !next.content.is_empty() {
                    response.push_str(&format!(
                        "\n\n# Follow-up Analysis (Round {round}):\n{}",
                        next.content
                    ));
                }
                if next.tool_calls.is_empty() {
                    debug!(round, "no more tool calls");
                    break LoopState::Converged { rounds: round };
                }
                pending = next;
            }
        }
    };

    Ok(LoopOutcome {
        response,
        tool_calls: recorded,
        state,
    })
}

async fn execute_batch(
    ctx: &LoopContext<'_>,
    calls: &[ToolCall],
    round: usize,
    response: &mut String,
    recorded: &mut Vec<RecordedToolCall>,
) -> Vec<ToolOutcome> {
    let mut outcomes = Vec::with_capacity(calls.len());
    for call in calls {
        let result = ctx.dispatcher.execute(&call.name, arguments(&call.arguments)).await;

        publish_best_effort(
            ctx.notifier,
            ctx.group,
            ProgressEvent::ToolExecuted {
                tool_name: call.name.clone(),
                result: result.clone(),
            },
        )
        .await;

        response.push_str(&transcript_entry(&call.name, &result, round));
        outcomes.push(ToolOutcome {
            call_id: call.id.clone(),
            content: preview(&result, ctx.limits.preview_chars),
            is_error: !result.is_success(),
        });
        recorded.push(RecordedToolCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: serde_json::to_value(&result).unwrap_or(Value::Null),
        });
    }
    outcomes
}

fn arguments(value: &Value) -> ToolArguments {
    match value {
        Value::String(s) => ToolArguments::Serialized(s.clone()),
        other => ToolArguments::Structured(other.clone()),
    }
}

/// Human-readable record of one tool result, appended to the step response.
pub fn transcript_entry(tool_name: &str, result: &ToolResult, round: usize) -> String {
    let status = if result.is_success() { "SUCCESS" } else { "ERROR" };
    let mut out = if round == 0 {
        format!("\n\n# Tool Result: {status}\n")
    } else {
        format!("\n\n# Tool Result (Round {round}): {status}\n")
    };
    out.push_str(&format!("# Tool: {tool_name}\n\n{}\n", result.message));

    if let Some(path) = &result.file_path {
        out.push_str(&format!("\nFile: {path}"));
    }
    if let Some(stdout) = &result.stdout {
        out.push_str(&format!("\n\nOutput:\n{stdout}"));
    }
    if let Some(stderr) = result.stderr.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("\n\nErrors:\n{stderr}"));
    }
    out
}

/// JSON form of a result for the model, cut to `limit` chars.
fn preview(result: &ToolResult, limit: usize) -> String {
    let json = serde_json::to_string(result).unwrap_or_else(|_| result.message.clone());
    if json.chars().count() <= limit {
        return json;
    }
    let mut cut: String = json.chars().take(limit).collect();
    cut.push_str("... (truncated)");
    cut
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::agent::testing::{call, text, RecordingNotifier, ScriptedModel};
    use crate::error::ErrorKind;
    use crate::llm::ToolChoice;
    use crate::tools::request::FileArgs;
    use crate::tools::{ToolEntry, ToolHandler, ToolRegistry, ToolRequest};

    struct Reader;

    #[async_trait::async_trait]
    impl ToolHandler for Reader {
        async fn handle(&self, request: ToolRequest) -> ToolResult {
            match request {
                ToolRequest::ReadFile(args) if args.file_path == "big.txt" => {
                    let mut r = ToolResult::success("File read successfully.");
                    r.content = Some("x".repeat(5000));
                    r.with_file_path(args.file_path)
                }
                ToolRequest::ReadFile(args) => ToolResult::failure(
                    ErrorKind::NotFound,
                    format!("File {} not found.", args.file_path),
                )
                .with_file_path(args.file_path),
                _ => ToolResult::failure(ErrorKind::UnknownTool, "unexpected"),
            }
        }
    }

    fn dispatcher() -> Dispatcher {
        let registry = ToolRegistry::from_entries(vec![ToolEntry::new::<FileArgs>(
            "read_file",
            "Read a file",
            Arc::new(Reader),
        )])
        .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "sonnet".into(),
            system: "sys".into(),
            history: vec![Turn::User("go".into())],
            tools: vec![],
            tool_choice: ToolChoice::Auto,
            max_tokens: 100,
            temperature: 0.2,
        }
    }

    async fn run(model: &ScriptedModel, notifier: &RecordingNotifier, max: usize) -> LoopOutcome {
        let dispatcher = dispatcher();
        let ctx = LoopContext {
            model,
            dispatcher: &dispatcher,
            notifier,
            group: "tools_p",
            limits: LoopLimits {
                max_follow_up_rounds: max,
                preview_chars: 1000,
            },
        };
        run_tool_loop(&ctx, request()).await.unwrap()
    }

    #[tokio::test]
    async fn no_tool_calls_converges_immediately() {
        let model = ScriptedModel::new(vec![Ok(text("all done"))]);
        let outcome = run(&model, &RecordingNotifier::new(), 5).await;
        assert_eq!(outcome.state, LoopState::Converged { rounds: 0 });
        assert_eq!(outcome.response, "all done");
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn tool_results_feed_the_follow_up() {
        let model = ScriptedModel::new(vec![
            Ok(call("Reading.", &[("read_file", json!({"file_path": "big.txt"}))])),
            Ok(text("Looks fine.")),
        ]);
        let notifier = RecordingNotifier::new();
        let outcome = run(&model, &notifier, 5).await;

        assert_eq!(outcome.state, LoopState::Converged { rounds: 1 });
        assert!(outcome.response.starts_with("Reading."));
        assert!(outcome.response.contains("# Tool Result: SUCCESS\n# Tool: read_file"));
        assert!(outcome.response.contains("File: big.txt"));
        assert!(outcome
            .response
            .ends_with("# Follow-up Analysis (Round 1):\nLooks fine."));
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].result["status"], "success");

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        let history = &requests[1].history;
        assert_eq!(history.len(), 3);
        match &history[2] {
            Turn::ToolResults(outcomes) => {
                assert!(outcomes[0].content.ends_with("... (truncated)"));
                assert_eq!(outcomes[0].content.chars().count(), 1000 + "... (truncated)".len());
            }
            other => panic!("expected tool results, got {other:?}"),
        }

        let events = notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "tools_p");
        assert!(matches!(
            &events[0].1,
            ProgressEvent::ToolExecuted { tool_name, .. } if tool_name == "read_file"
        ));
    }

    #[tokio::test]
    async fn batch_runs_in_model_order() {
        let model = ScriptedModel::new(vec![
            Ok(call(
                "",
                &[
                    ("read_file", json!({"file_path": "a.py"})),
                    ("read_file", json!({"file_path": "b.py"})),
                ],
            )),
            Ok(text("")),
        ]);
        let outcome = run(&model, &RecordingNotifier::new(), 5).await;
        let order: Vec<_> = outcome
            .tool_calls
            .iter()
            .map(|c| c.arguments["file_path"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["a.py", "b.py"]);
        assert!(outcome.response.contains("# Tool Result: ERROR"));
    }

    #[tokio::test]
    async fn endless_tool_calls_are_bounded() {
        let model =
            ScriptedModel::always(call("again", &[("read_file", json!({"file_path": "a"}))]));
        let outcome = run(&model, &RecordingNotifier::new(), 5).await;

        assert_eq!(outcome.state, LoopState::Truncated { rounds: 5 });
        // initial request plus five follow-ups
        assert_eq!(model.requests().len(), 6);
        assert_eq!(outcome.tool_calls.len(), 6);
        assert!(outcome.response.ends_with(
            "Note: Reached maximum number of follow-up rounds (5). \
             Some actions may not have been completed."
        ));
    }

    #[tokio::test]
    async fn failed_follow_up_keeps_transcript() {
        let model = ScriptedModel::new(vec![
            Ok(call("", &[("read_file", json!({"file_path": "a"}))])),
            Err(LlmError::Timeout(120)),
        ]);
        let outcome = run(&model, &RecordingNotifier::new(), 5).await;
        assert!(matches!(outcome.state, LoopState::FollowUpFailed { round: 1, .. }));
        assert!(outcome.response.contains("# Tool: read_file"));
        assert!(outcome
            .response
            .ends_with("Error in follow-up request: model request timed out after 120s"));
    }

    #[tokio::test]
    async fn failed_first_request_is_an_error() {
        let model = ScriptedModel::new(vec![Err(LlmError::MissingApiKey("unset".into()))]);
        let dispatcher = dispatcher();
        let notifier = RecordingNotifier::new();
        let ctx = LoopContext {
            model: &*model,
            dispatcher: &dispatcher,
            notifier: &*notifier,
            group: "tools_p",
            limits: LoopLimits {
                max_follow_up_rounds: 5,
                preview_chars: 1000,
            },
        };
        assert!(run_tool_loop(&ctx, request()).await.is_err());
    }

    #[test]
    fn transcript_entry_format() {
        let mut result =
            ToolResult::success("File x.py executed successfully.").with_file_path("x.py");
        result.stdout = Some("hi\n".into());
        result.stderr = Some(String::new());
        assert_eq!(
            transcript_entry("run_file", &result, 0),
            "\n\n# Tool Result: SUCCESS\n# Tool: run_file\n\n\
             File x.py executed successfully.\n\nFile: x.py\n\nOutput:\nhi\n"
        );
        let failed = ToolResult::failure(ErrorKind::ExecutionFailed, "boom");
        assert!(transcript_entry("run_file", &failed, 2)
            .starts_with("\n\n# Tool Result (Round 2): ERROR\n"));
    }

    #[test]
    fn serialized_arguments_pass_through() {
        assert_eq!(
            arguments(&Value::String("{\"file_path\":\"a\"}".into())),
            ToolArguments::Serialized("{\"file_path\":\"a\"}".into())
        );
    }
}
