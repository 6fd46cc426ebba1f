//! Diff/Patch engine: unified diffs against workspace files.
//!
//! `generate_diff` renders with `similar` (3 lines of context). `apply_patch`
//! parses unified hunks, verifies every context/removal line against the
//! file at the hunk's offset, then splices hunks back-to-front so earlier
//! offsets stay valid while later ones shift.

pub mod hunk;

use serde::{Deserialize, Serialize};
use similar::TextDiff;
use tracing::{info, warn};

use crate::error::ErrorKind;
use crate::workspace::{Workspace, WorkspaceError};

pub use hunk::{parse_patch, Hunk, HunkLine};

/// Lines of context around each change.
pub const CONTEXT_LINES: usize = 3;

/// Errors from patch application.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Malformed(String),

    #[error("patch does not apply to {path}: {}", describe_rejections(.rejected))]
    Mismatch {
        path: String,
        rejected: Vec<HunkRejection>,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl PatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::Malformed(_) => ErrorKind::InvalidArguments,
            PatchError::Mismatch { .. } => ErrorKind::PatchMismatch,
            PatchError::Workspace(e) => e.kind(),
        }
    }
}

fn describe_rejections(rejected: &[HunkRejection]) -> String {
    rejected
        .iter()
        .map(|r| format!("hunk @@ -{},{} ({})", r.old_start, r.old_count, r.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// How to treat hunks whose context does not match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchMode {
    /// Any mismatch rejects the whole patch; the file is left untouched.
    #[default]
    Strict,
    /// Apply the hunks that match and report the ones that were skipped.
    /// Still a mismatch if no hunk applies.
    SkipMismatched,
}

/// Result of `generate_diff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffOutcome {
    pub diff: String,
    pub has_changes: bool,
}

/// A hunk that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HunkRejection {
    pub old_start: usize,
    pub old_count: usize,
    pub reason: String,
}

/// Result of a successful `apply_patch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub path: String,
    pub hunks_applied: usize,
    pub skipped: Vec<HunkRejection>,
    pub content: String,
}

/// Unified diff between two texts. `label` names both sides of the header.
pub fn generate_diff(original: &str, new: &str, label: Option<&str>) -> DiffOutcome {
    if original == new {
        return DiffOutcome {
            diff: String::new(),
            has_changes: false,
        };
    }

    let label = label.unwrap_or("file");
    let diff = TextDiff::from_lines(original, new);
    let text = diff
        .unified_diff()
        .context_radius(CONTEXT_LINES)
        .header(&format!("original/{label}"), &format!("new/{label}"))
        .to_string();

    DiffOutcome {
        diff: text,
        has_changes: true,
    }
}

/// A file split on `\n`. Lines keep any `\r`, so a CRLF file is
/// written back with its own line endings.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Lines {
    lines: Vec<String>,
    trailing_newline: bool,
    /// Most terminated lines end in `\r\n`; added lines follow suit.
    crlf: bool,
}

impl Lines {
    fn split(text: &str) -> Self {
        if text.is_empty() {
            return Self {
                lines: Vec::new(),
                trailing_newline: true,
                crlf: false,
            };
        }
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines: Vec<String> = body.split('\n').map(str::to_string).collect();
        let terminated = if trailing_newline { lines.len() } else { lines.len() - 1 };
        let with_cr = lines[..terminated].iter().filter(|l| l.ends_with('\r')).count();
        Self {
            crlf: terminated > 0 && with_cr * 2 > terminated,
            lines,
            trailing_newline,
        }
    }

    fn join(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        if self.trailing_newline {
            out.push('\n');
        }
        out
    }
}

/// Patch lines never carry `\r`; file lines may.
fn same_line(have: &str, want: &str) -> bool {
    have.strip_suffix('\r').unwrap_or(have) == want
}

/// New side of a hunk. Context lines are taken from the file as they are;
/// added lines get the file's line ending.
fn replacement(hunk: &Hunk, old: &[String], crlf: bool) -> Vec<String> {
    let mut out = Vec::with_capacity(hunk.new_count);
    let mut old = old.iter();
    for line in &hunk.lines {
        match line {
            HunkLine::Context(text) => {
                out.push(old.next().cloned().unwrap_or_else(|| text.clone()));
            }
            HunkLine::Remove(_) => {
                old.next();
            }
            HunkLine::Add(text) if crlf => out.push(format!("{text}\r")),
            HunkLine::Add(text) => out.push(text.clone()),
        }
    }
    out
}

/// Index in `lines` where a hunk's old side begins.
fn hunk_offset(hunk: &Hunk) -> usize {
    if hunk.old_count == 0 {
        // Pure insertion: `old_start` is the line *after which* to insert.
        hunk.old_start
    } else {
        hunk.old_start.saturating_sub(1)
    }
}

fn verify(hunk: &Hunk, file: &Lines) -> Result<(), String> {
    let expected = hunk.old_lines();
    if expected.len() != hunk.old_count {
        return Err(format!(
            "header declares {} old lines but body has {}",
            hunk.old_count,
            expected.len()
        ));
    }
    let start = hunk_offset(hunk);
    if start + expected.len() > file.lines.len() {
        return Err(format!(
            "hunk extends past end of file ({} lines)",
            file.lines.len()
        ));
    }
    for (i, want) in expected.iter().enumerate() {
        let have = &file.lines[start + i];
        if !same_line(have, want) {
            return Err(format!(
                "line {} is {:?}, patch expects {:?}",
                start + i + 1,
                have,
                want
            ));
        }
    }
    Ok(())
}

/// Apply `hunks` to `original` in memory.
fn apply_hunks(
    original: &str,
    hunks: &[Hunk],
    mode: PatchMode,
) -> Result<(String, usize, Vec<HunkRejection>), Vec<HunkRejection>> {
    let mut file = Lines::split(original);
    let original_len = file.lines.len();

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for hunk in hunks {
        match verify(hunk, &file) {
            Ok(()) => accepted.push(hunk),
            Err(reason) => rejected.push(HunkRejection {
                old_start: hunk.old_start,
                old_count: hunk.old_count,
                reason,
            }),
        }
    }

    let abort = match mode {
        PatchMode::Strict => !rejected.is_empty(),
        PatchMode::SkipMismatched => accepted.is_empty(),
    };
    if abort {
        return Err(rejected);
    }

    // Back-to-front keeps earlier offsets valid.
    accepted.sort_by(|a, b| b.old_start.cmp(&a.old_start));
    for hunk in &accepted {
        let start = hunk_offset(hunk);
        let end = start + hunk.old_count;
        let touches_eof = end == original_len;
        let lines = replacement(hunk, &file.lines[start..end], file.crlf);
        let spliced = start..start + lines.len();
        file.lines.splice(start..end, lines);
        if touches_eof {
            // The old unterminated last line may no longer be last.
            if file.crlf && !file.trailing_newline {
                for line in &mut file.lines[spliced] {
                    if !line.ends_with('\r') {
                        line.push('\r');
                    }
                }
            }
            file.trailing_newline = !hunk.new_missing_newline;
            if !file.trailing_newline {
                if let Some(last) = file.lines.last_mut() {
                    if last.ends_with('\r') {
                        last.pop();
                    }
                }
            }
        }
    }

    Ok((file.join(), accepted.len(), rejected))
}

/// Apply a unified diff to a workspace file. The file is rewritten only when
/// the patch applies under `mode`; otherwise it is left byte-identical.
pub async fn apply_patch(
    workspace: &Workspace,
    path: &str,
    patch_text: &str,
    mode: PatchMode,
) -> Result<PatchOutcome, PatchError> {
    let hunks = parse_patch(patch_text)?;
    let current = workspace.read(path).await?;

    let (content, hunks_applied, skipped) = apply_hunks(&current.content, &hunks, mode)
        .map_err(|rejected| {
            warn!(path = %current.path, rejected = rejected.len(), "patch rejected");
            PatchError::Mismatch {
                path: current.path.clone(),
                rejected,
            }
        })?;

    if content != current.content {
        workspace.update(&current.path, &content).await?;
    }
    if !skipped.is_empty() {
        warn!(path = %current.path, skipped = skipped.len(), "patch applied partially");
    }
    info!(path = %current.path, hunks = hunks_applied, "patch applied");

    Ok(PatchOutcome {
        path: current.path,
        hunks_applied,
        skipped,
        content,
    })
}
