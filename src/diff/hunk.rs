//! Unified diff parsing.
//!
//! Accepts the usual `---`/`+++` headers (optional), `@@ -a,b +c,d @@` hunk
//! headers, ` `/`-`/`+` body lines and the `\ No newline at end of file`
//! marker. Anything before the first hunk header is ignored.

use super::PatchError;

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// One `@@` block, keyed by its header ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
    /// The new side's last line has no trailing newline.
    pub new_missing_newline: bool,
}

impl Hunk {
    /// Lines the original file must contain at the hunk's offset.
    pub fn old_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.clone()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// Lines that replace them.
    pub fn new_lines(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.clone()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

/// Parse `start[,count]`. A missing count means 1.
fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Parse `@@ -a,b +c,d @@ optional section heading`.
fn parse_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = line.strip_prefix("@@ ")?;
    let end = rest.find(" @@")?;
    let mut ranges = rest[..end].split_whitespace();
    let old = parse_range(ranges.next()?.strip_prefix('-')?)?;
    let new = parse_range(ranges.next()?.strip_prefix('+')?)?;
    if ranges.next().is_some() {
        return None;
    }
    Some((old.0, old.1, new.0, new.1))
}

/// Parse patch text into hunks, in the order they appear.
///
/// Header counts decide where a hunk body ends, so a removed line that
/// happens to start with `--` is not mistaken for a file header. Once a
/// hunk's counts are used up, file headers and blank lines close it; any
/// further body lines are kept so verification can report the miscount.
pub fn parse_patch(text: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    // Open hunk plus its remaining (old, new) line budget.
    let mut open: Option<(Hunk, usize, usize)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if line.starts_with("@@") {
            if let Some((hunk, _, _)) = open.take() {
                hunks.push(hunk);
            }
            let (old_start, old_count, new_start, new_count) = parse_header(line).ok_or_else(
                || PatchError::Malformed(format!("bad hunk header on line {}: {line}", idx + 1)),
            )?;
            open = Some((
                Hunk {
                    old_start,
                    old_count,
                    new_start,
                    new_count,
                    lines: Vec::new(),
                    new_missing_newline: false,
                },
                old_count,
                new_count,
            ));
            continue;
        }

        if line.starts_with('\\') {
            let last = match open.as_mut() {
                Some((hunk, _, _)) => Some(hunk),
                None => hunks.last_mut(),
            };
            if let Some(hunk) = last {
                if matches!(
                    hunk.lines.last(),
                    Some(HunkLine::Context(_)) | Some(HunkLine::Add(_))
                ) {
                    hunk.new_missing_newline = true;
                }
            }
            continue;
        }

        let Some((hunk, old_left, new_left)) = open.as_mut() else {
            // Preamble: `diff`, `index`, `---`, `+++` and friends.
            continue;
        };

        let exhausted = *old_left == 0 && *new_left == 0;
        if exhausted
            && (line.is_empty()
                || line.starts_with("--- ")
                || line.starts_with("+++ ")
                || line.starts_with("diff ")
                || line.starts_with("index "))
        {
            if let Some((hunk, _, _)) = open.take() {
                hunks.push(hunk);
            }
            continue;
        }

        match line.chars().next() {
            Some(' ') => {
                hunk.lines.push(HunkLine::Context(line[1..].to_string()));
                *old_left = old_left.saturating_sub(1);
                *new_left = new_left.saturating_sub(1);
            }
            Some('-') => {
                hunk.lines.push(HunkLine::Remove(line[1..].to_string()));
                *old_left = old_left.saturating_sub(1);
            }
            Some('+') => {
                hunk.lines.push(HunkLine::Add(line[1..].to_string()));
                *new_left = new_left.saturating_sub(1);
            }
            // Editors often strip the single space from blank context lines.
            None => {
                hunk.lines.push(HunkLine::Context(String::new()));
                *old_left = old_left.saturating_sub(1);
                *new_left = new_left.saturating_sub(1);
            }
            Some(_) => {
                return Err(PatchError::Malformed(format!(
                    "unexpected line {} in hunk: {line}",
                    idx + 1
                )))
            }
        }
    }

    if let Some((hunk, _, _)) = open {
        hunks.push(hunk);
    }
    if hunks.is_empty() {
        return Err(PatchError::Malformed("no hunks found".into()));
    }
    Ok(hunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers_and_body() {
        let patch =
            "--- original/a.py\n+++ new/a.py\n@@ -1,3 +1,3 @@ def main():\n a\n-b\n+B\n c\n";
        let hunks = parse_patch(patch).unwrap();
        assert_eq!(hunks.len(), 1);
        let h = &hunks[0];
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (1, 3, 1, 3));
        assert_eq!(h.old_lines(), ["a", "b", "c"]);
        assert_eq!(h.new_lines(), ["a", "B", "c"]);
    }

    #[test]
    fn missing_count_defaults_to_one() {
        let hunks = parse_patch("@@ -4 +4,2 @@\n-x\n+y\n+z\n").unwrap();
        assert_eq!(hunks[0].old_count, 1);
        assert_eq!(hunks[0].new_count, 2);
    }

    #[test]
    fn no_newline_marker_applies_to_new_side() {
        let hunks = parse_patch("@@ -1 +1 @@\n-x\n+x\n\\ No newline at end of file\n").unwrap();
        assert!(hunks[0].new_missing_newline);

        let hunks = parse_patch("@@ -1 +1 @@\n-x\n\\ No newline at end of file\n+x\n").unwrap();
        assert!(!hunks[0].new_missing_newline);
    }

    #[test]
    fn blank_line_is_context() {
        let hunks = parse_patch("@@ -1,3 +1,3 @@\n a\n\n-b\n+c\n").unwrap();
        assert_eq!(hunks[0].old_lines(), ["a", "", "b"]);
    }

    #[test]
    fn removed_line_starting_with_dashes_stays_in_hunk() {
        let hunks = parse_patch("@@ -1,2 +1,1 @@\n--- not a header\n keep\n").unwrap();
        assert_eq!(hunks[0].old_lines(), ["-- not a header", "keep"]);
        assert_eq!(hunks[0].new_lines(), ["keep"]);
    }

    #[test]
    fn second_file_header_closes_hunk() {
        let patch =
            "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n--- a/y\n+++ b/y\n@@ -3 +3 @@\n-c\n+d\n";
        let hunks = parse_patch(patch).unwrap();
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[1].old_start, 3);
        assert_eq!(hunks[0].lines.len(), 2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_patch("just text"), Err(PatchError::Malformed(_))));
        assert!(matches!(parse_patch("@@ nonsense @@\n"), Err(PatchError::Malformed(_))));
        assert!(matches!(
            parse_patch("@@ -1 +1 @@\n*what\n"),
            Err(PatchError::Malformed(_))
        ));
    }
}
