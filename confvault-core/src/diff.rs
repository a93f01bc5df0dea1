use crate::models::{ChangeType, ObjectId, TreeChange};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

/// Lines of unchanged context kept around each hunk.
pub const DEFAULT_CONTEXT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub change_type: ChangeType,
    pub old_id: Option<ObjectId>,
    pub new_id: Option<ObjectId>,
    /// Either side is not UTF-8 text; no hunks are produced.
    pub binary: bool,
    pub hunks: Vec<FileHunk>,
}

/// A contiguous region of change, with line numbers starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub line_type: DiffLineType,
    pub content: String,
    pub old_line_number: Option<usize>,
    pub new_line_number: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffLineType {
    Context,
    Addition,
    Deletion,
}

impl DiffLineType {
    pub fn prefix(&self) -> char {
        match self {
            DiffLineType::Context => ' ',
            DiffLineType::Addition => '+',
            DiffLineType::Deletion => '-',
        }
    }
}

impl FileDiff {
    /// Build the diff for one tree change given the content on each side.
    /// A missing side (added or deleted file) counts as empty text.
    pub fn from_change(change: &TreeChange, old: Option<&[u8]>, new: Option<&[u8]>) -> Self {
        Self::with_context(change, old, new, DEFAULT_CONTEXT)
    }

    pub fn with_context(
        change: &TreeChange,
        old: Option<&[u8]>,
        new: Option<&[u8]>,
        context: usize,
    ) -> Self {
        let old_text = as_text(old.unwrap_or_default());
        let new_text = as_text(new.unwrap_or_default());

        let (binary, hunks) = match (old_text, new_text) {
            (Some(old), Some(new)) => (false, Self::compute_hunks(old, new, context)),
            _ => (true, Vec::new()),
        };

        FileDiff {
            path: change.path.clone(),
            change_type: change.change_type,
            old_id: change.old.clone(),
            new_id: change.new.clone(),
            binary,
            hunks,
        }
    }

    fn compute_hunks(old_text: &str, new_text: &str, context: usize) -> Vec<FileHunk> {
        let diff = TextDiff::from_lines(old_text, new_text);
        let mut hunks = Vec::new();

        for group in diff.grouped_ops(context) {
            let (first, last) = match (group.first(), group.last()) {
                (Some(first), Some(last)) => (first, last),
                _ => continue,
            };
            let old_range = first.old_range().start..last.old_range().end;
            let new_range = first.new_range().start..last.new_range().end;

            let mut lines = Vec::new();
            for op in &group {
                for change in diff.iter_changes(op) {
                    let line_type = match change.tag() {
                        ChangeTag::Equal => DiffLineType::Context,
                        ChangeTag::Insert => DiffLineType::Addition,
                        ChangeTag::Delete => DiffLineType::Deletion,
                    };
                    lines.push(DiffLine {
                        line_type,
                        content: change.to_string_lossy().into_owned(),
                        old_line_number: change.old_index().map(|i| i + 1),
                        new_line_number: change.new_index().map(|i| i + 1),
                    });
                }
            }

            hunks.push(FileHunk {
                old_start: hunk_start(old_range.start, old_range.len()),
                old_lines: old_range.len(),
                new_start: hunk_start(new_range.start, new_range.len()),
                new_lines: new_range.len(),
                lines,
            });
        }

        hunks
    }

    pub fn additions(&self) -> usize {
        self.count(DiffLineType::Addition)
    }

    pub fn deletions(&self) -> usize {
        self.count(DiffLineType::Deletion)
    }

    fn count(&self, line_type: DiffLineType) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .filter(|l| l.line_type == line_type)
            .count()
    }

    pub fn format_unified(&self) -> String {
        let mut output = String::new();

        let old_name = match self.change_type {
            ChangeType::Added => "/dev/null".to_string(),
            _ => format!("a/{}", self.path),
        };
        let new_name = match self.change_type {
            ChangeType::Deleted => "/dev/null".to_string(),
            _ => format!("b/{}", self.path),
        };
        output.push_str(&format!("--- {}\n", old_name));
        output.push_str(&format!("+++ {}\n", new_name));

        if self.binary {
            output.push_str("Binary files differ\n");
            return output;
        }

        for hunk in &self.hunks {
            output.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            ));
            for line in &hunk.lines {
                output.push(line.line_type.prefix());
                output.push_str(&line.content);
                if !line.content.ends_with('\n') {
                    output.push_str("\n\\ No newline at end of file\n");
                }
            }
        }

        output
    }
}

/// Unified-diff convention: an empty range starts at the line before it.
fn hunk_start(index: usize, len: usize) -> usize {
    if len == 0 {
        index
    } else {
        index + 1
    }
}

fn as_text(data: &[u8]) -> Option<&str> {
    if data.contains(&0) {
        return None;
    }
    std::str::from_utf8(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectKind;
    use similar_asserts::assert_eq;

    fn change(path: &str, change_type: ChangeType) -> TreeChange {
        let id = ObjectId::compute(ObjectKind::Blob, path.as_bytes());
        TreeChange {
            path: path.to_string(),
            change_type,
            old: (change_type != ChangeType::Added).then(|| id.clone()),
            new: (change_type != ChangeType::Deleted).then_some(id),
        }
    }

    #[test]
    fn test_diff_computation() {
        let old_text = "line 1\nline 2\nline 3\n";
        let new_text = "line 1\nline 2 modified\nline 3\nline 4\n";

        let diff = FileDiff::from_change(
            &change("test.yaml", ChangeType::Modified),
            Some(old_text.as_bytes()),
            Some(new_text.as_bytes()),
        );

        assert!(!diff.binary);
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.additions(), 2);
        assert_eq!(diff.deletions(), 1);

        let expected = "--- a/test.yaml\n\
                        +++ b/test.yaml\n\
                        @@ -1,3 +1,4 @@\n \
                        line 1\n\
                        -line 2\n\
                        +line 2 modified\n \
                        line 3\n\
                        +line 4\n";
        assert_eq!(diff.format_unified(), expected);
    }

    #[test]
    fn test_distant_changes_split_into_hunks() {
        let old: String = (1..=20).map(|i| format!("key{}: {}\n", i, i)).collect();
        let new = old
            .replace("key2: 2\n", "key2: two\n")
            .replace("key19: 19\n", "key19: nineteen\n");

        let diff = FileDiff::from_change(
            &change("big.yaml", ChangeType::Modified),
            Some(old.as_bytes()),
            Some(new.as_bytes()),
        );

        assert_eq!(diff.hunks.len(), 2);
        assert_eq!(diff.hunks[0].old_start, 1);
        assert_eq!(diff.hunks[1].old_start, 16);
        let changed = &diff.hunks[1]
            .lines
            .iter()
            .find(|l| l.line_type == DiffLineType::Deletion)
            .unwrap();
        assert_eq!(changed.old_line_number, Some(19));
    }

    #[test]
    fn test_added_file() {
        let diff = FileDiff::from_change(&change("new.yaml", ChangeType::Added), None, Some(b"a: 1\n"));

        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].old_start, 0);
        assert_eq!(diff.hunks[0].old_lines, 0);
        assert_eq!(diff.hunks[0].new_start, 1);
        assert!(diff.format_unified().starts_with("--- /dev/null\n+++ b/new.yaml\n"));
    }

    #[test]
    fn test_binary_file_has_no_hunks() {
        let diff = FileDiff::from_change(
            &change("image.png", ChangeType::Modified),
            Some(&[0x89, b'P', b'N', b'G', 0, 1]),
            Some(&[0x89, b'P', b'N', b'G', 0, 2]),
        );

        assert!(diff.binary);
        assert!(diff.hunks.is_empty());
        assert!(diff.format_unified().ends_with("Binary files differ\n"));
    }

    #[test]
    fn test_missing_trailing_newline_is_marked() {
        let diff = FileDiff::from_change(
            &change("x.yaml", ChangeType::Modified),
            Some(b"a: 1"),
            Some(b"a: 2"),
        );
        assert!(diff.format_unified().contains("\\ No newline at end of file"));
    }
}
