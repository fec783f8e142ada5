//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No blocking I/O inside async functions
//! - No uncancellable sleeps in production code
//!
//! The scanners are line based. They read every `.rs` file under the
//! production source roots and classify each line by the function and module
//! that enclose it.

use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["genflow/core/src", "genflow/cli/src"];

/// How far back a `tokio::select!` may start before a sleep arm
const SELECT_LOOKBACK: usize = 6;

/// Workspace root, derived from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// One scanned source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path to the file
    pub path: PathBuf,
    /// File contents split into lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Build from in-memory text
    #[must_use]
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Borrowed view of the lines
    #[must_use]
    pub fn line_refs(&self) -> Vec<&str> {
        self.lines.iter().map(String::as_str).collect()
    }

    /// Format a violation at a zero-based line index
    #[must_use]
    pub fn violation(&self, idx: usize) -> String {
        format!(
            "{}:{} - {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Read every production source file
///
/// Missing roots are skipped so the scan works from partial checkouts.
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            if let Ok(text) = std::fs::read_to_string(entry.path()) {
                files.push(SourceFile::from_text(entry.path(), &text));
            }
        }
    }
    files
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Signature of a function header line, if the line is one
///
/// Returns `Some(true)` for `async fn`, `Some(false)` for a plain `fn`.
#[must_use]
pub fn fn_header(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether the closest enclosing function is `async`
///
/// Lines inside `async` blocks of a plain function count as async.
#[must_use]
pub fn is_in_async_context(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..=current_idx).rev() {
        let line = lines[i];
        if i < current_idx && code_part(line).contains("async move {") {
            return true;
        }
        if let Some(is_async) = fn_header(line) {
            return is_async;
        }
    }
    false
}

/// Whether a line belongs to test code
///
/// Everything after `#[cfg(test)]` counts, as do functions annotated with a
/// test attribute.
#[must_use]
pub fn is_in_test_code(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();
        if line.starts_with("#[cfg(test)]") {
            return true;
        }
        if fn_header(line).is_some() && i > 0 && is_test_attribute(lines[i - 1]) {
            return true;
        }
    }
    false
}

fn is_test_attribute(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("#[test]") || line.starts_with("#[tokio::test")
}

/// Whether a sleep on this line is a `tokio::select!` arm raced against
/// cancellation
#[must_use]
pub fn is_cancellable_select_arm(lines: &[&str], current_idx: usize) -> bool {
    if !code_part(lines[current_idx]).contains("=>") {
        return false;
    }
    let start = current_idx.saturating_sub(SELECT_LOOKBACK);
    let Some(select_idx) = (start..current_idx)
        .rev()
        .find(|&i| code_part(lines[i]).contains("tokio::select!"))
    else {
        return false;
    };
    (select_idx..=current_idx).any(|i| code_part(lines[i]).contains("cancelled()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_header_handles_visibility() {
        assert_eq!(fn_header("    pub async fn run(&self) {"), Some(true));
        assert_eq!(fn_header("pub(crate) fn build() -> Self {"), Some(false));
        assert_eq!(fn_header("fn helper() {"), Some(false));
        assert_eq!(fn_header("let f = foo();"), None);
    }

    #[test]
    fn test_async_context_detection() {
        let code = vec![
            "pub async fn fetch() {",
            "    let body = read();",
            "}",
            "fn spawn_it() {",
            "    tokio::spawn(async move {",
            "        work().await;",
            "    });",
            "}",
        ];

        assert!(is_in_async_context(&code, 1));
        assert!(is_in_async_context(&code, 5));
        assert!(!is_in_async_context(&code, 4));
    }

    #[test]
    fn test_test_code_detection() {
        let code = vec![
            "fn production() {",
            "    work();",
            "}",
            "#[cfg(test)]",
            "mod tests {",
            "    fn helper() {",
            "        sleep();",
            "    }",
            "}",
        ];

        assert!(!is_in_test_code(&code, 1));
        assert!(is_in_test_code(&code, 6));
    }

    #[test]
    fn test_cancellable_select_arm() {
        let code = vec![
            "tokio::select! {",
            "    biased;",
            "    () = cancel.cancelled() => return Err(ClientError::Aborted),",
            "    () = tokio::time::sleep(interval) => {}",
            "}",
        ];
        assert!(is_cancellable_select_arm(&code, 3));

        let bare = vec!["loop {", "    tokio::time::sleep(interval).await;", "}"];
        assert!(!is_cancellable_select_arm(&bare, 1));
    }

    #[test]
    fn test_select_without_cancellation_is_rejected() {
        let code = vec![
            "tokio::select! {",
            "    msg = rx.recv() => handle(msg),",
            "    () = tokio::time::sleep(interval) => {}",
            "}",
        ];
        assert!(!is_cancellable_select_arm(&code, 2));
    }

    #[test]
    fn test_production_roots_exist() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).exists(), "missing source root {dir}");
        }
    }
}
