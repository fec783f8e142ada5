//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in the client and CLI MUST NOT call blocking
//! I/O. Use `tokio::fs`, `reqwest` (async), and `tokio::io` instead.
//! **Exceptions**: Plain `fn` bodies (config loading at startup), test code

use architectural_enforcement::{
    code_part, is_in_async_context, is_in_test_code, production_sources, SourceFile,
};

/// Blocking calls and the async replacement to suggest
const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "tokio::fs"),
    ("std::net::", "tokio::net"),
    ("std::process::Command", "tokio::process::Command"),
    ("reqwest::blocking", "reqwest::Client"),
    ("std::thread::sleep", "tokio::time::sleep inside tokio::select!"),
    ("std::io::stdin()", "tokio::io::stdin()"),
    ("std::io::stdout()", "tokio::io::stdout() or println!"),
];

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(find_blocking_calls)
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O found in async code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use the async equivalent:");
        for (pattern, replacement) in BLOCKING_PATTERNS {
            eprintln!("  - {pattern} → {replacement}");
        }

        panic!(
            "\nFound {} blocking I/O call(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_calls(file: &SourceFile) -> Vec<String> {
    let lines = file.line_refs();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        let Some((pattern, _)) = BLOCKING_PATTERNS.iter().find(|(p, _)| code.contains(p)) else {
            continue;
        };
        if is_in_test_code(&lines, idx) || !is_in_async_context(&lines, idx) {
            continue;
        }
        violations.push(format!("{} [{pattern}]", file.violation(idx)));
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_blocking_read_in_async_fn() {
        let file = SourceFile::from_text(
            "sample.rs",
            "pub async fn load() {\n    let text = std::fs::read_to_string(path)?;\n}\n",
        );
        let violations = find_blocking_calls(&file);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("sample.rs:2"));
    }

    #[test]
    fn test_allows_blocking_read_in_sync_fn() {
        let file = SourceFile::from_text(
            "sample.rs",
            "pub fn load_config() {\n    let text = std::fs::read_to_string(path)?;\n}\n",
        );
        assert!(find_blocking_calls(&file).is_empty());
    }

    #[test]
    fn test_ignores_comments_and_tests() {
        let file = SourceFile::from_text(
            "sample.rs",
            "async fn run() {\n    // std::fs::read is banned here\n}\n\
             #[cfg(test)]\nmod tests {\n    async fn fixture() {\n        std::fs::write(p, b)?;\n    }\n}\n",
        );
        assert!(find_blocking_calls(&file).is_empty());
    }
}
