//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep unless the sleep is a
//! `tokio::select!` arm raced against a cancellation token. Poll intervals,
//! token pacing and delayed transitions all end promptly when cancelled.
//! **Exceptions**: Test code

use architectural_enforcement::{
    code_part, is_cancellable_select_arm, is_in_test_code, production_sources, SourceFile,
};

#[test]
fn test_no_uncancellable_sleep_in_production_code() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(find_sleep_violations)
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Uncancellable sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - tokio::select! {{ () = cancel.cancelled() => .., () = sleep(d) => .. }}");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions, #[cfg(test)] modules)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - sleep(..).await in a polling loop");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations(file: &SourceFile) -> Vec<String> {
    let lines = file.line_refs();
    let mut violations = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let code = code_part(line);
        if !code.contains("::sleep(") && !code.contains(".sleep(") {
            continue;
        }
        if is_in_test_code(&lines, idx) || is_cancellable_select_arm(&lines, idx) {
            continue;
        }
        violations.push(file.violation(idx));
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sleep_in_poll_loop() {
        let file = SourceFile::from_text(
            "sample.rs",
            "async fn poll() {\n    loop {\n        check().await;\n        \
             tokio::time::sleep(interval).await;\n    }\n}\n",
        );
        let violations = find_sleep_violations(&file);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("sample.rs:4"));
    }

    #[test]
    fn test_allows_cancellable_wait() {
        let file = SourceFile::from_text(
            "sample.rs",
            "async fn poll(cancel: &CancellationToken) {\n    tokio::select! {\n        biased;\n        \
             () = cancel.cancelled() => return,\n        \
             () = tokio::time::sleep(interval) => {}\n    }\n}\n",
        );
        assert!(find_sleep_violations(&file).is_empty());
    }

    #[test]
    fn test_allows_sleep_in_tests() {
        let file = SourceFile::from_text(
            "sample.rs",
            "#[tokio::test]\nasync fn test_waits() {\n    tokio::time::sleep(d).await;\n}\n",
        );
        assert!(find_sleep_violations(&file).is_empty());
    }
}
