//! Cross-kernel result matrix rendering.
//!
//! Pure formatting: the executor already decided pass/fail, this module only
//! lays the recorded outcomes out as a grid.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pass,
    Fail,
    Skip,
}

/// One recorded `(kernel, fixture)` outcome. Appended in execution order;
/// insertion order drives matrix row order.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub kernel: String,
    pub label: String,
    pub status: Status,
    pub duration_ms: u64,
}

const PLACEHOLDER: &str = "–";

pub fn display_alias(kernel_id: &str) -> &str {
    match kernel_id {
        "rs" => "rust",
        "java" => "java",
        "js" => "node",
        other => other,
    }
}

/// Render the grid: rows in first-seen label order, columns in caller order.
pub fn render(results: &[ExecutionResult], kernel_order: &[String]) -> String {
    let header: Vec<&str> = kernel_order
        .iter()
        .map(|kernel| display_alias(kernel))
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "| {} | test |", header.join(" | "));
    let _ = writeln!(
        out,
        "| {} | --- |",
        header.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    );
    for label in first_seen_labels(results) {
        let cells: Vec<String> = kernel_order
            .iter()
            .map(|kernel| cell(results, kernel, &label))
            .collect();
        let _ = writeln!(out, "| {} | {} |", cells.join(" | "), label);
    }
    out
}

fn first_seen_labels(results: &[ExecutionResult]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for result in results {
        if !labels.contains(&result.label) {
            labels.push(result.label.clone());
        }
    }
    labels
}

fn cell(results: &[ExecutionResult], kernel: &str, label: &str) -> String {
    let hit = results
        .iter()
        .find(|result| result.kernel == kernel && result.label == label);
    match hit {
        None => PLACEHOLDER.to_string(),
        Some(result) => match result.status {
            Status::Skip => PLACEHOLDER.to_string(),
            Status::Pass | Status::Fail => {
                let glyph = if result.status == Status::Pass {
                    "✓"
                } else {
                    "✗"
                };
                if result.duration_ms > 0 {
                    format!("{glyph} {} ms", result.duration_ms)
                } else {
                    glyph.to_string()
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(kernel: &str, label: &str, status: Status, duration_ms: u64) -> ExecutionResult {
        ExecutionResult {
            kernel: kernel.to_string(),
            label: label.to_string(),
            status,
            duration_ms,
        }
    }

    fn kernels(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    #[test]
    fn rows_follow_first_seen_label_order() {
        // "b" is recorded first (by the java kernel), so it is the first row
        // even though rs ran "a" first in its own block.
        let results = vec![
            result("java", "b", Status::Pass, 10),
            result("rs", "a", Status::Pass, 5),
            result("rs", "b", Status::Pass, 7),
        ];
        let rendered = render(&results, &kernels(&["rs", "java"]));
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[2].ends_with("| b |"), "got {}", lines[2]);
        assert!(lines[3].ends_with("| a |"), "got {}", lines[3]);
    }

    #[test]
    fn header_uses_display_aliases() {
        let results = vec![result("rs", "a", Status::Pass, 1)];
        let rendered = render(&results, &kernels(&["rs", "java", "js", "zig"]));
        assert!(rendered.starts_with("| rust | java | node | zig | test |"));
    }

    #[test]
    fn skip_and_missing_pairs_render_placeholder() {
        let results = vec![
            result("rs", "a", Status::Skip, 0),
            result("java", "b", Status::Pass, 3),
        ];
        let rendered = render(&results, &kernels(&["rs", "java"]));
        let lines: Vec<&str> = rendered.lines().collect();
        // Row "a": rs skipped, java never recorded.
        assert_eq!(lines[2], "| – | – | a |");
        // Row "b": rs has no result.
        assert_eq!(lines[3], "| – | ✓ 3 ms | b |");
    }

    #[test]
    fn failures_render_glyph_and_duration() {
        let results = vec![
            result("rs", "a", Status::Fail, 42),
            result("rs", "b", Status::Fail, 0),
        ];
        let rendered = render(&results, &kernels(&["rs"]));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[2], "| ✗ 42 ms | a |");
        // Zero duration omits the timing suffix.
        assert_eq!(lines[3], "| ✗ | b |");
    }
}
