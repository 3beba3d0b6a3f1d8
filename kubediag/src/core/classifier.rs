//! Deterministic classification of assistant messages.
//!
//! Priority order: a findings table wins over any command line, the first
//! command line wins over later ones, and everything else is a stall.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Proposal;

/// Columns of the findings table: pod, namespace, status, cause, solution.
pub const REPORT_COLUMNS: usize = 5;

static DELIMITER_CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^:?-+:?$").unwrap());

/// Knobs for [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyPolicy {
    /// Token that starts an inspection command line (e.g. `kubectl`).
    pub command_prefix: String,
    /// Minimum non-empty header cells for a table to count as the report.
    pub min_report_columns: usize,
}

impl ClassifyPolicy {
    pub fn new(command_prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: command_prefix.into(),
            min_report_columns: REPORT_COLUMNS,
        }
    }
}

impl Default for ClassifyPolicy {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

/// Classify one assistant message.
pub fn classify(text: &str, policy: &ClassifyPolicy) -> Proposal {
    if contains_report_table(text, policy.min_report_columns) {
        return Proposal::Report;
    }
    match first_command_line(text, &policy.command_prefix) {
        Some(command) => Proposal::Command(command),
        None => Proposal::Stall,
    }
}

/// Whether `text` holds a markdown-style table: a header row with at least
/// `min_columns` non-empty cells directly followed by a delimiter row.
///
/// Header wording is not checked; a table phrased differently still counts,
/// while a table missing its delimiter row does not.
pub fn contains_report_table(text: &str, min_columns: usize) -> bool {
    let rows: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    rows.windows(2).any(|pair| {
        let header = table_cells(pair[0]);
        let delimiter = table_cells(pair[1]);
        let header_columns = header.iter().filter(|cell| !cell.is_empty()).count();
        header_columns >= min_columns
            && delimiter.len() >= min_columns
            && delimiter.iter().all(|cell| DELIMITER_CELL_RE.is_match(cell))
    })
}

/// Extract the first line that invokes `prefix`, normalized.
///
/// Leading `$ ` shell prompts and inline backticks are stripped so that
/// `` `kubectl get pods` `` and `$ kubectl get pods` both yield `kubectl get pods`.
pub fn first_command_line(text: &str, prefix: &str) -> Option<String> {
    text.lines()
        .map(normalize_command_line)
        .find(|line| starts_with_token(line, prefix))
        .map(str::to_string)
}

fn normalize_command_line(line: &str) -> &str {
    let mut line = line.trim();
    if let Some(rest) = line.strip_prefix("$ ") {
        line = rest.trim_start();
    }
    if line.len() >= 2 && line.starts_with('`') && line.ends_with('`') && !line.starts_with("```")
    {
        line = line[1..line.len() - 1].trim();
    }
    line
}

fn starts_with_token(line: &str, token: &str) -> bool {
    match line.strip_prefix(token) {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

fn table_cells(row: &str) -> Vec<&str> {
    if !row.contains('|') {
        return Vec::new();
    }
    let inner = row.strip_prefix('|').unwrap_or(row);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(str::trim).collect()
}
