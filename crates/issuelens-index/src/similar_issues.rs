//! Markdown list of issues similar to the one being answered.

use std::fmt::Write;

use issuelens_memory::Issue;

pub const SIMILAR_ISSUES_HEADER: &str = "## Other issues similar to this one are: \n";

/// How many similar issues are listed.
pub const SIMILAR_ISSUES_LIMIT: usize = 3;

/// Render the header followed by one numbered line per issue, in the given order.
#[must_use]
pub fn format_similar_issues(issues: &[Issue]) -> String {
    let mut text = String::from(SIMILAR_ISSUES_HEADER);
    for (n, issue) in issues.iter().enumerate() {
        let _ = writeln!(
            text,
            "{}. [{} #{} ({})]({})",
            n + 1,
            issue.title,
            issue.id,
            issue.state,
            issue.url
        );
    }
    text
}
