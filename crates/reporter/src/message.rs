//! Service-message line rendering
//!
//! Pure, stateless formatting of the line-based protocol the consumer
//! parses. Every free-text attribute goes through [`escape`] before
//! interpolation; an unescaped reserved character would desynchronize the
//! consumer's line parser.

use specstream_common::{NodeKind, TestStatus};

/// Handshake line emitted once at the start of every run, before any node
/// output.
pub const HANDSHAKE: &str = "##teamcity[enteredTheMatrix]";

/// Diagnostic line written when a runner hands over a suite chain with a
/// missing name. The element is skipped; the run continues.
pub const MISSING_SUITE_NAME: &str =
    "[runner defect] suite name is missing in a result; skipping that chain element";

/// Backslash-escape the protocol's reserved characters.
///
/// Reserved: backslash, quote, pipe, bracket-closer, newline, carriage
/// return. Newline and carriage return encode as the two-character
/// sequences `\n` and `\r`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '|' => out.push_str("\\|"),
            ']' => out.push_str("\\]"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Command tag for a node's start message, keyed by whether the node is an
/// interior (suite) node.
fn start_command(is_suite: bool) -> &'static str {
    if is_suite {
        "testSuiteStarted"
    } else {
        "testStarted"
    }
}

/// Command tag for a leaf's finish message, keyed by status.
///
/// Skipped gets its own command so a skip is never mistaken for a failure;
/// `Failed` and `Error` share the failure command and are told apart by the
/// `error='yes'` attribute on the latter.
fn finish_command(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Success => "testFinished",
        TestStatus::Skipped => "testIgnored",
        TestStatus::Failed | TestStatus::Error => "testFailed",
    }
}

/// Render a node's start line.
///
/// `parent_id` is 0 for the root. The navigation hint, when present, is the
/// '.'-joined ancestor-name path; it is prefixed with `<kind>://` here so
/// the scheme always matches the node's declared kind.
pub fn start_line(
    id: u64,
    parent_id: u64,
    name: &str,
    kind: NodeKind,
    is_suite: bool,
    location_hint: Option<&str>,
) -> String {
    let mut text = format!(
        "##teamcity[{} nodeId='{}' parentNodeId='{}' name='{}' nodeType='{}'",
        start_command(is_suite),
        id,
        parent_id,
        escape(name),
        kind.as_str(),
    );
    if let Some(hint) = location_hint {
        text.push_str(&format!(
            " locationHint='{}'",
            escape(&format!("{}://{}", kind.as_str(), hint))
        ));
    }
    text.push(']');
    text
}

/// Render a suite's finish line.
pub fn suite_finish_line(id: u64) -> String {
    format!("##teamcity[testSuiteFinished nodeId='{}']", id)
}

/// Render a leaf's finish line.
///
/// Duration and failure message are optional; only an internal harness
/// error carries the `error='yes'` marker.
pub fn leaf_finish_line(
    id: u64,
    status: TestStatus,
    duration_ms: Option<u64>,
    failure: Option<&str>,
) -> String {
    let mut text = format!("##teamcity[{} nodeId='{}'", finish_command(status), id);
    if let Some(duration) = duration_ms {
        text.push_str(&format!(" duration='{}'", duration));
    }
    if status == TestStatus::Error {
        text.push_str(" error='yes'");
    }
    if let Some(message) = failure {
        if !message.is_empty() {
            text.push_str(&format!(" message='{}'", escape(message)));
        }
    }
    text.push(']');
    text
}

/// Render the run-wide expected test count line.
pub fn test_count_line(count: u64) -> String {
    format!("##teamcity[testCount count='{}']", count)
}

/// Render a browser connect/disconnect notification line.
pub fn browser_event_line(event: &str, id: &str, name: &str) -> String {
    format!(
        "##teamcity[{} id='{}' name='{}']",
        event,
        escape(id),
        escape(name)
    )
}
