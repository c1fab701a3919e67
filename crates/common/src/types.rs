//! Core types for specstream
//!
//! These are the shapes the test runner hands to the reporter. They carry no
//! reporter state; the run controller owns all sequencing.

use serde::{Deserialize, Serialize};

/// A connected browser as reported by the test runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserInfo {
    /// Connection id, stable for the lifetime of the connection
    pub id: String,

    /// Display name (e.g. "Chrome 120.0")
    pub name: String,

    /// Expected number of specs this browser will run, when the runner
    /// knows it up front
    #[serde(default)]
    pub expected_total: Option<u64>,
}

/// Result of one completed spec in one browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecResult {
    /// Enclosing suite names, outermost first. Elements are nullable:
    /// some runners have been observed to hand over a missing name.
    #[serde(default)]
    pub suite_chain: Vec<Option<String>>,

    /// The spec's own display name
    pub spec_name: String,

    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub skipped: bool,

    /// Elapsed wall-clock time, absent if the runner did not measure it
    #[serde(default)]
    pub duration_ms: Option<u64>,

    /// Raw failure log fragments, concatenated by the reporter
    #[serde(default)]
    pub failure_logs: Vec<String>,
}

/// Semantic tag carried by every tree node.
///
/// `Config`, `Browser` and `Suite` tag interior (suite) nodes; `Test` and
/// `BrowserError` tag leaves. The wire form is the camelCase tag the
/// consumer expects in the `nodeType` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Config,
    Browser,
    Suite,
    Test,
    BrowserError,
}

impl NodeKind {
    /// Wire tag used in `nodeType` and as the navigation-hint scheme.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Config => "config",
            NodeKind::Browser => "browser",
            NodeKind::Suite => "suite",
            NodeKind::Test => "test",
            NodeKind::BrowserError => "browserError",
        }
    }
}

/// Outcome classification for a leaf node.
///
/// Wire codes are fixed: success=0, skipped=1, failed=2, error=3. `Error`
/// marks a harness-level failure (the runner itself blew up), distinct from
/// an assertion failure in test code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Success,
    Skipped,
    Failed,
    Error,
}

impl TestStatus {
    /// Numeric wire code for this status.
    pub fn code(self) -> u8 {
        match self {
            TestStatus::Success => 0,
            TestStatus::Skipped => 1,
            TestStatus::Failed => 2,
            TestStatus::Error => 3,
        }
    }

    /// Classify a spec result's flags.
    ///
    /// Skip wins over fail when both flags are set. Runner results cannot
    /// express a harness error; those come from browser-error events only.
    pub fn from_result_flags(success: bool, skipped: bool) -> Self {
        if skipped {
            TestStatus::Skipped
        } else if success {
            TestStatus::Success
        } else {
            TestStatus::Failed
        }
    }
}

/// One runner notification, as carried on the NDJSON adapter wire.
///
/// Internally tagged so each line is self-describing:
/// `{"event": "spec_complete", "browser": {...}, "result": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    RunStart {
        browsers: Vec<BrowserInfo>,
    },

    BrowserError {
        browser: BrowserInfo,
        error: String,
    },

    BrowserLog {
        browser: BrowserInfo,
        log: String,
        #[serde(default)]
        log_type: Option<String>,
    },

    /// Full current browser set; the controller diffs it against the
    /// previous snapshot to derive connect/disconnect notifications
    BrowsersChange {
        browsers: Vec<BrowserInfo>,
    },

    SpecComplete {
        browser: BrowserInfo,
        result: SpecResult,
    },

    RunComplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_fixed() {
        assert_eq!(TestStatus::Success.code(), 0);
        assert_eq!(TestStatus::Skipped.code(), 1);
        assert_eq!(TestStatus::Failed.code(), 2);
        assert_eq!(TestStatus::Error.code(), 3);
    }

    #[test]
    fn skip_wins_over_fail() {
        assert_eq!(
            TestStatus::from_result_flags(false, true),
            TestStatus::Skipped
        );
        assert_eq!(
            TestStatus::from_result_flags(true, true),
            TestStatus::Skipped
        );
        assert_eq!(
            TestStatus::from_result_flags(true, false),
            TestStatus::Success
        );
        assert_eq!(
            TestStatus::from_result_flags(false, false),
            TestStatus::Failed
        );
    }

    #[test]
    fn spec_complete_event_parses() {
        let line = r#"{"event": "spec_complete",
            "browser": {"id": "b1", "name": "Chrome 120.0", "expected_total": 3},
            "result": {"suite_chain": ["Calc", null, "inner"], "spec_name": "adds",
                       "success": true, "duration_ms": 12}}"#;
        let event: RunnerEvent = serde_json::from_str(line).unwrap();
        match event {
            RunnerEvent::SpecComplete { browser, result } => {
                assert_eq!(browser.id, "b1");
                assert_eq!(result.suite_chain[1], None);
                assert_eq!(result.duration_ms, Some(12));
                assert!(result.failure_logs.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn run_complete_event_parses() {
        let event: RunnerEvent = serde_json::from_str(r#"{"event": "run_complete"}"#).unwrap();
        assert!(matches!(event, RunnerEvent::RunComplete));
    }
}
