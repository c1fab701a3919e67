//! Run orchestration
//!
//! [`RunController`] receives runner events in call order and drives the
//! tree: it resolves or creates suite chains, creates leaf nodes, sets
//! their status and finalizes the tree at run completion. One controller
//! serves many consecutive runs; each run gets a fresh tree over the same
//! sink.

use std::collections::{BTreeMap, HashMap, HashSet};

use specstream_common::{BrowserInfo, Error, NodeKind, Result, SpecResult, TestStatus};
use tracing::{debug, info, warn};

use crate::coverage::{CoverageDelegate, NoopCoverage};
use crate::message;
use crate::tree::{MessageSink, NodeId, Tree};

/// Root labeling supplied by the configuration/basePath resolver.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Display name for the run scope (typically the config file basename)
    pub config_name: String,

    /// Full config path, used as the root's navigation hint
    pub config_path: Option<String>,
}

/// Controller lifecycle state for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
}

/// Orchestrates one run at a time over an injected sink.
pub struct RunController {
    config: ReporterConfig,
    state: RunState,
    /// Exactly one of `tree`/`sink` holds the sink at any moment: the tree
    /// owns it while a run is active, the controller between runs.
    tree: Option<Tree>,
    sink: Option<Box<dyn MessageSink>>,
    /// Browser connection id -> suite node for the current run
    browser_nodes: HashMap<String, NodeId>,
    /// Browsers that materialized a node this run, in creation order;
    /// each gets a browser-complete notification at finalization
    seen_browsers: Vec<BrowserInfo>,
    /// Browsers that already contributed to the expected test total
    counted_browsers: HashSet<String>,
    total_test_count: u64,
    unchecked_browsers: usize,
    /// Browser set announced at run start, passed to the coverage delegate
    run_browsers: Vec<BrowserInfo>,
    /// Connection id -> name snapshot for connect/disconnect diffing,
    /// id-ordered so disconnect emission order is stable
    known_browsers: BTreeMap<String, String>,
    coverage: Box<dyn CoverageDelegate>,
}

impl RunController {
    pub fn new(config: ReporterConfig, sink: Box<dyn MessageSink>) -> Self {
        Self {
            config,
            state: RunState::Idle,
            tree: None,
            sink: Some(sink),
            browser_nodes: HashMap::new(),
            seen_browsers: Vec::new(),
            counted_browsers: HashSet::new(),
            total_test_count: 0,
            unchecked_browsers: 0,
            run_browsers: Vec::new(),
            known_browsers: BTreeMap::new(),
            coverage: Box::new(NoopCoverage),
        }
    }

    /// Attach a coverage collaborator. The controller only signals run
    /// boundaries; it never inspects what the delegate produces.
    pub fn with_coverage(mut self, delegate: Box<dyn CoverageDelegate>) -> Self {
        self.coverage = delegate;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run-start event: allocate a fresh tree, reset counters, emit the
    /// handshake line.
    pub fn on_run_start(&mut self, browsers: &[BrowserInfo]) -> Result<()> {
        if self.state == RunState::Running {
            return Err(Error::structure("run started while a run is active"));
        }
        let sink = self
            .sink
            .take()
            .ok_or_else(|| Error::structure("output sink detached"))?;
        let mut tree = Tree::new(&self.config.config_name, self.config.config_path.as_deref(), sink);
        tree.write_raw(message::HANDSHAKE)?;

        self.total_test_count = 0;
        self.unchecked_browsers = browsers.len();
        self.counted_browsers.clear();
        self.browser_nodes.clear();
        self.seen_browsers.clear();
        self.run_browsers = browsers.to_vec();
        self.tree = Some(tree);
        self.state = RunState::Running;
        self.coverage.run_started(browsers);
        info!(browsers = browsers.len(), "test run started");
        Ok(())
    }

    /// Browser-level harness error: a synthetic, pre-finished error leaf
    /// under that browser's node, visible in the same stream without a spec
    /// context.
    pub fn on_browser_error(&mut self, browser: &BrowserInfo, error: &str) -> Result<()> {
        self.require_running("browser error")?;
        let browser_node = self.ensure_browser_node(browser)?;
        warn!(browser = %browser.name, "browser reported a harness error");
        self.tree_mut()?
            .create_error_leaf(browser_node, "Error", NodeKind::BrowserError, error)?;
        Ok(())
    }

    /// Forward a browser console log line through the sink verbatim.
    pub fn on_browser_log(&mut self, log: &str) -> Result<()> {
        self.write_line(log)
    }

    /// Spec-complete event: walk/create the suite chain under the browser
    /// node, create the leaf, classify its status and finish it immediately.
    /// Leaves never remain open across events.
    pub fn on_spec_complete(&mut self, browser: &BrowserInfo, result: &SpecResult) -> Result<()> {
        self.require_running("spec result")?;
        let browser_node = self.ensure_browser_node(browser)?;
        self.account_test_total(browser)?;

        let tree = self
            .tree
            .as_mut()
            .ok_or_else(|| Error::structure("no active tree"))?;
        let (suite_node, mut path) = walk_suite_chain(tree, browser_node, &result.suite_chain)?;

        path.push(result.spec_name.clone());
        let hint = path.join(".");
        let leaf = tree.create_leaf(suite_node, &result.spec_name, NodeKind::Test, Some(hint))?;

        let status = TestStatus::from_result_flags(result.success, result.skipped);
        let failure = if result.failure_logs.is_empty() {
            None
        } else {
            Some(result.failure_logs.join("\n"))
        };
        tree.set_status(leaf, status, result.duration_ms, failure)?;
        tree.finish(leaf)?;
        debug!(spec = %result.spec_name, status = ?status, "spec reported");
        Ok(())
    }

    /// Run-complete event: cascade-finish the root, notify coverage, drop
    /// the tree and reclaim the sink for the next run.
    pub fn on_run_complete(&mut self) -> Result<()> {
        self.require_running("run completion")?;
        self.finalize()
    }

    /// Abort the current run, if any, leaving the protocol stream
    /// well-formed. Partial output is acceptable; malformed nesting is not.
    pub fn abort(&mut self) -> Result<()> {
        if self.state != RunState::Running {
            return Ok(());
        }
        warn!("run aborted; finishing open nodes");
        self.finalize()
    }

    /// Explicit browser connect/disconnect tracking.
    ///
    /// Diffs the full current browser set against the previous snapshot and
    /// emits one notification line per delta. A snapshot containing a
    /// half-initialized entry (missing name, or id equal to name) is
    /// ignored wholesale; the next complete snapshot supersedes it.
    pub fn browsers_changed(&mut self, current: &[BrowserInfo]) -> Result<()> {
        let mut next: BTreeMap<String, String> = BTreeMap::new();
        for browser in current {
            if browser.id.is_empty() || browser.name.is_empty() || browser.id == browser.name {
                debug!(id = %browser.id, "partial browser snapshot ignored");
                return Ok(());
            }
            next.insert(browser.id.clone(), browser.name.clone());
        }

        // connects in snapshot order, disconnects in id order: emission
        // order must be stable run-to-run
        let mut lines = Vec::new();
        let mut announced: HashSet<&str> = HashSet::new();
        for browser in current {
            if !self.known_browsers.contains_key(&browser.id)
                && announced.insert(browser.id.as_str())
            {
                lines.push(message::browser_event_line(
                    "browserConnected",
                    &browser.id,
                    &browser.name,
                ));
            }
        }
        for (id, name) in &self.known_browsers {
            if !next.contains_key(id) {
                lines.push(message::browser_event_line("browserDisconnected", id, name));
            }
        }
        self.known_browsers = next;
        for line in &lines {
            self.write_line(line)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut tree = self
            .tree
            .take()
            .ok_or_else(|| Error::structure("no active tree"))?;
        let root = tree.root();
        tree.finish(root)?;
        self.sink = Some(tree.into_sink());
        self.state = RunState::Completed;
        for browser in &self.seen_browsers {
            self.coverage.browser_complete(browser);
        }
        self.coverage.run_complete(&self.run_browsers);
        info!(expected_total = self.total_test_count, "test run completed");
        Ok(())
    }

    fn require_running(&self, what: &str) -> Result<()> {
        if self.state != RunState::Running {
            return Err(Error::structure(format!(
                "{} received outside an active run",
                what
            )));
        }
        Ok(())
    }

    fn tree_mut(&mut self) -> Result<&mut Tree> {
        self.tree
            .as_mut()
            .ok_or_else(|| Error::structure("no active tree"))
    }

    /// Browser nodes are keyed by connection id, not display name: two
    /// browsers with the same name stay distinct.
    fn ensure_browser_node(&mut self, browser: &BrowserInfo) -> Result<NodeId> {
        if let Some(&id) = self.browser_nodes.get(&browser.id) {
            return Ok(id);
        }
        let tree = self
            .tree
            .as_mut()
            .ok_or_else(|| Error::structure("no active tree"))?;
        let root = tree.root();
        let id = tree.create_suite(root, &browser.name, NodeKind::Browser, None)?;
        self.browser_nodes.insert(browser.id.clone(), id);
        self.seen_browsers.push(browser.clone());
        Ok(id)
    }

    /// The first result from each browser carries that browser's expected
    /// spec total. Once every browser announced at run start has been seen,
    /// emit the run-wide count exactly once.
    fn account_test_total(&mut self, browser: &BrowserInfo) -> Result<()> {
        if !self.counted_browsers.insert(browser.id.clone()) {
            return Ok(());
        }
        if let Some(total) = browser.expected_total {
            self.total_test_count += total;
        }
        self.unchecked_browsers = self.unchecked_browsers.saturating_sub(1);
        if self.unchecked_browsers == 0 {
            let line = message::test_count_line(self.total_test_count);
            self.tree_mut()?.write_raw(&line)?;
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        match (self.tree.as_mut(), self.sink.as_mut()) {
            (Some(tree), _) => tree.write_raw(line),
            (None, Some(sink)) => {
                sink.write_line(line)?;
                Ok(())
            }
            (None, None) => Err(Error::structure("output sink detached")),
        }
    }
}

/// Walk the suite chain under `browser_node`, creating the missing suffix.
///
/// A missing name in the chain is a runner defect: log it, write one
/// diagnostic line to the stream and continue with the remaining names.
/// Returns the innermost suite node and the created path names.
fn walk_suite_chain(
    tree: &mut Tree,
    browser_node: NodeId,
    chain: &[Option<String>],
) -> Result<(NodeId, Vec<String>)> {
    let mut node = browser_node;
    let mut path: Vec<String> = Vec::new();
    for name in chain {
        match name {
            None => {
                warn!("suite name missing in result chain; skipping element");
                tree.write_raw(message::MISSING_SUITE_NAME)?;
            }
            Some(name) => {
                path.push(name.clone());
                let hint = path.join(".");
                node = tree.find_or_create_suite(node, name, NodeKind::Suite, Some(hint))?;
            }
        }
    }
    Ok((node, path))
}
