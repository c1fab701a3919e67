//! Test-run event tree
//!
//! Owns id allocation, the root (run/config) node, and the single output
//! sink every node writes through. Nodes live in a flat arena and reference
//! each other by [`NodeId`] handles; the node variant (suite vs leaf) is a
//! closed enum rather than an inheritance hierarchy.
//!
//! # Sequencing rules
//!
//! 1. A node's start line is written before its finish line and before any
//!    child's start line.
//! 2. The root's start is lazy: it is written the moment the first child
//!    under it starts (or immediately before the root's own finish if no
//!    child was ever created). Every other node starts at creation, so a
//!    non-root parent is always started before its children exist.
//! 3. Finishing a node first finishes its unfinished descendants,
//!    depth-first in creation order, then writes the node's own finish.
//!    Finishing twice is a no-op.

use std::collections::HashMap;

use specstream_common::{Error, NodeKind, Result, TestStatus};

use crate::message;

/// Sink receiving one encoded protocol line at a time.
///
/// The tree writes synchronously and in operation order; line order is the
/// protocol's core correctness property, so implementations must not
/// reorder.
pub trait MessageSink {
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

impl<F> MessageSink for F
where
    F: FnMut(&str) -> std::io::Result<()>,
{
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self(line)
    }
}

/// Handle to a node within one [`Tree`].
///
/// Ids are 1-based, unique within their tree, allocated in increasing order
/// and never reused. Handles are only meaningful for the tree that minted
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// The run/config scope node, always the first node of a tree.
    pub const ROOT: NodeId = NodeId(1);

    /// Numeric id as it appears on the wire.
    pub fn get(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// Final outcome of a leaf node, set exactly once before its finish.
#[derive(Debug, Clone)]
pub struct LeafOutcome {
    pub status: TestStatus,
    pub duration_ms: Option<u64>,
    pub failure: Option<String>,
}

/// Variant-specific node state.
#[derive(Debug)]
enum NodeBody {
    Suite {
        /// Creation order, which is also cascade-finish order
        children: Vec<NodeId>,
        /// Name-indexed children for idempotent find-or-create
        by_name: HashMap<String, NodeId>,
    },
    Leaf {
        outcome: Option<LeafOutcome>,
    },
}

impl NodeBody {
    fn suite() -> Self {
        NodeBody::Suite {
            children: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    fn leaf() -> Self {
        NodeBody::Leaf { outcome: None }
    }
}

#[derive(Debug)]
struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    name: String,
    kind: NodeKind,
    location_hint: Option<String>,
    started: bool,
    finished: bool,
    body: NodeBody,
}

impl Node {
    fn is_suite(&self) -> bool {
        matches!(self.body, NodeBody::Suite { .. })
    }
}

/// The run-scoped node tree and its output sink.
pub struct Tree {
    nodes: Vec<Node>,
    sink: Box<dyn MessageSink>,
}

impl Tree {
    /// Create a tree whose root represents the run/config scope.
    ///
    /// The root takes id 1 and is not started yet (lazy start); `config_path`
    /// becomes its navigation hint.
    pub fn new(config_name: &str, config_path: Option<&str>, sink: Box<dyn MessageSink>) -> Self {
        let root = Node {
            id: NodeId::ROOT,
            parent: None,
            name: config_name.to_owned(),
            kind: NodeKind::Config,
            location_hint: config_path.map(str::to_owned),
            started: false,
            finished: false,
            body: NodeBody::suite(),
        };
        Self {
            nodes: vec![root],
            sink,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Look up a name-indexed child under `parent`.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        match &self.node(parent).body {
            NodeBody::Suite { by_name, .. } => by_name.get(name).copied(),
            NodeBody::Leaf { .. } => None,
        }
    }

    pub fn is_finished(&self, id: NodeId) -> bool {
        self.node(id).finished
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Idempotent suite lookup: returns the existing child with that name,
    /// or creates a suite node (emitting its start line) if none exists.
    pub fn find_or_create_suite(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        location_hint: Option<String>,
    ) -> Result<NodeId> {
        if let Some(existing) = self.find_child(parent, name) {
            if !self.node(existing).is_suite() {
                return Err(Error::structure(format!(
                    "'{}' already names a test node under node {}",
                    name,
                    parent.get()
                )));
            }
            return Ok(existing);
        }
        self.create_child(parent, name, kind, location_hint, NodeBody::suite(), true)
    }

    /// Create a suite node without indexing it by name.
    ///
    /// Used for browser nodes, which the controller keys by connection id:
    /// two browsers may carry the same display name and must stay distinct.
    pub fn create_suite(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        location_hint: Option<String>,
    ) -> Result<NodeId> {
        self.create_child(parent, name, kind, location_hint, NodeBody::suite(), false)
    }

    /// Create a leaf node, rejecting a duplicate name under the same parent.
    ///
    /// Emits the leaf's start line immediately.
    pub fn create_leaf(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        location_hint: Option<String>,
    ) -> Result<NodeId> {
        if self.find_child(parent, name).is_some() {
            return Err(Error::DuplicateNode {
                parent: parent.get(),
                name: name.to_owned(),
            });
        }
        self.create_child(parent, name, kind, location_hint, NodeBody::leaf(), true)
    }

    /// Create a synthetic, pre-finished error leaf.
    ///
    /// Used for browser-level harness errors that have no spec context.
    /// Not name-indexed: repeated harness errors under one browser are
    /// distinct occurrences, not duplicates.
    pub fn create_error_leaf(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        detail: &str,
    ) -> Result<NodeId> {
        let id = self.create_child(parent, name, kind, None, NodeBody::leaf(), false)?;
        self.set_status(id, TestStatus::Error, None, Some(detail.to_owned()))?;
        self.finish(id)?;
        Ok(id)
    }

    fn create_child(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        location_hint: Option<String>,
        body: NodeBody,
        index_by_name: bool,
    ) -> Result<NodeId> {
        let parent_node = self.node(parent);
        if parent_node.finished {
            return Err(Error::structure(format!(
                "node {} is finished; no children may be attached",
                parent.get()
            )));
        }
        if !parent_node.is_suite() {
            return Err(Error::structure(format!(
                "node {} is a test node and cannot have children",
                parent.get()
            )));
        }
        if !parent_node.started && parent != NodeId::ROOT {
            return Err(Error::structure(format!(
                "parent node {} must be started before children are created",
                parent.get()
            )));
        }

        let id = NodeId(self.nodes.len() as u64 + 1);
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            name: name.to_owned(),
            kind,
            location_hint,
            started: false,
            finished: false,
            body,
        });
        if let NodeBody::Suite { children, by_name } = &mut self.nodes[parent.index()].body {
            children.push(id);
            if index_by_name {
                by_name.insert(name.to_owned(), id);
            }
        }
        self.write_start(id)?;
        Ok(id)
    }

    /// Record a leaf's outcome. One-shot: a second call, or a call against a
    /// suite or an already-finished leaf, is a structural violation.
    pub fn set_status(
        &mut self,
        id: NodeId,
        status: TestStatus,
        duration_ms: Option<u64>,
        failure: Option<String>,
    ) -> Result<()> {
        let node = self.node_mut(id);
        if node.finished {
            return Err(Error::structure(format!(
                "test node {} is already finished",
                id.get()
            )));
        }
        match &mut node.body {
            NodeBody::Leaf { outcome } => {
                if outcome.is_some() {
                    return Err(Error::structure(format!(
                        "status already set for test node {}",
                        id.get()
                    )));
                }
                *outcome = Some(LeafOutcome {
                    status,
                    duration_ms,
                    failure,
                });
                Ok(())
            }
            NodeBody::Suite { .. } => Err(Error::structure(format!(
                "node {} is a suite; only test nodes carry a status",
                id.get()
            ))),
        }
    }

    /// Finish a node, cascading over unfinished descendants first.
    ///
    /// Idempotent. A leaf reaching this point without a status is a
    /// structural violation.
    pub fn finish(&mut self, id: NodeId) -> Result<()> {
        if self.node(id).finished {
            return Ok(());
        }
        if let NodeBody::Suite { children, .. } = &self.node(id).body {
            let children = children.clone();
            for child in children {
                self.finish(child)?;
            }
        }
        if !self.node(id).started {
            // only the root can still be unstarted here (lazy start); the
            // consumer must always see one well-formed pair for the run scope
            self.write_start(id)?;
        }
        let line = {
            let node = self.node(id);
            match &node.body {
                NodeBody::Suite { .. } => message::suite_finish_line(node.id.get()),
                NodeBody::Leaf { outcome } => {
                    let outcome = outcome.as_ref().ok_or_else(|| {
                        Error::structure(format!(
                            "test node {} finished without a status",
                            node.id.get()
                        ))
                    })?;
                    message::leaf_finish_line(
                        node.id.get(),
                        outcome.status,
                        outcome.duration_ms,
                        outcome.failure.as_deref(),
                    )
                }
            }
        };
        self.sink.write_line(&line)?;
        self.node_mut(id).finished = true;
        Ok(())
    }

    fn write_start(&mut self, id: NodeId) -> Result<()> {
        if self.node(id).started {
            return Ok(());
        }
        // Lazy-start rule: the root is conceptually ambient and starts the
        // moment the first message referencing it is due. Bounded to one
        // level; the root has no ancestor.
        if let Some(parent) = self.node(id).parent {
            if parent == NodeId::ROOT && !self.node(parent).started {
                self.write_start(parent)?;
            }
        }
        let line = {
            let node = self.node(id);
            message::start_line(
                node.id.get(),
                node.parent.map_or(0, NodeId::get),
                &node.name,
                node.kind,
                node.is_suite(),
                node.location_hint.as_deref(),
            )
        };
        self.sink.write_line(&line)?;
        self.node_mut(id).started = true;
        Ok(())
    }

    /// Write a pre-encoded line straight through the sink.
    ///
    /// Used by the run controller for lines that do not belong to a node:
    /// handshake, test count, diagnostics, forwarded browser logs.
    pub fn write_raw(&mut self, line: &str) -> Result<()> {
        self.sink.write_line(line)?;
        Ok(())
    }

    /// Tear down the tree, handing the sink back for the next run.
    pub fn into_sink(self) -> Box<dyn MessageSink> {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_tree() -> (Tree, Rc<RefCell<Vec<String>>>) {
        let lines: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = {
            let lines = lines.clone();
            move |line: &str| -> std::io::Result<()> {
                lines.borrow_mut().push(line.to_owned());
                Ok(())
            }
        };
        let tree = Tree::new("karma.conf.js", Some("/work/karma.conf.js"), Box::new(sink));
        (tree, lines)
    }

    #[test]
    fn root_start_is_deferred_until_first_child() {
        let (mut tree, lines) = recording_tree();
        assert!(lines.borrow().is_empty());

        let root = tree.root();
        tree.create_suite(root, "Chrome", NodeKind::Browser, None)
            .unwrap();

        let lines = lines.borrow();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("nodeId='1'"), "root start first: {}", lines[0]);
        assert!(lines[0].contains("parentNodeId='0'"));
        assert!(lines[1].contains("nodeId='2'"));
        assert!(lines[1].contains("parentNodeId='1'"));
    }

    #[test]
    fn childless_root_still_emits_start_before_finish() {
        let (mut tree, lines) = recording_tree();
        let root = tree.root();
        tree.finish(root).unwrap();

        let lines = lines.borrow();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("##teamcity[testSuiteStarted nodeId='1'"));
        assert!(lines[1].starts_with("##teamcity[testSuiteFinished nodeId='1'"));
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let (mut tree, lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();

        let first = tree
            .find_or_create_suite(browser, "Calc", NodeKind::Suite, Some("Calc".into()))
            .unwrap();
        let second = tree
            .find_or_create_suite(browser, "Calc", NodeKind::Suite, Some("Calc".into()))
            .unwrap();
        assert_eq!(first, second);

        let starts = lines
            .borrow()
            .iter()
            .filter(|l| l.contains("name='Calc'"))
            .count();
        assert_eq!(starts, 1, "one start line for one suite");
    }

    #[test]
    fn duplicate_leaf_is_rejected() {
        let (mut tree, _lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();

        tree.create_leaf(browser, "adds", NodeKind::Test, None).unwrap();
        let err = tree
            .create_leaf(browser, "adds", NodeKind::Test, None)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateNode { .. }), "got: {err}");
    }

    #[test]
    fn suite_lookup_rejects_name_taken_by_leaf() {
        let (mut tree, _lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();
        tree.create_leaf(browser, "adds", NodeKind::Test, None).unwrap();

        let err = tree
            .find_or_create_suite(browser, "adds", NodeKind::Suite, None)
            .unwrap_err();
        assert!(matches!(err, Error::Structure(_)));
    }

    #[test]
    fn no_children_after_finish() {
        let (mut tree, _lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();
        tree.finish(browser).unwrap();

        let err = tree
            .create_suite(browser, "Late", NodeKind::Suite, None)
            .unwrap_err();
        assert!(matches!(err, Error::Structure(_)));
    }

    #[test]
    fn finish_cascades_depth_first_in_creation_order() {
        let (mut tree, lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();
        let outer = tree
            .find_or_create_suite(browser, "Outer", NodeKind::Suite, None)
            .unwrap();
        let first = tree.create_leaf(outer, "first", NodeKind::Test, None).unwrap();
        let second = tree.create_leaf(outer, "second", NodeKind::Test, None).unwrap();
        tree.set_status(first, TestStatus::Success, Some(1), None).unwrap();
        tree.set_status(second, TestStatus::Success, Some(2), None).unwrap();

        tree.finish(root).unwrap();

        let finish_ids: Vec<u64> = lines
            .borrow()
            .iter()
            .filter(|l| l.contains("testFinished") || l.contains("testSuiteFinished"))
            .map(|l| {
                let start = l.find("nodeId='").unwrap() + 8;
                let end = l[start..].find('\'').unwrap() + start;
                l[start..end].parse().unwrap()
            })
            .collect();
        assert_eq!(
            finish_ids,
            vec![first.get(), second.get(), outer.get(), browser.get(), 1]
        );
        assert!(tree.is_finished(first));
        assert!(tree.is_finished(root));
    }

    #[test]
    fn finish_is_idempotent() {
        let (mut tree, lines) = recording_tree();
        let root = tree.root();
        tree.finish(root).unwrap();
        let count = lines.borrow().len();
        tree.finish(root).unwrap();
        assert_eq!(lines.borrow().len(), count);
    }

    #[test]
    fn leaf_finish_requires_status() {
        let (mut tree, _lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();
        let leaf = tree.create_leaf(browser, "adds", NodeKind::Test, None).unwrap();

        let err = tree.finish(leaf).unwrap_err();
        assert!(matches!(err, Error::Structure(_)), "got: {err}");
    }

    #[test]
    fn set_status_is_one_shot() {
        let (mut tree, _lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();
        let leaf = tree.create_leaf(browser, "adds", NodeKind::Test, None).unwrap();

        tree.set_status(leaf, TestStatus::Success, None, None).unwrap();
        let err = tree
            .set_status(leaf, TestStatus::Failed, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Structure(_)));
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let (mut tree, _lines) = recording_tree();
        let root = tree.root();
        let a = tree.create_suite(root, "A", NodeKind::Browser, None).unwrap();
        let b = tree.find_or_create_suite(a, "B", NodeKind::Suite, None).unwrap();
        let c = tree.create_leaf(b, "c", NodeKind::Test, None).unwrap();
        assert_eq!(a.get(), 2);
        assert_eq!(b.get(), 3);
        assert_eq!(c.get(), 4);

        assert_eq!(tree.parent(root), None);
        assert_eq!(tree.parent(a), Some(root));
        assert_eq!(tree.parent(b), Some(a));
        assert_eq!(tree.parent(c), Some(b));
    }

    #[test]
    fn error_leaf_is_pre_finished_with_marker() {
        let (mut tree, lines) = recording_tree();
        let root = tree.root();
        let browser = tree.create_suite(root, "Chrome", NodeKind::Browser, None).unwrap();
        let leaf = tree
            .create_error_leaf(browser, "Error", NodeKind::BrowserError, "disconnected")
            .unwrap();

        assert!(tree.is_finished(leaf));
        let lines = lines.borrow();
        let finish = lines.last().unwrap();
        assert!(finish.contains("testFailed"));
        assert!(finish.contains("error='yes'"));
        assert!(finish.contains("message='disconnected'"));
    }
}
