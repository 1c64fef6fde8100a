//! Namespace registry: a prefix trie keyed by dotted module path.
//!
//! Every loaded plugin owns one node. Registration calls are authorized by
//! resolving the caller's module path to the deepest plugin that is a prefix
//! of it, so code in `module.garden.timer` is attributed to the plugin at
//! `module.garden`.
//!
//! Empty nodes (no children, no payload) are pruned lazily: every walk that
//! descends through a node first drops its empty children. [`delete`] only
//! clears the payload and leaves the node for a later walk to collect.
//!
//! [`delete`]: NamespaceTree::delete

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct Node<T> {
    children: HashMap<String, Node<T>>,
    payload: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            payload: None,
        }
    }
}

impl<T> Node<T> {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.payload.is_none()
    }

    fn prune(&mut self) {
        self.children.retain(|_, child| !child.is_empty());
    }
}

/// Dotted-path trie with a cached flat snapshot.
pub struct NamespaceTree<T> {
    root: Node<T>,
    cache: Arc<BTreeMap<String, T>>,
    outdated: bool,
}

impl<T> Default for NamespaceTree<T> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            cache: Arc::new(BTreeMap::new()),
            outdated: false,
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}

impl<T: Clone> NamespaceTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `payload` at `path`, returning the previous payload.
    pub fn insert(&mut self, path: &str, payload: T) -> Option<T> {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node.prune();
            node = node.children.entry(seg.to_string()).or_default();
        }
        self.outdated = true;
        node.payload.replace(payload)
    }

    /// Returns the payload stored exactly at `path`.
    pub fn get(&self, path: &str) -> Option<&T> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.children.get(seg)?;
        }
        node.payload.as_ref()
    }

    /// Returns the payload stored exactly at `path` for mutation.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut T> {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node = node.children.get_mut(seg)?;
        }
        let payload = node.payload.as_mut()?;
        self.outdated = true;
        Some(payload)
    }

    /// Clears the payload at `path` and returns it.
    pub fn delete(&mut self, path: &str) -> Option<T> {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node.prune();
            node = node.children.get_mut(seg)?;
        }
        let payload = node.payload.take()?;
        self.outdated = true;
        Some(payload)
    }

    /// Finds the longest prefix of `path` that carries a payload.
    ///
    /// Returns the prefix itself and its payload, or `None` when no prefix of
    /// `path` (including the root) is registered.
    pub fn search(&mut self, path: &str) -> Option<(String, &T)> {
        let segs: Vec<&str> = segments(path).collect();
        let mut depth = self.root.payload.as_ref().map(|_| 0);

        let mut node = &mut self.root;
        for (i, seg) in segs.iter().enumerate() {
            node.prune();
            match node.children.get_mut(*seg) {
                Some(child) => {
                    node = child;
                    if node.payload.is_some() {
                        depth = Some(i + 1);
                    }
                }
                None => break,
            }
        }

        let prefix = segs[..depth?].join(".");
        let payload = self.get(&prefix)?;
        Some((prefix, payload))
    }

    /// Returns every payload keyed by its full path.
    ///
    /// The map is rebuilt only after a mutation.
    pub fn snapshot(&mut self) -> Arc<BTreeMap<String, T>> {
        if self.outdated {
            let mut map = BTreeMap::new();
            collect(&self.root, &mut Vec::new(), &mut map);
            self.cache = Arc::new(map);
            self.outdated = false;
        }
        Arc::clone(&self.cache)
    }
}

fn collect<'a, T: Clone>(node: &'a Node<T>, path: &mut Vec<&'a str>, out: &mut BTreeMap<String, T>) {
    if let Some(payload) = &node.payload {
        out.insert(path.join("."), payload.clone());
    }
    for (seg, child) in &node.children {
        path.push(seg);
        collect(child, path, out);
        path.pop();
    }
}
