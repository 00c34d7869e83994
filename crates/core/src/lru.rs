//! Most-recently-used-first eviction list over URL keys.
//!
//! Nodes live in a map keyed by the URL itself and point at their neighbours
//! by key, so the whole chain serializes as plain data.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruNode {
    pub url: String,
    pub previous: Option<String>,
    pub next: Option<String>,
}

/// Persisted form of an [`EvictionList`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LruState {
    pub head: Option<String>,
    pub tail: Option<String>,
    pub map: HashMap<String, LruNode>,
    pub count: usize,
}

impl LruState {
    /// Keys reachable from the head, stopping at a missing node or a cycle.
    fn reachable(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.head.as_deref();
        while let Some(url) = cursor {
            let Some(node) = self.map.get(url) else {
                break;
            };
            if node.url != url || !seen.insert(url) {
                break;
            }
            order.push(url.to_string());
            cursor = node.next.as_deref();
        }
        order
    }

    /// Whether the chain visits every node once with matching back links.
    pub fn is_consistent(&self) -> bool {
        let order = self.reachable();
        if order.len() != self.map.len() || self.count != self.map.len() {
            return false;
        }
        if self.tail.as_deref() != order.last().map(String::as_str) {
            return false;
        }
        let mut previous: Option<&str> = None;
        for url in &order {
            if self.map[url].previous.as_deref() != previous {
                return false;
            }
            previous = Some(url);
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvictionList {
    state: LruState,
}

impl EvictionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a persisted chain. A chain whose links, tail or count
    /// disagree with its nodes is rebuilt: reachable keys keep their order
    /// and stray nodes are appended as least recently used.
    pub fn from_state(state: LruState) -> Self {
        if state.is_consistent() {
            return Self { state };
        }

        let mut order = state.reachable();
        let seen: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut stray: Vec<String> = state.map.keys().filter(|k| !seen.contains(k.as_str())).cloned().collect();
        stray.sort();
        order.extend(stray);

        let mut list = Self::new();
        for url in order.iter().rev() {
            list.promote(url);
        }
        list
    }

    pub fn state(&self) -> &LruState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.count
    }

    pub fn is_empty(&self) -> bool {
        self.state.count == 0
    }

    pub fn contains(&self, url: &str) -> bool {
        self.state.map.contains_key(url)
    }

    /// Most recently used key.
    pub fn head(&self) -> Option<&str> {
        self.state.head.as_deref()
    }

    /// Remove and return the least recently used key.
    pub fn evict_tail(&mut self) -> Option<String> {
        let url = self.state.tail.clone()?;
        self.remove(&url);
        Some(url)
    }

    /// Unlink `url`. Returns whether it was present.
    pub fn remove(&mut self, url: &str) -> bool {
        let Some(node) = self.state.map.remove(url) else {
            return false;
        };

        match &node.previous {
            Some(prev) => {
                if let Some(p) = self.state.map.get_mut(prev) {
                    p.next = node.next.clone();
                }
            }
            None => self.state.head = node.next.clone(),
        }

        match &node.next {
            Some(next) => {
                if let Some(n) = self.state.map.get_mut(next) {
                    n.previous = node.previous.clone();
                }
            }
            None => self.state.tail = node.previous.clone(),
        }

        self.state.count = self.state.count.saturating_sub(1);
        true
    }

    /// Move `url` to the head, inserting it when absent.
    pub fn promote(&mut self, url: &str) {
        if self.state.head.as_deref() == Some(url) {
            return;
        }
        self.remove(url);

        let old_head = self.state.head.replace(url.to_string());
        if let Some(head) = &old_head {
            if let Some(h) = self.state.map.get_mut(head) {
                h.previous = Some(url.to_string());
            }
        }
        if self.state.tail.is_none() {
            self.state.tail = Some(url.to_string());
        }

        self.state.map.insert(
            url.to_string(),
            LruNode { url: url.to_string(), previous: None, next: old_head },
        );
        self.state.count += 1;
    }

    /// Keys from most to least recently used.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let mut cursor = self.state.head.as_deref();
        std::iter::from_fn(move || {
            let url = cursor?;
            cursor = self.state.map.get(url).and_then(|n| n.next.as_deref());
            Some(url)
        })
    }
}
