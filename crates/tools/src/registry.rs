//! The tool registry: a closed built-in set populated at startup, plus
//! runtime registration via an atomic swap of the snapshot pointer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Tool;

pub struct ToolRegistry {
    snapshot: RwLock<Arc<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let registry = Self::new();
        registry.replace_all(tools);
        registry
    }

    /// The current immutable snapshot. Dispatch works against one snapshot
    /// for its whole call, so a concurrent swap never tears a lookup.
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<dyn Tool>>> {
        self.snapshot.read().clone()
    }

    /// Register (or replace) one tool by copy-on-write swap.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let mut guard = self.snapshot.write();
        let mut next: HashMap<String, Arc<dyn Tool>> = (**guard).clone();
        next.insert(tool.name().to_string(), tool);
        *guard = Arc::new(next);
    }

    /// Swap in a complete new tool set.
    pub fn replace_all(&self, tools: Vec<Arc<dyn Tool>>) {
        let map: HashMap<String, Arc<dyn Tool>> = tools
            .into_iter()
            .map(|t| (t.name().to_string(), t))
            .collect();
        *self.snapshot.write() = Arc::new(map);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.snapshot.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
