use by_address::ByThinAddress;
use std::collections::HashMap;

use crate::graph::Node;

/// Assigns short names to values in the order they are first seen.
pub struct NameEnv<'t, K: ?Sized> {
    names: HashMap<ByThinAddress<&'t K>, String>,
    namer: fn(usize) -> String,
}

impl<'t, K: ?Sized> NameEnv<'t, K> {
    /// Names values `%0`, `%1`, ...
    pub fn new() -> Self {
        Self::with_namer(|i| format!("%{i}"))
    }

    pub fn with_namer(namer: fn(usize) -> String) -> Self {
        NameEnv {
            names: HashMap::new(),
            namer,
        }
    }

    pub fn name(&mut self, value: &'t K) -> &str {
        let cnt = self.names.len();
        let namer = self.namer;
        self.names
            .entry(ByThinAddress(value))
            .or_insert_with(|| namer(cnt))
    }

    pub fn get_name(&self, value: &'t K) -> Option<&str> {
        self.names.get(&ByThinAddress(value)).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<'t, K: ?Sized> Default for NameEnv<'t, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'t> NameEnv<'t, Node> {
    /// The assigned name, or the node's id if it was never named.
    pub fn get_name_or_display(&self, node: &'t Node) -> String {
        match self.get_name(node) {
            Some(name) => name.to_owned(),
            None => node.id().to_string(),
        }
    }
}
