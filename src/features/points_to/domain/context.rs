//! Origin-sensitive calling contexts.
//!
//! A context is the interned string of origin call sites (thread spawns)
//! on the path from the entry function. Ordinary calls do not grow the
//! context, which keeps the context space proportional to the thread
//! structure of the program rather than its call depth.

use crate::shared::models::InstId;
use rustc_hash::FxHashMap;

pub type CtxId = u32;

/// The empty context of the entry function.
pub const ROOT_CTX: CtxId = 0;

#[derive(Debug)]
pub struct ContextTable {
    contexts: Vec<Vec<InstId>>,
    index: FxHashMap<Vec<InstId>, CtxId>,
}

impl Default for ContextTable {
    fn default() -> Self {
        let root = Vec::new();
        let mut index = FxHashMap::default();
        index.insert(root.clone(), ROOT_CTX);
        Self {
            contexts: vec![root],
            index,
        }
    }
}

impl ContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend `parent` with an origin call site, interning the result.
    pub fn evolve(&mut self, parent: CtxId, site: InstId) -> CtxId {
        let mut sites = self.contexts[parent as usize].clone();
        sites.push(site);
        if let Some(&existing) = self.index.get(&sites) {
            return existing;
        }
        let id = self.contexts.len() as CtxId;
        self.index.insert(sites.clone(), id);
        self.contexts.push(sites);
        id
    }

    pub fn sites(&self, ctx: CtxId) -> &[InstId] {
        &self.contexts[ctx as usize]
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the root context always exists
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evolution_is_interned() {
        let mut table = ContextTable::new();
        let a = table.evolve(ROOT_CTX, 7);
        let b = table.evolve(ROOT_CTX, 7);
        assert_eq!(a, b);
        let nested = table.evolve(a, 9);
        assert_ne!(nested, a);
        assert_eq!(table.sites(nested), &[7, 9]);
        assert_eq!(table.len(), 3);
    }
}
