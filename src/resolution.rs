//! Symbol-keyed dependency graph of deferred link steps.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;

use tracing::trace;

use crate::error::*;
use crate::error_msg::DUPLICATE_SYMBOL;

/// A symbol, the symbols it depends on, and the step to run once they are resolved.
#[derive(Debug)]
pub struct Resolver<S, A> {
    pub sym: S,
    pub dependencies: Vec<S>,
    pub action: A,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Resolvers in registration order. A symbol has at most one resolver.
#[derive(Debug)]
pub struct ResolutionDag<S, A> {
    resolvers: Vec<Resolver<S, A>>,
    index: HashMap<S, usize>,
}

impl<S, A> Default for ResolutionDag<S, A> {
    fn default() -> Self { Self { resolvers: Vec::new(), index: HashMap::new() } }
}

impl<S: Clone + Eq + Hash + Display, A> ResolutionDag<S, A> {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.resolvers.len() }

    pub fn is_empty(&self) -> bool { self.resolvers.is_empty() }

    pub fn contains(&self, sym: &S) -> bool { self.index.contains_key(sym) }

    /// Registers the resolver of `sym`. A symbol that already has a resolver is
    /// rejected and the graph is left unchanged.
    pub fn resolve_later(&mut self, sym: S, dependencies: Vec<S>, action: A) -> Result<(), Error> {
        if self.index.contains_key(&sym) { return link(DUPLICATE_SYMBOL, sym.to_string()); }
        self.index.insert(sym.clone(), self.resolvers.len());
        self.resolvers.push(Resolver { sym, dependencies, action });
        Ok(())
    }

    /// Orders every resolver after its dependencies and empties the graph.
    /// Dependencies without a resolver are skipped. On a cycle the graph is
    /// left untouched and the error lists the chain, ending with the repeated symbol.
    pub fn toposort(&mut self) -> Result<Vec<Resolver<S, A>>, Error> {
        let mut marks = vec![Mark::Unvisited; self.resolvers.len()];
        let mut order = Vec::with_capacity(self.resolvers.len());
        for root in 0..self.resolvers.len() {
            self.visit(root, &mut marks, &mut order)?;
        }
        trace!(target: "wabc::linker", resolvers = order.len(), "sorted resolution graph");

        self.index.clear();
        let mut slots: Vec<Option<Resolver<S, A>>> = std::mem::take(&mut self.resolvers).into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    fn visit(&self, root: usize, marks: &mut [Mark], order: &mut Vec<usize>) -> Result<(), Error> {
        if marks[root] != Mark::Unvisited { return Ok(()); }
        marks[root] = Mark::InProgress;
        // (node, next dependency to look at)
        let mut stack = vec![(root, 0usize)];
        while let Some(top) = stack.last_mut() {
            let (node, next) = *top;
            top.1 += 1;
            let Some(dep) = self.resolvers[node].dependencies.get(next) else {
                marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
                continue;
            };
            let Some(&d) = self.index.get(dep) else { continue };
            match marks[d] {
                Mark::Done => {}
                Mark::InProgress => {
                    let mut chain: Vec<String> = stack.iter().map(|(n, _)| self.resolvers[*n].sym.to_string()).collect();
                    chain.push(dep.to_string());
                    return Err(Error::CyclicDependency(chain));
                }
                Mark::Unvisited => {
                    marks[d] = Mark::InProgress;
                    stack.push((d, 0));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag(edges: &[(&'static str, &[&'static str])]) -> ResolutionDag<&'static str, &'static str> {
        let mut dag = ResolutionDag::new();
        for (sym, deps) in edges {
            dag.resolve_later(*sym, deps.to_vec(), *sym).unwrap();
        }
        dag
    }

    #[test]
    fn dependencies_come_first() {
        let mut d = dag(&[("call", &["import"]), ("import", &["export"]), ("export", &["code"]), ("code", &[])]);
        let order: Vec<_> = d.toposort().unwrap().into_iter().map(|r| r.action).collect();
        assert_eq!(order, ["code", "export", "import", "call"]);
        assert!(d.is_empty());
    }

    #[test]
    fn missing_dependencies_are_skipped() {
        let mut d = dag(&[("a", &["nowhere"]), ("b", &["a"])]);
        let order: Vec<_> = d.toposort().unwrap().into_iter().map(|r| r.sym).collect();
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn shared_dependency_runs_once() {
        let mut d = dag(&[("x", &["base"]), ("y", &["base", "x"]), ("base", &[])]);
        let order: Vec<_> = d.toposort().unwrap().into_iter().map(|r| r.sym).collect();
        assert_eq!(order, ["base", "x", "y"]);
    }

    #[test]
    fn cycle_reports_chain_and_runs_nothing() {
        let mut d = dag(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        let mut ran = Vec::new();
        match d.toposort() {
            Ok(sorted) => sorted.into_iter().for_each(|r| ran.push(r.action)),
            Err(Error::CyclicDependency(chain)) => assert_eq!(chain, ["A", "B", "C", "A"]),
            Err(e) => panic!("unexpected error {e}"),
        }
        assert!(ran.is_empty());
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn duplicate_symbol_is_rejected() {
        let mut d = dag(&[("a", &[]), ("b", &["a"])]);
        let err = d.resolve_later("a", vec!["b"], "again").unwrap_err();
        assert_eq!(err, Error::Link { msg: DUPLICATE_SYMBOL, detail: "a".into() });
        assert_eq!(d.len(), 2);
        let order: Vec<_> = d.toposort().unwrap().into_iter().map(|r| r.action).collect();
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut d = dag(&[("ok", &[]), ("self", &["self"])]);
        let err = d.toposort().unwrap_err();
        assert_eq!(err, Error::CyclicDependency(vec!["self".into(), "self".into()]));
    }
}
