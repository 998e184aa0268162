//! Dependency resolution over registered plugins.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// One declared dependency of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dependency {
    /// Index of a registered plugin.
    Known(usize),
    /// A name no registered plugin has.
    Missing(String),
}

/// Why a plugin's dependency closure could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolveError {
    Missing { plugin: usize, dependency: String },
    /// Node indices along the cycle, first and last equal.
    Cycle(Vec<usize>),
}

/// Dependency edges between plugins, indexed by registration order.
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    deps: Vec<Vec<Dependency>>,
}

impl DependencyGraph {
    /// Builds the graph from `(name, depends_on)` pairs in registration order.
    pub(crate) fn new<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Vec<String>)>,
    {
        let nodes: Vec<(&str, Vec<String>)> = nodes.into_iter().collect();
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (*name, i))
            .collect();

        let deps = nodes
            .iter()
            .map(|(_, depends_on)| {
                depends_on
                    .iter()
                    .map(|dep| match index.get(dep.as_str()) {
                        Some(&j) => Dependency::Known(j),
                        None => Dependency::Missing(dep.clone()),
                    })
                    .collect()
            })
            .collect();

        Self { deps }
    }

    pub(crate) fn len(&self) -> usize {
        self.deps.len()
    }

    pub(crate) fn dependencies(&self, node: usize) -> &[Dependency] {
        &self.deps[node]
    }

    /// Returns `root` and everything it transitively depends on, in install
    /// order (dependencies first, registration order among independent
    /// nodes).
    pub(crate) fn closure(&self, root: usize) -> Result<Vec<usize>, ResolveError> {
        let mut included = vec![false; self.len()];
        let mut on_stack = vec![false; self.len()];
        let mut stack = Vec::new();
        self.visit(root, &mut included, &mut on_stack, &mut stack)?;
        let (order, _) = self.order(|i| included[i]);
        Ok(order)
    }

    fn visit(
        &self,
        node: usize,
        included: &mut [bool],
        on_stack: &mut [bool],
        stack: &mut Vec<usize>,
    ) -> Result<(), ResolveError> {
        if on_stack[node] {
            let start = stack.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = stack[start..].to_vec();
            cycle.push(node);
            return Err(ResolveError::Cycle(cycle));
        }
        if included[node] {
            return Ok(());
        }

        on_stack[node] = true;
        stack.push(node);
        for dep in &self.deps[node] {
            match dep {
                Dependency::Known(j) => self.visit(*j, included, on_stack, stack)?,
                Dependency::Missing(name) => {
                    return Err(ResolveError::Missing {
                        plugin: node,
                        dependency: name.clone(),
                    });
                }
            }
        }
        stack.pop();
        on_stack[node] = false;
        included[node] = true;
        Ok(())
    }

    /// Kahn's algorithm over the nodes selected by `include`.
    ///
    /// Among nodes whose dependencies are all placed, the one registered
    /// first goes next. Returns the order and the selected nodes that could
    /// not be placed because they sit on or behind a cycle. Missing
    /// dependencies do not constrain the order.
    pub(crate) fn order(&self, include: impl Fn(usize) -> bool) -> (Vec<usize>, Vec<usize>) {
        let n = self.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for i in (0..n).filter(|&i| include(i)) {
            for dep in &self.deps[i] {
                if let Dependency::Known(j) = dep
                    && include(*j)
                {
                    dependents[*j].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| include(i) && in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::new();

        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }

        let blocked = (0..n)
            .filter(|&i| include(i) && in_degree[i] > 0)
            .collect();
        (order, blocked)
    }

    /// Finds a cycle passing through `node`, if any.
    pub(crate) fn cycle_through(&self, node: usize) -> Option<Vec<usize>> {
        let mut path = vec![node];
        let mut seen = vec![false; self.len()];
        self.search_back(node, node, &mut path, &mut seen)
            .then_some(path)
    }

    fn search_back(&self, target: usize, current: usize, path: &mut Vec<usize>, seen: &mut [bool]) -> bool {
        for dep in &self.deps[current] {
            let Dependency::Known(j) = dep else { continue };
            if *j == target {
                path.push(target);
                return true;
            }
            if seen[*j] {
                continue;
            }
            seen[*j] = true;
            path.push(*j);
            if self.search_back(target, *j, path, seen) {
                return true;
            }
            path.pop();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[(&'static str, &[&str])]) -> DependencyGraph {
        DependencyGraph::new(
            nodes
                .iter()
                .map(|(name, deps)| (*name, deps.iter().map(|d| d.to_string()).collect())),
        )
    }

    #[test]
    fn test_order_respects_dependencies_and_registration() {
        // 0:p -> 1:q, 2:r independent, 1:q independent
        let g = graph(&[("p", &["q"]), ("q", &[]), ("r", &[])]);
        let (order, blocked) = g.order(|_| true);
        assert_eq!(order, vec![1, 0, 2]);
        assert!(blocked.is_empty());
    }

    #[test]
    fn test_closure_installs_dependencies_first() {
        let g = graph(&[("app", &["db", "log"]), ("log", &[]), ("db", &["log"]), ("extra", &[])]);
        assert_eq!(g.closure(0).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_closure_reports_cycle_path() {
        let g = graph(&[("p", &["q"]), ("q", &["p"])]);
        assert_eq!(g.closure(0), Err(ResolveError::Cycle(vec![0, 1, 0])));
    }

    #[test]
    fn test_closure_reports_missing() {
        let g = graph(&[("p", &["ghost"])]);
        assert_eq!(
            g.closure(0),
            Err(ResolveError::Missing {
                plugin: 0,
                dependency: "ghost".into()
            })
        );
    }

    #[test]
    fn test_blocked_nodes_and_cycles() {
        // a <-> b cycle, c depends on a, d free
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"]), ("d", &[])]);
        let (order, blocked) = g.order(|_| true);
        assert_eq!(order, vec![3]);
        assert_eq!(blocked, vec![0, 1, 2]);
        assert_eq!(g.cycle_through(0), Some(vec![0, 1, 0]));
        assert_eq!(g.cycle_through(2), None);
    }
}
