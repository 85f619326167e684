//! Static checks on a task graph.
//!
//! The tree of series/parallel compositions is lowered into a happens-before
//! DAG: every leaf gets a start and an end point, a series links the end of
//! each member to the start of the next, and a parallel fans out from a fork
//! point into a join point. Task `a` is guaranteed to complete before `b`
//! starts exactly when `end(a)` reaches `start(b)`.

use std::fmt::Write;
use std::sync::Arc;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::engine::{Effect, Node, Task};
use crate::error::GraphError;

#[derive(Debug, Clone, Copy)]
enum Point {
    Start(usize),
    End(usize),
    Fork,
    Join,
}

struct Leaf<'a> {
    task: &'a Arc<dyn Task>,
    start: NodeIndex,
    end: NodeIndex,
}

struct Lowered<'a> {
    graph: DiGraph<Point, ()>,
    leaves: Vec<Leaf<'a>>,
}

impl<'a> Lowered<'a> {
    fn new(node: &'a Node) -> Result<Self, GraphError> {
        let mut lowered = Self {
            graph: DiGraph::new(),
            leaves: Vec::new(),
        };

        lowered.lower(node)?;
        Ok(lowered)
    }

    /// Returns the entry and exit points of the lowered node.
    fn lower(&mut self, node: &'a Node) -> Result<(NodeIndex, NodeIndex), GraphError> {
        match node {
            Node::Task(task) => {
                let i = self.leaves.len();
                let start = self.graph.add_node(Point::Start(i));
                let end = self.graph.add_node(Point::End(i));
                self.graph.add_edge(start, end, ());
                self.leaves.push(Leaf { task, start, end });
                Ok((start, end))
            }
            Node::Sequence(nodes) => {
                let mut bounds: Option<(NodeIndex, NodeIndex)> = None;

                for node in nodes {
                    let (entry, exit) = self.lower(node)?;
                    bounds = Some(match bounds {
                        None => (entry, exit),
                        Some((first, last)) => {
                            self.graph.add_edge(last, entry, ());
                            (first, exit)
                        }
                    });
                }

                bounds.ok_or(GraphError::Empty("series"))
            }
            Node::Concurrent(nodes) => {
                if nodes.is_empty() {
                    return Err(GraphError::Empty("parallel"));
                }

                let fork = self.graph.add_node(Point::Fork);
                let join = self.graph.add_node(Point::Join);

                for node in nodes {
                    let (entry, exit) = self.lower(node)?;
                    self.graph.add_edge(fork, entry, ());
                    self.graph.add_edge(exit, join, ());
                }

                Ok((fork, join))
            }
        }
    }

    fn completes_before(&self, a: &Leaf, b: &Leaf) -> bool {
        has_path_connecting(&self.graph, a.end, b.start, None)
    }

    fn with_effect(&self, effects: &[Effect]) -> impl Iterator<Item = &Leaf<'a>> {
        self.leaves
            .iter()
            .filter(move |leaf| effects.contains(&leaf.task.effect()))
    }

    fn require(&self, before: &Leaf, after: &Leaf) -> Result<(), GraphError> {
        if self.completes_before(before, after) {
            Ok(())
        } else {
            Err(GraphError::Unordered {
                before: before.task.name(),
                after: after.task.name(),
            })
        }
    }
}

/// Checks a graph before it runs.
///
/// Rejects empty compositions and cycles, and enforces the ordering the
/// pipelines rely on:
/// - a mode task completes before every other task starts,
/// - `clean` completes before any task writing into the output root starts,
/// - the server starts after every task that cleans or writes has completed.
pub fn validate(node: &Node) -> Result<(), GraphError> {
    let lowered = Lowered::new(node)?;

    toposort(&lowered.graph, None).map_err(|_| GraphError::Cycle)?;

    for mode in lowered.with_effect(&[Effect::Mode]) {
        for other in &lowered.leaves {
            if other.start != mode.start {
                lowered.require(mode, other)?;
            }
        }
    }

    for clean in lowered.with_effect(&[Effect::Clean]) {
        for writer in lowered.with_effect(&[Effect::Output]) {
            lowered.require(clean, writer)?;
        }
    }

    for server in lowered.with_effect(&[Effect::Serve]) {
        for writer in lowered.with_effect(&[Effect::Clean, Effect::Output, Effect::Source]) {
            lowered.require(writer, server)?;
        }
    }

    Ok(())
}

pub(crate) fn render_mermaid(node: &Node, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let lowered = match Lowered::new(node) {
        Ok(lowered) => lowered,
        Err(e) => return writeln!(f, "%% invalid graph: {e}"),
    };

    let id = |index: NodeIndex| match lowered.graph[index] {
        Point::Start(i) | Point::End(i) => format!("t{i}"),
        Point::Fork | Point::Join => format!("p{}", index.index()),
    };

    let mut acc = String::new();
    writeln!(acc, "graph LR")?;

    for (i, leaf) in lowered.leaves.iter().enumerate() {
        let name = leaf.task.name().replace('"', "\\\"");
        writeln!(acc, "    t{i}[\"{name}\"]")?;
    }

    for index in lowered.graph.node_indices() {
        if let Point::Fork | Point::Join = lowered.graph[index] {
            writeln!(acc, "    {}((\" \"))", id(index))?;
        }
    }

    for edge in lowered.graph.raw_edges() {
        let (source, target) = (edge.source(), edge.target());
        if let (Point::Start(a), Point::End(b)) = (lowered.graph[source], lowered.graph[target])
            && a == b
        {
            continue;
        }

        writeln!(acc, "    {} --> {}", id(source), id(target))?;
    }

    f.write_str(&acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{parallel, series};

    fn leaf(name: &'static str, effect: Effect) -> Node {
        Node::from_fn(name, effect, |_| Ok(()))
    }

    #[test]
    fn test_valid_series() {
        let graph = series([
            leaf("mode", Effect::Mode),
            leaf("clean", Effect::Clean),
            leaf("html", Effect::Output),
            leaf("server", Effect::Serve),
        ]);

        assert_eq!(validate(&graph), Ok(()));
    }

    #[test]
    fn test_empty_compositions() {
        assert_eq!(validate(&series([])), Err(GraphError::Empty("series")));
        assert_eq!(
            validate(&series([leaf("a", Effect::Output), parallel([])])),
            Err(GraphError::Empty("parallel"))
        );
    }

    #[test]
    fn test_clean_concurrent_with_writer() {
        let graph = parallel([leaf("clean", Effect::Clean), leaf("html", Effect::Output)]);

        assert_eq!(
            validate(&graph),
            Err(GraphError::Unordered {
                before: "clean",
                after: "html"
            })
        );
    }

    #[test]
    fn test_clean_after_writer() {
        let graph = series([leaf("html", Effect::Output), leaf("clean", Effect::Clean)]);
        assert!(validate(&graph).is_err());
    }

    #[test]
    fn test_server_before_writer() {
        let graph = series([
            leaf("clean", Effect::Clean),
            leaf("server", Effect::Serve),
            leaf("images", Effect::Output),
        ]);

        assert_eq!(
            validate(&graph),
            Err(GraphError::Unordered {
                before: "images",
                after: "server"
            })
        );
    }

    #[test]
    fn test_parallel_branches_are_independent() {
        // Watchers run next to the build, they neither write nor serve.
        let graph = parallel([
            series([
                leaf("clean", Effect::Clean),
                parallel([leaf("html", Effect::Output), leaf("styles", Effect::Output)]),
                leaf("server", Effect::Serve),
            ]),
            leaf("watch", Effect::Watch),
        ]);

        assert_eq!(validate(&graph), Ok(()));
    }

    #[test]
    fn test_mode_must_come_first() {
        let graph = series([leaf("clean", Effect::Clean), leaf("mode", Effect::Mode)]);

        assert_eq!(
            validate(&graph),
            Err(GraphError::Unordered {
                before: "mode",
                after: "clean"
            })
        );
    }

    #[test]
    fn test_render_mermaid() {
        let graph = parallel([
            series([leaf("clean", Effect::Clean), leaf("html", Effect::Output)]),
            leaf("watch", Effect::Watch),
        ]);

        let out = graph.to_string();
        assert!(out.starts_with("graph LR\n"));
        assert!(out.contains("t0[\"clean\"]"));
        assert!(out.contains("t0 --> t1"));
        assert!(!out.contains("t0 --> t0"));
    }
}
