//! The task graph.
//!
//! A [`Task`] is a named unit of work that writes files and returns nothing.
//! Tasks are composed with [`Flow`], which nests sequential and parallel
//! groups the way a task runner's `series` and `parallel` combinators do.
//! A flow is compiled into a [`Pipeline`], a directed acyclic graph whose edges
//! say "the target starts only after the source completed". Steps without a
//! path between them run concurrently.

mod runner;

use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::Environment;

pub use runner::{Execution, Outcome, Report, run};

#[cfg(feature = "server")]
pub(crate) use runner::http;
#[cfg(feature = "live")]
pub(crate) use runner::reload;
#[cfg(feature = "live")]
pub(crate) use runner::watch;

/// The context passed to every task execution.
pub struct TaskContext<'a> {
    /// Access to global configuration.
    pub env: &'a Environment,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
}

/// A unit of work in the pipeline.
pub trait Task: Send + Sync {
    /// Name shown in logs and reports.
    fn name(&self) -> &str;

    /// Runs the task to completion. Any error is handed to the notifier by
    /// the executor.
    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Dependency edge between two steps of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The target starts only after the source has completed.
    Sequential,
}

/// A composition of tasks.
#[derive(Clone)]
pub enum Flow {
    /// A single task.
    Step(Arc<dyn Task>),
    /// Every child starts after the previous one has completed.
    Series(Vec<Flow>),
    /// Every child starts independently.
    Parallel(Vec<Flow>),
}

impl Flow {
    pub fn task(task: impl Task + 'static) -> Self {
        Self::Step(Arc::new(task))
    }

    pub fn series(flows: impl IntoIterator<Item = Flow>) -> Self {
        Self::Series(flows.into_iter().collect())
    }

    pub fn parallel(flows: impl IntoIterator<Item = Flow>) -> Self {
        Self::Parallel(flows.into_iter().collect())
    }

    /// Compiles the composition into an executable graph.
    pub fn compile(&self) -> Pipeline {
        let mut graph = Graph::new();
        add_flow(&mut graph, self);
        Pipeline { graph }
    }
}

impl From<Arc<dyn Task>> for Flow {
    fn from(task: Arc<dyn Task>) -> Self {
        Self::Step(task)
    }
}

/// Entry and exit nodes of a compiled sub-flow.
#[derive(Default)]
struct Ends {
    sources: Vec<NodeIndex>,
    sinks: Vec<NodeIndex>,
}

fn add_flow(graph: &mut Graph<Arc<dyn Task>, Edge>, flow: &Flow) -> Ends {
    match flow {
        Flow::Step(task) => {
            let index = graph.add_node(task.clone());
            Ends {
                sources: vec![index],
                sinks: vec![index],
            }
        }
        Flow::Series(flows) => {
            let mut ends = Ends::default();

            for flow in flows {
                let next = add_flow(graph, flow);
                if next.sources.is_empty() {
                    continue;
                }

                if ends.sources.is_empty() {
                    ends.sources = next.sources.clone();
                }

                for &sink in &ends.sinks {
                    for &source in &next.sources {
                        graph.add_edge(sink, source, Edge::Sequential);
                    }
                }

                ends.sinks = next.sinks;
            }

            ends
        }
        Flow::Parallel(flows) => {
            let mut ends = Ends::default();

            for flow in flows {
                let next = add_flow(graph, flow);
                ends.sources.extend(next.sources);
                ends.sinks.extend(next.sinks);
            }

            ends
        }
    }
}

/// A compiled task graph, ready to be run by [`run`].
pub struct Pipeline {
    pub(crate) graph: Graph<Arc<dyn Task>, Edge>,
}

impl Pipeline {
    /// Number of steps in the graph.
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name().replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
