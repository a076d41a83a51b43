mod diagnostics;
#[cfg(feature = "server")]
pub(crate) mod http;
#[cfg(feature = "live")]
pub(crate) mod reload;
#[cfg(feature = "live")]
pub(crate) mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Pipeline, TaskContext};
use crate::notifier::Notifier;
use crate::utils::{STYLE_PIPELINE, STYLE_TASK};
use crate::Environment;

pub use diagnostics::{Execution, Outcome, Report};

/// This function executes the task graph using a thread pool. Steps are
/// started as soon as every sequential predecessor has completed.
///
/// The algorithm works as follows:
/// 1. The number of incoming edges is counted for every step.
/// 2. Steps with no predecessors are spawned on the Rayon pool.
/// 3. The main thread waits for results on a channel.
/// 4. When a step succeeds, the counts of its successors are decremented and
///    any successor reaching zero is spawned.
/// 5. When a step fails, the error goes to the notifier and every successor
///    reachable from it is marked as skipped once it would have been ready.
/// 6. The loop continues until every step has an outcome.
///
/// Failures never escape this function, so a run always ends with a
/// [`Report`].
pub fn run(pipeline: &Pipeline, env: &Environment, notifier: &dyn Notifier) -> Report {
    let graph = &pipeline.graph;
    let total = graph.node_count();

    if total == 0 {
        return Report::default();
    }

    let mut pending: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|index| {
            let count = graph.neighbors_directed(index, Direction::Incoming).count();
            (index, count)
        })
        .collect();

    let mut outcomes: Vec<Option<Execution>> = (0..total).map(|_| None).collect();
    let mut blocked = HashSet::new();

    let root_span = tracing::span!(Level::INFO, "pipeline");
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&STYLE_PIPELINE);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let start = Instant::now();

    // The scheduler loop blocks on the calling thread, never on a pool worker.
    rayon::in_place_scope(|s| {
        let (sender, receiver) = channel::<(NodeIndex, Execution)>();

        let spawn_task = |index: NodeIndex| {
            let task = graph[index].clone();
            let sender = sender.clone();

            s.spawn(move |_| {
                let name = task.name().to_string();

                let span = tracing::span!(Level::INFO, "task", name = %name);
                span.pb_set_style(&STYLE_TASK);
                span.pb_set_message(&format!("Running {name}"));
                let _enter = span.enter();

                let context = TaskContext {
                    env,
                    span: span.clone(),
                };

                let start = Instant::now();

                // A panic fails only this step.
                let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    task.execute(&context)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                let duration = start.elapsed();

                let outcome = match result {
                    Ok(()) => {
                        tracing::debug!(task = %name, ?duration, "finished");
                        Outcome::Done
                    }
                    Err(err) => {
                        notifier.notify(&name, &err);
                        Outcome::Failed(format!("{err:#}"))
                    }
                };

                let execution = Execution {
                    name,
                    outcome,
                    duration,
                };

                // The receiver outlives every spawned task.
                sender.send((index, execution)).ok();
            });
        };

        // Seed initial tasks
        let mut roots: Vec<_> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(index, _)| *index)
            .collect();
        roots.sort();

        for index in roots {
            spawn_task(index);
        }

        let mut completed = 0;

        while completed < total {
            let Ok((index, execution)) = receiver.recv() else {
                break;
            };

            let failed = !execution.is_done();
            outcomes[index.index()] = Some(execution);
            completed += 1;
            root_span.pb_inc(1);

            // Unlock dependents, cascading skips below a failure.
            let mut stack = vec![(index, failed)];

            while let Some((node, poisoned)) = stack.pop() {
                for next in graph.neighbors_directed(node, Direction::Outgoing) {
                    if poisoned {
                        blocked.insert(next);
                    }

                    let Some(count) = pending.get_mut(&next) else {
                        continue;
                    };

                    *count -= 1;
                    if *count > 0 {
                        continue;
                    }

                    if blocked.contains(&next) {
                        outcomes[next.index()] = Some(Execution {
                            name: graph[next].name().to_string(),
                            outcome: Outcome::Skipped,
                            duration: Duration::ZERO,
                        });
                        completed += 1;
                        root_span.pb_inc(1);
                        stack.push((next, true));
                    } else {
                        spawn_task(next);
                    }
                }
            }
        }
    });

    let report = Report {
        executions: outcomes.into_iter().flatten().collect(),
        elapsed: start.elapsed(),
    };

    tracing::info!(
        "Finished {} tasks, {} failed {}",
        report.executions.len(),
        report.failed().count(),
        crate::utils::as_overhead(start)
    );

    report
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::core::{Layout, Mode};
    use crate::engine::testing::probe;
    use crate::engine::{Flow, Task};
    use crate::notifier::testing::RecordingNotifier;

    fn env() -> Environment {
        Environment::new(Mode::Build, Layout::default())
    }

    #[test]
    fn test_series_runs_in_order() {
        let journal = Arc::new(Mutex::new(vec![]));
        let flow = Flow::series([
            probe("a", &journal, false),
            probe("b", &journal, false),
            probe("c", &journal, false),
        ]);

        let notifier = RecordingNotifier::default();
        let report = run(&flow.compile(), &env(), &notifier);

        assert!(report.is_success());
        assert_eq!(*journal.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parallel_runs_every_sibling() {
        let journal = Arc::new(Mutex::new(vec![]));
        let flow = Flow::parallel([
            probe("a", &journal, false),
            probe("b", &journal, false),
            probe("c", &journal, false),
            probe("d", &journal, false),
        ]);

        let notifier = RecordingNotifier::default();
        let report = run(&flow.compile(), &env(), &notifier);

        let mut ran = journal.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, vec!["a", "b", "c", "d"]);
        assert_eq!(report.executions.len(), 4);
    }

    #[test]
    fn test_failure_skips_successors_but_not_siblings() {
        let journal = Arc::new(Mutex::new(vec![]));
        let flow = Flow::parallel([
            Flow::series([probe("css", &journal, true), probe("reload", &journal, false)]),
            Flow::series([probe("js", &journal, false), probe("reload-js", &journal, false)]),
        ]);

        let notifier = RecordingNotifier::default();
        let report = run(&flow.compile(), &env(), &notifier);

        assert!(matches!(report.get("css").unwrap().outcome, Outcome::Failed(_)));
        assert!(matches!(report.get("reload").unwrap().outcome, Outcome::Skipped));
        assert!(report.get("js").unwrap().is_done());
        assert!(report.get("reload-js").unwrap().is_done());

        assert!(!journal.lock().unwrap().contains(&"reload"));
        assert_eq!(notifier.steps(), vec!["css"]);
    }

    #[test]
    fn test_skips_cascade_through_chain() {
        let journal = Arc::new(Mutex::new(vec![]));
        let flow = Flow::series([
            probe("a", &journal, true),
            probe("b", &journal, false),
            probe("c", &journal, false),
        ]);

        let notifier = RecordingNotifier::default();
        let report = run(&flow.compile(), &env(), &notifier);

        assert_eq!(report.executions.len(), 3);
        assert!(matches!(report.get("b").unwrap().outcome, Outcome::Skipped));
        assert!(matches!(report.get("c").unwrap().outcome, Outcome::Skipped));
        assert_eq!(*journal.lock().unwrap(), vec!["a"]);
    }

    struct Panics;

    impl Task for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn execute(&self, _: &TaskContext) -> anyhow::Result<()> {
            panic!("boom");
        }
    }

    #[test]
    fn test_panic_is_reported_as_failure() {
        let notifier = RecordingNotifier::default();
        let report = run(&Flow::task(Panics).compile(), &env(), &notifier);

        match &report.get("panics").unwrap().outcome {
            Outcome::Failed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(notifier.steps(), vec!["panics"]);
    }

    #[test]
    fn test_empty_pipeline() {
        let notifier = RecordingNotifier::default();
        let report = run(&Flow::parallel([]).compile(), &env(), &notifier);

        assert!(report.executions.is_empty());
        assert!(report.is_success());
    }
}
