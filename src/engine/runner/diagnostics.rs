use std::fmt::{Display, Formatter};
use std::time::Duration;

use console::style;

/// How a single step of a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The step ran to completion.
    Done,
    /// The step returned an error or panicked; the message is kept.
    Failed(String),
    /// The step never ran because a sequential predecessor failed.
    Skipped,
}

/// Outcome and timing of one step.
#[derive(Debug, Clone)]
pub struct Execution {
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

impl Execution {
    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }
}

/// Result of running a pipeline.
///
/// This struct is returned by every run and lists the steps in the order
/// they were added to the graph.
#[derive(Debug, Default)]
pub struct Report {
    pub executions: Vec<Execution>,
    pub elapsed: Duration,
}

impl Report {
    /// First step with the given name.
    pub fn get(&self, name: &str) -> Option<&Execution> {
        self.executions.iter().find(|exec| exec.name == name)
    }

    /// Number of steps with the given name that ran to completion.
    pub fn count_done(&self, name: &str) -> usize {
        self.executions
            .iter()
            .filter(|exec| exec.name == name && exec.is_done())
            .count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &Execution> {
        self.executions
            .iter()
            .filter(|exec| matches!(exec.outcome, Outcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.executions.iter().all(Execution::is_done)
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for exec in &self.executions {
            let status = match exec.outcome {
                Outcome::Done => style("done").green(),
                Outcome::Failed(_) => style("failed").red(),
                Outcome::Skipped => style("skipped").yellow(),
            };

            writeln!(f, "{:<10} {:<8} {:.2?}", exec.name, status, exec.duration)?;
        }

        write!(f, "total {:.2?}", self.elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(name: &str, outcome: Outcome) -> Execution {
        Execution {
            name: name.to_string(),
            outcome,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_report_queries() {
        let report = Report {
            executions: vec![
                exec("html", Outcome::Done),
                exec("css", Outcome::Failed("bad".into())),
                exec("reload", Outcome::Skipped),
                exec("reload", Outcome::Done),
            ],
            elapsed: Duration::from_millis(20),
        };

        assert!(!report.is_success());
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.count_done("reload"), 1);
        assert_eq!(report.get("css").unwrap().outcome, Outcome::Failed("bad".into()));
        assert!(report.get("js").is_none());
    }

    #[test]
    fn test_report_display_lists_steps() {
        let report = Report {
            executions: vec![exec("html", Outcome::Done)],
            elapsed: Duration::from_millis(5),
        };

        let text = report.to_string();
        assert!(text.contains("html"));
        assert!(text.contains("total"));
    }
}
