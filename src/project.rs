use std::sync::Arc;

use crate::core::{Environment, Layout, Mode};
use crate::engine::{Report, run};
use crate::notifier::{ConsoleNotifier, Notifier};
use crate::tasks::TaskKind;

/// A front-end project rooted at one directory.
///
/// This is the entry point used by the command line: it runs single tasks,
/// the full build, or watch mode against the same [`Layout`].
pub struct Project {
    env: Environment,
    notifier: Arc<dyn Notifier>,
}

impl Project {
    pub fn new(layout: Layout) -> Self {
        Self {
            env: Environment::new(Mode::Build, layout),
            notifier: Arc::new(ConsoleNotifier),
        }
    }

    /// Replaces the console notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.env.layout
    }

    /// Runs one task on its own.
    pub fn run(&self, kind: TaskKind) -> Report {
        tracing::info!("running {kind}");
        run(&kind.flow().compile(), &self.env, self.notifier.as_ref())
    }

    /// Runs all four tasks concurrently. A failing task doesn't stop the
    /// others.
    pub fn build(&self) -> Report {
        tracing::info!("building {}", self.env.layout.root);
        run(&crate::tasks::build().compile(), &self.env, self.notifier.as_ref())
    }

    /// Builds once, then serves `dist` on `port` and rebuilds on change.
    /// Only returns if watch mode couldn't start or stopped receiving events.
    #[cfg(feature = "live")]
    pub fn watch(&self, port: u16) -> Result<(), crate::error::WatchError> {
        crate::engine::watch::watch(self.env.layout.clone(), port, self.notifier.as_ref())
    }
}
