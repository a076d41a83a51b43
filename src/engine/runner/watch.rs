//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the source trees
//!    recursively. Events are debounced, so a burst of saves turns into a
//!    single batch.
//! 2. **WebSocket server**: [`LiveReload`] keeps persistent connections with
//!    open browser tabs.
//! 3. **Client script**: The [`Environment`](crate::Environment) injects a
//!    lightweight JavaScript snippet into built pages. This script connects
//!    to the WebSocket server and listens for a `"reload"` message.
//!
//! ## The Loop
//!
//! When a batch of changes arrives:
//! 1. Every changed path is matched against the patterns of each task, which
//!    gives the set of stale tasks.
//! 2. Each stale task runs, followed by its own reload step. Stale tasks run
//!    concurrently.
//! 3. A task that fails skips its reload, so the browser keeps showing the
//!    last good output.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebouncedEvent, new_debouncer};

use super::reload::{LiveReload, Reload, ReloadStep};
use crate::core::{Layout, Mode};
use crate::engine::Flow;
use crate::error::WatchError;
use crate::notifier::Notifier;
use crate::tasks::TaskKind;
use crate::{Environment, run};

/// Quiet period after the last event of a batch.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Maps filesystem events to the tasks they make stale.
pub struct Watcher {
    roots: Vec<Utf8PathBuf>,
    filters: Vec<(TaskKind, Pattern)>,
}

impl Watcher {
    /// Resolves the watch patterns of every task. Patterns whose static root
    /// doesn't exist are logged and left out.
    pub fn new(layout: &Layout) -> Self {
        let mut watched = HashSet::new();
        let mut filters = Vec::new();

        for kind in TaskKind::ALL {
            for path in kind.watched(layout) {
                if let Ok((path, pattern)) = resolve_watch_path(&path) {
                    watched.insert(path);
                    filters.push((kind, pattern));
                } else {
                    tracing::error!("failed to resolve path: {}", &path);
                };
            }
        }

        Self {
            // Collapse watched paths to reduce the number of watches
            roots: collapse_watch_paths(watched),
            filters,
        }
    }

    /// Directories to watch recursively.
    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Tasks that have to run again after `paths` changed.
    pub fn dirty<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> BTreeSet<TaskKind> {
        let mut dirty = BTreeSet::new();

        for path in paths {
            for (kind, filter) in &self.filters {
                if filter.matches_path(path) {
                    dirty.insert(*kind);
                }
            }
        }

        dirty
    }
}

/// Paths that were created, modified or removed. Access events are dropped.
pub fn changed_paths(events: &[DebouncedEvent]) -> impl Iterator<Item = &Path> {
    events
        .iter()
        .filter(|de| {
            matches!(
                de.event.kind,
                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
            )
        })
        .flat_map(|de| de.event.paths.iter().map(|path| path.as_path()))
}

/// Each task followed by a reload, all of them side by side.
pub fn reaction(kinds: &BTreeSet<TaskKind>, reload: &Arc<dyn Reload>) -> Flow {
    Flow::parallel(kinds.iter().map(|kind| {
        Flow::series([kind.flow(), Flow::task(ReloadStep(reload.clone()))])
    }))
}

/// Builds everything once, then serves `dist` and rebuilds on change until
/// the process is terminated.
pub fn watch(layout: Layout, port: u16, notifier: &dyn Notifier) -> Result<(), WatchError> {
    let live = LiveReload::start()?;

    let mut env = Environment::new(Mode::Watch, layout);
    env.port = Some(live.port());

    tracing::info!("running initial build...");
    run(&crate::tasks::build().compile(), &env, notifier);

    #[cfg(feature = "server")]
    let _thread_http =
        super::http::start(env.layout.dist.clone(), port).map_err(WatchError::Serve)?;
    #[cfg(not(feature = "server"))]
    let _ = port;

    let watcher = Watcher::new(&env.layout);
    let reload: Arc<dyn Reload> = Arc::new(live);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

    for path in watcher.roots() {
        tracing::info!("watching {}", path);
        debouncer.watch(path, RecursiveMode::Recursive)?;
    }

    tracing::info!("initial build completed, now watching for changes...");

    loop {
        match rx.recv()? {
            Ok(events) => {
                tracing::debug!("{} events received", events.len());

                let dirty = watcher.dirty(changed_paths(&events));

                if dirty.is_empty() {
                    continue;
                }

                let names: Vec<_> = dirty.iter().map(|kind| kind.name()).collect();
                tracing::info!("change detected, re-running {}...", names.join(", "));

                run(&reaction(&dirty, &reload).compile(), &env, notifier);
                tracing::info!("rebuild complete, watching for changes...");
            }
            Err(errors) => {
                for error in errors {
                    tracing::error!("watch error: {error:?}");
                }
            }
        }
    }
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // The static root must exist on disk
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is matched exactly, but its parent is watched so that
    // atomic writes are caught.
    let (watch_root, match_pattern) = if suffix_part.as_str().is_empty() && absolute_root.is_file()
    {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else {
        let pattern = absolute_root.join(&suffix_part);
        (absolute_root, pattern)
    };

    let pattern = Pattern::new(match_pattern.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::engine::Outcome;
    use crate::notifier::testing::RecordingNotifier;
    use crate::tasks::testing::{project, write};

    fn canonical(path: &Utf8Path) -> Utf8PathBuf {
        path.canonicalize_utf8().unwrap()
    }

    #[test]
    fn test_concrete_file() {
        let (_dir, layout) = project();
        write(&layout.style_entry, "");

        let (watch, pattern) = resolve_watch_path(layout.style_entry.as_str()).unwrap();

        assert_eq!(watch, canonical(&layout.styles));
        assert_eq!(pattern.as_str(), canonical(&layout.style_entry));
    }

    #[test]
    fn test_concrete_directory() {
        let (_dir, layout) = project();

        let (watch, pattern) = resolve_watch_path(layout.scripts.as_str()).unwrap();

        assert_eq!(watch, canonical(&layout.scripts));
        assert_eq!(pattern.as_str(), canonical(&layout.scripts));
    }

    #[test]
    fn test_directory_wildcard() {
        let (_dir, layout) = project();

        let (watch, pattern) = resolve_watch_path(layout.images.join("**/*.png")).unwrap();

        assert_eq!(watch, canonical(&layout.images));
        assert_eq!(pattern.as_str(), canonical(&layout.images).join("**/*.png"));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let (_dir, layout) = project();

        assert!(resolve_watch_path(layout.root.join("nowhere/**/*")).is_err());
    }

    #[test]
    fn test_collapse_watch_paths() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/a"));
        paths.insert(Utf8PathBuf::from("/a/b"));
        paths.insert(Utf8PathBuf::from("/a/b/c"));
        paths.insert(Utf8PathBuf::from("/b"));
        paths.insert(Utf8PathBuf::from("/c/d"));

        let collapsed = collapse_watch_paths(paths);

        // /a/b and /a/b/c are covered by /a.
        assert_eq!(
            collapsed,
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let mut paths = HashSet::new();
        paths.insert(Utf8PathBuf::from("/foo"));
        paths.insert(Utf8PathBuf::from("/foo-bar"));

        let collapsed = collapse_watch_paths(paths);

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapsed,
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }

    #[test]
    fn test_changes_map_to_their_task() {
        let (_dir, layout) = project();
        let watcher = Watcher::new(&layout);

        let scss = canonical(&layout.styles).join("_colors.scss");
        let partial = canonical(&layout.html).join("partials/nav.html");
        let png = canonical(&layout.images).join("icons/a.png");
        let txt = canonical(&layout.images).join("notes.txt");

        let only = |path: &Utf8Path| watcher.dirty([path.as_std_path()]);

        assert_eq!(only(&scss), BTreeSet::from([TaskKind::Css]));
        assert_eq!(only(&partial), BTreeSet::from([TaskKind::Html]));
        assert_eq!(only(&png), BTreeSet::from([TaskKind::Images]));
        assert!(only(&txt).is_empty());

        let both = watcher.dirty([scss.as_std_path(), png.as_std_path()]);
        assert_eq!(both, BTreeSet::from([TaskKind::Css, TaskKind::Images]));
    }

    #[test]
    fn test_every_source_tree_is_watched() {
        let (_dir, layout) = project();
        let watcher = Watcher::new(&layout);

        let mut roots = watcher.roots().to_vec();
        roots.sort();

        let mut expected = vec![
            canonical(&layout.html),
            canonical(&layout.styles),
            canonical(&layout.scripts),
            canonical(&layout.images),
        ];
        expected.sort();

        assert_eq!(roots, expected);
    }

    #[test]
    fn test_access_events_are_not_changes() {
        use notify::event::{AccessKind, CreateKind, Event};

        let (_dir, layout) = project();
        let watcher = Watcher::new(&layout);
        let entry = canonical(&layout.styles).join("main.scss");

        let event = |kind| {
            DebouncedEvent::new(
                Event::new(kind).add_path(entry.clone().into_std_path_buf()),
                std::time::Instant::now(),
            )
        };

        let reads = [event(EventKind::Access(AccessKind::Any))];
        assert!(watcher.dirty(changed_paths(&reads)).is_empty());

        let writes = [event(EventKind::Create(CreateKind::File))];
        assert_eq!(
            watcher.dirty(changed_paths(&writes)),
            BTreeSet::from([TaskKind::Css])
        );
    }

    #[test]
    fn test_build_does_not_retrigger_itself() {
        let (_dir, layout) = project();
        write(&layout.html.join("index.html"), "<p>hi</p>");
        write(&layout.style_entry, "a { color: red; }");
        write(&layout.scripts.join("app.js"), "1;");
        write(&layout.images.join("dot.svg"), "<svg/>");

        let watcher = Watcher::new(&layout);
        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx).unwrap();
        for path in watcher.roots() {
            debouncer.watch(path, RecursiveMode::Recursive).unwrap();
        }

        let env = Environment::new(Mode::Watch, layout.clone());
        let notifier = RecordingNotifier::default();
        let report = run(&crate::tasks::build().compile(), &env, &notifier);
        assert!(report.is_success(), "{report}");

        // reading the sources must not look like an edit
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while let Some(left) = deadline.checked_duration_since(std::time::Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(Ok(events)) => assert!(watcher.dirty(changed_paths(&events)).is_empty()),
                Ok(Err(errors)) => panic!("{errors:?}"),
                Err(_) => break,
            }
        }

        write(&layout.style_entry, "a { color: blue; }");

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut dirty = BTreeSet::new();
        while dirty.is_empty() {
            let left = deadline
                .checked_duration_since(std::time::Instant::now())
                .expect("no change event for the edited stylesheet");
            if let Ok(Ok(events)) = rx.recv_timeout(left) {
                dirty = watcher.dirty(changed_paths(&events));
            }
        }
        assert_eq!(dirty, BTreeSet::from([TaskKind::Css]));
    }

    #[derive(Default)]
    struct Counter(Mutex<usize>);

    impl Reload for Counter {
        fn reload(&self) -> anyhow::Result<()> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn test_stylesheet_change_rebuilds_css_then_reloads() {
        let (_dir, layout) = project();
        write(&layout.style_entry, "a { color: red; }");

        let counter = Arc::new(Counter::default());
        let reload: Arc<dyn Reload> = counter.clone();

        let mut env = Environment::new(Mode::Watch, layout.clone());
        env.port = Some(1337);

        let notifier = RecordingNotifier::default();
        let dirty = BTreeSet::from([TaskKind::Css]);
        let report = run(&reaction(&dirty, &reload).compile(), &env, &notifier);

        assert_eq!(report.executions.len(), 2);
        assert_eq!(report.count_done("css"), 1);
        assert_eq!(report.count_done("reload"), 1);
        assert_eq!(*counter.0.lock().unwrap(), 1);
        assert!(layout.dist_css().join("production.css").exists());
        assert!(!layout.dist.join("js").exists());
    }

    #[test]
    fn test_failed_rebuild_does_not_reload() {
        let (_dir, layout) = project();
        write(&layout.style_entry, "a { color: $nope; }");

        let counter = Arc::new(Counter::default());
        let reload: Arc<dyn Reload> = counter.clone();
        let env = Environment::new(Mode::Watch, layout);

        let notifier = RecordingNotifier::default();
        let dirty = BTreeSet::from([TaskKind::Css]);
        let report = run(&reaction(&dirty, &reload).compile(), &env, &notifier);

        assert!(matches!(report.get("reload").unwrap().outcome, Outcome::Skipped));
        assert_eq!(*counter.0.lock().unwrap(), 0);
        assert_eq!(notifier.steps(), vec!["css"]);
    }
}
