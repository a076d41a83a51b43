#![forbid(unsafe_code)]
//! Front-end asset pipeline.
//!
//! Four independent tasks turn the sources of a project into a `dist`
//! directory:
//!
//! - `html` expands `@@include` directives and minifies every page,
//! - `css` compiles one Sass entry, adds vendor prefixes and minifies it,
//! - `js` concatenates every script into one bundle,
//! - `images` optimizes every image and caches the result by content hash.
//!
//! Tasks are composed with [`Flow`] and executed by [`run`], which never stops
//! on a failing task: the error goes to a [`Notifier`] and unrelated tasks
//! carry on. With the `live` feature, [`Project::watch`] rebuilds on change
//! and refreshes connected browsers.

mod core;
mod engine;
mod error;
mod notifier;
mod project;
pub mod tasks;
mod utils;

pub use crate::core::{
    CSS_OUTPUT, Environment, HTTP_PORT, IMAGE_EXTENSIONS, JS_OUTPUT, Layout, Mode,
};
pub use crate::engine::{Edge, Execution, Flow, Outcome, Pipeline, Report, Task, TaskContext, run};
pub use crate::error::*;
pub use crate::notifier::{ConsoleNotifier, Notifier};
pub use crate::project::Project;
pub use crate::tasks::TaskKind;
pub use crate::utils::init_logging;

#[cfg(feature = "live")]
pub use crate::engine::reload::{LiveReload, RELOAD_PORT, Reload, ReloadStep};
#[cfg(feature = "live")]
pub use crate::engine::watch::{DEBOUNCE, Watcher};
