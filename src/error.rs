#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while expanding `@@include` directives.
#[derive(Debug, Error)]
pub enum IncludeError {
    /// The referenced partial does not exist under the include base.
    #[error("Couldn't find partial '{0}'")]
    NotFound(Utf8PathBuf),

    /// The directive itself is malformed.
    #[error("Malformed include directive in '{file}': {reason}")]
    Syntax { file: Utf8PathBuf, reason: String },

    /// The context argument is not a JSON object.
    #[error("Invalid include context in '{file}':\n{source}")]
    Context {
        file: Utf8PathBuf,
        source: serde_json::Error,
    },

    /// A partial ends up including itself.
    #[error("Include cycle detected: {0}")]
    Cycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the HTML task.
#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("'{0}': {1}")]
    Include(Utf8PathBuf, IncludeError),

    #[error("'{0}' is not valid UTF-8")]
    Encoding(Utf8PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    /// Every page that failed, reported once for the whole task.
    #[error("{} of {} pages failed:\n{}", .0.len(), .1, join_lines(.0))]
    Pages(Vec<HtmlError>, usize),
}

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The browserslist query couldn't be resolved.
    #[error("Browser targets error: {0}")]
    Targets(String),

    /// Prefixing or minifying the compiled CSS failed.
    #[error("CSS post-processing error: {0}")]
    Css(String),
}

/// Errors that can occur when concatenating scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

/// Errors that can occur when processing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An I/O error occurred while reading or writing image files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image decoding or encoding.
    #[error("Image processing error in '{0}': {1}")]
    Image(Utf8PathBuf, image::ImageError),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),
}

/// Errors that stop watch mode from starting.
#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Couldn't bind the reload socket.\n{0}")]
    Bind(std::io::Error),

    #[error("Couldn't start the HTTP server.\n{0}")]
    Serve(std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}

fn join_lines(errors: &[HtmlError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
