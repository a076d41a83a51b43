//! The four asset tasks and the glue shared between them.

pub mod css;
pub mod html;
pub mod image;
pub mod include;
pub mod js;

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::{IMAGE_EXTENSIONS, Layout};
use crate::engine::{Flow, Task};

/// One of the asset kinds handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKind {
    Html,
    Css,
    Js,
    Images,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [Self::Html, Self::Css, Self::Js, Self::Images];

    pub fn name(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Js => "js",
            Self::Images => "images",
        }
    }

    pub fn task(self) -> Arc<dyn Task> {
        match self {
            Self::Html => Arc::new(html::Html),
            Self::Css => Arc::new(css::Css),
            Self::Js => Arc::new(js::Js),
            Self::Images => Arc::new(image::Images),
        }
    }

    pub fn flow(self) -> Flow {
        Flow::from(self.task())
    }

    /// Glob patterns whose changes make this task stale.
    pub fn watched(self, layout: &Layout) -> Vec<String> {
        match self {
            Self::Html => vec![layout.html.join("**/*").into_string()],
            Self::Css => vec![layout.styles.join("**/*").into_string()],
            Self::Js => vec![layout.scripts.join("**/*").into_string()],
            Self::Images => IMAGE_EXTENSIONS
                .iter()
                .map(|ext| layout.images.join(format!("**/*.{ext}")).into_string())
                .collect(),
        }
    }
}

/// Every asset task, all started at once.
pub fn build() -> Flow {
    Flow::parallel(TaskKind::ALL.map(TaskKind::flow))
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown task '{s}'"))
    }
}

/// Regular files matching `pattern`, sorted. Dotfiles are never matched by a
/// wildcard.
pub(crate) fn glob_files<E>(pattern: &Utf8Path) -> Result<Vec<Utf8PathBuf>, E>
where
    E: From<glob::PatternError> + From<glob::GlobError> + From<camino::FromPathBufError>,
{
    let mut paths = Vec::new();

    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };

    for path in glob::glob_with(pattern.as_str(), options)? {
        let path = Utf8PathBuf::try_from(path?)?;
        if path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}
