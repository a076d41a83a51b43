use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use tsumiki::{HTTP_PORT, Layout, Project, TaskKind};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Command {
    /// Include and minify the pages.
    Html,
    /// Compile, prefix and minify the stylesheet.
    Css,
    /// Concatenate the scripts.
    Js,
    /// Optimize the images.
    Images,
    /// Run all four tasks once.
    Build,
    /// Build, serve and rebuild on change.
    Watch,
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "watch")]
    command: Command,

    /// Project root containing `src`.
    #[clap(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Port of the development server.
    #[clap(long, default_value_t = HTTP_PORT)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tsumiki::init_logging()?;

    let project = Project::new(Layout::new(args.root));

    // Failed tasks have already been reported and don't change the exit code.
    match args.command {
        Command::Html => drop(project.run(TaskKind::Html)),
        Command::Css => drop(project.run(TaskKind::Css)),
        Command::Js => drop(project.run(TaskKind::Js)),
        Command::Images => drop(project.run(TaskKind::Images)),
        Command::Build => {
            let report = project.build();
            tracing::debug!("\n{report}");
        }
        #[cfg(feature = "live")]
        Command::Watch => project.watch(args.port)?,
        #[cfg(not(feature = "live"))]
        Command::Watch => anyhow::bail!("watch mode requires the `live` feature"),
    }

    Ok(())
}
