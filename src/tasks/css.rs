use camino::Utf8Path;
use indicatif::HumanBytes;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::CSS_OUTPUT;
use crate::engine::{Task, TaskContext};
use crate::error::StyleError;

/// Browser support target used for vendor prefixes.
pub const BROWSERSLIST: &str = "last 2 versions";

/// Compiles the stylesheet entry into a single minified, prefixed file.
///
/// `grass` keeps no cache between calls, so every run re-reads all imported
/// partials from disk.
pub struct Css;

impl Task for Css {
    fn name(&self) -> &str {
        "css"
    }

    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let layout = &ctx.env.layout;
        ctx.span.pb_set_message(&format!("css: {}", layout.style_entry));

        let css = compile_sass(&layout.style_entry)?;
        let css = prefix_and_minify(&css)?;

        let path = layout.dist_css().join(CSS_OUTPUT);
        crate::utils::write_file(&path, &css).map_err(StyleError::Io)?;

        tracing::info!(file = CSS_OUTPUT, size = %HumanBytes(css.len() as u64), "wrote stylesheet");
        Ok(())
    }
}

/// Sass to CSS, compressed.
pub fn compile_sass(entry: &Utf8Path) -> Result<String, StyleError> {
    let opts = grass::Options::default().style(grass::OutputStyle::Compressed);
    Ok(grass::from_path(entry, &opts)?)
}

/// Adds vendor prefixes for [`BROWSERSLIST`] and prints the stylesheet
/// minified.
pub fn prefix_and_minify(css: &str) -> Result<String, StyleError> {
    let browsers = Browsers::from_browserslist([BROWSERSLIST])
        .map_err(|err| StyleError::Targets(err.to_string()))?;

    let targets = Targets {
        browsers,
        ..Targets::default()
    };

    let mut sheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|err| StyleError::Css(err.to_string()))?;

    sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .map_err(|err| StyleError::Css(err.to_string()))?;

    let out = sheet
        .to_css(PrinterOptions {
            minify: true,
            targets,
            ..PrinterOptions::default()
        })
        .map_err(|err| StyleError::Css(err.to_string()))?;

    Ok(out.code)
}
