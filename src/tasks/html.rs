use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use minify_html::Cfg;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::{Task, TaskContext};
use crate::error::HtmlError;
use crate::tasks::glob_files;
use crate::tasks::include::Includer;

/// Builds every page directly under the html source directory.
///
/// Pages go through include expansion and minification, and are written
/// under the same name to the dist root. A page that fails is not written;
/// the rest still are.
pub struct Html;

impl Task for Html {
    fn name(&self) -> &str {
        "html"
    }

    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let layout = &ctx.env.layout;
        let pages = glob_files::<HtmlError>(&layout.html.join("*.html"))?;
        let total = pages.len();

        ctx.span.pb_set_message(&format!("html: {total} pages"));

        let includer = Includer::new(&layout.html);
        let cfg = minify_config();
        let script = ctx.env.get_refresh_script();

        let errors: Vec<HtmlError> = pages
            .into_par_iter()
            .filter_map(|page| {
                let result = build_page(&includer, &cfg, script.as_deref(), &page)
                    .and_then(|html| {
                        crate::utils::write_file(&output_path(&layout.dist, &page), html)
                            .map_err(HtmlError::Io)
                    });

                ctx.span.in_scope(|| tracing::debug!(page = %page, "built"));
                result.err()
            })
            .collect();

        if !errors.is_empty() {
            return Err(HtmlError::Pages(errors, total).into());
        }

        tracing::info!("Built {total} pages");
        Ok(())
    }
}

/// The fixed minifier options: empty attributes and default `type`
/// attributes go away, letter case is kept and inline CSS is minified as
/// well. Comments and optional tags stay in place.
fn minify_config() -> Cfg {
    let mut cfg = Cfg::new();
    cfg.keep_comments = true;
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.minify_css = true;
    cfg
}

fn build_page(
    includer: &Includer,
    cfg: &Cfg,
    script: Option<&str>,
    page: &Utf8Path,
) -> Result<Vec<u8>, HtmlError> {
    let bytes = fs::read(page)?;
    let text = String::from_utf8(bytes).map_err(|_| HtmlError::Encoding(page.to_path_buf()))?;

    let text = includer
        .expand(&text, page)
        .map_err(|err| HtmlError::Include(page.to_path_buf(), err))?;

    let mut html = minify_html::minify(text.as_bytes(), cfg);

    if let Some(script) = script {
        html = inject_script(html, script);
    }

    Ok(html)
}

/// Places a `<script>` right before `</body>`, or at the end of the document.
fn inject_script(html: Vec<u8>, script: &str) -> Vec<u8> {
    let tag = format!("<script>{script}</script>");

    let position = html
        .windows(7)
        .rposition(|window| window.eq_ignore_ascii_case(b"</body>"))
        .unwrap_or(html.len());

    let mut out = Vec::with_capacity(html.len() + tag.len());
    out.extend_from_slice(&html[..position]);
    out.extend_from_slice(tag.as_bytes());
    out.extend_from_slice(&html[position..]);
    out
}

/// Pages keep their file name and land in the dist root.
fn output_path(dist: &Utf8Path, page: &Utf8Path) -> Utf8PathBuf {
    dist.join(page.file_name().unwrap_or(page.as_str()))
}
