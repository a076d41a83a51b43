use std::fs;

use camino::Utf8PathBuf;
use indicatif::HumanBytes;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::JS_OUTPUT;
use crate::engine::{Task, TaskContext};
use crate::error::ScriptError;
use crate::tasks::glob_files;

/// Concatenates every script under the js source tree into one file.
///
/// Inputs are taken in sorted traversal order and joined byte for byte; the
/// content itself is never touched.
pub struct Js;

impl Task for Js {
    fn name(&self) -> &str {
        "js"
    }

    fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        let layout = &ctx.env.layout;
        let scripts = glob_files::<ScriptError>(&layout.scripts.join("**/*"))?;

        ctx.span.pb_set_message(&format!("js: {} scripts", scripts.len()));

        let bundle = concat(&scripts)?;

        let path = layout.dist_js().join(JS_OUTPUT);
        crate::utils::write_file(&path, &bundle).map_err(ScriptError::Io)?;

        tracing::info!(file = JS_OUTPUT, size = %HumanBytes(bundle.len() as u64), "wrote script bundle");
        Ok(())
    }
}

/// Joins the files in the given order.
pub fn concat(files: &[Utf8PathBuf]) -> Result<Vec<u8>, ScriptError> {
    let mut bundle = Vec::new();

    for file in files {
        bundle.extend(fs::read(file)?);
    }

    Ok(bundle)
}
