use std::time::Instant;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::TaskContext;
use crate::core::{Asset, Environment, sources};
use crate::engine::{Effect, Task, TaskResult};
use crate::tools::{self, ToolError};

const OUTPUT: &str = "main.min.js";

/// Errors that can occur when bundling scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error on '{0}': {1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error(transparent)]
    Esbuild(#[from] ToolError),
}

/// Bundles `src/js/main.js` with esbuild into `<mode>/js/main.min.js`.
///
/// Dependencies under `node_modules` are pulled into the bundle by esbuild's
/// resolver; only `main.js` is ever an entry point.
pub struct Scripts;

impl Task for Scripts {
    fn name(&self) -> &'static str {
        "scripts"
    }

    fn effect(&self) -> Effect {
        Effect::Output
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let bundle = tools::run(&ctx.env.config.tools.esbuild, &esbuild_args(ctx.env), None)
            .map_err(ScriptError::Esbuild)?;

        let dst = ctx.env.out(Asset::Js).join(OUTPUT);
        crate::io::write(&dst, bundle).map_err(|e| ScriptError::Io(dst.clone(), e))?;

        tracing::info!("bundled {} {}", dst, crate::io::as_overhead(s));
        ctx.notify();
        Ok(())
    }
}

/// Command line for a bundle written to standard output.
fn esbuild_args(env: &Environment) -> Vec<String> {
    let mut args = vec![
        env.resolve(sources::JS_ENTRY).into_string(),
        "--bundle".to_string(),
    ];

    if env.mode.is_prod() {
        args.push("--minify".to_string());
        args.push(format!("--target={}", env.config.targets.scripts));
        args.push("--legal-comments=none".to_string());
    } else {
        args.push("--sourcemap=inline".to_string());
    }

    args
}
