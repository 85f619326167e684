use std::time::Instant;

use crate::core::Asset;
use crate::engine::{Effect, Task, TaskResult};
use crate::TaskContext;

/// Deletes the output root of the current mode.
pub struct Clean;

impl Task for Clean {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn effect(&self) -> Effect {
        Effect::Clean
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let s = Instant::now();
        let root = ctx.env.out(Asset::Root);

        if crate::io::remove_dir(&root)? {
            tracing::info!("cleaned {} {}", root, crate::io::as_overhead(s));
        }

        Ok(())
    }
}
