use anyhow::ensure;

use crate::core::{Asset, Mode};
use crate::engine::{Effect, Task, TaskResult};
use crate::TaskContext;

/// First step of the production pipeline.
///
/// The mode itself is fixed when the production environment is built; this
/// task confirms the graph runs against it before anything is cleaned or
/// written.
pub struct ToProd;

impl Task for ToProd {
    fn name(&self) -> &'static str {
        "to_prod"
    }

    fn effect(&self) -> Effect {
        Effect::Mode
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        ensure!(
            ctx.env.mode == Mode::Prod,
            "production graph running in {} mode",
            ctx.env.mode.as_str()
        );

        tracing::info!("building for production into {}", ctx.env.out(Asset::Root));
        Ok(())
    }
}
