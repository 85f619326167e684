use std::sync::Arc;

use crate::TaskContext;
use crate::engine::{Effect, Task, TaskResult};

/// Registers file watchers that re-run tasks when their sources change.
///
/// Events are queued from the moment the task runs and dispatched once the
/// graph completes, see [`crate::Session::idle`].
pub struct Watch {
    routes: Vec<(&'static str, Arc<dyn Task>)>,
}

impl Watch {
    /// `routes` pairs project-relative globs with the task they re-run.
    pub fn new(routes: Vec<(&'static str, Arc<dyn Task>)>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[(&'static str, Arc<dyn Task>)] {
        &self.routes
    }
}

impl Task for Watch {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn effect(&self) -> Effect {
        Effect::Watch
    }

    #[cfg(feature = "live")]
    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let registration = crate::engine::runner::register(ctx.env, &self.routes)?;
        *crate::core::lock(&ctx.session.services.watch) = Some(registration);
        Ok(())
    }

    #[cfg(not(feature = "live"))]
    fn run(&self, _: &TaskContext) -> TaskResult<()> {
        Err(crate::NagareError::FeatureDisabled("live").into())
    }
}
