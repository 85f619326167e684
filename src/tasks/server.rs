use crate::TaskContext;
use crate::core::Asset;
use crate::engine::{Effect, Task, TaskResult};

/// Serves the output root over HTTP and opens the live-reload channel.
///
/// Both services outlive the task. The HTTP thread is parked in the session
/// and joined by [`crate::Session::idle`].
pub struct Server;

impl Task for Server {
    fn name(&self) -> &'static str {
        "server"
    }

    fn effect(&self) -> Effect {
        Effect::Serve
    }

    fn run(&self, ctx: &TaskContext) -> TaskResult<()> {
        let root = ctx.env.out(Asset::Root);
        std::fs::create_dir_all(&root)?;

        let script = reload_script(ctx)?;
        serve(ctx, root, script)
    }
}

#[cfg(feature = "live")]
fn reload_script(ctx: &TaskContext) -> TaskResult<Option<String>> {
    use crate::engine::runner::reload;

    let port = reload::start(&ctx.session.reload, ctx.env.config.server.reload_port)?;
    Ok(Some(reload::refresh_script(port)))
}

#[cfg(not(feature = "live"))]
fn reload_script(_: &TaskContext) -> TaskResult<Option<String>> {
    tracing::warn!("live reload is disabled in this build");
    Ok(None)
}

#[cfg(feature = "server")]
fn serve(ctx: &TaskContext, root: camino::Utf8PathBuf, script: Option<String>) -> TaskResult<()> {
    let handle = crate::engine::runner::http::start(root, ctx.env.config.server.port, script)?;
    *crate::core::lock(&ctx.session.services.server) = Some(handle);
    Ok(())
}

#[cfg(not(feature = "server"))]
fn serve(_: &TaskContext, _: camino::Utf8PathBuf, _: Option<String>) -> TaskResult<()> {
    Err(crate::NagareError::FeatureDisabled("server").into())
}
