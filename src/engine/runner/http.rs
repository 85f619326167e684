use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Binds the port on the calling thread, so a busy port fails the task, then
/// serves `root` from a dedicated thread. HTML responses get `script`
/// injected when one is given.
pub(crate) fn start(
    root: Utf8PathBuf,
    port: u16,
    script: Option<String>,
) -> std::io::Result<thread::JoinHandle<Result<(), anyhow::Error>>> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(address)?;
    listener.set_nonblocking(true)?;

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), root = %root, "starting a HTTP server");

    Ok(thread::spawn(move || {
        supervise(|| {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
                .block_on(serve(listener, root, script))
        })
    }))
}

/// Runs the server body and logs its failure where it happens. The handle
/// may never be joined while watchers keep the process busy.
fn supervise(body: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    let result = body();
    if let Err(e) = &result {
        tracing::error!("HTTP server stopped: {e:#}");
    }
    result
}

async fn serve(
    listener: TcpListener,
    root: Utf8PathBuf,
    script: Option<String>,
) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let mut router = Router::new()
        // path to the output root of the current mode
        .fallback_service(ServeDir::new(root));

    if let Some(script) = script {
        let script: Arc<str> = script.into();
        router = router.layer(middleware::from_fn_with_state(script, inject));
    }

    axum::serve(listener, router).await?;

    Ok(())
}

async fn inject(State(script): State<Arc<str>>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response.status() == StatusCode::OK
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"));

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't read response body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), &script);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Inserts `script` right before the closing `</body>`, or appends it when
/// the document has none.
pub(crate) fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..at]);
            out.push_str(&tag);
            out.push_str(&html[at..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
