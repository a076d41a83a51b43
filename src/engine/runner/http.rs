use std::net::{SocketAddr, TcpListener};
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

/// Serves `dist` on its own thread with a single-threaded runtime.
///
/// The port is bound before the thread starts, so a taken port is reported
/// to the caller.
pub fn start(
    dist: Utf8PathBuf,
    port: u16,
) -> std::io::Result<thread::JoinHandle<Result<(), anyhow::Error>>> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
    listener.set_nonblocking(true)?;

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    Ok(thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(anyhow::Error::from)
            .and_then(|runtime| runtime.block_on(serve(listener, dist)));

        if let Err(err) = &result {
            tracing::error!("HTTP server stopped: {err:#}");
        }

        result
    }))
}

async fn serve(listener: TcpListener, dist: Utf8PathBuf) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let router = Router::new()
        // path to the dist directory with the built assets
        .fallback_service(ServeDir::new(dist));

    axum::serve(listener, router).await?;

    Ok(())
}
