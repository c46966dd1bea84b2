//! Booting the daemon: bind the listener and run the accept loop.

use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{error, info};
use tokio::net::TcpListener;
use tokio::select;

use crate::config::Config;
use crate::daemon::http::HttpServer;
use crate::error::Error;

pub async fn start_signd_daemon(config: Arc<Config>) -> Result<(), Error> {
    let server = Arc::new(HttpServer::new(config.clone()));

    let listener =
        TcpListener::bind(config.socket_addr()).await.map_err(|e| {
            Error::custom(format!(
                "Could not bind to {}: {}",
                config.socket_addr(),
                e
            ))
        })?;
    info!("signd listening on http://{}", config.socket_addr());

    select!(
        _ = serve(listener, server) => {
            error!("http server stopped unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    );

    Ok(())
}

/// Runs the accept loop on an already bound listener. Split from
/// [`start_signd_daemon`] so tests can serve on an ephemeral port.
pub async fn serve(listener: TcpListener, server: Arc<HttpServer>) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(err) => {
                error!("Fatal error in HTTP server: {err}");
                return;
            }
        };
        let server = server.clone();
        tokio::task::spawn(async move {
            let _ = hyper_util::server::conn::auto::Builder::new(
                TokioExecutor::new(),
            )
            .serve_connection(
                TokioIo::new(stream),
                service_fn(move |req| {
                    let server = server.clone();
                    async move { server.process_request(req).await }
                }),
            )
            .await;
        });
    }
}
