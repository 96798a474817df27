//! HTTP listener
//!
//! The engine is single-threaded, so the server runs on a current-thread
//! runtime inside a `LocalSet`. Each connection is a local task that pulls
//! the response one chunk at a time and writes it out; watcher events are
//! applied by another local task whenever the connections are waiting on
//! the socket.

pub mod http;

use std::net::SocketAddr;
use std::rc::Rc;

use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::watcher::{self, ChangeEvent, TemplateWatcher, WatcherConfig};

const BAD_REQUEST: &str =
    "HTTP/1.0 400 Bad Request\r\nContent-Type: text/html; charset=utf-8\r\n\r\nBad Request";

/// Build the engine from `config` and serve until interrupted
pub fn run(config: &Config) -> Result<()> {
    debug!(listen = %config.server.listen, "run: called");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let local = LocalSet::new();
    local.block_on(&runtime, serve(config))
}

async fn serve(config: &Config) -> Result<()> {
    let engine = Rc::new(config.engine_builder().build().context("Failed to start engine")?);
    let listener = TcpListener::bind(&config.server.listen)
        .await
        .context(format!("Failed to bind {}", config.server.listen))?;
    info!(listen = %config.server.listen, modules = engine.module_names().len(), "Serving templates");

    // dropping the watcher stops the events
    let _watcher = if config.watch.enabled {
        let (watcher, events) = TemplateWatcher::start(engine.roots()).context("Failed to watch template roots")?;
        tokio::task::spawn_local(apply_changes(engine.clone(), events, config.watch.clone()));
        Some(watcher)
    } else {
        None
    };

    tokio::select! {
        result = accept_loop(listener, engine) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
            Ok(())
        }
    }
}

async fn apply_changes(engine: Rc<Engine>, mut events: mpsc::UnboundedReceiver<ChangeEvent>, config: WatcherConfig) {
    while let Some(change) = events.recv().await {
        watcher::apply(&engine, &change, &config);
    }
    debug!("apply_changes: watcher channel closed");
}

/// Accept connections forever, one local task each
pub async fn accept_loop(listener: TcpListener, engine: Rc<Engine>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("Failed to accept connection")?;
        debug!(%peer, "accept_loop: connection accepted");
        let engine = engine.clone();
        tokio::task::spawn_local(async move {
            if let Err(e) = serve_connection(&engine, stream, peer).await {
                warn!(%peer, error = %e, "Connection failed");
            }
        });
    }
}

/// Answer one request on `stream` and close it
pub async fn serve_connection(engine: &Engine, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let request = match http::read_request(&mut reader).await {
        Ok(request) => request,
        Err(e) => {
            debug!(%peer, error = %e, "serve_connection: bad request");
            writer.write_all(BAD_REQUEST.as_bytes()).await.context("Failed to write response")?;
            writer.shutdown().await.context("Failed to close connection")?;
            return Ok(());
        }
    };
    info!(%peer, method = %request.method, target = %request.target, "Request");

    let response = engine.handle_request(request.into_context(Some(peer)));
    for chunk in response {
        writer.write_all(chunk.as_bytes()).await.context("Failed to write response")?;
    }
    writer.flush().await.context("Failed to flush response")?;
    writer.shutdown().await.context("Failed to close connection")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn fetch(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_rendered_template() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("hello.sf"),
            "def main(arguments, **kwargs) {\n    yield 'hello '\n    yield arguments['name'][0]\n}\n",
        )
        .unwrap();
        let engine = Rc::new(Engine::builder().root(dir.path()).build().unwrap());

        let local = LocalSet::new();
        local
            .run_until(async move {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                tokio::task::spawn_local(accept_loop(listener, engine));

                let response = fetch(addr, "GET /hello?name=world HTTP/1.0\r\n\r\n").await;
                assert_eq!(
                    response,
                    "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\nhello world"
                );

                let response = fetch(addr, "GET /nothing HTTP/1.0\r\n\r\n").await;
                assert!(response.starts_with("HTTP/1.0 404 Not Found\r\n"));

                let response = fetch(addr, "nonsense\r\n\r\n").await;
                assert!(response.starts_with("HTTP/1.0 400 Bad Request"));
            })
            .await;
    }
}
