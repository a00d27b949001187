//! `checkin-scan-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): load config, open the JSON store, serve
//!   scanners on the socket until Ctrl-C.
//! - **`--ping`**: connect to the running service socket, send a hello
//!   handshake, verify the response, then exit.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use checkin_core::{CheckinConfig, JsonFileStore, ScanCoordinator};
use checkin_scan_service::service::CheckinService;
use tokio_util::sync::CancellationToken;

fn socket_path(config: &CheckinConfig) -> PathBuf {
    config
        .resolved_socket_path()
        .unwrap_or_else(checkin_scan_service::default_socket_path)
}

fn ping(path: &std::path::Path) -> std::io::Result<()> {
    let mut stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", path.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = serde_json::json!({
        "id": 0,
        "method": "hello",
        "params": {
            "protocol_version": checkin_scan_service::PROTOCOL_VERSION,
            "client_version": "ping",
        }
    });
    stream.write_all(hello.to_string().as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

fn main() -> std::io::Result<()> {
    let config = CheckinConfig::load().map_err(std::io::Error::other)?;

    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping(&socket_path(&config));
    }

    run_service(config)
}

#[tokio::main]
async fn run_service(config: CheckinConfig) -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        "checkin-scan-service v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store = JsonFileStore::with_base_dir(config.resolved_data_dir()).map_err(|e| {
        std::io::Error::other(format!("failed to initialize data store: {e}"))
    })?;
    tracing::info!("data store at {}", store.base_dir().display());

    let coordinator = ScanCoordinator::open(Arc::new(store), &config)
        .await
        .map_err(|e| std::io::Error::other(format!("failed to load check-in data: {e}")))?;

    let shutdown = CancellationToken::new();
    let service = Arc::new(CheckinService::with_shutdown(coordinator, shutdown.clone()));

    let path = socket_path(&config);
    let listener = checkin_scan_service::ipc::bind(&path)?;

    let service_signal = Arc::clone(&service);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(
            "signal received, shutting down (connections: {})",
            service_signal.connection_count()
        );
        shutdown.cancel();
    });

    checkin_scan_service::ipc::serve(service, listener).await?;

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::debug!("socket cleanup failed: {e}");
    }
    tracing::info!("checkin-scan-service exiting cleanly");
    Ok(())
}
