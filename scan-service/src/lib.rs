//! `checkin-scan-service`: the process scanners talk to.
//!
//! Listens on a Unix domain socket at `$XDG_RUNTIME_DIR/checkin-scan.sock`
//! and speaks newline-delimited JSON-RPC-lite. Every method hands off to
//! [`checkin_core::ScanCoordinator`]; no check-in decisions are made here.

pub mod ipc;
pub mod protocol;
pub mod service;

/// Protocol version for the scan service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "checkin-scan.sock";

/// Get the default socket path using XDG_RUNTIME_DIR.
///
/// Falls back to `/tmp/checkin-scan-<username>.sock` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/checkin-scan-{user}.sock"))
    }
}
