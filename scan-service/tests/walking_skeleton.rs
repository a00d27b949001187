#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Walking-skeleton end-to-end test.
//!
//! Proves the full pipeline:
//!   1. Start the scan service on a temp socket over a temp data dir
//!   2. Connect as a scanner and handshake
//!   3. Import a roster
//!   4. Scan: accepted, duplicate, access denied, not found
//!   5. Query stats and service status
//!   6. Shut down and check the ledger on disk

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use checkin_core::{CheckinConfig, JsonFileStore, ScanCoordinator, SnapshotStore};
use checkin_scan_service::PROTOCOL_VERSION;
use checkin_scan_service::service::CheckinService;
use tokio_util::sync::CancellationToken;

/// Stateful client that keeps a single connection + buffered reader.
struct TestClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: i64,
}

impl TestClient {
    fn connect(socket_path: &std::path::Path) -> Self {
        let stream = UnixStream::connect(socket_path).expect("Failed to connect to scan service");
        let writer = stream.try_clone().expect("clone stream");
        let reader = BufReader::new(stream);
        Self {
            writer,
            reader,
            next_id: 0,
        }
    }

    fn rpc(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let msg = serde_json::json!({ "id": self.next_id, "method": method, "params": params });
        let mut bytes = serde_json::to_vec(&msg).expect("serialize");
        bytes.push(b'\n');
        self.writer.write_all(&bytes).expect("write");
        self.writer.flush().expect("flush");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let resp: serde_json::Value = serde_json::from_str(&line)
            .unwrap_or_else(|e| panic!("parse response: {e}\nraw: {line}"));
        assert_eq!(resp["id"], self.next_id, "response id mismatch: {resp}");
        resp
    }

    fn scan(&mut self, payload: &str, scan_type: &str, day: u32) -> serde_json::Value {
        let resp = self.rpc(
            "scan.submit",
            serde_json::json!({
                "payload": payload,
                "scan_type": scan_type,
                "day": day,
                "location": "Hall B",
                "scanned_by": "walking-skeleton",
            }),
        );
        resp["result"].clone()
    }
}

/// Start the service in the background and return a handle.
async fn start_service(
    socket_path: &std::path::Path,
    data_dir: &std::path::Path,
) -> (
    Arc<CheckinService>,
    tokio::task::JoinHandle<std::io::Result<()>>,
) {
    let store = JsonFileStore::with_base_dir(data_dir.to_path_buf()).unwrap();
    let coordinator = ScanCoordinator::open(Arc::new(store), &CheckinConfig::default())
        .await
        .unwrap();
    let service = Arc::new(CheckinService::with_shutdown(
        coordinator,
        CancellationToken::new(),
    ));

    let listener = checkin_scan_service::ipc::bind(socket_path).unwrap();
    let handle = tokio::spawn(checkin_scan_service::ipc::serve(
        Arc::clone(&service),
        listener,
    ));

    (service, handle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn walking_skeleton_e2e() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test-scan.sock");
    let data_dir = temp_dir.path().join("data");

    let (service, server_handle) = start_service(&socket_path, &data_dir).await;

    let mut client = TestClient::connect(&socket_path);

    // 1. Handshake
    let hello = client.rpc(
        "hello",
        serde_json::json!({
            "protocol_version": PROTOCOL_VERSION,
            "client_version": "test-0.1.0"
        }),
    );
    assert!(hello.get("result").is_some(), "hello should succeed: {hello}");

    // 2. Import a roster
    let import = client.rpc(
        "attendees.replace",
        serde_json::json!({ "attendees": [
            { "id": "0001", "given_name": "Ana", "family_name": "Gómez", "category": "GENERAL" },
            { "id": "0002", "organization": "Acme", "category": "EXHIBITOR" },
        ]}),
    );
    assert_eq!(import["result"]["stored"], 2, "{import}");

    // 3. Scans
    let accepted = client.scan("0001", "STAND", 1);
    assert_eq!(accepted["outcome"], "ACCEPTED", "{accepted}");
    assert_eq!(accepted["attendee"]["id"], "0001");
    assert!(accepted["attendee"].get("email").is_none());
    assert_eq!(accepted["counters"]["total_scans"], 1);
    assert!(!accepted["scan"]["scan_id"].as_str().unwrap().is_empty());
    assert!(accepted["scan"].get("attendee_id").is_none());
    assert!(accepted["scan"].get("scanned_by").is_none());
    assert_eq!(accepted["scan"]["location"], "Hall B");

    let duplicate = client.scan("1", "STAND", 1);
    assert_eq!(duplicate["reason"], "DUPLICATE_SCAN", "{duplicate}");

    let denied = client.scan("0002", "ENTRY", 1);
    assert_eq!(denied["reason"], "ACCESS_DENIED", "{denied}");

    let missing = client.scan("9999", "ENTRY", 1);
    assert_eq!(missing["reason"], "NOT_FOUND", "{missing}");
    assert_eq!(missing["diagnostic"], "9999");

    // 4. Stats and status
    let stats = client.rpc("stats.get", serde_json::Value::Null);
    assert_eq!(stats["result"]["total_scans"], 1, "{stats}");
    assert_eq!(stats["result"]["scans_by_type"]["STAND"], 1);

    let status = client.rpc("service.status", serde_json::Value::Null);
    assert_eq!(status["result"]["attendees"], 2, "{status}");
    assert_eq!(status["result"]["duplicate_policy"], "attendee_type_day");
    assert_eq!(status["result"]["connections"], 1);

    // 5. Shutdown
    drop(client);
    service.shutdown_token().cancel();
    let served = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .expect("serve should stop after shutdown")
        .unwrap();
    tokio_test::assert_ok!(served);

    let on_disk = JsonFileStore::with_base_dir(data_dir).unwrap();
    let scans = on_disk.load_scans().await.unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].attendee_id, "0001");
}
