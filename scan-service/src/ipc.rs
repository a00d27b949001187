//! Unix domain socket IPC listener.
//!
//! Listens on the socket path and dispatches JSON-RPC-lite messages
//! to the scan coordinator.

use std::path::Path;
use std::sync::Arc;

use checkin_core::{DirectoryError, RejectReason, ScanCancelled, ScanRequest, ScanResponse};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::PROTOCOL_VERSION;
use crate::protocol::*;
use crate::service::CheckinService;

type RpcResult = Result<serde_json::Value, (i64, String)>;

/// Bind the listener at `path`, replacing a stale socket file.
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(path)?;
    tracing::info!("scan service listening on {}", path.display());
    Ok(listener)
}

/// Accept connections until the service's shutdown token fires.
///
/// Each connection reads newline-delimited requests and writes one
/// response line per request.
pub async fn serve(service: Arc<CheckinService>, listener: UnixListener) -> std::io::Result<()> {
    let shutdown = service.shutdown_token().clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("listener stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        service.inc_connections();
                        if let Err(e) = handle_connection(&service, stream).await {
                            tracing::warn!("connection error: {e}");
                        }
                        service.dec_connections();
                    });
                }
                Err(e) => {
                    tracing::error!("accept error: {e}");
                }
            },
        }
    }
    Ok(())
}

async fn handle_connection(service: &CheckinService, stream: UnixStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let shutdown = service.shutdown_token();

    loop {
        line.clear();
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            n = reader.read_line(&mut line) => n?,
        };
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(service, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single request line.
pub async fn dispatch_message(service: &CheckinService, raw: &str) -> serde_json::Value {
    let request: RpcRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return serde_json::to_value(RpcError {
                id: RequestId::Integer(0),
                error: RpcErrorBody {
                    code: ERR_INVALID_REQUEST,
                    message: format!("invalid request: {e}"),
                },
            })
            .unwrap_or_default();
        }
    };

    let id = request.id.clone();
    match dispatch_method(service, &request.method, request.params).await {
        Ok(result) => serde_json::to_value(RpcResponse { id, result }).unwrap_or_default(),
        Err((code, message)) => serde_json::to_value(RpcError {
            id,
            error: RpcErrorBody { code, message },
        })
        .unwrap_or_default(),
    }
}

async fn dispatch_method(
    service: &CheckinService,
    method: &str,
    params: Option<serde_json::Value>,
) -> RpcResult {
    let coordinator = service.coordinator();
    match method {
        "hello" => handle_hello(params),
        "scan.submit" => handle_scan_submit(service, params).await,
        "scan.sync" => {
            let params: ScanSyncParams = required_params(method, params)?;
            match coordinator
                .sync_cancellable(params.scans, service.shutdown_token())
                .await
            {
                Ok(report) => to_result(report),
                Err(ScanCancelled) => Err(shutting_down()),
            }
        }
        "attendees.replace" => {
            let params: AttendeesImportParams = required_params(method, params)?;
            let report = coordinator
                .replace_attendees(params.attendees)
                .await
                .map_err(|e| storage_error_to_rpc(&e))?;
            to_result(report)
        }
        "attendees.add" => {
            let params: AttendeesImportParams = required_params(method, params)?;
            let report = coordinator
                .add_attendees(params.attendees)
                .await
                .map_err(|e| storage_error_to_rpc(&e))?;
            to_result(report)
        }
        "attendees.get" => {
            let params: AttendeeGetParams = required_params(method, params)?;
            match coordinator.attendee_history(&params.id).await {
                Some(history) => to_result(history),
                None => Err((ERR_NOT_FOUND, format!("attendee not found: {}", params.id))),
            }
        }
        "attendees.list" => to_result(coordinator.list_attendees().await),
        "scans.list" => {
            let params: ScansListParams = optional_params(method, params)?;
            to_result(coordinator.list_scans(params.attendee_id.as_deref()).await)
        }
        "scans.recent" => {
            let params: ScansRecentParams = optional_params(method, params)?;
            to_result(coordinator.recent(params.limit).await)
        }
        "stats.get" => to_result(coordinator.stats().await),
        "service.status" => to_result(service.status().await),
        _ => Err((ERR_METHOD_NOT_FOUND, format!("unknown method: {method}"))),
    }
}

fn handle_hello(params: Option<serde_json::Value>) -> RpcResult {
    let hello: HelloParams = required_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err((
            ERR_INVALID_PARAMS,
            format!(
                "incompatible protocol version: client={}, service={}",
                hello.protocol_version, PROTOCOL_VERSION
            ),
        ));
    }
    tracing::debug!(client_version = %hello.client_version, "client connected");

    to_result(HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: [
            "scan.submit",
            "scan.sync",
            "attendees.replace",
            "attendees.add",
            "attendees.get",
            "attendees.list",
            "scans.list",
            "scans.recent",
            "stats.get",
            "service.status",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
    })
}

/// Malformed scan params are a REJECTED result, not an RPC error.
async fn handle_scan_submit(service: &CheckinService, params: Option<serde_json::Value>) -> RpcResult {
    let request: ScanRequest = match params.map(serde_json::from_value) {
        Some(Ok(request)) => request,
        Some(Err(e)) => {
            return to_result(ScanResponse::rejected(
                RejectReason::InvalidRequest,
                format!("invalid scan request: {e}"),
            ));
        }
        None => {
            return to_result(ScanResponse::rejected(
                RejectReason::InvalidRequest,
                "missing scan request",
            ));
        }
    };

    match service
        .coordinator()
        .submit_cancellable(request, service.shutdown_token())
        .await
    {
        Ok(response) => to_result(response),
        Err(ScanCancelled) => Err(shutting_down()),
    }
}

fn shutting_down() -> (i64, String) {
    (
        ERR_SHUTTING_DOWN,
        "service is shutting down, scan not recorded".to_string(),
    )
}

fn required_params<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, (i64, String)> {
    params
        .ok_or_else(|| (ERR_INVALID_PARAMS, "missing params".to_string()))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| (ERR_INVALID_PARAMS, format!("invalid {method} params: {e}")))
        })
}

fn optional_params<T: DeserializeOwned + Default>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, (i64, String)> {
    match params {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(v) => required_params(method, Some(v)),
    }
}

fn to_result<T: Serialize>(value: T) -> RpcResult {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "response serialization failed");
        (ERR_INTERNAL, format!("serialize error: {e}"))
    })
}

fn storage_error_to_rpc(err: &DirectoryError) -> (i64, String) {
    tracing::warn!(error = %err, "attendee import failed");
    (
        ERR_STORAGE,
        "attendee import could not be stored, please retry".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkin_core::{CheckinConfig, MemoryStore, ScanCoordinator};
    use pretty_assertions::assert_eq;

    async fn service() -> CheckinService {
        let coordinator =
            ScanCoordinator::open(Arc::new(MemoryStore::new()), &CheckinConfig::default())
                .await
                .unwrap();
        CheckinService::new(coordinator)
    }

    async fn call(service: &CheckinService, msg: serde_json::Value) -> serde_json::Value {
        dispatch_message(service, &msg.to_string()).await
    }

    #[tokio::test]
    async fn dispatch_hello() {
        let service = service().await;
        let result = call(
            &service,
            serde_json::json!({
                "id": 0,
                "method": "hello",
                "params": { "protocol_version": "1.0", "client_version": "0.1.0" }
            }),
        )
        .await;
        assert_eq!(result["result"]["protocol_version"], "1.0");

        let result = call(
            &service,
            serde_json::json!({
                "id": 1,
                "method": "hello",
                "params": { "protocol_version": "9.9", "client_version": "0.1.0" }
            }),
        )
        .await;
        assert_eq!(result["error"]["code"], ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn dispatch_unknown_method_and_garbage() {
        let service = service().await;
        let result = call(&service, serde_json::json!({ "id": 1, "method": "bogus" })).await;
        assert_eq!(result["error"]["code"], ERR_METHOD_NOT_FOUND);

        let result = dispatch_message(&service, "{not json").await;
        assert_eq!(result["error"]["code"], ERR_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn malformed_scan_is_a_rejected_result() {
        let service = service().await;
        let result = call(
            &service,
            serde_json::json!({
                "id": "abc",
                "method": "scan.submit",
                "params": { "payload": "0001", "scan_type": "COURSE", "day": 1 }
            }),
        )
        .await;
        assert_eq!(result["id"], "abc");
        assert_eq!(result["result"]["outcome"], "REJECTED");
        assert_eq!(result["result"]["reason"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn import_then_scan_then_get() {
        let service = service().await;
        let result = call(
            &service,
            serde_json::json!({
                "id": 1,
                "method": "attendees.replace",
                "params": { "attendees": [
                    { "id": "1", "given_name": "Ana", "category": "GENERAL" },
                    { "given_name": "No id" }
                ]}
            }),
        )
        .await;
        assert_eq!(result["result"]["stored"], 1);
        assert_eq!(result["result"]["rejected"][0]["index"], 1);

        let result = call(
            &service,
            serde_json::json!({
                "id": 2,
                "method": "scan.submit",
                "params": { "payload": "0001", "scan_type": "ENTRY", "day": 1 }
            }),
        )
        .await;
        assert_eq!(result["result"]["outcome"], "ACCEPTED");
        assert_eq!(result["result"]["attendee"]["id"], "0001");

        let result = call(
            &service,
            serde_json::json!({ "id": 3, "method": "attendees.get", "params": { "id": "1" } }),
        )
        .await;
        assert_eq!(result["result"]["scans"].as_array().map(Vec::len), Some(1));

        let result = call(
            &service,
            serde_json::json!({ "id": 4, "method": "attendees.get", "params": { "id": "77" } }),
        )
        .await;
        assert_eq!(result["error"]["code"], ERR_NOT_FOUND);

        let result = call(&service, serde_json::json!({ "id": 5, "method": "scans.recent" })).await;
        assert_eq!(result["result"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_scans() {
        let service = service().await;
        service
            .coordinator()
            .replace_attendees(vec![checkin_core::AttendeeRow {
                id: Some("1".to_string()),
                ..Default::default()
            }])
            .await
            .unwrap();
        service.shutdown_token().cancel();

        let result = call(
            &service,
            serde_json::json!({
                "id": 1,
                "method": "scan.submit",
                "params": { "payload": "1", "scan_type": "ENTRY", "day": 1 }
            }),
        )
        .await;
        assert_eq!(result["error"]["code"], ERR_SHUTTING_DOWN);
        assert!(service.coordinator().ledger().is_empty().await);

        let result = call(
            &service,
            serde_json::json!({
                "id": 2,
                "method": "scan.sync",
                "params": { "scans": [
                    { "payload": "1", "scan_type": "ENTRY", "day": 1 },
                    { "payload": "1", "scan_type": "STAND", "day": 1 }
                ]}
            }),
        )
        .await;
        assert_eq!(result["error"]["code"], ERR_SHUTTING_DOWN);
        assert!(service.coordinator().ledger().is_empty().await);
    }

    #[test]
    fn serialization_failure_is_internal_not_storage() {
        let unserializable = std::collections::BTreeMap::from([(vec![1u8], 1u8)]);
        let (code, message) = to_result(unserializable).unwrap_err();
        assert_eq!(code, ERR_INTERNAL);
        assert!(message.starts_with("serialize error"), "{message}");
    }
}
