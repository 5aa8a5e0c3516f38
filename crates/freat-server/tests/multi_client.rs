//! End-to-end tests over a real TCP socket with an in-memory backend.

use freat_core::testing::{MockBackend, MockProcess};
use freat_server::{Server, ServerConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }

    async fn send_raw(&mut self, payload: &[u8]) -> Value {
        self.stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await
            .unwrap();
        self.stream.write_all(payload).await.unwrap();

        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        self.stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn send(&mut self, request: Value) -> Value {
        self.send_raw(&serde_json::to_vec(&request).unwrap()).await
    }
}

async fn start_server(process: MockProcess) -> (SocketAddr, Arc<MockProcess>) {
    let (backend, process) = MockBackend::single(process);
    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let server = Arc::new(Server::new(config, Arc::new(backend)));
    let listener = server.listen().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, process)
}

fn counters_process() -> MockProcess {
    let data: Vec<u8> = [100u32, 7, 100, 100, 9]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    MockProcess::new(42, "demo").with_region(0x1000, data)
}

#[tokio::test]
async fn attach_scan_narrow_and_read_over_the_wire() {
    let (addr, process) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    let response = client.send(json!({"command": "attach", "target": 42})).await;
    assert_eq!(response["status"], "success");
    assert_eq!(response["message"], "Attached to process 42");

    let response = client
        .send(json!({"command": "scan_memory", "value": 100}))
        .await;
    assert_eq!(response["result"], 3);

    process.poke(0x1008, &250u32.to_le_bytes());
    let response = client
        .send(json!({"command": "scan_memory", "value": 250, "scan_type": "next"}))
        .await;
    assert_eq!(response["result"], 1);

    let response = client
        .send(json!({"command": "get_scan_results", "page": 1, "page_size": 10}))
        .await;
    assert_eq!(response["result"]["total"], 1);
    assert_eq!(response["result"]["results"][0]["address"], "0x1008");
    assert_eq!(response["result"]["results"][0]["value"], 250);

    let response = client
        .send(json!({"command": "read_memory", "address": "0x1008"}))
        .await;
    assert_eq!(response["result"], 250);

    let response = client.send(json!({"command": "detach"})).await;
    assert_eq!(response["message"], "Detached from process");
}

#[tokio::test]
async fn pagination_is_exact_across_pages() {
    let data: Vec<u8> = [8u32; 5].iter().flat_map(|v| v.to_le_bytes()).collect();
    let (addr, _) = start_server(MockProcess::new(42, "demo").with_region(0x1000, data)).await;
    let mut client = TestClient::connect(addr).await;

    client.send(json!({"command": "attach", "target": 42})).await;
    let response = client.send(json!({"command": "scan_memory", "value": 8})).await;
    assert_eq!(response["result"], 5);

    let mut addresses = Vec::new();
    for page in 1..=3 {
        let response = client
            .send(json!({"command": "get_scan_results", "page": page, "page_size": 2}))
            .await;
        let result = &response["result"];
        assert_eq!(result["total"], 5);
        assert_eq!(result["totalPages"], 3);
        assert_eq!(result["pageSize"], 2);
        assert_eq!(result["page"], page);
        for hit in result["results"].as_array().unwrap() {
            addresses.push(hit["address"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(addresses.len(), 5);
    let mut deduped = addresses.clone();
    deduped.dedup();
    assert_eq!(deduped, addresses);
}

#[tokio::test]
async fn commands_before_attach_are_rejected() {
    let (addr, _) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    let response = client.send(json!({"command": "scan_memory", "value": 1})).await;
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"], "Not attached to any process");
    assert_eq!(response["command"], "scan_memory");
}

#[tokio::test]
async fn next_scan_without_first_is_rejected() {
    let (addr, _) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    client.send(json!({"command": "attach", "target": 42})).await;
    let response = client
        .send(json!({"command": "scan_memory", "value": 1, "scan_type": "next"}))
        .await;
    assert_eq!(response["status"], "error");
    assert_eq!(
        response["error"],
        "No active scan. Run a first scan before a next scan"
    );
}

#[tokio::test]
async fn malformed_json_gets_an_error_with_null_command() {
    let (addr, _) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    let response = client.send_raw(b"{definitely not json").await;
    assert_eq!(response["status"], "error");
    assert_eq!(response["error"], "Invalid JSON format");
    assert_eq!(response["command"], Value::Null);

    // The connection survives a bad request
    let response = client.send(json!({"command": "get_processes"})).await;
    assert_eq!(response["status"], "success");
}

#[tokio::test]
async fn sessions_are_isolated_between_clients() {
    let (addr, process) = start_server(counters_process()).await;
    let mut alpha = TestClient::connect(addr).await;
    let mut beta = TestClient::connect(addr).await;

    alpha.send(json!({"command": "attach", "target": 42})).await;
    alpha.send(json!({"command": "scan_memory", "value": 100})).await;

    // The other client shares neither the attachment nor the scan
    let response = beta.send(json!({"command": "scan_memory", "value": 100})).await;
    assert_eq!(response["error"], "Not attached to any process");

    beta.send(json!({"command": "attach", "target": 42})).await;
    assert_eq!(process.attach_count(), 2);

    let response = beta.send(json!({"command": "get_scan_results"})).await;
    assert_eq!(response["status"], "error");

    // One client detaching leaves the other attached
    alpha.send(json!({"command": "detach"})).await;
    let response = beta.send(json!({"command": "scan_memory", "value": 100})).await;
    assert_eq!(response["result"], 3);
}

#[tokio::test]
async fn disconnect_releases_the_attachment() {
    let (addr, process) = start_server(counters_process()).await;

    {
        let mut client = TestClient::connect(addr).await;
        client.send(json!({"command": "attach", "target": 42})).await;
        assert_eq!(process.attach_count(), 1);
    }

    // Dropped the socket; the server notices and tears the session down
    let mut released = false;
    for _ in 0..100 {
        if process.attach_count() == 0 {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(released, "attachment not released after disconnect");
}

#[tokio::test]
async fn timing_stats_count_commands() {
    let (addr, _) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    client.send(json!({"command": "attach", "target": 42})).await;
    client.send(json!({"command": "scan_memory", "value": 100})).await;
    client.send(json!({"command": "scan_memory", "value": 100, "scan_type": "next"})).await;

    let response = client.send(json!({"command": "get_timing_stats"})).await;
    let stats = &response["result"];
    assert_eq!(stats["attach"]["count"], 1);
    assert_eq!(stats["scan_memory"]["count"], 2);
    assert!(stats["scan_memory"]["avg_time"].as_f64().unwrap() >= 0.0);
    assert!(stats["scan_memory"]["std_dev"].is_number());
}

#[tokio::test]
async fn unknown_command_echoes_its_name() {
    let (addr, _) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    let response = client.send(json!({"command": "frobnicate"})).await;
    assert_eq!(response["error"], "Unknown command: frobnicate");
    assert_eq!(response["command"], "frobnicate");
}

#[tokio::test]
async fn write_memory_changes_the_target() {
    let (addr, process) = start_server(counters_process()).await;
    let mut client = TestClient::connect(addr).await;

    client.send(json!({"command": "attach", "target": "demo"})).await;
    let response = client
        .send(json!({"command": "write_memory", "address": 0x1010, "value": 1234}))
        .await;
    assert_eq!(response["message"], "Memory written successfully");
    assert_eq!(process.peek(0x1010, 4), 1234u32.to_le_bytes());
}
