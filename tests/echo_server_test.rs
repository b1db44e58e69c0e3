//! End-to-end tests: a manager running on its own thread, driven by Tokio
//! TCP clients.

use bytes::Bytes;
use connmux::{
    ConnectionId, ConnectionInfo, ConnectionListener, ConnectionManager, ListenerResult,
    ManagerConfig, Propagation, StopHandle,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Echoes data back and tags a connection when it sends `NAME <identifier>`.
#[derive(Default)]
struct EchoWithNames {
    removed: AtomicUsize,
    sent: Mutex<Vec<(ConnectionId, Bytes)>>,
}

impl ConnectionListener for EchoWithNames {
    fn on_connection_removed(
        &self,
        _manager: &mut ConnectionManager,
        _conn: &ConnectionInfo,
    ) -> ListenerResult {
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(Propagation::Continue)
    }

    fn on_connection_data_received(
        &self,
        manager: &mut ConnectionManager,
        conn: &ConnectionInfo,
        data: &Bytes,
    ) -> ListenerResult {
        if let Some(name) = data.strip_prefix(b"NAME ") {
            let name = std::str::from_utf8(name)?.trim().to_string();
            manager.set_identifier(conn.id, name)?;
            manager.send_to_connection(conn, "OK")?;
            return Ok(Propagation::Stop);
        }
        manager.send_to_connection(conn, data.clone())?;
        Ok(Propagation::Continue)
    }

    fn on_connection_data_sent(
        &self,
        _manager: &mut ConnectionManager,
        conn: &ConnectionInfo,
        data: &Bytes,
    ) -> ListenerResult {
        self.sent.lock().unwrap().push((conn.id, data.clone()));
        Ok(Propagation::Continue)
    }
}

/// Starts a manager on a blocking task; returns its address and stop handle.
fn start_server(
    config: ManagerConfig,
    listener: Arc<EchoWithNames>,
) -> (SocketAddr, StopHandle, JoinHandle<connmux::Result<()>>) {
    let mut manager = ConnectionManager::new(config).unwrap();
    manager.add_connection_listener(listener);
    let addr = manager.listen().unwrap();
    let stop = manager.stop_handle();
    let task = tokio::task::spawn_blocking(move || manager.run());
    (addr, stop, task)
}

fn local_config() -> ManagerConfig {
    ManagerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        sweep_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

async fn read_reply(client: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .unwrap();
    buf
}

#[tokio::test]
async fn test_echo_round_trip() {
    let listener = Arc::new(EchoWithNames::default());
    let (addr, stop, task) = start_server(local_config(), Arc::clone(&listener));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello, world").await.unwrap();
    assert_eq!(read_reply(&mut client, 12).await, b"hello, world");

    stop.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_routing_by_identifier() {
    let listener = Arc::new(EchoWithNames::default());
    let (addr, stop, task) = start_server(local_config(), Arc::clone(&listener));

    let mut alice = TcpStream::connect(addr).await.unwrap();
    let mut bob = TcpStream::connect(addr).await.unwrap();

    alice.write_all(b"NAME alice").await.unwrap();
    assert_eq!(read_reply(&mut alice, 2).await, b"OK");
    bob.write_all(b"NAME bob").await.unwrap();
    assert_eq!(read_reply(&mut bob, 2).await, b"OK");

    // A third client claiming "alice" evicts the first holder
    let mut impostor = TcpStream::connect(addr).await.unwrap();
    impostor.write_all(b"NAME alice").await.unwrap();
    assert_eq!(read_reply(&mut impostor, 2).await, b"OK");

    let mut buf = [0u8; 8];
    let n = timeout(Duration::from_secs(2), alice.read(&mut buf))
        .await
        .expect("evicted client was not closed")
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(listener.removed.load(Ordering::SeqCst), 1);

    bob.write_all(b"ping").await.unwrap();
    assert_eq!(read_reply(&mut bob, 4).await, b"ping");

    let sent = listener.sent.lock().unwrap().clone();
    assert!(sent.iter().any(|(_, data)| data == &Bytes::from_static(b"ping")));

    stop.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_idle_client_is_evicted() {
    let listener = Arc::new(EchoWithNames::default());
    let config = ManagerConfig {
        keepalive_timeout: Duration::from_millis(200),
        ..local_config()
    };
    let (addr, stop, task) = start_server(config, Arc::clone(&listener));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"PING").await.unwrap();
    assert_eq!(read_reply(&mut client, 4).await, b"PING");

    // Stay silent past the keepalive timeout
    sleep(Duration::from_millis(500)).await;

    let mut buf = [0u8; 4];
    let n = timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("idle client was not closed")
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(listener.removed.load(Ordering::SeqCst), 1);

    stop.stop();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_leaves_clients_until_drop() {
    let listener = Arc::new(EchoWithNames::default());
    let (addr, stop, task) = start_server(local_config(), Arc::clone(&listener));

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }
    for client in clients.iter_mut() {
        client.write_all(b"hi").await.unwrap();
        assert_eq!(read_reply(client, 2).await, b"hi");
    }

    stop.stop();
    task.await.unwrap().unwrap();

    // The manager was dropped with the task, which shuts every connection
    assert_eq!(listener.removed.load(Ordering::SeqCst), 3);
    for client in clients.iter_mut() {
        let mut buf = [0u8; 2];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
