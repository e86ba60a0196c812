//! End-to-end tests: a real server on an ephemeral port, driven over TCP.

use bytes::Bytes;
use emberkv::client::Client;
use emberkv::connection::ConnectionStats;
use emberkv::protocol::Reply;
use emberkv::{Config, Server};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stats: Arc<ConnectionStats>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestServer {
    async fn start(snapshot_path: &Path) -> Self {
        let config = Config {
            port: 0,
            snapshot_path: snapshot_path.to_path_buf(),
            snapshot_interval: 0,
            sweep_interval_ms: 10,
            shutdown_grace: 1,
            ..Config::default()
        };
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr();
        let stats = server.stats();

        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            stats,
            shutdown,
            task,
        }
    }

    async fn client(&self) -> Client {
        Client::connect(self.addr).await.unwrap()
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

fn snapshot_in(dir: &TempDir) -> PathBuf {
    dir.path().join("dump.snap")
}

fn bulk(s: &str) -> Reply {
    Reply::bulk_string(Bytes::from(s.to_string()))
}

#[tokio::test]
async fn test_string_commands() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;
    let mut client = server.client().await;

    assert_eq!(client.command(&["PING"]).await.unwrap(), Reply::pong());
    assert_eq!(
        client.command(&["SET", "greeting", "hello world"]).await.unwrap(),
        Reply::ok()
    );
    assert_eq!(
        client.command(&["GET", "greeting"]).await.unwrap(),
        bulk("hello world")
    );

    let missing = client.command(&["GET", "missing"]).await.unwrap();
    assert!(missing.is_null());
    assert_eq!(missing.to_string(), "(nil)");

    assert_eq!(client.command(&["DEL", "greeting"]).await.unwrap(), Reply::integer(1));
    assert_eq!(client.command(&["DEL", "greeting"]).await.unwrap(), Reply::integer(0));

    server.stop().await;
}

#[tokio::test]
async fn test_errors_keep_connection_open() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;
    let mut client = server.client().await;

    let reply = client.command(&["NOPE"]).await.unwrap();
    assert_eq!(reply, Reply::error("ERR unknown command 'NOPE'"));

    let reply = client.command(&["LPUSH", "k"]).await.unwrap();
    assert!(reply.is_error());

    client.command(&["SET", "s", "v"]).await.unwrap();
    let reply = client.command(&["LPUSH", "s", "x"]).await.unwrap();
    assert_eq!(
        reply,
        Reply::error("WRONGTYPE Operation against a key holding the wrong kind of value")
    );

    assert_eq!(client.command(&["PING"]).await.unwrap(), Reply::pong());

    server.stop().await;
}

#[tokio::test]
async fn test_list_and_rename() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;
    let mut client = server.client().await;

    client.command(&["LPUSH", "old", "a"]).await.unwrap();
    client.command(&["LPUSH", "old", "b"]).await.unwrap();
    assert_eq!(
        client.command(&["LINDEX", "old", "-1"]).await.unwrap(),
        bulk("a")
    );

    assert_eq!(client.command(&["RENAME", "old", "new"]).await.unwrap(), Reply::ok());
    assert_eq!(
        client.command(&["TYPE", "new"]).await.unwrap(),
        Reply::simple_string("list")
    );
    assert_eq!(
        client.command(&["TYPE", "old"]).await.unwrap(),
        Reply::simple_string("none")
    );
    assert_eq!(
        client.command(&["LGET", "new"]).await.unwrap(),
        Reply::array(vec![bulk("b"), bulk("a")])
    );

    server.stop().await;
}

#[tokio::test]
async fn test_expired_key_is_absent() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;
    let mut client = server.client().await;

    client.command(&["HSET", "session", "user", "bob"]).await.unwrap();
    assert_eq!(client.command(&["EXPIRE", "session", "0"]).await.unwrap(), Reply::ok());

    assert!(client.command(&["HGET", "session", "user"]).await.unwrap().is_null());
    assert_eq!(
        client.command(&["TYPE", "session"]).await.unwrap(),
        Reply::simple_string("none")
    );
    assert_eq!(
        client.command(&["KEYS"]).await.unwrap(),
        Reply::array(vec![])
    );

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let addr = server.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await.unwrap();
            for j in 0..25 {
                let key = format!("client{}:key{}", i, j);
                let value = format!("value{}", j);
                assert_eq!(
                    client.command(&["SET", key.as_str(), value.as_str()]).await.unwrap(),
                    Reply::ok()
                );
                client.command(&["RPUSH", "shared", key.as_str()]).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = server.client().await;
    assert_eq!(
        client.command(&["GET", "client3:key7"]).await.unwrap(),
        bulk("value7")
    );
    assert_eq!(
        client.command(&["LLEN", "shared"]).await.unwrap(),
        Reply::integer(200)
    );
    let keys = client.command(&["KEYS", "client*"]).await.unwrap();
    assert_eq!(keys.as_array().unwrap().len(), 200);

    server.stop().await;
}

#[tokio::test]
async fn test_inline_request() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;
    let mut client = server.client().await;

    let reply = client.send_raw(b"hset user name bob\r\n").await.unwrap();
    assert_eq!(reply, Reply::integer(1));
    let reply = client.send_raw(b"HGETALL user\r\n").await.unwrap();
    assert_eq!(reply, Reply::array(vec![bulk("name"), bulk("bob")]));

    server.stop().await;
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_in(&dir);

    let server = TestServer::start(&path).await;
    let mut client = server.client().await;
    client.command(&["SET", "s", "with space"]).await.unwrap();
    client.command(&["RPUSH", "l", "a", "", "c:d"]).await.unwrap();
    client
        .command(&["HMSET", "h", "f1", "v1", "f:2", "50%"])
        .await
        .unwrap();
    client.command(&["EXPIRE", "s", "1000"]).await.unwrap();
    drop(client);
    server.stop().await;

    assert!(path.exists());

    let server = TestServer::start(&path).await;
    let mut client = server.client().await;
    assert_eq!(
        client.command(&["GET", "s"]).await.unwrap(),
        bulk("with space")
    );
    assert_eq!(
        client.command(&["LGET", "l"]).await.unwrap(),
        Reply::array(vec![bulk("a"), bulk(""), bulk("c:d")])
    );
    assert_eq!(client.command(&["HGET", "h", "f:2"]).await.unwrap(), bulk("50%"));
    assert_eq!(client.command(&["HLEN", "h"]).await.unwrap(), Reply::integer(2));

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_does_not_wait_forever_for_idle_clients() {
    let dir = TempDir::new().unwrap();
    let server = TestServer::start(&snapshot_in(&dir)).await;

    // Connected but never sends anything
    let _idle = server.client().await;
    let mut busy = server.client().await;
    assert_eq!(busy.command(&["PING"]).await.unwrap(), Reply::pong());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = Arc::clone(&server.stats);
    assert_eq!(stats.active(), 2);

    server.stop().await;
    assert_eq!(stats.active(), 0);
}

#[tokio::test]
async fn test_unreadable_snapshot_starts_empty() {
    let dir = TempDir::new().unwrap();
    // A directory can be neither read nor replaced as a snapshot file
    let path = dir.path().join("snapshot-dir");
    std::fs::create_dir(&path).unwrap();

    let server = TestServer::start(&path).await;
    let mut client = server.client().await;
    assert_eq!(client.command(&["KEYS"]).await.unwrap(), Reply::array(vec![]));
    assert_eq!(client.command(&["SET", "a", "b"]).await.unwrap(), Reply::ok());
    assert_eq!(client.command(&["GET", "a"]).await.unwrap(), bulk("b"));

    // The final dump fails, but shutdown still completes
    server.stop().await;
    assert!(path.is_dir());
}
