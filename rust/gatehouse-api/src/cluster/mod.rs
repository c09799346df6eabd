//! Optional UDP peer gossip.
//!
//! Nodes heartbeat over UDP; the lexicographically smallest live node ID
//! holds every named lock, which gives the cron scheduler its single
//! leader and serializes key rotation. Loss of the leader (expired
//! heartbeats) releases the lock to the next peer automatically.
//!
//! The message envelope is JSON `{type, key_base64?, node_id?}`; unknown
//! types are ignored so mixed-version clusters stay quiet. Key rotation
//! broadcasts the newly derived key and awaits acks; unacked peers are
//! logged and may need a restart, which is accepted behavior.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::config::ClusterConfig;
use crate::store::Store;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const PEER_TTL: Duration = Duration::from_secs(10);
const ACK_WAIT: Duration = Duration::from_secs(3);

/// Wire envelope for every cluster datagram.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
}

/// Handle to the gossip mesh.
pub struct Cluster {
    node_id: String,
    socket: Arc<UdpSocket>,
    peers: Vec<String>,
    alive: Mutex<HashMap<String, Instant>>,
    acks: Mutex<HashSet<String>>,
    store: Store,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("node_id", &self.node_id)
            .field("peers", &self.peers)
            .finish()
    }
}

impl Cluster {
    /// Bind the socket and start the receive and heartbeat loops.
    pub async fn start(config: &ClusterConfig, store: Store) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(&config.bind)
            .await
            .with_context(|| format!("failed to bind cluster socket on {}", config.bind))?;
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| config.bind.clone());

        let cluster = Arc::new(Self {
            node_id,
            socket: Arc::new(socket),
            peers: config.peers.clone(),
            alive: Mutex::new(HashMap::new()),
            acks: Mutex::new(HashSet::new()),
            store,
        });

        tokio::spawn(cluster.clone().recv_loop());
        tokio::spawn(cluster.clone().heartbeat_loop());

        tracing::info!(node_id = %cluster.node_id, peers = ?cluster.peers, "cluster started");
        Ok(cluster)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Whether this node currently holds every named lock.
    pub fn is_leader(&self) -> bool {
        let now = Instant::now();
        let alive = self.alive.lock();
        !alive
            .iter()
            .any(|(peer, seen)| now.duration_since(*seen) < PEER_TTL && peer < &self.node_id)
    }

    /// Block until this node holds the named lock.
    pub async fn acquire_lock(&self, name: &str) {
        loop {
            if self.is_leader() {
                tracing::info!(lock = name, node_id = %self.node_id, "acquired cluster lock");
                return;
            }
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        }
    }

    /// Like [`Self::acquire_lock`] but gives up after `timeout`. Used by
    /// request-scoped work (key rotation) that must fail instead of
    /// hanging a caller that will never become leader.
    pub async fn acquire_lock_timeout(&self, name: &str, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.acquire_lock(name))
            .await
            .is_ok()
    }

    /// Broadcast a rotated key to all peers and await acks. Returns the
    /// number of peers that acknowledged; the rest are logged.
    pub async fn broadcast_key(&self, key: [u8; 32]) -> usize {
        self.acks.lock().clear();

        let envelope = Envelope {
            kind: "key-rotated".to_string(),
            key_base64: Some(general_purpose::STANDARD.encode(key)),
            node_id: Some(self.node_id.clone()),
        };
        self.send_to_peers(&envelope).await;

        tokio::time::sleep(ACK_WAIT).await;
        let acked = self.acks.lock().len();
        if acked < self.peers.len() {
            tracing::warn!(
                acked,
                peers = self.peers.len(),
                "some peers did not ack the key rotation; they may need a restart"
            );
        }
        acked
    }

    async fn send_to_peers(&self, envelope: &Envelope) {
        let Ok(payload) = serde_json::to_vec(envelope) else {
            return;
        };
        for peer in &self.peers {
            if let Err(err) = self.socket.send_to(&payload, peer).await {
                tracing::debug!(peer = %peer, error = %err, "cluster send failed");
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let envelope = Envelope {
            kind: "heartbeat".to_string(),
            key_base64: None,
            node_id: Some(self.node_id.clone()),
        };
        loop {
            self.send_to_peers(&envelope).await;
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        }
    }

    async fn recv_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    tracing::warn!(error = %err, "cluster receive failed");
                    continue;
                }
            };
            let Ok(envelope) = serde_json::from_slice::<Envelope>(&buf[..len]) else {
                continue;
            };

            match envelope.kind.as_str() {
                "heartbeat" => {
                    if let Some(node_id) = envelope.node_id {
                        if node_id != self.node_id {
                            self.alive.lock().insert(node_id, Instant::now());
                        }
                    }
                }
                "key-rotated" => {
                    let Some(encoded) = envelope.key_base64 else {
                        continue;
                    };
                    let Ok(bytes) = general_purpose::STANDARD.decode(&encoded) else {
                        continue;
                    };
                    let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) else {
                        continue;
                    };
                    self.store.adopt_key(key);
                    tracing::info!("adopted rotated encryption key from peer");

                    let ack = Envelope {
                        kind: "key-rotated-ack".to_string(),
                        key_base64: None,
                        node_id: Some(self.node_id.clone()),
                    };
                    if let Ok(payload) = serde_json::to_vec(&ack) {
                        let _ = self.socket.send_to(&payload, addr).await;
                    }
                }
                "key-rotated-ack" => {
                    if let Some(node_id) = envelope.node_id {
                        self.acks.lock().insert(node_id);
                    }
                }
                // Unknown types are ignored by contract.
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("c.db"), None).await.unwrap();
        (dir, store)
    }

    fn config(bind: &str, peers: Vec<String>, node_id: &str) -> ClusterConfig {
        ClusterConfig {
            bind: bind.to_string(),
            peers,
            node_id: Some(node_id.to_string()),
        }
    }

    #[tokio::test]
    async fn single_node_is_leader() {
        let (_dir, store) = test_store().await;
        let cluster = Cluster::start(&config("127.0.0.1:0", vec![], "a"), store)
            .await
            .unwrap();
        assert!(cluster.is_leader());
    }

    #[tokio::test]
    async fn smallest_live_node_wins() {
        let (_dir, store) = test_store().await;
        let cluster = Cluster::start(&config("127.0.0.1:0", vec![], "b"), store)
            .await
            .unwrap();

        // A smaller peer heartbeats: we lose leadership.
        cluster.alive.lock().insert("a".to_string(), Instant::now());
        assert!(!cluster.is_leader());

        // A larger peer does not matter.
        cluster.alive.lock().clear();
        cluster.alive.lock().insert("c".to_string(), Instant::now());
        assert!(cluster.is_leader());
    }

    #[tokio::test]
    async fn expired_peers_release_the_lock() {
        let (_dir, store) = test_store().await;
        let cluster = Cluster::start(&config("127.0.0.1:0", vec![], "b"), store)
            .await
            .unwrap();

        cluster
            .alive
            .lock()
            .insert("a".to_string(), Instant::now() - PEER_TTL * 2);
        assert!(cluster.is_leader());
    }

    #[tokio::test]
    async fn key_broadcast_reaches_peer() {
        let (_dir_a, store_a) = test_store().await;
        let (_dir_b, store_b) = test_store().await;

        // Bind b first so a can target it.
        let b = Cluster::start(&config("127.0.0.1:0", vec![], "b"), store_b.clone())
            .await
            .unwrap();
        let b_addr = b.socket.local_addr().unwrap().to_string();

        let a = Cluster::start(&config("127.0.0.1:0", vec![b_addr], "a"), store_a)
            .await
            .unwrap();

        let key = crate::store::encryption::SecretBox::derive_key("rotated");
        let acked = a.broadcast_key(key).await;
        assert_eq!(acked, 1);
    }
}
