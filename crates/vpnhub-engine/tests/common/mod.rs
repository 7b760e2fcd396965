//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use vpnhub_core::result::AppResult;
use vpnhub_database::MemoryLedger;
use vpnhub_engine::adapters::{
    ManagementClient, OpenVpnSource, StatusSource, WgPeer, WireGuardControl, WireGuardSource,
};
use vpnhub_engine::{PolicyEngine, ReconciliationPass, TerminationDispatcher};

pub const GB: i64 = 1024 * 1024 * 1024;

/// What the ledger looked like when a kill reached a daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillObservation {
    pub identity: String,
    pub ledger_in_transaction: bool,
    pub commits_at_kill: u64,
}

impl KillObservation {
    fn capture(identity: &str, ledger: &MemoryLedger) -> Self {
        Self {
            identity: identity.to_string(),
            ledger_in_transaction: ledger.in_transaction(),
            commits_at_kill: ledger.commits(),
        }
    }
}

#[derive(Debug, Default)]
struct OpenVpnState {
    /// `(username, real address) -> (rx, tx)`.
    clients: BTreeMap<(String, String), (u64, u64)>,
    kills: Vec<KillObservation>,
}

/// Scripted OpenVPN management interface on a loopback port.
pub struct FakeOpenVpn {
    addr: String,
    state: Arc<Mutex<OpenVpnState>>,
    accept: JoinHandle<()>,
}

impl FakeOpenVpn {
    pub async fn start(ledger: MemoryLedger) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(OpenVpnState::default()));

        let shared = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared), ledger.clone()));
            }
        });

        Self {
            addr,
            state,
            accept,
        }
    }

    pub fn client(&self) -> ManagementClient {
        ManagementClient::new(self.addr.clone(), Duration::from_secs(2))
    }

    /// Add or update one connection of `username` from `real_addr`.
    pub fn connect(&self, username: &str, rx: u64, tx: u64, real_addr: &str) {
        self.state
            .lock()
            .unwrap()
            .clients
            .insert((username.to_string(), real_addr.to_string()), (rx, tx));
    }

    /// Drop every connection of `username`.
    pub fn disconnect(&self, username: &str) {
        self.state
            .lock()
            .unwrap()
            .clients
            .retain(|(name, _), _| name != username);
    }

    /// Drop the connection of `username` from `real_addr` only.
    pub fn disconnect_from(&self, username: &str, real_addr: &str) {
        self.state
            .lock()
            .unwrap()
            .clients
            .remove(&(username.to_string(), real_addr.to_string()));
    }

    pub fn kills(&self) -> Vec<KillObservation> {
        self.state.lock().unwrap().kills.clone()
    }

    /// Stop listening; later connections are refused.
    pub async fn shutdown(self) {
        self.accept.abort();
        let _ = self.accept.await;
    }
}

async fn serve(stream: TcpStream, state: Arc<Mutex<OpenVpnState>>, ledger: MemoryLedger) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    if writer
        .write_all(b">INFO:OpenVPN Management Interface Version 5 -- type 'help' for more info\r\n")
        .await
        .is_err()
    {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match line.trim() {
            "quit" => break,
            "version" => "OpenVPN Version: OpenVPN 2.6.8\r\nManagement Version: 5\r\nEND\r\n".to_string(),
            "status 2" => {
                let state = state.lock().unwrap();
                let mut out = String::from(
                    "TITLE,OpenVPN 2.6.8\r\nHEADER,CLIENT_LIST,Common Name,Real Address,Virtual Address,Virtual IPv6 Address,Bytes Received,Bytes Sent,Connected Since,Connected Since (time_t),Username,Client ID,Peer ID,Data Channel Cipher\r\n",
                );
                for (i, ((name, real), (rx, tx))) in state.clients.iter().enumerate() {
                    out.push_str(&format!(
                        "CLIENT_LIST,{name},{real},10.8.0.{},,{rx},{tx},2024-06-18 04:23:03,1718684583,{name},{i},{i},AES-256-GCM\r\n",
                        i + 2
                    ));
                }
                out.push_str("END\r\n");
                out
            }
            cmd => match cmd.strip_prefix("kill ") {
                Some(identity) => {
                    let mut state = state.lock().unwrap();
                    state.kills.push(KillObservation::capture(identity, &ledger));
                    let before = state.clients.len();
                    state.clients.retain(|(name, _), _| name != identity);
                    let killed = before - state.clients.len();
                    if killed > 0 {
                        format!("SUCCESS: common name '{identity}' found, {killed} client(s) killed\r\n")
                    } else {
                        format!("ERROR: common name '{identity}' not found\r\n")
                    }
                }
                None => "ERROR: unknown command, enter 'help' for more options\r\n".to_string(),
            },
        };
        if writer.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// In-memory WireGuard interface.
#[derive(Debug)]
pub struct FakeWireGuard {
    ledger: MemoryLedger,
    peers: Mutex<Vec<WgPeer>>,
    removed: Mutex<Vec<KillObservation>>,
}

impl FakeWireGuard {
    pub fn new(ledger: MemoryLedger) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            peers: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        })
    }

    pub fn set_peer(&self, public_key: &str, rx: u64, tx: u64, live: bool) {
        let mut peers = self.peers.lock().unwrap();
        peers.retain(|p| p.public_key != public_key);
        peers.push(WgPeer {
            public_key: public_key.to_string(),
            endpoint: "198.51.100.20:51820".to_string(),
            rx_bytes: rx,
            tx_bytes: tx,
            latest_handshake: if live { 1 } else { 0 },
            live,
        });
    }

    pub fn removed(&self) -> Vec<KillObservation> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WireGuardControl for FakeWireGuard {
    async fn list_peers(&self) -> AppResult<Vec<WgPeer>> {
        Ok(self.peers.lock().unwrap().clone())
    }

    async fn remove_peer(&self, public_key: &str) -> AppResult<()> {
        self.removed
            .lock()
            .unwrap()
            .push(KillObservation::capture(public_key, &self.ledger));
        self.peers.lock().unwrap().retain(|p| p.public_key != public_key);
        Ok(())
    }
}

/// A pass over `ledger` with whichever fakes are given.
pub fn build_pass(
    ledger: &MemoryLedger,
    openvpn: Option<&FakeOpenVpn>,
    wireguard: Option<Arc<FakeWireGuard>>,
) -> ReconciliationPass {
    let mut sources: Vec<Arc<dyn StatusSource>> = Vec::new();
    let management = openvpn.map(FakeOpenVpn::client);
    if let Some(client) = &management {
        sources.push(Arc::new(OpenVpnSource::new(client.clone(), None)));
    }
    let control = wireguard.map(|wg| wg as Arc<dyn WireGuardControl>);
    if let Some(control) = &control {
        sources.push(Arc::new(WireGuardSource::new(Arc::clone(control))));
    }

    ReconciliationPass::new(
        Arc::new(ledger.clone()),
        sources,
        PolicyEngine::new(chrono::FixedOffset::east_opt(0).unwrap()),
        TerminationDispatcher::new(management, control),
    )
}
