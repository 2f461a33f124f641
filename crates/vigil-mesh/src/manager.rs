//! The mesh itself: accepts inbound peer connections, dials configured
//! outbound peers on a reconnect timer, and hands live connections off to
//! [`connection::spawn`] (§4.5).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_events::Bus;
use vigil_registry::Registry;
use vigil_types::{EndpointName, Message};

use crate::connection::{self, ConnectionConfig, ConnectionHandle};
use crate::error::{MeshError, Result};
use crate::identity;
use crate::tls;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// The mesh's own picture of which peers currently have a live,
/// installed connection — mirrors the copy-on-write subscriber list in
/// `vigil-events::Bus` so the cluster router can ask "is X connected?"
/// synchronously from the authority rule (§4.7).
pub struct Mesh {
    registry: Arc<Registry>,
    bus: Bus,
    connections: ArcSwap<HashMap<EndpointName, ConnectionHandle>>,
    server_config: Arc<tokio_rustls::rustls::ServerConfig>,
    client_config: Arc<tokio_rustls::rustls::ClientConfig>,
    self_name: EndpointName,
    conn_cfg: ConnectionConfig,
    bind_address: SocketAddr,
    reconnect_interval: Duration,
}

impl Mesh {
    pub fn new(
        self_name: EndpointName,
        bind_address: SocketAddr,
        cert_dir: &Path,
        registry: Arc<Registry>,
        bus: Bus,
        conn_cfg: ConnectionConfig,
        reconnect_interval: Duration,
    ) -> Result<Arc<Self>> {
        let cert_path = cert_dir.join("endpoint.crt");
        let key_path = cert_dir.join("endpoint.key");
        let ca_path = cert_dir.join("ca.crt");

        Ok(Arc::new(Self {
            registry,
            bus,
            connections: ArcSwap::from_pointee(HashMap::new()),
            server_config: tls::server_config(&cert_path, &key_path, &ca_path)?,
            client_config: tls::client_config(&cert_path, &key_path, &ca_path)?,
            self_name,
            conn_cfg,
            bind_address,
            reconnect_interval,
        }))
    }

    /// Runs the accept loop and reconnect ticker until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.bind_address).await?;
        info!(addr = %self.bind_address, "mesh listening");

        let accept_self = Arc::clone(&self);
        let accept_shutdown = shutdown.clone();
        let accept_task = tokio::spawn(async move {
            accept_self.accept_loop(listener, accept_shutdown).await;
        });

        let reconnect_self = Arc::clone(&self);
        let reconnect_shutdown = shutdown.clone();
        let reconnect_task = tokio::spawn(async move {
            reconnect_self.reconnect_loop(reconnect_shutdown).await;
        });

        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = accept_task => {}
            _ = reconnect_task => {}
        }
        Ok(())
    }

    /// Enqueues `message` on the named peer's outbound queue. Returns
    /// `false` if the peer isn't currently connected — callers don't
    /// treat that as an error (§4.7: relay only to connected peers).
    pub fn send(&self, name: &EndpointName, message: Message) -> bool {
        let current = self.connections.load();
        match current.get(name) {
            Some(handle) if handle.outbound.send(message).is_ok() => true,
            Some(_) => {
                // Writer loop exited and dropped its receiver; mirror
                // `Bus::prune`'s lazy cleanup instead of erroring.
                self.forget(name);
                false
            }
            None => false,
        }
    }

    pub fn connected_peers(&self) -> Vec<EndpointName> {
        self.connections.load().keys().cloned().collect()
    }

    pub fn is_connected(&self, name: &EndpointName) -> bool {
        self.connections.load().contains_key(name)
    }

    fn forget(&self, name: &EndpointName) {
        self.connections.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(name);
            next
        });
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let acceptor = TlsAcceptor::from(Arc::clone(&self.server_config));
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => return,
                accepted = listener.accept() => accepted,
            };
            let (tcp, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };

            let this = Arc::clone(&self);
            let acceptor = acceptor.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_inbound(tcp, acceptor, shutdown).await {
                    warn!(%peer_addr, %err, "inbound handshake failed");
                }
            });
        }
    }

    async fn handle_inbound(
        &self,
        tcp: TcpStream,
        acceptor: TlsAcceptor,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let stream = acceptor.accept(tcp).await?;
        let peer_cert = stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(<[_]>::first)
            .cloned()
            .ok_or(MeshError::MissingPeerCertificate)?;
        let cn = identity::peer_common_name(&peer_cert)?;
        let name = EndpointName(cn);

        if self.registry.get_endpoint(&name).is_none() {
            return Err(MeshError::UnknownPeer { cn: name.0 });
        }

        self.install_connection(name, stream, shutdown).await;
        Ok(())
    }

    async fn dial(self: &Arc<Self>, name: EndpointName, host: String, port: u16, shutdown: CancellationToken) {
        let addr = format!("{host}:{port}");
        let connect = async {
            let tcp = TcpStream::connect(&addr).await?;
            let connector = TlsConnector::from(Arc::clone(&self.client_config));
            let server_name = ServerName::try_from(name.0.clone())
                .map_err(|_| MeshError::Tls(format!("invalid server name: {}", name.0)))?;
            let stream = connector.connect(server_name, tcp).await?;
            Ok::<_, MeshError>(stream)
        };

        match tokio::time::timeout(DIAL_TIMEOUT, connect).await {
            Ok(Ok(stream)) => self.install_connection(name, stream, shutdown).await,
            Ok(Err(err)) => warn!(peer = %name, %err, "dial failed"),
            Err(_elapsed) => warn!(peer = %name, "dial timed out"),
        }
    }

    async fn install_connection<S>(&self, name: EndpointName, stream: S, shutdown: CancellationToken)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let handle = connection::spawn(
            name.clone(),
            stream,
            self.conn_cfg,
            Arc::clone(&self.registry),
            self.bus.clone(),
            shutdown,
        );
        self.connections.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(name.clone(), handle.clone());
            next
        });
        debug!(peer = %name, "connection installed");
    }

    async fn reconnect_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.reconnect_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            for endpoint in self.registry.iter_endpoints() {
                let (name, host_port) = {
                    let endpoint = endpoint.read().await;
                    (endpoint.name.clone(), endpoint.host_port.clone())
                };
                if name == self.self_name || self.is_connected(&name) {
                    continue;
                }
                if let Some((host, port)) = host_port {
                    self.clone().dial(name, host, port, shutdown.clone()).await;
                }
            }
        }
    }
}
