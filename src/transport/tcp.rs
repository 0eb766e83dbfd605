use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::RecordStream;
use crate::transport::service_id::ServiceId;
use crate::transport::{StreamListener, Transport};


type ServiceRegistry = Arc<RwLock<FxHashMap<ServiceId, mpsc::Sender<(TcpStream, SocketAddr)>>>>;

/// TCP implementation of [Transport]: one acceptor socket per node, with the connecting side
///  announcing the [ServiceId] it wants as an eight byte preamble. The accept loop dispatches
///  each incoming stream to whatever listener is registered for that id, so all protocols
///  share a single port.
pub struct TcpTransport {
    myself: PeerAddr,
    services: ServiceRegistry,
}

impl TcpTransport {
    pub async fn bind(self_addr: SocketAddr) -> anyhow::Result<TcpTransport> {
        let tcp_listener = TcpListener::bind(self_addr).await?;
        let myself = PeerAddr::from(tcp_listener.local_addr()?);
        let services: ServiceRegistry = Default::default();

        let loop_services = services.clone();
        tokio::spawn(accept_loop(tcp_listener, loop_services));

        Ok(TcpTransport {
            myself,
            services,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn self_addr(&self) -> PeerAddr {
        self.myself
    }

    async fn connect(&self, peer: PeerAddr, service: ServiceId) -> anyhow::Result<RecordStream> {
        let mut stream = TcpStream::connect(peer.socket_addr).await?;
        stream.set_nodelay(true)?;
        stream.write_u64(service.0).await?;
        Ok(RecordStream::new(stream))
    }

    async fn listen(&self, service: ServiceId) -> anyhow::Result<Box<dyn StreamListener>> {
        let (sender, receiver) = mpsc::channel(32);
        match self.services.write().await.entry(service) {
            Entry::Occupied(_) => {
                bail!("registering a second listener for service {:?}", service);
            }
            Entry::Vacant(e) => {
                e.insert(sender);
            }
        }
        Ok(Box::new(TcpServiceListener { receiver }))
    }
}

async fn accept_loop(tcp_listener: TcpListener, services: ServiceRegistry) {
    loop {
        match tcp_listener.accept().await {
            Ok((stream, from)) => {
                let services = services.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatch_stream(stream, from, services).await {
                        warn!("error dispatching incoming stream from {}: {:#}", from, e);
                    }
                });
            }
            Err(e) => {
                // transient by contract - log and keep accepting
                warn!("failed to accept incoming connection: {}", e);
            }
        }
    }
}

async fn dispatch_stream(mut stream: TcpStream, from: SocketAddr, services: ServiceRegistry) -> anyhow::Result<()> {
    let service = ServiceId(stream.read_u64().await?);
    debug!("incoming stream from {} for service {:?}", from, service);

    let sender = services.read().await
        .get(&service)
        .cloned();
    match sender {
        Some(sender) => {
            sender.send((stream, from)).await
                .map_err(|_| anyhow!("listener for service {:?} is gone", service))
        }
        None => {
            bail!("no listener registered for service {:?}", service);
        }
    }
}

struct TcpServiceListener {
    receiver: mpsc::Receiver<(TcpStream, SocketAddr)>,
}

#[async_trait]
impl StreamListener for TcpServiceListener {
    async fn accept(&mut self) -> anyhow::Result<(RecordStream, PeerAddr)> {
        match self.receiver.recv().await {
            Some((stream, from)) => {
                stream.set_nodelay(true)?;
                Ok((RecordStream::new(stream), PeerAddr::from(from)))
            }
            None => Err(anyhow!("transport was shut down")),
        }
    }
}
