use std::collections::hash_map::Entry;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, RwLock};

use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::RecordStream;
use crate::transport::service_id::ServiceId;
use crate::transport::{StreamListener, Transport};


type ListenerRegistry = Arc<RwLock<FxHashMap<(PeerAddr, ServiceId), mpsc::Sender<(DuplexStream, PeerAddr)>>>>;

/// Wires any number of in-process [MemoryTransport] nodes together over [tokio::io::duplex]
///  pipes - enough to run a whole token ring inside one test without sockets.
#[derive(Clone, Default)]
pub struct MemoryHub {
    listeners: ListenerRegistry,
}

impl MemoryHub {
    pub fn new() -> MemoryHub {
        Default::default()
    }

    pub fn transport(&self, addr: PeerAddr) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            hub: self.clone(),
            myself: addr,
        })
    }

    /// makes a node unreachable from now on: connects to it fail, streams already
    ///  established keep working
    pub async fn disconnect(&self, addr: PeerAddr) {
        self.listeners.write().await
            .retain(|(listener_addr, _), _| *listener_addr != addr);
    }
}

pub struct MemoryTransport {
    hub: MemoryHub,
    myself: PeerAddr,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn self_addr(&self) -> PeerAddr {
        self.myself
    }

    async fn connect(&self, peer: PeerAddr, service: ServiceId) -> anyhow::Result<RecordStream> {
        let sender = self.hub.listeners.read().await
            .get(&(peer, service))
            .cloned()
            .ok_or_else(|| anyhow!("connection refused: {} has no listener for {:?}", peer, service))?;

        let (near, far) = tokio::io::duplex(64 * 1024);
        sender.send((far, self.myself)).await
            .map_err(|_| anyhow!("connection refused: {}'s listener for {:?} is gone", peer, service))?;
        Ok(RecordStream::new(near))
    }

    async fn listen(&self, service: ServiceId) -> anyhow::Result<Box<dyn StreamListener>> {
        let (sender, receiver) = mpsc::channel(32);
        match self.hub.listeners.write().await.entry((self.myself, service)) {
            Entry::Occupied(_) => {
                bail!("registering a second listener for service {:?} on {}", service, self.myself);
            }
            Entry::Vacant(e) => {
                e.insert(sender);
            }
        }
        Ok(Box::new(MemoryListener { receiver }))
    }
}

pub struct MemoryListener {
    receiver: mpsc::Receiver<(DuplexStream, PeerAddr)>,
}

#[async_trait]
impl StreamListener for MemoryListener {
    async fn accept(&mut self) -> anyhow::Result<(RecordStream, PeerAddr)> {
        match self.receiver.recv().await {
            Some((stream, from)) => Ok((RecordStream::new(stream), from)),
            None => Err(anyhow!("memory hub was shut down")),
        }
    }
}
