pub mod peer_addr;
pub mod record_stream;
pub mod service_id;
pub mod tcp;

use async_trait::async_trait;

use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::RecordStream;
use crate::transport::service_id::ServiceId;


/// A [Transport] opens outbound and accepts inbound reliable byte streams, identified by a
///  logical [ServiceId]. It decouples the benchmark protocols from the actual network plumbing:
///  production code uses [tcp::TcpTransport], tests use an in-memory implementation.
///
/// Connect failures are terminal for the caller's current hop / iteration - no retry policy is
///  applied at this level.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// the address under which peers can reach this node. Equality of these addresses is what
    ///  elects a token ring's master, so it must round-trip unchanged through [PeerAddr]'s codec.
    fn self_addr(&self) -> PeerAddr;

    async fn connect(&self, peer: PeerAddr, service: ServiceId) -> anyhow::Result<RecordStream>;

    async fn listen(&self, service: ServiceId) -> anyhow::Result<Box<dyn StreamListener>>;
}

#[async_trait]
pub trait StreamListener: Send {
    /// Blocks until a peer connects under this listener's service id. Errors are transient:
    ///  callers are expected to log and keep accepting.
    async fn accept(&mut self) -> anyhow::Result<(RecordStream, PeerAddr)>;
}
