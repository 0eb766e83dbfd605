use std::sync::Arc;

use tracing::debug;

use crate::bench::config::BenchConfig;
use crate::bench::message_echo::{EchoRunner, EchoServer};
use crate::bench::records::{BenchmarkRecord, MessageResult, ThroughputResult};
use crate::bench::result_store::{ResultStore, RunId};
use crate::bench::throughput::{ThroughputRunner, ThroughputServer};
use crate::bench::token_ring::{TokenRingRunner, TokenRingService};
use crate::bench::worker_pool::WorkerPool;
use crate::transport::peer_addr::PeerAddr;
use crate::transport::Transport;


/// Parameter problems rejected at the control boundary, before any protocol work starts.
///  Everything past this boundary is fire-and-forget: I/O trouble shows up as partial or
///  absent results, never as an error to the caller.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("must specify at least one target device")]
    NoTargets,
    #[error("a token ring needs at least two distinct members, got {0}")]
    RingTooSmall(usize),
    #[error("duplicate ring member {0}")]
    DuplicateRingMember(PeerAddr),
}

/// One benchmark node: owns the transport, the shared worker pool and the result store, and
///  exposes the operator-facing run operations. The control surface (HTTP or whatever else)
///  lives outside this crate and calls these.
pub struct BenchNode {
    transport: Arc<dyn Transport>,
    pool: WorkerPool,
    store: Arc<ResultStore>,
    config: Arc<BenchConfig>,
}

impl BenchNode {
    pub fn new(transport: Arc<dyn Transport>, config: BenchConfig) -> BenchNode {
        let pool = WorkerPool::new(config.num_workers);
        BenchNode {
            transport,
            pool,
            store: Arc::new(ResultStore::new()),
            config: Arc::new(config),
        }
    }

    pub fn self_addr(&self) -> PeerAddr {
        self.transport.self_addr()
    }

    /// Binds all three protocol listeners and spawns their accept loops. Once this returns,
    ///  the node is reachable as a throughput server, an echo server and a token ring
    ///  member. The loops run for the life of the process.
    pub async fn start_listeners(&self) -> anyhow::Result<()> {
        debug!("setting up listeners");

        let throughput = ThroughputServer::bind(self.transport.as_ref(), self.pool.clone(), self.config.frame_size).await?;
        tokio::spawn(throughput.run());

        let echo = EchoServer::bind(self.transport.as_ref(), self.pool.clone()).await?;
        tokio::spawn(echo.run());

        let token_ring = TokenRingService::bind(self.transport.clone(), self.pool.clone(), self.store.clone()).await?;
        tokio::spawn(token_ring.run());

        Ok(())
    }

    /// Pulls frames from one peer's throughput server. Never fails: an unreachable peer or a
    ///  broken stream just shortens the result list.
    pub async fn run_throughput(&self, peer: PeerAddr, iterations: Option<u32>) -> Vec<ThroughputResult> {
        let iterations = iterations.unwrap_or(self.config.default_iterations);
        ThroughputRunner::new(self.transport.clone(), self.config.local_name.clone())
            .execute(peer, iterations)
            .await
    }

    pub async fn run_message_echo(
        &self,
        devices: Vec<PeerAddr>,
        messages: Option<u32>,
        message_size: Option<usize>,
    ) -> Result<Vec<MessageResult>, ValidationError> {
        if devices.is_empty() {
            return Err(ValidationError::NoTargets);
        }
        let messages = messages.unwrap_or(self.config.default_messages);
        let message_size = message_size.unwrap_or(self.config.default_message_size);

        let results = EchoRunner::new(self.transport.clone(), self.pool.clone(), self.config.local_name.clone())
            .execute(&devices, messages, message_size)
            .await;
        Ok(results)
    }

    /// Starts a token ring run and returns its id immediately - results become available in
    ///  the store once the ring completes, which the caller observes via
    ///  [BenchNode::fetch_token_ring_result].
    pub async fn run_token_ring(
        &self,
        devices: Vec<PeerAddr>,
        payload_length: Option<usize>,
        num_rounds: Option<u32>,
    ) -> Result<RunId, ValidationError> {
        // duplicates would poison hop succession (indexOf finds the first occurrence only)
        for (i, device) in devices.iter().enumerate() {
            if devices[..i].contains(device) {
                return Err(ValidationError::DuplicateRingMember(*device));
            }
        }

        let mut ring_size = devices.len();
        if !devices.contains(&self.transport.self_addr()) {
            ring_size += 1;
        }
        if ring_size < 2 {
            return Err(ValidationError::RingTooSmall(ring_size));
        }

        let payload_length = payload_length.unwrap_or(self.config.payload_length);
        let num_rounds = num_rounds.unwrap_or(self.config.num_rounds);

        let run_id = TokenRingRunner::new(self.transport.clone())
            .execute(payload_length as u32, num_rounds, devices)
            .await;
        Ok(run_id)
    }

    /// `None` means "no results yet" - the store cannot tell an unknown run id from a run
    ///  that is still circling the ring.
    pub async fn fetch_token_ring_result(&self, run_id: &RunId) -> Option<Vec<BenchmarkRecord>> {
        self.store.get_run(run_id).await
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::sleep;

    use crate::bench::records::to_csv;
    use crate::test_util::memory_transport::MemoryHub;
    use crate::test_util::test_peer_addr;

    use super::*;

    async fn start_node(hub: &MemoryHub, number: u16, name: &str) -> BenchNode {
        let node = BenchNode::new(hub.transport(test_peer_addr(number)), BenchConfig::new(name));
        node.start_listeners().await.unwrap();
        node
    }

    #[tokio::test]
    async fn test_echo_requires_a_target() {
        let hub = MemoryHub::new();
        let node = start_node(&hub, 1, "a").await;

        assert_eq!(
            node.run_message_echo(vec![], None, None).await,
            Err(ValidationError::NoTargets),
        );
    }

    #[tokio::test]
    async fn test_token_ring_requires_two_members() {
        let hub = MemoryHub::new();
        let node = start_node(&hub, 1, "a").await;

        // self insertion counts: an empty device list yields a ring of one
        assert_eq!(
            node.run_token_ring(vec![], None, None).await,
            Err(ValidationError::RingTooSmall(1)),
        );
        assert_eq!(
            node.run_token_ring(vec![test_peer_addr(1)], None, None).await,
            Err(ValidationError::RingTooSmall(1)),
        );
    }

    #[tokio::test]
    async fn test_token_ring_rejects_duplicate_members() {
        let hub = MemoryHub::new();
        let node = start_node(&hub, 1, "a").await;

        assert_eq!(
            node.run_token_ring(vec![test_peer_addr(2), test_peer_addr(2)], None, None).await,
            Err(ValidationError::DuplicateRingMember(test_peer_addr(2))),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_token_ring_between_nodes() {
        let hub = MemoryHub::new();
        let a = start_node(&hub, 1, "a").await;
        let _b = start_node(&hub, 2, "b").await;

        let run_id = a.run_token_ring(vec![test_peer_addr(2)], Some(8), Some(2)).await.unwrap();

        for _ in 0..1000 {
            if a.fetch_token_ring_result(&run_id).await.is_some() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        let records = a.fetch_token_ring_result(&run_id).await.unwrap();
        assert_eq!(records.len(), 4);

        let csv = to_csv(&records);
        assert!(csv.starts_with("sender,receiver,payload_size,started,connected,received,finished\n"));
        assert_eq!(csv.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_end_to_end_throughput_and_echo_defaults() {
        let hub = MemoryHub::new();
        let a = start_node(&hub, 1, "a").await;
        let _b = start_node(&hub, 2, "b").await;

        let throughput = a.run_throughput(test_peer_addr(2), Some(3)).await;
        assert_eq!(throughput.len(), 3);

        let echo = a.run_message_echo(vec![test_peer_addr(2)], None, Some(128)).await.unwrap();
        assert_eq!(echo.len(), 1);
        assert_eq!(echo[0].local_name, "a");
    }
}
