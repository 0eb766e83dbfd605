use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bench::records::{now_millis, random_payload, MessageResult};
use crate::bench::worker_pool::WorkerPool;
use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::{try_get_uuid, RecordStream, WireRecord};
use crate::transport::service_id::ServiceId;
use crate::transport::{StreamListener, Transport};


pub const ECHO_SERVICE: ServiceId = ServiceId::new(b"MsgEcho\0");

pub struct EchoRequest {
    pub correlation_id: Uuid,
    pub payload: Bytes,
}

impl WireRecord for EchoRequest {
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(self.correlation_id.as_bytes());
        buf.extend_from_slice(&self.payload);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        let correlation_id = try_get_uuid(buf)?;
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(EchoRequest {
            correlation_id,
            payload,
        })
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct EchoResponse {
    pub correlation_id: Uuid,
    pub received_at: u64,
}

impl WireRecord for EchoResponse {
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(self.correlation_id.as_bytes());
        buf.put_u64(self.received_at);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        Ok(EchoResponse {
            correlation_id: try_get_uuid(buf)?,
            received_at: buf.try_get_u64()?,
        })
    }
}


/// Server side of the message echo protocol: one request, one response, then the connection
///  is closed - connections are not reused across iterations.
pub struct EchoServer {
    pool: WorkerPool,
    listener: Box<dyn StreamListener>,
}

impl EchoServer {
    pub async fn bind(transport: &dyn Transport, pool: WorkerPool) -> anyhow::Result<EchoServer> {
        let listener = transport.listen(ECHO_SERVICE).await?;
        info!("listening for echo messages");
        Ok(EchoServer {
            pool,
            listener,
        })
    }

    pub async fn run(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, from)) => {
                    debug!("echo message connection from {}", from);
                    self.pool.submit(handle_echo(stream));
                }
                Err(e) => {
                    warn!("failed to accept echo connection: {:#}", e);
                }
            }
        }
    }
}

async fn handle_echo(mut stream: RecordStream) {
    let request = match stream.read_record::<EchoRequest>().await {
        Ok(request) => request,
        Err(e) => {
            warn!("error reading echo request: {:#}", e);
            return;
        }
    };
    let received_at = now_millis();

    let response = EchoResponse {
        correlation_id: request.correlation_id,
        received_at,
    };
    if let Err(e) = stream.write_record(&response).await {
        warn!("error answering echo request [{}]: {:#}", request.correlation_id, e);
    }
    let _ = stream.shutdown().await;
}


#[derive(Debug, Clone, Eq, PartialEq)]
struct EchoTimes {
    started: u64,
    received: u64,
    finished: u64,
}

/// Client side: fans out `messages x devices` one-shot round trips through the worker pool
///  and blocks until every one of them reached a terminal state - the wait group sender is
///  dropped on every exit path, success or failure, so a dead peer cannot hang `execute`.
pub struct EchoRunner {
    transport: Arc<dyn Transport>,
    pool: WorkerPool,
    local_name: String,
}

impl EchoRunner {
    pub fn new(transport: Arc<dyn Transport>, pool: WorkerPool, local_name: String) -> EchoRunner {
        EchoRunner {
            transport,
            pool,
            local_name,
        }
    }

    pub async fn execute(&self, devices: &[PeerAddr], messages: u32, message_size: usize) -> Vec<MessageResult> {
        let times: Arc<RwLock<FxHashMap<Uuid, EchoTimes>>> = Default::default();

        // last generated correlation id per device wins - with messages > 1 earlier
        //  iterations of the same device are collapsed out of the projection below
        let mut device_correlation: FxHashMap<PeerAddr, Uuid> = Default::default();

        let (done_sender, mut done_receiver) = mpsc::channel::<()>(1);
        for _ in 0..messages {
            for &device in devices {
                let correlation_id = Uuid::new_v4();
                device_correlation.insert(device, correlation_id);

                self.pool.submit(send_one(
                    self.transport.clone(),
                    times.clone(),
                    device,
                    correlation_id,
                    message_size,
                    now_millis(),
                    done_sender.clone(),
                ));
            }
        }
        drop(done_sender);

        debug!("waiting for all echo tasks to terminate");
        while done_receiver.recv().await.is_some() {}

        let times = times.read().await;
        let mut results = Vec::new();
        for (device, correlation_id) in &device_correlation {
            if let Some(t) = times.get(correlation_id) {
                results.push(MessageResult {
                    local_name: self.local_name.clone(),
                    remote: *device,
                    size: message_size as u32,
                    started: t.started,
                    received: t.received,
                    finished: t.finished,
                });
            }
        }
        results
    }
}

async fn send_one(
    transport: Arc<dyn Transport>,
    times: Arc<RwLock<FxHashMap<Uuid, EchoTimes>>>,
    device: PeerAddr,
    correlation_id: Uuid,
    message_size: usize,
    started: u64,
    _done: mpsc::Sender<()>,
) {
    debug!("attempting to send message [{}] to {}, message size is {}", correlation_id, device, message_size);
    if let Err(e) = try_send_one(transport, times, device, correlation_id, message_size, started).await {
        error!("error sending message [{}] to {}: {:#}", correlation_id, device, e);
    }
    // _done dropped here - this is the wait group decrement
}

async fn try_send_one(
    transport: Arc<dyn Transport>,
    times: Arc<RwLock<FxHashMap<Uuid, EchoTimes>>>,
    device: PeerAddr,
    correlation_id: Uuid,
    message_size: usize,
    started: u64,
) -> anyhow::Result<()> {
    let mut stream = transport.connect(device, ECHO_SERVICE).await?;

    let request = EchoRequest {
        correlation_id,
        payload: random_payload(message_size),
    };
    stream.write_record(&request).await?;

    let response: EchoResponse = stream.read_record().await?;
    let finished = now_millis();

    times.write().await.insert(response.correlation_id, EchoTimes {
        started,
        received: response.received_at,
        finished,
    });
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use anyhow::bail;

    use crate::test_util::memory_transport::MemoryHub;
    use crate::test_util::test_peer_addr;

    use super::*;

    async fn start_echo_server(hub: &MemoryHub, number: u16) {
        let transport = hub.transport(test_peer_addr(number));
        let server = EchoServer::bind(transport.as_ref(), WorkerPool::new(2)).await.unwrap();
        tokio::spawn(server.run());
    }

    #[tokio::test]
    async fn test_one_message_per_device() {
        let hub = MemoryHub::new();
        start_echo_server(&hub, 1).await;
        start_echo_server(&hub, 2).await;

        let runner = EchoRunner::new(hub.transport(test_peer_addr(3)), WorkerPool::new(4), "client".to_string());
        let mut results = runner.execute(&[test_peer_addr(1), test_peer_addr(2)], 1, 64).await;

        results.sort_by_key(|r| r.remote);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].remote, test_peer_addr(1));
        assert_eq!(results[1].remote, test_peer_addr(2));
        for result in &results {
            assert_eq!(result.size, 64);
            assert!(result.started <= result.received);
            assert!(result.received <= result.finished);
        }
    }

    #[tokio::test]
    async fn test_multiple_messages_collapse_to_last_per_device() {
        let hub = MemoryHub::new();
        start_echo_server(&hub, 1).await;

        let runner = EchoRunner::new(hub.transport(test_peer_addr(3)), WorkerPool::new(4), "client".to_string());
        let results = runner.execute(&[test_peer_addr(1)], 3, 16).await;

        // three round trips happen, but the projection keeps only the device's last correlation id
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_dead_peer_does_not_hang_execute() {
        let hub = MemoryHub::new();
        start_echo_server(&hub, 1).await;

        let runner = EchoRunner::new(hub.transport(test_peer_addr(3)), WorkerPool::new(4), "client".to_string());
        // peer 9 has no listener - its task fails, decrements the wait group, yields no result
        let results = runner.execute(&[test_peer_addr(1), test_peer_addr(9)], 1, 16).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].remote, test_peer_addr(1));
    }

    struct CountingFailingTransport {
        myself: PeerAddr,
        connect_attempts: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingFailingTransport {
        fn self_addr(&self) -> PeerAddr {
            self.myself
        }

        async fn connect(&self, _peer: PeerAddr, _service: ServiceId) -> anyhow::Result<RecordStream> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            bail!("unreachable by construction");
        }

        async fn listen(&self, _service: ServiceId) -> anyhow::Result<Box<dyn StreamListener>> {
            bail!("not a listening transport");
        }
    }

    #[tokio::test]
    async fn test_execute_returns_only_after_all_task_terminations() {
        let transport = Arc::new(CountingFailingTransport {
            myself: test_peer_addr(3),
            connect_attempts: AtomicUsize::new(0),
        });

        let runner = EchoRunner::new(transport.clone(), WorkerPool::new(2), "client".to_string());
        let results = runner.execute(&[test_peer_addr(1), test_peer_addr(2)], 3, 16).await;

        assert!(results.is_empty());
        // messages x devices tasks all ran to termination before execute returned
        assert_eq!(transport.connect_attempts.load(Ordering::SeqCst), 6);
    }
}
