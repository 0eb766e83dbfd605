use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bench::records::{random_payload, ThroughputResult};
use crate::bench::worker_pool::WorkerPool;
use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::{RecordStream, WireRecord};
use crate::transport::service_id::ServiceId;
use crate::transport::{StreamListener, Transport};


pub const THROUGHPUT_SERVICE: ServiceId = ServiceId::new(b"Thruput\0");

pub struct ThroughputFrame {
    pub payload: Bytes,
}

impl ThroughputFrame {
    pub fn random(size: usize) -> ThroughputFrame {
        ThroughputFrame {
            payload: random_payload(size),
        }
    }
}

impl WireRecord for ThroughputFrame {
    fn ser(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.payload);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(ThroughputFrame { payload })
    }
}


/// Server side of the throughput protocol: every accepted connection gets a task that pushes
///  random fixed-size frames until the connection breaks. The server does not know the
///  client's iteration count, so the generator is unbounded and I/O failure is its regular
///  way of terminating.
pub struct ThroughputServer {
    pool: WorkerPool,
    frame_size: usize,
    listener: Box<dyn StreamListener>,
}

impl ThroughputServer {
    pub async fn bind(transport: &dyn Transport, pool: WorkerPool, frame_size: usize) -> anyhow::Result<ThroughputServer> {
        let listener = transport.listen(THROUGHPUT_SERVICE).await?;
        info!("listening for throughput connections");
        Ok(ThroughputServer {
            pool,
            frame_size,
            listener,
        })
    }

    pub async fn run(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, from)) => {
                    debug!("throughput connection from {}", from);
                    let frame_size = self.frame_size;
                    self.pool.submit(serve_frames(stream, frame_size));
                }
                Err(e) => {
                    warn!("failed to accept throughput connection: {:#}", e);
                }
            }
        }
    }
}

async fn serve_frames(mut stream: RecordStream, frame_size: usize) {
    loop {
        let frame = ThroughputFrame::random(frame_size);
        if let Err(e) = stream.write_record(&frame).await {
            debug!("throughput connection closed: {:#}", e);
            return;
        }
    }
}


/// Client side: pull `iterations` frames over a single connection, timing each read with the
///  monotonic clock. Fully sequential. On I/O failure the remaining iterations are abandoned
///  and whatever was collected so far is the result - partial output is valid output.
pub struct ThroughputRunner {
    transport: Arc<dyn Transport>,
    local_name: String,
}

impl ThroughputRunner {
    pub fn new(transport: Arc<dyn Transport>, local_name: String) -> ThroughputRunner {
        ThroughputRunner {
            transport,
            local_name,
        }
    }

    pub async fn execute(&self, peer: PeerAddr, iterations: u32) -> Vec<ThroughputResult> {
        let mut results = Vec::new();

        debug!("attempting throughput connection to {}", peer);
        let mut stream = match self.transport.connect(peer, THROUGHPUT_SERVICE).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("error connecting to {}: {:#}", peer, e);
                return results;
            }
        };

        for _ in 0..iterations {
            let start = Instant::now();
            match stream.read_record::<ThroughputFrame>().await {
                Ok(frame) => {
                    results.push(ThroughputResult {
                        local_name: self.local_name.clone(),
                        remote: peer,
                        bytes: frame.payload.len() as u32,
                        nanos: start.elapsed().as_nanos() as u64,
                    });
                }
                Err(e) => {
                    error!("aborting throughput run after {} frames: {:#}", results.len(), e);
                    break;
                }
            }
        }
        debug!("{} of {} throughput iterations completed", results.len(), iterations);
        results
    }
}
