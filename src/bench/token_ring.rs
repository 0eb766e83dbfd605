use std::sync::Arc;

use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use tracing::{debug, error, info, warn};

use crate::bench::records::{now_millis, random_payload, BenchmarkRecord};
use crate::bench::result_store::{ResultStore, RunId};
use crate::bench::worker_pool::WorkerPool;
use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::{RecordStream, WireRecord};
use crate::transport::service_id::ServiceId;
use crate::transport::{StreamListener, Transport};


// holder  -> PING ->  successor
// holder  <- PONG <-  successor
// holder  -> TOKEN -> successor

pub const TOKEN_SERVICE: ServiceId = ServiceId::new(b"TokenRtt");

pub struct Ping {
    pub payload: Bytes,
}

impl WireRecord for Ping {
    fn ser(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.payload);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        let payload = buf.copy_to_bytes(buf.remaining());
        Ok(Ping { payload })
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct Pong {
    pub ack: bool,
    pub received_at: u64,
}

impl WireRecord for Pong {
    fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ack as u8);
        buf.put_u64(self.received_at);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        Ok(Pong {
            ack: buf.try_get_u8()? != 0,
            received_at: buf.try_get_u64()?,
        })
    }
}

/// The token is the only carrier of protocol state: ring membership, round budget and the
///  timing records accumulated so far all travel inside it. It is owned by exactly one node
///  at a time - serializing it onto a stream is the only way ownership moves.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Token {
    pub run_id: RunId,
    pub master: PeerAddr,
    /// ring order defines hop succession: the successor of `devices[i]` is
    ///  `devices[(i + 1) % devices.len()]`
    pub devices: Vec<PeerAddr>,
    pub times: Vec<BenchmarkRecord>,
    pub payload_length: u32,
    pub remaining_rounds: u32,
}

impl WireRecord for Token {
    fn ser(&self, buf: &mut BytesMut) {
        self.run_id.ser(buf);
        self.master.ser(buf);
        buf.put_u32(self.devices.len() as u32);
        for device in &self.devices {
            device.ser(buf);
        }
        buf.put_u32(self.times.len() as u32);
        for record in &self.times {
            record.ser(buf);
        }
        buf.put_u32(self.payload_length);
        buf.put_u32(self.remaining_rounds);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        let run_id = RunId::try_deser(buf)?;
        let master = PeerAddr::try_deser(buf)?;

        let num_devices = buf.try_get_u32()?;
        let mut devices = Vec::with_capacity(num_devices as usize);
        for _ in 0..num_devices {
            devices.push(PeerAddr::try_deser(buf)?);
        }

        let num_times = buf.try_get_u32()?;
        let mut times = Vec::with_capacity(num_times as usize);
        for _ in 0..num_times {
            times.push(BenchmarkRecord::try_deser(buf)?);
        }

        Ok(Token {
            run_id,
            master,
            devices,
            times,
            payload_length: buf.try_get_u32()?,
            remaining_rounds: buf.try_get_u32()?,
        })
    }
}


/// One hop's send side, run by whichever node currently holds the token - the run's creator
///  for the first hop, afterwards whichever ring member just received it. Ping/pong bracket
///  the RTT measurement, then the token itself follows on the same connection and ownership
///  moves to the peer.
///
/// Any I/O failure aborts the hop: the half-finished record is discarded and the ring stalls
///  at this point - there is no retry and no error surfaced beyond the log.
pub(crate) async fn send_to_next_hop(transport: &dyn Transport, mut token: Token) -> anyhow::Result<()> {
    let myself = transport.self_addr();
    let self_idx = token.devices.iter()
        .position(|device| *device == myself)
        .ok_or_else(|| anyhow!("{} is not a member of the ring for run {}", myself, token.run_id))?;
    let next = token.devices[(self_idx + 1) % token.devices.len()];
    debug!("sending ping to {}", next);

    let mut record = BenchmarkRecord::new(myself, next, token.payload_length);
    record.started = now_millis();

    let mut stream = transport.connect(next, TOKEN_SERVICE).await?;
    record.connected = now_millis();

    let ping = Ping {
        payload: random_payload(token.payload_length as usize),
    };
    stream.write_record(&ping).await?;
    // stamped at local send completion, not at verified remote arrival
    record.received = now_millis();
    debug!("ping sent");

    let _pong: Pong = stream.read_record().await?;
    record.finished = now_millis();
    token.times.push(record);
    debug!("received pong, sending token");

    stream.write_record(&token).await?;
    stream.shutdown().await?;
    Ok(())
}


/// Receive side of the token ring protocol. Each accepted connection is one incoming hop:
///  answer the ping, take ownership of the token, do the master's round accounting if this
///  node is the master, and - unless the run just finalized - immediately act as the sender
///  for the next hop. The ring's liveness depends entirely on this continuation.
pub struct TokenRingService {
    transport: Arc<dyn Transport>,
    pool: WorkerPool,
    store: Arc<ResultStore>,
    listener: Box<dyn StreamListener>,
}

impl TokenRingService {
    pub async fn bind(transport: Arc<dyn Transport>, pool: WorkerPool, store: Arc<ResultStore>) -> anyhow::Result<TokenRingService> {
        let listener = transport.listen(TOKEN_SERVICE).await?;
        info!("listening for token traffic");
        Ok(TokenRingService {
            transport,
            pool,
            store,
            listener,
        })
    }

    pub async fn run(mut self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, from)) => {
                    let received_at = now_millis();
                    debug!("incoming hop from {}", from);

                    let transport = self.transport.clone();
                    let store = self.store.clone();
                    self.pool.submit(async move {
                        if let Err(e) = handle_hop(transport, store, stream, received_at).await {
                            error!("error handling token hop: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("failed to accept token connection: {:#}", e);
                }
            }
        }
    }
}

async fn handle_hop(
    transport: Arc<dyn Transport>,
    store: Arc<ResultStore>,
    mut stream: RecordStream,
    received_at: u64,
) -> anyhow::Result<()> {
    let _ping: Ping = stream.read_record().await?;
    stream.write_record(&Pong { ack: true, received_at }).await?;

    let mut token: Token = stream.read_record().await?;
    let _ = stream.shutdown().await;
    drop(stream);
    debug!("got the token for run {}", token.run_id);

    if token.master == transport.self_addr() {
        // the token completed one more full circuit
        token.remaining_rounds = token.remaining_rounds.saturating_sub(1);
        debug!("{} rounds remaining for run {}", token.remaining_rounds, token.run_id);

        if token.remaining_rounds == 0 {
            info!("run {} finished with {} records", token.run_id, token.times.len());
            store.put_run(token.run_id, token.times).await;
            return Ok(());
        }
    }

    send_to_next_hop(transport.as_ref(), token).await
}


/// Creates a token ring run. The creator canonically inserts itself at ring position 0 if
///  absent, which also makes it the run's master - the sole node that counts rounds and
///  finalizes results.
pub struct TokenRingRunner {
    transport: Arc<dyn Transport>,
}

impl TokenRingRunner {
    pub fn new(transport: Arc<dyn Transport>) -> TokenRingRunner {
        TokenRingRunner {
            transport,
        }
    }

    /// Returns the run id as soon as the first hop's send completed (or failed) - ring
    ///  completion is observed later through the [ResultStore], never synchronously.
    pub async fn execute(&self, payload_length: u32, num_rounds: u32, mut devices: Vec<PeerAddr>) -> RunId {
        let myself = self.transport.self_addr();
        if !devices.contains(&myself) {
            devices.insert(0, myself);
        }

        let run_id = RunId::random();
        let token = Token {
            run_id,
            master: myself,
            devices,
            times: Vec::new(),
            payload_length,
            remaining_rounds: num_rounds,
        };

        debug!("attempting to send the first ping for run {} with payload length {} and {} rounds", run_id, payload_length, num_rounds);
        if let Err(e) = send_to_next_hop(self.transport.as_ref(), token).await {
            // fire and forget: a failed first hop stalls the run before it begins, and the
            //  caller only ever notices by the results never appearing
            error!("error sending initial token for run {}: {:#}", run_id, e);
        }
        run_id
    }
}
