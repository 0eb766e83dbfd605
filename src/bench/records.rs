use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use rand::RngCore;

use crate::transport::peer_addr::PeerAddr;
use crate::transport::record_stream::WireRecord;


/// wall clock milliseconds since the epoch - the message and token protocols stamp with this
pub fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH)
        .expect("system time is before UNIX epoch") //TODO
        .as_millis() as u64
}

pub fn random_payload(len: usize) -> Bytes {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.into()
}


/// Result records can render themselves as one CSV row - the operator-facing output format.
pub trait CsvRecord {
    fn csv_header() -> &'static str;
    fn to_csv_row(&self) -> String;
}

pub fn to_csv<T: CsvRecord>(records: &[T]) -> String {
    let mut out = String::new();
    out.push_str(T::csv_header());
    out.push('\n');
    for record in records {
        out.push_str(&record.to_csv_row());
        out.push('\n');
    }
    out
}


/// One token ring hop's timing: stamps are taken on the sending node, immediately before /
///  after the protocol steps they are named for. All stamps are wall clock milliseconds.
///
/// NB: `received` is stamped when the ping *write* completes locally, not when the peer
///  actually received it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BenchmarkRecord {
    pub sender: PeerAddr,
    pub receiver: PeerAddr,
    pub payload_size: u32,
    pub started: u64,
    pub connected: u64,
    pub received: u64,
    pub finished: u64,
}

impl BenchmarkRecord {
    pub fn new(sender: PeerAddr, receiver: PeerAddr, payload_size: u32) -> BenchmarkRecord {
        BenchmarkRecord {
            sender,
            receiver,
            payload_size,
            started: 0,
            connected: 0,
            received: 0,
            finished: 0,
        }
    }
}

impl WireRecord for BenchmarkRecord {
    fn ser(&self, buf: &mut BytesMut) {
        self.sender.ser(buf);
        self.receiver.ser(buf);
        buf.put_u32(self.payload_size);
        buf.put_u64(self.started);
        buf.put_u64(self.connected);
        buf.put_u64(self.received);
        buf.put_u64(self.finished);
    }

    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        Ok(BenchmarkRecord {
            sender: PeerAddr::try_deser(buf)?,
            receiver: PeerAddr::try_deser(buf)?,
            payload_size: buf.try_get_u32()?,
            started: buf.try_get_u64()?,
            connected: buf.try_get_u64()?,
            received: buf.try_get_u64()?,
            finished: buf.try_get_u64()?,
        })
    }
}

impl CsvRecord for BenchmarkRecord {
    fn csv_header() -> &'static str {
        "sender,receiver,payload_size,started,connected,received,finished"
    }

    fn to_csv_row(&self) -> String {
        format!("{},{},{},{},{},{},{}",
            self.sender, self.receiver, self.payload_size,
            self.started, self.connected, self.received, self.finished)
    }
}


/// One frame pulled from the throughput server. `nanos` is monotonic time between issuing the
///  read and having the full frame in hand.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ThroughputResult {
    pub local_name: String,
    pub remote: PeerAddr,
    pub bytes: u32,
    pub nanos: u64,
}

impl CsvRecord for ThroughputResult {
    fn csv_header() -> &'static str {
        "from,to,bytes,nanotime"
    }

    fn to_csv_row(&self) -> String {
        format!("{},{},{},{}", self.local_name, self.remote, self.bytes, self.nanos)
    }
}


/// One request/response round trip of the message echo protocol. `received` is the remote
///  node's receipt stamp, `started` and `finished` are local wall clock stamps.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MessageResult {
    pub local_name: String,
    pub remote: PeerAddr,
    pub size: u32,
    pub started: u64,
    pub received: u64,
    pub finished: u64,
}

impl CsvRecord for MessageResult {
    fn csv_header() -> &'static str {
        "from,to,message_size,started,received,finished"
    }

    fn to_csv_row(&self) -> String {
        format!("{},{},{},{},{},{}",
            self.local_name, self.remote, self.size,
            self.started, self.received, self.finished)
    }
}

#[cfg(test)]
mod test {
    use rstest::rstest;

    use crate::test_util::test_peer_addr;

    use super::*;

    #[rstest]
    #[case::zeroed(BenchmarkRecord::new(test_peer_addr(1), test_peer_addr(2), 128))]
    #[case::stamped(BenchmarkRecord {
        sender: test_peer_addr(3),
        receiver: test_peer_addr(4),
        payload_size: 8,
        started: 100,
        connected: 101,
        received: 103,
        finished: 107,
    })]
    fn test_benchmark_record_ser_deser(#[case] record: BenchmarkRecord) {
        let mut buf = BytesMut::new();
        record.ser(&mut buf);

        let mut buf = &buf[..];
        let actual = BenchmarkRecord::try_deser(&mut buf).unwrap();
        assert_eq!(actual, record);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_benchmark_record_deser_underflow() {
        let record = BenchmarkRecord::new(test_peer_addr(1), test_peer_addr(2), 128);
        let mut buf = BytesMut::new();
        record.ser(&mut buf);

        let mut truncated = &buf[..buf.len() - 1];
        assert!(BenchmarkRecord::try_deser(&mut truncated).is_err());
    }

    #[test]
    fn test_to_csv() {
        let results = vec![
            ThroughputResult { local_name: "a".to_string(), remote: test_peer_addr(2), bytes: 4096, nanos: 1500 },
            ThroughputResult { local_name: "a".to_string(), remote: test_peer_addr(2), bytes: 4096, nanos: 1700 },
        ];

        assert_eq!(to_csv(&results),
            "from,to,bytes,nanotime\n\
             a,127.0.0.1:2,4096,1500\n\
             a,127.0.0.1:2,4096,1700\n");
    }

    #[test]
    fn test_random_payload_len() {
        assert_eq!(random_payload(0).len(), 0);
        assert_eq!(random_payload(128).len(), 128);
    }
}
