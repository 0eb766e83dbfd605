use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut};
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::bench::records::BenchmarkRecord;
use crate::transport::record_stream::try_get_uuid;


/// Opaque identifier of one benchmark run, handed to the caller when the run starts and used
///  to fetch the results once the ring completes.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn random() -> RunId {
        RunId(Uuid::new_v4())
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.0.as_bytes());
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<RunId> {
        Ok(RunId(try_get_uuid(buf)?))
    }
}

impl Debug for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[run:{}]", self.0)
    }
}
impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// Completed runs' records, keyed by run id. Written exactly once per run (by the ring's
///  master, on finalization) and read any number of times afterwards. An absent key means
///  "no results yet" - the store cannot distinguish an unknown run from one still circling
///  the ring.
#[derive(Default)]
pub struct ResultStore {
    runs: RwLock<FxHashMap<RunId, Vec<BenchmarkRecord>>>,
}

impl ResultStore {
    pub fn new() -> ResultStore {
        Default::default()
    }

    pub async fn put_run(&self, run_id: RunId, records: Vec<BenchmarkRecord>) {
        let prev = self.runs.write().await
            .insert(run_id, records);
        if prev.is_some() {
            warn!("overwriting previously stored results for run {}", run_id);
        }
    }

    pub async fn get_run(&self, run_id: &RunId) -> Option<Vec<BenchmarkRecord>> {
        self.runs.read().await
            .get(run_id)
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::test_util::test_peer_addr;

    use super::*;

    fn record(n: u16) -> BenchmarkRecord {
        BenchmarkRecord::new(test_peer_addr(n), test_peer_addr(n + 1), 128)
    }

    #[tokio::test]
    async fn test_absent_run_is_none() {
        let store = ResultStore::new();
        assert_eq!(store.get_run(&RunId::random()).await, None);
    }

    #[tokio::test]
    async fn test_put_then_get_is_idempotent() {
        let store = ResultStore::new();
        let run_id = RunId::random();

        store.put_run(run_id, vec![record(1), record(2)]).await;

        let first = store.get_run(&run_id).await.unwrap();
        let second = store.get_run(&run_id).await.unwrap();
        assert_eq!(first, vec![record(1), record(2)]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_writers_to_distinct_runs() {
        let store = Arc::new(ResultStore::new());

        let run_ids = (0..16).map(|_| RunId::random()).collect::<Vec<_>>();
        let mut handles = Vec::new();
        for &run_id in &run_ids {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.put_run(run_id, vec![record(1)]).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for run_id in &run_ids {
            assert_eq!(store.get_run(run_id).await, Some(vec![record(1)]));
        }
    }

    #[test]
    fn test_run_id_ser_deser() {
        let run_id = RunId::random();
        let mut buf = bytes::BytesMut::new();
        run_id.ser(&mut buf);
        assert_eq!(buf.len(), 16);

        let mut buf = &buf[..];
        assert_eq!(RunId::try_deser(&mut buf).unwrap(), run_id);
    }
}
