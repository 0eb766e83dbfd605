use anyhow::bail;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;


pub const MAX_RECORD_SIZE: usize = 16*1024*1024; //TODO make this configurable

/// A typed record that can travel over a [RecordStream]. Implementations serialize into a
///  [BytesMut] and deserialize from any [Buf], leaving unconsumed bytes in place so codecs
///  compose.
pub trait WireRecord: Send + Sized {
    fn ser(&self, buf: &mut BytesMut);
    fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self>;
}

/// One record at a time over a reliable byte stream: a u32 length prefix followed by the
///  record's serialized bytes. Reading and writing are blocking (in the async sense) and
///  strictly sequential - the benchmark protocols rely on that for their timing brackets.
pub struct RecordStream {
    io: Box<dyn ByteStream>,
}

pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

impl RecordStream {
    pub fn new(io: impl ByteStream + 'static) -> RecordStream {
        RecordStream {
            io: Box::new(io),
        }
    }

    pub async fn write_record<T: WireRecord>(&mut self, record: &T) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        record.ser(&mut buf);
        if buf.len() > MAX_RECORD_SIZE {
            bail!("record of {} bytes exceeds max record size of {} bytes", buf.len(), MAX_RECORD_SIZE);
        }
        self.io.write_u32(buf.len() as u32).await?;
        self.io.write_all(&buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn read_record<T: WireRecord>(&mut self) -> anyhow::Result<T> {
        let len = self.io.read_u32().await? as usize;
        if len > MAX_RECORD_SIZE {
            bail!("incoming record of {} bytes exceeds max record size of {} bytes", len, MAX_RECORD_SIZE);
        }
        let mut buf = vec![0u8; len];
        self.io.read_exact(&mut buf).await?;

        let mut buf = buf.as_slice();
        T::try_deser(&mut buf)
    }

    /// flushes and closes the write half. Idempotent - a second shutdown is a no-op at the
    ///  OS level, and errors from it are of no interest to callers that are done with the
    ///  stream anyway.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

pub(crate) fn try_get_uuid(buf: &mut impl Buf) -> anyhow::Result<Uuid> {
    if buf.remaining() < 16 {
        bail!("buffer underflow");
    }
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod test {
    use bytes::BufMut;
    use bytes_varint::try_get_fixed::TryGetFixedSupport;

    use super::*;

    #[derive(Debug, Eq, PartialEq)]
    struct TestRecord {
        value: u32,
    }
    impl WireRecord for TestRecord {
        fn ser(&self, buf: &mut BytesMut) {
            buf.put_u32(self.value);
        }

        fn try_deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
            Ok(TestRecord { value: buf.try_get_u32()? })
        }
    }

    #[tokio::test]
    async fn test_write_read_record() {
        let (near, far) = tokio::io::duplex(1024);
        let mut writer = RecordStream::new(near);
        let mut reader = RecordStream::new(far);

        writer.write_record(&TestRecord { value: 42 }).await.unwrap();
        writer.write_record(&TestRecord { value: 43 }).await.unwrap();

        assert_eq!(reader.read_record::<TestRecord>().await.unwrap(), TestRecord { value: 42 });
        assert_eq!(reader.read_record::<TestRecord>().await.unwrap(), TestRecord { value: 43 });
    }

    #[tokio::test]
    async fn test_read_after_peer_shutdown_is_err() {
        let (near, far) = tokio::io::duplex(1024);
        let mut writer = RecordStream::new(near);
        let mut reader = RecordStream::new(far);

        writer.write_record(&TestRecord { value: 1 }).await.unwrap();
        writer.shutdown().await.unwrap();
        drop(writer);

        assert_eq!(reader.read_record::<TestRecord>().await.unwrap(), TestRecord { value: 1 });
        assert!(reader.read_record::<TestRecord>().await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_incoming_record_is_rejected() {
        let (near, far) = tokio::io::duplex(1024);
        let mut reader = RecordStream::new(far);

        let mut raw = near;
        raw.write_u32((MAX_RECORD_SIZE + 1) as u32).await.unwrap();

        assert!(reader.read_record::<TestRecord>().await.is_err());
    }
}
