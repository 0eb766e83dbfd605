/// One configuration structure for all benchmark protocols - per-run parameters that the
///  caller leaves unset fall back to these values.
#[derive(Debug)]
pub struct BenchConfig {
    /// human-readable name of this node, reported in result records
    pub local_name: String,

    pub default_iterations: u32,

    pub default_messages: u32,
    pub default_message_size: usize,

    /// size of the random ping payload carried on every token ring hop
    pub payload_length: usize,
    pub num_rounds: u32,

    /// size of the frames the throughput server pushes
    pub frame_size: usize,

    pub num_workers: usize,
}

impl BenchConfig {
    pub fn new(local_name: impl Into<String>) -> BenchConfig {
        BenchConfig {
            local_name: local_name.into(),
            default_iterations: 10,
            default_messages: 1,
            default_message_size: 2 * 1000 * 1024,
            payload_length: 128,
            num_rounds: 5,
            frame_size: 4096,
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}
