pub mod config;
pub mod message_echo;
pub mod node;
pub mod records;
pub mod result_store;
pub mod throughput;
pub mod token_ring;
pub mod worker_pool;
