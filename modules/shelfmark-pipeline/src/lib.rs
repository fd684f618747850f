pub mod batch;
pub mod cluster;
pub mod cpu_pool;
pub mod dedup;
pub mod embedder;
pub mod fingerprint;
pub mod labeler;
pub mod tags;

pub use batch::BatchRunner;
pub use cluster::{ClusterChain, ClusterParams};
pub use cpu_pool::CpuPool;
pub use embedder::{EmbeddingProvider, HttpEmbedder};
