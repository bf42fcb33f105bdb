//! 基础设施层：持有稀缺资源，只暴露能力

pub mod kv_store;
pub mod sleeper;

pub use kv_store::{FsStore, KeyValueStore, MemoryStore};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
