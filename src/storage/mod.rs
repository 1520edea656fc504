pub mod duckdb;
pub mod traits;

pub use traits::{
    ChannelStats, LogStats, MessageLog, MessageRecord, SourceWatermark, Storage, StorageError,
    WatermarkStore,
};
