//! File side of a transfer: chunk production, reassembly, progress.

pub mod consumer;
pub mod producer;
pub mod progress;
pub mod rate;

pub use consumer::FileConsumer;
pub use producer::{ChunkEvent, ChunkStream, FileProducer};
pub use progress::{
    ProgressObservation, ProgressReporter, ProgressSender, ProgressUpdate, TransferSummary,
    progress_channel,
};
pub use rate::RateEstimator;
