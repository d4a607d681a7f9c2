pub mod logger;
pub mod ring;
pub mod sink;

pub use logger::{LogEntry, StructuredLogger};
pub use ring::RingBuffer;
pub use sink::FileSink;
