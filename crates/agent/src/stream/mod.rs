//! Streaming response pipeline: a blocking generation worker feeding a
//! bounded queue, and a buffered consumer yielding cleaned text chunks.

pub mod buffer;
pub mod pipeline;

pub use buffer::{FlushPolicy, StreamBuffer};
pub use pipeline::{PipelineSettings, ResponseStream, stream_response};
