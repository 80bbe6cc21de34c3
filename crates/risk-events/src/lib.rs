//! Risk event decoding and the pull → decode → sink pipeline.

pub mod decoder;
pub mod pipeline;
pub mod sink;

pub use decoder::{decode, decode_record, DecodeError, RiskEvent};
pub use pipeline::{Pipeline, PipelineError, PipelineState, PipelineStats};
pub use sink::{ConsoleSink, Sink, SinkError};
