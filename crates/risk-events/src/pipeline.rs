use kafka_consumer::{RawRecord, RecordSource};
use kafka_wire::WireError;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;

use crate::decoder::decode_record;
use crate::sink::{Sink, SinkError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("consuming records failed")]
    Source(#[from] WireError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
    /// Terminal: the source or the sink failed.
    Failed,
    /// Terminal: shut down on request.
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub records: u64,
    pub decoded: u64,
    pub skipped: u64,
}

/// Pulls records, decodes them and hands each event to the sink in arrival order.
pub struct Pipeline<S: Sink> {
    sink: S,
    state: PipelineState,
    stats: PipelineStats,
}

impl<S: Sink> Pipeline<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            state: PipelineState::Idle,
            stats: PipelineStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Stream until `shutdown` turns true or a fatal error occurs.
    ///
    /// The flag is checked between polls, so the records of an in-flight poll
    /// are always written before stopping.
    pub async fn run<R: RecordSource + ?Sized>(
        &mut self,
        source: &mut R,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineStats, PipelineError> {
        self.state = PipelineState::Streaming;
        let result = self.stream(source, &shutdown).await;
        self.state = match result {
            Ok(()) => PipelineState::Stopped,
            Err(_) => PipelineState::Failed,
        };
        info!(
            "pipeline {:?}: records={} decoded={} skipped={}",
            self.state, self.stats.records, self.stats.decoded, self.stats.skipped
        );
        result.map(|()| self.stats)
    }

    async fn stream<R: RecordSource + ?Sized>(
        &mut self,
        source: &mut R,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        while !*shutdown.borrow() {
            let records = source.poll().await?;
            if !records.is_empty() {
                debug!("polled {} record(s)", records.len());
            }
            for record in records {
                self.handle(record)?;
            }
        }
        Ok(())
    }

    fn handle(&mut self, record: RawRecord) -> Result<(), SinkError> {
        self.stats.records += 1;
        match decode_record(record.payload.as_deref()) {
            Ok(event) => {
                self.sink.write(&event)?;
                self.stats.decoded += 1;
            }
            Err(e) => {
                warn!(
                    "skipping record at partition {} offset {}: {e}",
                    record.partition, record.offset
                );
                self.stats.skipped += 1;
            }
        }
        Ok(())
    }
}
