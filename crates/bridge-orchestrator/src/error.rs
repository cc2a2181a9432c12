use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("source client initialization failed: {0}")]
    Source(#[from] bridge_source::SourceError),
    #[error("sink client initialization failed: {0}")]
    Sink(#[from] bridge_sink::SinkError),
}
