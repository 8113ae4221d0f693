use thiserror::Error;

/// Fatal errors that prevent the pipeline from starting at all (spec §7,
/// "Init errors"). The caller surfaces these directly; nothing recovers
/// from them internally.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("fft_size {0} is not a power of two in [2^8, 2^17]")]
    InvalidFftSize(usize),

    #[error("sample_rate {rate} must be greater than AUDIO_RATE ({audio_rate})")]
    InvalidSampleRate { rate: u32, audio_rate: u32 },

    #[error("channel '{label}' frequency {freq_hz} Hz is outside receiver band (warned, accepted at attenuated response)")]
    ChannelFrequencyOutOfBand { label: String, freq_hz: i64 },

    #[error("failed to allocate FFT plan of size {0}")]
    FftPlanAllocation(usize),

    #[error("config error: {0}")]
    Config(String),

    #[error("out of memory while allocating {what}")]
    OutOfMemory { what: &'static str },
}

/// Recoverable runtime errors surfaced from a sink writer (spec §7,
/// "Recoverable sink errors"). The core only observes whether a block was
/// accepted; anything more specific stays local to the sink.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("sink is in back-off, block dropped")]
    BackingOff,
}

/// Top-level error returned by `PipelineContext::start` and the CLI
/// orchestrator: either the config failed to parse/load, or a component
/// failed to initialize (spec §7).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error("no receivers configured")]
    NoReceivers,
}

pub type InitResult<T> = Result<T, InitError>;
pub type OutputResult<T> = Result<T, OutputError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
