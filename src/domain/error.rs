//! Domain error types.

/// A parse error with position information for condition and indicator parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for tradeloop.
#[derive(Debug, thiserror::Error)]
pub enum TradeloopError {
    #[error("insufficient data for {context}: have {have} candles, need {need}")]
    InsufficientData {
        context: String,
        have: usize,
        need: usize,
    },

    #[error("invalid candle data: {reason}")]
    InvalidData { reason: String },

    #[error("invalid strategy: {reason}")]
    InvalidStrategy { reason: String },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("already in position")]
    AlreadyInPosition,

    #[error("not in position")]
    NotInPosition,

    #[error("operation rejected by risk rules: {reason}")]
    RiskRejected { reason: String },

    #[error("connection error: {reason}")]
    Connection { reason: String },

    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("historical data fetch failed: {reason}")]
    DataFetch { reason: String },

    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("session already running: {id}")]
    SessionExists { id: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TradeloopError {
    /// Transient errors feed the reconnect machine instead of reaching callers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TradeloopError::Connection { .. } | TradeloopError::RateLimited { .. }
        )
    }
}

impl From<&TradeloopError> for std::process::ExitCode {
    fn from(err: &TradeloopError) -> Self {
        let code: u8 = match err {
            TradeloopError::Io(_) => 1,
            TradeloopError::ConfigParse { .. }
            | TradeloopError::ConfigMissing { .. }
            | TradeloopError::ConfigInvalid { .. } => 2,
            TradeloopError::DataFetch { .. } => 3,
            TradeloopError::RuleParse(_)
            | TradeloopError::InvalidStrategy { .. }
            | TradeloopError::RiskRejected { .. } => 4,
            TradeloopError::InsufficientData { .. } | TradeloopError::InvalidData { .. } => 5,
            TradeloopError::AlreadyInPosition
            | TradeloopError::NotInPosition
            | TradeloopError::Connection { .. }
            | TradeloopError::RateLimited { .. }
            | TradeloopError::SessionNotFound { .. }
            | TradeloopError::SessionExists { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
