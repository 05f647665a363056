use thiserror::Error;

/// Failures talking to the brokerage or market-data REST endpoints
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Missing credential: {0} is not set")]
    MissingCredential(&'static str),
}

/// Startup account checks. Carries every failed check, not just the first.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Account validation failed:\n{}", format_reasons(.0))]
    Account(Vec<String>),

    #[error("Could not fetch account state: {0}")]
    Api(#[from] ApiError),
}

fn format_reasons(reasons: &[String]) -> String {
    reasons
        .iter()
        .map(|r| format!("- {}", r))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Insufficient data: short window has {short} prices, long window has {long}")]
    InsufficientData { short: usize, long: usize },

    #[error("Invalid multiplier {name}={value}: must be in (0, 1]")]
    InvalidMultiplier { name: &'static str, value: f64 },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid order sizing: {0}")]
    InvalidSizing(String),

    #[error("Order submission rejected: {0}")]
    Submission(#[source] ApiError),

    #[error("Failed to read account or position: {0}")]
    Account(#[source] ApiError),

    #[error("Order monitoring ended unresolved: {0}")]
    Monitor(String),

    #[error("Failed to record trade: {0}")]
    Ledger(#[from] LedgerError),
}
