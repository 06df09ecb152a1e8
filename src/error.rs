use thiserror::Error;

use crate::validate::Rejection;

/// The five classes every failure surfaced to the user falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Precondition,
    Transport,
    Backend,
    Quality,
    Exhaustion,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Precondition => "precondition",
            ErrorClass::Transport => "transport",
            ErrorClass::Backend => "backend",
            ErrorClass::Quality => "quality",
            ErrorClass::Exhaustion => "exhaustion",
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" [{s}]")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum FixError {
    #[error("missing credential for {provider}: {env_var} not set")]
    MissingCredential { provider: String, env_var: String },

    #[error("no candidate models to try")]
    NoCandidates,

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("could not fetch {provider} model catalog: {message}")]
    Catalog { provider: String, message: String },

    #[error("transport error from {provider} ({model}): {message}")]
    Transport {
        provider: String,
        model: String,
        message: String,
    },

    #[error("request to {provider} ({model}) timed out after {after_ms}ms")]
    Timeout {
        provider: String,
        model: String,
        after_ms: u64,
    },

    #[error("cannot connect to {provider} at {url}")]
    Unreachable { provider: String, url: String },

    #[error("backend error from {provider} ({model}){}: {message}", status_suffix(.status))]
    Backend {
        provider: String,
        model: String,
        status: Option<u16>,
        message: String,
    },

    #[error("unusable response from {provider} ({model}): {reason}")]
    Quality {
        provider: String,
        model: String,
        reason: Rejection,
    },

    #[error("all {attempts} candidate model(s) failed; last was {last_model}: {last_error}")]
    Exhausted {
        attempts: usize,
        last_model: String,
        last_error: Box<FixError>,
    },
}

impl FixError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingCredential { .. }
            | Self::NoCandidates
            | Self::InvalidArgs(_)
            | Self::Catalog { .. } => ErrorClass::Precondition,
            Self::Transport { .. } | Self::Timeout { .. } | Self::Unreachable { .. } => {
                ErrorClass::Transport
            }
            Self::Backend { .. } => ErrorClass::Backend,
            Self::Quality { .. } => ErrorClass::Quality,
            Self::Exhausted { .. } => ErrorClass::Exhaustion,
        }
    }

    /// Recoverable errors advance the fallback walk instead of ending it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transport | ErrorClass::Backend | ErrorClass::Quality
        )
    }

    /// Stable machine-readable code plus an optional hint for the user.
    pub fn code(&self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::MissingCredential { .. } => (
                "missing_api_key",
                Some("export OPENROUTER_API_KEY or put it in .env"),
            ),
            Self::NoCandidates => ("no_candidates", Some("check --model, --free and --local-model")),
            Self::InvalidArgs(_) => ("invalid_args", None),
            Self::Catalog { .. } => ("catalog_unavailable", Some("check network access to the provider")),
            Self::Transport { .. } => ("network_error", None),
            Self::Timeout { .. } => ("timeout", Some("try increasing --timeout")),
            Self::Unreachable { .. } => ("unreachable", Some("is the local chat server running?")),
            Self::Backend { .. } => ("backend_error", None),
            Self::Quality { .. } => ("invalid_response", None),
            Self::Exhausted { .. } => ("exhausted", Some("raise --max-fallbacks or try another model")),
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Transport { model, .. }
            | Self::Timeout { model, .. }
            | Self::Backend { model, .. }
            | Self::Quality { model, .. } => Some(model),
            Self::Exhausted { last_model, .. } => Some(last_model),
            _ => None,
        }
    }
}
