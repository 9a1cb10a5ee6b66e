//! Structured error taxonomy for the runner.
//!
//! Every error that can surface from a scenario run carries a stable
//! numeric code so CI tooling and editor integrations can branch on
//! failure kind without parsing message text.

use thiserror::Error;

/// A stable, numbered error code.
///
/// Ranges: `E1xxx` parse, `E2xxx` variable/config, `E3xxx` request
/// execution, `E4xxx` assertion/capture, `E5xxx` internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const MISSING_FENCE_CLOSE: ErrorCode = ErrorCode(1001);
    pub const MISSING_METHOD_URL: ErrorCode = ErrorCode(1002);
    pub const CYCLE_DETECTED: ErrorCode = ErrorCode(1003);
    pub const UNKNOWN_EDGE_REFERENCE: ErrorCode = ErrorCode(1004);
    pub const INVALID_HTTP_METHOD: ErrorCode = ErrorCode(1005);
    pub const MALFORMED_DIRECTIVE: ErrorCode = ErrorCode(1006);
    pub const CAPTURES_IN_PARALLEL: ErrorCode = ErrorCode(1007);

    pub const VARIABLE_MISSING: ErrorCode = ErrorCode(2001);
    pub const UNKNOWN_ENVIRONMENT: ErrorCode = ErrorCode(2002);
    pub const CONFIG_FILE_INVALID: ErrorCode = ErrorCode(2003);
    pub const CONFIG_FILE_EXISTS: ErrorCode = ErrorCode(2004);

    pub const NETWORK_ERROR: ErrorCode = ErrorCode(3001);
    pub const TIMEOUT_ERROR: ErrorCode = ErrorCode(3002);
    pub const PROTOCOL_ERROR: ErrorCode = ErrorCode(3003);
    pub const RETRIES_EXHAUSTED: ErrorCode = ErrorCode(3004);
    pub const GRPC_CONFIG_ERROR: ErrorCode = ErrorCode(3005);

    pub const ASSERTION_FAILED: ErrorCode = ErrorCode(4001);
    pub const CAPTURE_PATH_NOT_FOUND: ErrorCode = ErrorCode(4002);

    pub const SERIALIZATION_ERROR: ErrorCode = ErrorCode(5001);
    pub const IO_ERROR: ErrorCode = ErrorCode(5002);
    pub const NO_TRANSPORT_FOR_STEP: ErrorCode = ErrorCode(5003);

    pub fn formatted(&self) -> String {
        format!("E{}", self.0)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Parse,
            2 => ErrorCategory::Config,
            3 => ErrorCategory::Request,
            4 => ErrorCategory::Assertion,
            _ => ErrorCategory::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Config,
    Request,
    Assertion,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCategory::Parse => "parse",
            ErrorCategory::Config => "config",
            ErrorCategory::Request => "request",
            ErrorCategory::Assertion => "assertion",
            ErrorCategory::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

/// Top-level error type returned by every core component.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("[{}] unclosed fence starting at line {line}", ErrorCode::MISSING_FENCE_CLOSE.formatted())]
    UnclosedFence { line: usize },

    #[error("[{}] step '{step_id}' is missing 'METHOD URL' on its first line", ErrorCode::MISSING_METHOD_URL.formatted())]
    MissingMethodUrl { step_id: String },

    #[error("[{}] cycle detected at step '{step_id}'", ErrorCode::CYCLE_DETECTED.formatted())]
    CycleDetected { step_id: String },

    #[error("[{}] edge references unknown step '{step_id}'", ErrorCode::UNKNOWN_EDGE_REFERENCE.formatted())]
    UnknownEdgeReference { step_id: String },

    #[error("[{}] step '{step_id}': invalid HTTP method '{method}'", ErrorCode::INVALID_HTTP_METHOD.formatted())]
    InvalidHttpMethod { step_id: String, method: String },

    #[error("[{}] malformed directive on line {line}: '{text}'", ErrorCode::MALFORMED_DIRECTIVE.formatted())]
    MalformedDirective { line: usize, text: String },

    #[error("[{}] step '{step_id}' declares captures, which are not allowed when running with --parallel", ErrorCode::CAPTURES_IN_PARALLEL.formatted())]
    ParallelCapturesDisallowed { step_id: String },

    #[error("[{}] variable '{name}' is not set and has no default", ErrorCode::VARIABLE_MISSING.formatted())]
    VariableMissing { name: String },

    #[error("[{}] unknown environment '{name}'", ErrorCode::UNKNOWN_ENVIRONMENT.formatted())]
    UnknownEnvironment { name: String },

    #[error("[{}] invalid config file: {reason}", ErrorCode::CONFIG_FILE_INVALID.formatted())]
    ConfigFileInvalid { reason: String },

    #[error("[{}] config file already exists at {path}", ErrorCode::CONFIG_FILE_EXISTS.formatted())]
    ConfigFileExists { path: String },

    #[error("[{}] network error calling {url}: {source}", ErrorCode::NETWORK_ERROR.formatted())]
    NetworkError { url: String, source: reqwest::Error },

    #[error("[{}] request to {url} timed out after {elapsed_ms}ms", ErrorCode::TIMEOUT_ERROR.formatted())]
    TimeoutError { url: String, elapsed_ms: u64 },

    #[error("[{}] could not read response body from {url}: {reason}", ErrorCode::PROTOCOL_ERROR.formatted())]
    ProtocolError { url: String, reason: String },

    #[error("[{}] step '{step_id}' exhausted {attempts} attempts: {last_error}", ErrorCode::RETRIES_EXHAUSTED.formatted())]
    RetriesExhausted {
        step_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("[{}] gRPC config error: {reason}", ErrorCode::GRPC_CONFIG_ERROR.formatted())]
    GrpcConfigError { reason: String },

    #[error("[{}] assertion failed: {detail}", ErrorCode::ASSERTION_FAILED.formatted())]
    AssertionFailed { detail: String },

    #[error("[{}] capture '{name}' path '{path}' does not resolve", ErrorCode::CAPTURE_PATH_NOT_FOUND.formatted())]
    CapturePathNotFound { name: String, path: String },

    #[error("[{}] serialization error: {0}", ErrorCode::SERIALIZATION_ERROR.formatted())]
    Serialization(#[from] serde_json::Error),

    #[error("[{}] io error: {0}", ErrorCode::IO_ERROR.formatted())]
    Io(#[from] std::io::Error),

    #[error("[{}] no transport registered for step type '{step_type}'", ErrorCode::NO_TRANSPORT_FOR_STEP.formatted())]
    NoTransportForStep { step_type: String },
}

impl RunnerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RunnerError::UnclosedFence { .. } => ErrorCode::MISSING_FENCE_CLOSE,
            RunnerError::MissingMethodUrl { .. } => ErrorCode::MISSING_METHOD_URL,
            RunnerError::CycleDetected { .. } => ErrorCode::CYCLE_DETECTED,
            RunnerError::UnknownEdgeReference { .. } => ErrorCode::UNKNOWN_EDGE_REFERENCE,
            RunnerError::InvalidHttpMethod { .. } => ErrorCode::INVALID_HTTP_METHOD,
            RunnerError::MalformedDirective { .. } => ErrorCode::MALFORMED_DIRECTIVE,
            RunnerError::ParallelCapturesDisallowed { .. } => ErrorCode::CAPTURES_IN_PARALLEL,
            RunnerError::VariableMissing { .. } => ErrorCode::VARIABLE_MISSING,
            RunnerError::UnknownEnvironment { .. } => ErrorCode::UNKNOWN_ENVIRONMENT,
            RunnerError::ConfigFileInvalid { .. } => ErrorCode::CONFIG_FILE_INVALID,
            RunnerError::ConfigFileExists { .. } => ErrorCode::CONFIG_FILE_EXISTS,
            RunnerError::NetworkError { .. } => ErrorCode::NETWORK_ERROR,
            RunnerError::TimeoutError { .. } => ErrorCode::TIMEOUT_ERROR,
            RunnerError::ProtocolError { .. } => ErrorCode::PROTOCOL_ERROR,
            RunnerError::RetriesExhausted { .. } => ErrorCode::RETRIES_EXHAUSTED,
            RunnerError::GrpcConfigError { .. } => ErrorCode::GRPC_CONFIG_ERROR,
            RunnerError::AssertionFailed { .. } => ErrorCode::ASSERTION_FAILED,
            RunnerError::CapturePathNotFound { .. } => ErrorCode::CAPTURE_PATH_NOT_FOUND,
            RunnerError::Serialization(_) => ErrorCode::SERIALIZATION_ERROR,
            RunnerError::Io(_) => ErrorCode::IO_ERROR,
            RunnerError::NoTransportForStep { .. } => ErrorCode::NO_TRANSPORT_FOR_STEP,
        }
    }

    /// Maps this error onto one of the CLI's four exit codes.
    pub fn exit_code(&self) -> i32 {
        match self.code().category() {
            ErrorCategory::Parse => 2,
            ErrorCategory::Config => 3,
            _ => 1,
        }
    }
}
