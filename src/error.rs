use thiserror::Error;

/// Top-level orchestrator error. Each variant wraps a component-specific
/// error and exposes the error-taxonomy category (validation / not-found /
/// transient / fatal / partial) used to pick retry and HTTP-status policy.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("intent translation error: {0}")]
    Intent(#[from] IntentError),

    #[error("placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("package generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("transport-network error: {0}")]
    Tn(#[from] TnError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Error-taxonomy category from the error handling design. The reconciler
/// uses this to pick a retry policy; the DMS façade uses it to pick a
/// status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    AlreadyExists,
    Conflict,
    Transient,
    Fatal,
    Partial,
}

pub trait Categorized {
    fn category(&self) -> ErrorCategory;
}

#[derive(Error, Debug)]
pub enum IntentError {
    #[error("intent text is empty")]
    EmptyIntent,

    #[error("derived QoS profile violates schema: {reason}")]
    SchemaViolation { reason: String },
}

impl Categorized for IntentError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("no candidate site satisfies hard constraints: {reasons:?}")]
    NoCandidates { reasons: Vec<(String, String)> },

    #[error("capacity exhausted across all sites")]
    CapacityExhausted,

    #[error("unknown network function: {nf_id}")]
    UnknownNf { nf_id: String },
}

impl Categorized for PlacementError {
    fn category(&self) -> ErrorCategory {
        match self {
            PlacementError::NoCandidates { .. } | PlacementError::CapacityExhausted => {
                ErrorCategory::Validation
            }
            PlacementError::UnknownNf { .. } => ErrorCategory::NotFound,
        }
    }
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("template render error: missing variable {variable}")]
    TemplateRenderError { variable: String },

    #[error("validation failed: rule={rule} file={file} reason={rationale}")]
    ValidationFailed {
        rule: String,
        file: String,
        rationale: String,
    },
}

impl Categorized for GenerationError {
    fn category(&self) -> ErrorCategory {
        match self {
            GenerationError::TemplateNotFound { .. } => ErrorCategory::NotFound,
            GenerationError::TemplateRenderError { .. }
            | GenerationError::ValidationFailed { .. } => ErrorCategory::Validation,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("vnf not found: {id}")]
    NotFound { id: String },

    #[error("vnf already exists: {id}")]
    AlreadyExists { id: String },

    #[error("conflict: observed generation {observed} ahead of spec generation {spec}")]
    Conflict { observed: u64, spec: u64 },

    #[error("cluster {cluster} unreachable: {reason}")]
    ClusterUnreachable { cluster: String, reason: String },

    #[error("integrity violation: {reason}")]
    Integrity { reason: String },

    #[error("operation timed out")]
    Timeout,

    #[error("partial failure across clusters: {failed:?}")]
    Partial { failed: Vec<String> },
}

impl Categorized for ReconcileError {
    fn category(&self) -> ErrorCategory {
        match self {
            ReconcileError::NotFound { .. } => ErrorCategory::NotFound,
            ReconcileError::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
            ReconcileError::Conflict { .. } => ErrorCategory::Conflict,
            ReconcileError::ClusterUnreachable { .. } | ReconcileError::Timeout => {
                ErrorCategory::Transient
            }
            ReconcileError::Integrity { .. } => ErrorCategory::Fatal,
            ReconcileError::Partial { .. } => ErrorCategory::Partial,
        }
    }
}

#[derive(Error, Debug)]
pub enum TnError {
    #[error("command not in allowlist: {command}")]
    CommandNotAllowed { command: String },

    #[error("argument rejected by grammar: {argument}")]
    ArgumentRejected { argument: String },

    #[error("external command failed: {command} ({reason})")]
    CommandFailed { command: String, reason: String },

    #[error("command timed out after {timeout_secs}s")]
    CommandTimeout { timeout_secs: u64 },

    #[error("transactional apply failed, rolled back: {reason}")]
    TransactionRolledBack { reason: String },

    #[error("probe failed: {reason}")]
    ProbeFailed { reason: String },
}

impl Categorized for TnError {
    fn category(&self) -> ErrorCategory {
        match self {
            TnError::CommandNotAllowed { .. } | TnError::ArgumentRejected { .. } => {
                ErrorCategory::Fatal
            }
            TnError::CommandFailed { .. }
            | TnError::CommandTimeout { .. }
            | TnError::ProbeFailed { .. } => ErrorCategory::Transient,
            TnError::TransactionRolledBack { .. } => ErrorCategory::Fatal,
        }
    }
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("path escapes declared root: {path}")]
    PathEscapesRoot { path: String },

    #[error("input exceeds maximum length of {max} bytes")]
    TooLong { max: usize },

    #[error("input contains disallowed characters: {detail}")]
    DisallowedCharacters { detail: String },
}

impl Categorized for ValidationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at {path}")]
    NotFound { path: String },

    #[error("invalid config format: {reason}")]
    InvalidFormat { reason: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },
}

impl Categorized for ConfigError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
