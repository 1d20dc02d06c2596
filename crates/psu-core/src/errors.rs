use psu_core_types::RequestId;
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code usable for programmatic handling,
/// testing and log queries. Precondition conflicts are deliberately absent:
/// they are a business outcome (`WriteOutcome::Rejected`), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Inbound validation
    InvalidInput,
    MissingRequestId,
    MissingApplicationName,
    InvalidSiteCode,
    InvalidTimestamp,

    // Store
    NotFound,
    Persistence,
    Serialization,

    // Deadline
    Timeout,

    // Collaborators
    ExternalService,
    NotConfigured,
    DispatchRejected,

    // Test-interception harness
    ConfigurationMisuse,

    // Internal
    Concurrency,
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::MissingRequestId => "ERR_MISSING_REQUEST_ID",
            ExErrorKind::MissingApplicationName => "ERR_MISSING_APPLICATION_NAME",
            ExErrorKind::InvalidSiteCode => "ERR_INVALID_SITE_CODE",
            ExErrorKind::InvalidTimestamp => "ERR_INVALID_TIMESTAMP",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ExErrorKind::NotConfigured => "ERR_NOT_CONFIGURED",
            ExErrorKind::DispatchRejected => "ERR_DISPATCH_REJECTED",
            ExErrorKind::ConfigurationMisuse => "ERR_CONFIGURATION_MISUSE",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling and enough
/// context (correlation id, offending keys) to diagnose a failed batch
/// without retrying it.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    task_id: Option<String>,
    prescription_id: Option<String>,
    request_id: Option<RequestId>,
    message: String,
    source: Option<Box<ExError>>,
    keys: Option<Vec<String>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            task_id: None,
            prescription_id: None,
            request_id: None,
            message: String::new(),
            source: None,
            keys: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add task ID context
    pub fn with_task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    /// Add prescription ID context
    pub fn with_prescription_id(mut self, id: impl Into<String>) -> Self {
        self.prescription_id = Some(id.into());
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Add the offending keys or codes
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the task ID context, if any
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Get the prescription ID context, if any
    pub fn prescription_id(&self) -> Option<&str> {
        self.prescription_id.as_deref()
    }

    /// Get the request ID context, if any
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Get the offending keys, if any
    pub fn keys(&self) -> Option<&[String]> {
        self.keys.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(task_id) = &self.task_id {
            write!(f, " (task_id: {})", task_id)?;
        }
        if let Some(prescription_id) = &self.prescription_id {
            write!(f, " (prescription_id: {})", prescription_id)?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request_id: {})", request_id)?;
        }
        if let Some(keys) = &self.keys {
            write!(f, " (keys: {})", keys.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Domain errors raised before a batch reaches the store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PsuError {
    /// Correlation identifier header absent or empty
    #[error("Missing or empty x-request-id header.")]
    MissingRequestId,

    /// Application name required in this environment but absent
    #[error("Missing `attribute-name` in request headers, and it is required in this environment")]
    MissingApplicationName,

    /// One or more normalised site codes are not `^[A-Z0-9]+$`
    #[error("Received invalid ODS codes: {codes:?}")]
    InvalidSiteCodes { codes: Vec<String> },

    /// LastModified is not an RFC3339 timestamp
    #[error("Invalid lastModified '{value}' on task {task_id}")]
    InvalidTimestamp { task_id: String, value: String },

    /// Notification queue target missing from the environment
    #[error("Notifications SQS URL not configured")]
    QueueNotConfigured,

    /// The queue accepted the call but reported failed entries
    #[error("Notification queue rejected {failed} of {total} entries")]
    DispatchRejected { failed: usize, total: usize },

    /// A batch matched more than one synthetic identifier set
    #[error("Batch matches more than one synthetic prescription set: {sets:?}")]
    SyntheticSetOverlap { sets: Vec<String> },
}

impl From<PsuError> for ExError {
    fn from(err: PsuError) -> Self {
        let message = err.to_string();
        match err {
            PsuError::MissingRequestId => {
                ExError::new(ExErrorKind::MissingRequestId).with_message(message)
            }
            PsuError::MissingApplicationName => {
                ExError::new(ExErrorKind::MissingApplicationName).with_message(message)
            }
            PsuError::InvalidSiteCodes { codes } => ExError::new(ExErrorKind::InvalidSiteCode)
                .with_message(message)
                .with_keys(codes),
            PsuError::InvalidTimestamp { task_id, .. } => {
                ExError::new(ExErrorKind::InvalidTimestamp)
                    .with_task_id(task_id)
                    .with_message(message)
            }
            PsuError::QueueNotConfigured => {
                ExError::new(ExErrorKind::NotConfigured).with_message(message)
            }
            PsuError::DispatchRejected { .. } => {
                ExError::new(ExErrorKind::DispatchRejected).with_message(message)
            }
            PsuError::SyntheticSetOverlap { sets } => {
                ExError::new(ExErrorKind::ConfigurationMisuse)
                    .with_message(message)
                    .with_keys(sets)
            }
        }
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}
