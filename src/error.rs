/// Failure taxonomy for the fitting core.
///
/// The kind determines how callers react:
///
/// - `DataInsufficiency` is handled locally by falling back to a simpler fit
///   strategy; it should never abort a batch run.
/// - `OptimizationDivergence` is caught at the strategy-selector boundary and
///   triggers the fallback cascade.
/// - `ValidationFailure` is only raised when strict validation is requested.
/// - `Configuration` means a malformed fit configuration or parameter set and
///   fails fast before any optimization runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DataInsufficiency,
    OptimizationDivergence,
    ValidationFailure,
    Configuration,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::DataInsufficiency => "data insufficiency",
            ErrorKind::OptimizationDivergence => "optimization divergence",
            ErrorKind::ValidationFailure => "validation failure",
            ErrorKind::Configuration => "configuration",
        }
    }
}

#[derive(Clone)]
pub struct CoreError {
    kind: ErrorKind,
    message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn data_insufficiency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataInsufficiency, message)
    }

    pub fn divergence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OptimizationDivergence, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.message)
    }
}

impl std::fmt::Debug for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for CoreError {}
