use thiserror::Error;

/// Structural failures of the pipeline.
///
/// Recoverable outcomes (too few matches, degenerate fits, unavailable catalog
/// services) are never reported through this type: they surface as `None` values
/// that the orchestrators test explicitly. Only malformed inputs and invalid
/// configurations propagate as errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Column is not numeric: {0}")]
    NonNumericColumn(String),

    #[error("Mismatched array lengths in {context}: expected {expected}, found {found}")]
    MismatchedLength {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("CSV parsing error: {0}")]
    CsvParse(#[from] csv::Error),

    #[error("HTTP ureq error: {0}")]
    HttpError(#[from] ureq::Error),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid FITS header card: {0}")]
    InvalidHeaderCard(String),

    #[error("External astrometric solver failed: {0}")]
    ExternalSolverFailed(String),

    #[error("Unexpected catalog service response: {0}")]
    ServiceResponse(String),

    #[error("Invalid regular expression: {0}")]
    RegexError(#[from] regex::Error),
}

impl PipelineError {
    pub(crate) fn mismatched(context: &str, expected: usize, found: usize) -> Self {
        PipelineError::MismatchedLength {
            context: context.to_string(),
            expected,
            found,
        }
    }
}

impl PartialEq for PipelineError {
    fn eq(&self, other: &Self) -> bool {
        use PipelineError::*;
        match (self, other) {
            (MissingColumn(a), MissingColumn(b)) => a == b,
            (NonNumericColumn(a), NonNumericColumn(b)) => a == b,
            (
                MismatchedLength {
                    context: c1,
                    expected: e1,
                    found: f1,
                },
                MismatchedLength {
                    context: c2,
                    expected: e2,
                    found: f2,
                },
            ) => c1 == c2 && e1 == e2 && f1 == f2,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (InvalidHeaderCard(a), InvalidHeaderCard(b)) => a == b,
            (ExternalSolverFailed(a), ExternalSolverFailed(b)) => a == b,
            (ServiceResponse(a), ServiceResponse(b)) => a == b,

            // not comparable: same variant is enough
            (CsvParse(_), CsvParse(_)) => true,
            (HttpError(_), HttpError(_)) => true,
            (IoError(_), IoError(_)) => true,
            (RegexError(_), RegexError(_)) => true,

            _ => false,
        }
    }
}
