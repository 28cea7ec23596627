use std::fmt;

/// Report store failures. Never retried inside the crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("report store unavailable ({location}): {reason}")]
    Unavailable { location: String, reason: String },

    #[error("report store corrupt at {location} line {line}: {reason}")]
    Corrupt {
        location: String,
        line: usize,
        reason: String,
    },
}

impl StoreError {
    pub fn unavailable(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        StoreError::Unavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }
}

/// A malformed or incomplete report. `index` is the position inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub index: Option<usize>,
    pub problems: Vec<String>,
}

impl ValidationError {
    pub fn new(problems: Vec<String>) -> Self {
        Self {
            index: None,
            problems,
        }
    }

    pub fn single(problem: impl Into<String>) -> Self {
        Self::new(vec![problem.into()])
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "invalid report #{i}: ")?,
            None => f.write_str("invalid report: ")?,
        }
        f.write_str(&self.problems.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{} of {total} reports rejected; nothing was stored", .rejected.len())]
    BatchRejected {
        total: usize,
        rejected: Vec<ValidationError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
