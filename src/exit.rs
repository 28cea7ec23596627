use std::fmt;

use crate::error::{IngestError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidArgs,
    QueryFailed,
    StoreUnavailable,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidArgs => 2,
            ExitCode::QueryFailed => 10,
            ExitCode::StoreUnavailable => 20,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err.source()
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    if err.downcast_ref::<StoreError>().is_some() {
        return ExitCode::StoreUnavailable.as_i32();
    }
    ExitCode::QueryFailed.as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn store_err(err: StoreError) -> anyhow::Error {
    ExitError::new(ExitCode::StoreUnavailable, err.into()).into()
}

pub fn ingest_err(err: IngestError) -> anyhow::Error {
    match err {
        IngestError::Store(err) => store_err(err),
        other => ExitError::new(ExitCode::InvalidArgs, other.into()).into(),
    }
}
