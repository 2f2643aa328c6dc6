// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the in-memory filesystem

/// Core filesystem error type
///
/// Every variant maps onto one POSIX error code; [`FsError::code`] returns the
/// stable mnemonic and [`FsError::errno`] the numeric value.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("already exists")]
    AlreadyExists,
    #[error("permission denied")]
    AccessDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("directory not empty")]
    NotEmpty,
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("is a directory")]
    IsADirectory,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("operation not supported")]
    Unsupported,
}

impl FsError {
    /// Stable machine-readable code, e.g. `"ENOENT"`.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound => "ENOENT",
            FsError::NotADirectory => "ENOTDIR",
            FsError::AlreadyExists => "EEXIST",
            FsError::AccessDenied => "EACCES",
            FsError::NotPermitted => "EPERM",
            FsError::NotEmpty => "ENOTEMPTY",
            FsError::TooManyLinks => "ELOOP",
            FsError::BadFileDescriptor => "EBADF",
            FsError::IsADirectory => "EISDIR",
            FsError::InvalidArgument => "EINVAL",
            FsError::Unsupported => "ENOSYS",
        }
    }

    /// Host errno value for this error.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::AccessDenied => libc::EACCES,
            FsError::NotPermitted => libc::EPERM,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::TooManyLinks => libc::ELOOP,
            FsError::BadFileDescriptor => libc::EBADF,
            FsError::IsADirectory => libc::EISDIR,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::Unsupported => libc::ENOSYS,
        }
    }
}

impl From<FsError> for std::io::Error {
    fn from(err: FsError) -> Self {
        std::io::Error::from_raw_os_error(err.errno())
    }
}

pub type FsResult<T> = Result<T, FsError>;
