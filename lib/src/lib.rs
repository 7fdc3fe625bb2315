//! # Configuration database as a filesystem
//!
//! This crate presents a tree of typed configuration settings — packages
//! holding sections holding options — as a mountable filesystem. Every
//! top-level package appears as a regular file in the mount root; reading
//! a file renders the package as text, and writing then closing it parses
//! the new text and commits the result back into the typed key/value
//! store the mount is backed by.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

use thiserror::Error;

pub mod cli;
pub mod conf;
pub mod fs;
pub mod handle;
pub mod mount;
pub mod store;
pub mod translate;
mod utils;

#[cfg(test)]
mod integration_tests;

/// The error type for operations on the mounted tree.
#[derive(Debug, Error)]
pub enum Error {
    /// The path does not name any visible entry.
    #[error("no such file: {0}")]
    NotFound(String),
    /// A caller-supplied argument was unusable (empty path, negative
    /// truncation length, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A buffer could not be grown to the required length.
    #[error("out of memory")]
    OutOfMemory,
    /// The textual form of a package could not be parsed.
    #[error(transparent)]
    Parse(#[from] conf::ParseError),
}

impl Error {
    /// The errno equivalent reported to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::OutOfMemory => libc::ENOMEM,
            Error::Parse(_) => libc::EIO,
        }
    }
}

/// The type of Result.
pub type Result<T> = std::result::Result<T, Error>;
