// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Error types for sketch operations.

use std::fmt;
use std::fmt::Write as _;

/// The class of failure reported by a sketch operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A caller-supplied argument is outside its documented range.
    InvalidArgument,
    /// Serialized data failed validation and cannot be trusted.
    Corruption,
    /// An internal invariant was found violated. This indicates a bug in the
    /// sketch, not a user error; a sketch that reported it is poisoned and
    /// should be discarded.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Corruption => "data corruption",
            ErrorKind::Internal => "internal invariant violation",
        })
    }
}

/// Error returned by all fallible sketch operations.
///
/// Carries a failure class and a human-readable message; any extra context
/// is folded into the message at the point where it is attached.
///
/// # Examples
///
/// ```
/// # use cpc_sketch::error::Error;
/// # use cpc_sketch::error::ErrorKind;
/// let err = Error::new(ErrorKind::InvalidArgument, "bad input");
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// assert_eq!(err.message(), "bad input");
/// ```
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Appends a `(key=value)` detail to the message.
    pub fn with_context(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        let _ = write!(self.message, " ({key}={value})");
        self
    }

    /// Returns the error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

// Convenience constructors, one per failure class.
impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, msg)
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, msg)
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub(crate) fn insufficient_data(field: &'static str) -> Self {
        Self::corruption(format!("input ended while reading {field}"))
    }

    pub(crate) fn invalid_family(expected: u8, actual: u8) -> Self {
        Self::corruption(format!("family {actual} is not CPC ({expected})"))
    }

    pub(crate) fn unsupported_serial_version(expected: u8, actual: u8) -> Self {
        Self::corruption(format!(
            "serial version {actual} is not supported (expected {expected})"
        ))
    }

    pub(crate) fn invalid_preamble_ints(expected: u8, actual: u8) -> Self {
        Self::corruption(format!(
            "preamble ints {actual} disagree with the flags (expected {expected})"
        ))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Debug for Error {
    // One formatter serves both; the message already carries any context.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_folds_into_message() {
        let err = Error::corruption("window payload length mismatch")
            .with_context("lg_k", 11)
            .with_context("words", 3);
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert_eq!(
            err.to_string(),
            "data corruption: window payload length mismatch (lg_k=11) (words=3)"
        );
        assert_eq!(format!("{err:?}"), err.to_string());
    }
}
