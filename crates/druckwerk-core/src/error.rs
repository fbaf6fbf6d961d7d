// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckwerk.

use thiserror::Error;

/// Top-level error type for all Druckwerk operations.
///
/// Protocol-level failures (bad attributes, state conflicts, not-found
/// targets) are answered with IPP status codes in the response message and
/// never surface here; this type covers the I/O and process plumbing that
/// can fail underneath an operation.
#[derive(Debug, Error)]
pub enum DruckwerkError {
    // -- Request plumbing --
    #[error("bad target URI: {0}")]
    BadUri(String),

    #[error("spool error: {0}")]
    Spool(String),

    #[error("document fetch failed: {0}")]
    DocumentFetch(String),

    // -- Transform subprocess --
    #[error("transform error: {0}")]
    Transform(String),

    // -- Object lifecycle --
    #[error("printer {0} not found")]
    PrinterNotFound(String),

    #[error("job {0} not found")]
    JobNotFound(i32),

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckwerkError>;
