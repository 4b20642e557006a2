// Copyright 2026 the weft developers
// Licensed under the MIT and Apache-2.0 licenses.

use crate::WriterKey;
use thiserror::Error;

/// Errors from the registration surface.
///
/// These are the only error-shaped failures in the crate: data availability
/// (missing log entries, unresolvable dependencies, absent majorities) is
/// never an error, just a `None` that asks the caller to retry once more
/// data has replicated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("writer {0} is already registered")]
    DuplicateWriter(WriterKey),
    #[error("writer {0} is not registered")]
    UnknownWriter(WriterKey),
}
