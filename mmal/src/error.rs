// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for runtime operations.
//!
//! Every fallible operation on ports, connections, graphs and wrappers returns
//! [`Result`]. Operations that take ownership of a [`BufferHeader`] and can
//! refuse it return [`SendError`] instead, which hands the buffer back.

use crate::BufferHeader;

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when driving components, ports and connections.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An argument was invalid or the object was in the wrong state for the
    /// requested operation (e.g. enabling a port twice).
    #[error("Invalid argument")]
    InvalidArg,

    /// An optional implementation hook is not provided.
    ///
    /// Callers treat this as "use the default behaviour" unless they
    /// explicitly propagate it.
    #[error("Not supported")]
    NotSupported,

    /// Memory for a pool, payload or header could not be obtained.
    #[error("Out of memory")]
    OutOfMemory,

    /// A fixed-capacity container is full (graph slots, event pool, parameter storage).
    #[error("Out of space")]
    OutOfSpace,

    /// The port is already connected to another port.
    #[error("Already connected")]
    AlreadyConnected,

    /// The port is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Nothing is available right now; try again later.
    #[error("Resource temporarily unavailable")]
    Again,

    /// A component reported an I/O failure.
    #[error("I/O error")]
    Io,

    /// A component reported corrupted data.
    #[error("Data corrupted")]
    Corrupt,

    /// A component-reported failure with context the core does not interpret.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Returns the numeric status for this error.
    ///
    /// The values are stable and are what the demos use as process exit codes.
    pub fn code(&self) -> u32 {
        match self {
            Error::OutOfMemory => 1,
            Error::OutOfSpace => 2,
            Error::InvalidArg => 3,
            Error::NotSupported => 4,
            Error::Corrupt => 6,
            Error::Io => 8,
            Error::AlreadyConnected => 11,
            Error::NotConnected => 12,
            Error::Again => 13,
            Error::Other(_) => 255,
        }
    }

    /// Converts a numeric status received from a component into a [`Result`].
    ///
    /// # Arguments
    ///
    /// * `code` - Status value, `0` meaning success
    ///
    /// # Returns
    ///
    /// - `Ok(())` if `code == 0`
    /// - `Err(Error::...)` for any other value, `Error::Other` when unknown
    ///
    /// # Examples
    ///
    /// ```
    /// use mmal::Error;
    ///
    /// assert!(Error::from_code(0).is_ok());
    /// assert_eq!(Error::from_code(Error::Again.code()), Err(Error::Again));
    /// ```
    pub fn from_code(code: u32) -> Result<()> {
        match code {
            0 => Ok(()),
            1 => Err(Error::OutOfMemory),
            2 => Err(Error::OutOfSpace),
            3 => Err(Error::InvalidArg),
            4 => Err(Error::NotSupported),
            6 => Err(Error::Corrupt),
            8 => Err(Error::Io),
            11 => Err(Error::AlreadyConnected),
            12 => Err(Error::NotConnected),
            13 => Err(Error::Again),
            other => Err(Error::Other(format!("status {other}"))),
        }
    }

    /// Whether this is the "hook not implemented" signal.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported)
    }
}

/// A buffer that could not be handed over, returned to the caller with the reason.
///
/// Converting into [`Error`] drops the buffer, which releases it back to its
/// pool. Callers that want to keep it use [`SendError::into_parts`].
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SendError {
    /// Why the buffer was refused.
    pub error: Error,
    /// The refused buffer.
    pub buffer: BufferHeader,
}

impl SendError {
    /// Pairs a refused buffer with its error.
    pub fn new(error: Error, buffer: BufferHeader) -> Self {
        Self { error, buffer }
    }

    /// Splits the error from the buffer.
    pub fn into_parts(self) -> (Error, BufferHeader) {
        (self.error, self.buffer)
    }

    /// Whether the refusal means "hook not implemented".
    pub fn is_not_supported(&self) -> bool {
        self.error.is_not_supported()
    }
}

impl From<SendError> for Error {
    fn from(err: SendError) -> Self {
        err.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_converts_to_its_error() {
        let pool = crate::Pool::new(1, 0).unwrap();
        let buffer = pool.queue().get().unwrap();
        let err: Error = SendError::new(Error::InvalidArg, buffer).into();
        assert_eq!(err, Error::InvalidArg);
        assert_eq!(pool.queue().len(), 1);
    }

    #[test]
    fn unknown_code_maps_to_other() {
        assert_eq!(
            Error::from_code(99),
            Err(Error::Other("status 99".to_string()))
        );
    }
}
