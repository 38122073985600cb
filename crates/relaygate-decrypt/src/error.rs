//! Decrypt error types.

use relaygate_core::CoreError;

/// Errors raised while opening or reading an encrypted container.
#[derive(Debug, thiserror::Error)]
pub enum DecryptError {
    /// No registered plugin recognizes the container.
    #[error("unrecognized container format: {locator}")]
    UnknownFormat {
        /// URL or path of the container.
        locator: String,
    },

    /// No plugin with this name is registered.
    #[error("unknown decrypt plugin: {0}")]
    UnknownPlugin(String),

    /// The container header or framing is malformed.
    #[error("invalid container: {0}")]
    Header(String),

    /// The container ended before its final frame.
    #[error("container is truncated")]
    Truncated,

    /// A frame failed authentication (wrong credential or corrupted data).
    #[error("authentication failed for frame {index}")]
    Authentication {
        /// Zero-based frame index.
        index: u32,
    },

    /// The container needs a keyfile but keyfiles are disabled.
    #[error("container requires keyfile {0} but keyfiles are disabled")]
    KeyfileDisallowed(String),

    /// The keyfile referenced by the container could not be loaded.
    #[error("keyfile {name} is unavailable")]
    KeyfileUnavailable {
        /// Keyfile name from the container header.
        name: String,
        /// Why loading failed.
        #[source]
        source: CoreError,
    },

    /// The factory or stream was already closed.
    #[error("decrypt reader is closed")]
    Closed,

    /// Storage or upstream failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O failure while reading the container.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for decrypt operations.
pub type DecryptResult<T> = Result<T, DecryptError>;
