//! Error types for regwatch.
//!
//! Every variant carries a stable code in its message so that log lines can
//! be grepped and alerted on without parsing prose.

use crate::types::{Address, ContinuationIndex, SlotId};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for regwatch operations.
#[derive(Error, Debug)]
pub enum RegwatchError {
    // =========================================================================
    // Arena Errors (E001-E099)
    // =========================================================================
    /// The arena has no room for the requested allocation.
    #[error(
        "E001: Arena exhausted: requested {requested} bytes, available {available} bytes"
    )]
    ArenaExhausted {
        /// Number of bytes requested (after alignment).
        requested: u64,
        /// Number of bytes still available at the top of the arena.
        available: u64,
    },

    /// An address does not refer to live arena memory.
    #[error("E002: Invalid arena address {address}: {cause}")]
    ArenaInvalidAddress {
        /// The offending address.
        address: Address,
        /// Why the address was rejected.
        cause: String,
    },

    // =========================================================================
    // Codec Errors (E100-E199)
    // =========================================================================
    /// A wire payload could not be decoded.
    #[error("E101: Decode failed: {cause}")]
    Decode {
        /// Description of the malformed input.
        cause: String,
    },

    /// A value could not be encoded.
    #[error("E102: Encode failed: {cause}")]
    Encode {
        /// Description of the failure.
        cause: String,
    },

    // =========================================================================
    // Boundary Errors (E200-E299)
    // =========================================================================
    /// A slot was registered while another operation still held it.
    #[error("E201: Slot {slot} is already registered")]
    SlotCollision {
        /// The colliding slot.
        slot: SlotId,
    },

    /// No registry entry exists for a slot.
    #[error("E202: Slot {slot} is not registered")]
    SlotNotFound {
        /// The missing slot.
        slot: SlotId,
    },

    /// The guest has no continuation at this index.
    #[error("E203: Unknown continuation {index}")]
    UnknownContinuation {
        /// The requested index.
        index: ContinuationIndex,
    },

    /// The guest aborted and refuses further entry.
    #[error("E204: Guest aborted: {cause}")]
    GuestAborted {
        /// What caused the abort.
        cause: String,
    },

    /// One side of the boundary broke the calling contract.
    #[error("E205: Boundary contract violation: {cause}")]
    ContractViolation {
        /// Description of the violation.
        cause: String,
    },

    /// The host has no async runtime to run the fetch on.
    #[error("E206: Host runtime unavailable: {cause}")]
    RuntimeUnavailable {
        /// Reason reported by the runtime.
        cause: String,
    },

    // =========================================================================
    // Registry Protocol Errors (E300-E399)
    // =========================================================================
    /// An authenticate challenge could not be used.
    #[error("E301: Unusable challenge: {cause}")]
    Challenge {
        /// Why the challenge was rejected.
        cause: String,
    },

    /// An image reference could not be parsed.
    #[error("E302: Invalid image reference '{reference}': {cause}")]
    ImageReference {
        /// The reference as given.
        reference: String,
        /// Why it was rejected.
        cause: String,
    },

    // =========================================================================
    // Fetch Errors (E400-E499)
    // =========================================================================
    /// The fetch collaborator rejected a request.
    #[error("E401: Fetch of {url} failed: {cause}")]
    Fetch {
        /// The requested URL.
        url: String,
        /// Transport-level cause.
        cause: String,
    },

    // =========================================================================
    // WASM Errors (E700-E799)
    // =========================================================================
    /// Failed to load or compile a guest module.
    #[error("E701: Failed to load WASM module '{module}': {cause}")]
    WasmLoad {
        /// Module name or path.
        module: String,
        /// Reason for the failure.
        cause: String,
    },

    /// A guest export trapped or returned an error.
    #[error("E702: WASM execution failed in '{function}': {cause}")]
    WasmExecution {
        /// The export being called.
        function: String,
        /// Trap or error message.
        cause: String,
    },

    /// Failed to link a host import into a guest module.
    #[error("E703: WASM host function '{function}' failed: {cause}")]
    WasmHostFunction {
        /// The host function name.
        function: String,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// A YAML configuration file could not be parsed.
    #[error("E801: YAML parse error in {path}: {cause}")]
    YamlParse {
        /// The file being parsed.
        path: PathBuf,
        /// Parser message.
        cause: String,
    },

    /// A configuration value is out of range.
    #[error("E802: Invalid configuration value for '{field}': {cause}")]
    ConfigValue {
        /// Dotted field name.
        field: String,
        /// Why the value was rejected.
        cause: String,
    },

    // =========================================================================
    // I/O Errors (E900-E999)
    // =========================================================================
    /// Filesystem I/O failed.
    #[error("E901: I/O error at {path}: {cause}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },
}

impl RegwatchError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ArenaExhausted { .. } => "E001",
            Self::ArenaInvalidAddress { .. } => "E002",
            Self::Decode { .. } => "E101",
            Self::Encode { .. } => "E102",
            Self::SlotCollision { .. } => "E201",
            Self::SlotNotFound { .. } => "E202",
            Self::UnknownContinuation { .. } => "E203",
            Self::GuestAborted { .. } => "E204",
            Self::ContractViolation { .. } => "E205",
            Self::RuntimeUnavailable { .. } => "E206",
            Self::Challenge { .. } => "E301",
            Self::ImageReference { .. } => "E302",
            Self::Fetch { .. } => "E401",
            Self::WasmLoad { .. } => "E701",
            Self::WasmExecution { .. } => "E702",
            Self::WasmHostFunction { .. } => "E703",
            Self::YamlParse { .. } => "E801",
            Self::ConfigValue { .. } => "E802",
            Self::Io { .. } => "E901",
        }
    }

    /// Check if a later attempt at the same operation may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::RuntimeUnavailable { .. })
    }

    /// Check if this error leaves the guest unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ArenaExhausted { .. } | Self::GuestAborted { .. } | Self::WasmExecution { .. }
        )
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::YamlParse { .. } | Self::ConfigValue { .. })
    }

    /// Shorthand for a [`RegwatchError::Decode`].
    pub fn decode(cause: impl Into<String>) -> Self {
        Self::Decode {
            cause: cause.into(),
        }
    }

    /// Shorthand for a [`RegwatchError::Encode`].
    pub fn encode(cause: impl Into<String>) -> Self {
        Self::Encode {
            cause: cause.into(),
        }
    }

    /// Shorthand for a [`RegwatchError::ContractViolation`].
    pub fn contract(cause: impl Into<String>) -> Self {
        Self::ContractViolation {
            cause: cause.into(),
        }
    }
}

/// Result type alias for regwatch operations.
pub type Result<T> = std::result::Result<T, RegwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = RegwatchError::ArenaExhausted {
            requested: 64,
            available: 8,
        };
        assert_eq!(err.code(), "E001");

        let err = RegwatchError::SlotCollision {
            slot: SlotId::new(3),
        };
        assert_eq!(err.code(), "E201");

        assert_eq!(RegwatchError::decode("eof").code(), "E101");
    }

    #[test]
    fn error_display() {
        let err = RegwatchError::Fetch {
            url: "https://index.docker.io/v2/library/nginx/manifests/latest".to_string(),
            cause: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("E401"));
        assert!(msg.contains("library/nginx"));
        assert!(msg.contains("connection refused"));

        let err = RegwatchError::UnknownContinuation {
            index: ContinuationIndex::new(9),
        };
        assert!(err.to_string().contains("fn_9"));
    }

    #[test]
    fn retriable_and_fatal_errors() {
        let fetch = RegwatchError::Fetch {
            url: "http://localhost".to_string(),
            cause: "reset".to_string(),
        };
        assert!(fetch.is_retriable());
        assert!(!fetch.is_fatal());

        let exhausted = RegwatchError::ArenaExhausted {
            requested: 1,
            available: 0,
        };
        assert!(exhausted.is_fatal());
        assert!(!exhausted.is_retriable());

        assert!(!RegwatchError::decode("bad").is_fatal());
    }

    #[test]
    fn config_errors() {
        let err = RegwatchError::ConfigValue {
            field: "fetch.timeout_secs".to_string(),
            cause: "must be positive".to_string(),
        };
        assert!(err.is_config_error());
        assert!(!RegwatchError::contract("x").is_config_error());
    }
}
