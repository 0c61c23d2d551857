//! # Dispatch Errors
//!
//! Recoverable failures reported to the device management layer. Broken
//! invariants are not errors; they abort through `ce_bug!`.

use core::fmt;

use hif_hal::IrqError;

use crate::CeId;

/// Copy engine dispatch errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeError {
    /// Tasklets were still in flight when the drain budget ran out
    DrainTimeout {
        /// In-flight count at the last poll
        outstanding: i32,
    },
    /// Requesting an interrupt line failed; the batch was rolled back
    IrqRegistration {
        /// Engine whose request failed
        ce: CeId,
        /// Platform failure
        cause: IrqError,
    },
    /// Engine id outside the configured range
    InvalidChannel(usize),
    /// Frames were still pending after a polled reap
    ReapBusy {
        /// Engine that still had frames
        ce: CeId,
    },
    /// Engine has no initialized dispatch entry
    NotInitialized(CeId),
    /// Polling backend rejected a state event
    Napi(i32),
}

impl fmt::Display for CeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DrainTimeout { outstanding } => {
                write!(f, "CE still not done with access: {}", outstanding)
            },
            Self::IrqRegistration { ce, cause } => {
                write!(f, "cannot register {} irq handler: {}", ce, cause)
            },
            Self::InvalidChannel(id) => write!(f, "invalid copy engine id {}", id),
            Self::ReapBusy { ce } => write!(f, "{} still has frames pending", ce),
            Self::NotInitialized(ce) => write!(f, "{} is not initialized", ce),
            Self::Napi(code) => write!(f, "napi_event INT_STATE returned {}", code),
        }
    }
}

/// Result type for dispatch operations
pub type CeResult<T> = Result<T, CeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display() {
        let err = CeError::DrainTimeout { outstanding: 3 };
        assert_eq!(err.to_string(), "CE still not done with access: 3");

        let err = CeError::IrqRegistration {
            ce: CeId::new(4).unwrap(),
            cause: IrqError::Busy,
        };
        assert_eq!(err.to_string(), "cannot register CE4 irq handler: irq busy");
    }
}
