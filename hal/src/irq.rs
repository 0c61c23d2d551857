//! # IRQ Vocabulary
//!
//! Types exchanged between interrupt handlers and the platform interrupt
//! controller glue.

use core::fmt;

use bitflags::bitflags;

// ============================================================================
// Handler Return
// ============================================================================

/// Result of a top-half interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Interrupt was not for us, or was already being serviced
    NotHandled,
    /// Interrupt was acknowledged
    Handled,
}

impl IrqReturn {
    /// Whether the interrupt was acknowledged
    pub const fn is_handled(self) -> bool {
        matches!(self, IrqReturn::Handled)
    }
}

// ============================================================================
// IRQ Lines
// ============================================================================

/// Platform interrupt line number, as delivered to a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IrqLine(pub u32);

impl IrqLine {
    /// Raw line number
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

bitflags! {
    /// Flags passed when requesting an interrupt line
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IrqFlags: u32 {
        /// Trigger on rising edge
        const TRIGGER_RISING  = 1 << 0;
        /// Trigger on falling edge
        const TRIGGER_FALLING = 1 << 1;
        /// Trigger while the line is high
        const TRIGGER_HIGH    = 1 << 2;
        /// Trigger while the line is low
        const TRIGGER_LOW     = 1 << 3;
        /// Line may be shared with other devices
        const SHARED          = 1 << 7;
        /// Do not enable the line when the request completes
        const NO_AUTOEN       = 1 << 12;
    }
}

// ============================================================================
// IRQ Errors
// ============================================================================

/// IRQ operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Invalid IRQ number
    InvalidIrq,
    /// IRQ already registered
    AlreadyRegistered,
    /// IRQ not registered
    NotRegistered,
    /// Resource busy
    Busy,
    /// Platform specific failure code
    Platform(i32),
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIrq => write!(f, "invalid irq"),
            Self::AlreadyRegistered => write!(f, "irq already registered"),
            Self::NotRegistered => write!(f, "irq not registered"),
            Self::Busy => write!(f, "irq busy"),
            Self::Platform(code) => write!(f, "platform error {}", code),
        }
    }
}
