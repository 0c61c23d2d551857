//! # HIF Hardware Abstraction Layer
//!
//! The platform vocabulary shared by every HIF driver crate. Drivers never
//! talk to an interrupt controller or a timer directly; they speak in the
//! types defined here and the platform glue implements them.
//!
//! ## Components
//!
//! - **IRQ**: return codes, request flags, line identifiers and errors
//! - **Time**: monotonic microsecond clock with a blocking sleep

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod irq;
pub mod time;

pub use irq::{IrqError, IrqFlags, IrqLine, IrqReturn};
pub use time::{split_timestamp_us, Clock};
