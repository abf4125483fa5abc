//! Platform abstraction for the boot decision core.
//!
//! The traits here are the named seams towards the firmware, the disk,
//! the external verified-boot library and the interactive surfaces. The
//! core library only ever talks to the platform through them.

pub mod fastboot;
pub mod firmware;
pub mod input;
pub mod power;
pub mod storage;
pub mod time;
pub mod ux;
pub mod verifier;
