#![doc(html_no_source)]
pub mod bcb;
pub mod cmdline;
pub mod env;
pub mod error;
pub mod flow;
pub mod image;
pub mod slot;
pub mod target;
pub mod trust;
pub mod verify;
pub mod watchdog;

pub use env::{BootEnv, Capabilities};
pub use target::BootTarget;
pub use trust::{LockState, TrustState};

#[cfg(test)]
pub(crate) mod testutil;
