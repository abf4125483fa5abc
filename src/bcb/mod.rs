pub mod command;
pub mod error;
pub mod message;

pub use command::{parse_command, BcbRequest};
pub use error::BcbError;
pub use message::{BootloaderControl, BootloaderMessage, BootloaderMessageAB, SlotMetadata};
