// Standard errors

use thiserror::Error;

use crate::bcb::BcbError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Not found")]
    NotFound,
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("No bootable slot remains")]
    NoBootableSlot,
    #[error("Recovery tries exhausted")]
    RecoveryExhausted,
    #[error("Image verification failed")]
    VerificationFailed,
    #[error("Bootloader message: {0}")]
    Bcb(#[from] BcbError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map an I/O error, folding the missing-object case into `NotFound`.
pub fn from_io(e: std::io::Error) -> CoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CoreError::NotFound
    } else {
        CoreError::Io(e)
    }
}
