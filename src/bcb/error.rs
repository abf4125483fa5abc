use thiserror::Error;

#[derive(Error, Debug)]
pub enum BcbError {
    #[error("Field is not NUL terminated ASCII")]
    NotAscii,
    #[error("Data too long")]
    DataTooLong,
    #[error("CRC failure")]
    CrcFailure,
    #[error("Control magic mismatch")]
    BadControlMagic,
    #[error("Insufficient bytes")]
    InsufficientBytes,
}
