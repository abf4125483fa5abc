use std::io;

/// Outcome reported by the external verified-boot library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyResult {
    Ok,
    ErrorVerification,
    ErrorRollbackIndex,
    ErrorPublicKeyRejected,
    ErrorInvalidMetadata,
    ErrorUnsupportedVersion,
    ErrorOom,
    ErrorIo,
}

/// Everything the verifier hands back for a verified slot. Owned by the
/// caller for the rest of the boot attempt; downstream components borrow
/// it.
#[derive(Debug, Clone)]
pub struct SlotData {
    /// Raw bytes of the partition the verifier loaded.
    pub loaded_partition: Vec<u8>,
    /// Name of the partition that was verified ("boot", "recovery").
    pub partition_name: String,
    /// Rollback index the image asserts per location. Zero means the
    /// location is unused.
    pub rollback_indexes: Vec<u64>,
    /// Slot suffix the verifier resolved ("_a"), when slots are in use.
    pub slot_suffix: Option<String>,
    /// Command-line fragment covered by the signature.
    pub cmdline: Option<String>,
    /// Digest over the verified metadata, for reporting.
    pub vbmeta_digest: [u8; 32],
}

/// The capability set required from the external verifier. Signature math
/// and hash-tree walking happen behind this trait.
pub trait VerifiedBoot {
    /// Verify the named partitions for a fixed slot suffix ("" when slots
    /// are not in use).
    fn verify(
        &mut self,
        partitions: &[&str],
        slot_suffix: &str,
        allow_verification_error: bool,
    ) -> (VerifyResult, Option<SlotData>);

    /// Slot flow: additionally pick the slot to verify.
    fn ab_flow(
        &mut self,
        partitions: &[&str],
        allow_verification_error: bool,
    ) -> (VerifyResult, Option<SlotData>);

    /// Verify an image already sitting in memory (RAM boot, ESP file).
    fn verify_image(
        &mut self,
        image: &[u8],
        allow_verification_error: bool,
    ) -> (VerifyResult, Option<SlotData>);

    fn read_rollback_index(&mut self, location: usize) -> io::Result<u64>;
    fn write_rollback_index(&mut self, location: usize, value: u64) -> io::Result<()>;
}
