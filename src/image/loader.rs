use pal::storage::{BlockStore, EspVolume};

use crate::error::{from_io, CoreError};
use crate::slot::SlotController;

/// Label of the partition holding the normal-boot image.
pub const BOOT_PARTITION_LABEL: &str = "boot";
/// Label of the dedicated recovery partition.
pub const RECOVERY_PARTITION_LABEL: &str = "recovery";

pub struct LoadedImage {
    pub data: Vec<u8>,
    /// The partition the bytes came from, suffix included.
    pub partition: String,
}

/// Read a boot-style partition by label. With slots in use the label is
/// suffixed with the active slot; a failed read spends the slot and the
/// load retries until a slot works or none remains.
pub fn load_boot_partition(
    disk: &mut dyn BlockStore,
    mut slots: Option<&mut SlotController>,
    label: &str,
) -> Result<LoadedImage, CoreError> {
    match slots.as_mut() {
        None => {
            let data = disk.read_partition(label).map_err(from_io)?;
            Ok(LoadedImage {
                data,
                partition: label.to_string(),
            })
        }
        Some(slots) => loop {
            let suffix = match slots
                .get_active()
                .map(String::from)
                .or_else(|| slots.select_active())
            {
                Some(suffix) => suffix,
                None => return Err(CoreError::NoBootableSlot),
            };
            let partition = format!("{}{}", label, suffix);
            match disk.read_partition(&partition) {
                Ok(data) => return Ok(LoadedImage { data, partition }),
                Err(e) => {
                    log::error!("Cannot read {}: {}", partition, e);
                    slots.mark_boot_failed();
                }
            }
        },
    }
}

/// Load the recovery image. When recovery lives in the boot partition
/// this is the normal-boot load; otherwise the dedicated partition is
/// read, gated on the recovery try counter.
pub fn load_recovery(
    disk: &mut dyn BlockStore,
    slots: Option<&mut SlotController>,
    recovery_in_boot: bool,
) -> Result<LoadedImage, CoreError> {
    if recovery_in_boot {
        return load_boot_partition(disk, slots, BOOT_PARTITION_LABEL);
    }
    if let Some(slots) = &slots {
        if slots.recovery_tries_remaining() == 0 {
            return Err(CoreError::RecoveryExhausted);
        }
    }
    let data = disk
        .read_partition(RECOVERY_PARTITION_LABEL)
        .map_err(from_io)?;
    Ok(LoadedImage {
        data,
        partition: RECOVERY_PARTITION_LABEL.to_string(),
    })
}

/// Read a file from the ESP. One-shot images are deleted before they are
/// verified, so an unexpected reset cannot replay them.
pub fn load_from_esp(
    esp: &mut dyn EspVolume,
    path: &str,
    delete_after_read: bool,
) -> Result<Vec<u8>, CoreError> {
    let data = esp.read_file(path).map_err(from_io)?;
    if delete_after_read {
        esp.delete_file(path).map_err(from_io)?;
    }
    Ok(data)
}
