/*
   Licensed under the Apache License, Version 2.0 (the "License");
   you may not use this file except in compliance with the License.
   You may obtain a copy of the License at

      http://www.apache.org/licenses/LICENSE-2.0

   Unless required by applicable law or agreed to in writing, software
   distributed under the License is distributed on an "AS IS" BASIS,
   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
   See the License for the specific language governing permissions and
   limitations under the License.
*/

/*
  Storage layout of the misc partition, as fixed by the Android
  bootloader message convention. Recovery, the OS and this bootloader all
  address the same offsets, so none of them are configurable.
*/

use std::convert::TryFrom;
use std::ffi::CStr;
use std::io;

use super::error::BcbError;
use c2rust_bitfields::BitfieldStruct;
use crc::{Crc, CRC_32_ISO_HDLC};
use pal::storage::BlockStore;

/// Spaces used by the misc partition:
/// 0   - 2K     bootloader message
/// 2K  - 16K    vendor bootloader space (2K - 4K holds the slot
///              control data)
/// 16K - 64K    wipe packages for recovery
pub const BOOTLOADER_MESSAGE_OFFSET_IN_MISC: usize = 0usize;
pub const VENDOR_SPACE_OFFSET_IN_MISC: usize = 2 * 1024usize;

/// GPT label of the partition holding the bootloader message.
pub const MISC_PARTITION_LABEL: &str = "misc";

/// Magic identifying valid slot control data (see `BootloaderControl`).
pub const BOOT_CTRL_MAGIC: u32 = 0x42414342;
pub const BOOT_CTRL_VERSION: u8 = 1;

/// Bootloader Message (2-KiB)
///
/// The command field is written by the OS or recovery when it wants the
/// bootloader to do something on the next cycle. The bootloader owns the
/// status field and always clears it; the command field is erased for
/// one-shot requests before they are honored.
///
/// The recovery field carries messages between the system and recovery;
/// the stage field is written by multi-stage packages. Both are opaque
/// here.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BootloaderMessage {
    command: [u8; 32],
    status: [u8; 32],
    recovery: [u8; 768],
    // The 'recovery' field used to be 1024 bytes. 768 bytes is plenty
    // for a recovery command line; the last 256 bytes were carved off
    // for the stage string and future expansion.
    stage: [u8; 32],
    reserved: [u8; 1184],
}

fn ascii_field(field: &[u8]) -> Result<&str, BcbError> {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    let content = &field[..end];
    if !content.is_ascii() {
        return Err(BcbError::NotAscii);
    }
    // NUL-trimmed ASCII is valid UTF-8
    Ok(std::str::from_utf8(content).map_err(|_| BcbError::NotAscii)?)
}

fn set_ascii_field(field: &mut [u8], value: &str) -> Result<(), BcbError> {
    if !value.is_ascii() || value.len() >= field.len() {
        return Err(BcbError::DataTooLong);
    }
    for b in field.iter_mut() {
        *b = 0;
    }
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

impl BootloaderMessage {
    pub fn command(&self) -> Result<&str, BcbError> {
        ascii_field(&self.command)
    }

    pub fn status(&self) -> Result<&str, BcbError> {
        ascii_field(&self.status)
    }

    pub fn set_command(&mut self, value: &str) -> Result<(), BcbError> {
        set_ascii_field(&mut self.command, value)
    }

    pub fn set_status(&mut self, value: &str) -> Result<(), BcbError> {
        set_ascii_field(&mut self.status, value)
    }

    pub fn clear_command(&mut self) {
        self.command = [0u8; 32];
    }

    pub fn clear_status(&mut self) {
        self.status = [0u8; 32];
    }
}

/// The slot-aware bootloader message (4-KiB).
///
/// Slot control metadata is kept apart from the regular bootloader
/// message so that recovery and uncrypt cannot clear it by accident. The
/// slot_suffix field holds `BootloaderControl`; implementations are free
/// to use all 32 bytes, and the CRC in the last four decides whether the
/// content is trustworthy.
#[derive(Debug, Clone)]
#[repr(C, packed)]
pub struct BootloaderMessageAB {
    pub message: BootloaderMessage,
    pub slot_suffix: [u8; 32],
    pub update_channel: [u8; 128],
    // Round up the entire struct to 4096-byte.
    reserved: [u8; 1888],
}

impl BootloaderMessageAB {
    pub fn get_bootloader_control(&self) -> Result<&BootloaderControl, BcbError> {
        self.check_control_crc()?;
        let ptr = self.slot_suffix.as_ptr() as *const BootloaderControl;
        let control = unsafe { ptr.as_ref().unwrap() };
        if control.magic != BOOT_CTRL_MAGIC {
            return Err(BcbError::BadControlMagic);
        }
        Ok(control)
    }

    pub fn get_bootloader_control_mut(&mut self) -> Result<&mut BootloaderControl, BcbError> {
        self.check_control_crc()?;
        let ptr = self.slot_suffix.as_mut_ptr() as *mut BootloaderControl;
        let control = unsafe { ptr.as_mut().unwrap() };
        if control.magic != BOOT_CTRL_MAGIC {
            return Err(BcbError::BadControlMagic);
        }
        Ok(control)
    }

    fn check_control_crc(&self) -> Result<(), BcbError> {
        let crc32 = u32::from_le_bytes([
            self.slot_suffix[28],
            self.slot_suffix[29],
            self.slot_suffix[30],
            self.slot_suffix[31],
        ]);
        let algo = Crc::<u32>::new(&CRC_32_ISO_HDLC);
        if crc32 != algo.checksum(&self.slot_suffix[0..28]) {
            Err(BcbError::CrcFailure)
        } else {
            Ok(())
        }
    }

    /// Recompute the checksum over the control data.
    fn set_checksum(&mut self) {
        let algo = Crc::<u32>::new(&CRC_32_ISO_HDLC);
        let computed = algo.checksum(&self.slot_suffix[0..28]).to_le_bytes();
        self.slot_suffix[28..32].copy_from_slice(&computed);
    }

    /// Replace whatever is in the control area with factory defaults.
    pub fn reset_control(&mut self) {
        self.set_control(&BootloaderControl::factory_default());
    }

    /// Install new control data, fixing up the checksum.
    pub fn set_control(&mut self, control: &BootloaderControl) {
        let ptr = control as *const BootloaderControl as *const u8;
        let bytes = unsafe {
            std::slice::from_raw_parts(ptr, std::mem::size_of::<BootloaderControl>())
        };
        self.slot_suffix.copy_from_slice(bytes);
        self.set_checksum();
    }

    /// An all-zero message, used when the misc partition is unreadable.
    pub fn blank() -> BootloaderMessageAB {
        // every field is a byte array, so zeroed is a valid value
        unsafe { std::mem::zeroed() }
    }

    /// The whole message as a flashable slice. The checksum is refreshed
    /// in case the control data was modified.
    pub fn as_slice(&mut self) -> &[u8] {
        self.set_checksum();
        let ptr: *const BootloaderMessageAB = self;
        unsafe {
            std::slice::from_raw_parts(ptr as *const u8, std::mem::size_of::<BootloaderMessageAB>())
        }
    }

    /// Read the message from the head of the misc partition.
    pub fn read_from_misc(disk: &mut dyn BlockStore) -> io::Result<BootloaderMessageAB> {
        let raw = disk.read_partition(MISC_PARTITION_LABEL)?;
        if raw.len() < std::mem::size_of::<BootloaderMessageAB>() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "misc partition too small",
            ));
        }
        let message =
            unsafe { std::ptr::read_unaligned(raw.as_ptr() as *const BootloaderMessageAB) };
        Ok(message)
    }

    /// Persist only the 2-KiB message region. The control area is written
    /// separately so the two owners cannot clobber each other.
    pub fn write_message_region(&self, disk: &mut dyn BlockStore) -> io::Result<()> {
        let ptr = &self.message as *const BootloaderMessage as *const u8;
        let bytes =
            unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<BootloaderMessage>()) };
        disk.write_partition(
            MISC_PARTITION_LABEL,
            BOOTLOADER_MESSAGE_OFFSET_IN_MISC as u64,
            bytes,
        )
    }

    /// Persist only the 32-byte control area at its fixed offset.
    pub fn write_control_region(&mut self, disk: &mut dyn BlockStore) -> io::Result<()> {
        self.set_checksum();
        let offset = std::mem::size_of::<BootloaderMessage>() as u64;
        let suffix = self.slot_suffix;
        disk.write_partition(MISC_PARTITION_LABEL, offset, &suffix)
    }
}

impl<'a> TryFrom<&'a [u8]> for &'a BootloaderMessageAB {
    type Error = BcbError;
    fn try_from(data: &'a [u8]) -> Result<Self, Self::Error> {
        if data.len() < std::mem::size_of::<BootloaderMessageAB>() {
            Err(BcbError::InsufficientBytes)
        } else {
            let message = data.as_ptr() as *const BootloaderMessageAB;
            let message = unsafe { message.as_ref().unwrap() };
            Ok(message)
        }
    }
}

/// Slot control data, CRC-protected inside the slot_suffix area.
#[derive(Debug, Clone, Copy, BitfieldStruct)]
#[repr(C, packed)]
pub struct BootloaderControl {
    // NUL terminated active slot suffix.
    pub slot_suffix: [u8; 4],
    // Must be BOOT_CTRL_MAGIC.
    pub magic: u32,
    version: u8,
    // Number of slots being managed.
    #[bitfield(name = "nb_slot", ty = "u8", bits = "0..=3")]
    // Number of times left attempting to boot recovery.
    #[bitfield(name = "recovery_tries_remaining", ty = "u8", bits = "4..=6")]
    bitfield1: [u8; 1],
    // Ensure 4-bytes alignment for slot_info field.
    reserved0: [u8; 2],
    // Per-slot information.  Up to 4 slots.
    pub slot_info: [SlotMetadata; 4],
    // Reserved for further use.
    reserved1: [u8; 8],
    // CRC32 of all 28 bytes preceding this field (little endian
    // format).
    crc32_le: u32,
}

impl BootloaderControl {
    /// Two slots, both fresh, slot a active.
    pub fn factory_default() -> BootloaderControl {
        let mut control = BootloaderControl {
            slot_suffix: [0u8; 4],
            magic: BOOT_CTRL_MAGIC,
            version: BOOT_CTRL_VERSION,
            bitfield1: [0u8; 1],
            reserved0: [0u8; 2],
            slot_info: [SlotMetadata::new(0, 0, false, false); 4],
            reserved1: [0u8; 8],
            crc32_le: 0,
        };
        control.set_nb_slot(2);
        control.set_recovery_tries_remaining(7);
        control.set_slot_suffix("_a").unwrap();
        control.slot_info[0] = SlotMetadata::new(15, 7, false, false);
        control.slot_info[1] = SlotMetadata::new(15, 7, false, false);
        control
    }

    pub fn slot_suffix_str(&self) -> Result<&CStr, BcbError> {
        let bytes = self.slot_suffix.as_slice();
        if let Some(null_position) = bytes.iter().position(|d| *d == 0) {
            CStr::from_bytes_with_nul(&bytes[0..null_position + 1])
                .map_err(|_e| BcbError::DataTooLong)
        } else {
            Err(BcbError::DataTooLong)
        }
    }

    pub fn set_slot_suffix(&mut self, suffix: &str) -> Result<(), BcbError> {
        if suffix.len() > 3 {
            return Err(BcbError::DataTooLong);
        }
        let mut bytes = [0u8; 4];
        bytes[..suffix.len()].copy_from_slice(suffix.as_bytes());
        self.slot_suffix = bytes;
        Ok(())
    }
}

/// Per-slot metadata, two bytes a slot.
#[derive(Debug, Clone, Copy, BitfieldStruct)]
#[repr(C, packed)]
pub struct SlotMetadata {
    // Slot priority with 15 meaning highest priority, 1 lowest
    // priority and 0 the slot is unbootable.
    #[bitfield(name = "priority", ty = "u8", bits = "0..=3")]
    // Number of times left attempting to boot this slot.
    #[bitfield(name = "tries_remaining", ty = "u8", bits = "4..=6")]
    // 1 if this slot has booted successfully, 0 otherwise.
    #[bitfield(name = "successful_boot", ty = "u8", bits = "7..=7")]
    data0: [u8; 1],
    // 1 if this slot is corrupted from a dm-verity corruption, 0
    #[bitfield(name = "verity_corrupted", ty = "u8", bits = "0..=0")]
    data1: [u8; 1],
}

impl SlotMetadata {
    pub fn new(priority: u8, tries: u8, successful: bool, verity_corrupted: bool) -> SlotMetadata {
        let mut slot = SlotMetadata {
            data0: [0u8; 1],
            data1: [0u8; 1],
        };
        slot.set_priority(priority);
        slot.set_tries_remaining(tries);
        slot.set_successful_boot(successful as u8);
        slot.set_verity_corrupted(verity_corrupted as u8);
        slot
    }
}

impl std::fmt::Display for SlotMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Priority:{} TriesRemaining:{} SuccessfulBoot:{} VerityCorrupted:{}",
            self.priority(),
            self.tries_remaining(),
            self.successful_boot(),
            self.verity_corrupted()
        )
    }
}
