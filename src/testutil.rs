// Test doubles for the platform traits, shared by the module tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;

use pal::fastboot::{FastbootOp, FastbootTransport};
use pal::firmware::{VarGuid, VariableStore, EFI_GLOBAL_GUID, LOADER_GUID, VENDOR_GUID};
use pal::input::{Key, KeyInput};
use pal::power::{PowerInfo, ResetSource, WakeSource};
use pal::storage::{BlockStore, EspVolume};
use pal::time::Clock;
use pal::ux::{BootUx, UxChoice};
use pal::verifier::{SlotData, VerifiedBoot, VerifyResult};

use crate::bcb::message::BootloaderMessageAB;
use crate::env::{BootEnv, Capabilities};
use crate::target::selector::LOADER_ENTRY_ONE_SHOT_VAR;

#[derive(Default)]
pub struct MockVars {
    map: HashMap<(VarGuid, String), Vec<u8>>,
}

impl VariableStore for MockVars {
    fn get_variable(&mut self, guid: &VarGuid, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.map.get(&(*guid, name.to_string())).cloned())
    }

    fn set_variable(&mut self, guid: &VarGuid, name: &str, data: &[u8]) -> io::Result<()> {
        self.map.insert((*guid, name.to_string()), data.to_vec());
        Ok(())
    }

    fn delete_variable(&mut self, guid: &VarGuid, name: &str) -> io::Result<()> {
        self.map.remove(&(*guid, name.to_string()));
        Ok(())
    }
}

pub struct MockDisk {
    parts: HashMap<String, Vec<u8>>,
    uuids: HashMap<String, String>,
    failing: HashSet<String>,
}

impl MockDisk {
    pub fn with_blank_misc() -> MockDisk {
        let mut disk = MockDisk {
            parts: HashMap::new(),
            uuids: HashMap::new(),
            failing: HashSet::new(),
        };
        disk.add_partition("misc", vec![0u8; 4096]);
        disk
    }

    pub fn add_partition(&mut self, label: &str, data: Vec<u8>) {
        self.parts.insert(label.to_string(), data);
    }

    pub fn set_partition_uuid(&mut self, label: &str, uuid: &str) {
        self.uuids.insert(label.to_string(), uuid.to_string());
    }

    pub fn fail_reads_of(&mut self, label: &str) {
        self.failing.insert(label.to_string());
    }
}

impl BlockStore for MockDisk {
    fn read_partition(&mut self, label: &str) -> io::Result<Vec<u8>> {
        if self.failing.contains(label) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        self.parts
            .get(label)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such partition"))
    }

    fn write_partition(&mut self, label: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let part = self
            .parts
            .get_mut(label)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such partition"))?;
        let offset = offset as usize;
        if part.len() < offset + data.len() {
            part.resize(offset + data.len(), 0);
        }
        part[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn partition_uuid(&mut self, label: &str) -> io::Result<String> {
        self.uuids
            .get(label)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no uuid recorded"))
    }
}

#[derive(Default)]
pub struct MockEsp {
    files: HashMap<String, Vec<u8>>,
}

impl MockEsp {
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(path.to_string(), data);
    }
}

impl EspVolume for MockEsp {
    fn file_exists(&mut self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn read_file(&mut self, path: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn delete_file(&mut self, path: &str) -> io::Result<()> {
        self.files.remove(path);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockKeys {
    pub presses: VecDeque<Key>,
    /// How many more `key_held` polls report the key as down.
    pub held_remaining: u64,
}

impl KeyInput for MockKeys {
    fn poll_key(&mut self) -> Option<Key> {
        self.presses.pop_front()
    }

    fn key_held(&mut self, _key: Key) -> bool {
        if self.held_remaining > 0 {
            self.held_remaining -= 1;
            true
        } else {
            false
        }
    }
}

pub struct MockPower {
    pub wake: WakeSource,
    pub reset: ResetSource,
    pub shutdown_req: bool,
    pub battery_ok: bool,
    pub charger: bool,
}

impl Default for MockPower {
    fn default() -> Self {
        MockPower {
            wake: WakeSource::NotApplicable,
            reset: ResetSource::PowerOn,
            shutdown_req: false,
            battery_ok: true,
            charger: false,
        }
    }
}

impl PowerInfo for MockPower {
    fn wake_source(&mut self) -> WakeSource {
        self.wake
    }

    fn reset_source(&mut self) -> ResetSource {
        self.reset
    }

    fn shutdown_requested(&mut self) -> bool {
        self.shutdown_req
    }

    fn clear_reboot_reason(&mut self) {
        self.shutdown_req = false;
    }

    fn battery_ok_for_boot(&mut self) -> bool {
        self.battery_ok
    }

    fn charger_attached(&mut self) -> bool {
        self.charger
    }
}

pub struct MockClock {
    pub now: u64,
    pub slept_ms: u64,
}

impl Default for MockClock {
    fn default() -> Self {
        MockClock {
            now: 100_000,
            slept_ms: 0,
        }
    }
}

impl Clock for MockClock {
    fn now_seconds(&mut self) -> u64 {
        self.now
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.slept_ms += ms;
    }
}

pub struct MockVerifier {
    pub result: VerifyResult,
    pub data: Option<SlotData>,
    pub rollback: Vec<u64>,
    pub fail_rollback_write_at: Option<usize>,
    pub fail_rollback_read: bool,
    pub verify_calls: u32,
}

impl MockVerifier {
    pub fn ok(data: SlotData) -> MockVerifier {
        MockVerifier {
            result: VerifyResult::Ok,
            data: Some(data),
            rollback: vec![0; 8],
            fail_rollback_write_at: None,
            fail_rollback_read: false,
            verify_calls: 0,
        }
    }

    fn outcome(&mut self, allow: bool) -> (VerifyResult, Option<SlotData>) {
        self.verify_calls += 1;
        let data = if self.result == VerifyResult::Ok || allow {
            self.data.clone()
        } else {
            None
        };
        (self.result, data)
    }
}

impl VerifiedBoot for MockVerifier {
    fn verify(
        &mut self,
        _partitions: &[&str],
        _slot_suffix: &str,
        allow_verification_error: bool,
    ) -> (VerifyResult, Option<SlotData>) {
        self.outcome(allow_verification_error)
    }

    fn ab_flow(
        &mut self,
        _partitions: &[&str],
        allow_verification_error: bool,
    ) -> (VerifyResult, Option<SlotData>) {
        self.outcome(allow_verification_error)
    }

    fn verify_image(
        &mut self,
        _image: &[u8],
        allow_verification_error: bool,
    ) -> (VerifyResult, Option<SlotData>) {
        self.outcome(allow_verification_error)
    }

    fn read_rollback_index(&mut self, location: usize) -> io::Result<u64> {
        if self.fail_rollback_read {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
        }
        Ok(self.rollback.get(location).copied().unwrap_or(0))
    }

    fn write_rollback_index(&mut self, location: usize, value: u64) -> io::Result<()> {
        if self.fail_rollback_write_at == Some(location) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        if self.rollback.len() <= location {
            self.rollback.resize(location + 1, 0);
        }
        self.rollback[location] = value;
        Ok(())
    }
}

pub struct MockUx {
    pub error_choice: UxChoice,
    pub crash_choice: UxChoice,
    pub warnings: Vec<u8>,
    pub error_screens: Vec<(u8, bool)>,
    pub low_battery_notices: u32,
    pub fatal_pauses: Vec<u32>,
}

impl Default for MockUx {
    fn default() -> Self {
        MockUx {
            error_choice: UxChoice::PowerOff,
            crash_choice: UxChoice::Continue,
            warnings: Vec::new(),
            error_screens: Vec::new(),
            low_battery_notices: 0,
            fatal_pauses: Vec::new(),
        }
    }
}

impl BootUx for MockUx {
    fn low_battery_notice(&mut self, _display_seconds: u32) {
        self.low_battery_notices += 1;
    }

    fn warn_not_green(&mut self, boot_state: u8) {
        self.warnings.push(boot_state);
    }

    fn verification_error_screen(&mut self, boot_state: u8, device_unlocked: bool) -> UxChoice {
        self.error_screens.push((boot_state, device_unlocked));
        self.error_choice
    }

    fn crash_event_menu(&mut self) -> UxChoice {
        self.crash_choice
    }

    fn fatal_pause(&mut self, seconds: u32) {
        self.fatal_pauses.push(seconds);
    }
}

#[derive(Default)]
pub struct MockFastboot {
    pub ops: VecDeque<FastbootOp>,
}

impl FastbootTransport for MockFastboot {
    fn serve_one(&mut self) -> io::Result<FastbootOp> {
        self.ops
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "transport closed"))
    }
}

/// A boot image with a tiny kernel and ramdisk, and an optional
/// second-stage blob.
pub fn boot_image_bytes(cmdline: &str, second: &[u8]) -> Vec<u8> {
    const PAGE: usize = 4096;
    let mut hdr = Vec::new();
    hdr.extend_from_slice(b"ANDROID!");
    for value in &[
        8u32,                 // kernel_size
        0x1000_8000,          // kernel_addr
        8,                    // ramdisk_size
        0x1100_0000,          // ramdisk_addr
        second.len() as u32,  // second_size
        0x10F0_0000,          // second_addr
        0x1000_0100,          // tags_addr
        PAGE as u32,          // page_size
        0,                    // header_version
        0,                    // os_version
    ] {
        hdr.extend_from_slice(&value.to_le_bytes());
    }
    hdr.extend_from_slice(&[0u8; 16]); // name
    let mut cmdline_field = [0u8; 512];
    cmdline_field[..cmdline.len()].copy_from_slice(cmdline.as_bytes());
    hdr.extend_from_slice(&cmdline_field);
    hdr.extend_from_slice(&[0u8; 32]); // id
    hdr.extend_from_slice(&[0u8; 1024]); // extra_cmdline

    let mut image = hdr;
    image.resize(PAGE, 0); // header page
    image.extend_from_slice(&[0xEE; 8]); // kernel
    image.resize(2 * PAGE, 0);
    image.extend_from_slice(&[0xDD; 8]); // ramdisk
    image.resize(3 * PAGE, 0);
    if !second.is_empty() {
        image.extend_from_slice(second);
        image.resize(4 * PAGE, 0);
    }
    image
}

pub fn slot_data_for(partition: &str) -> SlotData {
    SlotData {
        loaded_partition: boot_image_bytes("console=ttyS0", &[]),
        partition_name: partition.to_string(),
        rollback_indexes: vec![0; 4],
        slot_suffix: None,
        cmdline: Some("console=ttyS0".to_string()),
        vbmeta_digest: [0xAB; 32],
    }
}

/// One mock of everything, wired into a `BootEnv` on demand.
pub struct Rig {
    pub vars: MockVars,
    pub disk: MockDisk,
    pub esp: MockEsp,
    pub keys: MockKeys,
    pub power: MockPower,
    pub clock: MockClock,
    pub verifier: MockVerifier,
    pub ux: MockUx,
    pub fastboot: MockFastboot,
    pub caps: Capabilities,
    pub image_args: Vec<String>,
}

impl Default for Rig {
    fn default() -> Rig {
        let mut disk = MockDisk::with_blank_misc();
        // valid factory control data, slot a active
        let mut message = BootloaderMessageAB::read_from_misc(&mut disk).unwrap();
        message.reset_control();
        message.write_control_region(&mut disk).unwrap();

        Rig {
            vars: MockVars::default(),
            disk,
            esp: MockEsp::default(),
            keys: MockKeys::default(),
            power: MockPower::default(),
            clock: MockClock::default(),
            verifier: MockVerifier::ok(slot_data_for("boot")),
            ux: MockUx::default(),
            fastboot: MockFastboot::default(),
            caps: Capabilities::default(),
            image_args: Vec::new(),
        }
    }
}

impl Rig {
    pub fn env(&mut self) -> BootEnv<'_> {
        BootEnv {
            vars: &mut self.vars,
            disk: &mut self.disk,
            esp: &mut self.esp,
            keys: &mut self.keys,
            power: &mut self.power,
            clock: &mut self.clock,
            verifier: &mut self.verifier,
            ux: &mut self.ux,
            fastboot: &mut self.fastboot,
            caps: self.caps,
            image_args: self.image_args.clone(),
        }
    }

    pub fn set_bcb_command(&mut self, command: &str) {
        let mut message = BootloaderMessageAB::read_from_misc(&mut self.disk).unwrap();
        message.message.set_command(command).unwrap();
        message.write_message_region(&mut self.disk).unwrap();
    }

    pub fn bcb_command(&mut self) -> String {
        let message = BootloaderMessageAB::read_from_misc(&mut self.disk).unwrap();
        message.message.command().unwrap().to_string()
    }

    pub fn bcb_status(&mut self) -> String {
        let message = BootloaderMessageAB::read_from_misc(&mut self.disk).unwrap();
        message.message.status().unwrap().to_string()
    }

    pub fn set_secure_boot(&mut self, enabled: bool) {
        self.vars
            .set_variable(&EFI_GLOBAL_GUID, "SecureBoot", &[enabled as u8])
            .unwrap();
    }

    pub fn set_unlocked(&mut self) {
        self.vars
            .set_variable(&VENDOR_GUID, crate::trust::OEM_LOCK_VAR, &[1])
            .unwrap();
    }

    pub fn boot_state(&mut self) -> Option<Vec<u8>> {
        self.vars
            .get_variable(&VENDOR_GUID, crate::trust::BOOT_STATE_VAR)
            .unwrap()
    }

    pub fn set_slots(&mut self, slots: [(u8, u8, bool); 2]) {
        let mut message = BootloaderMessageAB::read_from_misc(&mut self.disk).unwrap();
        let mut control = crate::bcb::message::BootloaderControl::factory_default();
        for (index, (priority, tries, successful)) in slots.iter().enumerate() {
            control.slot_info[index] =
                crate::bcb::message::SlotMetadata::new(*priority, *tries, *successful, false);
        }
        message.set_control(&control);
        message.write_control_region(&mut self.disk).unwrap();
    }

    pub fn set_one_shot(&mut self, value: &str) {
        let mut encoded = Vec::new();
        for unit in value.encode_utf16() {
            encoded.extend_from_slice(&unit.to_le_bytes());
        }
        encoded.extend_from_slice(&[0, 0]);
        self.vars
            .set_variable(&LOADER_GUID, LOADER_ENTRY_ONE_SHOT_VAR, &encoded)
            .unwrap();
    }
}
