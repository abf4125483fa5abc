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

use pal::firmware::{VariableStore, LOADER_GUID, VENDOR_GUID};
use pal::input::Key;
use pal::power::WakeSource;
use pal::ux::UxChoice;

use crate::bcb::command::parse_command;
use crate::bcb::message::BootloaderMessageAB;
use crate::env::BootEnv;
use crate::slot::SlotController;
use crate::target::{name_to_target, BootTarget};
use crate::watchdog::{self, CrashCheck};

pub const MAGIC_KEY_TIMEOUT_VAR: &str = "MagicKeyTimeout";
pub const LOADER_ENTRY_ONE_SHOT_VAR: &str = "LoaderEntryOneShot";
/// Presence of this file on the ESP forces fastboot.
pub const FORCE_FASTBOOT_SENTINEL: &str = "\\force_fastboot";

const MAGIC_KEY_TIMEOUT_DEFAULT_MS: u64 = 200;
const MAGIC_KEY_TIMEOUT_MAX_MS: u64 = 1000;
/// Holding the magic key this long selects fastboot instead of recovery.
const MAGIC_KEY_HOLD_FASTBOOT_MS: u64 = 2000;
const LOW_BATTERY_NOTICE_SECONDS: u32 = 3;

/// The one-shot string the kernel's block integrity layer leaves behind.
const VERITY_CORRUPTED_ONE_SHOT: &str = "dm-verity device corrupted";

/// The boot decision for this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub target: BootTarget,
    pub esp_path: Option<String>,
    pub oneshot: bool,
}

impl Selection {
    fn plain(target: BootTarget) -> Selection {
        Selection {
            target,
            esp_path: None,
            oneshot: false,
        }
    }
}

/// Reduce all boot signals to one target. Rules run in a fixed priority
/// order and the first match wins; every failure along the way degrades
/// to a normal boot rather than surfacing.
pub fn choose_target(env: &mut BootEnv) -> Selection {
    if let Some(selection) = check_image_args(env) {
        return selection;
    }

    if env.esp.file_exists(FORCE_FASTBOOT_SENTINEL) {
        log::info!("{} present, forcing fastboot", FORCE_FASTBOOT_SENTINEL);
        return Selection::plain(BootTarget::Fastboot);
    }

    if let Some(target) = check_magic_key(env) {
        return Selection::plain(target);
    }

    match watchdog::check_reset_loop(env) {
        CrashCheck::Proceed => {}
        CrashCheck::PowerOff => return Selection::plain(BootTarget::PowerOff),
        CrashCheck::Escalate => {
            if let Some(selection) = crash_menu(env) {
                return selection;
            }
        }
    }

    if env.caps.off_mode_charge && env.power.wake_source() == WakeSource::BatteryInserted {
        return Selection::plain(BootTarget::PowerOff);
    }

    if let Some(selection) = check_bcb(env) {
        return selection;
    }

    if let Some(selection) = check_loader_entry_one_shot(env) {
        return selection;
    }

    if !env.power.battery_ok_for_boot() {
        if env.power.charger_attached() {
            return Selection::plain(BootTarget::Charger);
        }
        env.ux.low_battery_notice(LOW_BATTERY_NOTICE_SECONDS);
        return Selection::plain(BootTarget::PowerOff);
    }

    if env.caps.off_mode_charge
        && matches!(
            env.power.wake_source(),
            WakeSource::UsbChargerInserted | WakeSource::AcChargerInserted
        )
    {
        return Selection::plain(BootTarget::Charger);
    }

    Selection::plain(BootTarget::NormalBoot)
}

fn check_image_args(env: &BootEnv) -> Option<Selection> {
    let mut args = env.image_args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-f" => return Some(Selection::plain(BootTarget::Fastboot)),
            "-a" => {
                // historical RAM-boot address; the address is ignored
                let _ = args.next();
                log::info!("-a is no longer supported, entering fastboot");
                return Some(Selection::plain(BootTarget::Fastboot));
            }
            "-U" if !env.caps.production => {
                let _name = args.next();
                log::info!("Self-test run requested, exiting to the shell");
                return Some(Selection::plain(BootTarget::ExitShell));
            }
            _ => {}
        }
    }
    None
}

fn magic_key_timeout_ms(vars: &mut dyn VariableStore) -> u64 {
    let raw = match vars.get_variable(&VENDOR_GUID, MAGIC_KEY_TIMEOUT_VAR) {
        Ok(Some(raw)) => raw,
        _ => return MAGIC_KEY_TIMEOUT_DEFAULT_MS,
    };
    let parsed = std::str::from_utf8(&raw)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<u64>().ok());
    match parsed {
        Some(ms) if ms <= MAGIC_KEY_TIMEOUT_MAX_MS => ms,
        Some(ms) => {
            log::error!("{} of {} ms is out of range", MAGIC_KEY_TIMEOUT_VAR, ms);
            MAGIC_KEY_TIMEOUT_DEFAULT_MS
        }
        None => {
            log::error!("Cannot parse {}", MAGIC_KEY_TIMEOUT_VAR);
            MAGIC_KEY_TIMEOUT_DEFAULT_MS
        }
    }
}

/// Poll for the magic key. A long hold selects fastboot, a short press
/// recovery. Polling runs at one-millisecond steps with a hard ceiling.
fn check_magic_key(env: &mut BootEnv) -> Option<BootTarget> {
    let timeout = magic_key_timeout_ms(env.vars);
    let mut waited = 0;
    while waited < timeout {
        if env.keys.poll_key() == Some(Key::DownArrow) {
            let mut held = 0;
            while env.keys.key_held(Key::DownArrow) {
                if held >= MAGIC_KEY_HOLD_FASTBOOT_MS {
                    return Some(BootTarget::Fastboot);
                }
                env.clock.sleep_ms(1);
                held += 1;
            }
            return Some(BootTarget::Recovery);
        }
        env.clock.sleep_ms(1);
        waited += 1;
    }
    None
}

fn crash_menu(env: &mut BootEnv) -> Option<Selection> {
    match env.ux.crash_event_menu() {
        UxChoice::Continue => None,
        UxChoice::PowerOff => Some(Selection::plain(BootTarget::PowerOff)),
        UxChoice::Fastboot => Some(Selection::plain(BootTarget::Fastboot)),
        UxChoice::Recovery => Some(Selection::plain(BootTarget::Recovery)),
        UxChoice::Crashmode => Some(Selection::plain(BootTarget::Crashmode)),
    }
}

fn check_bcb(env: &mut BootEnv) -> Option<Selection> {
    let mut message = match BootloaderMessageAB::read_from_misc(env.disk) {
        Ok(message) => message,
        Err(e) => {
            log::error!("Cannot read the BCB: {}", e);
            return None;
        }
    };

    // the status field is ours; clear it before anything else happens
    let stale_status = match message.message.status() {
        Ok("") => false,
        Ok(_) | Err(_) => true,
    };
    if stale_status {
        message.message.clear_status();
        if let Err(e) = message.write_message_region(env.disk) {
            log::error!("Cannot clear the BCB status: {}", e);
            return None;
        }
    }

    let command = match message.message.command() {
        Ok(command) => command.to_string(),
        Err(e) => {
            log::error!("Malformed BCB command: {}", e);
            return None;
        }
    };

    let request = parse_command(&command)?;

    if request.oneshot {
        // erase and persist before the target is honored, so a reset in
        // between cannot replay it
        message.message.clear_command();
        if let Err(e) = message.write_message_region(env.disk) {
            log::error!("Cannot consume the one-shot BCB command: {}", e);
            return None;
        }
    }

    if request.target == BootTarget::UnknownTarget {
        log::error!("Unknown BCB target in {:?}", command);
        return None;
    }

    log::info!("BCB requests {}", request.target.as_str());
    Some(Selection {
        target: request.target,
        esp_path: request.esp_path,
        oneshot: request.oneshot,
    })
}

fn decode_utf16_string(raw: &[u8]) -> Option<String> {
    if raw.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let end = units.iter().position(|unit| *unit == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end]).ok()
}

/// Consume the one-shot loader entry. The variable is deleted no matter
/// what it contained. A verity-corruption note flags the active slot and
/// falls through; dnx and normal-boot entries are treated as spurious.
fn check_loader_entry_one_shot(env: &mut BootEnv) -> Option<Selection> {
    let raw = match env.vars.get_variable(&LOADER_GUID, LOADER_ENTRY_ONE_SHOT_VAR) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            log::error!("Cannot read {}: {}", LOADER_ENTRY_ONE_SHOT_VAR, e);
            return None;
        }
    };
    if let Err(e) = env.vars.delete_variable(&LOADER_GUID, LOADER_ENTRY_ONE_SHOT_VAR) {
        log::error!("Cannot delete {}: {}", LOADER_ENTRY_ONE_SHOT_VAR, e);
    }

    let value = match decode_utf16_string(&raw) {
        Some(value) => value,
        None => {
            log::error!("{} is not a UTF-16 string", LOADER_ENTRY_ONE_SHOT_VAR);
            return None;
        }
    };

    if value == VERITY_CORRUPTED_ONE_SHOT {
        log::error!("Kernel reported a dm-verity corruption");
        if env.caps.use_slot_ab {
            let mut slots = SlotController::load(env.disk);
            slots.mark_verity_corrupted(true);
            if let Err(e) = slots.persist(env.disk) {
                log::error!("Cannot record the verity corruption: {}", e);
            }
        }
        return None;
    }

    match name_to_target(&value) {
        BootTarget::UnknownTarget | BootTarget::Dnx | BootTarget::NormalBoot => None,
        BootTarget::Charger if !env.caps.off_mode_charge => {
            Some(Selection::plain(BootTarget::PowerOff))
        }
        target => Some(Selection::plain(target)),
    }
}
