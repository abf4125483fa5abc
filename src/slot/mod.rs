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

use std::io;

use bounded_integer::*;
use pal::storage::BlockStore;

use crate::bcb::message::{BootloaderControl, BootloaderMessageAB};

bounded_integer! {
    pub struct Priority { 0..16 }
}

bounded_integer! {
    pub struct TriesRemaining { 0..8 }
}

/// Typed view of one slot's metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotState {
    pub priority: Priority,
    pub tries_remaining: TriesRemaining,
    pub successful_boot: bool,
    pub verity_corrupted: bool,
}

const SLOT_SUFFIXES: [&str; 4] = ["_a", "_b", "_c", "_d"];

fn suffix_for_index(index: usize) -> &'static str {
    SLOT_SUFFIXES[index]
}

fn index_for_suffix(suffix: &str) -> Option<usize> {
    SLOT_SUFFIXES.iter().position(|s| *s == suffix)
}

/// Owns the slot control data for the whole boot attempt. Loaded from
/// the misc partition once, mutated in memory, written back through
/// `persist`. Corrupt control data is replaced with factory defaults
/// instead of being reported upwards; a device must keep booting.
pub struct SlotController {
    message: BootloaderMessageAB,
    control: BootloaderControl,
    active: Option<String>,
}

impl SlotController {
    pub fn load(disk: &mut dyn BlockStore) -> SlotController {
        let message = match BootloaderMessageAB::read_from_misc(disk) {
            Ok(message) => message,
            Err(e) => {
                log::error!("Cannot read misc, using blank slot data: {}", e);
                BootloaderMessageAB::blank()
            }
        };
        let control = match message.get_bootloader_control() {
            Ok(control) => *control,
            Err(e) => {
                log::error!("Invalid slot control data ({}), resetting", e);
                BootloaderControl::factory_default()
            }
        };
        let active = control
            .slot_suffix_str()
            .ok()
            .and_then(|s| s.to_str().ok().map(String::from))
            .filter(|s| {
                index_for_suffix(s).map_or(false, |i| i < control.nb_slot().min(4) as usize)
            });
        SlotController {
            message,
            control,
            active,
        }
    }

    /// Write the control area back to the misc partition.
    pub fn persist(&mut self, disk: &mut dyn BlockStore) -> io::Result<()> {
        self.message.set_control(&self.control);
        self.message.write_control_region(disk)
    }

    pub fn num_slots(&self) -> u8 {
        self.control.nb_slot().min(4)
    }

    /// The cached active slot suffix. `None` until a slot was selected.
    pub fn get_active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Adopt the suffix an external slot flow resolved.
    pub fn set_active_cached(&mut self, suffix: &str) {
        if index_for_suffix(suffix).is_none() {
            log::error!("Refusing to cache unknown slot suffix {:?}", suffix);
            return;
        }
        let _ = self.control.set_slot_suffix(suffix);
        self.active = Some(suffix.to_string());
    }

    /// Pick the bootable slot with the highest priority. Ties keep the
    /// first label; a slot with priority 0 is never picked, and a slot
    /// out of tries stays eligible only after a successful boot.
    pub fn select_active(&mut self) -> Option<String> {
        let mut best: Option<(usize, u8)> = None;
        for index in 0..self.num_slots() as usize {
            let slot = &self.control.slot_info[index];
            if slot.priority() == 0 {
                continue;
            }
            if slot.tries_remaining() == 0 && slot.successful_boot() == 0 {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, priority)) => slot.priority() > priority,
            };
            if better {
                best = Some((index, slot.priority()));
            }
        }
        match best {
            Some((index, _)) => {
                let suffix = suffix_for_index(index);
                let _ = self.control.set_slot_suffix(suffix);
                self.active = Some(suffix.to_string());
                Some(suffix.to_string())
            }
            None => {
                self.active = None;
                None
            }
        }
    }

    fn active_index(&self) -> Option<usize> {
        self.active.as_deref().and_then(index_for_suffix)
    }

    /// Record a boot attempt on the active slot, just before handoff.
    pub fn mark_boot_attempt(&mut self) {
        if let Some(index) = self.active_index() {
            let slot = &mut self.control.slot_info[index];
            if slot.successful_boot() == 0 {
                let tries = slot.tries_remaining();
                if tries > 0 {
                    slot.set_tries_remaining(tries - 1);
                }
            }
        }
    }

    /// Record that loading or verifying the active slot failed. The slot
    /// loses a try and its success mark; once out of tries it drops from
    /// the selection set until an update raises it again.
    pub fn mark_boot_failed(&mut self) {
        if let Some(index) = self.active_index() {
            let slot = &mut self.control.slot_info[index];
            let tries = slot.tries_remaining();
            if tries > 0 {
                slot.set_tries_remaining(tries - 1);
            }
            slot.set_successful_boot(0);
            if slot.tries_remaining() == 0 {
                slot.set_priority(0);
            }
            self.active = None;
        }
    }

    pub fn mark_verity_corrupted(&mut self, corrupted: bool) {
        if let Some(index) = self.active_index() {
            self.control.slot_info[index].set_verity_corrupted(corrupted as u8);
        }
    }

    pub fn recovery_tries_remaining(&self) -> u8 {
        self.control.recovery_tries_remaining()
    }

    pub fn take_recovery_try(&mut self) {
        let tries = self.control.recovery_tries_remaining();
        if tries > 0 {
            self.control.set_recovery_tries_remaining(tries - 1);
        }
    }

    pub fn snapshot(&self, suffix: &str) -> Option<SlotState> {
        let index = index_for_suffix(suffix)?;
        if index >= self.num_slots() as usize {
            return None;
        }
        let slot = &self.control.slot_info[index];
        Some(SlotState {
            priority: Priority::new(slot.priority())?,
            tries_remaining: TriesRemaining::new(slot.tries_remaining())?,
            successful_boot: slot.successful_boot() != 0,
            verity_corrupted: slot.verity_corrupted() != 0,
        })
    }
}
