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

pub mod fastboot;

use pal::ux::UxChoice;

use crate::cmdline::build_kernel_cmdline;
use crate::env::BootEnv;
use crate::error::CoreError;
use crate::image::loader::{load_boot_partition, load_from_esp, load_recovery, BOOT_PARTITION_LABEL};
use crate::image::oemvars::install_oem_vars;
use crate::image::BootImage;
use crate::slot::SlotController;
use crate::target::selector::{choose_target, Selection};
use crate::target::BootTarget;
use crate::trust::{
    persist_boot_state, read_lock_state, secure_boot_enabled, LockState, TrustPipeline, TrustState,
};
use crate::verify::rollback::update_rollback_for_slot;
use crate::verify::{partition_matches_target, verify_memory_image, verify_partition_target};

/// Visible pause before halting on an unrecoverable failure.
const FATAL_PAUSE_SECONDS: u32 = 30;

/// What the firmware should do once the decision core is done.
#[derive(Debug)]
pub enum FlowOutcome {
    /// Jump into the verified kernel.
    Handoff(Handoff),
    /// Chainload the named EFI binary from the ESP.
    Chainload(String),
    /// Reset into the named target.
    Reboot(BootTarget),
    PowerOff,
    /// Hand control back to the firmware shell.
    ExitShell,
    /// Unrecoverable; the caller halts.
    Halt,
}

/// Everything the kernel entry needs.
#[derive(Debug)]
pub struct Handoff {
    pub target: BootTarget,
    pub image: Vec<u8>,
    pub cmdline: String,
    pub state: TrustState,
}

/// The whole pipeline: select a target, then act on it.
pub fn run_boot_flow(env: &mut BootEnv) -> FlowOutcome {
    let selection = choose_target(env);
    log::info!("Boot target: {}", selection.target.as_str());
    dispatch(env, selection)
}

fn dispatch(env: &mut BootEnv, selection: Selection) -> FlowOutcome {
    match selection.target {
        BootTarget::PowerOff => FlowOutcome::PowerOff,
        BootTarget::ExitShell => FlowOutcome::ExitShell,
        BootTarget::Dnx => FlowOutcome::Reboot(BootTarget::Dnx),
        BootTarget::EspEfiBinary => match selection.esp_path {
            Some(path) => FlowOutcome::Chainload(path),
            None => {
                log::error!("Chainload requested without a path");
                FlowOutcome::PowerOff
            }
        },
        BootTarget::Fastboot | BootTarget::Crashmode => fastboot::run_fastboot(env),
        BootTarget::Memory | BootTarget::UnknownTarget => {
            log::error!("{} is not a selectable target", selection.target.as_str());
            FlowOutcome::PowerOff
        }
        BootTarget::NormalBoot
        | BootTarget::Recovery
        | BootTarget::Charger
        | BootTarget::EspBootimage => boot_verified(env, selection),
    }
}

fn load_for_target(
    env: &mut BootEnv,
    selection: &Selection,
    slots: &mut Option<SlotController>,
) -> Result<Vec<u8>, CoreError> {
    match selection.target {
        BootTarget::EspBootimage => {
            let path = selection
                .esp_path
                .as_deref()
                .ok_or(CoreError::InvalidParameter)?;
            load_from_esp(env.esp, path, selection.oneshot)
        }
        BootTarget::Recovery => {
            load_recovery(env.disk, slots.as_mut(), env.caps.recovery_in_boot).map(|l| l.data)
        }
        BootTarget::NormalBoot | BootTarget::Charger => {
            load_boot_partition(env.disk, slots.as_mut(), BOOT_PARTITION_LABEL).map(|l| l.data)
        }
        _ => Err(CoreError::InvalidParameter),
    }
}

/// The verified boot pipeline for one target: load, verify, reduce,
/// advance rollback state, update slots, hand off. This is the single
/// place that turns failures into a trust downgrade and a UX call.
fn boot_verified(env: &mut BootEnv, selection: Selection) -> FlowOutcome {
    let target = selection.target;
    let lock = read_lock_state(env.vars);
    let secure = secure_boot_enabled(env.vars);
    let mut trust = TrustPipeline::begin(lock, secure, env.caps.provisioning_mode);
    let mut slots = if env.caps.use_slot_ab {
        Some(SlotController::load(env.disk))
    } else {
        None
    };

    let (slot_data, loaded) = loop {
        trust.rewind();

        let loaded = match load_for_target(env, &selection, &mut slots) {
            Ok(loaded) => loaded,
            Err(e) => {
                // the loader already walked every slot it had
                log::error!("Cannot load an image for {}: {}", target.as_str(), e);
                if let Some(slots) = slots.as_mut() {
                    if let Err(e) = slots.persist(env.disk) {
                        log::error!("Cannot persist slot metadata: {}", e);
                    }
                }
                trust.raise_to(TrustState::Red);
                return boot_failure(env, &mut trust, lock);
            }
        };

        let verified = match target {
            BootTarget::EspBootimage => verify_memory_image(env.verifier, &mut trust, &loaded),
            _ => verify_partition_target(
                env.verifier,
                &mut trust,
                target,
                &mut slots,
                env.caps.recovery_in_boot,
            ),
        };

        match verified {
            Ok(data) => break (data, loaded),
            Err(e) => {
                log::error!("Verification failed for {}: {}", target.as_str(), e);
                let slot_failover =
                    matches!(target, BootTarget::NormalBoot | BootTarget::Charger);
                if slot_failover {
                    if let Some(slots) = slots.as_mut() {
                        slots.mark_boot_failed();
                        if let Err(e) = slots.persist(env.disk) {
                            log::error!("Cannot persist slot metadata: {}", e);
                        }
                        if slots.select_active().is_some() {
                            continue;
                        }
                    }
                }
                trust.raise_to(TrustState::Red);
                return boot_failure(env, &mut trust, lock);
            }
        }
    };

    finish_boot(env, target, trust, slots, slot_data, loaded, lock)
}

/// Shared tail of every successful verification, partition- or
/// RAM-backed.
fn finish_boot(
    env: &mut BootEnv,
    target: BootTarget,
    mut trust: TrustPipeline,
    mut slots: Option<SlotController>,
    mut slot_data: pal::verifier::SlotData,
    fallback_image: Vec<u8>,
    lock: LockState,
) -> FlowOutcome {
    // prefer the bytes the verifier actually hashed
    let image = if slot_data.loaded_partition.is_empty() {
        fallback_image
    } else {
        std::mem::take(&mut slot_data.loaded_partition)
    };

    // nothing with a bad magic goes anywhere near a handoff
    let parsed = match BootImage::parse(&image) {
        Ok(parsed) => parsed,
        Err(_) => {
            log::error!("Verified payload is not a boot image");
            env.ux.fatal_pause(FATAL_PAUSE_SECONDS);
            return FlowOutcome::Halt;
        }
    };

    if !partition_matches_target(target, &slot_data.partition_name, env.caps.recovery_in_boot) {
        log::error!(
            "Image is for {} which {} must not boot",
            slot_data.partition_name,
            target.as_str()
        );
        trust.raise_to(TrustState::Red);
    }

    if trust.state() == TrustState::Red {
        if env.caps.production {
            return boot_failure(env, &mut trust, lock);
        }
        if env.caps.trusted_os {
            log::error!("Boot state is red; starting the trusted OS anyway on an engineering build");
        } else {
            log::error!("Boot state is red; continuing on an engineering build");
        }
    }

    // stored rollback indexes advance only for a locked, trusted boot
    if lock == LockState::Locked && trust.state() <= TrustState::Yellow {
        if let Err(e) = update_rollback_for_slot(env.verifier, &slot_data) {
            // no partial advance; the next boot reconciles
            log::error!("Rollback index update failed: {}", e);
        }
    }

    if let Some(blob) = parsed.second_stage() {
        install_oem_vars(env.vars, blob);
    }

    let verified_cmdline = slot_data
        .cmdline
        .clone()
        .unwrap_or_else(|| parsed.cmdline());

    if let Some(slots) = slots.as_mut() {
        match target {
            BootTarget::NormalBoot | BootTarget::Charger => slots.mark_boot_attempt(),
            // dedicated recovery spends its own counter, not a slot try
            BootTarget::Recovery if !env.caps.recovery_in_boot => slots.take_recovery_try(),
            BootTarget::Recovery => slots.mark_boot_attempt(),
            _ => {}
        }
        if let Err(e) = slots.persist(env.disk) {
            log::error!("Cannot persist slot metadata: {}", e);
        }
    }

    persist_boot_state(env.vars, trust.state());

    let suffix = slots
        .as_ref()
        .and_then(|slots| slots.get_active().map(String::from));
    let system_uuid = {
        let label = format!("system{}", suffix.as_deref().unwrap_or(""));
        env.disk.partition_uuid(&label).ok()
    };
    let cmdline = build_kernel_cmdline(
        target,
        &verified_cmdline,
        suffix.as_deref(),
        system_uuid.as_deref(),
        None,
    );

    if trust.state() > TrustState::Green {
        env.ux.warn_not_green(trust.state().as_u8());
    }

    FlowOutcome::Handoff(Handoff {
        target,
        image,
        cmdline,
        state: trust.state(),
    })
}

/// Terminal failure: pin red, persist it, and let the user decide where
/// to go. The screen's answer is authoritative.
fn boot_failure(env: &mut BootEnv, trust: &mut TrustPipeline, lock: LockState) -> FlowOutcome {
    trust.raise_to(TrustState::Red);
    persist_boot_state(env.vars, trust.state());
    let unlocked = lock == LockState::Unlocked;
    match env.ux.verification_error_screen(trust.state().as_u8(), unlocked) {
        UxChoice::Fastboot if unlocked => fastboot::run_fastboot(env),
        UxChoice::Crashmode => FlowOutcome::Reboot(BootTarget::Crashmode),
        _ => FlowOutcome::PowerOff,
    }
}
