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

use pal::fastboot::FastbootOp;
use tracing::{debug, error};

use super::{finish_boot, FlowOutcome};
use crate::env::BootEnv;
use crate::error::CoreError;
use crate::slot::SlotController;
use crate::target::selector::Selection;
use crate::target::{name_to_target, BootTarget};
use crate::trust::{
    persist_boot_state, read_lock_state, secure_boot_enabled, LockState, TrustPipeline,
};
use crate::verify::verify_memory_image;

/// The interactive loop behind the FASTBOOT and CRASHMODE targets.
///
/// Every iteration starts from the persisted platform facts and nothing
/// but the cached boot-state variable survives into the next one. The
/// loop ends on a terminal transition: reboot, chainload, handoff or
/// power-off.
pub(crate) fn run_fastboot(env: &mut BootEnv) -> FlowOutcome {
    let lock = read_lock_state(env.vars);
    let secure = secure_boot_enabled(env.vars);
    let trust = TrustPipeline::begin(lock, secure, env.caps.provisioning_mode);
    // host tools read the same verdict the kernel would
    persist_boot_state(env.vars, trust.state());

    loop {
        let op = match env.fastboot.serve_one() {
            Ok(op) => op,
            Err(e) => {
                error!("Fastboot transport failed: {}", e);
                return FlowOutcome::PowerOff;
            }
        };

        match op {
            FastbootOp::Continue => {
                debug!("continue requested, leaving fastboot");
                return super::boot_verified(
                    env,
                    Selection {
                        target: BootTarget::NormalBoot,
                        esp_path: None,
                        oneshot: false,
                    },
                );
            }
            FastbootOp::Reboot(None) => return FlowOutcome::Reboot(BootTarget::NormalBoot),
            FastbootOp::Reboot(Some(name)) => match name_to_target(&name) {
                BootTarget::UnknownTarget => {
                    error!("Unknown reboot target {:?}", name);
                }
                target => return FlowOutcome::Reboot(target),
            },
            FastbootOp::Chainload(path) => return FlowOutcome::Chainload(path),
            FastbootOp::PowerOff => return FlowOutcome::PowerOff,
            FastbootOp::BootImage(image) => {
                debug!("boot image of {} bytes downloaded", image.len());
                match boot_from_ram(env, image) {
                    Ok(outcome) => return outcome,
                    // the attempt is over; nothing leaks into the next one
                    Err(e) => error!("RAM boot rejected: {}", e),
                }
            }
        }
    }
}

/// Boot an image that was downloaded into RAM. On production devices
/// this is an unlocked-device privilege.
fn boot_from_ram(env: &mut BootEnv, image: Vec<u8>) -> Result<FlowOutcome, CoreError> {
    let lock = read_lock_state(env.vars);
    if env.caps.production && lock != LockState::Unlocked {
        return Err(CoreError::InvalidParameter);
    }

    let secure = secure_boot_enabled(env.vars);
    let mut trust = TrustPipeline::begin(lock, secure, env.caps.provisioning_mode);
    let slots = if env.caps.use_slot_ab {
        Some(SlotController::load(env.disk))
    } else {
        None
    };

    let slot_data = verify_memory_image(env.verifier, &mut trust, &image)?;
    Ok(finish_boot(
        env,
        BootTarget::Memory,
        trust,
        slots,
        slot_data,
        image,
        lock,
    ))
}
