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

pub mod rollback;

use pal::verifier::{SlotData, VerifiedBoot, VerifyResult};

use crate::error::CoreError;
use crate::image::loader::{BOOT_PARTITION_LABEL, RECOVERY_PARTITION_LABEL};
use crate::slot::SlotController;
use crate::target::BootTarget;
use crate::trust::TrustPipeline;

/// The partition a target is expected to boot from.
pub fn expected_partition(target: BootTarget, recovery_in_boot: bool) -> &'static str {
    match target {
        BootTarget::Recovery if !recovery_in_boot => RECOVERY_PARTITION_LABEL,
        _ => BOOT_PARTITION_LABEL,
    }
}

/// Whether the partition the verifier saw matches what the target
/// demands. Normal boot also accepts recovery, for the multi-stage OTA
/// reboot step.
pub fn partition_matches_target(
    target: BootTarget,
    partition_name: &str,
    recovery_in_boot: bool,
) -> bool {
    if partition_name == expected_partition(target, recovery_in_boot) {
        return true;
    }
    target == BootTarget::NormalBoot && partition_name == RECOVERY_PARTITION_LABEL
}

/// Run the external verifier for a partition-backed target and fold the
/// outcome into the trust pipeline.
///
/// The returned data is only `Ok` when the boot attempt may continue:
/// either the verifier passed, or the error is tolerated because the
/// device already lost green. The caller still has to deal with a red
/// state before handoff.
pub fn verify_partition_target(
    verifier: &mut dyn VerifiedBoot,
    trust: &mut TrustPipeline,
    target: BootTarget,
    slots: &mut Option<SlotController>,
    recovery_in_boot: bool,
) -> Result<SlotData, CoreError> {
    let allow = trust.allow_verification_error();
    let partitions = [expected_partition(target, recovery_in_boot)];
    // the dedicated recovery partition is not slotted
    let slot_flow = !(target == BootTarget::Recovery && !recovery_in_boot);

    let (result, slot_data) = match slots {
        Some(slots) if slot_flow => {
            let (result, slot_data) = verifier.ab_flow(&partitions, allow);
            if let Some(data) = &slot_data {
                if let Some(suffix) = &data.slot_suffix {
                    // the verifier owns slot choice in this flow
                    slots.set_active_cached(suffix);
                }
            }
            (result, slot_data)
        }
        _ => verifier.verify(&partitions, "", allow),
    };

    finish(trust, result, slot_data, allow)
}

/// Verify an image that is already in memory (RAM boot, ESP file).
pub fn verify_memory_image(
    verifier: &mut dyn VerifiedBoot,
    trust: &mut TrustPipeline,
    image: &[u8],
) -> Result<SlotData, CoreError> {
    let allow = trust.allow_verification_error();
    let (result, slot_data) = verifier.verify_image(image, allow);
    finish(trust, result, slot_data, allow)
}

fn finish(
    trust: &mut TrustPipeline,
    result: VerifyResult,
    slot_data: Option<SlotData>,
    allow: bool,
) -> Result<SlotData, CoreError> {
    trust.apply_verify_result(result, allow);

    match result {
        VerifyResult::Ok => {}
        other => {
            log::error!("Verification returned {:?}", other);
            if !allow {
                return Err(CoreError::VerificationFailed);
            }
        }
    }

    match slot_data {
        Some(data) => {
            log::info!(
                "Verified {} (vbmeta digest {})",
                data.partition_name,
                hex::encode(data.vbmeta_digest)
            );
            Ok(data)
        }
        // nothing to boot, tolerated or not
        None => Err(CoreError::VerificationFailed),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{slot_data_for, MockVerifier};
    use crate::trust::{LockState, TrustState};

    #[test]
    fn expected_partitions_per_target() {
        assert_eq!(expected_partition(BootTarget::NormalBoot, false), "boot");
        assert_eq!(expected_partition(BootTarget::Charger, false), "boot");
        assert_eq!(expected_partition(BootTarget::Memory, false), "boot");
        assert_eq!(expected_partition(BootTarget::EspBootimage, false), "boot");
        assert_eq!(expected_partition(BootTarget::Recovery, false), "recovery");
        assert_eq!(expected_partition(BootTarget::Recovery, true), "boot");
    }

    #[test]
    fn normal_boot_accepts_recovery_for_multistage_ota() {
        assert!(partition_matches_target(
            BootTarget::NormalBoot,
            "recovery",
            false
        ));
        assert!(!partition_matches_target(
            BootTarget::Charger,
            "recovery",
            false
        ));
        assert!(!partition_matches_target(
            BootTarget::NormalBoot,
            "vendor",
            false
        ));
    }

    #[test]
    fn locked_device_fails_closed() {
        let mut verifier = MockVerifier::ok(slot_data_for("boot"));
        verifier.result = pal::verifier::VerifyResult::ErrorVerification;
        let mut trust = TrustPipeline::begin(LockState::Locked, true, false);
        let err = verify_partition_target(
            &mut verifier,
            &mut trust,
            BootTarget::NormalBoot,
            &mut None,
            false,
        );
        assert!(err.is_err());
        assert_eq!(trust.state(), TrustState::Red);
    }

    #[test]
    fn unlocked_device_tolerates_errors_as_orange() {
        let mut verifier = MockVerifier::ok(slot_data_for("boot"));
        verifier.result = pal::verifier::VerifyResult::ErrorVerification;
        let mut trust = TrustPipeline::begin(LockState::Unlocked, true, false);
        let data = verify_partition_target(
            &mut verifier,
            &mut trust,
            BootTarget::NormalBoot,
            &mut None,
            false,
        )
        .unwrap();
        assert_eq!(data.partition_name, "boot");
        assert_eq!(trust.state(), TrustState::Orange);
    }

    #[test]
    fn slot_flow_caches_the_resolved_suffix() {
        let mut data = slot_data_for("boot");
        data.slot_suffix = Some("_b".to_string());
        let mut verifier = MockVerifier::ok(data);
        let mut trust = TrustPipeline::begin(LockState::Locked, true, false);

        let mut disk = crate::testutil::MockDisk::with_blank_misc();
        let mut slots = Some(crate::slot::SlotController::load(&mut disk));
        verify_partition_target(
            &mut verifier,
            &mut trust,
            BootTarget::NormalBoot,
            &mut slots,
            false,
        )
        .unwrap();
        assert_eq!(slots.unwrap().get_active(), Some("_b"));
        assert_eq!(trust.state(), TrustState::Green);
    }
}
