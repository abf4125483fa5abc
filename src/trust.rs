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

use std::convert::TryFrom;

use pal::firmware::{VariableStore, EFI_GLOBAL_GUID, VENDOR_GUID};
use pal::verifier::VerifyResult;

/// Name of the variable carrying the computed boot state, read by the
/// kernel and the trusted OS after handoff.
pub const BOOT_STATE_VAR: &str = "BootState";

/// Name of the variable holding the device lock state.
pub const OEM_LOCK_VAR: &str = "OemLock";

/// Verified-boot verdict. The order is total; pipeline stages may raise
/// the state but never lower it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TrustState {
    Green = 0,
    Yellow = 1,
    Orange = 2,
    Red = 3,
}

impl TrustState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Raise to at least `floor`. Never lowers.
    pub fn raise_to(&mut self, floor: TrustState) {
        if *self < floor {
            *self = floor;
        }
    }
}

impl TryFrom<u8> for TrustState {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TrustState::Green),
            1 => Ok(TrustState::Yellow),
            2 => Ok(TrustState::Orange),
            3 => Ok(TrustState::Red),
            _ => Err(()),
        }
    }
}

/// Device lock state persisted in the `OemLock` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
    /// Locked to a user-supplied root of trust.
    Verified,
}

/// Read the lock state. A missing or unreadable variable means the device
/// is locked; that is the safe direction.
pub fn read_lock_state(vars: &mut dyn VariableStore) -> LockState {
    match vars.get_variable(&VENDOR_GUID, OEM_LOCK_VAR) {
        Ok(Some(data)) => match data.first() {
            Some(&1) => LockState::Unlocked,
            Some(&2) => LockState::Verified,
            _ => LockState::Locked,
        },
        Ok(None) => LockState::Locked,
        Err(e) => {
            log::error!("Cannot read {}: {}", OEM_LOCK_VAR, e);
            LockState::Locked
        }
    }
}

/// Whether the firmware booted with secure boot enforced.
pub fn secure_boot_enabled(vars: &mut dyn VariableStore) -> bool {
    match vars.get_variable(&EFI_GLOBAL_GUID, "SecureBoot") {
        Ok(Some(data)) => data.first() == Some(&1),
        _ => false,
    }
}

/// The trust reduction carried along one boot attempt.
///
/// The baseline is computed once from platform facts. Verification folds
/// into it, and a fresh attempt (fastboot loop iteration) rewinds to the
/// baseline instead of back to green, so a state earned by an unlocked or
/// insecure platform is never forgotten.
#[derive(Debug, Clone, Copy)]
pub struct TrustPipeline {
    state: TrustState,
    floor: TrustState,
}

impl TrustPipeline {
    pub fn begin(lock: LockState, secure_boot: bool, provisioning: bool) -> TrustPipeline {
        let mut floor = TrustState::Green;
        if !secure_boot && !provisioning {
            floor = TrustState::Orange;
        } else {
            match lock {
                LockState::Unlocked => floor = TrustState::Orange,
                LockState::Verified => floor = TrustState::Yellow,
                LockState::Locked => {}
            }
        }
        TrustPipeline { state: floor, floor }
    }

    pub fn state(&self) -> TrustState {
        self.state
    }

    /// Verification errors are tolerated exactly when the device already
    /// lost green; it cannot lose more trust than it has.
    pub fn allow_verification_error(&self) -> bool {
        self.state != TrustState::Green
    }

    pub fn raise_to(&mut self, floor: TrustState) {
        self.state.raise_to(floor);
    }

    /// Fold a verifier outcome in. Only ever raises.
    pub fn apply_verify_result(&mut self, result: VerifyResult, allow_error: bool) {
        match result {
            VerifyResult::Ok => {
                if allow_error {
                    self.state.raise_to(TrustState::Orange);
                }
            }
            _ => {
                if allow_error {
                    // Red stays red; anything below lands on orange.
                    self.state.raise_to(TrustState::Orange);
                } else {
                    self.state.raise_to(TrustState::Red);
                }
            }
        }
    }

    /// Start a fresh verification attempt without forgetting the
    /// baseline.
    pub fn rewind(&mut self) {
        self.state = self.floor;
    }
}

/// Persist the computed state so the kernel and TOS read the same verdict.
pub fn persist_boot_state(vars: &mut dyn VariableStore, state: TrustState) {
    if let Err(e) = vars.set_variable(&VENDOR_GUID, BOOT_STATE_VAR, &[state.as_u8()]) {
        log::error!("Cannot persist {}: {}", BOOT_STATE_VAR, e);
    }
}
