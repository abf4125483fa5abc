use pal::fastboot::FastbootTransport;
use pal::firmware::VariableStore;
use pal::input::KeyInput;
use pal::power::PowerInfo;
use pal::storage::{BlockStore, EspVolume};
use pal::time::Clock;
use pal::ux::BootUx;
use pal::verifier::VerifiedBoot;

/// Build-time toggles of the original firmware, surfaced as runtime
/// capability flags. The pipeline always has the same shape; disabled
/// stages are no-ops.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Slot (A/B) updates in use.
    pub use_slot_ab: bool,
    /// The recovery image lives inside the boot partition.
    pub recovery_in_boot: bool,
    /// Show a charging UI instead of booting when the only wake cause is
    /// power insertion.
    pub off_mode_charge: bool,
    /// Production signing: engineering escape hatches are closed.
    pub production: bool,
    /// A trusted OS is started after handoff.
    pub trusted_os: bool,
    /// The device is still on the factory line.
    pub provisioning_mode: bool,
    /// Consecutive watchdog/panic resets tolerated before the crash menu.
    pub watchdog_max_resets: u8,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            use_slot_ab: true,
            recovery_in_boot: false,
            off_mode_charge: true,
            production: true,
            trusted_os: false,
            provisioning_mode: false,
            watchdog_max_resets: 4,
        }
    }
}

/// Everything the decision core needs from the outside world, built once
/// at entry and threaded by reference. There is no global state beyond
/// the firmware-backed variables.
pub struct BootEnv<'a> {
    pub vars: &'a mut dyn VariableStore,
    pub disk: &'a mut dyn BlockStore,
    pub esp: &'a mut dyn EspVolume,
    pub keys: &'a mut dyn KeyInput,
    pub power: &'a mut dyn PowerInfo,
    pub clock: &'a mut dyn Clock,
    pub verifier: &'a mut dyn VerifiedBoot,
    pub ux: &'a mut dyn BootUx,
    pub fastboot: &'a mut dyn FastbootTransport,
    pub caps: Capabilities,
    /// Options the firmware passed to the loaded image.
    pub image_args: Vec<String>,
}
