/// What woke the platform up this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    NotApplicable,
    BatteryInserted,
    UsbChargerInserted,
    AcChargerInserted,
    PowerButtonPressed,
}

/// Why the platform was last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetSource {
    NotApplicable,
    PowerOn,
    ColdReset,
    WarmReset,
    KernelWatchdog,
    KernelPanic,
}

/// Power and reset facts reported by the platform.
pub trait PowerInfo {
    fn wake_source(&mut self) -> WakeSource;
    fn reset_source(&mut self) -> ResetSource;
    /// True when the recorded reboot reason is a user-requested shutdown.
    fn shutdown_requested(&mut self) -> bool;
    fn clear_reboot_reason(&mut self);
    /// True when the battery charge is sufficient to boot the OS.
    fn battery_ok_for_boot(&mut self) -> bool;
    fn charger_attached(&mut self) -> bool;
}
