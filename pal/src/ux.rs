/// What the user picked on an interactive screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UxChoice {
    Continue,
    PowerOff,
    Fastboot,
    Recovery,
    Crashmode,
}

/// Interactive surfaces the decision core drives. Rendering happens on
/// the other side of this trait; the core only cares about the answers.
pub trait BootUx {
    /// Show the low-battery logo for the given number of seconds.
    fn low_battery_notice(&mut self, display_seconds: u32);
    /// One-time warning that the device will boot in a non-green state.
    fn warn_not_green(&mut self, boot_state: u8);
    /// Blocking error screen. The returned choice is authoritative;
    /// `Fastboot` is only offered when the device is unlocked.
    fn verification_error_screen(&mut self, boot_state: u8, device_unlocked: bool) -> UxChoice;
    /// Crash-event menu shown after a watchdog/panic storm.
    fn crash_event_menu(&mut self) -> UxChoice;
    /// Visible pause before halting on an unrecoverable failure.
    fn fatal_pause(&mut self, seconds: u32);
}
