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

use pal::firmware::{VariableStore, VENDOR_GUID};
use pal::power::ResetSource;

use crate::env::BootEnv;

pub const WATCHDOG_COUNTER_VAR: &str = "WatchdogCounter";
pub const WATCHDOG_TIME_REF_VAR: &str = "WatchdogTimeRef";

/// Two escalations are separated by more than the tolerated number of
/// watchdog/panic resets inside this window.
pub const CRASH_WINDOW_SECONDS: u64 = 600;

/// What the reset-loop detector decided for this boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashCheck {
    /// Nothing special, keep selecting a target.
    Proceed,
    /// The user asked for a shutdown; honor it.
    PowerOff,
    /// Too many crash resets in a row: show the crash-event menu.
    Escalate,
}

fn read_state(vars: &mut dyn VariableStore) -> (u8, u64) {
    let counter = match vars.get_variable(&VENDOR_GUID, WATCHDOG_COUNTER_VAR) {
        Ok(Some(data)) if !data.is_empty() => data[0],
        _ => 0,
    };
    let time_ref = match vars.get_variable(&VENDOR_GUID, WATCHDOG_TIME_REF_VAR) {
        Ok(Some(data)) if data.len() >= 8 => {
            u64::from_le_bytes([data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7]])
        }
        _ => 0,
    };
    (counter, time_ref)
}

fn write_state(vars: &mut dyn VariableStore, counter: u8, time_ref: u64) {
    if let Err(e) = vars.set_variable(&VENDOR_GUID, WATCHDOG_COUNTER_VAR, &[counter]) {
        log::error!("Cannot persist {}: {}", WATCHDOG_COUNTER_VAR, e);
    }
    if let Err(e) = vars.set_variable(&VENDOR_GUID, WATCHDOG_TIME_REF_VAR, &time_ref.to_le_bytes())
    {
        log::error!("Cannot persist {}: {}", WATCHDOG_TIME_REF_VAR, e);
    }
}

fn clear_state(vars: &mut dyn VariableStore) {
    let _ = vars.delete_variable(&VENDOR_GUID, WATCHDOG_COUNTER_VAR);
    let _ = vars.delete_variable(&VENDOR_GUID, WATCHDOG_TIME_REF_VAR);
}

/// Detect a watchdog/panic reboot loop. Counts crash resets inside a
/// sliding window; a counter beyond the tolerated maximum clears the
/// state and escalates.
pub fn check_reset_loop(env: &mut BootEnv) -> CrashCheck {
    let source = env.power.reset_source();
    let crashy = matches!(
        source,
        ResetSource::KernelWatchdog | ResetSource::KernelPanic
    );

    let (mut counter, mut time_ref) = read_state(env.vars);

    if !crashy {
        if counter > 0 {
            clear_state(env.vars);
        }
        return CrashCheck::Proceed;
    }

    if env.caps.production && env.power.shutdown_requested() {
        env.power.clear_reboot_reason();
        return CrashCheck::PowerOff;
    }

    let now = env.clock.now_seconds();
    // restart the window when it expired or the clock went backwards
    if now < time_ref || now - time_ref > CRASH_WINDOW_SECONDS {
        counter = 0;
        time_ref = now;
    }

    counter = counter.saturating_add(1);
    if counter > env.caps.watchdog_max_resets {
        log::error!(
            "{} crash resets within the window, escalating",
            counter
        );
        clear_state(env.vars);
        return CrashCheck::Escalate;
    }

    write_state(env.vars, counter, time_ref);
    CrashCheck::Proceed
}
