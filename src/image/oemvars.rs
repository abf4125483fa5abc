use pal::firmware::{VariableStore, VENDOR_GUID};

/// Install OEM variables carried in an image's second-stage blob. The
/// blob is `name=value` lines; blank lines and `#` comments are skipped.
/// Individual failures are logged and do not stop the rest.
pub fn install_oem_vars(vars: &mut dyn VariableStore, blob: &[u8]) -> usize {
    let text = match std::str::from_utf8(blob) {
        Ok(text) => text,
        Err(_) => {
            log::error!("OEM variable blob is not UTF-8, ignoring");
            return 0;
        }
    };

    let mut installed = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut split = line.splitn(2, '=');
        let name = split.next().unwrap_or("").trim();
        let value = match split.next() {
            Some(value) => value.trim(),
            None => {
                log::error!("Skipping malformed OEM variable line: {}", line);
                continue;
            }
        };
        if name.is_empty() {
            log::error!("Skipping OEM variable with empty name");
            continue;
        }
        match vars.set_variable(&VENDOR_GUID, name, value.as_bytes()) {
            Ok(()) => installed += 1,
            Err(e) => log::error!("Cannot set OEM variable {}: {}", name, e),
        }
    }
    log::info!("Installed {} OEM variable(s)", installed);
    installed
}
