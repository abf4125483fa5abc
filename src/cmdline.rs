use crate::target::BootTarget;

/// Builds the kernel command line by prepending fragments, so with the
/// kernel's last-wins parsing everything added here stays overridable by
/// what the verified image shipped.
pub struct CmdlineBuilder {
    line: String,
}

impl CmdlineBuilder {
    pub fn new(verified: &str) -> CmdlineBuilder {
        CmdlineBuilder {
            line: verified.trim().to_string(),
        }
    }

    pub fn prepend(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.line.is_empty() {
            self.line = fragment.to_string();
        } else {
            self.line = format!("{} {}", fragment, self.line);
        }
    }

    pub fn append(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.line.is_empty() {
            self.line = fragment.to_string();
        } else {
            self.line.push(' ');
            self.line.push_str(fragment);
        }
    }

    pub fn build(self) -> String {
        self.line
    }
}

fn has_root_descriptor(cmdline: &str) -> bool {
    cmdline
        .split_whitespace()
        .any(|token| token.starts_with("root="))
}

/// Compose the final kernel command line for a boot target.
///
/// The slot suffix and the default root descriptor are prepended; a
/// caller-supplied fragment goes at the end. Recovery and RAM boots
/// bring their own root, so the descriptor is omitted for them.
pub fn build_kernel_cmdline(
    target: BootTarget,
    verified_cmdline: &str,
    slot_suffix: Option<&str>,
    system_partuuid: Option<&str>,
    extra: Option<&str>,
) -> String {
    let mut builder = CmdlineBuilder::new(verified_cmdline);

    if let Some(suffix) = slot_suffix {
        builder.prepend(&format!("androidboot.slot_suffix={}", suffix));
    }

    let wants_root = !matches!(target, BootTarget::Recovery | BootTarget::Memory);
    if wants_root && !has_root_descriptor(verified_cmdline) {
        match system_partuuid {
            Some(uuid) => builder.prepend(&format!(
                "skip_initramfs rootwait ro init=/init root=PARTUUID={}",
                uuid
            )),
            None => log::error!("No system PARTUUID available, booting without a root descriptor"),
        }
    }

    if let Some(extra) = extra {
        builder.append(extra);
    }

    builder.build()
}
