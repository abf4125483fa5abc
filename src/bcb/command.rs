use crate::target::{name_to_target, BootTarget};

/// Parsed form of the BCB command field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BcbRequest {
    pub target: BootTarget,
    pub esp_path: Option<String>,
    /// The command must be erased before the target is honored.
    pub oneshot: bool,
}

/// Parse a `boot-<name>` or `bootonce-<name>` command. `None` when the
/// field is empty or carries something that is not addressed to the
/// bootloader.
pub fn parse_command(command: &str) -> Option<BcbRequest> {
    let (rest, oneshot) = if let Some(rest) = command.strip_prefix("bootonce-") {
        (rest, true)
    } else if let Some(rest) = command.strip_prefix("boot-") {
        (rest, false)
    } else {
        return None;
    };

    if rest.starts_with('\\') {
        // A path on the ESP. EFI binaries are chainloaded, anything else
        // is loaded as a boot image. Always one-shot.
        let target = if rest.ends_with(".efi") || rest.ends_with(".EFI") {
            BootTarget::EspEfiBinary
        } else {
            BootTarget::EspBootimage
        };
        return Some(BcbRequest {
            target,
            esp_path: Some(rest.to_string()),
            oneshot: true,
        });
    }

    Some(BcbRequest {
        target: name_to_target(rest),
        esp_path: None,
        oneshot,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn named_targets() {
        let req = parse_command("boot-recovery").unwrap();
        assert_eq!(req.target, BootTarget::Recovery);
        assert!(!req.oneshot);
        assert!(req.esp_path.is_none());

        let req = parse_command("bootonce-bootloader").unwrap();
        assert_eq!(req.target, BootTarget::Fastboot);
        assert!(req.oneshot);

        assert_eq!(
            parse_command("boot-fastboot").unwrap().target,
            BootTarget::Fastboot
        );
        assert_eq!(
            parse_command("boot-charging").unwrap().target,
            BootTarget::Charger
        );
    }

    #[test]
    fn unknown_names_are_flagged_not_dropped() {
        let req = parse_command("boot-flash-my-rom").unwrap();
        assert_eq!(req.target, BootTarget::UnknownTarget);
    }

    #[test]
    fn unrelated_commands_are_ignored() {
        assert!(parse_command("").is_none());
        assert!(parse_command("recovery").is_none());
        assert!(parse_command("update-radio").is_none());
    }

    #[test]
    fn esp_paths() {
        let req = parse_command("bootonce-\\loader.efi").unwrap();
        assert_eq!(req.target, BootTarget::EspEfiBinary);
        assert_eq!(req.esp_path.as_deref(), Some("\\loader.efi"));
        assert!(req.oneshot);

        let req = parse_command("boot-\\EFI\\BOOT\\SHIM.EFI").unwrap();
        assert_eq!(req.target, BootTarget::EspEfiBinary);
        // A persistent path request is still one-shot.
        assert!(req.oneshot);

        let req = parse_command("bootonce-\\images\\test.img").unwrap();
        assert_eq!(req.target, BootTarget::EspBootimage);
    }

    #[test]
    fn efi_suffix_match_is_case_exact() {
        // Mixed case is not a chainload; it is treated as a boot image
        // and will fail the magic check later if it is not one.
        let req = parse_command("bootonce-\\loader.Efi").unwrap();
        assert_eq!(req.target, BootTarget::EspBootimage);
    }
}
