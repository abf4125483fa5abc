use std::io;

use pal::verifier::{SlotData, VerifiedBoot};

/// Number of rollback index locations the store carries.
pub const MAX_ROLLBACK_LOCATIONS: usize = 32;

/// Advance the stored rollback indexes to what the verified slot
/// asserts. Locations are walked in ascending order and a stored value
/// is only ever raised. The first store failure aborts the whole update;
/// the next boot reconciles.
pub fn update_rollback_for_slot(
    verifier: &mut dyn VerifiedBoot,
    slot_data: &SlotData,
) -> io::Result<()> {
    for (location, asserted) in slot_data
        .rollback_indexes
        .iter()
        .copied()
        .enumerate()
        .take(MAX_ROLLBACK_LOCATIONS)
    {
        if asserted == 0 {
            continue;
        }
        let stored = verifier.read_rollback_index(location)?;
        if asserted > stored {
            verifier.write_rollback_index(location, asserted)?;
        }
    }
    Ok(())
}
