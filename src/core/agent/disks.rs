// src/core/agent/disks.rs

//! Boot-disk-first normalization of instance template disks.

use super::model::AttachedDisk;

/// Reorders `disks` so that a persistent boot disk comes first.
///
/// If there are no persistent disks, or the first persistent disk is already
/// a boot disk, the list is returned unchanged. Otherwise the result is the
/// first persistent boot disk (if any) followed by every non-boot disk in its
/// original order. All other boot disks are dropped.
pub fn normalize_disks(disks: Vec<AttachedDisk>) -> Vec<AttachedDisk> {
    let first_persistent = disks.iter().find(|disk| disk.is_persistent());
    match first_persistent {
        None => return disks,
        Some(disk) if disk.boot => return disks,
        Some(_) => {}
    }

    let boot_index = disks
        .iter()
        .position(|disk| disk.is_persistent() && disk.boot);

    let mut sorted = Vec::with_capacity(disks.len());
    let mut rest = Vec::with_capacity(disks.len());
    for (index, disk) in disks.into_iter().enumerate() {
        if Some(index) == boot_index {
            sorted.push(disk);
        } else if !disk.boot {
            rest.push(disk);
        }
    }
    sorted.extend(rest);
    sorted
}
