//! Cross-phase file overlap detection.
//!
//! Under the independent strategy every plan branch starts from trunk, so two
//! phases declaring the same file will conflict once both land.

use std::collections::BTreeMap;

use crate::core::ids::ItemId;

/// Files declared by more than one phase, with the phases that declare them.
pub fn shared_files(phases: &[(ItemId, Vec<String>)]) -> BTreeMap<String, Vec<ItemId>> {
    let mut owners: BTreeMap<String, Vec<ItemId>> = BTreeMap::new();
    for (phase, files) in phases {
        for file in files {
            let entry = owners.entry(file.clone()).or_default();
            if !entry.contains(phase) {
                entry.push(phase.clone());
            }
        }
    }
    owners.retain(|_, phases| phases.len() > 1);
    owners
}
