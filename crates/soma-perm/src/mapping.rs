use std::collections::HashMap;

use soma_domain::{ActionId, PermissionId, SectionId};

/// Unmapping tombstones the slot instead of shifting the vector; once
/// enough slots have been hidden this way, a compaction pass frees them.
pub const COMPACTION_THRESHOLD: u64 = 256;

/// Tracks which sections and actions are mapped to which permission.
#[derive(Debug, Default)]
pub struct PermissionMapping {
    compaction_counter: u64,
    /// section → permissions mapping the whole section
    section: HashMap<SectionId, Vec<Option<PermissionId>>>,
    /// (section, action) → permissions mapping the single action
    action: HashMap<(SectionId, ActionId), Vec<Option<PermissionId>>>,
    /// permission → sections it maps
    perm_section: HashMap<PermissionId, Vec<Option<SectionId>>>,
    /// permission → (section, action) pairs it maps
    perm_action: HashMap<PermissionId, Vec<Option<(SectionId, ActionId)>>>,
}

impl PermissionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_section(&mut self, section_id: SectionId, permission_id: PermissionId) {
        self.section.entry(section_id).or_default().push(Some(permission_id));
        self.perm_section
            .entry(permission_id)
            .or_default()
            .push(Some(section_id));
    }

    pub fn unmap_section(&mut self, section_id: SectionId, permission_id: PermissionId) {
        let mut found = false;
        if let Some(slots) = self.section.get_mut(&section_id) {
            for slot in slots.iter_mut() {
                if *slot == Some(permission_id) {
                    *slot = None;
                    self.compaction_counter += 1;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return;
        }
        if let Some(slots) = self.perm_section.get_mut(&permission_id) {
            for slot in slots.iter_mut() {
                if *slot == Some(section_id) {
                    *slot = None;
                    self.compaction_counter += 1;
                    break;
                }
            }
        }
        self.maybe_compact();
    }

    pub fn map_action(
        &mut self,
        section_id: SectionId,
        action_id: ActionId,
        permission_id: PermissionId,
    ) {
        self.action
            .entry((section_id, action_id))
            .or_default()
            .push(Some(permission_id));
        self.perm_action
            .entry(permission_id)
            .or_default()
            .push(Some((section_id, action_id)));
    }

    pub fn unmap_action(
        &mut self,
        section_id: SectionId,
        action_id: ActionId,
        permission_id: PermissionId,
    ) {
        let mut found = false;
        if let Some(slots) = self.action.get_mut(&(section_id, action_id)) {
            for slot in slots.iter_mut() {
                if *slot == Some(permission_id) {
                    *slot = None;
                    self.compaction_counter += 1;
                    found = true;
                    break;
                }
            }
        }
        if !found {
            return;
        }
        if let Some(slots) = self.perm_action.get_mut(&permission_id) {
            for slot in slots.iter_mut() {
                if *slot == Some((section_id, action_id)) {
                    *slot = None;
                    self.compaction_counter += 1;
                    break;
                }
            }
        }
        self.maybe_compact();
    }

    /// Remove every mapping of a permission (used when the permission
    /// itself is deleted).
    pub fn remove_permission(&mut self, permission_id: PermissionId) {
        let sections: Vec<SectionId> = self
            .perm_section
            .get(&permission_id)
            .map(|v| v.iter().flatten().copied().collect())
            .unwrap_or_default();
        for s in sections {
            self.unmap_section(s, permission_id);
        }
        let actions: Vec<(SectionId, ActionId)> = self
            .perm_action
            .get(&permission_id)
            .map(|v| v.iter().flatten().copied().collect())
            .unwrap_or_default();
        for (s, a) in actions {
            self.unmap_action(s, a, permission_id);
        }
        self.perm_section.remove(&permission_id);
        self.perm_action.remove(&permission_id);
    }

    /// Does this permission map the whole section?
    pub fn maps_section(&self, permission_id: PermissionId, section_id: SectionId) -> bool {
        self.perm_section
            .get(&permission_id)
            .map(|v| v.iter().flatten().any(|s| *s == section_id))
            .unwrap_or(false)
    }

    /// Does this permission map the single action?
    pub fn maps_action(
        &self,
        permission_id: PermissionId,
        section_id: SectionId,
        action_id: ActionId,
    ) -> bool {
        self.perm_action
            .get(&permission_id)
            .map(|v| v.iter().flatten().any(|sa| *sa == (section_id, action_id)))
            .unwrap_or(false)
    }

    pub fn compaction_counter(&self) -> u64 {
        self.compaction_counter
    }

    fn maybe_compact(&mut self) {
        if self.compaction_counter < COMPACTION_THRESHOLD {
            return;
        }
        for slots in self.section.values_mut() {
            slots.retain(Option::is_some);
        }
        for slots in self.action.values_mut() {
            slots.retain(Option::is_some);
        }
        for slots in self.perm_section.values_mut() {
            slots.retain(Option::is_some);
        }
        for slots in self.perm_action.values_mut() {
            slots.retain(Option::is_some);
        }
        self.compaction_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_and_unmap_section() {
        let mut m = PermissionMapping::new();
        let s = SectionId::generate();
        let p = PermissionId::generate();
        m.map_section(s, p);
        assert!(m.maps_section(p, s));

        m.unmap_section(s, p);
        assert!(!m.maps_section(p, s));
        assert_eq!(m.compaction_counter(), 2);
    }

    #[test]
    fn unmapping_something_never_mapped_is_harmless() {
        let mut m = PermissionMapping::new();
        m.unmap_section(SectionId::generate(), PermissionId::generate());
        assert_eq!(m.compaction_counter(), 0);
    }

    #[test]
    fn remove_permission_clears_all_mappings() {
        let mut m = PermissionMapping::new();
        let s = SectionId::generate();
        let a = ActionId::generate();
        let p = PermissionId::generate();
        m.map_section(s, p);
        m.map_action(s, a, p);

        m.remove_permission(p);
        assert!(!m.maps_section(p, s));
        assert!(!m.maps_action(p, s, a));
    }

    #[test]
    fn compaction_resets_counter() {
        let mut m = PermissionMapping::new();
        let p = PermissionId::generate();
        // drive the counter over the threshold
        for _ in 0..=COMPACTION_THRESHOLD {
            let s = SectionId::generate();
            m.map_section(s, p);
            m.unmap_section(s, p);
        }
        assert!(m.compaction_counter() < COMPACTION_THRESHOLD);
    }
}
