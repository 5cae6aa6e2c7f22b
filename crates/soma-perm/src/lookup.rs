use std::collections::HashMap;

use soma_domain::{Action, ActionId, Section, SectionId};

/// Bidirectional id↔name lookup for sections.
#[derive(Debug, Default)]
pub struct SectionLookup {
    by_id: HashMap<SectionId, Section>,
    by_name: HashMap<String, SectionId>,
}

impl SectionLookup {
    pub fn add(&mut self, section: Section) {
        self.by_name.insert(section.name.clone(), section.id);
        self.by_id.insert(section.id, section);
    }

    pub fn remove(&mut self, id: SectionId) {
        if let Some(s) = self.by_id.remove(&id) {
            self.by_name.remove(&s.name);
        }
    }

    pub fn by_id(&self, id: SectionId) -> Option<&Section> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&Section> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }
}

/// Bidirectional lookup for actions, plus the section→actions index.
#[derive(Debug, Default)]
pub struct ActionLookup {
    by_id: HashMap<ActionId, Action>,
    by_name: HashMap<(SectionId, String), ActionId>,
    by_section: HashMap<SectionId, Vec<ActionId>>,
}

impl ActionLookup {
    pub fn add(&mut self, action: Action) {
        self.by_name
            .insert((action.section_id, action.name.clone()), action.id);
        self.by_section
            .entry(action.section_id)
            .or_default()
            .push(action.id);
        self.by_id.insert(action.id, action);
    }

    pub fn remove(&mut self, id: ActionId) {
        if let Some(a) = self.by_id.remove(&id) {
            self.by_name.remove(&(a.section_id, a.name));
            if let Some(list) = self.by_section.get_mut(&a.section_id) {
                list.retain(|x| *x != id);
            }
        }
    }

    pub fn remove_section(&mut self, section_id: SectionId) {
        if let Some(ids) = self.by_section.remove(&section_id) {
            for id in ids {
                if let Some(a) = self.by_id.remove(&id) {
                    self.by_name.remove(&(a.section_id, a.name));
                }
            }
        }
    }

    pub fn by_id(&self, id: ActionId) -> Option<&Action> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, section_id: SectionId, name: &str) -> Option<&Action> {
        self.by_name
            .get(&(section_id, name.to_string()))
            .and_then(|id| self.by_id.get(id))
    }

    pub fn in_section(&self, section_id: SectionId) -> &[ActionId] {
        self.by_section
            .get(&section_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
