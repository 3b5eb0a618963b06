use crate::event::WorkTemplate;
use std::collections::BTreeMap;

/// Work templates seen so far, keyed by work id.
#[derive(Debug, Default)]
pub struct WorkTemplates {
    templates: BTreeMap<u64, WorkTemplate>,
}

impl WorkTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a template. Returns `false` if the id was already known, in
    /// which case the stored template is kept.
    pub fn insert(&mut self, template: WorkTemplate) -> bool {
        if self.templates.contains_key(&template.work_id) {
            return false;
        }
        self.templates.insert(template.work_id, template);
        true
    }

    pub fn contains(&self, work_id: u64) -> bool {
        self.templates.contains_key(&work_id)
    }

    pub fn get(&self, work_id: u64) -> Option<&WorkTemplate> {
        self.templates.get(&work_id)
    }

    /// Highest work id seen.
    pub fn latest(&self) -> Option<u64> {
        self.templates.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
