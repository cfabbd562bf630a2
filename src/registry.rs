use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::filter;
use crate::sheet::{ParsedSheet, StudentId, StudentRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("load a spreadsheet first")]
    NoSheet,
    #[error("sheet was replaced; reload the student list")]
    StaleSheet,
    #[error("student {0} not found")]
    UnknownStudent(u32),
    #[error("no student selected")]
    NoSelection,
}

/// The single active sheet. Replaced wholesale on every load.
#[derive(Debug, Clone)]
pub struct SheetState {
    pub load_id: Uuid,
    pub sheet_name: String,
    pub source_name: Option<String>,
    pub students: Vec<StudentRecord>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct UiState {
    pub selected: Option<StudentId>,
    pub preview_open: bool,
    pub checked: BTreeSet<StudentId>,
    /// Student -> instant the "copied" indicator expires.
    pub copied: HashMap<StudentId, Instant>,
    pub search_term: String,
}

#[derive(Debug, Default)]
pub struct Registry {
    sheet: Option<SheetState>,
    pub ui: UiState,
}

impl Registry {
    pub fn load(
        &mut self,
        parsed: ParsedSheet,
        source_name: Option<String>,
        loaded_at: DateTime<Utc>,
    ) -> &SheetState {
        self.ui = UiState::default();
        self.sheet.insert(SheetState {
            load_id: Uuid::new_v4(),
            sheet_name: parsed.sheet_name,
            source_name,
            students: parsed.students,
            loaded_at,
        })
    }

    pub fn reset(&mut self) {
        self.sheet = None;
        self.ui = UiState::default();
    }

    pub fn sheet(&self) -> Option<&SheetState> {
        self.sheet.as_ref()
    }

    pub fn students(&self) -> &[StudentRecord] {
        self.sheet.as_ref().map(|s| s.students.as_slice()).unwrap_or(&[])
    }

    /// Rejects requests that were built against an earlier load.
    pub fn ensure_load(&self, load_id: Option<&str>) -> Result<&SheetState, RegistryError> {
        let sheet = self.sheet.as_ref().ok_or(RegistryError::NoSheet)?;
        match load_id {
            Some(id) if id != sheet.load_id.to_string() => Err(RegistryError::StaleSheet),
            _ => Ok(sheet),
        }
    }

    pub fn find(&self, id: StudentId) -> Result<&StudentRecord, RegistryError> {
        let sheet = self.sheet.as_ref().ok_or(RegistryError::NoSheet)?;
        sheet
            .students
            .iter()
            .find(|s| s.id == id)
            .ok_or(RegistryError::UnknownStudent(id.0))
    }

    /// Flips the checked flag; returns the new value.
    pub fn toggle_check(&mut self, id: StudentId) -> Result<bool, RegistryError> {
        self.find(id)?;
        if self.ui.checked.remove(&id) {
            Ok(false)
        } else {
            self.ui.checked.insert(id);
            Ok(true)
        }
    }

    /// All ids are validated before any flag changes.
    pub fn set_checked(&mut self, ids: &[StudentId], checked: bool) -> Result<usize, RegistryError> {
        for id in ids {
            self.find(*id)?;
        }
        let mut changed = 0;
        for id in ids {
            let did = if checked {
                self.ui.checked.insert(*id)
            } else {
                self.ui.checked.remove(id)
            };
            if did {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Checked students in registry order, including ones hidden by the current search.
    pub fn checked_students(&self) -> Vec<StudentRecord> {
        self.students()
            .iter()
            .filter(|s| self.ui.checked.contains(&s.id))
            .cloned()
            .collect()
    }

    pub fn visible(&self) -> Vec<&StudentRecord> {
        filter::filter_students(self.students(), &self.ui.search_term)
    }

    pub fn select(&mut self, id: StudentId) -> Result<&StudentRecord, RegistryError> {
        self.find(id)?;
        self.ui.selected = Some(id);
        self.ui.preview_open = true;
        self.find(id)
    }

    pub fn close_preview(&mut self) {
        self.ui.preview_open = false;
    }

    /// Explicit id when given, otherwise the student currently in the preview.
    pub fn target(&self, id: Option<StudentId>) -> Result<&StudentRecord, RegistryError> {
        let id = id
            .or(self.ui.selected)
            .ok_or(RegistryError::NoSelection)?;
        self.find(id)
    }

    pub fn mark_copied(&mut self, id: StudentId, expires_at: Instant) {
        self.ui.copied.insert(id, expires_at);
    }

    pub fn is_copied(&self, id: StudentId, now: Instant) -> bool {
        self.ui.copied.get(&id).is_some_and(|exp| now < *exp)
    }

    pub fn prune_copied(&mut self, now: Instant) {
        self.ui.copied.retain(|_, exp| now < *exp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parsed(names: &[&str]) -> ParsedSheet {
        ParsedSheet {
            sheet_name: "T10".to_string(),
            students: names
                .iter()
                .enumerate()
                .map(|(i, n)| StudentRecord {
                    id: StudentId(i as u32 + 1),
                    sequence_number: i as u32 + 1,
                    name: n.to_string(),
                    class_name: String::new(),
                    session_count: 1.0,
                    price_per_session: 100.0,
                    total_fee: 100.0,
                })
                .collect(),
        }
    }

    #[test]
    fn same_name_and_fee_students_are_tracked_separately() {
        let mut reg = Registry::default();
        reg.load(parsed(&["An", "An"]), None, Utc::now());
        assert_eq!(reg.toggle_check(StudentId(2)), Ok(true));
        let checked: Vec<u32> = reg.checked_students().iter().map(|s| s.sequence_number).collect();
        assert_eq!(checked, vec![2]);
    }

    #[test]
    fn reload_resets_ui_state_and_load_id() {
        let mut reg = Registry::default();
        let first = reg.load(parsed(&["An", "Binh"]), None, Utc::now()).load_id;
        reg.toggle_check(StudentId(1)).expect("toggle");
        reg.select(StudentId(2)).expect("select");
        reg.ui.search_term = "bi".into();

        let second = reg.load(parsed(&["Chi"]), None, Utc::now()).load_id;
        assert_ne!(first, second);
        assert!(reg.ui.checked.is_empty());
        assert!(reg.ui.selected.is_none());
        assert!(!reg.ui.preview_open);
        assert!(reg.ui.search_term.is_empty());
        assert_eq!(
            reg.ensure_load(Some(&first.to_string())).map(|_| ()),
            Err(RegistryError::StaleSheet)
        );
    }

    #[test]
    fn checked_students_ignore_search() {
        let mut reg = Registry::default();
        reg.load(parsed(&["An", "Binh", "Chi"]), None, Utc::now());
        reg.set_checked(&[StudentId(1), StudentId(3)], true).expect("check");
        reg.ui.search_term = "binh".into();
        assert_eq!(reg.visible().len(), 1);
        assert_eq!(reg.checked_students().len(), 2);
    }

    #[test]
    fn set_checked_rejects_unknown_ids_without_partial_update() {
        let mut reg = Registry::default();
        reg.load(parsed(&["An"]), None, Utc::now());
        assert_eq!(
            reg.set_checked(&[StudentId(1), StudentId(9)], true),
            Err(RegistryError::UnknownStudent(9))
        );
        assert!(reg.ui.checked.is_empty());
    }

    #[test]
    fn copied_indicator_expires() {
        let mut reg = Registry::default();
        reg.load(parsed(&["An"]), None, Utc::now());
        let now = Instant::now();
        reg.mark_copied(StudentId(1), now + Duration::from_millis(1400));
        assert!(reg.is_copied(StudentId(1), now));
        assert!(!reg.is_copied(StudentId(1), now + Duration::from_millis(1400)));
        reg.prune_copied(now + Duration::from_secs(2));
        assert!(reg.ui.copied.is_empty());
    }

    #[test]
    fn no_sheet_is_reported() {
        let reg = Registry::default();
        assert_eq!(reg.find(StudentId(1)).map(|_| ()), Err(RegistryError::NoSheet));
        assert!(reg.students().is_empty());
    }
}
