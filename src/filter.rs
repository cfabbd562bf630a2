use crate::sheet::StudentRecord;

/// True when the student matches a free-text query on name, class or sequence number.
/// Matching is case-insensitive containment; a blank query matches everyone.
pub fn matches(student: &StudentRecord, term: &str) -> bool {
    if term.trim().is_empty() {
        return true;
    }
    let needle = term.to_lowercase();
    student.name.to_lowercase().contains(&needle)
        || student.class_name.to_lowercase().contains(&needle)
        || student.sequence_number.to_string().contains(&needle)
}

/// Visible subset in registry order.
pub fn filter_students<'a>(students: &'a [StudentRecord], term: &str) -> Vec<&'a StudentRecord> {
    students.iter().filter(|s| matches(s, term)).collect()
}
