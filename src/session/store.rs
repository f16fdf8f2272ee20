//! Session state store
//!
//! Owns the roster of recognized students for the current subject. Entries are
//! keyed by student id; the first recognition wins and is never overwritten.
//! The epoch counter advances on every clear, restart and reset so results of
//! cycles launched before that point can be recognised and dropped.

use crate::error::CaptureError;
use crate::recognition::{RecognitionResponse, Subject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A student on the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedStudent {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    /// Time of first recognition in this session
    pub recognized_at: DateTime<Utc>,
}

/// Owned copy of the session for display, export and commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub subject: Option<Subject>,
    pub is_running: bool,
    pub epoch: u64,
    pub roster: Vec<RecognizedStudent>,
}

impl SessionSnapshot {
    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }
}

/// Roster, subject and run flag for one attendance session
#[derive(Debug, Default)]
pub struct SessionStore {
    subject: Option<Subject>,
    is_running: bool,
    roster: Vec<RecognizedStudent>,
    index: HashSet<String>,
    epoch: u64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn roster(&self) -> &[RecognizedStudent] {
        &self.roster
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Insert every student not already on the roster
    ///
    /// Returns the number of genuinely new entries.
    pub fn merge(&mut self, result: &RecognitionResponse, at: DateTime<Utc>) -> usize {
        let mut added = 0;
        for student in &result.students {
            if !self.index.insert(student.id.clone()) {
                continue;
            }
            self.roster.push(RecognizedStudent {
                id: student.id.clone(),
                name: student.name.clone(),
                roll_number: student.roll_number.clone(),
                recognized_at: at,
            });
            added += 1;
        }
        if added > 0 {
            tracing::debug!("Roster grew by {} to {}", added, self.roster.len());
        }
        added
    }

    /// Merge a result tagged with the epoch its cycle was launched in
    pub fn merge_for_epoch(
        &mut self,
        epoch: u64,
        result: &RecognitionResponse,
        at: DateTime<Utc>,
    ) -> Result<usize, CaptureError> {
        if epoch != self.epoch {
            return Err(CaptureError::StaleResult {
                launched: epoch,
                current: self.epoch,
            });
        }
        Ok(self.merge(result, at))
    }

    /// Empty the roster; the run flag and subject are kept
    pub fn clear(&mut self) {
        self.roster.clear();
        self.index.clear();
        self.advance_epoch();
    }

    /// Set the run flag; starting requires a subject
    pub fn set_running(&mut self, running: bool) -> Result<(), CaptureError> {
        if running && self.subject.is_none() {
            return Err(CaptureError::MissingSubject);
        }
        self.is_running = running;
        Ok(())
    }

    /// Start a run, superseding any cycles launched before it
    ///
    /// Returns the epoch of the new run.
    pub fn begin_run(&mut self) -> Result<u64, CaptureError> {
        self.set_running(true)?;
        Ok(self.advance_epoch())
    }

    /// Choose the subject; refused while a run is active
    ///
    /// Switching to a different subject starts a new session: the roster is
    /// emptied and cycles launched for the previous subject become stale.
    pub fn select_subject(&mut self, subject: Subject) -> Result<(), CaptureError> {
        if self.is_running {
            return Err(CaptureError::SubjectLocked);
        }
        let switched = self.subject.as_ref().is_some_and(|s| s.id != subject.id);
        self.subject = Some(subject);
        if switched {
            self.roster.clear();
            self.index.clear();
            self.advance_epoch();
        }
        Ok(())
    }

    /// Back to the state of a freshly created session
    pub fn reset(&mut self) {
        self.subject = None;
        self.is_running = false;
        self.roster.clear();
        self.index.clear();
        self.advance_epoch();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            subject: self.subject.clone(),
            is_running: self.is_running,
            epoch: self.epoch,
            roster: self.roster.clone(),
        }
    }

    fn advance_epoch(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::MatchedStudent;

    fn subject() -> Subject {
        Subject {
            id: "1".to_string(),
            name: "Physics".to_string(),
            code: "PHY1".to_string(),
            faculty: None,
            description: None,
        }
    }

    fn response(ids: &[&str]) -> RecognitionResponse {
        RecognitionResponse {
            recognized_count: ids.len(),
            students: ids
                .iter()
                .map(|id| MatchedStudent {
                    id: id.to_string(),
                    name: format!("Student {}", id),
                    roll_number: format!("R{}", id),
                })
                .collect(),
        }
    }

    #[test]
    fn test_new_store_is_empty_and_idle() {
        let store = SessionStore::new();
        assert!(store.is_empty());
        assert!(!store.is_running());
        assert!(store.subject().is_none());
        assert_eq!(store.epoch(), 0);
    }

    #[test]
    fn test_merge_deduplicates_by_id() {
        let mut store = SessionStore::new();
        let t0 = Utc::now();
        assert_eq!(store.merge(&response(&["1", "2"]), t0), 2);
        assert_eq!(store.merge(&response(&["2", "3"]), t0), 1);
        assert_eq!(store.len(), 3);

        let ids: Vec<&str> = store.roster().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_duplicate_within_one_response() {
        let mut store = SessionStore::new();
        assert_eq!(store.merge(&response(&["4", "4"]), Utc::now()), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_first_recognition_wins() {
        let mut store = SessionStore::new();
        let first = Utc::now();
        let later = first + chrono::Duration::seconds(30);
        store.merge(&response(&["9"]), first);

        let mut renamed = response(&["9"]);
        renamed.students[0].name = "Someone Else".to_string();
        assert_eq!(store.merge(&renamed, later), 0);

        let entry = &store.roster()[0];
        assert_eq!(entry.recognized_at, first);
        assert_eq!(entry.name, "Student 9");
    }

    #[test]
    fn test_roster_never_shrinks_between_clears() {
        let mut store = SessionStore::new();
        let mut last = 0;
        let batches: [&[&str]; 5] = [&["1"], &["1", "2"], &[], &["2"], &["3", "1"]];
        for ids in batches {
            store.merge(&response(ids), Utc::now());
            assert!(store.len() >= last);
            last = store.len();
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_clear_keeps_running_flag_and_advances_epoch() {
        let mut store = SessionStore::new();
        store.select_subject(subject()).unwrap();
        store.set_running(true).unwrap();
        store.merge(&response(&["1"]), Utc::now());
        let before = store.epoch();

        store.clear();
        assert!(store.is_empty());
        assert!(store.is_running());
        assert!(!store.contains("1"));
        assert_eq!(store.epoch(), before + 1);
    }

    #[test]
    fn test_stale_epoch_is_rejected() {
        let mut store = SessionStore::new();
        let launched = store.epoch();
        store.clear();

        let err = store
            .merge_for_epoch(launched, &response(&["1"]), Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            CaptureError::StaleResult {
                launched,
                current: launched + 1
            }
        );
        assert!(store.is_empty());

        let current = store.epoch();
        assert_eq!(
            store
                .merge_for_epoch(current, &response(&["1"]), Utc::now())
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_running_requires_subject() {
        let mut store = SessionStore::new();
        assert_eq!(store.set_running(true), Err(CaptureError::MissingSubject));
        assert_eq!(store.begin_run(), Err(CaptureError::MissingSubject));
        // Stopping never needs a subject
        assert!(store.set_running(false).is_ok());
    }

    #[test]
    fn test_begin_run_advances_epoch() {
        let mut store = SessionStore::new();
        store.select_subject(subject()).unwrap();
        let before = store.epoch();
        let epoch = store.begin_run().unwrap();
        assert_eq!(epoch, before + 1);
        assert!(store.is_running());
    }

    #[test]
    fn test_subject_locked_while_running() {
        let mut store = SessionStore::new();
        store.select_subject(subject()).unwrap();
        store.set_running(true).unwrap();
        assert_eq!(
            store.select_subject(subject()),
            Err(CaptureError::SubjectLocked)
        );
        store.set_running(false).unwrap();
        assert!(store.select_subject(subject()).is_ok());
    }

    #[test]
    fn test_switching_subject_starts_fresh_roster() {
        let mut store = SessionStore::new();
        store.select_subject(subject()).unwrap();
        store.merge(&response(&["1", "2"]), Utc::now());
        let before = store.epoch();

        // Same subject again keeps the roster
        store.select_subject(subject()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.epoch(), before);

        let other = Subject {
            id: "2".to_string(),
            name: "Chemistry".to_string(),
            code: "CHE1".to_string(),
            faculty: None,
            description: None,
        };
        store.select_subject(other).unwrap();
        assert!(store.is_empty());
        assert!(!store.contains("1"));
        assert_eq!(store.subject().map(|s| s.code.as_str()), Some("CHE1"));
        assert_eq!(
            store.merge_for_epoch(before, &response(&["3"]), Utc::now()),
            Err(CaptureError::StaleResult {
                launched: before,
                current: before + 1
            })
        );
    }

    #[test]
    fn test_reset() {
        let mut store = SessionStore::new();
        store.select_subject(subject()).unwrap();
        store.begin_run().unwrap();
        store.merge(&response(&["1"]), Utc::now());
        let before = store.epoch();

        store.reset();
        assert!(store.is_empty());
        assert!(!store.is_running());
        assert!(store.subject().is_none());
        assert!(store.epoch() > before);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut store = SessionStore::new();
        store.select_subject(subject()).unwrap();
        store.merge(&response(&["1"]), Utc::now());

        let snapshot = store.snapshot();
        store.clear();
        assert_eq!(snapshot.roster_len(), 1);
        assert_eq!(snapshot.subject.unwrap().code, "PHY1");
    }
}
