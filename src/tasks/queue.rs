use std::path::{Path, PathBuf};
use tracing::info;
use vmin_common::TaskDescriptor;

use super::parser::{TaskDefaults, TaskSheet};
use crate::errors::VminResult;

/// Ordered view over the task source with a persistent cursor.
///
/// The source is re-read every time a new task is needed so edits made
/// between tasks are picked up. A missing source is only an error at that
/// moment, never mid-task.
pub struct TaskQueue {
    source: PathBuf,
    index: usize,
    defaults: TaskDefaults,
}

impl TaskQueue {
    pub fn new(source: PathBuf, index: usize, defaults: TaskDefaults) -> Self {
        Self {
            source,
            index,
            defaults,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Task at the cursor, skipping disabled rows, or `None` once exhausted.
    pub fn current(&mut self) -> VminResult<Option<TaskDescriptor>> {
        let sheet = TaskSheet::load(&self.source)?;
        info!(source = %self.source.display(), "Loading task source");

        loop {
            if self.index >= sheet.len() {
                return Ok(None);
            }
            if sheet.is_disabled(self.index) {
                info!(
                    row = self.index,
                    id = sheet.row_id(self.index).unwrap_or(""),
                    "Skipping disabled row"
                );
                self.index += 1;
                continue;
            }
            let task = sheet.task(self.index, &self.defaults)?;
            info!(row = self.index, id = %task.id, "Loaded task");
            return Ok(Some(task));
        }
    }

    pub fn advance(&mut self) {
        self.index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::VminError;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str =
        "id,starting_voltage,phase1_duration,phase2_duration,voltage_rail_name,voltage_module\n";

    fn write_sheet(dir: &Path, rows: &[&str]) -> PathBuf {
        let path = dir.join("vmin_tasks.csv");
        let mut content = HEADER.to_string();
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_disabled_rows_are_skipped_in_order() {
        let dir = tempdir().unwrap();
        let path = write_sheet(
            dir.path(),
            &["#1,1.0,1,1,VDD,sim", "2,1.0,1,1,VDD,sim", "3,1.0,1,1,VDD,sim"],
        );
        let mut queue = TaskQueue::new(path, 0, TaskDefaults::default());

        let mut processed = Vec::new();
        while let Some(task) = queue.current().unwrap() {
            processed.push(task.id);
            queue.advance();
        }

        assert_eq!(processed, vec!["2", "3"]);
        assert_eq!(queue.index(), 3);
    }

    #[test]
    fn test_resume_from_persisted_index() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), &["1,1.0,1,1,VDD,sim", "2,0.9,1,1,VDD,sim"]);
        let mut queue = TaskQueue::new(path, 1, TaskDefaults::default());
        let task = queue.current().unwrap().unwrap();
        assert_eq!(task.id, "2");
        assert_eq!(task.starting_voltage, 0.9);
    }

    #[test]
    fn test_exhausted_queue_returns_none() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), &["#1,1.0,1,1,VDD,sim"]);
        let mut queue = TaskQueue::new(path, 0, TaskDefaults::default());
        assert!(queue.current().unwrap().is_none());
        assert_eq!(queue.index(), 1);
    }

    #[test]
    fn test_missing_source_is_reported_when_task_needed() {
        let dir = tempdir().unwrap();
        let mut queue = TaskQueue::new(
            dir.path().join("missing.csv"),
            0,
            TaskDefaults::default(),
        );
        let err = queue.current().unwrap_err();
        assert!(matches!(err, VminError::TaskSourceMissing { .. }));
    }

    #[test]
    fn test_current_does_not_advance_on_enabled_row() {
        let dir = tempdir().unwrap();
        let path = write_sheet(dir.path(), &["1,1.0,1,1,VDD,sim"]);
        let mut queue = TaskQueue::new(path, 0, TaskDefaults::default());
        assert_eq!(queue.current().unwrap().unwrap().id, "1");
        assert_eq!(queue.current().unwrap().unwrap().id, "1");
        assert_eq!(queue.index(), 0);
    }
}
