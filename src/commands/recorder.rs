//! Per-frame recording state machine.

use crate::backend::{GpuDevice, SubmissionIndex};
use crate::error::{RendererError, RendererResult};

use super::CommandList;

/// Where the recorder is in its frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Nothing recorded yet.
    Idle,
    /// A list is open and accepting commands.
    Recording,
    /// The list was handed to the queue. The next `begin` resets it.
    Submitted,
}

/// Owns the command list reused for every frame.
///
/// `Idle -> Recording -> Submitted -> Recording -> ...`. Beginning while a
/// list is still open, or submitting without one, is an invariant violation.
#[derive(Debug)]
pub struct FrameRecorder {
    state: RecorderState,
    list: CommandList,
    last_submission: Option<SubmissionIndex>,
}

impl Default for FrameRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            list: CommandList::default(),
            last_submission: None,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn last_submission(&self) -> Option<SubmissionIndex> {
        self.last_submission
    }

    /// Reset the list and open it for recording.
    pub fn begin(&mut self, label: &str) -> RendererResult<&mut CommandList> {
        if self.state == RecorderState::Recording {
            return Err(RendererError::invariant(format!(
                "begin('{}') while '{}' is still recording",
                label,
                self.list.label()
            )));
        }
        self.list.reset(label);
        self.state = RecorderState::Recording;
        Ok(&mut self.list)
    }

    /// The open list.
    pub fn list_mut(&mut self) -> RendererResult<&mut CommandList> {
        if self.state != RecorderState::Recording {
            return Err(RendererError::invariant(format!(
                "no open command list (recorder is {:?})",
                self.state
            )));
        }
        Ok(&mut self.list)
    }

    /// Drop an open list after a recording error, returning to `Idle`.
    ///
    /// Nothing recorded is submitted. A no-op unless recording.
    pub fn abandon(&mut self) {
        if self.state == RecorderState::Recording {
            log::debug!(
                "Abandoning '{}' with {} recorded commands",
                self.list.label(),
                self.list.len()
            );
            self.list.reset("");
            self.state = RecorderState::Idle;
        }
    }

    /// Close the open list and submit it to the device queue.
    pub fn submit(&mut self, device: &dyn GpuDevice) -> RendererResult<SubmissionIndex> {
        if self.state != RecorderState::Recording {
            return Err(RendererError::invariant(format!(
                "submit while recorder is {:?}",
                self.state
            )));
        }
        let index = device.submit(&self.list)?;
        log::trace!(
            "Submitted '{}' ({} commands) as {:?}",
            self.list.label(),
            self.list.len(),
            index
        );
        self.state = RecorderState::Submitted;
        self.last_submission = Some(index);
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_recorder_cycle() {
        let device = DummyDevice::new();
        let mut recorder = FrameRecorder::new();
        assert_eq!(recorder.state(), RecorderState::Idle);

        recorder.begin("frame 0").unwrap();
        assert_eq!(recorder.state(), RecorderState::Recording);
        let first = recorder.submit(&device).unwrap();
        assert_eq!(recorder.state(), RecorderState::Submitted);

        let list = recorder.begin("frame 1").unwrap();
        assert!(list.is_empty());
        let second = recorder.submit(&device).unwrap();
        assert!(second > first);
        assert_eq!(recorder.last_submission(), Some(second));
    }

    #[test]
    fn test_begin_while_recording_fails() {
        let mut recorder = FrameRecorder::new();
        recorder.begin("frame 0").unwrap();
        assert!(matches!(
            recorder.begin("frame 1"),
            Err(RendererError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_submit_without_begin_fails() {
        let device = DummyDevice::new();
        let mut recorder = FrameRecorder::new();
        assert!(matches!(
            recorder.submit(&device),
            Err(RendererError::InvariantViolation(_))
        ));
        assert!(recorder.list_mut().is_err());
        assert!(device.submissions().is_empty());
    }

    #[test]
    fn test_abandon_discards_open_list() {
        let device = DummyDevice::new();
        let mut recorder = FrameRecorder::new();
        recorder.begin("frame 0").unwrap();
        recorder.abandon();
        assert_eq!(recorder.state(), RecorderState::Idle);
        assert!(recorder.submit(&device).is_err());

        let list = recorder.begin("frame 1").unwrap();
        assert!(list.is_empty());
        recorder.submit(&device).unwrap();
        assert_eq!(device.submissions().len(), 1);
    }
}
