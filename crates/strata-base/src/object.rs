use crate::error::{Result, Status};

/// Coarse lifecycle of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Open,
    Failed,
    Closed,
}

/// Open/closed/failed tri-state shared by every Reader and Writer.
///
/// Failure is sticky: the first recorded [`Status`] wins and is kept until
/// the stream is reset, even across `close()`. Closing is terminal and is
/// distinct from failing: a closed stream that never failed reports a
/// precondition violation from [`ObjectState::check`], not a backend error.
#[derive(Clone, Debug)]
pub struct ObjectState {
    open: bool,
    failure: Option<Box<Status>>,
}

impl ObjectState {
    /// A freshly bound, healthy stream.
    pub const fn open() -> Self {
        Self {
            open: true,
            failure: None,
        }
    }

    /// An inert stream which is not bound to anything.
    pub const fn closed() -> Self {
        Self {
            open: false,
            failure: None,
        }
    }

    pub fn state(&self) -> State {
        match (self.open, &self.failure) {
            (_, Some(_)) => State::Failed,
            (true, None) => State::Open,
            (false, None) => State::Closed,
        }
    }

    /// `true` if open and not failed.
    pub fn ok(&self) -> bool {
        self.open && self.failure.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The recorded failure, if any.
    pub fn status(&self) -> Option<&Status> {
        self.failure.as_deref()
    }

    /// `Ok(())` if operations may proceed; otherwise the status to return.
    pub fn check(&self) -> Result<()> {
        match &self.failure {
            Some(status) => Err(Status::clone(status)),
            None if !self.open => Err(Status::closed()),
            None => Ok(()),
        }
    }

    /// Records `status` unless a failure is already recorded, and returns
    /// the status now in effect.
    pub fn fail(&mut self, status: Status) -> Status {
        match &self.failure {
            Some(first) => Status::clone(first),
            None => {
                self.failure = Some(Box::new(status.clone()));
                status
            }
        }
    }

    /// Marks the stream closed, keeping any recorded failure.
    pub fn mark_closed(&mut self) {
        self.open = false;
    }

    /// Restores the freshly constructed state, open or closed.
    pub fn reset(&mut self, open: bool) {
        self.open = open;
        self.failure = None;
    }
}

impl Default for ObjectState {
    fn default() -> Self {
        Self::closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn first_failure_wins() {
        let mut state = ObjectState::open();
        let first = state.fail(Status::backend("first"));
        let second = state.fail(Status::overflow("second"));
        assert_eq!(first, second);
        assert_eq!(state.status().map(Status::kind), Some(ErrorKind::Backend));
        assert_eq!(state.state(), State::Failed);
    }

    #[test]
    fn closed_is_precondition_violation() {
        let mut state = ObjectState::open();
        assert!(state.check().is_ok());
        state.mark_closed();
        assert!(!state.ok());
        assert_eq!(state.state(), State::Closed);
        let err = state.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[test]
    fn failure_survives_close_and_clears_on_reset() {
        let mut state = ObjectState::open();
        state.fail(Status::data_loss("gone"));
        state.mark_closed();
        assert_eq!(state.check().unwrap_err().kind(), ErrorKind::DataLoss);
        state.reset(true);
        assert!(state.ok());
        assert!(state.status().is_none());
    }
}
