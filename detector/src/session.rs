use std::fmt;

/// Lifecycle of the capture session owned by a detector.
///
/// ```text
/// Closed -> Opening -> Configuring -> Active
///              |            |
///              +--> Failed <+
/// Active | Failed | Opening | Configuring -> Closed   (shut down)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opening,
    Configuring,
    Active,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    OpenRequested,
    Opened,
    Configured,
    Error,
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition: {event:?} while {from}")]
pub struct IllegalTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    pub fn next(self, event: SessionEvent) -> Result<SessionState, IllegalTransition> {
        use SessionEvent::*;
        use SessionState::*;
        match (self, event) {
            (Closed, OpenRequested) => Ok(Opening),
            (Opening, Opened) => Ok(Configuring),
            (Configuring, Configured) => Ok(Active),
            (Opening | Configuring, Error) => Ok(Failed),
            (_, ShutDown) => Ok(Closed),
            (from, event) => Err(IllegalTransition { from, event }),
        }
    }

    pub fn is_active(self) -> bool {
        self == SessionState::Active
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Configuring => "configuring",
            SessionState::Active => "active",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent::*;
    use SessionState::*;

    #[test]
    fn happy_path() {
        let state = Closed.next(OpenRequested).unwrap();
        let state = state.next(Opened).unwrap();
        let state = state.next(Configured).unwrap();
        assert!(state.is_active());
        assert_eq!(state.next(ShutDown).unwrap(), Closed);
    }

    #[test]
    fn errors_fail_while_establishing() {
        assert_eq!(Opening.next(Error).unwrap(), Failed);
        assert_eq!(Configuring.next(Error).unwrap(), Failed);
        assert_eq!(Failed.next(ShutDown).unwrap(), Closed);
    }

    #[test]
    fn reopening_requires_a_shutdown_first() {
        assert!(Failed.next(OpenRequested).is_err());
        assert!(Active.next(OpenRequested).is_err());
        assert!(Active.next(Error).is_err());
        assert!(Closed.next(Configured).is_err());
    }

    #[test]
    fn shutdown_from_closed_stays_closed() {
        assert_eq!(Closed.next(ShutDown).unwrap(), Closed);
    }
}
