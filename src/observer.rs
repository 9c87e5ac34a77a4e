//! Frame observation hook for diagnostic displays

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Sent,
    Received,
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Sent => write!(f, "send"),
            FrameDirection::Received => write!(f, "recv"),
        }
    }
}

/// Receives a copy of every frame a session sends or accepts.
///
/// Observers are injected per session. Use [`to_hex`](crate::to_hex) to
/// render the bytes.
pub trait FrameObserver {
    fn on_frame(&mut self, direction: FrameDirection, bytes: &[u8]);
}

impl<F> FrameObserver for F
where
    F: FnMut(FrameDirection, &[u8]),
{
    fn on_frame(&mut self, direction: FrameDirection, bytes: &[u8]) {
        self(direction, bytes)
    }
}
