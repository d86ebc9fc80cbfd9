use serde::{Deserialize, Serialize};

/// Task lifecycle. Ordinals are ordered so `>=` reads as "has progressed
/// past"; every terminal status compares `>= Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaskStatus {
    #[default]
    NotStarted = 0,
    /// Entered through one incoming link while others are still pending.
    Entered = 5,
    Scheduled = 10,
    InProgress = 20,
    /// The activity returned without finishing.
    Waiting = 30,
    Done = 40,
    Skipped = 50,
    Failed = 100,
    Canceled = 110,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        self >= TaskStatus::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LinkStatus {
    #[default]
    Pending = 0,
    False = 1,
    True = 2,
    Skipped = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlowStatus {
    #[default]
    NotStarted,
    Active,
    Completed,
    Failed,
    Cancelled,
}
