use std::fmt;

/// Processor lifecycle: `Created → Running → Stopping → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessorState::Created => "created",
            ProcessorState::Running => "running",
            ProcessorState::Stopping => "stopping",
            ProcessorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
