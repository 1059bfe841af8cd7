// Position management and order execution
pub mod entry;
pub mod exit_engine;
pub mod force_close;
pub mod halt_monitor;
pub mod live_loop;
pub mod position_tracker;

pub use entry::{calc_shares, place_entries, plan_entry, EntryParams, EntryReport};
pub use exit_engine::{update_trailing_stop, ExitEngine, StopSync};
pub use force_close::{force_close_all, CloseReport};
pub use halt_monitor::{HaltMonitor, HaltRecord, HaltTransitions};
pub use live_loop::{IterationOutcome, LiveLoop, LiveLoopConfig, LiveSessionState};
pub use position_tracker::{Position, PositionTracker};
