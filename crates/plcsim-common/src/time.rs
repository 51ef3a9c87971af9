//! ---
//! plcsim_section: "01-core-functionality"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Clock helpers shared by simulators and schedulers."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

/// Milliseconds elapsed since `origin`, saturating at `u64::MAX`.
pub fn elapsed_millis(origin: Instant) -> u64 {
    duration_to_millis(origin.elapsed())
}

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
