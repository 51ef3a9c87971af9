//! ---
//! plcsim_section: "03-logging"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Structured logging context and lifecycle events."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers shared by the simulation pipeline.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Site the equipment belongs to.
    pub site: Option<&'a str>,
    /// Production line identifier.
    pub line: Option<&'a str>,
    /// Equipment identifier.
    pub equipment: Option<&'a str>,
    /// Update or heartbeat tick counter.
    pub tick: Option<u64>,
    /// Active equipment state.
    pub state: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a site name.
    pub fn with_site(mut self, site: &'a str) -> Self {
        self.site = Some(site);
        self
    }

    /// Attach a line identifier.
    pub fn with_line(mut self, line: &'a str) -> Self {
        self.line = Some(line);
        self
    }

    /// Attach an equipment identifier.
    pub fn with_equipment(mut self, equipment: &'a str) -> Self {
        self.equipment = Some(equipment);
        self
    }

    /// Attach a tick value.
    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = Some(tick);
        self
    }

    /// Attach the active state name.
    pub fn with_state(mut self, state: &'a str) -> Self {
        self.state = Some(state);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed but needs operator attention.
    Degraded,
    /// The operation failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    /// Stable label written into the `outcome` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Degraded => "degraded",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (start, stop, reload, publisher give-up).
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    let label = outcome.as_str();
    match outcome {
        SystemEventOutcome::Success => crate::__plc_event!(
            tracing::Level::INFO,
            ctx,
            { event = event, outcome = label },
            "{}",
            message
        ),
        SystemEventOutcome::Degraded => crate::__plc_event!(
            tracing::Level::WARN,
            ctx,
            { event = event, outcome = label },
            "{}",
            message
        ),
        SystemEventOutcome::Fault => crate::__plc_event!(
            tracing::Level::ERROR,
            ctx,
            { event = event, outcome = label },
            "{}",
            message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_site("north")
            .with_line("line-1")
            .with_equipment("oven1")
            .with_state("running");
        plc_info!(context = ctx.clone(), "equipment online");
        plc_debug!("debug message");
        plc_warn!(context = ctx.clone().with_tick(3), "slow tick: {}ms", 1200);
        plc_error!(context = ctx, "error code: {}", 42);
    }

    #[test]
    fn system_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_equipment("press3");
        log_system_event(
            Some(&ctx),
            "reload.applied",
            "configuration reloaded",
            SystemEventOutcome::Success,
        );
        log_system_event(
            None,
            "publisher.gave_up",
            "broker unreachable",
            SystemEventOutcome::Fault,
        );
        assert_eq!(SystemEventOutcome::Degraded.as_str(), "degraded");
    }
}
