//! ---
//! plcsim_section: "03-logging"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Context-enriched logging macros."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
//! Context-enriched logging macros.

/// Shared expansion behind the `plc_*!` macros. Not part of the public API.
#[doc(hidden)]
#[macro_export]
macro_rules! __plc_event {
    ($level:expr, $ctx:expr, { $($field:ident = $value:expr),* }, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            site = ctx.site.unwrap_or(""),
            line = ctx.line.unwrap_or(""),
            equipment_id = ctx.equipment.unwrap_or(""),
            tick = ctx.tick.unwrap_or_default(),
            state = ctx.state.unwrap_or(""),
            $($field = $value,)*
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with equipment context.
#[macro_export]
macro_rules! plc_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::INFO, $ctx, {}, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::INFO, $crate::LogContext::default(), {}, $($arg)+)
    };
}

/// Emit a debug log enriched with equipment context.
#[macro_export]
macro_rules! plc_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::DEBUG, $ctx, {}, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::DEBUG, $crate::LogContext::default(), {}, $($arg)+)
    };
}

/// Emit a warning enriched with equipment context.
#[macro_export]
macro_rules! plc_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::WARN, $ctx, {}, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::WARN, $crate::LogContext::default(), {}, $($arg)+)
    };
}

/// Emit an error log enriched with equipment context.
#[macro_export]
macro_rules! plc_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::ERROR, $ctx, {}, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__plc_event!(tracing::Level::ERROR, $crate::LogContext::default(), {}, $($arg)+)
    };
}
