//! Log channel.
//!
//! The kernel reports drops, allocation failures and lifecycle changes
//! through a [`LogSink`]. Sinks are fire-and-forget: they never block and
//! silently discard what they cannot deliver.

use core::fmt;

/// Severity of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Kernel message identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMsg {
    /// Event dropped because the target queue was full (value: priority)
    QueueOverflow,
    /// Event refused because its reference count is exhausted (value: priority)
    RefOverflow,
    /// Memory class exhausted (value: requested bytes)
    OutOfMemory,
    /// Post to a priority with no registered agent (value: priority)
    NoAgent,
    /// Agent registered and seeded (value: priority)
    AgentStarted,
    /// Agent drained and unregistered (value: priority)
    AgentStopped,
    /// Event re-queued by a deferring state (value: signal)
    EventDeferred,
    /// Scheduler locked (value: ceiling)
    SchedLocked,
    /// Scheduler unlocked (value: restored ceiling)
    SchedUnlocked,
}

impl fmt::Display for LogMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogMsg::QueueOverflow => "queue overflow, event dropped",
            LogMsg::RefOverflow => "event reference count exhausted",
            LogMsg::OutOfMemory => "out of memory",
            LogMsg::NoAgent => "no agent at priority",
            LogMsg::AgentStarted => "agent started",
            LogMsg::AgentStopped => "agent stopped",
            LogMsg::EventDeferred => "event deferred",
            LogMsg::SchedLocked => "scheduler locked",
            LogMsg::SchedUnlocked => "scheduler unlocked",
        };
        f.write_str(text)
    }
}

/// Destination of kernel log messages
pub trait LogSink {
    fn log_msg(&self, level: LogLevel, msg: LogMsg, value: u32);
}

/// Sink forwarding to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl LogSink for LogFacade {
    fn log_msg(&self, level: LogLevel, msg: LogMsg, value: u32) {
        match level {
            LogLevel::Error => log::error!("{msg} ({value})"),
            LogLevel::Warn => log::warn!("{msg} ({value})"),
            LogLevel::Info => log::info!("{msg} ({value})"),
            LogLevel::Debug => log::debug!("{msg} ({value})"),
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log_msg(&self, _level: LogLevel, _msg: LogMsg, _value: u32) {}
}
