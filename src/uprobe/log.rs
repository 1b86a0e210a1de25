//! Log Probe
//!
//! Renders structured `LOG` events through `tracing`, so the application
//! picks the sink and formatting through its subscriber. Events below the
//! configured severity are swallowed; everything else passes through.

use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::upipe::Upipe;
use crate::uprobe::{Event, LogLevel, ProbeOps, Uprobe};

/// Probe rendering log events.
pub struct UprobeLog {
    min_level: LogLevel,
    next: Uprobe,
}

impl UprobeLog {
    /// Wraps `next`, rendering log events at or above `min_level`.
    pub fn new(min_level: LogLevel, next: Uprobe) -> Uprobe {
        Uprobe::new(Self { min_level, next })
    }
}

impl ProbeOps for UprobeLog {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        let Event::Log(log) = event else {
            return self.next.throw(pipe, event);
        };
        if log.level < self.min_level {
            return Ok(());
        }
        let tags = if log.tags.is_empty() {
            String::new()
        } else {
            log.tags
                .iter()
                .map(|t| format!("[{t}] "))
                .collect::<String>()
        };
        match log.level {
            LogLevel::Verbose => trace!("{tags}{}", log.msg),
            LogLevel::Debug => debug!("{tags}{}", log.msg),
            LogLevel::Info | LogLevel::Notice => info!("{tags}{}", log.msg),
            LogLevel::Warning => warn!("{tags}{}", log.msg),
            LogLevel::Error => error!("{tags}{}", log.msg),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::uprobe::LogEvent;

    #[test]
    fn test_log_consumed() {
        let probe = UprobeLog::new(LogLevel::Debug, Uprobe::null());
        let mut log = LogEvent {
            level: LogLevel::Warning,
            tags: vec!["src".into()],
            msg: "short read".into(),
        };
        assert!(probe.throw(None, &mut Event::Log(&mut log)).is_ok());
    }

    #[test]
    fn test_below_threshold_swallowed() {
        let probe = UprobeLog::new(LogLevel::Error, Uprobe::null());
        let mut log = LogEvent {
            level: LogLevel::Debug,
            tags: Vec::new(),
            msg: "noise".into(),
        };
        assert!(probe.throw(None, &mut Event::Log(&mut log)).is_ok());
    }

    #[test]
    fn test_other_events_pass_through() {
        let probe = UprobeLog::new(LogLevel::Debug, Uprobe::null());
        assert_eq!(probe.throw(None, &mut Event::SourceEnd), Err(Error::Unhandled));
    }
}
