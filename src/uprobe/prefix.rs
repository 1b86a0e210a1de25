//! Prefix Probe
//!
//! Prepends a tag to every log event on its way up, so nested pipelines
//! render as `[demux] [sync] message`.

use crate::error::Result;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};

/// Probe tagging log events.
pub struct UprobePrefix {
    tag: String,
    next: Uprobe,
}

impl UprobePrefix {
    /// Wraps `next`, tagging log events with `tag`.
    pub fn new(tag: impl Into<String>, next: Uprobe) -> Uprobe {
        Uprobe::new(Self {
            tag: tag.into(),
            next,
        })
    }
}

impl ProbeOps for UprobePrefix {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        if let Event::Log(log) = event {
            log.tags.insert(0, self.tag.clone());
        }
        self.next.throw(pipe, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uprobe::{LogEvent, LogLevel};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Capture {
        tags: Arc<Mutex<Vec<String>>>,
    }

    impl ProbeOps for Capture {
        fn throw(&self, _pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
            if let Event::Log(log) = event {
                *self.tags.lock() = log.tags.clone();
            }
            Ok(())
        }
    }

    #[test]
    fn test_tags_outermost_first() {
        let tags = Arc::new(Mutex::new(Vec::new()));
        let capture = Uprobe::new(Capture { tags: tags.clone() });
        // The application wraps its probe with "demux"; the sub-pipe wraps
        // that with "sync". The pipe throws into the "sync" end.
        let chain = UprobePrefix::new("demux", capture);
        let chain = UprobePrefix::new("sync", chain);

        let mut log = LogEvent {
            level: LogLevel::Debug,
            tags: Vec::new(),
            msg: "locked".into(),
        };
        chain.throw(None, &mut Event::Log(&mut log)).unwrap();
        assert_eq!(&*tags.lock(), &["demux".to_owned(), "sync".to_owned()]);
    }
}
