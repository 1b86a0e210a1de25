//! Flow Selection Probe
//!
//! Listens to `NEW-FLOW-DEF` from the sub-pipes of a split (a demuxer's
//! elementary streams, typically), pattern-matches the flow definition
//! against a selection specification, and wires an output to each selected
//! sub-pipe.
//!
//! Selections: `"all"` matches every flow of the category, `"auto"` the
//! first one seen, and a comma-separated list matches `flow.id` values or
//! `flow.name`s.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::upipe::Upipe;
use crate::uprobe::{Event, ProbeOps, Uprobe};
use crate::uref::Uref;

type SelectFn = dyn Fn(&Upipe, &Uref) -> Option<Upipe> + Send + Sync;

/// Probe attaching outputs to selected sub-flows.
pub struct UprobeSelflow {
    prefix: String,
    selection: String,
    auto_taken: Mutex<bool>,
    on_select: Arc<SelectFn>,
    next: Uprobe,
}

impl UprobeSelflow {
    /// Wraps `next`, selecting flows whose definition starts with `prefix`
    /// according to `selection`, and wiring the pipe to whatever
    /// `on_select` returns.
    pub fn new(
        prefix: impl Into<String>,
        selection: impl Into<String>,
        on_select: impl Fn(&Upipe, &Uref) -> Option<Upipe> + Send + Sync + 'static,
        next: Uprobe,
    ) -> Uprobe {
        Uprobe::new(Self {
            prefix: prefix.into(),
            selection: selection.into(),
            auto_taken: Mutex::new(false),
            on_select: Arc::new(on_select),
            next,
        })
    }

    fn selected(&self, flow_def: &Uref) -> bool {
        match self.selection.as_str() {
            "all" => true,
            "auto" => {
                let mut taken = self.auto_taken.lock();
                if *taken {
                    false
                } else {
                    *taken = true;
                    true
                }
            }
            list => list.split(',').map(str::trim).any(|entry| {
                if let Ok(Some(id)) = flow_def.flow_id() {
                    if entry.parse::<u64>() == Ok(id) {
                        return true;
                    }
                }
                matches!(flow_def.flow_name(), Ok(Some(name)) if name == entry)
            }),
        }
    }
}

impl ProbeOps for UprobeSelflow {
    fn throw(&self, pipe: Option<&Upipe>, event: &mut Event<'_>) -> Result<()> {
        let Event::NewFlowDef(flow_def) = event else {
            return self.next.throw(pipe, event);
        };
        let Some(sub_pipe) = pipe else {
            return self.next.throw(pipe, event);
        };
        if !flow_def.flow_def_matches(&self.prefix) || !self.selected(flow_def) {
            return self.next.throw(pipe, event);
        }
        debug!("selecting flow {:?}", flow_def.flow_def());
        if let Some(output) = (self.on_select)(sub_pipe, flow_def) {
            let _ = sub_pipe.set_output(Some(output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uref::{alloc_flow_def, UrefMgr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn flow(def: &str, id: u64) -> Uref {
        let mgr = UrefMgr::default();
        let mut flow_def = alloc_flow_def(&mgr, def).unwrap();
        flow_def.set_flow_id(id).unwrap();
        flow_def
    }

    fn probe_counting(selection: &str, count: &Arc<AtomicUsize>) -> Uprobe {
        let count = count.clone();
        UprobeSelflow::new(
            "block.",
            selection,
            move |_pipe, _flow_def| {
                count.fetch_add(1, Ordering::SeqCst);
                None
            },
            Uprobe::null(),
        )
    }

    struct NullOps;

    impl crate::upipe::PipeOps for NullOps {
        fn input(&mut self, _: &Upipe, _: Uref, _: Option<&crate::upump::Upump>) {}

        fn control(&mut self, _: &Upipe, _: crate::upipe::Command<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn pipe() -> Upipe {
        Upipe::new(crate::upipe::signature(*b"splt"), Uprobe::null(), NullOps)
    }

    #[test]
    fn test_all_selects_every_flow() {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = probe_counting("all", &count);
        let sub = pipe();
        probe
            .throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.mpegts.", 1)))
            .unwrap();
        probe
            .throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.mpegts.", 2)))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_auto_selects_first_only() {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = probe_counting("auto", &count);
        let sub = pipe();
        probe
            .throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.", 1)))
            .unwrap();
        let second = probe.throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.", 2)));
        assert!(second.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_id_list_selection() {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = probe_counting("33, 44", &count);
        let sub = pipe();
        let _ = probe.throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.", 33)));
        let _ = probe.throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.", 5)));
        let _ = probe.throw(Some(&sub), &mut Event::NewFlowDef(&flow("block.", 44)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_category_mismatch_passes_through() {
        let count = Arc::new(AtomicUsize::new(0));
        let probe = probe_counting("all", &count);
        let sub = pipe();
        let result = probe.throw(Some(&sub), &mut Event::NewFlowDef(&flow("pic.", 1)));
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
