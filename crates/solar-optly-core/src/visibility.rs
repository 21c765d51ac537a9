//! Keeps selected marketing-page rows hidden until the embedded app is ready.

use tracing::{debug, info, warn};

use crate::host::{Dom, StylePriority};
use crate::state::ControllerState;

pub const HIDDEN_MARKER: &str = "data-solar-optly-hidden";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDirective {
    Show(usize),
    Hide(usize),
}

impl RowDirective {
    pub fn index(self) -> usize {
        match self {
            RowDirective::Show(index) | RowDirective::Hide(index) => index,
        }
    }
}

/// Directives for the configured match indexes that exist among `matched` nodes.
pub fn desired_row_states(ready: bool, indexes: &[usize], matched: usize) -> Vec<RowDirective> {
    indexes
        .iter()
        .copied()
        .filter(|index| *index < matched)
        .map(|index| {
            if ready {
                RowDirective::Show(index)
            } else {
                RowDirective::Hide(index)
            }
        })
        .collect()
}

pub struct VisibilityController<'a> {
    selector: &'a str,
    indexes: &'a [usize],
}

impl<'a> VisibilityController<'a> {
    pub fn new(selector: &'a str, indexes: &'a [usize]) -> Self {
        Self { selector, indexes }
    }

    /// Applies the directives for the current readiness flag. Returns how many rows were touched.
    pub fn sync<D: Dom + ?Sized>(&self, dom: &mut D, state: &ControllerState) -> usize {
        let nodes = match dom.query_selector_all(None, self.selector) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!(selector = self.selector, error = %err, "row query failed");
                return 0;
            }
        };
        if nodes.is_empty() {
            debug!(selector = self.selector, "no target row found to toggle visibility");
            return 0;
        }

        let ready = state.iframe_ready_for_reveal;
        let directives = desired_row_states(ready, self.indexes, nodes.len());
        for directive in &directives {
            let node = nodes[directive.index()];
            match directive {
                RowDirective::Show(_) => {
                    dom.remove_style_property(node, "display");
                    dom.remove_attribute(node, HIDDEN_MARKER);
                }
                RowDirective::Hide(_) => {
                    dom.set_style_property(node, "display", "none", StylePriority::Important);
                    dom.set_attribute(node, HIDDEN_MARKER, "1");
                }
            }
        }

        debug!(
            selector = self.selector,
            target_indexes = ?self.indexes,
            should_show = ready,
            matched_count = nodes.len(),
            affected_count = directives.len(),
            "updated main page rows visibility"
        );
        directives.len()
    }

    /// Registers the document observer once per page.
    pub fn watch<D: Dom + ?Sized>(&self, dom: &mut D, state: &mut ControllerState) {
        if state.visibility_observer_attached.is_set() {
            return;
        }
        match dom.observe_document() {
            Ok(()) => {
                state.visibility_observer_attached.set();
                info!("main page row visibility observer attached");
            }
            Err(err) => warn!(error = %err, "failed to attach main page row observer"),
        }
    }
}
