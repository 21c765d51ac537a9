use tracing::{debug, warn};

use super::IframeLifecycle;
use crate::host::{Dom, NodeId};

pub const OVERLAY_ATTR: &str = "data-solar-optly-overlay";

const OVERLAY_STYLES: &[(&str, &str)] = &[
    ("position", "absolute"),
    ("top", "0"),
    ("right", "0"),
    ("bottom", "0"),
    ("left", "0"),
    ("background", "#ffffff"),
    ("z-index", "9999"),
    ("opacity", "0"),
    ("pointer-events", "none"),
    ("transition", "opacity 400ms ease"),
];

impl IframeLifecycle<'_> {
    /// The element the overlay is positioned in: the wrapper's parent, or the
    /// wrapper itself when it has none.
    fn overlay_host<D: Dom + ?Sized>(&self, dom: &D, preferred_id: Option<&str>) -> Option<NodeId> {
        let iframe = self.target(&*dom, preferred_id)?;
        let wrapper = dom.closest_with_class(iframe, &self.config.wrapper_class)?;
        Some(dom.parent_element(wrapper).unwrap_or(wrapper))
    }

    fn existing_overlay<D: Dom + ?Sized>(&self, dom: &D, host: NodeId) -> Option<NodeId> {
        let selector = format!("[{OVERLAY_ATTR}]");
        dom.query_selector(Some(host), &selector).ok().flatten()
    }

    /// Creates the overlay at most once per host element.
    pub fn ensure_overlay<D: Dom + ?Sized>(&self, dom: &mut D, preferred_id: Option<&str>) -> Option<NodeId> {
        let host = self.overlay_host(dom, preferred_id)?;

        if dom.style_property(host, "position").map_or(true, |value| value.is_empty()) {
            dom.set_style(host, "position", "relative");
        }
        if let Some(existing) = self.existing_overlay(dom, host) {
            return Some(existing);
        }

        let overlay = dom.create_element("div");
        dom.set_attribute(overlay, OVERLAY_ATTR, "1");
        for (name, value) in OVERLAY_STYLES {
            dom.set_style(overlay, name, value);
        }
        match dom.append_child(host, overlay) {
            Ok(()) => {
                debug!(host = ?host, "overlay created");
                Some(overlay)
            }
            Err(err) => {
                warn!(error = %err, "unable to attach overlay");
                None
            }
        }
    }

    /// Opaque instantly, so the user never sees the native thank-you content.
    pub fn show_overlay<D: Dom + ?Sized>(&self, dom: &mut D, preferred_id: Option<&str>) -> bool {
        let Some(overlay) = self.ensure_overlay(dom, preferred_id) else {
            return false;
        };
        dom.set_style(overlay, "transition", "none");
        dom.set_style(overlay, "opacity", "1");
        dom.set_style(overlay, "pointer-events", "auto");
        true
    }

    /// Fades an existing overlay out. Never creates one.
    pub fn hide_overlay<D: Dom + ?Sized>(&self, dom: &mut D, preferred_id: Option<&str>) -> bool {
        let Some(host) = self.overlay_host(dom, preferred_id) else {
            return false;
        };
        let Some(overlay) = self.existing_overlay(dom, host) else {
            return false;
        };
        dom.set_style(overlay, "transition", "opacity 400ms ease");
        dom.set_style(overlay, "opacity", "0");
        dom.set_style(overlay, "pointer-events", "none");
        true
    }
}
