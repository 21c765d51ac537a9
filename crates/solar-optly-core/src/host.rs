//! Seams between the coordination logic and the browsing context it runs in.
//!
//! The host-page controller only ever touches the document, storage, the
//! analytics queue and `postMessage` through these traits. Observer and
//! listener registration is declarative: the runtime glue records the request
//! and later calls the matching `on_*` entry point on the controller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ProtocolMessage;

/// Opaque element handle issued by the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Browsing contexts a message can come from or be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "node")]
pub enum WindowRef {
    /// `window.parent` as seen from inside the iframe.
    Parent,
    /// The content window of an iframe element in the host document.
    Frame(NodeId),
    /// Any other window (popups, unrelated frames).
    Foreign(u32),
}

/// A delivered `message` event.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub source: WindowRef,
    pub origin: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StylePriority {
    Normal,
    Important,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollBehavior {
    Smooth,
    Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("{api} is not available in this browsing context")]
    Unsupported { api: &'static str },
    #[error("unsupported selector '{0}'")]
    InvalidSelector(String),
    #[error("node {0:?} is not attached to the document")]
    DetachedNode(NodeId),
    #[error("storage unavailable: {0}")]
    Storage(String),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("target window is gone")]
    WindowGone,
    #[error("scrolling failed: {0}")]
    Scroll(String),
}

pub trait Dom {
    fn element_by_id(&self, id: &str) -> Option<NodeId>;

    /// Compound-selector query, optionally scoped to the descendants of `scope`.
    fn query_selector_all(
        &self,
        scope: Option<NodeId>,
        selector: &str,
    ) -> Result<Vec<NodeId>, HostError>;

    /// Upper-case tag name, as `Element.tagName` reports it for HTML documents.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn parent_element(&self, node: NodeId) -> Option<NodeId>;

    fn first_element_child(&self, node: NodeId) -> Option<NodeId>;

    /// `Element.closest('.class')`, including the node itself.
    fn closest_with_class(&self, node: NodeId, class: &str) -> Option<NodeId>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

    fn remove_attribute(&mut self, node: NodeId, name: &str);

    /// Inline style value, `None` when the property is not set.
    fn style_property(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_style_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
        priority: StylePriority,
    );

    fn remove_style_property(&mut self, node: NodeId, name: &str);

    fn create_element(&mut self, tag: &str) -> NodeId;

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError>;

    /// Scrolls the element to the vertical center of the viewport.
    fn scroll_into_view(&mut self, node: NodeId, behavior: ScrollBehavior)
        -> Result<(), HostError>;

    fn content_window(&self, iframe: NodeId) -> Option<WindowRef>;

    /// Requests `on_src_mutation`-style callbacks for changes of one attribute.
    fn observe_attribute(&mut self, node: NodeId, name: &str) -> Result<(), HostError>;

    /// Requests child-list callbacks for the whole document subtree.
    fn observe_document(&mut self) -> Result<(), HostError>;

    /// Requests `load` callbacks for an element. Repeated calls are harmless.
    fn listen_for_load(&mut self, node: NodeId) -> Result<(), HostError>;

    fn set_style(&mut self, node: NodeId, name: &str, value: &str) {
        self.set_style_property(node, name, value, StylePriority::Normal);
    }

    fn query_selector(
        &self,
        scope: Option<NodeId>,
        selector: &str,
    ) -> Result<Option<NodeId>, HostError> {
        Ok(self
            .query_selector_all(scope, selector)?
            .into_iter()
            .next())
    }
}

pub trait SessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, HostError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), HostError>;
    fn remove_item(&mut self, key: &str) -> Result<(), HostError>;
}

/// The host page's analytics queue (`window.dataLayer`).
pub trait DataLayer {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn event(&self, index: usize) -> Option<Value>;

    /// Whether the current `push` binding carries this controller's wrapper marker.
    fn push_is_wrapped(&self) -> bool;

    /// Replaces `push` with the forwarding wrapper around the current binding,
    /// returning a description of the binding that was wrapped.
    fn wrap_push(&mut self) -> String;
}

pub trait MessagePort {
    fn post_message(
        &mut self,
        target: WindowRef,
        message: &ProtocolMessage,
        target_origin: &str,
    ) -> Result<(), HostError>;
}

pub trait Location {
    fn href(&self) -> String;
}

/// Everything the host-page controller needs from the parent document.
pub trait HostPage: Dom + SessionStorage + DataLayer + MessagePort + Location {}

impl<T> HostPage for T where T: Dom + SessionStorage + DataLayer + MessagePort + Location {}
