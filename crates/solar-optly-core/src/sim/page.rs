//! The simulated host page: document, storage, analytics queue and outbound
//! messages, with observer and listener registrations recorded for the driver.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::dom::Document;
use crate::host::{
    DataLayer, Dom, HostError, Location, MessagePort, NodeId, ScrollBehavior, SessionStorage,
    StylePriority, WindowRef,
};
use crate::protocol::ProtocolMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageMode {
    #[default]
    Available,
    Unavailable,
    QuotaExceeded,
}

/// Browser APIs the page may lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Capabilities {
    pub attribute_observer: bool,
    pub document_observer: bool,
    pub smooth_scroll: bool,
    pub storage: StorageMode,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            attribute_observer: true,
            document_observer: true,
            smooth_scroll: true,
            storage: StorageMode::Available,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSessionStorage {
    items: BTreeMap<String, String>,
    mode: StorageMode,
}

impl FakeSessionStorage {
    pub fn new(mode: StorageMode) -> Self {
        Self {
            items: BTreeMap::new(),
            mode,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Seeds a value regardless of the storage mode.
    pub fn seed(&mut self, key: &str, value: &str) {
        self.items.insert(key.to_string(), value.to_string());
    }

    pub fn set_mode(&mut self, mode: StorageMode) {
        self.mode = mode;
    }
}

impl SessionStorage for FakeSessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, HostError> {
        match self.mode {
            StorageMode::Unavailable => Err(HostError::Storage("sessionStorage is disabled".to_string())),
            _ => Ok(self.items.get(key).cloned()),
        }
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), HostError> {
        match self.mode {
            StorageMode::Available => {
                self.items.insert(key.to_string(), value.to_string());
                Ok(())
            }
            StorageMode::Unavailable => Err(HostError::Storage("sessionStorage is disabled".to_string())),
            StorageMode::QuotaExceeded => Err(HostError::QuotaExceeded),
        }
    }

    fn remove_item(&mut self, key: &str) -> Result<(), HostError> {
        match self.mode {
            StorageMode::Unavailable => Err(HostError::Storage("sessionStorage is disabled".to_string())),
            _ => {
                self.items.remove(key);
                Ok(())
            }
        }
    }
}

/// What `dataLayer.push` is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PushBinding {
    Native,
    Wrapped { around: String },
    Replaced { by: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Attribute { node: NodeId, name: String },
    ChildList,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub target: WindowRef,
    pub message: ProtocolMessage,
    pub target_origin: String,
}

#[derive(Debug, Clone)]
pub struct FakePage {
    pub document: Document,
    href: String,
    storage: FakeSessionStorage,
    data_layer: Vec<Value>,
    push_binding: PushBinding,
    capabilities: Capabilities,
    observed_attributes: BTreeSet<(NodeId, String)>,
    document_observed: bool,
    load_listeners: BTreeSet<NodeId>,
    mutations: Vec<Mutation>,
    frame_navigations: Vec<(NodeId, String)>,
    outbox: Vec<PostedMessage>,
    scrolls: Vec<(NodeId, ScrollBehavior)>,
}

impl FakePage {
    pub fn new(href: &str, document: Document, storage: FakeSessionStorage, capabilities: Capabilities) -> Self {
        Self {
            document,
            href: href.to_string(),
            storage,
            data_layer: Vec::new(),
            push_binding: PushBinding::Native,
            capabilities,
            observed_attributes: BTreeSet::new(),
            document_observed: false,
            load_listeners: BTreeSet::new(),
            mutations: Vec::new(),
            frame_navigations: Vec::new(),
            outbox: Vec::new(),
            scrolls: Vec::new(),
        }
    }

    /// `scheme://host[:port]` of the page, or `"null"` for opaque URLs.
    pub fn origin(&self) -> String {
        Url::parse(&self.href)
            .map(|url| url.origin().ascii_serialization())
            .unwrap_or_else(|_| "null".to_string())
    }

    pub fn storage(&self) -> &FakeSessionStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut FakeSessionStorage {
        &mut self.storage
    }

    pub fn into_storage(self) -> FakeSessionStorage {
        self.storage
    }

    pub fn data_layer(&self) -> &[Value] {
        &self.data_layer
    }

    pub fn push_binding(&self) -> &PushBinding {
        &self.push_binding
    }

    /// Appends to the queue. Returns the index and whether the wrapper saw it.
    pub fn push_event(&mut self, event: Value) -> (usize, bool) {
        self.data_layer.push(event);
        let forwarded = matches!(self.push_binding, PushBinding::Wrapped { .. });
        (self.data_layer.len() - 1, forwarded)
    }

    /// Another script rebinds `push` without the wrapper.
    pub fn replace_push(&mut self, by: &str) {
        self.push_binding = PushBinding::Replaced { by: by.to_string() };
    }

    pub fn has_load_listener(&self, node: NodeId) -> bool {
        self.load_listeners.contains(&node)
    }

    pub fn is_document_observed(&self) -> bool {
        self.document_observed
    }

    pub fn scrolls(&self) -> &[(NodeId, ScrollBehavior)] {
        &self.scrolls
    }

    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.mutations)
    }

    pub fn take_frame_navigations(&mut self) -> Vec<(NodeId, String)> {
        std::mem::take(&mut self.frame_navigations)
    }

    pub fn take_outbox(&mut self) -> Vec<PostedMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Appends `child` under `parent` the way host-page scripts do.
    pub fn insert(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.document.append(parent, child)?;
        if self.document_observed {
            self.mutations.push(Mutation::ChildList);
        }
        let mut inserted = vec![child];
        inserted.extend(self.document.descendants(child));
        for node in inserted {
            if self.document.tag(node) != Some("IFRAME") {
                continue;
            }
            if let Some(src) = self.document.attribute(node, "src").map(str::to_string) {
                self.frame_navigations.push((node, src));
            }
        }
        Ok(())
    }

    fn attribute_changed(&mut self, node: NodeId, name: &str) {
        if self.observed_attributes.contains(&(node, name.to_string())) {
            self.mutations.push(Mutation::Attribute {
                node,
                name: name.to_string(),
            });
        }
    }
}

impl Dom for FakePage {
    fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.document.element_by_id(id)
    }

    fn query_selector_all(&self, scope: Option<NodeId>, selector: &str) -> Result<Vec<NodeId>, HostError> {
        self.document.query_all(scope, selector)
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        self.document.tag(node).map(str::to_string)
    }

    fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.document.parent(node)
    }

    fn first_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.document.children(node).first().copied()
    }

    fn closest_with_class(&self, node: NodeId, class: &str) -> Option<NodeId> {
        self.document.closest_with_class(node, class)
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.document.attribute(node, name).map(str::to_string)
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        self.document.set_attribute(node, name, value);
        if name == "src" && self.document.tag(node) == Some("IFRAME") && self.document.is_connected(node) {
            self.frame_navigations.push((node, value.to_string()));
        }
        self.attribute_changed(node, name);
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if self.document.remove_attribute(node, name) {
            self.attribute_changed(node, name);
        }
    }

    fn style_property(&self, node: NodeId, name: &str) -> Option<String> {
        self.document.style(node, name).map(|style| style.value.clone())
    }

    fn set_style_property(&mut self, node: NodeId, name: &str, value: &str, priority: StylePriority) {
        self.document
            .set_style(node, name, value, priority == StylePriority::Important);
    }

    fn remove_style_property(&mut self, node: NodeId, name: &str) {
        self.document.remove_style(node, name);
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.document.create(tag)
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        self.insert(parent, child)
    }

    fn scroll_into_view(&mut self, node: NodeId, behavior: ScrollBehavior) -> Result<(), HostError> {
        if behavior == ScrollBehavior::Smooth && !self.capabilities.smooth_scroll {
            return Err(HostError::Scroll("smooth scrolling is not supported".to_string()));
        }
        self.scrolls.push((node, behavior));
        Ok(())
    }

    fn content_window(&self, iframe: NodeId) -> Option<WindowRef> {
        (self.document.tag(iframe) == Some("IFRAME") && self.document.is_connected(iframe))
            .then_some(WindowRef::Frame(iframe))
    }

    fn observe_attribute(&mut self, node: NodeId, name: &str) -> Result<(), HostError> {
        if !self.capabilities.attribute_observer {
            return Err(HostError::Unsupported {
                api: "MutationObserver",
            });
        }
        self.observed_attributes.insert((node, name.to_string()));
        Ok(())
    }

    fn observe_document(&mut self) -> Result<(), HostError> {
        if !self.capabilities.document_observer {
            return Err(HostError::Unsupported {
                api: "MutationObserver",
            });
        }
        self.document_observed = true;
        Ok(())
    }

    fn listen_for_load(&mut self, node: NodeId) -> Result<(), HostError> {
        self.load_listeners.insert(node);
        Ok(())
    }
}

impl SessionStorage for FakePage {
    fn get_item(&self, key: &str) -> Result<Option<String>, HostError> {
        self.storage.get_item(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), HostError> {
        self.storage.set_item(key, value)
    }

    fn remove_item(&mut self, key: &str) -> Result<(), HostError> {
        self.storage.remove_item(key)
    }
}

impl DataLayer for FakePage {
    fn len(&self) -> usize {
        self.data_layer.len()
    }

    fn event(&self, index: usize) -> Option<Value> {
        self.data_layer.get(index).cloned()
    }

    fn push_is_wrapped(&self) -> bool {
        matches!(self.push_binding, PushBinding::Wrapped { .. })
    }

    fn wrap_push(&mut self) -> String {
        let around = match &self.push_binding {
            PushBinding::Native => "Array.prototype.push".to_string(),
            PushBinding::Wrapped { around } => around.clone(),
            PushBinding::Replaced { by } => by.clone(),
        };
        self.push_binding = PushBinding::Wrapped {
            around: around.clone(),
        };
        around
    }
}

impl MessagePort for FakePage {
    fn post_message(
        &mut self,
        target: WindowRef,
        message: &ProtocolMessage,
        target_origin: &str,
    ) -> Result<(), HostError> {
        if let WindowRef::Frame(iframe) = target {
            if self.content_window(iframe).is_none() {
                return Err(HostError::WindowGone);
            }
        }
        self.outbox.push(PostedMessage {
            target,
            message: message.clone(),
            target_origin: target_origin.to_string(),
        });
        Ok(())
    }
}

impl Location for FakePage {
    fn href(&self) -> String {
        self.href.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page() -> (FakePage, NodeId) {
        let mut document = Document::new();
        let body = document.body();
        let iframe = document.build(body, "iframe", &[("id", "mvfFormWidget-1")]);
        let page = FakePage::new(
            "https://www.example.co.uk/solar/",
            document,
            FakeSessionStorage::default(),
            Capabilities::default(),
        );
        (page, iframe)
    }

    #[test]
    fn src_changes_are_recorded_as_navigations_and_observed_mutations() {
        let (mut page, iframe) = page();
        page.set_attribute(iframe, "src", "https://a.example/");
        assert!(page.take_mutations().is_empty());

        page.observe_attribute(iframe, "src").expect("observer supported");
        page.set_attribute(iframe, "src", "https://b.example/");
        assert_eq!(
            page.take_mutations(),
            vec![Mutation::Attribute {
                node: iframe,
                name: "src".to_string()
            }]
        );
        assert_eq!(page.take_frame_navigations().len(), 2);
    }

    #[test]
    fn wrapper_survives_only_until_replaced() {
        let (mut page, _) = page();
        assert_eq!(page.push_event(json!({"event": "a"})), (0, false));
        page.wrap_push();
        assert_eq!(page.push_event(json!({"event": "b"})), (1, true));
        page.replace_push("vendorPush");
        assert!(!page.push_is_wrapped());
        assert_eq!(page.wrap_push(), "vendorPush");
    }

    #[test]
    fn storage_modes_fail_like_the_browser() {
        let mut storage = FakeSessionStorage::new(StorageMode::QuotaExceeded);
        assert_eq!(storage.set_item("k", "v"), Err(HostError::QuotaExceeded));
        storage.set_mode(StorageMode::Unavailable);
        assert!(storage.get_item("k").is_err());
    }

    #[test]
    fn origin_is_derived_from_href() {
        let (page, _) = page();
        assert_eq!(page.origin(), "https://www.example.co.uk");
    }
}
