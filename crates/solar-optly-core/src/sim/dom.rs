//! Arena-backed element tree for the simulated host page.

use std::collections::BTreeMap;

use serde::Serialize;

use super::selector::{parse_selector_groups, Combinator, SelectorPart, SelectorStep};
use crate::host::{HostError, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleValue {
    pub value: String,
    pub important: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Element {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub styles: BTreeMap<String, StyleValue>,
    #[serde(skip)]
    pub parent: Option<NodeId>,
    #[serde(skip)]
    pub children: Vec<NodeId>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_uppercase(),
            attributes: BTreeMap::new(),
            styles: BTreeMap::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attributes
            .get("class")
            .is_some_and(|classes| classes.split_ascii_whitespace().any(|name| name == class))
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Element>,
    root: NodeId,
    body: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// `<html><body></body></html>`.
    pub fn new() -> Self {
        let mut root = Element::new("html");
        let mut body = Element::new("body");
        body.parent = Some(NodeId(0));
        root.children.push(NodeId(1));
        Self {
            nodes: vec![root, body],
            root: NodeId(0),
            body: NodeId(1),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn get(&self, node: NodeId) -> Option<&Element> {
        self.nodes.get(node.0)
    }

    fn get_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        self.nodes.get_mut(node.0)
    }

    /// A new detached element.
    pub fn create(&mut self, tag: &str) -> NodeId {
        self.nodes.push(Element::new(tag));
        NodeId(self.nodes.len() - 1)
    }

    /// Creates an element with attributes and appends it to `parent`.
    pub fn build(&mut self, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let node = self.create(tag);
        if let Some(element) = self.get_mut(node) {
            for (name, value) in attributes {
                element.attributes.insert(name.to_ascii_lowercase(), value.to_string());
            }
            element.parent = Some(parent);
        }
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(node);
        }
        node
    }

    /// Moves `child` under `parent`, detaching it from any previous parent.
    pub fn append(&mut self, parent: NodeId, child: NodeId) -> Result<(), HostError> {
        if self.get(parent).is_none() {
            return Err(HostError::DetachedNode(parent));
        }
        if self.get(child).is_none() {
            return Err(HostError::DetachedNode(child));
        }
        if self.ancestors_and_self(parent).contains(&child) {
            return Err(HostError::DetachedNode(child));
        }
        self.detach(child);
        if let Some(element) = self.get_mut(child) {
            element.parent = Some(parent);
        }
        if let Some(element) = self.get_mut(parent) {
            element.children.push(child);
        }
        Ok(())
    }

    /// Removes `node` (and its subtree) from the tree. The arena slot stays valid.
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.get(node).and_then(|element| element.parent) else {
            return;
        };
        if let Some(element) = self.get_mut(parent) {
            element.children.retain(|child| *child != node);
        }
        if let Some(element) = self.get_mut(node) {
            element.parent = None;
        }
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.ancestors_and_self(node).last() == Some(&self.root)
    }

    fn ancestors_and_self(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.get(id).and_then(|element| element.parent);
        }
        chain
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.get(node)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.get(node)
            .map(|element| element.children.as_slice())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.get(node).map(|element| element.tag.as_str())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.get(node)?.attributes.get(name).map(String::as_str)
    }

    /// Returns whether the stored value changed.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        let Some(element) = self.get_mut(node) else {
            return false;
        };
        let previous = element.attributes.insert(name.to_ascii_lowercase(), value.to_string());
        previous.as_deref() != Some(value)
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> bool {
        self.get_mut(node)
            .is_some_and(|element| element.attributes.remove(name).is_some())
    }

    pub fn style(&self, node: NodeId, name: &str) -> Option<&StyleValue> {
        self.get(node)?.styles.get(name)
    }

    pub fn set_style(&mut self, node: NodeId, name: &str, value: &str, important: bool) {
        if let Some(element) = self.get_mut(node) {
            element.styles.insert(
                name.to_string(),
                StyleValue {
                    value: value.to_string(),
                    important,
                },
            );
        }
    }

    pub fn remove_style(&mut self, node: NodeId, name: &str) {
        if let Some(element) = self.get_mut(node) {
            element.styles.remove(name);
        }
    }

    /// Connected descendants of `scope` in document order, `scope` excluded.
    pub fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = self.children(scope).iter().rev().copied().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|node| self.attribute(*node, "id") == Some(id))
    }

    pub fn closest_with_class(&self, node: NodeId, class: &str) -> Option<NodeId> {
        self.ancestors_and_self(node)
            .into_iter()
            .find(|id| self.get(*id).is_some_and(|element| element.has_class(class)))
    }

    pub fn query_all(&self, scope: Option<NodeId>, selector: &str) -> Result<Vec<NodeId>, HostError> {
        let groups = parse_selector_groups(selector)?;
        let candidates = self.descendants(scope.unwrap_or(self.root));
        Ok(candidates
            .into_iter()
            .filter(|node| groups.iter().any(|chain| self.matches_chain(*node, chain)))
            .collect())
    }

    fn matches_chain(&self, node: NodeId, chain: &[SelectorPart]) -> bool {
        let Some((last, rest)) = chain.split_last() else {
            return false;
        };
        if !self.matches_step(node, &last.step) {
            return false;
        }
        if rest.is_empty() {
            return true;
        }

        match last.combinator {
            Some(Combinator::Child) => self
                .parent(node)
                .is_some_and(|parent| self.matches_chain(parent, rest)),
            Some(Combinator::Descendant) | None => {
                let mut current = self.parent(node);
                while let Some(ancestor) = current {
                    if self.matches_chain(ancestor, rest) {
                        return true;
                    }
                    current = self.parent(ancestor);
                }
                false
            }
        }
    }

    fn matches_step(&self, node: NodeId, step: &SelectorStep) -> bool {
        let Some(element) = self.get(node) else {
            return false;
        };
        if step.tag.as_deref().is_some_and(|tag| tag != element.tag) {
            return false;
        }
        if step
            .id
            .as_deref()
            .is_some_and(|id| element.attributes.get("id").map(String::as_str) != Some(id))
        {
            return false;
        }
        if !step.classes.iter().all(|class| element.has_class(class)) {
            return false;
        }
        step.attrs
            .iter()
            .all(|condition| condition.matches(element.attributes.get(condition.key()).map(String::as_str)))
    }
}
