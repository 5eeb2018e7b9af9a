use std::collections::BTreeMap;
use std::rc::Rc;

/// An element on the stack of open elements.
///
/// Carries the resolved namespace of the element itself and the full
/// prefix-to-URI mapping in scope at this depth. The scope map is shared
/// with the parent element unless this element declared namespaces of
/// its own, so deeply nested documents do not copy their scope per tag.
/// The default namespace lives under the empty-string prefix.
#[derive(Clone, Debug, PartialEq)]
pub struct XmlElement {
    pub(crate) local_name: Rc<str>,
    pub(crate) namespace_prefix: Option<Rc<str>>,
    pub(crate) namespace: Rc<str>,
    pub(crate) namespaces_in_scope: Rc<BTreeMap<String, String>>,
}

impl XmlElement {
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn namespace_prefix(&self) -> Option<&str> {
        self.namespace_prefix.as_deref()
    }

    /// The resolved namespace URI; empty when the element is in no namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn namespaces_in_scope(&self) -> &BTreeMap<String, String> {
        &self.namespaces_in_scope
    }

    /// The name as it appears in the document, prefix included.
    ///
    /// Closing tags must repeat this exact name, so well-formedness is
    /// checked against it rather than against the resolved namespace.
    pub(crate) fn raw_name(&self) -> String {
        match &self.namespace_prefix {
            Some(prefix) => format!("{prefix}:{}", self.local_name),
            None => self.local_name.to_string(),
        }
    }
}

pub(super) struct StackOfOpenElements {
    pub stack: Vec<XmlElement>,
}

impl StackOfOpenElements {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push(&mut self, element: XmlElement) {
        self.stack.push(element)
    }

    pub fn pop(&mut self) -> Option<XmlElement> {
        self.stack.pop()
    }

    pub(crate) fn current_node(&self) -> Option<&XmlElement> {
        self.stack.last()
    }

    pub(crate) fn count(&self) -> usize {
        self.stack.len()
    }
}
