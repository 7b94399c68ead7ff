//! Minimal owned element tree used as the backing store of a METS document.
//!
//! Names are kept exactly as written (`mets:file`, `xlink:href`) so a parsed
//! document serializes back with its own prefixes. Namespace declarations are
//! collected while parsing; callers map namespace URIs to prefixes once and
//! then compare qualified names.

use std::borrow::Cow;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::MetsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    pub(crate) name: String,
    pub(crate) attrs: Vec<(String, String)>,
    pub(crate) children: Vec<Node>,
}

/// A namespace declaration seen anywhere in a parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NsDecl {
    pub(crate) prefix: Option<String>,
    pub(crate) uri: String,
}

impl Element {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub(crate) fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub(crate) fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    pub(crate) fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn has_attr(&self, key: &str, value: &str) -> bool {
        self.attr(key) == Some(value)
    }

    pub(crate) fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(name, _)| *name == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub(crate) fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn set_text(&mut self, text: impl Into<String>) {
        self.children.retain(|node| !matches!(node, Node::Text(_)));
        self.children.insert(0, Node::Text(text.into()));
    }

    pub(crate) fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub(crate) fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    pub(crate) fn has_elements(&self) -> bool {
        self.elements().next().is_some()
    }

    pub(crate) fn child(&self, pred: impl Fn(&Element) -> bool) -> Option<&Element> {
        self.elements().find(|el| pred(el))
    }

    pub(crate) fn child_mut(&mut self, pred: impl Fn(&Element) -> bool) -> Option<&mut Element> {
        self.elements_mut().find(|el| pred(el))
    }

    /// Returns the child matching `pred`, appending `make()` first if there is none.
    pub(crate) fn child_or_insert(
        &mut self,
        pred: impl Fn(&Element) -> bool,
        make: impl FnOnce() -> Element,
    ) -> &mut Element {
        let pos = match self.child_position(&pred) {
            Some(pos) => pos,
            None => {
                self.children.push(Node::Element(make()));
                self.children.len() - 1
            }
        };
        match &mut self.children[pos] {
            Node::Element(el) => el,
            _ => unreachable!("child_position only yields element nodes"),
        }
    }

    pub(crate) fn child_position(&self, pred: impl Fn(&Element) -> bool) -> Option<usize> {
        self.children
            .iter()
            .position(|node| matches!(node, Node::Element(el) if pred(el)))
    }

    pub(crate) fn element_at_mut(&mut self, pos: usize) -> Option<&mut Element> {
        match self.children.get_mut(pos) {
            Some(Node::Element(el)) => Some(el),
            _ => None,
        }
    }

    pub(crate) fn push(&mut self, child: Element) -> &mut Element {
        self.insert(self.children.len(), child)
    }

    pub(crate) fn insert(&mut self, pos: usize, child: Element) -> &mut Element {
        let pos = pos.min(self.children.len());
        self.children.insert(pos, Node::Element(child));
        match &mut self.children[pos] {
            Node::Element(el) => el,
            _ => unreachable!("element was just inserted"),
        }
    }

    /// Removes every child element matching `pred`, returning how many were dropped.
    pub(crate) fn remove_children(&mut self, pred: impl Fn(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children
            .retain(|node| !matches!(node, Node::Element(el) if pred(el)));
        before - self.children.len()
    }

    /// Depth-first, document-order search including `self`.
    pub(crate) fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.elements().find_map(|el| el.find(pred))
    }

    pub(crate) fn find_mut(&mut self, pred: &dyn Fn(&Element) -> bool) -> Option<&mut Element> {
        if pred(self) {
            return Some(self);
        }
        for child in self.elements_mut() {
            if let Some(found) = child.find_mut(pred) {
                return Some(found);
            }
        }
        None
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, MetsError> {
    std::str::from_utf8(bytes).map_err(|err| MetsError::Xml(err.to_string()))
}

fn xml_err(reader: &Reader<&[u8]>, err: impl std::fmt::Display) -> MetsError {
    MetsError::Xml(format!("at byte {}: {err}", reader.buffer_position()))
}

fn element_from_start(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    decls: &mut Vec<NsDecl>,
) -> Result<Element, MetsError> {
    let mut element = Element::new(utf8(start.name().as_ref())?);
    for attr in start.attributes() {
        let attr = attr.map_err(|err| xml_err(reader, err))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| xml_err(reader, err))?
            .into_owned();
        if key == "xmlns" {
            decls.push(NsDecl {
                prefix: None,
                uri: value.clone(),
            });
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            decls.push(NsDecl {
                prefix: Some(prefix.to_string()),
                uri: value.clone(),
            });
        }
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => *root = Some(element),
    }
}

/// Parses `content` into its root element plus every namespace declaration found.
pub(crate) fn parse(content: &str) -> Result<(Element, Vec<NsDecl>), MetsError> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut decls = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event().map_err(|err| xml_err(&reader, err))? {
            Event::Start(start) => {
                let element = element_from_start(&reader, &start, &mut decls)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = element_from_start(&reader, &start, &mut decls)?;
                attach(&mut stack, &mut root, element);
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_err(&reader, "unbalanced end tag"))?;
                attach(&mut stack, &mut root, element);
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|err| xml_err(&reader, err))?;
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::Text(text.into_owned()));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Text(utf8(&data.into_inner())?.to_string()));
                }
            }
            Event::Comment(comment) => {
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Comment(utf8(&comment)?.to_string()));
                }
            }
            Event::Eof => break,
            Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }
    if !stack.is_empty() {
        return Err(MetsError::Xml("unexpected end of document".to_string()));
    }
    let root = root.ok_or_else(|| MetsError::Xml("document has no root element".to_string()))?;
    Ok((root, decls))
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), MetsError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }
    emit(writer, Event::Start(start))?;
    for child in &element.children {
        match child {
            Node::Element(el) => write_element(writer, el)?,
            Node::Text(text) => emit(writer, Event::Text(BytesText::new(text)))?,
            Node::Comment(comment) => emit(
                writer,
                Event::Comment(BytesText::from_escaped(Cow::Borrowed(comment.as_str()))),
            )?,
        }
    }
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), MetsError> {
    writer
        .write_event(event)
        .map_err(|err| MetsError::Xml(err.to_string()))
}

/// Serializes `root` as an indented UTF-8 document with an XML declaration.
pub(crate) fn serialize(root: &Element) -> Result<String, MetsError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    write_element(&mut writer, root)?;
    let mut out =
        String::from_utf8(writer.into_inner()).map_err(|err| MetsError::Xml(err.to_string()))?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collects_declarations_and_text() -> anyhow::Result<()> {
        let (root, decls) = parse(
            r#"<?xml version="1.0"?>
<a:root xmlns:a="urn:a" xmlns="urn:default">
  <a:child k="v &amp; w">hello</a:child>
  <!-- note -->
  <leaf/>
</a:root>"#,
        )?;
        assert_eq!(root.name, "a:root");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].prefix.as_deref(), Some("a"));
        assert_eq!(decls[1].prefix, None);
        let child = root.child(|el| el.name == "a:child").expect("child");
        assert_eq!(child.attr("k"), Some("v & w"));
        assert_eq!(child.text(), "hello");
        assert!(root.child(|el| el.name == "leaf").is_some());
        Ok(())
    }

    #[test]
    fn serialize_round_trips_structure() -> anyhow::Result<()> {
        let source = Element::new("r")
            .with_attr("x", "1 < 2")
            .with_child(Element::new("c").with_text("t & u"))
            .with_child(Element::new("empty"));
        let xml = serialize(&source)?;
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        let (parsed, _) = parse(&xml)?;
        assert_eq!(parsed, source);
        Ok(())
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(matches!(parse("<a><b></b>"), Err(MetsError::Xml(_))));
        assert!(matches!(parse(""), Err(MetsError::Xml(_))));
    }

    #[test]
    fn remove_children_reports_count() {
        let mut el = Element::new("p")
            .with_child(Element::new("x"))
            .with_child(Element::new("y"))
            .with_child(Element::new("x"));
        assert_eq!(el.remove_children(|c| c.name == "x"), 2);
        assert_eq!(el.elements().count(), 1);
    }
}
