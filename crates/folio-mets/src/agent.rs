use serde::Serialize;

use crate::xml::Element;
use crate::Names;

/// A `mets:agent` record from the METS header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Agent {
    pub agent_type: Option<String>,
    pub other_type: Option<String>,
    pub role: Option<String>,
    pub other_role: Option<String>,
    pub name: Option<String>,
    pub notes: Vec<String>,
}

impl Agent {
    /// A software agent in the given role, the way processors sign their work.
    #[must_use]
    pub fn software(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            agent_type: Some("OTHER".to_string()),
            other_type: Some("SOFTWARE".to_string()),
            role: Some(role.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub(crate) fn from_element(el: &Element, names: &Names) -> Self {
        let name_tag = names.mets("name");
        let note_tag = names.mets("note");
        Self {
            agent_type: el.attr("TYPE").map(ToOwned::to_owned),
            other_type: el.attr("OTHERTYPE").map(ToOwned::to_owned),
            role: el.attr("ROLE").map(ToOwned::to_owned),
            other_role: el.attr("OTHERROLE").map(ToOwned::to_owned),
            name: el.child(|c| c.name == name_tag).map(Element::text),
            notes: el
                .elements()
                .filter(|c| c.name == note_tag)
                .map(Element::text)
                .collect(),
        }
    }

    pub(crate) fn to_element(&self, names: &Names) -> Element {
        let mut el = Element::new(names.mets("agent"));
        let attrs = [
            ("TYPE", &self.agent_type),
            ("OTHERTYPE", &self.other_type),
            ("ROLE", &self.role),
            ("OTHERROLE", &self.other_role),
        ];
        for (key, value) in attrs {
            if let Some(value) = value {
                el.set_attr(key, value.as_str());
            }
        }
        if let Some(name) = &self.name {
            el.push(Element::new(names.mets("name")).with_text(name.as_str()));
        }
        for note in &self.notes {
            el.push(Element::new(names.mets("note")).with_text(note.as_str()));
        }
        el
    }
}
