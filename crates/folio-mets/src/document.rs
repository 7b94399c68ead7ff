use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::constants::{IDENTIFIER_PRIORITY, NS_METS, NS_MODS, NS_XLINK, NS_XSI, SCHEMA_LOCATION};
use crate::error::MetsError;
use crate::file::{is_local_url, MetsFile, NewFile};
use crate::filter::{FileFilter, Matcher};
use crate::xml::{self, Element, NsDecl};

const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Qualified-name prefixes (`"mets:"`, or `""` for a default namespace) in use
/// by one document. Prefixes are assumed to be bound consistently throughout.
#[derive(Debug, Clone)]
pub(crate) struct Names {
    mets: String,
    mods: String,
    xlink: String,
}

impl Names {
    fn canonical() -> Self {
        Self {
            mets: "mets:".to_string(),
            mods: "mods:".to_string(),
            xlink: "xlink:".to_string(),
        }
    }

    /// Derives prefixes from the parsed declarations, declaring canonical
    /// prefixes on `root` for namespaces the document never mentions.
    fn resolve(root: &mut Element, decls: &[NsDecl]) -> Self {
        Self {
            mets: prefix_for(root, decls, NS_METS, "mets", true),
            mods: prefix_for(root, decls, NS_MODS, "mods", true),
            // unprefixed attributes carry no namespace, so xlink needs a real prefix
            xlink: prefix_for(root, decls, NS_XLINK, "xlink", false),
        }
    }

    pub(crate) fn mets(&self, local: &str) -> String {
        format!("{}{local}", self.mets)
    }

    pub(crate) fn mods(&self, local: &str) -> String {
        format!("{}{local}", self.mods)
    }

    pub(crate) fn xlink(&self, local: &str) -> String {
        format!("{}{local}", self.xlink)
    }
}

fn prefix_for(
    root: &mut Element,
    decls: &[NsDecl],
    uri: &str,
    canonical: &str,
    allow_default: bool,
) -> String {
    let found = decls
        .iter()
        .find(|decl| decl.uri == uri && (allow_default || decl.prefix.is_some()));
    match found {
        Some(NsDecl {
            prefix: Some(prefix),
            ..
        }) => format!("{prefix}:"),
        Some(NsDecl { prefix: None, .. }) => String::new(),
        None => {
            root.set_attr(format!("xmlns:{canonical}"), uri);
            format!("{canonical}:")
        }
    }
}

/// Lookup tables derived from the tree. Rebuilt on load, then maintained by
/// every mutating call.
#[derive(Debug, Clone, Default)]
struct Index {
    /// file ID -> fileGrp USE
    group_of: HashMap<String, String>,
    /// file ID -> page ID
    page_of: HashMap<String, String>,
    /// page ID -> file IDs, both in document order
    pages: IndexMap<String, Vec<String>>,
}

impl Index {
    fn unlink_file(&mut self, file_id: &str) {
        self.page_of.remove(file_id);
        for ids in self.pages.values_mut() {
            ids.retain(|id| id != file_id);
        }
    }
}

/// In-memory METS document: file groups, files, physical pages and agents.
#[derive(Debug, Clone)]
pub struct MetsDocument {
    root: Element,
    names: Names,
    index: Index,
    local_filenames: HashMap<String, PathBuf>,
}

fn is_page(el: &Element, div_tag: &str) -> bool {
    el.name == div_tag && el.has_attr("TYPE", "page")
}

fn file_groups_of<'a>(root: &'a Element, names: &Names) -> Vec<&'a Element> {
    let sec_tag = names.mets("fileSec");
    let grp_tag = names.mets("fileGrp");
    root.child(|el| el.name == sec_tag)
        .map(|sec| sec.elements().filter(|el| el.name == grp_tag).collect())
        .unwrap_or_default()
}

fn file_group_mut<'a>(root: &'a mut Element, names: &Names, use_: &str) -> Option<&'a mut Element> {
    let sec_tag = names.mets("fileSec");
    let grp_tag = names.mets("fileGrp");
    root.child_mut(|el| el.name == sec_tag)?
        .child_mut(|el| el.name == grp_tag && el.has_attr("USE", use_))
}

fn file_sec_or_insert<'a>(root: &'a mut Element, names: &Names) -> &'a mut Element {
    let sec_tag = names.mets("fileSec");
    let pos = match root.child_position(|el| el.name == sec_tag) {
        Some(pos) => pos,
        None => {
            // keep METS section order: fileSec precedes structMap
            let map_tag = names.mets("structMap");
            let pos = root
                .child_position(|el| el.name == map_tag)
                .unwrap_or(root.children.len());
            root.insert(pos, Element::new(sec_tag.clone()));
            pos
        }
    };
    match root.element_at_mut(pos) {
        Some(sec) => sec,
        None => unreachable!("fileSec position points at an element"),
    }
}

fn page_sequence<'a>(root: &'a Element, names: &Names) -> Option<&'a Element> {
    let map_tag = names.mets("structMap");
    let div_tag = names.mets("div");
    root.child(|el| el.name == map_tag && el.has_attr("TYPE", "PHYSICAL"))?
        .child(|el| el.name == div_tag && el.has_attr("TYPE", "physSequence"))
}

fn page_sequence_mut<'a>(root: &'a mut Element, names: &Names) -> Option<&'a mut Element> {
    let map_tag = names.mets("structMap");
    let div_tag = names.mets("div");
    root.child_mut(|el| el.name == map_tag && el.has_attr("TYPE", "PHYSICAL"))?
        .child_mut(|el| el.name == div_tag && el.has_attr("TYPE", "physSequence"))
}

fn flocat_href(file: &Element, names: &Names) -> Option<String> {
    let flocat_tag = names.mets("FLocat");
    let href = names.xlink("href");
    file.child(|el| el.name == flocat_tag)
        .and_then(|flocat| flocat.attr(&href))
        .map(ToOwned::to_owned)
}

fn set_flocat_href(file: &mut Element, names: &Names, url: &str) {
    let flocat_tag = names.mets("FLocat");
    let flocat = file.child_or_insert(
        |el| el.name == flocat_tag,
        || Element::new(flocat_tag.clone()).with_attr("LOCTYPE", "URL"),
    );
    flocat.set_attr(names.xlink("href"), url);
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl MetsDocument {
    /// A fresh document stamped with the current time.
    #[must_use]
    pub fn empty() -> Self {
        Self::empty_at(&now_rfc3339())
    }

    /// A fresh document whose header records `now` as creation date.
    #[must_use]
    pub fn empty_at(now: &str) -> Self {
        let names = Names::canonical();
        let creator = Agent::software(format!("folio v{GENERATOR_VERSION}"), "CREATOR");
        let root = Element::new(names.mets("mets"))
            .with_attr("xmlns:mets", NS_METS)
            .with_attr("xmlns:mods", NS_MODS)
            .with_attr("xmlns:xlink", NS_XLINK)
            .with_attr("xmlns:xsi", NS_XSI)
            .with_attr("xsi:schemaLocation", SCHEMA_LOCATION)
            .with_child(
                Element::new(names.mets("metsHdr"))
                    .with_attr("CREATEDATE", now)
                    .with_child(creator.to_element(&names)),
            )
            .with_child(
                Element::new(names.mets("dmdSec"))
                    .with_attr("ID", "DMDLOG_0001")
                    .with_child(
                        Element::new(names.mets("mdWrap"))
                            .with_attr("MDTYPE", "MODS")
                            .with_child(
                                Element::new(names.mets("xmlData"))
                                    .with_child(Element::new(names.mods("mods"))),
                            ),
                    ),
            )
            .with_child(Element::new(names.mets("amdSec")).with_attr("ID", "AMD"))
            .with_child(Element::new(names.mets("fileSec")))
            .with_child(
                Element::new(names.mets("structMap"))
                    .with_attr("TYPE", "PHYSICAL")
                    .with_child(
                        Element::new(names.mets("div")).with_attr("TYPE", "physSequence"),
                    ),
            );
        Self {
            root,
            names,
            index: Index::default(),
            local_filenames: HashMap::new(),
        }
    }

    /// Parses a METS document.
    pub fn from_xml(content: &str) -> Result<Self, MetsError> {
        let (mut root, decls) = xml::parse(content)?;
        let names = Names::resolve(&mut root, &decls);
        if root.name != names.mets("mets") {
            return Err(MetsError::Xml(format!(
                "root element is <{}>, expected mets:mets",
                root.name
            )));
        }
        let mut doc = Self {
            root,
            names,
            index: Index::default(),
            local_filenames: HashMap::new(),
        };
        doc.reindex();
        Ok(doc)
    }

    pub fn to_xml(&self) -> Result<String, MetsError> {
        xml::serialize(&self.root)
    }

    fn reindex(&mut self) {
        let mut index = Index::default();
        let file_tag = self.names.mets("file");
        for group in file_groups_of(&self.root, &self.names) {
            let use_ = group.attr("USE").unwrap_or_default();
            for file in group.elements().filter(|el| el.name == file_tag) {
                let Some(id) = file.attr("ID") else {
                    warn!(file_grp = use_, "mets:file without ID");
                    continue;
                };
                if index.group_of.contains_key(id) {
                    warn!(id, "duplicate mets:file ID, keeping the first");
                    continue;
                }
                index.group_of.insert(id.to_string(), use_.to_string());
            }
        }
        if let Some(seq) = page_sequence(&self.root, &self.names) {
            let div_tag = self.names.mets("div");
            let fptr_tag = self.names.mets("fptr");
            for page in seq.elements().filter(|el| is_page(el, &div_tag)) {
                let page_id = page.attr("ID").unwrap_or_default().to_string();
                let ids: Vec<String> = page
                    .elements()
                    .filter(|el| el.name == fptr_tag)
                    .filter_map(|fptr| fptr.attr("FILEID").map(ToOwned::to_owned))
                    .collect();
                for id in &ids {
                    index
                        .page_of
                        .entry(id.clone())
                        .or_insert_with(|| page_id.clone());
                }
                index.pages.entry(page_id).or_default().extend(ids);
            }
        }
        debug!(
            files = index.group_of.len(),
            pages = index.pages.len(),
            "indexed METS document"
        );
        self.index = index;
    }

    fn snapshot(&self, file: &Element, file_grp: &str) -> MetsFile {
        let id = file.attr("ID").unwrap_or_default().to_string();
        MetsFile {
            file_grp: file_grp.to_string(),
            mimetype: file.attr("MIMETYPE").map(ToOwned::to_owned),
            url: flocat_href(file, &self.names),
            page_id: self.index.page_of.get(&id).cloned(),
            local_filename: self.local_filenames.get(&id).cloned(),
            id,
        }
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// Files matching `filter`, in document order.
    #[must_use]
    pub fn find_files(&self, filter: &FileFilter) -> Vec<MetsFile> {
        // a literal ID narrows the scan to the one group that can hold it
        let only_group = match &filter.id {
            Some(Matcher::Literal(id)) => match self.index.group_of.get(id) {
                Some(group) => Some(group.as_str()),
                None => return Vec::new(),
            },
            _ => None,
        };
        // pointers of the requested pages, not each file's first page
        let on_wanted_pages: Option<HashSet<&str>> = filter.page_ids.as_ref().map(|ids| {
            ids.iter()
                .filter_map(|page| self.index.pages.get(page))
                .flatten()
                .map(String::as_str)
                .collect()
        });
        let file_tag = self.names.mets("file");

        let mut found = Vec::new();
        for group in file_groups_of(&self.root, &self.names) {
            let use_ = group.attr("USE").unwrap_or_default();
            if only_group.is_some_and(|only| only != use_) {
                continue;
            }
            if filter.file_grp.as_ref().is_some_and(|m| !m.matches(use_)) {
                continue;
            }
            for file in group.elements().filter(|el| el.name == file_tag) {
                let id = file.attr("ID").unwrap_or_default();
                if filter.id.as_ref().is_some_and(|m| !m.matches(id)) {
                    continue;
                }
                if on_wanted_pages
                    .as_ref()
                    .is_some_and(|file_ids| !file_ids.contains(id))
                {
                    continue;
                }
                if filter
                    .mimetype
                    .as_ref()
                    .is_some_and(|m| !m.matches_opt(file.attr("MIMETYPE")))
                {
                    continue;
                }
                let url = flocat_href(file, &self.names);
                if filter
                    .url
                    .as_ref()
                    .is_some_and(|m| !m.matches_opt(url.as_deref()))
                {
                    continue;
                }
                if filter.local_only && !url.as_deref().is_some_and(is_local_url) {
                    continue;
                }
                found.push(self.snapshot(file, use_));
            }
        }
        found
    }

    #[must_use]
    pub fn find_file(&self, id: &str) -> Option<MetsFile> {
        self.find_files(&FileFilter::by_id(id)).into_iter().next()
    }

    /// `USE` of every file group, in document order.
    #[must_use]
    pub fn file_groups(&self) -> Vec<String> {
        file_groups_of(&self.root, &self.names)
            .into_iter()
            .filter_map(|group| group.attr("USE").map(ToOwned::to_owned))
            .collect()
    }

    /// IDs of all physical pages, in document order.
    #[must_use]
    pub fn physical_pages(&self) -> Vec<String> {
        self.index.pages.keys().cloned().collect()
    }

    /// Page IDs aligned with `file_ids`; `None` for files on no page.
    #[must_use]
    pub fn get_physical_pages(&self, file_ids: &[&str]) -> Vec<Option<String>> {
        file_ids
            .iter()
            .map(|id| self.get_physical_page_for_file(id))
            .collect()
    }

    #[must_use]
    pub fn get_physical_page_for_file(&self, file_id: &str) -> Option<String> {
        self.index.page_of.get(file_id).cloned()
    }

    /// The document's unique identifier, looked up by `mods:identifier/@type`
    /// in [`IDENTIFIER_PRIORITY`] order.
    #[must_use]
    pub fn unique_identifier(&self) -> Option<String> {
        let tag = self.names.mods("identifier");
        IDENTIFIER_PRIORITY.iter().find_map(|kind| {
            self.root
                .find(&|el| el.name == tag && el.has_attr("type", kind))
                .map(Element::text)
        })
    }

    #[must_use]
    pub fn agents(&self) -> Vec<Agent> {
        let hdr_tag = self.names.mets("metsHdr");
        let agent_tag = self.names.mets("agent");
        self.root
            .child(|el| el.name == hdr_tag)
            .map(|hdr| {
                hdr.elements()
                    .filter(|el| el.name == agent_tag)
                    .map(|el| Agent::from_element(el, &self.names))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // mutations
    // ------------------------------------------------------------------

    /// Replaces the value of the best-ranked existing identifier, or adds a
    /// `purl` identifier (creating the MODS section if needed).
    pub fn set_unique_identifier(&mut self, value: &str) {
        let id_tag = self.names.mods("identifier");
        for kind in IDENTIFIER_PRIORITY {
            if let Some(el) = self
                .root
                .find_mut(&|el| el.name == id_tag && el.has_attr("type", kind))
            {
                el.set_text(value);
                return;
            }
        }

        let mods_tag = self.names.mods("mods");
        if self.root.find(&|el| el.name == mods_tag).is_none() {
            let hdr_tag = self.names.mets("metsHdr");
            let pos = self
                .root
                .child_position(|el| el.name == hdr_tag)
                .map_or(0, |pos| pos + 1);
            let dmd = Element::new(self.names.mets("dmdSec"))
                .with_attr("ID", "DMDLOG_0001")
                .with_child(
                    Element::new(self.names.mets("mdWrap"))
                        .with_attr("MDTYPE", "MODS")
                        .with_child(
                            Element::new(self.names.mets("xmlData"))
                                .with_child(Element::new(mods_tag.clone())),
                        ),
                );
            self.root.insert(pos, dmd);
        }
        if let Some(mods) = self.root.find_mut(&|el| el.name == mods_tag) {
            mods.push(
                Element::new(id_tag.clone())
                    .with_attr("type", "purl")
                    .with_text(value),
            );
        }
    }

    /// Appends an agent to the METS header, creating the header if missing.
    pub fn add_agent(&mut self, agent: &Agent) {
        let hdr_tag = self.names.mets("metsHdr");
        let element = agent.to_element(&self.names);
        let hdr = match self.root.child_position(|el| el.name == hdr_tag) {
            Some(pos) => self.root.element_at_mut(pos),
            None => Some(self.root.insert(0, Element::new(hdr_tag.clone()))),
        };
        if let Some(hdr) = hdr {
            hdr.push(element);
        }
    }

    /// Ensures a file group with this `USE` exists. Idempotent.
    pub fn add_file_group(&mut self, use_: &str) -> Result<(), MetsError> {
        if use_.contains(',') {
            return Err(MetsError::ReservedCharacter(use_.to_string()));
        }
        if use_.is_empty() {
            return Err(MetsError::InvalidArgument(
                "mets:fileGrp USE must not be empty".to_string(),
            ));
        }
        let grp_tag = self.names.mets("fileGrp");
        file_sec_or_insert(&mut self.root, &self.names).child_or_insert(
            |el| el.name == grp_tag && el.has_attr("USE", use_),
            || Element::new(grp_tag.clone()).with_attr("USE", use_),
        );
        Ok(())
    }

    /// Removes a file group. Non-empty groups need `recursive`, which removes
    /// each contained file the way [`remove_file`](Self::remove_file) does.
    pub fn remove_file_group(&mut self, use_: &str, recursive: bool) -> Result<(), MetsError> {
        let file_tag = self.names.mets("file");
        let ids: Vec<String> = file_groups_of(&self.root, &self.names)
            .into_iter()
            .find(|group| group.has_attr("USE", use_))
            .ok_or_else(|| MetsError::FileGroupNotFound(use_.to_string()))?
            .elements()
            .filter(|el| el.name == file_tag)
            .filter_map(|el| el.attr("ID").map(ToOwned::to_owned))
            .collect();
        if !ids.is_empty() && !recursive {
            return Err(MetsError::FileGroupNotEmpty(use_.to_string()));
        }
        for id in &ids {
            self.remove_file(id)?;
        }

        let sec_tag = self.names.mets("fileSec");
        let grp_tag = self.names.mets("fileGrp");
        if let Some(sec) = self.root.child_mut(|el| el.name == sec_tag) {
            sec.remove_children(|el| el.name == grp_tag && el.has_attr("USE", use_));
        }
        info!(file_grp = use_, removed_files = ids.len(), "removed mets:fileGrp");
        Ok(())
    }

    /// Adds a file, or with `force` overwrites the entry that already has its ID.
    ///
    /// Unset optional fields leave an overwritten entry's values alone. An
    /// overwritten entry stays in the group it already belongs to.
    pub fn add_file(&mut self, new_file: NewFile) -> Result<MetsFile, MetsError> {
        let NewFile {
            file_grp,
            id,
            mimetype,
            url,
            page_id,
            local_filename,
            force,
        } = new_file;
        if id.is_empty() {
            return Err(MetsError::InvalidArgument(
                "mets:file ID must not be empty".to_string(),
            ));
        }
        let page_id = page_id.filter(|page_id| !page_id.is_empty());

        let file_tag = self.names.mets("file");
        if let Some(existing_group) = self.index.group_of.get(&id).cloned() {
            if !force {
                return Err(MetsError::DuplicateFile(id));
            }
            let file = file_group_mut(&mut self.root, &self.names, &existing_group)
                .and_then(|group| {
                    group.child_mut(|el| el.name == file_tag && el.has_attr("ID", &id))
                })
                .ok_or_else(|| MetsError::FileNotFound(id.clone()))?;
            if let Some(mimetype) = &mimetype {
                file.set_attr("MIMETYPE", mimetype.as_str());
            }
            if let Some(url) = &url {
                set_flocat_href(file, &self.names, url);
            }
            debug!(id = %id, file_grp = %existing_group, "overwrote mets:file");
        } else {
            self.add_file_group(&file_grp)?;
            let mut file = Element::new(file_tag).with_attr("ID", id.as_str());
            if let Some(mimetype) = &mimetype {
                file.set_attr("MIMETYPE", mimetype.as_str());
            }
            if let Some(url) = &url {
                set_flocat_href(&mut file, &self.names, url);
            }
            let group = file_group_mut(&mut self.root, &self.names, &file_grp)
                .ok_or_else(|| MetsError::FileGroupNotFound(file_grp.clone()))?;
            group.push(file);
            self.index.group_of.insert(id.clone(), file_grp.clone());
            debug!(id = %id, file_grp = %file_grp, "added mets:file");
        }

        if let Some(path) = local_filename {
            self.local_filenames.insert(id.clone(), path);
        }
        if let Some(page_id) = &page_id {
            self.set_physical_page_for_file(page_id, &id, None, None)?;
        }
        self.find_file(&id).ok_or(MetsError::FileNotFound(id))
    }

    /// Removes a file, its page pointers, and any page left without pointers.
    pub fn remove_file(&mut self, id: &str) -> Result<MetsFile, MetsError> {
        let removed = self
            .find_file(id)
            .ok_or_else(|| MetsError::FileNotFound(id.to_string()))?;

        let div_tag = self.names.mets("div");
        let fptr_tag = self.names.mets("fptr");
        let mut emptied = Vec::new();
        if let Some(seq) = page_sequence_mut(&mut self.root, &self.names) {
            for page in seq.elements_mut().filter(|el| is_page(el, &div_tag)) {
                let dropped =
                    page.remove_children(|el| el.name == fptr_tag && el.has_attr("FILEID", id));
                if dropped > 0 && !page.has_elements() {
                    emptied.push(page.attr("ID").unwrap_or_default().to_string());
                }
            }
            seq.remove_children(|el| {
                is_page(el, &div_tag)
                    && !el.has_elements()
                    && emptied.iter().any(|page| el.has_attr("ID", page))
            });
        }
        self.index.unlink_file(id);
        for page in &emptied {
            info!(page_id = %page, file_id = id, "removed empty physical page");
            self.index.pages.shift_remove(page);
        }

        let file_tag = self.names.mets("file");
        if let Some(group) = file_group_mut(&mut self.root, &self.names, &removed.file_grp) {
            group.remove_children(|el| el.name == file_tag && el.has_attr("ID", id));
        }
        self.index.group_of.remove(id);
        self.local_filenames.remove(id);
        info!(id, file_grp = %removed.file_grp, "removed mets:file");
        Ok(removed)
    }

    /// Points `file_id` at page `page_id`, dropping any earlier page pointer
    /// for it. A new page is created with `order`/`order_label`; an existing
    /// page keeps its attributes.
    pub fn set_physical_page_for_file(
        &mut self,
        page_id: &str,
        file_id: &str,
        order: Option<&str>,
        order_label: Option<&str>,
    ) -> Result<(), MetsError> {
        if !self.index.group_of.contains_key(file_id) {
            return Err(MetsError::FileNotFound(file_id.to_string()));
        }
        if page_id.is_empty() {
            return Err(MetsError::InvalidArgument(
                "page ID must not be empty".to_string(),
            ));
        }

        let map_tag = self.names.mets("structMap");
        let div_tag = self.names.mets("div");
        let fptr_tag = self.names.mets("fptr");

        if let Some(seq) = page_sequence_mut(&mut self.root, &self.names) {
            for page in seq.elements_mut().filter(|el| is_page(el, &div_tag)) {
                page.remove_children(|el| el.name == fptr_tag && el.has_attr("FILEID", file_id));
            }
        }
        self.index.unlink_file(file_id);

        let seq = self
            .root
            .child_or_insert(
                |el| el.name == map_tag && el.has_attr("TYPE", "PHYSICAL"),
                || Element::new(map_tag.clone()).with_attr("TYPE", "PHYSICAL"),
            )
            .child_or_insert(
                |el| el.name == div_tag && el.has_attr("TYPE", "physSequence"),
                || Element::new(div_tag.clone()).with_attr("TYPE", "physSequence"),
            );
        let page = seq.child_or_insert(
            |el| is_page(el, &div_tag) && el.has_attr("ID", page_id),
            || {
                let mut page = Element::new(div_tag.clone())
                    .with_attr("TYPE", "page")
                    .with_attr("ID", page_id);
                if let Some(order) = order {
                    page.set_attr("ORDER", order);
                }
                if let Some(label) = order_label {
                    page.set_attr("ORDERLABEL", label);
                }
                page
            },
        );
        page.push(Element::new(fptr_tag.clone()).with_attr("FILEID", file_id));

        self.index
            .page_of
            .insert(file_id.to_string(), page_id.to_string());
        self.index
            .pages
            .entry(page_id.to_string())
            .or_default()
            .push(file_id.to_string());
        Ok(())
    }

    /// Removes a physical page and its pointers. Absent pages are ignored.
    pub fn remove_physical_page(&mut self, page_id: &str) {
        let div_tag = self.names.mets("div");
        if let Some(seq) = page_sequence_mut(&mut self.root, &self.names) {
            seq.remove_children(|el| is_page(el, &div_tag) && el.has_attr("ID", page_id));
        }
        if let Some(ids) = self.index.pages.shift_remove(page_id) {
            for id in ids {
                if self.index.page_of.get(&id).is_some_and(|page| page == page_id) {
                    self.index.page_of.remove(&id);
                }
            }
        }
    }

    /// Rewrites the `FLocat` of an existing file.
    pub fn set_file_url(&mut self, id: &str, url: &str) -> Result<(), MetsError> {
        let group = self
            .index
            .group_of
            .get(id)
            .cloned()
            .ok_or_else(|| MetsError::FileNotFound(id.to_string()))?;
        let file_tag = self.names.mets("file");
        let file = file_group_mut(&mut self.root, &self.names, &group)
            .and_then(|group| group.child_mut(|el| el.name == file_tag && el.has_attr("ID", id)))
            .ok_or_else(|| MetsError::FileNotFound(id.to_string()))?;
        set_flocat_href(file, &self.names, url);
        Ok(())
    }

    /// Records where a file has been materialized. Not serialized.
    pub fn set_local_filename(&mut self, id: &str, path: PathBuf) -> Result<(), MetsError> {
        if !self.index.group_of.contains_key(id) {
            return Err(MetsError::FileNotFound(id.to_string()));
        }
        self.local_filenames.insert(id.to_string(), path);
        Ok(())
    }
}

impl Default for MetsDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for MetsDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetsDocument[fileGrps={:?},files={}]",
            self.file_groups(),
            self.index.group_of.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Matcher;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mets:mets xmlns:mets="http://www.loc.gov/METS/" xmlns:mods="http://www.loc.gov/mods/v3" xmlns:xlink="http://www.w3.org/1999/xlink">
  <mets:metsHdr CREATEDATE="2020-01-01T00:00:00">
    <mets:agent ROLE="CREATOR" TYPE="ORGANIZATION">
      <mets:name>Library</mets:name>
    </mets:agent>
  </mets:metsHdr>
  <mets:dmdSec ID="DMDLOG_0001">
    <mets:mdWrap MDTYPE="MODS">
      <mets:xmlData>
        <mods:mods>
          <mods:identifier type="urn">urn:nbn:de:1</mods:identifier>
          <mods:identifier type="purl">http://resolver.example/PPN1</mods:identifier>
        </mods:mods>
      </mets:xmlData>
    </mets:mdWrap>
  </mets:dmdSec>
  <mets:fileSec>
    <mets:fileGrp USE="OCR-D-IMG">
      <mets:file ID="FILE_0001_IMAGE" MIMETYPE="image/tiff">
        <mets:FLocat LOCTYPE="URL" xlink:href="https://example.org/0001.tif"/>
      </mets:file>
      <mets:file ID="FILE_0002_IMAGE" MIMETYPE="image/tiff">
        <mets:FLocat LOCTYPE="URL" xlink:href="OCR-D-IMG/FILE_0002_IMAGE"/>
      </mets:file>
    </mets:fileGrp>
    <mets:fileGrp USE="OCR-D-GT-PAGE">
      <mets:file ID="FILE_0001_PAGE" MIMETYPE="application/vnd.prima.page+xml">
        <mets:FLocat LOCTYPE="URL" xlink:href="file:///data/0001.xml"/>
      </mets:file>
    </mets:fileGrp>
  </mets:fileSec>
  <mets:structMap TYPE="PHYSICAL">
    <mets:div TYPE="physSequence">
      <mets:div TYPE="page" ID="PHYS_0001" ORDER="1">
        <mets:fptr FILEID="FILE_0001_IMAGE"/>
        <mets:fptr FILEID="FILE_0001_PAGE"/>
      </mets:div>
      <mets:div TYPE="page" ID="PHYS_0002" ORDER="2">
        <mets:fptr FILEID="FILE_0002_IMAGE"/>
      </mets:div>
    </mets:div>
  </mets:structMap>
</mets:mets>
"#;

    fn sample() -> MetsDocument {
        MetsDocument::from_xml(SAMPLE).expect("sample parses")
    }

    fn ids(files: &[MetsFile]) -> Vec<&str> {
        files.iter().map(|f| f.id.as_str()).collect()
    }

    #[test]
    fn empty_document_has_no_files_or_pages() {
        let doc = MetsDocument::empty_at("2024-01-01T00:00:00Z");
        assert!(doc.find_files(&FileFilter::new()).is_empty());
        assert!(doc.physical_pages().is_empty());
        assert!(doc.file_groups().is_empty());
        assert_eq!(doc.unique_identifier(), None);
        let agents = doc.agents();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].role.as_deref(), Some("CREATOR"));
        assert!(agents[0].name.as_deref().unwrap_or_default().starts_with("folio v"));
    }

    #[test]
    fn empty_document_survives_serialization() -> anyhow::Result<()> {
        let doc = MetsDocument::empty_at("2024-01-01T00:00:00Z");
        let xml = doc.to_xml()?;
        assert!(xml.contains(r#"CREATEDATE="2024-01-01T00:00:00Z""#));
        let reparsed = MetsDocument::from_xml(&xml)?;
        assert_eq!(reparsed.agents(), doc.agents());
        Ok(())
    }

    #[test]
    fn parses_files_pages_and_identifier() {
        let doc = sample();
        assert_eq!(doc.file_groups(), vec!["OCR-D-IMG", "OCR-D-GT-PAGE"]);
        assert_eq!(doc.physical_pages(), vec!["PHYS_0001", "PHYS_0002"]);
        assert_eq!(
            doc.unique_identifier().as_deref(),
            Some("http://resolver.example/PPN1")
        );
        let all = doc.find_files(&FileFilter::new());
        assert_eq!(
            ids(&all),
            vec!["FILE_0001_IMAGE", "FILE_0002_IMAGE", "FILE_0001_PAGE"]
        );
        assert_eq!(all[0].page_id.as_deref(), Some("PHYS_0001"));
        assert_eq!(all[0].url.as_deref(), Some("https://example.org/0001.tif"));
        assert_eq!(doc.agents()[0].name.as_deref(), Some("Library"));
    }

    #[test]
    fn find_files_by_each_criterion() -> anyhow::Result<()> {
        let doc = sample();
        let by_grp = doc.find_files(&FileFilter::new().file_grp(Matcher::parse("OCR-D-IMG")?));
        assert_eq!(ids(&by_grp), vec!["FILE_0001_IMAGE", "FILE_0002_IMAGE"]);

        let by_regex = doc.find_files(&FileFilter::new().id(Matcher::parse("//FILE_0001_.*")?));
        assert_eq!(ids(&by_regex), vec!["FILE_0001_IMAGE", "FILE_0001_PAGE"]);

        let by_page = doc.find_files(&FileFilter::new().page_id("PHYS_0001")?);
        assert_eq!(ids(&by_page), vec!["FILE_0001_IMAGE", "FILE_0001_PAGE"]);

        let by_pages = doc.find_files(&FileFilter::new().page_id("PHYS_0001,PHYS_0002")?);
        assert_eq!(by_pages.len(), 3);

        let by_unknown_page = doc.find_files(&FileFilter::new().page_id("PHYS_9999")?);
        assert!(by_unknown_page.is_empty());

        let by_mime = doc.find_files(&FileFilter::new().mimetype(Matcher::parse("//image/.*")?));
        assert_eq!(by_mime.len(), 2);

        let by_url =
            doc.find_files(&FileFilter::new().url(Matcher::parse("https://example.org/0001.tif")?));
        assert_eq!(ids(&by_url), vec!["FILE_0001_IMAGE"]);

        let local = doc.find_files(&FileFilter::new().local_only(true));
        assert_eq!(ids(&local), vec!["FILE_0002_IMAGE", "FILE_0001_PAGE"]);

        let combined = doc.find_files(
            &FileFilter::new()
                .file_grp(Matcher::parse("OCR-D-IMG")?)
                .page_id("PHYS_0001")?,
        );
        assert_eq!(ids(&combined), vec!["FILE_0001_IMAGE"]);
        Ok(())
    }

    #[test]
    fn literal_and_regex_id_queries_agree() -> anyhow::Result<()> {
        let doc = sample();
        let literal = doc.find_files(&FileFilter::new().id(Matcher::parse("FILE_0002_IMAGE")?));
        let regex = doc.find_files(&FileFilter::new().id(Matcher::parse("//FILE_0002_IMAGE")?));
        assert_eq!(literal, regex);
        assert_eq!(literal.len(), 1);
        Ok(())
    }

    #[test]
    fn file_shared_by_two_pages_is_found_on_both() -> anyhow::Result<()> {
        let shared = SAMPLE.replace(
            r#"<mets:fptr FILEID="FILE_0002_IMAGE"/>"#,
            r#"<mets:fptr FILEID="FILE_0002_IMAGE"/>
        <mets:fptr FILEID="FILE_0001_PAGE"/>"#,
        );
        let doc = MetsDocument::from_xml(&shared)?;
        let on_second = doc.find_files(&FileFilter::new().page_id("PHYS_0002")?);
        assert_eq!(ids(&on_second), vec!["FILE_0002_IMAGE", "FILE_0001_PAGE"]);
        let on_first = doc.find_files(&FileFilter::new().page_id("PHYS_0001")?);
        assert_eq!(ids(&on_first), vec!["FILE_0001_IMAGE", "FILE_0001_PAGE"]);
        Ok(())
    }

    #[test]
    fn empty_page_filter_matches_every_file() -> anyhow::Result<()> {
        let doc = sample();
        let all = doc.find_files(&FileFilter::new().page_id("")?);
        assert_eq!(all.len(), 3);
        Ok(())
    }

    #[test]
    fn empty_page_id_on_add_means_no_page() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        let added = doc.add_file(NewFile::new("OCR-D-IMG", "f1").page_id(""))?;
        assert_eq!(added.page_id, None);
        assert!(doc.find_file("f1").is_some());
        assert!(doc.physical_pages().is_empty());
        Ok(())
    }

    #[test]
    fn add_file_then_find_by_id() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        let added = doc.add_file(
            NewFile::new("OCR-D-IMG", "f1")
                .mimetype("image/png")
                .url("https://example.org/f1.png")
                .local_filename("/tmp/f1.png"),
        )?;
        let found = doc.find_files(&FileFilter::by_id("f1"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], added);
        assert_eq!(found[0].file_grp, "OCR-D-IMG");
        assert_eq!(found[0].mimetype.as_deref(), Some("image/png"));
        assert_eq!(found[0].url.as_deref(), Some("https://example.org/f1.png"));
        assert_eq!(
            found[0].local_filename.as_deref(),
            Some(std::path::Path::new("/tmp/f1.png"))
        );
        Ok(())
    }

    #[test]
    fn add_file_rejects_empty_and_duplicate_ids() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        let err = doc
            .add_file(NewFile::new("OCR-D-IMG", ""))
            .expect_err("empty id");
        assert!(err.is_invalid_argument());

        doc.add_file(NewFile::new("OCR-D-IMG", "f1").mimetype("image/png"))?;
        let err = doc
            .add_file(NewFile::new("OCR-D-IMG", "f1"))
            .expect_err("duplicate id");
        assert_eq!(err, MetsError::DuplicateFile("f1".to_string()));
        assert!(err.is_conflict());
        Ok(())
    }

    #[test]
    fn forced_add_overwrites_in_place() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        doc.add_file(
            NewFile::new("OCR-D-IMG", "f1")
                .mimetype("image/png")
                .url("a.png"),
        )?;
        doc.add_file(NewFile::new("OCR-D-IMG", "f2").mimetype("image/png"))?;
        let updated = doc.add_file(
            NewFile::new("OCR-D-IMG", "f1")
                .mimetype("image/tiff")
                .url("b.tif")
                .force(true),
        )?;
        assert_eq!(updated.mimetype.as_deref(), Some("image/tiff"));
        assert_eq!(updated.url.as_deref(), Some("b.tif"));
        let all = doc.find_files(&FileFilter::new());
        assert_eq!(ids(&all), vec!["f1", "f2"]);
        Ok(())
    }

    #[test]
    fn file_group_is_idempotent_and_rejects_commas() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        doc.add_file_group("FOO")?;
        doc.add_file_group("FOO")?;
        assert_eq!(doc.file_groups(), vec!["FOO"]);
        let err = doc.add_file_group("FOO,BAR").expect_err("comma");
        assert!(err.is_conflict());
        Ok(())
    }

    #[test]
    fn remove_file_group_requires_recursive_when_populated() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        doc.add_file(
            NewFile::new("OCR-D-IMG", "f1")
                .mimetype("image/png")
                .page_id("p1"),
        )?;
        let err = doc
            .remove_file_group("OCR-D-IMG", false)
            .expect_err("non-empty group");
        assert!(err.is_conflict());
        doc.remove_file_group("OCR-D-IMG", true)?;
        assert!(doc.find_files(&FileFilter::new()).is_empty());
        assert!(doc.file_groups().is_empty());
        assert!(doc.physical_pages().is_empty());

        let err = doc
            .remove_file_group("OCR-D-IMG", true)
            .expect_err("already gone");
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn remove_file_cascades_to_empty_pages() -> anyhow::Result<()> {
        let mut doc = sample();
        let removed = doc.remove_file("FILE_0002_IMAGE")?;
        assert_eq!(removed.page_id.as_deref(), Some("PHYS_0002"));
        assert_eq!(doc.get_physical_page_for_file("FILE_0002_IMAGE"), None);
        assert_eq!(doc.physical_pages(), vec!["PHYS_0001"]);

        doc.remove_file("FILE_0001_IMAGE")?;
        assert_eq!(doc.physical_pages(), vec!["PHYS_0001"]);
        assert_eq!(
            doc.find_files(&FileFilter::new().page_id("PHYS_0001")?)
                .len(),
            1
        );

        let xml = doc.to_xml()?;
        assert!(!xml.contains("PHYS_0002"));
        assert!(!xml.contains(r#"FILEID="FILE_0001_IMAGE""#));

        let err = doc.remove_file("FILE_0001_IMAGE").expect_err("gone");
        assert_eq!(err, MetsError::FileNotFound("FILE_0001_IMAGE".to_string()));
        Ok(())
    }

    #[test]
    fn setting_a_page_twice_keeps_only_the_latest() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        doc.add_file(NewFile::new("OCR-D-IMG", "f1").mimetype("image/png"))?;
        doc.set_physical_page_for_file("p1", "f1", Some("1"), Some("one"))?;
        doc.set_physical_page_for_file("p2", "f1", None, None)?;
        assert_eq!(doc.get_physical_page_for_file("f1").as_deref(), Some("p2"));
        assert!(doc
            .find_files(&FileFilter::new().page_id("p1")?)
            .is_empty());

        let xml = doc.to_xml()?;
        assert_eq!(xml.matches(r#"FILEID="f1""#).count(), 1);
        assert!(xml.contains(r#"ORDER="1""#));
        Ok(())
    }

    #[test]
    fn existing_page_keeps_its_attributes() -> anyhow::Result<()> {
        let mut doc = MetsDocument::empty();
        doc.add_file(NewFile::new("OCR-D-IMG", "img").mimetype("image/png"))?;
        doc.add_file(NewFile::new("OCR-D-OCR", "ocr").mimetype("application/xml"))?;
        doc.set_physical_page_for_file("p1", "img", Some("1"), Some("i"))?;
        doc.set_physical_page_for_file("p1", "ocr", Some("7"), Some("vii"))?;
        let xml = doc.to_xml()?;
        assert!(xml.contains(r#"ORDER="1""#));
        assert!(!xml.contains(r#"ORDER="7""#));
        assert_eq!(
            doc.get_physical_pages(&["img", "ocr", "missing"]),
            vec![Some("p1".to_string()), Some("p1".to_string()), None]
        );
        Ok(())
    }

    #[test]
    fn remove_physical_page_is_lenient() -> anyhow::Result<()> {
        let mut doc = sample();
        doc.remove_physical_page("PHYS_0001");
        doc.remove_physical_page("PHYS_9999");
        assert_eq!(doc.physical_pages(), vec!["PHYS_0002"]);
        assert_eq!(doc.get_physical_page_for_file("FILE_0001_IMAGE"), None);
        assert_eq!(doc.find_files(&FileFilter::new()).len(), 3);
        Ok(())
    }

    #[test]
    fn unique_identifier_reuses_best_slot_or_adds_purl() -> anyhow::Result<()> {
        let mut doc = sample();
        doc.set_unique_identifier("http://resolver.example/PPN2");
        assert_eq!(
            doc.unique_identifier().as_deref(),
            Some("http://resolver.example/PPN2")
        );
        assert!(doc.to_xml()?.contains("urn:nbn:de:1"));

        let mut empty = MetsDocument::empty();
        empty.set_unique_identifier("foobar");
        assert_eq!(empty.unique_identifier().as_deref(), Some("foobar"));
        assert!(empty.to_xml()?.contains(r#"<mods:identifier type="purl">foobar"#));
        Ok(())
    }

    #[test]
    fn agents_are_appended_in_order() {
        let mut doc = sample();
        doc.add_agent(&Agent::software("ocrd-dummy", "OTHER").with_note("parameters: {}"));
        let agents = doc.agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[1].name.as_deref(), Some("ocrd-dummy"));
        assert_eq!(agents[1].notes, vec!["parameters: {}"]);
    }

    #[test]
    fn handles_default_namespace_documents() -> anyhow::Result<()> {
        let xml = r#"<mets xmlns="http://www.loc.gov/METS/">
  <fileSec><fileGrp USE="IMG"><file ID="a" MIMETYPE="image/png"/></fileGrp></fileSec>
</mets>"#;
        let mut doc = MetsDocument::from_xml(xml)?;
        assert_eq!(ids(&doc.find_files(&FileFilter::new())), vec!["a"]);
        doc.set_file_url("a", "https://example.org/a.png")?;
        doc.add_file(NewFile::new("IMG", "b").page_id("p1"))?;
        let out = doc.to_xml()?;
        assert!(out.contains("xmlns:xlink"));
        assert!(out.contains(r#"<div TYPE="page" ID="p1">"#));
        let reparsed = MetsDocument::from_xml(&out)?;
        assert_eq!(
            reparsed.find_file("a").and_then(|f| f.url).as_deref(),
            Some("https://example.org/a.png")
        );
        assert_eq!(reparsed.get_physical_page_for_file("b").as_deref(), Some("p1"));
        Ok(())
    }

    #[test]
    fn rejects_non_mets_roots() {
        let err = MetsDocument::from_xml("<html/>").expect_err("not mets");
        assert!(matches!(err, MetsError::Xml(_)));
    }

    #[test]
    fn mutations_survive_a_round_trip() -> anyhow::Result<()> {
        let mut doc = sample();
        doc.add_file(
            NewFile::new("OCR-D-OCR", "FILE_0002_OCR")
                .mimetype("application/vnd.prima.page+xml")
                .url("OCR-D-OCR/FILE_0002_OCR.xml")
                .page_id("PHYS_0002"),
        )?;
        doc.remove_file("FILE_0001_PAGE")?;
        let reparsed = MetsDocument::from_xml(&doc.to_xml()?)?;
        assert_eq!(
            ids(&reparsed.find_files(&FileFilter::new())),
            ids(&doc.find_files(&FileFilter::new()))
        );
        assert_eq!(
            reparsed.get_physical_page_for_file("FILE_0002_OCR").as_deref(),
            Some("PHYS_0002")
        );
        Ok(())
    }
}
