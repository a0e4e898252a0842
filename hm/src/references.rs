use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ambient::{OUTPUT_DIR, PAGE_ID};
use crate::engine::{Engine, Frame, handler};
use crate::environment::MacroEnv;
use crate::error::{Result, RuntimeError};
use crate::node::{Marker, Node};
use crate::paths::{quote_plus, relative_to, to_url};
use crate::stream::{Position, Stream};

/// What an unresolved reference renders as.
pub const UNRESOLVED: &str = "<B>(?? reference ??)</B>";

/// A labelled place in the output: a whole page, or an anchor inside one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    pub id: String,
    /// Display text used when a reference gives none, e.g. `2.1` or a page title.
    pub autoname: String,
    /// Label of the page holding the target.
    pub label: String,
    pub dir: PathBuf,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl LinkReference {
    /// The name `\ref` looks this target up by.
    pub fn name(&self) -> String {
        match &self.anchor {
            Some(anchor) => format!("{}#{}", self.label, anchor),
            None => self.label.clone(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }

    /// A hyperlink to this target from a page written in `from_dir`.
    pub fn relative_link(&self, from_dir: &Path, inner: Node) -> Node {
        let mut href = to_url(&relative_to(&self.path(), from_dir));
        if let Some(anchor) = &self.anchor {
            href.push('#');
            href.push_str(&quote_plus(anchor));
        }
        Node::text(format!("<A HREF=\"{}\">", href)) + inner + Node::text("</A>")
    }

    /// The link target placed in the page, empty for whole-page targets.
    pub fn anchor_node(&self) -> Node {
        match &self.anchor {
            Some(anchor) => Node::text(format!("<A NAME=\"{}\"></A>", quote_plus(anchor))),
            None => Node::text(""),
        }
    }
}

/// Every label defined by a run, indexed both ways.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTable {
    #[serde(default)]
    pub by_label: BTreeMap<String, LinkReference>,
    #[serde(default)]
    pub by_id: BTreeMap<String, LinkReference>,
}

impl ReferenceTable {
    /// Read a table written by an earlier run. A missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(ReferenceTable::default());
        }
        let content = fs::read_to_string(path)?;
        let table = toml::from_str(&content).map_err(|e| {
            RuntimeError::Custom(format!(
                "cannot read reference file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string(self).map_err(|e| {
            RuntimeError::Custom(format!(
                "cannot write reference file {}: {}",
                path.display(),
                e
            ))
        })?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn insert(&mut self, reference: LinkReference) {
        self.by_label.insert(reference.name(), reference.clone());
        self.by_id.insert(reference.id.clone(), reference);
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}

/// The next `\label` names this.
#[derive(Debug, Clone)]
enum Pending {
    Page {
        id: String,
        filename: String,
        dir: PathBuf,
    },
    Anchor {
        id: String,
        autoname: String,
        page: LinkReference,
    },
}

/// Reference state of one run: the table being built, the table read from
/// the previous run, and the object waiting for a label.
#[derive(Debug, Default)]
pub struct References {
    current: ReferenceTable,
    previous: ReferenceTable,
    pending: Option<Pending>,
}

impl References {
    pub fn new(previous: ReferenceTable) -> Self {
        References {
            current: ReferenceTable::default(),
            previous,
            pending: None,
        }
    }

    pub fn current(&self) -> &ReferenceTable {
        &self.current
    }

    pub fn previous(&self) -> &ReferenceTable {
        &self.previous
    }

    /// Whether this run produced a table different from the one it started with.
    pub fn labels_changed(&self) -> bool {
        self.current != self.previous
    }

    pub fn set_page_reference(&mut self, id: &str, filename: &str, dir: &Path) {
        self.pending = Some(Pending::Page {
            id: id.to_string(),
            filename: filename.to_string(),
            dir: dir.to_path_buf(),
        });
    }

    /// Make an anchor inside the labelled page `page_id` the next label target.
    pub fn set_anchor_reference(
        &mut self,
        id: &str,
        autoname: &str,
        page_id: &str,
    ) -> Result<(), RuntimeError> {
        let page = self.page_or_error(page_id)?.clone();
        self.pending = Some(Pending::Anchor {
            id: id.to_string(),
            autoname: autoname.to_string(),
            page,
        });
        Ok(())
    }

    /// Bind `name` to the pending target and return the new entry.
    pub fn label(&mut self, name: &str) -> Result<LinkReference, RuntimeError> {
        let reference = match self.pending.take() {
            None => return Err(RuntimeError::DanglingLabel(name.to_string())),
            Some(Pending::Page { id, filename, dir }) => LinkReference {
                id,
                autoname: name.to_string(),
                label: name.to_string(),
                dir,
                filename,
                anchor: None,
            },
            Some(Pending::Anchor { id, autoname, page }) => LinkReference {
                id,
                autoname,
                label: page.label,
                dir: page.dir,
                filename: page.filename,
                anchor: Some(name.to_string()),
            },
        };
        self.current.insert(reference.clone());
        Ok(reference)
    }

    /// Create and label an anchor in one step.
    pub fn make_label(
        &mut self,
        id: &str,
        anchor: &str,
        autoname: &str,
        page_id: &str,
    ) -> Result<LinkReference, RuntimeError> {
        self.set_anchor_reference(id, autoname, page_id)?;
        self.label(anchor)
    }

    /// The labelled page with identifier `id` in this run.
    pub fn page(&self, id: &str) -> Option<&LinkReference> {
        self.current.by_id.get(id).filter(|r| r.anchor.is_none())
    }

    fn page_or_error(&self, page_id: &str) -> Result<&LinkReference, RuntimeError> {
        self.page(page_id)
            .ok_or_else(|| RuntimeError::MissingRequiredField {
                field: "\\label".to_string(),
                context: format!("page {}", page_id),
            })
    }

    /// Replace the display text of the entry with identifier `id`.
    pub fn retitle(&mut self, id: &str, title: &str) {
        if let Some(reference) = self.current.by_id.get_mut(id) {
            reference.autoname = title.to_string();
            let name = reference.name();
            if let Some(by_label) = self.current.by_label.get_mut(&name) {
                by_label.autoname = title.to_string();
            }
        }
    }

    /// Look a label up in this run, then in the previous one.
    pub fn resolve(&self, label: &str) -> Option<&LinkReference> {
        self.current
            .by_label
            .get(label)
            .or_else(|| self.previous.by_label.get(label))
    }

    pub fn display_text_for(&self, label: &str) -> Option<String> {
        self.resolve(label).map(|r| r.autoname.clone())
    }

    /// The anchor for `id`. Empty when no run has labelled it yet.
    pub fn anchor_for(&self, id: &str) -> Node {
        self.current
            .by_id
            .get(id)
            .or_else(|| self.previous.by_id.get(id))
            .map(LinkReference::anchor_node)
            .unwrap_or_else(|| Node::text(""))
    }

    /// A link to `label` from `from_dir`, or `None` when the label is unknown.
    pub fn link_to(&self, label: &str, text: Option<Node>, from_dir: &Path) -> Option<Node> {
        let target = self.resolve(label)?;
        let inner = text.unwrap_or_else(|| Node::text(target.autoname.clone()));
        Some(target.relative_link(from_dir, inner))
    }
}

/// A deferred link to the label `name` evaluates to, shown as `text` or as the
/// target's display text. A leading `#` refers to an anchor on the current page.
/// Unknown labels warn and render as [`UNRESOLVED`].
pub fn reference(
    position: Option<Position>,
    macros: MacroEnv,
    name: Node,
    text: Option<Node>,
) -> Node {
    Node::deferred(position.clone(), move |engine, bindings| {
        let mut label = engine.static_text(&name, bindings, "reference name")?;
        if label.starts_with('#') {
            let page = macros
                .text(PAGE_ID)
                .and_then(|id| engine.references().page(&id).map(|p| p.label.clone()));
            match page {
                Some(page) => label = format!("{}{}", page, label),
                None => {
                    engine.warn(
                        format!("reference '{}' used outside a labelled page", label),
                        position.clone(),
                    );
                    return Ok(Node::text(UNRESOLVED));
                }
            }
        }
        let text = match &text {
            Some(text) => Some(text.evaluate(engine, bindings)?),
            None => None,
        };
        let from_dir = macros.path(OUTPUT_DIR).unwrap_or_default();
        match engine.references().link_to(&label, text, &from_dir) {
            Some(link) => Ok(link),
            None => {
                engine.warn(format!("no such reference '{}'", label), position.clone());
                Ok(Node::text(UNRESOLVED))
            }
        }
    })
}

fn label(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let global = engine.global_chars().clone();
    let name = engine.parse_argument(stream, &frame.with_chars(&global), "label name")?;
    Ok(Node::deferred(Some(position), move |engine, bindings| {
        let name = engine.static_text(&name, bindings, "label name")?;
        engine.references_mut().label(&name)?;
        Ok(Node::marker(Marker::InhibitParagraph))
    }))
}

fn ref_(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let position = stream.position();
    let text = engine.read_bracket_args(stream, frame)?;
    let global = engine.global_chars().clone();
    let name = engine.parse_argument(stream, &frame.with_chars(&global), "reference name")?;
    Ok(reference(Some(position), frame.macros.clone(), name, text))
}

fn link(engine: &mut Engine, stream: &mut dyn Stream, frame: &Frame<'_>) -> Result<Node> {
    let text = engine.read_bracket_args(stream, frame)?;
    let global = engine.global_chars().clone();
    let url = engine.parse_argument(stream, &frame.with_chars(&global), "link target")?;
    let inner = text.unwrap_or_else(|| url.clone());
    Ok(Node::text("<A HREF=\"") + url + Node::text("\">") + inner + Node::text("</A>"))
}

pub(crate) fn install(engine: &mut Engine) {
    engine.register_macro("label", handler(label));
    engine.register_macro("ref", handler(ref_));
    engine.register_macro("link", handler(link));
}
