//! In-memory copy of the Rhythmbox database (`rhythmdb.xml`).
//!
//! The file is parsed once with `roxmltree` into an owned, mutable tree.
//! Everything the sync does not touch is carried through to the rewritten
//! file unchanged: podcast entries, unknown children, whitespace, comments,
//! and whatever surrounds the root element (DOCTYPE, processing
//! instructions). Character references inside text are the one exception;
//! they come back as literal characters.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SyncError};

const DEFAULT_DECLARATION: &str = r#"<?xml version="1.0" standalone="yes"?>"#;

// ============================================================================
// Tree
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_text(name: &str, text: &str) -> Self {
        let mut el = Self::new(name);
        el.children.push(XmlNode::Text(text.to_string()));
        el
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenation of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn find(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Text of the first child element called `name`.
    pub fn child_text(&self, name: &str) -> Option<String> {
        self.find(name).map(Element::text)
    }

    /// Replaces the text of the first `name` child, appending the child if it
    /// does not exist yet.
    pub fn set_child_text(&mut self, name: &str, text: &str) {
        let existing = self.children.iter_mut().find_map(|c| match c {
            XmlNode::Element(e) if e.name == name => Some(e),
            _ => None,
        });
        match existing {
            Some(el) => {
                el.children = vec![XmlNode::Text(text.to_string())];
            }
            None => self.append_child(Element::with_text(name, text)),
        }
    }

    /// Appends an element, reusing the indentation of existing children so a
    /// pretty-printed file stays pretty.
    pub fn append_child(&mut self, child: Element) {
        let indent = self.children.iter().find_map(|c| match c {
            XmlNode::Text(t) if t.trim().is_empty() && t.contains('\n') => Some(t.clone()),
            _ => None,
        });
        let trailing_ws = matches!(
            self.children.last(),
            Some(XmlNode::Text(t)) if t.trim().is_empty()
        );

        match indent {
            Some(indent) if trailing_ws => {
                let at = self.children.len() - 1;
                self.children.insert(at, XmlNode::Element(child));
                self.children.insert(at, XmlNode::Text(indent));
            }
            _ => self.children.push(XmlNode::Element(child)),
        }
    }

    /// Element child at `index` in `children` (counting all node kinds).
    pub fn child_element(&self, index: usize) -> Option<&Element> {
        match self.children.get(index) {
            Some(XmlNode::Element(e)) => Some(e),
            _ => None,
        }
    }

    pub fn child_element_mut(&mut self, index: usize) -> Option<&mut Element> {
        match self.children.get_mut(index) {
            Some(XmlNode::Element(e)) => Some(e),
            _ => None,
        }
    }
}

/// Position of an element in the tree: child indices walked from the root.
///
/// The empty path is the root itself. Paths sort in document order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        NodePath(path)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

// ============================================================================
// Library
// ============================================================================

/// The loaded database file plus where it came from.
#[derive(Clone, Debug)]
pub struct Library {
    path: PathBuf,
    declaration: String,
    /// Raw source between the declaration and the root element.
    prolog: String,
    /// Raw source after the root element.
    epilog: String,
    root: Element,
}

impl Library {
    /// Reads and parses the database file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|e| {
            SyncError::Library(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut library = Self::parse(&source)?;
        library.path = path.to_path_buf();
        log::debug!(
            "Loaded {} entries from {}",
            library.entry_count(),
            path.display()
        );
        Ok(library)
    }

    /// Parses database XML that did not come from a file.
    pub fn parse(source: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(source)
            .map_err(|e| SyncError::Library(format!("invalid XML: {}", e)))?;
        let root_node = doc.root_element();
        let root = convert(root_node);
        let range = root_node.range();

        let trimmed = source.trim_start();
        let offset = source.len() - trimmed.len();
        let (declaration, prolog) = match trimmed
            .strip_prefix("<?xml")
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .and_then(|rest| rest.find("?>"))
        {
            Some(end) => {
                let decl_end = offset + "<?xml".len() + end + "?>".len();
                (
                    source[offset..decl_end].to_string(),
                    source[decl_end..range.start].to_string(),
                )
            }
            None => (
                DEFAULT_DECLARATION.to_string(),
                format!("\n{}", &source[offset..range.start]),
            ),
        };

        Ok(Self {
            path: PathBuf::new(),
            declaration,
            prolog,
            epilog: source[range.end..].to_string(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn get(&self, path: &NodePath) -> Option<&Element> {
        let mut el = &self.root;
        for &i in &path.0 {
            el = el.child_element(i)?;
        }
        Some(el)
    }

    pub fn get_mut(&mut self, path: &NodePath) -> Option<&mut Element> {
        let mut el = &mut self.root;
        for &i in &path.0 {
            el = el.child_element_mut(i)?;
        }
        Some(el)
    }

    /// Number of `<entry type="song">` elements directly under the root.
    pub fn entry_count(&self) -> usize {
        self.root
            .elements()
            .filter(|e| e.name == "entry" && e.attribute("type") == Some("song"))
            .count()
    }

    /// Renders the whole document, declaration included.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str(&self.declaration);
        out.push_str(&self.prolog);
        write_element(&mut out, &self.root);
        out.push_str(&self.epilog);
        out
    }

    /// Writes the tree back over the file it was loaded from.
    ///
    /// With `backup_suffix`, the current file is first copied to
    /// `<path>.backup-<suffix>` and that path is returned. The new content is
    /// written to a sibling temp file and renamed into place.
    pub fn save(&self, backup_suffix: Option<&str>) -> Result<Option<PathBuf>> {
        if self.path.as_os_str().is_empty() {
            return Err(SyncError::Library(
                "library was not loaded from a file".to_string(),
            ));
        }

        let backup = match backup_suffix {
            Some(suffix) => {
                let backup = backup_path(&self.path, suffix);
                fs::copy(&self.path, &backup)?;
                log::info!("Backed up {} to {}", self.path.display(), backup.display());
                Some(backup)
            }
            None => None,
        };

        let tmp = sibling_with_suffix(&self.path, ".rbsync-tmp");
        fs::write(&tmp, self.to_xml())?;
        fs::rename(&tmp, &self.path)?;
        log::info!("Wrote {}", self.path.display());

        Ok(backup)
    }
}

/// `<path>.backup-<suffix>`, next to the database.
pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    sibling_with_suffix(path, &format!(".backup-{}", suffix))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

// ============================================================================
// Parsing / Serialization
// ============================================================================

fn convert(node: roxmltree::Node) -> Element {
    let mut el = Element::new(node.tag_name().name());
    el.attributes = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();

    for child in node.children() {
        if child.is_element() {
            el.children.push(XmlNode::Element(convert(child)));
        } else if child.is_text() {
            if let Some(t) = child.text() {
                el.children.push(XmlNode::Text(t.to_string()));
            }
        } else if child.is_comment() {
            if let Some(t) = child.text() {
                el.children.push(XmlNode::Comment(t.to_string()));
            }
        }
    }
    el
}

fn write_element(out: &mut String, el: &Element) {
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attributes {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape(v, true));
        out.push('"');
    }
    if el.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &el.children {
        match child {
            XmlNode::Element(e) => write_element(out, e),
            XmlNode::Text(t) => out.push_str(&escape(t, false)),
            XmlNode::Comment(c) => {
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
            }
        }
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" standalone="yes"?>
<rhythmdb version="2.0">
  <entry type="song">
    <title>Song &amp; Dance</title>
    <artist>Artist</artist>
    <album>Album</album>
  </entry>
  <entry type="podcast-post">
    <title>Episode</title>
  </entry>
</rhythmdb>
"#;

    #[test]
    fn test_parse_and_query_children() {
        let lib = Library::parse(SAMPLE).unwrap();
        assert_eq!(lib.root().name, "rhythmdb");
        assert_eq!(lib.root().attribute("version"), Some("2.0"));
        assert_eq!(lib.entry_count(), 1);

        let entry = lib.root().find("entry").unwrap();
        assert_eq!(entry.child_text("title").as_deref(), Some("Song & Dance"));
        assert_eq!(entry.child_text("play-count"), None);
    }

    #[test]
    fn test_unmodified_tree_serializes_identically() {
        let lib = Library::parse(SAMPLE).unwrap();
        assert_eq!(lib.to_xml(), SAMPLE);
    }

    #[test]
    fn test_prolog_and_epilog_survive_rewrite() {
        let source = "<?xml version=\"1.0\"?>\n<!-- written by rhythmbox -->\n<?app keep?>\n\
                      <rhythmdb version=\"2.0\">\n  <entry type=\"song\"/>\n</rhythmdb>\n<!-- end -->\n";
        let mut lib = Library::parse(source).unwrap();
        assert_eq!(lib.to_xml(), source);

        lib.get_mut(&NodePath(vec![1]))
            .unwrap()
            .set_child_text("play-count", "1");
        let xml = lib.to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\"?>\n<!-- written by rhythmbox -->\n<?app keep?>\n<rhythmdb"));
        assert!(xml.ends_with("</rhythmdb>\n<!-- end -->\n"));
    }

    #[test]
    fn test_missing_declaration_gets_default() {
        let lib = Library::parse("<rhythmdb version=\"2.0\"/>").unwrap();
        assert_eq!(
            lib.to_xml(),
            format!("{}\n<rhythmdb version=\"2.0\"/>", DEFAULT_DECLARATION)
        );
    }

    #[test]
    fn test_append_child_keeps_indentation() {
        let mut lib = Library::parse(SAMPLE).unwrap();
        let path = NodePath(vec![1]);
        lib.get_mut(&path).unwrap().set_child_text("play-count", "1");

        let xml = lib.to_xml();
        assert!(xml.contains("<album>Album</album>\n    <play-count>1</play-count>\n  </entry>"));
    }

    #[test]
    fn test_set_child_text_replaces_existing() {
        let mut el = Element::new("entry");
        el.set_child_text("play-count", "4");
        el.set_child_text("play-count", "5");
        assert_eq!(el.elements().count(), 1);
        assert_eq!(el.child_text("play-count").as_deref(), Some("5"));
    }

    #[test]
    fn test_node_path_order_and_parent() {
        let a = NodePath(vec![1, 3]);
        let b = NodePath(vec![3]);
        assert!(a < b);
        assert_eq!(a.parent(), Some(NodePath(vec![1])));
        assert_eq!(NodePath::root().parent(), None);
        assert_eq!(NodePath::root().child(5), NodePath(vec![5]));
    }

    #[test]
    fn test_invalid_xml_is_library_error() {
        let err = Library::parse("<rhythmdb><entry></rhythmdb>").unwrap_err();
        assert!(matches!(err, SyncError::Library(_)));
    }

    #[test]
    fn test_save_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("rhythmdb.xml");
        fs::write(&db, SAMPLE).unwrap();

        let mut lib = Library::load(&db).unwrap();
        lib.get_mut(&NodePath(vec![1]))
            .unwrap()
            .set_child_text("last-played", "1000");

        let backup = lib.save(Some("1700000000")).unwrap().unwrap();
        assert_eq!(backup, dir.path().join("rhythmdb.xml.backup-1700000000"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), SAMPLE);

        let written = fs::read_to_string(&db).unwrap();
        assert!(written.contains("<last-played>1000</last-played>"));
        assert!(!dir.path().join("rhythmdb.xml.rbsync-tmp").exists());
    }

    #[test]
    fn test_save_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("rhythmdb.xml");
        fs::write(&db, SAMPLE).unwrap();

        let lib = Library::load(&db).unwrap();
        assert_eq!(lib.save(None).unwrap(), None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
