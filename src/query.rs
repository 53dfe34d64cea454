//! Structural queries against the library tree.
//!
//! Entries are located with a small XPath subset:
//!
//! ```text
//! //entry[@type="song"]/title[lower(text())="x"]/../artist[lower(text())="y"]/..
//! ```
//!
//! The language has no case-insensitive compare of its own, so callers hand
//! the evaluator a [`FunctionTable`]; [`find_entries`] registers `lower`.
//! All user text goes through [`xpath_literal`] before it reaches a query.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{Result, SyncError};
use crate::library::{Element, Library, NodePath, XmlNode};

/// Album values Last.fm (or its clients) use when a scrobble has no album.
static SENTINEL_ALBUMS: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["", "none", "unknown", "unknown album", "[unknown album]"]);

/// True when `album` carries no usable album information.
pub fn is_sentinel_album(album: Option<&str>) -> bool {
    match album {
        None => true,
        Some(a) => {
            let lower = a.trim().to_lowercase();
            SENTINEL_ALBUMS.iter().any(|&s| s == lower)
        }
    }
}

// ============================================================================
// Building
// ============================================================================

/// Quotes `text` as a query literal that evaluates back to exactly `text`.
///
/// Literals cannot escape their own delimiter, so text containing both quote
/// characters is split on `"` and reassembled with `concat()`.
pub fn xpath_literal(text: &str) -> String {
    let has_double = text.contains('"');
    let has_single = text.contains('\'');

    if has_double && has_single {
        let mut parts: Vec<String> = Vec::new();
        for (i, fragment) in text.split('"').enumerate() {
            if i > 0 {
                parts.push("'\"'".to_string());
            }
            if !fragment.is_empty() {
                parts.push(format!("\"{}\"", fragment));
            }
        }
        format!("concat({})", parts.join(", "))
    } else if has_double {
        format!("'{}'", text)
    } else {
        format!("\"{}\"", text)
    }
}

/// Query selecting song entries by lower-cased title, artist and album.
///
/// The album step is left out when the album is missing or a sentinel.
pub fn entry_query(artist: &str, title: &str, album: Option<&str>) -> String {
    let mut query = String::from(r#"//entry[@type="song"]"#);
    query.push_str(&field_step("title", title));
    query.push_str(&field_step("artist", artist));
    if let Some(album) = album.filter(|a| !is_sentinel_album(Some(*a))) {
        query.push_str(&field_step("album", album));
    }
    query
}

fn field_step(field: &str, value: &str) -> String {
    format!(
        "/{}[lower(text())={}]/..",
        field,
        xpath_literal(&value.to_lowercase())
    )
}

/// Song entries matching the given fields, in document order.
pub fn find_entries(
    library: &Library,
    artist: &str,
    title: &str,
    album: Option<&str>,
) -> Result<Vec<NodePath>> {
    let query = Query::parse(&entry_query(artist, title, album))?;
    query.select(library.root(), &FunctionTable::with_lower())
}

// ============================================================================
// Function table
// ============================================================================

pub type StringFn = fn(&str) -> String;

/// String functions callable from predicates, by name.
#[derive(Default)]
pub struct FunctionTable {
    functions: HashMap<String, StringFn>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with `lower` mapped to Unicode lower-casing.
    pub fn with_lower() -> Self {
        let mut table = Self::new();
        table.register("lower", |s| s.to_lowercase());
        table
    }

    pub fn register(&mut self, name: &str, f: StringFn) {
        self.functions.insert(name.to_string(), f);
    }

    fn call(&self, name: &str, arg: &str) -> Result<String> {
        self.functions
            .get(name)
            .map(|f| f(arg))
            .ok_or_else(|| SyncError::Query(format!("unknown function '{}'", name)))
    }
}

// ============================================================================
// Parsed query
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Attribute(String),
    Text,
    Call(String),
}

#[derive(Clone, Debug, PartialEq)]
struct Predicate {
    operand: Operand,
    value: String,
}

#[derive(Clone, Debug, PartialEq)]
enum Step {
    Element {
        axis: Axis,
        name: String,
        predicates: Vec<Predicate>,
    },
    Parent,
}

/// A compiled query.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    steps: Vec<Step>,
}

impl Query {
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser::new(source);
        let steps = parser.path()?;
        Ok(Self { steps })
    }

    /// Evaluates the query against the tree rooted at `root`.
    ///
    /// The context starts as a virtual document node above `root`, so a
    /// leading `/name` matches the root element itself.
    pub fn select(&self, root: &Element, functions: &FunctionTable) -> Result<Vec<NodePath>> {
        // `None` stands for the document node.
        let mut context: Vec<Option<NodePath>> = vec![None];

        for step in &self.steps {
            let mut next: Vec<Option<NodePath>> = Vec::new();
            match step {
                Step::Parent => {
                    // The root's parent is the document node; the document has none.
                    for path in context.iter().flatten() {
                        next.push(path.parent());
                    }
                }
                Step::Element {
                    axis,
                    name,
                    predicates,
                } => {
                    let test = |el: &Element| -> Result<bool> {
                        Ok(el.name == *name && matches_all(el, predicates, functions)?)
                    };
                    for node in &context {
                        let (el, mut trail) = match node {
                            None => {
                                if test(root)? {
                                    next.push(Some(NodePath::root()));
                                }
                                if *axis == Axis::Child {
                                    continue;
                                }
                                (root, Vec::new())
                            }
                            Some(path) => (lookup(root, path), path.0.clone()),
                        };
                        match axis {
                            Axis::Descendant => walk_descendants(el, &mut trail, &test, &mut next)?,
                            Axis::Child => {
                                for (i, child) in el.children.iter().enumerate() {
                                    if let XmlNode::Element(child_el) = child {
                                        if test(child_el)? {
                                            trail.push(i);
                                            next.push(Some(NodePath(trail.clone())));
                                            trail.pop();
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
            // Nested contexts can interleave their results.
            if !in_document_order(&next) {
                next.sort();
                next.dedup();
            }
            context = next;
        }

        Ok(context.into_iter().flatten().collect())
    }
}

fn lookup<'a>(root: &'a Element, path: &NodePath) -> &'a Element {
    let mut el = root;
    for &i in &path.0 {
        match el.child_element(i) {
            Some(child) => el = child,
            None => break,
        }
    }
    el
}

/// Pushes every descendant of `el` that passes `test`, in document order.
/// `trail` is the path of `el` and is restored before returning.
fn walk_descendants<F>(
    el: &Element,
    trail: &mut Vec<usize>,
    test: &F,
    out: &mut Vec<Option<NodePath>>,
) -> Result<()>
where
    F: Fn(&Element) -> Result<bool>,
{
    for (i, child) in el.children.iter().enumerate() {
        if let XmlNode::Element(child_el) = child {
            trail.push(i);
            if test(child_el)? {
                out.push(Some(NodePath(trail.clone())));
            }
            walk_descendants(child_el, trail, test, out)?;
            trail.pop();
        }
    }
    Ok(())
}

fn in_document_order(paths: &[Option<NodePath>]) -> bool {
    paths.windows(2).all(|w| w[0] < w[1])
}

fn matches_all(el: &Element, predicates: &[Predicate], functions: &FunctionTable) -> Result<bool> {
    for predicate in predicates {
        let actual = match &predicate.operand {
            Operand::Attribute(name) => match el.attribute(name) {
                Some(v) => v.to_string(),
                None => return Ok(false),
            },
            Operand::Text => el.text(),
            Operand::Call(function) => functions.call(function, &el.text())?,
        };
        if actual != predicate.value {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn error(&self, msg: &str) -> SyncError {
        SyncError::Query(format!("{} at offset {} in '{}'", msg, self.pos, self.source))
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.source.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", token)))
        }
    }

    fn name(&mut self) -> Result<String> {
        self.skip_ws();
        let len = self
            .rest()
            .char_indices()
            .find(|(_, c)| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
            .map(|(i, _)| i)
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        let name = self.rest()[..len].to_string();
        self.pos += len;
        Ok(name)
    }

    fn path(&mut self) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        loop {
            self.skip_ws();
            if self.rest().is_empty() {
                break;
            }
            let axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                return Err(self.error("expected '/' or '//'"));
            };

            if self.eat("..") {
                if axis == Axis::Descendant {
                    return Err(self.error("'..' cannot follow '//'"));
                }
                steps.push(Step::Parent);
                continue;
            }

            let name = self.name()?;
            let mut predicates = Vec::new();
            while self.eat("[") {
                predicates.push(self.predicate()?);
                self.expect("]")?;
            }
            steps.push(Step::Element {
                axis,
                name,
                predicates,
            });
        }
        if steps.is_empty() {
            return Err(self.error("empty query"));
        }
        Ok(steps)
    }

    fn predicate(&mut self) -> Result<Predicate> {
        let operand = if self.eat("@") {
            Operand::Attribute(self.name()?)
        } else if self.eat("text()") {
            Operand::Text
        } else {
            let function = self.name()?;
            self.expect("(")?;
            self.expect("text()")?;
            self.expect(")")?;
            Operand::Call(function)
        };
        self.expect("=")?;
        let value = self.literal()?;
        Ok(Predicate { operand, value })
    }

    /// A quoted string, or `concat()` of quoted strings.
    fn literal(&mut self) -> Result<String> {
        if self.eat("concat") {
            self.expect("(")?;
            let mut value = self.quoted()?;
            while self.eat(",") {
                value.push_str(&self.quoted()?);
            }
            self.expect(")")?;
            return Ok(value);
        }
        self.quoted()
    }

    fn quoted(&mut self) -> Result<String> {
        self.skip_ws();
        let quote = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected a string literal")),
        };
        let body = &self.rest()[1..];
        let end = body
            .find(quote)
            .ok_or_else(|| self.error("unterminated string literal"))?;
        let value = body[..end].to_string();
        self.pos += end + 2;
        Ok(value)
    }
}
