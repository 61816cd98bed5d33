//! Markdown codec: bijective translation between on-disk files and nodes
//!
//! Parsing splits YAML frontmatter, lifts the recognized keys into typed
//! metadata, replaces every wikilink in the body with a `[target]*`
//! placeholder, and derives the display title. Encoding is the inverse,
//! with one hard rule: an edge is appended as a trailing `[[link]]` line
//! only when its target does not already appear in the restored body —
//! skipping that check is what causes link-duplication feedback loops.
//!
//! `encode(parse(t))` equals `t` up to YAML key ordering, frontmatter
//! whitespace normalization, and placeholder canonicalization. Nothing in
//! the engine depends on byte-exact round-trips.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::VaultError;
use crate::graph::{Edge, GraphNode, NodeMetadata};
use crate::types::{NodeId, Position};

/// Matches both wikilink forms: `[[target]]` and the placeholder `[target]*`.
static LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]|\[([^\[\]]+)\]\*").expect("static regex"));

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}[ \t]+(.+?)[ \t]*$").expect("static regex"));

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("static regex"));

/// A bare `#RRGGBB` after a key would read as a YAML comment; quote it
/// before handing the block to the YAML parser.
static BARE_COLOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\s*[A-Za-z0-9_-]+:\s*)(#[0-9a-fA-F]{6})\s*$").expect("static regex")
});

/// Characters that force double-quoting when emitting a YAML scalar.
const YAML_SPECIALS: &str = ":{}[],&*#?|<>=!%@";

const MAX_TITLE_HEADING_LEN: usize = 100;

/// Color given to sentinel nodes produced from unparseable files.
pub const SENTINEL_COLOR: &str = "#cc3333";

/// Maximum heading length considered for title derivation is part of the
/// title contract: frontmatter `title`, else first heading of at most 100
/// characters, else the filename cleaned of separators.
pub fn derive_title(yaml_title: Option<&str>, body: &str, id: &NodeId) -> String {
    if let Some(t) = yaml_title {
        let t = t.trim();
        if !t.is_empty() {
            return t.to_string();
        }
    }
    for cap in HEADING_RE.captures_iter(body) {
        let heading = strip_placeholders(&cap[1]);
        let heading = heading.trim();
        if !heading.is_empty() && heading.chars().count() <= MAX_TITLE_HEADING_LEN {
            return heading.to_string();
        }
    }
    clean_filename(id)
}

fn clean_filename(id: &NodeId) -> String {
    let cleaned: String = id
        .stem()
        .chars()
        .map(|c| if c == '-' || c == '_' { ' ' } else { c })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace wikilinks and placeholders by their plain target text, for
/// human-readable bodies (context-node snapshots, unseen-node reports).
pub fn strip_placeholders(body: &str) -> String {
    LINK_RE
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            link_target_text(inner).to_string()
        })
        .into_owned()
}

fn link_target_text(inner: &str) -> &str {
    inner.split('|').next().unwrap_or(inner).trim()
}

fn link_label_text(inner: &str) -> &str {
    match inner.split_once('|') {
        Some((_, label)) => label.trim(),
        None => "",
    }
}

/// Rewrite link occurrences in a body: placeholders (or raw wikilinks)
/// whose target satisfies `is_old` are replaced by placeholders for each
/// of `replacements`, or removed when there are none. Other links are
/// canonicalized to placeholder form. Used by delete and merge ripples so
/// bodies, edges, and disk stay coherent.
pub fn rewrite_links<F>(body: &str, is_old: F, replacements: &[String]) -> String
where
    F: Fn(&str) -> bool,
{
    LINK_RE
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            if is_old(link_target_text(inner)) {
                replacements
                    .iter()
                    .map(|r| format!("[{r}]*"))
                    .collect::<Vec<_>>()
                    .join(" ")
            } else {
                format!("[{inner}]*")
            }
        })
        .into_owned()
}

/// Extract outgoing edges from a body and canonicalize every wikilink to
/// its placeholder form.
///
/// Order of first occurrence defines edge order; duplicate targets collapse
/// to a single edge whose label is the first non-empty one seen.
pub fn extract_links(body: &str) -> (String, Vec<Edge>) {
    let mut edges: Vec<Edge> = Vec::new();
    for caps in LINK_RE.captures_iter(body) {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        let target = link_target_text(inner);
        if target.is_empty() {
            continue;
        }
        let label = link_label_text(inner);
        match edges.iter_mut().find(|e| e.target.as_str() == target) {
            Some(existing) => {
                if existing.label.is_empty() && !label.is_empty() {
                    existing.label = label.to_string();
                }
            }
            None => edges.push(Edge::labeled(target, label)),
        }
    }

    let canonical = LINK_RE
        .replace_all(body, |caps: &regex::Captures<'_>| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("[{inner}]*")
        })
        .into_owned();

    (canonical, edges)
}

/// Parse a Markdown file into a graph node.
pub fn parse(id: NodeId, text: &str) -> Result<GraphNode, VaultError> {
    let (frontmatter, body) = split_frontmatter(text);

    let mut metadata = NodeMetadata::default();
    let mut yaml_title: Option<String> = None;

    if let Some(raw) = frontmatter {
        let prepared = BARE_COLOR_RE.replace_all(&raw, "$1\"$2\"");
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(&prepared).map_err(|e| VaultError::Parse {
                path: id.to_string(),
                reason: format!("invalid frontmatter: {e}"),
            })?;
        if let serde_yaml::Value::Mapping(mapping) = parsed {
            lift_frontmatter(&id, mapping, &mut metadata, &mut yaml_title)?;
        }
    }

    let (content, edges) = extract_links(&body);
    metadata.title = derive_title(yaml_title.as_deref(), &content, &id);

    Ok(GraphNode {
        id,
        content,
        outgoing_edges: edges,
        metadata,
    })
}

/// Build the sentinel node for a file that failed to parse: raw text body,
/// no edges, sentinel color, so the graph stays complete.
pub fn sentinel_node(id: NodeId, raw: &str) -> GraphNode {
    let mut metadata = NodeMetadata {
        color: Some(SENTINEL_COLOR.to_string()),
        ..NodeMetadata::default()
    };
    metadata.title = derive_title(None, "", &id);
    GraphNode {
        id,
        content: raw.to_string(),
        outgoing_edges: Vec::new(),
        metadata,
    }
}

fn split_frontmatter(text: &str) -> (Option<String>, String) {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return (None, text.to_string());
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = rest[..offset].to_string();
            let body = rest[offset + line.len()..].to_string();
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    // Unterminated frontmatter block: treat the whole file as body.
    (None, text.to_string())
}

fn lift_frontmatter(
    id: &NodeId,
    mapping: serde_yaml::Mapping,
    metadata: &mut NodeMetadata,
    yaml_title: &mut Option<String>,
) -> Result<(), VaultError> {
    for (key, value) in mapping {
        let Some(key) = key.as_str().map(str::to_string) else {
            continue;
        };
        match key.as_str() {
            "color" => {
                if let Some(s) = value.as_str() {
                    metadata.color = Some(s.to_string());
                }
            }
            "position" => {
                metadata.position = parse_position(id, &value)?;
            }
            "isContextNode" => {
                metadata.is_context_node = value.as_bool().unwrap_or(false);
            }
            "containedNodeIds" => {
                if let serde_yaml::Value::Sequence(seq) = value {
                    let ids = seq
                        .into_iter()
                        .filter_map(|v| v.as_str().map(NodeId::from))
                        .collect();
                    metadata.contained_node_ids = Some(ids);
                }
            }
            "title" => {
                // Round-trip the key opaquely; the derived title reads it
                // but never writes it back.
                if let Some(s) = value.as_str() {
                    *yaml_title = Some(s.to_string());
                }
                metadata
                    .additional_yaml_props
                    .insert(key, scalar_to_string(&value));
            }
            _ => {
                metadata
                    .additional_yaml_props
                    .insert(key, scalar_to_string(&value));
            }
        }
    }
    Ok(())
}

fn parse_position(id: &NodeId, value: &serde_yaml::Value) -> Result<Option<Position>, VaultError> {
    let serde_yaml::Value::Mapping(map) = value else {
        return Ok(None);
    };
    let read = |k: &str| -> Option<f64> {
        map.iter()
            .find(|(key, _)| key.as_str() == Some(k))
            .and_then(|(_, v)| v.as_f64())
    };
    match (read("x"), read("y")) {
        (Some(x), Some(y)) => Ok(Some(Position::new(x, y))),
        (None, None) => Ok(None),
        _ => Err(VaultError::Parse {
            path: id.to_string(),
            reason: "position requires both x and y".to_string(),
        }),
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim_end()
            .to_string(),
    }
}

fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| YAML_SPECIALS.contains(c)) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn format_float(v: f64) -> String {
    // Free-form precision; integral values drop the fraction.
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Serialize a node back to canonical Markdown.
pub fn encode(node: &GraphNode) -> String {
    let mut out = String::new();

    let meta = &node.metadata;
    let has_frontmatter = meta.color.is_some()
        || meta.position.is_some()
        || meta.is_context_node
        || meta.contained_node_ids.is_some()
        || !meta.additional_yaml_props.is_empty();

    if has_frontmatter {
        out.push_str("---\n");
        if let Some(color) = &meta.color {
            // Hex colors are emitted bare; the parser re-quotes them.
            if HEX_COLOR_RE.is_match(color) {
                out.push_str(&format!("color: {color}\n"));
            } else {
                out.push_str(&format!("color: {}\n", quote_if_needed(color)));
            }
        }
        if let Some(pos) = &meta.position {
            out.push_str("position:\n");
            out.push_str(&format!("  x: {}\n", format_float(pos.x)));
            out.push_str(&format!("  y: {}\n", format_float(pos.y)));
        }
        if meta.is_context_node {
            out.push_str("isContextNode: true\n");
        }
        if let Some(ids) = &meta.contained_node_ids {
            out.push_str("containedNodeIds:\n");
            for id in ids {
                out.push_str(&format!("  - {}\n", quote_if_needed(id.as_str())));
            }
        }
        for (key, value) in &meta.additional_yaml_props {
            out.push_str(&format!("{key}: {}\n", quote_if_needed(value)));
        }
        out.push_str("---\n");
    }

    let restored = restore_wikilinks(&node.content);
    out.push_str(&restored);

    // Collect targets already present in the body so appended links never
    // duplicate authored ones.
    let (_, body_edges) = extract_links(&node.content);
    let missing: Vec<&Edge> = node
        .outgoing_edges
        .iter()
        .filter(|e| {
            !body_edges
                .iter()
                .any(|b| targets_equivalent(&b.target, &e.target))
        })
        .collect();

    if !missing.is_empty() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        for edge in missing {
            let display = edge_display_text(edge);
            out.push_str(&format!("[[{display}]]\n"));
        }
    }

    out
}

fn restore_wikilinks(content: &str) -> String {
    LINK_RE
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("[[{inner}]]")
        })
        .into_owned()
}

/// Two edge targets refer to the same node when their stems agree; one side
/// may still be unresolved link text while the other is a full path id.
fn targets_equivalent(a: &NodeId, b: &NodeId) -> bool {
    a == b || a.stem() == b.stem()
}

fn edge_display_text(edge: &Edge) -> String {
    let target = if edge.target.is_link_form() {
        edge.target.as_str().to_string()
    } else {
        edge.target.stem().to_string()
    };
    if edge.label.is_empty() {
        target
    } else {
        format!("{target}|{}", edge.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_frontmatter_and_lifts_recognized_keys() {
        let text = "---\ncolor: \"#ff8800\"\nposition:\n  x: 12.5\n  y: -3\nisContextNode: false\nauthor: someone\n---\n# Heading\n\nBody [[Other]] text\n";
        let node = parse(NodeId::new("/v/note.md"), text).unwrap();
        assert_eq!(node.metadata.color.as_deref(), Some("#ff8800"));
        assert_eq!(node.metadata.position, Some(Position::new(12.5, -3.0)));
        assert!(!node.metadata.is_context_node);
        assert_eq!(
            node.metadata.additional_yaml_props.get("author").map(String::as_str),
            Some("someone")
        );
        assert_eq!(node.content, "# Heading\n\nBody [Other]* text\n");
        assert_eq!(node.outgoing_edges, vec![Edge::new("Other")]);
    }

    #[test]
    fn tolerates_bare_hex_color_in_frontmatter() {
        let text = "---\ncolor: #ff8800\n---\nbody\n";
        let node = parse(NodeId::new("/v/n.md"), text).unwrap();
        assert_eq!(node.metadata.color.as_deref(), Some("#ff8800"));
    }

    #[test]
    fn title_prefers_yaml_then_heading_then_filename() {
        let with_yaml = "---\ntitle: From Yaml\n---\n# From Heading\n";
        let node = parse(NodeId::new("/v/my-note_file.md"), with_yaml).unwrap();
        assert_eq!(node.metadata.title, "From Yaml");
        // The key still round-trips opaquely.
        assert_eq!(
            node.metadata.additional_yaml_props.get("title").map(String::as_str),
            Some("From Yaml")
        );

        let with_heading = "# From Heading\n";
        let node = parse(NodeId::new("/v/my-note_file.md"), with_heading).unwrap();
        assert_eq!(node.metadata.title, "From Heading");

        let node = parse(NodeId::new("/v/my-note_file.md"), "plain body\n").unwrap();
        assert_eq!(node.metadata.title, "my note file");
    }

    #[test]
    fn overlong_headings_are_skipped_for_titles() {
        let long = "#".to_string() + " " + &"x".repeat(150) + "\n\n## Short\n";
        let node = parse(NodeId::new("/v/n.md"), &long).unwrap();
        assert_eq!(node.metadata.title, "Short");
    }

    #[test]
    fn duplicate_links_collapse_to_first_with_first_nonempty_label() {
        let (body, edges) = extract_links("[[A]] then [[A|label]] then [[A]]");
        assert_eq!(body, "[A]* then [A|label]* then [A]*");
        assert_eq!(edges, vec![Edge::labeled("A", "label")]);
    }

    #[test]
    fn extract_accepts_both_wikilinks_and_placeholders() {
        let (body, edges) = extract_links("typed [[New]] and existing [Old]*");
        assert_eq!(body, "typed [New]* and existing [Old]*");
        assert_eq!(edges, vec![Edge::new("New"), Edge::new("Old")]);
    }

    #[test]
    fn encode_appends_only_missing_links() {
        let mut node = parse(NodeId::new("/v/a.md"), "Hello [[B]]\n").unwrap();
        // Heal the edge to a full path id; the body placeholder still says B.
        node.outgoing_edges[0].target = NodeId::new("/v/B.md");
        node.push_edge_deduped(Edge::new("/v/C.md"));

        let encoded = encode(&node);
        assert_eq!(encoded.matches("[[B]]").count(), 1);
        assert!(encoded.contains("[[C]]"));
    }

    #[test]
    fn encode_parse_round_trip_preserves_node() {
        let text = "---\ncolor: #a1b2c3\nposition:\n  x: 100\n  y: 250.25\nsource: \"agent: voice\"\n---\n# Title\n\nSee [[Other|context]] and [[Missing]].\n";
        let node = parse(NodeId::new("/v/rt.md"), text).unwrap();
        let reparsed = parse(NodeId::new("/v/rt.md"), &encode(&node)).unwrap();
        assert_eq!(node, reparsed);
    }

    #[test]
    fn quoting_rules_apply_to_special_characters() {
        let mut node = GraphNode::new("/v/q.md");
        node.metadata
            .additional_yaml_props
            .insert("note".to_string(), "a: b".to_string());
        node.metadata.color = Some("#ffeedd".to_string());
        let encoded = encode(&node);
        assert!(encoded.contains("note: \"a: b\""));
        assert!(encoded.contains("color: #ffeedd"));
    }

    #[test]
    fn dangling_wikilinks_survive_round_trips() {
        let text = "points at [[missing]]\n";
        let node = parse(NodeId::new("/v/d.md"), text).unwrap();
        assert_eq!(node.outgoing_edges, vec![Edge::new("missing")]);
        let encoded = encode(&node);
        assert_eq!(encoded.matches("[[missing]]").count(), 1);
    }

    #[test]
    fn sentinel_node_keeps_raw_text_and_flags_color() {
        let node = sentinel_node(NodeId::new("/v/broken.md"), "---\n:bad yaml\n");
        assert_eq!(node.metadata.color.as_deref(), Some(SENTINEL_COLOR));
        assert!(node.outgoing_edges.is_empty());
        assert_eq!(node.content, "---\n:bad yaml\n");
    }

    #[test]
    fn strip_placeholders_yields_plain_text() {
        assert_eq!(
            strip_placeholders("see [A|label]* and [[B]]"),
            "see A and B"
        );
    }

    #[test]
    fn unterminated_frontmatter_is_treated_as_body() {
        let node = parse(NodeId::new("/v/u.md"), "---\nkey: value\nno closer\n").unwrap();
        assert!(node.metadata.additional_yaml_props.is_empty());
        assert!(node.content.starts_with("---\n"));
    }
}
