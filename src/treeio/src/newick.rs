//! Newick tree strings extended with `[&height=...,height_index=...]`
//! comments, the convention `phylo-engine` uses to round-trip node ages and
//! the height-table index a node is pinned to without re-deriving either
//! from branch lengths alone.

use crate::TreeIoError;

/// A parsed newick node. Generic over the concrete tree the caller builds
/// from it — this crate never references `phylo-engine`'s arena types.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub label: Option<String>,
    pub branch_length: Option<f64>,
    pub height: Option<f64>,
    pub height_index: Option<usize>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub fn parse(input: &str) -> Result<Node, TreeIoError> {
    let trimmed = input.trim().trim_end_matches(';').trim();
    let chars: Vec<char> = trimmed.chars().collect();
    let mut pos = 0usize;
    let node = parse_node(&chars, &mut pos)?;
    skip_whitespace(&chars, &mut pos);
    if pos != chars.len() {
        return Err(TreeIoError::Newick { pos, reason: "trailing characters after root".into() });
    }
    Ok(node)
}

fn skip_whitespace(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

fn parse_node(chars: &[char], pos: &mut usize) -> Result<Node, TreeIoError> {
    skip_whitespace(chars, pos);
    let mut children = Vec::new();
    if chars.get(*pos) == Some(&'(') {
        *pos += 1;
        loop {
            children.push(parse_node(chars, pos)?);
            skip_whitespace(chars, pos);
            match chars.get(*pos) {
                Some(',') => {
                    *pos += 1;
                    continue;
                }
                Some(')') => {
                    *pos += 1;
                    break;
                }
                _ => {
                    return Err(TreeIoError::Newick {
                        pos: *pos,
                        reason: "expected ',' or ')' in node list".into(),
                    })
                }
            }
        }
    }

    let label = parse_label(chars, pos);
    let mut height = None;
    let mut height_index = None;
    consume_comment(chars, pos, &mut height, &mut height_index)?;

    let mut branch_length = None;
    skip_whitespace(chars, pos);
    if chars.get(*pos) == Some(&':') {
        *pos += 1;
        branch_length = Some(parse_number(chars, pos)?);
    }
    consume_comment(chars, pos, &mut height, &mut height_index)?;

    Ok(Node { label, branch_length, height, height_index, children })
}

fn parse_label(chars: &[char], pos: &mut usize) -> Option<String> {
    skip_whitespace(chars, pos);
    let start = *pos;
    while *pos < chars.len() && !matches!(chars[*pos], ':' | ',' | '(' | ')' | '[' | ';') {
        *pos += 1;
    }
    let label: String = chars[start..*pos].iter().collect::<String>().trim().to_string();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn parse_number(chars: &[char], pos: &mut usize) -> Result<f64, TreeIoError> {
    skip_whitespace(chars, pos);
    let start = *pos;
    while *pos < chars.len()
        && matches!(chars[*pos], '0'..='9' | '.' | '-' | '+' | 'e' | 'E')
    {
        *pos += 1;
    }
    let text: String = chars[start..*pos].iter().collect();
    text.parse::<f64>()
        .map_err(|e| TreeIoError::Newick { pos: start, reason: format!("invalid number {text:?}: {e}") })
}

/// Consume an optional `[&key=value,key=value]` comment, merging any
/// `height`/`height_index` keys it carries into the accumulators.
fn consume_comment(
    chars: &[char],
    pos: &mut usize,
    height: &mut Option<f64>,
    height_index: &mut Option<usize>,
) -> Result<(), TreeIoError> {
    skip_whitespace(chars, pos);
    if chars.get(*pos) != Some(&'[') {
        return Ok(());
    }
    let start = *pos;
    *pos += 1;
    let content_start = *pos;
    while *pos < chars.len() && chars[*pos] != ']' {
        *pos += 1;
    }
    if *pos >= chars.len() {
        return Err(TreeIoError::Newick { pos: start, reason: "unterminated comment".into() });
    }
    let content: String = chars[content_start..*pos].iter().collect();
    *pos += 1; // consume ']'

    let content = content.trim_start_matches('&');
    for field in content.split(',') {
        let Some((key, value)) = field.split_once('=') else { continue };
        match key.trim() {
            "height" => {
                *height = Some(value.trim().parse::<f64>().map_err(|e| TreeIoError::Newick {
                    pos: start,
                    reason: format!("invalid height {value:?}: {e}"),
                })?);
            }
            "height_index" => {
                *height_index = Some(value.trim().parse::<usize>().map_err(|e| TreeIoError::Newick {
                    pos: start,
                    reason: format!("invalid height_index {value:?}: {e}"),
                })?);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Write `node` back out as an extended newick string, with floats rounded
/// to `precision` significant decimal digits.
pub fn write(node: &Node, precision: usize) -> String {
    let mut out = String::new();
    write_node(node, precision, &mut out);
    out.push(';');
    out
}

fn write_node(node: &Node, precision: usize, out: &mut String) {
    if !node.children.is_empty() {
        out.push('(');
        for (i, child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_node(child, precision, out);
        }
        out.push(')');
    }
    if let Some(label) = &node.label {
        out.push_str(label);
    }
    if node.height.is_some() || node.height_index.is_some() {
        out.push_str("[&");
        let mut wrote = false;
        if let Some(h) = node.height {
            out.push_str(&format!("height={h:.precision$}"));
            wrote = true;
        }
        if let Some(hi) = node.height_index {
            if wrote {
                out.push(',');
            }
            out.push_str(&format!("height_index={hi}"));
        }
        out.push(']');
    }
    if let Some(bl) = node.branch_length {
        out.push(':');
        out.push_str(&format!("{bl:.precision$}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_newick() {
        let node = parse("((A:1,B:1):1,(C:2,D:2):0);").unwrap();
        assert_eq!(node.children.len(), 2);
        let left = &node.children[0];
        assert_eq!(left.branch_length, Some(1.0));
        assert_eq!(left.children[0].label.as_deref(), Some("A"));
        let right = &node.children[1];
        assert_eq!(right.branch_length, Some(0.0));
    }

    #[test]
    fn parses_height_comments() {
        let node = parse("(A[&height=0]:1,B[&height=0]:1)[&height=1,height_index=2]:0;").unwrap();
        assert_eq!(node.height, Some(1.0));
        assert_eq!(node.height_index, Some(2));
        assert_eq!(node.children[0].height, Some(0.0));
    }

    #[test]
    fn round_trips_through_write() {
        let node = Node {
            label: None,
            branch_length: Some(0.0),
            height: Some(1.5),
            height_index: Some(0),
            children: vec![
                Node { label: Some("A".into()), branch_length: Some(1.5), height: Some(0.0), height_index: None, children: vec![] },
                Node { label: Some("B".into()), branch_length: Some(1.5), height: Some(0.0), height_index: None, children: vec![] },
            ],
        };
        let written = write(&node, 4);
        let reparsed = parse(&written).unwrap();
        assert_eq!(reparsed.height, Some(1.5));
        assert_eq!(reparsed.children[0].label.as_deref(), Some("A"));
    }

    #[test]
    fn rejects_unterminated_comment() {
        assert!(parse("(A:1,B:1)[&height=1;").is_err());
    }
}
