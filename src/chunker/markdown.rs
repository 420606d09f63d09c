//! Markdown/MDX chunking (§4.2 MDX/Markdown path). Splits on top-level
//! headings; oversize chunks are sub-split on paragraph boundaries, the fixed
//! policy chosen to resolve the source's ambiguous sub-splitter (see
//! DESIGN.md).

use regex::Regex;

use crate::fingerprint::checksum;
use crate::tokenizer::count_tokens;
use crate::types::{Chunk, SourceType};

struct Heading {
    line_idx: usize,
    title: String,
}

fn heading_regex() -> Regex {
    Regex::new(r"^(#{1,6})\s+(.*)$").expect("static regex")
}

fn find_headings(lines: &[&str]) -> Vec<Heading> {
    let re = heading_regex();
    lines
        .iter()
        .enumerate()
        .filter_map(|(idx, line)| {
            re.captures(line).map(|caps| Heading {
                line_idx: idx,
                title: caps[2].trim().to_string(),
            })
        })
        .collect()
}

struct RawSection {
    title: String,
    content: String,
}

fn split_into_sections(text: &str) -> Vec<RawSection> {
    let lines: Vec<&str> = text.lines().collect();
    let headings = find_headings(&lines);

    let mut sections = Vec::new();
    let mut cursor = 0usize;

    if let Some(first) = headings.first() {
        if first.line_idx > 0 {
            let preamble = lines[0..first.line_idx].join("\n");
            if !preamble.trim().is_empty() {
                sections.push(RawSection {
                    title: String::new(),
                    content: preamble,
                });
            }
        }
    } else if !text.trim().is_empty() {
        sections.push(RawSection {
            title: String::new(),
            content: text.to_string(),
        });
        return sections;
    }

    for (i, h) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map(|n| n.line_idx).unwrap_or(lines.len());
        let body = lines[h.line_idx..end].join("\n");
        sections.push(RawSection {
            title: h.title.clone(),
            content: body,
        });
        cursor = end;
    }
    let _ = cursor;

    sections
}

/// Splits `body` into paragraph-aligned parts, each under `token_cap`
/// tokens, greedily accumulating whole paragraphs (blank-line-delimited).
/// Never splits inside a paragraph, even if a single paragraph alone exceeds
/// the cap — that paragraph becomes its own oversize part, since there is no
/// documented finer-grained boundary to split on.
fn split_by_paragraphs(body: &str, token_cap: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = body.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    if paragraphs.len() <= 1 {
        return vec![body.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    for para in paragraphs {
        let candidate = if current.is_empty() {
            para.to_string()
        } else {
            format!("{current}\n\n{para}")
        };
        if !current.is_empty() && count_tokens(&candidate) > token_cap {
            parts.push(current.clone());
            current = para.to_string();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Chunks an MDX/Markdown document. `filepath` is the repo-relative path,
/// `github_url` / `docs_url` are resolved link bases for this file.
pub fn chunk_markdown(
    filepath: &str,
    text: &str,
    token_cap: usize,
    github_url: Option<&str>,
    docs_url: Option<&str>,
) -> Vec<Chunk> {
    let sections = split_into_sections(text);
    let mut out = Vec::new();
    let mut next_id = 0i32;

    for section in sections {
        if count_tokens(&section.content) <= token_cap {
            out.push(build_chunk(
                filepath,
                next_id,
                &section.title,
                &section.content,
                github_url,
                docs_url,
            ));
            next_id += 1;
            continue;
        }

        let parts = split_by_paragraphs(&section.content, token_cap);
        for (i, part) in parts.iter().enumerate() {
            let title = if parts.len() == 1 {
                section.title.clone()
            } else {
                format!("{}_part{}", section.title, i + 1)
            };
            out.push(build_chunk(filepath, next_id, &title, part, github_url, docs_url));
            next_id += 1;
        }
    }

    out
}

fn build_chunk(
    filepath: &str,
    chunk_id: i32,
    title: &str,
    content: &str,
    github_url: Option<&str>,
    docs_url: Option<&str>,
) -> Chunk {
    Chunk {
        filepath: filepath.to_string(),
        chunk_id,
        chunk_title: title.to_string(),
        content: content.to_string(),
        contextual_text: content.to_string(),
        checksum: checksum(content),
        embedding: None,
        source_type: SourceType::Doc,
        entity_type: None,
        start_line: None,
        end_line: None,
        github_url: github_url.map(|s| s.to_string()),
        docs_url: docs_url.map(|s| s.to_string()),
        final_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_heading_produces_one_chunk() {
        let doc = "# Title\nSome body text.\n";
        let chunks = chunk_markdown("a.mdx", doc, 8192, None, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_title, "Title");
        assert_eq!(chunks[0].chunk_id, 0);
    }

    #[test]
    fn content_before_first_heading_is_untitled_chunk() {
        let doc = "intro paragraph\n\n# First\nbody\n";
        let chunks = chunk_markdown("b.mdx", doc, 8192, None, None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_title, "");
        assert_eq!(chunks[1].chunk_title, "First");
    }

    #[test]
    fn chunk_ids_are_dense_and_zero_based() {
        let doc = "# A\nx\n# B\ny\n# C\nz\n";
        let chunks = chunk_markdown("c.mdx", doc, 8192, None, None);
        let ids: Vec<i32> = chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn oversize_chunk_is_split_on_paragraph_boundaries() {
        let long_para = "word ".repeat(5000);
        let doc = format!("# Big\n\n{long_para}\n\nshort second paragraph\n");
        let chunks = chunk_markdown("d.mdx", &doc, 100, None, None);
        assert!(chunks.len() > 1);
        assert!(chunks[0].chunk_title.starts_with("Big_part"));
        for c in &chunks {
            assert_eq!(c.checksum, crate::fingerprint::checksum(&c.content));
        }
    }

    #[test]
    fn chunking_is_stable_across_runs() {
        let doc = "# A\nx\n# B\ny\n";
        let first = chunk_markdown("e.mdx", doc, 8192, None, None);
        let second = chunk_markdown("e.mdx", doc, 8192, None, None);
        assert_eq!(first, second);
    }
}
