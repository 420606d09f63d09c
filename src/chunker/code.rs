//! Source-code chunking (§4.2 code path). One chunk per parsed entity;
//! entities without any extracted structure fall back to a single
//! module-level chunk; oversize entities are split at line boundaries.

use crate::fingerprint::checksum;
use crate::tokenizer::count_tokens;
use crate::types::{Chunk, CodeEntity, SourceType};

/// Returns the exact source lines `[start, end]` (1-based, inclusive).
fn slice_lines(content: &str, start: i32, end: i32) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start_idx = (start.max(1) - 1) as usize;
    let end_idx = (end.max(start) as usize).min(lines.len());
    if start_idx >= lines.len() || start_idx >= end_idx {
        return String::new();
    }
    lines[start_idx..end_idx].join("\n")
}

fn build_chunk(
    filepath: &str,
    chunk_id: i32,
    title: &str,
    content: &str,
    entity_type: Option<&str>,
    start_line: i32,
    end_line: i32,
    github_url: Option<&str>,
) -> Chunk {
    Chunk {
        filepath: filepath.to_string(),
        chunk_id,
        chunk_title: title.to_string(),
        content: content.to_string(),
        contextual_text: content.to_string(),
        checksum: checksum(content),
        embedding: None,
        source_type: SourceType::Code,
        entity_type: entity_type.map(|s| s.to_string()),
        start_line: Some(start_line),
        end_line: Some(end_line),
        github_url: github_url.map(|s| s.to_string()),
        docs_url: None,
        final_url: None,
    }
}

/// Splits an oversize entity into line-aligned parts, each at or under
/// `token_cap`. Splitting is aligned to whole lines: a part never ends
/// mid-line.
fn split_entity_by_lines(lines: &[&str], token_cap: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut part_start = 0usize;
    let mut acc = String::new();

    for (i, line) in lines.iter().enumerate() {
        let candidate = if acc.is_empty() {
            line.to_string()
        } else {
            format!("{acc}\n{line}")
        };
        if !acc.is_empty() && count_tokens(&candidate) > token_cap {
            ranges.push((part_start, i));
            part_start = i;
            acc = line.to_string();
        } else {
            acc = candidate;
        }
    }
    if part_start < lines.len() {
        ranges.push((part_start, lines.len()));
    }
    ranges
}

pub fn chunk_code_file(
    filepath: &str,
    content: &str,
    entities: &[CodeEntity],
    token_cap: usize,
    github_url: Option<&str>,
) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut next_id = 0i32;

    if entities.is_empty() {
        if !content.trim().is_empty() {
            out.push(build_chunk(
                filepath,
                next_id,
                filepath,
                content,
                Some("module"),
                1,
                content.lines().count().max(1) as i32,
                github_url,
            ));
        }
        return out;
    }

    for entity in entities {
        let body = slice_lines(content, entity.start_line, entity.end_line);
        if count_tokens(&body) <= token_cap {
            out.push(build_chunk(
                filepath,
                next_id,
                &entity.qualified_name,
                &body,
                Some(&entity.entity_type),
                entity.start_line,
                entity.end_line,
                github_url,
            ));
            next_id += 1;
            continue;
        }

        let lines: Vec<&str> = body.lines().collect();
        let ranges = split_entity_by_lines(&lines, token_cap);
        for (i, (start, end)) in ranges.iter().enumerate() {
            let part_body = lines[*start..*end].join("\n");
            let title = format!("{}_part{}", entity.qualified_name, i + 1);
            let abs_start = entity.start_line + *start as i32;
            let abs_end = entity.start_line + *end as i32 - 1;
            out.push(build_chunk(
                filepath,
                next_id,
                &title,
                &part_body,
                Some(&entity.entity_type),
                abs_start,
                abs_end,
                github_url,
            ));
            next_id += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, start: i32, end: i32) -> CodeEntity {
        CodeEntity {
            name: name.to_string(),
            qualified_name: name.to_string(),
            entity_type: "function".to_string(),
            start_line: start,
            end_line: end,
            docstring: None,
            parameters: vec![],
            return_type: None,
            parent_context: None,
        }
    }

    #[test]
    fn one_chunk_per_entity() {
        let content = "fn alpha() {\n    1\n}\nfn beta() {\n    2\n}\n";
        let entities = vec![entity("alpha", 1, 3), entity("beta", 4, 6)];
        let chunks = chunk_code_file("x.rs", content, &entities, 8192, None);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_title, "alpha");
        assert_eq!(chunks[0].start_line, Some(1));
        assert_eq!(chunks[1].chunk_title, "beta");
    }

    #[test]
    fn empty_entities_with_content_emits_module_chunk() {
        let content = "const X: u32 = 1;\n";
        let chunks = chunk_code_file("consts.rs", content, &[], 8192, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].entity_type.as_deref(), Some("module"));
    }

    #[test]
    fn empty_file_emits_no_chunks() {
        let chunks = chunk_code_file("empty.rs", "", &[], 8192, None);
        assert!(chunks.is_empty());
    }

    #[test]
    fn oversize_entity_is_split_on_line_boundaries() {
        let mut content = String::new();
        for i in 0..2000 {
            content.push_str(&format!("    let v{i} = {i};\n"));
        }
        let entities = vec![entity("huge_fn", 1, 2000)];
        let chunks = chunk_code_file("huge.rs", &content, &entities, 50, None);
        assert!(chunks.len() > 1);
        assert!(chunks[0].chunk_title.starts_with("huge_fn_part"));
        // Line ranges must be contiguous and non-overlapping.
        let mut prev_end = 0;
        for c in &chunks {
            assert!(c.start_line.unwrap() > prev_end);
            prev_end = c.end_line.unwrap();
        }
    }

    #[test]
    fn reordering_entities_changes_chunk_ids_not_content() {
        let content = "fn alpha() {\n  1\n}\nfn beta() {\n  2\n}\n";
        let in_order = vec![entity("alpha", 1, 3), entity("beta", 4, 6)];
        let swapped = vec![entity("beta", 4, 6), entity("alpha", 1, 3)];
        let a = chunk_code_file("x.rs", content, &in_order, 8192, None);
        let b = chunk_code_file("x.rs", content, &swapped, 8192, None);
        assert_eq!(a[0].chunk_title, "alpha");
        assert_eq!(b[0].chunk_title, "beta");
        assert_eq!(a[0].content, b[1].content);
    }
}
