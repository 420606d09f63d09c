//! Per-language entity extraction (§4.2 code path input, entities consumed by
//! `chunker::code`). Each `LanguageDriver` walks a tree-sitter parse tree and
//! emits `CodeEntity` records — functions, methods, types — with the line
//! ranges the chunker slices verbatim out of the source.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::types::CodeEntity;

pub trait LanguageDriver: Send + Sync {
    fn name(&self) -> &'static str;
    /// Primary file extensions handled by this driver (lowercase, without dot).
    fn extensions(&self) -> &'static [&'static str];
    fn handles_path(&self, path: &Path) -> bool;
    fn language_for_path(&self, path: &Path) -> Language;
    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>>;
}

fn path_ext_lower(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase()
}

fn file_name_lower(path: &Path) -> String {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("").to_lowercase()
}

fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

/// Splits a `(a: T, b: U)`-shaped parameter list on top-level commas,
/// trimming whitespace. Best-effort; good enough for indexing purposes since
/// the raw parameter text still ends up in `content` regardless.
fn split_params(param_list_text: &str) -> Vec<String> {
    let inner = param_list_text.trim().trim_start_matches('(').trim_end_matches(')');
    if inner.trim().is_empty() {
        return vec![];
    }
    let mut params = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in inner.chars() {
        match ch {
            '(' | '<' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | '>' | ']' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    params.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        params.push(trimmed.to_string());
    }
    params
}

/// Text of the nearest preceding comment node (line or block), if the
/// definition's previous named sibling is one. Used as the entity docstring.
fn preceding_comment(source: &[u8], def_node: Node) -> Option<String> {
    let mut sibling = def_node.prev_sibling();
    let mut lines = Vec::new();
    while let Some(node) = sibling {
        if node.kind().contains("comment") {
            lines.push(node_text(source, node).trim().to_string());
            sibling = node.prev_sibling();
        } else {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

/// Walks ancestors of `node` looking for a container of one of `kinds`, and
/// returns the text of its first `name`/`type_identifier`/`identifier` child.
/// Used to build `parent_context` (e.g. the `impl Foo` a method lives in).
fn enclosing_container_name(source: &[u8], node: Node, kinds: &[&str]) -> Option<String> {
    let mut cur = node.parent();
    while let Some(n) = cur {
        if kinds.contains(&n.kind()) {
            let mut cursor = n.walk();
            for child in n.children(&mut cursor) {
                if matches!(child.kind(), "type_identifier" | "identifier" | "name") {
                    return Some(node_text(source, child).trim().to_string());
                }
            }
        }
        cur = n.parent();
    }
    None
}

struct EntityQuery<'a> {
    query_src: &'a str,
    entity_type: &'a str,
    parent_kinds: &'a [&'a str],
}

fn run_entity_query(source: &[u8], root: Node, language: &Language, spec: &EntityQuery) -> Result<Vec<CodeEntity>> {
    let query = Query::new(language, spec.query_src).context("failed to compile tree-sitter query")?;
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();

    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut def_node: Option<Node> = None;
        let mut params_node: Option<Node> = None;
        let mut return_node: Option<Node> = None;

        for cap in m.captures {
            match query.capture_names()[cap.index as usize] {
                "name" => name_node = Some(cap.node),
                "def" => def_node = Some(cap.node),
                "params" => params_node = Some(cap.node),
                "return_type" => return_node = Some(cap.node),
                _ => {}
            }
        }

        let Some(name_node) = name_node else { continue };
        let def_node = def_node.unwrap_or(name_node);
        let name = node_text(source, name_node).trim().to_string();
        if name.is_empty() {
            continue;
        }

        let parent = enclosing_container_name(source, def_node, spec.parent_kinds);
        let qualified_name = match &parent {
            Some(p) => format!("{p}::{name}"),
            None => name.clone(),
        };

        out.push(CodeEntity {
            name,
            qualified_name,
            entity_type: spec.entity_type.to_string(),
            start_line: def_node.start_position().row as i32 + 1,
            end_line: def_node.end_position().row as i32 + 1,
            docstring: preceding_comment(source, def_node),
            parameters: params_node.map(|n| split_params(node_text(source, n))).unwrap_or_default(),
            return_type: return_node.map(|n| node_text(source, n).trim().to_string()),
            parent_context: parent,
        });
    }

    Ok(out)
}

struct RustDriver;
impl LanguageDriver for RustDriver {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "rs"
    }

    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_rust::language()
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();
        let parent_kinds = ["impl_item", "trait_item", "mod_item"];

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(function_item name: (identifier) @name parameters: (parameters) @params return_type: (_)? @return_type) @def"#,
                entity_type: "function",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(struct_item name: (type_identifier) @name) @def"#,
                entity_type: "struct",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(enum_item name: (type_identifier) @name) @def"#,
                entity_type: "enum",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(trait_item name: (type_identifier) @name) @def"#,
                entity_type: "trait",
                parent_kinds: &parent_kinds,
            },
        )?);
        Ok(entities)
    }
}

struct TypeScriptDriver;
impl LanguageDriver for TypeScriptDriver {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        let ext = path_ext_lower(path);
        if matches!(ext.as_str(), "ts" | "tsx" | "mts" | "cts" | "js" | "jsx" | "mjs" | "cjs") {
            return true;
        }
        file_name_lower(path).ends_with(".d.ts")
    }

    fn language_for_path(&self, path: &Path) -> Language {
        let ext = path_ext_lower(path);
        if ext == "tsx" || ext == "jsx" {
            tree_sitter_typescript::language_tsx()
        } else {
            tree_sitter_typescript::language_typescript()
        }
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();
        let parent_kinds = ["class_declaration"];

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(function_declaration name: (identifier) @name parameters: (formal_parameters) @params) @def"#,
                entity_type: "function",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(class_declaration name: (type_identifier) @name) @def"#,
                entity_type: "class",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(method_definition name: (property_identifier) @name parameters: (formal_parameters) @params) @def"#,
                entity_type: "method",
                parent_kinds: &parent_kinds,
            },
        )?);
        Ok(entities)
    }
}

struct PythonDriver;
impl LanguageDriver for PythonDriver {
    fn name(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "py"
    }

    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_python::language()
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();
        let parent_kinds = ["class_definition"];

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(function_definition name: (identifier) @name parameters: (parameters) @params) @def"#,
                entity_type: "function",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(class_definition name: (identifier) @name) @def"#,
                entity_type: "class",
                parent_kinds: &parent_kinds,
            },
        )?);
        Ok(entities)
    }
}

fn is_go_exported_ident(name: &str) -> bool {
    name.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
}

#[cfg(feature = "lang-go")]
struct GoDriver;

#[cfg(feature = "lang-go")]
impl LanguageDriver for GoDriver {
    fn name(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "go"
    }

    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_go::language()
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(function_declaration name: (identifier) @name parameters: (parameter_list) @params) @def"#,
                entity_type: "function",
                parent_kinds: &[],
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(method_declaration receiver: (parameter_list) @receiver name: (field_identifier) @name parameters: (parameter_list) @params) @def"#,
                entity_type: "method",
                parent_kinds: &[],
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(type_spec name: (type_identifier) @name) @def"#,
                entity_type: "type",
                parent_kinds: &[],
            },
        )?);

        entities.retain(|e| e.entity_type != "type" || is_go_exported_ident(&e.name));
        Ok(entities)
    }
}

#[cfg(feature = "lang-java")]
struct JavaDriver;

#[cfg(feature = "lang-java")]
impl LanguageDriver for JavaDriver {
    fn name(&self) -> &'static str {
        "java"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "java"
    }

    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_java::language()
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();
        let parent_kinds = ["class_declaration", "interface_declaration"];

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(class_declaration name: (identifier) @name) @def"#,
                entity_type: "class",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(interface_declaration name: (identifier) @name) @def"#,
                entity_type: "interface",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(method_declaration name: (identifier) @name parameters: (formal_parameters) @params) @def"#,
                entity_type: "method",
                parent_kinds: &parent_kinds,
            },
        )?);
        Ok(entities)
    }
}

#[cfg(feature = "lang-csharp")]
struct CSharpDriver;

#[cfg(feature = "lang-csharp")]
impl LanguageDriver for CSharpDriver {
    fn name(&self) -> &'static str {
        "csharp"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["cs"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "cs"
    }

    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_c_sharp::language()
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();
        let parent_kinds = ["class_declaration", "struct_declaration", "interface_declaration"];

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(class_declaration name: (identifier) @name) @def"#,
                entity_type: "class",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(method_declaration name: (identifier) @name parameters: (parameter_list) @params) @def"#,
                entity_type: "method",
                parent_kinds: &parent_kinds,
            },
        )?);
        Ok(entities)
    }
}

#[cfg(feature = "lang-php")]
struct PhpDriver;

#[cfg(feature = "lang-php")]
impl LanguageDriver for PhpDriver {
    fn name(&self) -> &'static str {
        "php"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["php"]
    }

    fn handles_path(&self, path: &Path) -> bool {
        path_ext_lower(path) == "php"
    }

    fn language_for_path(&self, _path: &Path) -> Language {
        tree_sitter_php::LANGUAGE_PHP.into()
    }

    fn extract_entities(&self, source: &[u8], root: Node, language: Language) -> Result<Vec<CodeEntity>> {
        let mut entities = Vec::new();
        let parent_kinds = ["class_declaration"];

        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(class_declaration name: (name) @name) @def"#,
                entity_type: "class",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(function_definition name: (name) @name parameters: (formal_parameters) @params) @def"#,
                entity_type: "function",
                parent_kinds: &parent_kinds,
            },
        )?);
        entities.extend(run_entity_query(
            source,
            root,
            &language,
            &EntityQuery {
                query_src: r#"(method_declaration name: (name) @name parameters: (formal_parameters) @params) @def"#,
                entity_type: "method",
                parent_kinds: &parent_kinds,
            },
        )?);
        Ok(entities)
    }
}

struct LanguageConfig {
    drivers: Vec<Box<dyn LanguageDriver>>,
    by_ext: HashMap<String, usize>,
}

impl LanguageConfig {
    fn driver_for_path(&self, path: &Path) -> Option<&dyn LanguageDriver> {
        for driver in &self.drivers {
            if driver.handles_path(path) {
                return Some(driver.as_ref());
            }
        }
        let ext = path_ext_lower(path);
        self.by_ext.get(&ext).map(|idx| self.drivers[*idx].as_ref())
    }
}

impl Default for LanguageConfig {
    fn default() -> Self {
        let mut drivers: Vec<Box<dyn LanguageDriver>> = vec![
            Box::new(RustDriver),
            Box::new(TypeScriptDriver),
            Box::new(PythonDriver),
        ];

        #[cfg(feature = "lang-go")]
        drivers.push(Box::new(GoDriver));

        #[cfg(feature = "lang-java")]
        drivers.push(Box::new(JavaDriver));

        #[cfg(feature = "lang-csharp")]
        drivers.push(Box::new(CSharpDriver));

        #[cfg(feature = "lang-php")]
        drivers.push(Box::new(PhpDriver));

        let mut cfg = Self { drivers, by_ext: HashMap::new() };
        for (idx, d) in cfg.drivers.iter().enumerate() {
            for ext in d.extensions() {
                cfg.by_ext.insert(ext.to_string(), idx);
            }
        }
        cfg
    }
}

fn language_config() -> &'static LanguageConfig {
    static CFG: OnceLock<LanguageConfig> = OnceLock::new();
    CFG.get_or_init(LanguageConfig::default)
}

/// True if some registered driver recognizes this path as source code.
pub fn is_source_file(path: &Path) -> bool {
    language_config().driver_for_path(path).is_some()
}

/// Parses `source_text` and extracts its code entities. Files with no
/// matching driver (unrecognized extension) yield an empty entity list —
/// callers fall back to a single module-level chunk (§4.2).
pub fn extract_entities(path: &Path, source_text: &str) -> Result<Vec<CodeEntity>> {
    let Some(driver) = language_config().driver_for_path(path) else {
        return Ok(vec![]);
    };

    let language = driver.language_for_path(path);
    let mut parser = Parser::new();
    parser
        .set_language(language)
        .context("tree-sitter grammar version mismatch")?;
    let tree = parser
        .parse(source_text, None)
        .ok_or_else(|| anyhow!("failed to parse {}", path.display()))?;

    driver.extract_entities(source_text.as_bytes(), tree.root_node(), language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_rust_function() {
        let src = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let entities = extract_entities(Path::new("lib.rs"), src).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "add");
        assert_eq!(entities[0].entity_type, "function");
        assert_eq!(entities[0].parameters, vec!["a: i32", "b: i32"]);
        assert_eq!(entities[0].return_type.as_deref(), Some("i32"));
    }

    #[test]
    fn extracts_rust_struct_and_enum() {
        let src = "struct Point { x: i32 }\nenum Color { Red, Blue }\n";
        let entities = extract_entities(Path::new("shapes.rs"), src).unwrap();
        let names: Vec<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Point"));
        assert!(names.contains(&"Color"));
    }

    #[test]
    fn attaches_preceding_doc_comment() {
        let src = "/// Adds two numbers.\nfn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let entities = extract_entities(Path::new("lib.rs"), src).unwrap();
        assert_eq!(entities[0].docstring.as_deref(), Some("/// Adds two numbers."));
    }

    #[test]
    fn extracts_typescript_class_and_methods() {
        let src = "class Greeter {\n  greet(name: string) {\n    return name;\n  }\n}\n";
        let entities = extract_entities(Path::new("greeter.ts"), src).unwrap();
        let method = entities.iter().find(|e| e.entity_type == "method").unwrap();
        assert_eq!(method.qualified_name, "Greeter::greet");
    }

    #[test]
    fn extracts_python_function() {
        let src = "def add(a, b):\n    return a + b\n";
        let entities = extract_entities(Path::new("mod.py"), src).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "add");
    }

    #[test]
    fn unrecognized_extension_returns_empty() {
        let entities = extract_entities(Path::new("notes.txt"), "hello").unwrap();
        assert!(entities.is_empty());
    }
}
