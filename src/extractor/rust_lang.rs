use crate::extractor::{
    CallSite, ExtractedFile, ImportInput, LanguageExtractor, SymbolInput, complexity_of,
    line_span, node_text,
};
use anyhow::Result;
use std::path::Path;
use tree_sitter::{Node, Parser};

const BRANCH_KINDS: &[&str] = &[
    "if_expression",
    "while_expression",
    "for_expression",
    "loop_expression",
    "match_arm",
    "try_expression",
];

const BRANCH_OPERATORS: &[&str] = &["&&", "||"];

pub struct RustExtractor {
    parser: Parser,
}

impl RustExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_rust::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for RustExtractor {
    fn module_name_from_rel_path(&self, rel_path: &str) -> String {
        module_name_from_rel_path(rel_path)
    }

    fn extract(&mut self, source: &str, module_name: &str) -> Result<ExtractedFile> {
        let mut output = ExtractedFile::default();
        let Some(tree) = self.parser.parse(source, None) else {
            anyhow::bail!("parse failed for module {}", module_name);
        };
        let root = tree.root_node();

        let (start_line, end_line) = line_span(root);
        output.symbols.push(SymbolInput {
            kind: "module".to_string(),
            name: module_name
                .rsplit("::")
                .next()
                .unwrap_or(module_name)
                .to_string(),
            qualname: module_name.to_string(),
            start_line,
            end_line: end_line.max(1),
            signature: None,
            docstring: None,
            complexity: 1,
            class_owner: None,
            base_classes: Vec::new(),
        });

        walk(root, module_name, None, source, &mut output);

        // trait impls become base classes on the implementing type
        attach_trait_impls(root, source, &mut output);
        Ok(output)
    }
}

pub fn module_name_from_rel_path(rel_path: &str) -> String {
    let path = Path::new(rel_path);
    let mut parts: Vec<String> = path
        .components()
        .filter_map(|comp| comp.as_os_str().to_str().map(|s| s.to_string()))
        .collect();
    if let Some(file) = parts.pop() {
        let stem = Path::new(&file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&file)
            .to_string();
        if stem != "mod" && stem != "lib" && stem != "main" {
            parts.push(stem);
        }
    }
    if parts.is_empty() {
        "crate".to_string()
    } else {
        parts.join("::")
    }
}

fn walk(
    node: Node<'_>,
    module: &str,
    owner: Option<&str>,
    source: &str,
    output: &mut ExtractedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_item" => handle_function(child, module, owner, source, output),
            "struct_item" | "enum_item" | "trait_item" => {
                handle_type(child, module, source, output);
                if child.kind() == "trait_item" {
                    if let Some(body) = child.child_by_field_name("body") {
                        let name = child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, source))
                            .unwrap_or_default();
                        walk(body, module, Some(&name), source, output);
                    }
                }
            }
            "impl_item" => {
                let type_name = child
                    .child_by_field_name("type")
                    .map(|t| type_base_name(t, source))
                    .unwrap_or_default();
                if let Some(body) = child.child_by_field_name("body") {
                    walk(body, module, Some(&type_name), source, output);
                }
            }
            "use_declaration" => handle_use(child, source, output),
            "call_expression" => {
                handle_call(child, module, owner, source, output);
                walk(child, module, owner, source, output);
            }
            "mod_item" => {
                // inline modules keep the file's module as qualname root
                walk(child, module, owner, source, output);
            }
            _ => walk(child, module, owner, source, output),
        }
    }
}

fn handle_function(
    node: Node<'_>,
    module: &str,
    owner: Option<&str>,
    source: &str,
    output: &mut ExtractedFile,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    let (kind, qualname, class_owner) = match owner {
        Some(owner) if !owner.is_empty() => (
            "method",
            format!("{}::{}::{}", module, owner, name),
            Some(format!("{}::{}", module, owner)),
        ),
        _ => ("function", format!("{}::{}", module, name), None),
    };
    let (start_line, end_line) = line_span(node);
    let params = node
        .child_by_field_name("parameters")
        .map(|p| node_text(p, source))
        .unwrap_or_else(|| "()".to_string());

    output.symbols.push(SymbolInput {
        kind: kind.to_string(),
        name,
        qualname: qualname.clone(),
        start_line,
        end_line,
        signature: Some(format!("fn {}{}", node_text(name_node, source), params)),
        docstring: None,
        complexity: complexity_of(node, BRANCH_KINDS, BRANCH_OPERATORS, source),
        class_owner,
        base_classes: Vec::new(),
    });

    if let Some(body) = node.child_by_field_name("body") {
        collect_calls(body, Some(&qualname), source, output);
    }
}

fn handle_type(node: Node<'_>, module: &str, source: &str, output: &mut ExtractedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    let (start_line, end_line) = line_span(node);
    output.symbols.push(SymbolInput {
        kind: "class".to_string(),
        name: name.clone(),
        qualname: format!("{}::{}", module, name),
        start_line,
        end_line,
        signature: None,
        docstring: None,
        complexity: 1,
        class_owner: None,
        base_classes: Vec::new(),
    });
}

fn collect_calls(
    node: Node<'_>,
    caller: Option<&str>,
    source: &str,
    output: &mut ExtractedFile,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "call_expression" {
            if let Some(function) = child.child_by_field_name("function") {
                if let Some(callee_name) = call_target_name(function, source) {
                    output.calls.push(CallSite {
                        caller_qualname: caller.map(str::to_string),
                        callee_name,
                        line: child.start_position().row as i64 + 1,
                    });
                }
            }
        }
        collect_calls(child, caller, source, output);
    }
}

fn handle_call(
    node: Node<'_>,
    _module: &str,
    _owner: Option<&str>,
    source: &str,
    output: &mut ExtractedFile,
) {
    // calls outside any function body (const initializers and the like)
    if let Some(function) = node.child_by_field_name("function") {
        if let Some(callee_name) = call_target_name(function, source) {
            output.calls.push(CallSite {
                caller_qualname: None,
                callee_name,
                line: node.start_position().row as i64 + 1,
            });
        }
    }
}

fn call_target_name(function: Node<'_>, source: &str) -> Option<String> {
    let name = match function.kind() {
        "identifier" => node_text(function, source),
        "scoped_identifier" => function
            .child_by_field_name("name")
            .map(|n| node_text(n, source))
            .unwrap_or_default(),
        "field_expression" => function
            .child_by_field_name("field")
            .map(|n| node_text(n, source))
            .unwrap_or_default(),
        _ => return None,
    };
    if name.is_empty() { None } else { Some(name) }
}

fn handle_use(node: Node<'_>, source: &str, output: &mut ExtractedFile) {
    let line = node.start_position().row as i64 + 1;
    let text = node_text(node, source);
    let trimmed = text
        .trim_start_matches("pub ")
        .trim_start_matches("use ")
        .trim_end_matches(';')
        .trim();
    if trimmed.is_empty() {
        return;
    }
    // `a::b::{c, d as e}` expands to one import row per leaf
    if let Some((prefix, group)) = trimmed.split_once('{') {
        let module = prefix.trim_end_matches("::").trim().to_string();
        for leaf in group.trim_end_matches('}').split(',') {
            let leaf = leaf.trim();
            if leaf.is_empty() {
                continue;
            }
            let (name, alias) = split_alias(leaf);
            output.imports.push(ImportInput {
                module: module.clone(),
                imported_name: Some(name),
                alias,
                line,
            });
        }
        return;
    }
    let (path, alias) = split_alias(trimmed);
    match path.rsplit_once("::") {
        Some((module, name)) => output.imports.push(ImportInput {
            module: module.to_string(),
            imported_name: Some(name.to_string()),
            alias,
            line,
        }),
        None => output.imports.push(ImportInput {
            module: path,
            imported_name: None,
            alias,
            line,
        }),
    }
}

fn split_alias(value: &str) -> (String, Option<String>) {
    match value.split_once(" as ") {
        Some((name, alias)) => (name.trim().to_string(), Some(alias.trim().to_string())),
        None => (value.trim().to_string(), None),
    }
}

fn type_base_name(node: Node<'_>, source: &str) -> String {
    match node.kind() {
        "generic_type" => node
            .child_by_field_name("type")
            .map(|t| type_base_name(t, source))
            .unwrap_or_default(),
        "scoped_type_identifier" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source))
            .unwrap_or_default(),
        _ => node_text(node, source),
    }
}

fn attach_trait_impls(root: Node<'_>, source: &str, output: &mut ExtractedFile) {
    let mut cursor = root.walk();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        for child in node.children(&mut cursor) {
            if child.kind() == "impl_item" {
                let trait_name = child
                    .child_by_field_name("trait")
                    .map(|t| type_base_name(t, source));
                let type_name = child
                    .child_by_field_name("type")
                    .map(|t| type_base_name(t, source));
                if let (Some(trait_name), Some(type_name)) = (trait_name, type_name) {
                    if let Some(symbol) = output
                        .symbols
                        .iter_mut()
                        .find(|s| s.kind == "class" && s.name == type_name)
                    {
                        if !symbol.base_classes.contains(&trait_name) {
                            symbol.base_classes.push(trait_name);
                        }
                    }
                }
            }
            stack.push(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> ExtractedFile {
        let mut extractor = RustExtractor::new().unwrap();
        extractor.extract(source, "app::engine").unwrap()
    }

    #[test]
    fn test_extracts_functions_and_methods() {
        let out = extract(
            "struct Engine;\n\nimpl Engine {\n    fn start(&self) {\n        ignite();\n    }\n}\n\nfn ignite() {}\n",
        );
        let engine = out.symbols.iter().find(|s| s.name == "Engine").unwrap();
        assert_eq!(engine.kind, "class");
        let start = out.symbols.iter().find(|s| s.name == "start").unwrap();
        assert_eq!(start.kind, "method");
        assert_eq!(start.class_owner.as_deref(), Some("app::engine::Engine"));
        let call = out.calls.iter().find(|c| c.callee_name == "ignite").unwrap();
        assert_eq!(
            call.caller_qualname.as_deref(),
            Some("app::engine::Engine::start")
        );
    }

    #[test]
    fn test_trait_impl_becomes_base_class() {
        let out = extract("struct Disk;\n\ntrait Storage {}\n\nimpl Storage for Disk {}\n");
        let disk = out.symbols.iter().find(|s| s.name == "Disk").unwrap();
        assert_eq!(disk.base_classes, vec!["Storage".to_string()]);
    }

    #[test]
    fn test_use_declaration_rows() {
        let out = extract("use std::collections::{HashMap, HashSet as Set};\nuse anyhow::Result;\n");
        assert_eq!(out.imports.len(), 3);
        assert_eq!(out.imports[0].module, "std::collections");
        assert_eq!(out.imports[1].alias.as_deref(), Some("Set"));
        assert_eq!(out.imports[2].imported_name.as_deref(), Some("Result"));
    }
}
