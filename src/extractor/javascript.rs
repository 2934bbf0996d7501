use crate::extractor::{
    CallSite, ExtractedFile, ImportInput, LanguageExtractor, SymbolInput, complexity_of,
    line_span, node_text,
};
use anyhow::Result;
use std::path::Path;
use tree_sitter::{Node, Parser};

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "switch_case",
    "catch_clause",
    "ternary_expression",
];

const BRANCH_OPERATORS: &[&str] = &["&&", "||", "??"];

#[derive(Clone)]
struct Context {
    module: String,
    class_stack: Vec<String>,
    fn_stack: Vec<String>,
}

impl Context {
    fn scope_qualname(&self) -> Option<String> {
        self.fn_stack.last().cloned()
    }

    fn container(&self) -> String {
        if self.class_stack.is_empty() {
            self.module.clone()
        } else {
            format!("{}.{}", self.module, self.class_stack.join("."))
        }
    }
}

pub struct JavaScriptExtractor {
    parser: Parser,
}

impl JavaScriptExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_javascript::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for JavaScriptExtractor {
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
                .rsplit('.')
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

        let ctx = Context {
            module: module_name.to_string(),
            class_stack: Vec::new(),
            fn_stack: Vec::new(),
        };
        walk(root, &ctx, source, &mut output);
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
        if stem != "index" {
            parts.push(stem);
        }
    }
    if parts.is_empty() {
        "index".to_string()
    } else {
        parts.join(".")
    }
}

fn walk(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "function_declaration" | "generator_function_declaration" => {
                handle_function(child, ctx, source, output);
            }
            "class_declaration" => handle_class(child, ctx, source, output),
            "method_definition" => handle_method(child, ctx, source, output),
            "lexical_declaration" | "variable_declaration" => {
                handle_declaration(child, ctx, source, output);
            }
            "import_statement" => handle_import(child, source, output),
            "call_expression" => {
                handle_call(child, ctx, source, output);
                walk(child, ctx, source, output);
            }
            "export_statement" => walk(child, ctx, source, output),
            _ => walk(child, ctx, source, output),
        }
    }
}

fn handle_function(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    emit_function(node, ctx, &name, "function", source, output);
}

fn handle_class(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    let qualname = format!("{}.{}", ctx.container(), name);
    let (start_line, end_line) = line_span(node);

    output.symbols.push(SymbolInput {
        kind: "class".to_string(),
        name: name.clone(),
        qualname,
        start_line,
        end_line,
        signature: None,
        docstring: None,
        complexity: 1,
        class_owner: None,
        base_classes: heritage_names(node, source),
    });

    let mut inner = ctx.clone();
    inner.class_stack.push(name);
    if let Some(body) = node.child_by_field_name("body") {
        walk(body, &inner, source, output);
    }
}

fn handle_method(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    if ctx.class_stack.is_empty() {
        // object-literal methods are recorded as plain functions
        emit_function(node, ctx, &name, "function", source, output);
    } else {
        emit_function(node, ctx, &name, "method", source, output);
    }
}

/// `const f = () => ...` and `const f = function() {}` bindings become
/// functions; any other top-level declarator becomes a variable symbol.
fn handle_declaration(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "variable_declarator" {
            continue;
        }
        let Some(name_node) = child.child_by_field_name("name") else {
            continue;
        };
        let value = child.child_by_field_name("value");
        match value.map(|v| v.kind()) {
            Some("arrow_function" | "function_expression" | "generator_function") => {
                let name = node_text(name_node, source);
                if let Some(value) = value {
                    emit_fn_body(value, node, ctx, &name, "function", source, output);
                }
            }
            _ => {
                emit_variable(child, name_node, ctx, source, output);
                walk(child, ctx, source, output);
            }
        }
    }
}

fn emit_variable(
    declarator: Node<'_>,
    name_node: Node<'_>,
    ctx: &Context,
    source: &str,
    output: &mut ExtractedFile,
) {
    if !ctx.fn_stack.is_empty() || !ctx.class_stack.is_empty() || name_node.kind() != "identifier" {
        return;
    }
    let name = node_text(name_node, source);
    let qualname = format!("{}.{}", ctx.container(), name);
    if output.symbols.iter().any(|s| s.qualname == qualname) {
        return;
    }
    let (start_line, end_line) = line_span(declarator);
    output.symbols.push(SymbolInput {
        kind: "variable".to_string(),
        name,
        qualname,
        start_line,
        end_line,
        signature: None,
        docstring: None,
        complexity: 1,
        class_owner: None,
        base_classes: Vec::new(),
    });
}

fn emit_function(
    node: Node<'_>,
    ctx: &Context,
    name: &str,
    kind: &str,
    source: &str,
    output: &mut ExtractedFile,
) {
    emit_fn_body(node, node, ctx, name, kind, source, output);
}

fn emit_fn_body(
    fn_node: Node<'_>,
    span_node: Node<'_>,
    ctx: &Context,
    name: &str,
    kind: &str,
    source: &str,
    output: &mut ExtractedFile,
) {
    let qualname = format!(
        "{}.{}",
        ctx.scope_qualname().unwrap_or_else(|| ctx.container()),
        name
    );
    let nested = !ctx.fn_stack.is_empty();
    let (start_line, end_line) = line_span(span_node);

    if !nested {
        let params = fn_node
            .child_by_field_name("parameters")
            .map(|p| node_text(p, source))
            .unwrap_or_else(|| "()".to_string());
        output.symbols.push(SymbolInput {
            kind: kind.to_string(),
            name: name.to_string(),
            qualname: qualname.clone(),
            start_line,
            end_line,
            signature: Some(format!("{}{}", name, params)),
            docstring: None,
            complexity: complexity_of(fn_node, BRANCH_KINDS, BRANCH_OPERATORS, source),
            class_owner: if kind == "method" {
                Some(ctx.container())
            } else {
                None
            },
            base_classes: Vec::new(),
        });
    }

    let mut inner = ctx.clone();
    inner.fn_stack.push(qualname);
    if let Some(body) = fn_node.child_by_field_name("body") {
        walk(body, &inner, source, output);
    }
}

fn handle_call(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    let callee_name = match function.kind() {
        "identifier" => node_text(function, source),
        "member_expression" => function
            .child_by_field_name("property")
            .map(|prop| node_text(prop, source))
            .unwrap_or_default(),
        _ => return,
    };
    if callee_name.is_empty() {
        return;
    }
    output.calls.push(CallSite {
        caller_qualname: ctx.scope_qualname(),
        callee_name,
        line: node.start_position().row as i64 + 1,
    });
}

fn handle_import(node: Node<'_>, source: &str, output: &mut ExtractedFile) {
    let line = node.start_position().row as i64 + 1;
    let Some(source_node) = node.child_by_field_name("source") else {
        return;
    };
    let module = node_text(source_node, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();

    let mut named = Vec::new();
    collect_import_names(node, source, &mut named);
    if named.is_empty() {
        output.imports.push(ImportInput {
            module,
            imported_name: None,
            alias: None,
            line,
        });
        return;
    }
    for (imported_name, alias) in named {
        output.imports.push(ImportInput {
            module: module.clone(),
            imported_name,
            alias,
            line,
        });
    }
}

fn collect_import_names(
    node: Node<'_>,
    source: &str,
    out: &mut Vec<(Option<String>, Option<String>)>,
) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_specifier" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source));
                let alias = child
                    .child_by_field_name("alias")
                    .map(|n| node_text(n, source));
                out.push((name, alias));
            }
            "namespace_import" => {
                let alias = child
                    .children(&mut child.walk())
                    .find(|n| n.kind() == "identifier")
                    .map(|n| node_text(n, source));
                out.push((Some("*".to_string()), alias));
            }
            "identifier" => {
                // default import
                out.push((Some("default".to_string()), Some(node_text(child, source))));
            }
            "import_clause" | "named_imports" => collect_import_names(child, source, out),
            _ => {}
        }
    }
}

fn heritage_names(node: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "class_heritage" {
            continue;
        }
        let mut inner = child.walk();
        for part in child.children(&mut inner) {
            match part.kind() {
                "identifier" => names.push(node_text(part, source)),
                "member_expression" => {
                    if let Some(prop) = part.child_by_field_name("property") {
                        names.push(node_text(prop, source));
                    }
                }
                _ => {}
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> ExtractedFile {
        let mut extractor = JavaScriptExtractor::new().unwrap();
        extractor.extract(source, "web.app").unwrap()
    }

    #[test]
    fn test_extracts_class_and_methods() {
        let out = extract(
            "class Widget extends Base {\n  render() {\n    return draw();\n  }\n}\n",
        );
        let widget = out.symbols.iter().find(|s| s.name == "Widget").unwrap();
        assert_eq!(widget.kind, "class");
        assert_eq!(widget.base_classes, vec!["Base".to_string()]);
        let render = out.symbols.iter().find(|s| s.name == "render").unwrap();
        assert_eq!(render.kind, "method");
        assert_eq!(render.qualname, "web.app.Widget.render");
        assert!(out.calls.iter().any(|c| c.callee_name == "draw"));
    }

    #[test]
    fn test_extracts_arrow_function_binding() {
        let out = extract("const handler = (req) => {\n  respond(req);\n};\n");
        let handler = out.symbols.iter().find(|s| s.name == "handler").unwrap();
        assert_eq!(handler.kind, "function");
        let call = out.calls.iter().find(|c| c.callee_name == "respond").unwrap();
        assert_eq!(call.caller_qualname.as_deref(), Some("web.app.handler"));
    }

    #[test]
    fn test_top_level_declarator_becomes_variable() {
        let out = extract(
            "const MAX_RETRIES = 3;\nlet cache;\n\nfunction run() {\n  const local = 1;\n  return local;\n}\n",
        );
        let vars: Vec<_> = out.symbols.iter().filter(|s| s.kind == "variable").collect();
        let names: Vec<_> = vars.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["MAX_RETRIES", "cache"]);
        assert_eq!(vars[0].qualname, "web.app.MAX_RETRIES");
    }

    #[test]
    fn test_extracts_imports() {
        let out = extract("import fs from 'fs';\nimport { join as j } from 'path';\n");
        assert_eq!(out.imports.len(), 2);
        assert_eq!(out.imports[0].module, "fs");
        assert_eq!(out.imports[1].module, "path");
        assert_eq!(out.imports[1].imported_name.as_deref(), Some("join"));
        assert_eq!(out.imports[1].alias.as_deref(), Some("j"));
    }
}
