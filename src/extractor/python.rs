use crate::extractor::{
    CallSite, ExtractedFile, ImportInput, LanguageExtractor, SymbolInput, complexity_of,
    line_span, node_text,
};
use anyhow::Result;
use std::path::Path;
use tree_sitter::{Node, Parser};

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "except_clause",
    "case_clause",
    "conditional_expression",
];

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

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }
}

impl LanguageExtractor for PythonExtractor {
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
            docstring: extract_docstring(root, source),
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
    if parts.is_empty() {
        return "__init__".to_string();
    }
    let file = parts.pop().unwrap_or_default();
    let stem = Path::new(&file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file)
        .to_string();
    if stem != "__init__" {
        parts.push(stem);
    }
    if parts.is_empty() {
        "__init__".to_string()
    } else {
        parts.join(".")
    }
}

fn walk(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "decorated_definition" => {
                if let Some(definition) = child.child_by_field_name("definition") {
                    dispatch_definition(definition, ctx, source, output);
                } else {
                    walk(child, ctx, source, output);
                }
            }
            "class_definition" | "function_definition" => {
                dispatch_definition(child, ctx, source, output);
            }
            "import_statement" => handle_import(child, source, output),
            "import_from_statement" => handle_import_from(child, source, output),
            "expression_statement" => {
                handle_assignment(child, ctx, source, output);
                walk(child, ctx, source, output);
            }
            "call" => {
                handle_call(child, ctx, source, output);
                walk(child, ctx, source, output);
            }
            _ => walk(child, ctx, source, output),
        }
    }
}

fn dispatch_definition(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    match node.kind() {
        "class_definition" => handle_class(node, ctx, source, output),
        "function_definition" => handle_function(node, ctx, source, output),
        _ => walk(node, ctx, source, output),
    }
}

fn handle_class(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    // nested classes inside functions are treated as local detail
    if !ctx.fn_stack.is_empty() {
        walk(node, ctx, source, output);
        return;
    }
    let name = node_text(name_node, source);
    let qualname = format!("{}.{}", ctx.container(), name);
    let (start_line, end_line) = line_span(node);
    let base_classes = superclass_names(node, source);
    let docstring = node
        .child_by_field_name("body")
        .and_then(|body| extract_docstring(body, source));

    output.symbols.push(SymbolInput {
        kind: "class".to_string(),
        name: name.clone(),
        qualname: qualname.clone(),
        start_line,
        end_line,
        signature: None,
        docstring,
        complexity: 1,
        class_owner: ctx.class_stack.last().map(|_| ctx.container()),
        base_classes,
    });

    let mut inner = ctx.clone();
    inner.class_stack.push(name);
    if let Some(body) = node.child_by_field_name("body") {
        walk(body, &inner, source, output);
    }
}

fn handle_function(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    let qualname = format!(
        "{}.{}",
        ctx.scope_qualname().unwrap_or_else(|| ctx.container()),
        name
    );
    let (start_line, end_line) = line_span(node);
    let nested = !ctx.fn_stack.is_empty();

    if !nested {
        let kind = if ctx.class_stack.is_empty() {
            "function"
        } else {
            "method"
        };
        let params = node
            .child_by_field_name("parameters")
            .map(|p| node_text(p, source))
            .unwrap_or_else(|| "()".to_string());
        let docstring = node
            .child_by_field_name("body")
            .and_then(|body| extract_docstring(body, source));
        output.symbols.push(SymbolInput {
            kind: kind.to_string(),
            name: name.clone(),
            qualname: qualname.clone(),
            start_line,
            end_line,
            signature: Some(format!("def {}{}", name, params)),
            docstring,
            complexity: complexity_of(node, BRANCH_KINDS, &[], source),
            class_owner: if ctx.class_stack.is_empty() {
                None
            } else {
                Some(ctx.container())
            },
            base_classes: Vec::new(),
        });
    }

    let mut inner = ctx.clone();
    inner.fn_stack.push(qualname);
    if let Some(body) = node.child_by_field_name("body") {
        walk(body, &inner, source, output);
    }
}

/// Module-level `NAME = value` bindings become variable symbols. Bindings
/// inside functions and classes are local detail and are skipped.
fn handle_assignment(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    if !ctx.fn_stack.is_empty() || !ctx.class_stack.is_empty() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "assignment" {
            continue;
        }
        let Some(left) = child.child_by_field_name("left") else {
            continue;
        };
        if left.kind() != "identifier" {
            continue;
        }
        let name = node_text(left, source);
        let qualname = format!("{}.{}", ctx.container(), name);
        // re-assignment of the same module name is a single symbol
        if output.symbols.iter().any(|s| s.qualname == qualname) {
            continue;
        }
        let (start_line, end_line) = line_span(child);
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
}

fn handle_call(node: Node<'_>, ctx: &Context, source: &str, output: &mut ExtractedFile) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    let callee_name = match function.kind() {
        "identifier" => node_text(function, source),
        "attribute" => function
            .child_by_field_name("attribute")
            .map(|attr| node_text(attr, source))
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
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "dotted_name" => {
                output.imports.push(ImportInput {
                    module: node_text(child, source),
                    imported_name: None,
                    alias: None,
                    line,
                });
            }
            "aliased_import" => {
                let module = child
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source))
                    .unwrap_or_default();
                let alias = child
                    .child_by_field_name("alias")
                    .map(|n| node_text(n, source));
                if !module.is_empty() {
                    output.imports.push(ImportInput {
                        module,
                        imported_name: None,
                        alias,
                        line,
                    });
                }
            }
            _ => {}
        }
    }
}

fn handle_import_from(node: Node<'_>, source: &str, output: &mut ExtractedFile) {
    let line = node.start_position().row as i64 + 1;
    let Some(module_node) = node.child_by_field_name("module_name") else {
        return;
    };
    let module = node_text(module_node, source);

    let mut cursor = node.walk();
    let mut saw_name = false;
    for child in node.children(&mut cursor) {
        if child.id() == module_node.id() {
            continue;
        }
        match child.kind() {
            "dotted_name" | "identifier" => {
                saw_name = true;
                output.imports.push(ImportInput {
                    module: module.clone(),
                    imported_name: Some(node_text(child, source)),
                    alias: None,
                    line,
                });
            }
            "aliased_import" => {
                saw_name = true;
                let imported = child
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source));
                let alias = child
                    .child_by_field_name("alias")
                    .map(|n| node_text(n, source));
                output.imports.push(ImportInput {
                    module: module.clone(),
                    imported_name: imported,
                    alias,
                    line,
                });
            }
            "wildcard_import" => {
                saw_name = true;
                output.imports.push(ImportInput {
                    module: module.clone(),
                    imported_name: Some("*".to_string()),
                    alias: None,
                    line,
                });
            }
            _ => {}
        }
    }
    if !saw_name {
        output.imports.push(ImportInput {
            module,
            imported_name: None,
            alias: None,
            line,
        });
    }
}

fn superclass_names(node: Node<'_>, source: &str) -> Vec<String> {
    let Some(superclasses) = node.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut cursor = superclasses.walk();
    for child in superclasses.children(&mut cursor) {
        match child.kind() {
            "identifier" => names.push(node_text(child, source)),
            "attribute" => {
                // keep the last segment of dotted bases like module.Base
                if let Some(attr) = child.child_by_field_name("attribute") {
                    names.push(node_text(attr, source));
                }
            }
            _ => {}
        }
    }
    names
}

fn extract_docstring(body: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = body.walk();
    for child in body.children(&mut cursor) {
        match child.kind() {
            "comment" => continue,
            "expression_statement" => {
                let inner = child.child(0)?;
                if inner.kind() == "string" {
                    return unquote(&node_text(inner, source));
                }
                return None;
            }
            _ => return None,
        }
    }
    None
}

fn unquote(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if trimmed.len() >= quote.len() * 2
            && trimmed.starts_with(quote)
            && trimmed.ends_with(quote)
        {
            return Some(trimmed[quote.len()..trimmed.len() - quote.len()].trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> ExtractedFile {
        let mut extractor = PythonExtractor::new().unwrap();
        extractor.extract(source, "pkg.sample").unwrap()
    }

    #[test]
    fn test_module_name_from_rel_path() {
        assert_eq!(module_name_from_rel_path("pkg/mod.py"), "pkg.mod");
        assert_eq!(module_name_from_rel_path("pkg/__init__.py"), "pkg");
        assert_eq!(module_name_from_rel_path("top.py"), "top");
    }

    #[test]
    fn test_extracts_class_with_bases_and_methods() {
        let out = extract(
            "class Animal:\n    pass\n\nclass Dog(Animal):\n    def bark(self):\n        return 1\n",
        );
        let dog = out
            .symbols
            .iter()
            .find(|s| s.name == "Dog")
            .expect("Dog symbol");
        assert_eq!(dog.kind, "class");
        assert_eq!(dog.base_classes, vec!["Animal".to_string()]);
        let bark = out
            .symbols
            .iter()
            .find(|s| s.name == "bark")
            .expect("bark symbol");
        assert_eq!(bark.kind, "method");
        assert_eq!(bark.class_owner.as_deref(), Some("pkg.sample.Dog"));
        assert_eq!(bark.qualname, "pkg.sample.Dog.bark");
    }

    #[test]
    fn test_extracts_calls_with_enclosing_scope() {
        let out = extract("def run():\n    helper()\n\nhelper()\n");
        assert_eq!(out.calls.len(), 2);
        assert_eq!(out.calls[0].callee_name, "helper");
        assert_eq!(
            out.calls[0].caller_qualname.as_deref(),
            Some("pkg.sample.run")
        );
        assert!(out.calls[1].caller_qualname.is_none());
    }

    #[test]
    fn test_extracts_imports() {
        let out = extract("import os\nfrom collections import OrderedDict as OD\n");
        assert_eq!(out.imports.len(), 2);
        assert_eq!(out.imports[0].module, "os");
        assert_eq!(out.imports[1].module, "collections");
        assert_eq!(out.imports[1].imported_name.as_deref(), Some("OrderedDict"));
        assert_eq!(out.imports[1].alias.as_deref(), Some("OD"));
    }

    #[test]
    fn test_module_level_assignment_becomes_variable() {
        let out = extract("PAGE_SIZE = 25\nPAGE_SIZE = 50\n\ndef run():\n    local = 1\n    return local\n");
        let vars: Vec<_> = out.symbols.iter().filter(|s| s.kind == "variable").collect();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "PAGE_SIZE");
        assert_eq!(vars[0].qualname, "pkg.sample.PAGE_SIZE");
        assert_eq!(vars[0].start_line, 1);
    }

    #[test]
    fn test_complexity_counts_branches() {
        let out = extract(
            "def branchy(x):\n    if x:\n        return 1\n    for i in range(3):\n        while i:\n            i -= 1\n    return 0\n",
        );
        let branchy = out.symbols.iter().find(|s| s.name == "branchy").unwrap();
        assert_eq!(branchy.complexity, 4);
    }
}
