use anyhow::Result;

pub mod javascript;
pub mod python;
pub mod rust_lang;

#[derive(Debug, Clone)]
pub struct SymbolInput {
    pub kind: String,
    pub name: String,
    pub qualname: String,
    pub start_line: i64,
    pub end_line: i64,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub complexity: i64,
    pub class_owner: Option<String>,
    pub base_classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImportInput {
    pub module: String,
    pub imported_name: Option<String>,
    pub alias: Option<String>,
    pub line: i64,
}

/// A call site observed in source. Resolution to a defining symbol
/// happens later, once all files of the batch are stored.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub caller_qualname: Option<String>,
    pub callee_name: String,
    pub line: i64,
}

#[derive(Debug, Default)]
pub struct ExtractedFile {
    pub symbols: Vec<SymbolInput>,
    pub imports: Vec<ImportInput>,
    pub calls: Vec<CallSite>,
}

pub trait LanguageExtractor {
    fn module_name_from_rel_path(&self, rel_path: &str) -> String;

    fn extract(&mut self, source: &str, module_name: &str) -> Result<ExtractedFile>;
}

/// Language tag for a relative path, or None for unsupported files.
pub fn language_for_path(rel_path: &str) -> Option<&'static str> {
    let ext = rel_path.rsplit('.').next()?;
    match ext {
        "py" => Some("python"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        "rs" => Some("rust"),
        _ => None,
    }
}

pub fn extractor_for_language(language: &str) -> Result<Box<dyn LanguageExtractor + Send>> {
    match language {
        "python" => Ok(Box::new(python::PythonExtractor::new()?)),
        "javascript" => Ok(Box::new(javascript::JavaScriptExtractor::new()?)),
        "rust" => Ok(Box::new(rust_lang::RustExtractor::new()?)),
        other => anyhow::bail!("no extractor for language {}", other),
    }
}

pub(crate) fn node_text(node: tree_sitter::Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .to_string()
}

pub(crate) fn line_span(node: tree_sitter::Node<'_>) -> (i64, i64) {
    (
        node.start_position().row as i64 + 1,
        node.end_position().row as i64 + 1,
    )
}

/// Cyclomatic-style complexity: one plus the number of branching
/// constructs in the subtree. `branch_kinds` lists the grammar node
/// kinds that count as a branch for the language.
pub(crate) fn complexity_of(
    node: tree_sitter::Node<'_>,
    branch_kinds: &[&str],
    branch_operators: &[&str],
    source: &str,
) -> i64 {
    let mut count = 1i64;
    let mut cursor = node.walk();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        for child in current.children(&mut cursor) {
            let kind = child.kind();
            if branch_kinds.contains(&kind) {
                count += 1;
            } else if branch_operators.contains(&kind) {
                // operator tokens such as `&&` appear as anonymous nodes
                count += 1;
            } else if kind == "binary_operator" || kind == "boolean_operator" {
                // python spells `and` / `or` as a named operator field
                if let Some(op) = child.child_by_field_name("operator") {
                    let text = node_text(op, source);
                    if text == "and" || text == "or" {
                        count += 1;
                    }
                }
            }
            stack.push(child);
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path("src/app.py"), Some("python"));
        assert_eq!(language_for_path("web/index.jsx"), Some("javascript"));
        assert_eq!(language_for_path("src/main.rs"), Some("rust"));
        assert_eq!(language_for_path("README.md"), None);
        assert_eq!(language_for_path("Makefile"), None);
    }
}
