use crag::ingest::{IngestMode, Ingestor};
use crag::model::{CallerFact, ChangedRange, ImpactLevel};
use crag::query::QueryEngine;
use crag::store::Store;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn setup(files: &[(&str, &str)]) -> (TempDir, Store, i64) {
    let dir = TempDir::new().unwrap();
    for (rel, content) in files {
        write_file(dir.path(), rel, content);
    }
    let store = Store::new(&dir.path().join(".crag").join("crag.db")).unwrap();
    let repo_id = store.upsert_repo("acme", "shop", Some("main")).unwrap();
    Ingestor::new(&store, dir.path().to_path_buf(), repo_id)
        .ingest(IngestMode::Full)
        .unwrap();
    (dir, store, repo_id)
}

const BILLING_PY: &str = "\
def validate_card(amount):
    return amount > 0


class PaymentProcessor:
    def process_payment(self, amount):
        if validate_card(amount):
            return amount
        return 0
";

const APP_PY: &str = "\
from billing import PaymentProcessor


def checkout(amount):
    processor = PaymentProcessor()
    return processor.process_payment(amount)
";

const MODELS_PY: &str = "\
class Base:
    def save(self):
        return True


class User(Base):
    def greet(self):
        return \"hi\"


class Admin(User):
    pass
";

#[test]
fn find_callers_resolves_cross_file_calls() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.find_callers("process_payment").unwrap();
    assert_eq!(result.definitions.len(), 1);
    assert_eq!(result.definitions[0].kind, "method");
    assert!(!result.fallback_used);

    let resolved: Vec<&str> = result
        .callers
        .iter()
        .filter_map(|c| match c {
            CallerFact::ResolvedCall { caller, .. } => Some(caller.name.as_str()),
            CallerFact::TextReference { .. } => None,
        })
        .collect();
    assert_eq!(resolved, vec!["checkout"]);
}

#[test]
fn find_callers_falls_back_to_text_references_for_ambiguous_names() {
    let (_dir, store, repo_id) = setup(&[
        ("h1.py", "def dispatch(x):\n    return x\n"),
        ("h2.py", "def dispatch(x):\n    return x * 2\n"),
        (
            "caller.py",
            "from h1 import dispatch\n\n\ndef go(x):\n    return dispatch(x)\n",
        ),
    ]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.find_callers("dispatch").unwrap();
    assert_eq!(result.definitions.len(), 2);
    assert_eq!(result.total, 1);
    assert!(result.fallback_used);
    assert!(matches!(
        result.callers[0],
        CallerFact::TextReference { .. }
    ));
}

#[test]
fn class_hierarchy_walks_both_directions() {
    let (_dir, store, repo_id) = setup(&[("models.py", MODELS_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.class_hierarchy("User").unwrap();
    assert!(result.found);
    assert_eq!(result.ancestors.len(), 1);
    assert_eq!(result.ancestors[0].name, "Base");
    assert_eq!(result.ancestors[0].depth, 1);
    assert!(result.ancestors[0].symbol.is_some());
    assert_eq!(result.descendants.len(), 1);
    assert_eq!(result.descendants[0].name, "Admin");
    assert!(result.methods.iter().any(|m| m.name == "greet"));
}

#[test]
fn class_hierarchy_unknown_class_is_not_found() {
    let (_dir, store, repo_id) = setup(&[("models.py", MODELS_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.class_hierarchy("Ghost").unwrap();
    assert!(!result.found);
    assert!(result.class.is_none());
    assert!(result.ancestors.is_empty());
    assert!(result.descendants.is_empty());
}

#[test]
fn class_hierarchy_terminates_on_inheritance_cycle() {
    let (_dir, store, repo_id) = setup(&[(
        "cycle.py",
        "class A(B):\n    pass\n\n\nclass B(A):\n    pass\n",
    )]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.class_hierarchy("A").unwrap();
    assert!(result.found);
    assert_eq!(result.ancestors.len(), 1);
    assert_eq!(result.ancestors[0].name, "B");
}

#[test]
fn change_impact_is_high_for_cross_file_callers() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.change_impact("process_payment").unwrap();
    assert!(result.cross_file);
    assert!(matches!(result.impact_level, ImpactLevel::High));

    // same-file caller only
    let result = engine.change_impact("validate_card").unwrap();
    assert!(!result.cross_file);
    assert_eq!(result.caller_count, 1);
    assert!(matches!(result.impact_level, ImpactLevel::Medium));

    // no callers at all
    let result = engine.change_impact("checkout").unwrap();
    assert_eq!(result.caller_count, 0);
    assert!(matches!(result.impact_level, ImpactLevel::Low));
}

#[test]
fn diff_context_intersects_changed_ranges_with_symbols() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let changes = vec![
        ChangedRange {
            file_path: "billing.py".to_string(),
            start_line: 6,
            end_line: 7,
        },
        ChangedRange {
            file_path: "missing.py".to_string(),
            start_line: 1,
            end_line: 3,
        },
    ];
    let result = engine.diff_context(&changes).unwrap();
    assert_eq!(result.files.len(), 2);

    let billing = &result.files[0];
    assert!(billing.indexed);
    let touched: Vec<&str> = billing
        .touched_symbols
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert!(touched.contains(&"PaymentProcessor"));
    assert!(touched.contains(&"process_payment"));
    assert!(!touched.contains(&"validate_card"));
    assert!(!billing.callers.is_empty());
    assert!(
        billing
            .class_hierarchies
            .iter()
            .any(|h| h.class_name == "PaymentProcessor")
    );
    assert!(billing.source.as_deref() == Some(BILLING_PY));

    let missing = &result.files[1];
    assert!(!missing.indexed);
    assert!(missing.touched_symbols.is_empty());
}

#[test]
fn diff_context_open_ended_range_covers_rest_of_file() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    // end before start marks an open-ended range
    let changes = vec![ChangedRange {
        file_path: "billing.py".to_string(),
        start_line: 5,
        end_line: 0,
    }];
    let result = engine.diff_context(&changes).unwrap();
    let touched: Vec<&str> = result.files[0]
        .touched_symbols
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert!(touched.contains(&"PaymentProcessor"));
    assert!(touched.contains(&"process_payment"));
}

#[test]
fn search_ranks_symbols_above_content_lines() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.search("validate_card", None).unwrap();
    assert!(!result.hits.is_empty());
    assert_eq!(result.hits[0].hit_type, "function");
    assert_eq!(result.hits[0].score, 1.0);
    assert!(result.hits.iter().any(|h| h.hit_type == "line"));

    let result = engine.search("validate", None).unwrap();
    assert_eq!(result.hits[0].hit_type, "function");
    assert_eq!(result.hits[0].score, 0.8);
}

#[test]
fn search_tags_module_level_variables() {
    let (_dir, store, repo_id) = setup(&[(
        "settings.py",
        "PAGE_SIZE = 25\nRETRY_LIMIT = 3\n",
    )]);
    let engine = QueryEngine::new(&store, repo_id);

    let result = engine.search("PAGE_SIZE", None).unwrap();
    assert_eq!(result.hits[0].hit_type, "variable");
    assert_eq!(result.hits[0].score, 1.0);
    assert_eq!(result.hits[0].path, "settings.py");
}

#[test]
fn search_with_exact_fit_limit_is_not_truncated() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    // one symbol plus two content lines mention validate_card
    let result = engine.search("validate_card", Some(3)).unwrap();
    assert_eq!(result.hits.len(), 3);
    assert!(!result.truncated);

    let result = engine.search("validate_card", Some(2)).unwrap();
    assert_eq!(result.hits.len(), 2);
    assert!(result.truncated);
}

#[test]
fn response_payloads_use_contract_field_names() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let callers = serde_json::to_value(engine.find_callers("process_payment").unwrap()).unwrap();
    assert_eq!(callers["symbol"], "process_payment");
    assert!(callers.get("fallback_used").is_some());

    let hierarchy =
        serde_json::to_value(engine.class_hierarchy("PaymentProcessor").unwrap()).unwrap();
    assert_eq!(hierarchy["file_path"], "billing.py");
    assert_eq!(hierarchy["line_number"], 5);

    let usages = serde_json::to_value(engine.method_usages("process_payment").unwrap()).unwrap();
    let first = &usages["usages"][0];
    assert_eq!(first["file"], "billing.py");
    assert_eq!(first["method"]["name"], "process_payment");
    assert!(first.get("callers").is_some());

    let impact = serde_json::to_value(engine.change_impact("process_payment").unwrap()).unwrap();
    assert_eq!(impact["symbol"], "process_payment");

    let changes = vec![ChangedRange {
        file_path: "billing.py".to_string(),
        start_line: 6,
        end_line: 7,
    }];
    let context = serde_json::to_value(engine.diff_context(&changes).unwrap()).unwrap();
    assert_eq!(context["total_files"], 1);
    assert!(context["total_affected"].as_u64().unwrap() >= 2);
}

#[test]
fn repo_overview_counts_rows() {
    let (_dir, store, repo_id) = setup(&[("billing.py", BILLING_PY), ("app.py", APP_PY)]);
    let engine = QueryEngine::new(&store, repo_id);

    let overview = engine.repo_overview().unwrap();
    assert_eq!(overview.files, 2);
    assert!(overview.symbols > 0);
    assert!(overview.edges > 0);
    assert_eq!(overview.languages, vec!["python".to_string()]);
}
