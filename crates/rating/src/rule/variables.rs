use quota_core::{QuotaError, QuotaResult};
use std::collections::BTreeSet;

use super::parser::{Expr, Literal};
use crate::preset::{PresetVariables, OPEN_MAP_PATHS};

/// Dotted path of a variable access chain, or `None` when the chain does
/// not start at a variable. Numeric and computed indexes descend into the
/// element shape; string literal indexes behave like member access.
pub fn static_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Variable(name) => Some(name.clone()),
        Expr::Member(object, name) => static_path(object).map(|p| format!("{}.{}", p, name)),
        Expr::Index(object, index) => {
            let base = static_path(object)?;
            match index.as_ref() {
                Expr::Literal(Literal::Str(key)) => Some(format!("{}.{}", base, key)),
                _ => Some(base),
            }
        }
        _ => None,
    }
}

/// Distinct variable paths referenced anywhere in `expr`.
pub fn extract_variables(expr: &Expr) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect(expr, &mut paths);
    paths
}

fn collect(expr: &Expr, paths: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Variable(_) | Expr::Member(..) | Expr::Index(..) => match static_path(expr) {
            Some(path) => {
                paths.insert(path);
                collect_computed_indexes(expr, paths);
            }
            None => match expr {
                Expr::Member(object, _) => collect(object, paths),
                Expr::Index(object, index) => {
                    collect(object, paths);
                    collect(index, paths);
                }
                _ => {}
            },
        },
        Expr::Unary(_, operand) => collect(operand, paths),
        Expr::Binary(_, left, right) | Expr::Logical(_, left, right) => {
            collect(left, paths);
            collect(right, paths);
        }
        Expr::Conditional(condition, then, otherwise) => {
            collect(condition, paths);
            collect(then, paths);
            collect(otherwise, paths);
        }
    }
}

fn collect_computed_indexes(expr: &Expr, paths: &mut BTreeSet<String>) {
    match expr {
        Expr::Member(object, _) => collect_computed_indexes(object, paths),
        Expr::Index(object, index) => {
            collect(index, paths);
            collect_computed_indexes(object, paths);
        }
        _ => {}
    }
}

/// Whether `path` exists in the preset variable schema.
pub fn is_known_path(schema: &BTreeSet<String>, path: &str) -> bool {
    if schema.contains(path) {
        return true;
    }
    if OPEN_MAP_PATHS
        .iter()
        .any(|open| path.strip_prefix(open).is_some_and(|rest| rest.starts_with('.')))
    {
        return true;
    }
    path.strip_suffix(".length")
        .is_some_and(|base| schema.contains(base))
}

/// Rejects rules that reference paths outside the preset variable schema.
pub fn validate_paths(paths: &BTreeSet<String>) -> QuotaResult<()> {
    let schema = PresetVariables::schema_paths();
    let unknown: Vec<&str> = paths
        .iter()
        .filter(|p| !is_known_path(&schema, p))
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(QuotaError::Validation(format!(
            "the activation rule references unknown variables [{}]",
            unknown.join(", ")
        )))
    }
}
