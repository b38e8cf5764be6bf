//! Activation rules: a small sandboxed expression language.
//!
//! Rules read the preset variables and produce a boolean or a number. There
//! are no calls, assignments or loops, and evaluation never touches anything
//! outside the context it is given. Parsed rules are cached by their text,
//! up to `max_cached_rules` of them.

pub mod eval;
pub mod lexer;
pub mod parser;
pub mod variables;

use parking_lot::RwLock;
use quota_core::config::RuleConfig;
use quota_core::{QuotaError, QuotaResult};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

pub use eval::RuleValue;
pub use parser::{Expr, ParseLimits};

use crate::preset::PresetVariables;
use crate::tariff::QuotaTariff;

/// Read-only view of the preset variables used during evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    root: Value,
}

impl EvaluationContext {
    pub fn from_presets(presets: &PresetVariables) -> QuotaResult<Self> {
        Ok(Self {
            root: presets.to_json()?,
        })
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// A context without any variables.
    pub fn empty() -> Self {
        Self {
            root: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}

pub struct RuleEvaluator {
    limits: ParseLimits,
    max_cached: usize,
    cache: RwLock<HashMap<String, Arc<Expr>>>,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new(&RuleConfig::default())
    }
}

impl RuleEvaluator {
    pub fn new(config: &RuleConfig) -> Self {
        Self {
            limits: ParseLimits {
                max_length: config.max_rule_length,
                max_depth: config.max_depth,
            },
            max_cached: config.max_cached_rules,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Parses `rule`, reusing an earlier parse of the same text.
    pub fn compile(&self, rule: &str) -> QuotaResult<Arc<Expr>> {
        if let Some(expr) = self.cache.read().get(rule) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(parser::parse(rule, self.limits)?);
        debug!(rule_length = rule.len(), "Compiled activation rule");
        if self.max_cached == 0 {
            return Ok(expr);
        }

        let mut cache = self.cache.write();
        if cache.len() >= self.max_cached && !cache.contains_key(rule) {
            debug!(cached = cache.len(), "Rule cache full; clearing it");
            cache.clear();
        }
        Ok(Arc::clone(cache.entry(rule.to_string()).or_insert(expr)))
    }

    pub fn cached_rules(&self) -> usize {
        self.cache.read().len()
    }

    /// Evaluates `rule` against `context`. A missing or blank rule always applies.
    pub fn evaluate(&self, rule: Option<&str>, context: &EvaluationContext) -> QuotaResult<RuleValue> {
        let Some(rule) = rule.filter(|r| !r.trim().is_empty()) else {
            return Ok(RuleValue::Bool(true));
        };
        let expr = self.compile(rule)?;
        eval::evaluate(&expr, context.root())
    }

    /// The value `tariff` contributes under `context`.
    ///
    /// Without a rule this is the tariff value. A numeric result is used as
    /// is, `true` selects the tariff value, and anything else yields zero.
    pub fn tariff_value(&self, tariff: &QuotaTariff, context: Option<&EvaluationContext>) -> QuotaResult<Decimal> {
        if !tariff.has_activation_rule() {
            return Ok(tariff.currency_value);
        }
        let empty = EvaluationContext::empty();
        let result = self.evaluate(tariff.activation_rule.as_deref(), context.unwrap_or(&empty))?;

        let value = match &result {
            RuleValue::Number(n) => *n,
            RuleValue::Str(s) => match eval::parse_number(s.trim()) {
                Some(n) => n,
                None if s.trim().eq_ignore_ascii_case("true") => tariff.currency_value,
                None => Decimal::ZERO,
            },
            RuleValue::Bool(true) => tariff.currency_value,
            _ => Decimal::ZERO,
        };
        trace!(tariff = %tariff, result = %result, value = %value, "Evaluated activation rule");
        Ok(value)
    }

    /// Variable paths referenced by `rule`.
    pub fn extract_variables(&self, rule: &str) -> QuotaResult<BTreeSet<String>> {
        let expr = self.compile(rule)?;
        Ok(variables::extract_variables(&expr))
    }

    /// Checks that `rule` parses and only references known preset variables.
    pub fn validate_rule(&self, rule: &str) -> QuotaResult<()> {
        let paths = self.extract_variables(rule).map_err(|err| match err {
            QuotaError::RuleEvaluation(message) => QuotaError::Validation(message),
            other => other,
        })?;
        variables::validate_paths(&paths)
    }
}
