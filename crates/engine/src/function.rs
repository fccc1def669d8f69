//! Function-query templates
//!
//! A template carries connection defaults and a store key, and produces a
//! configuration per call: `redis(sku)` binds the template to the `sku`
//! field. Calls with the same field produce equal configurations, so every
//! query using the same function shares one cached array per snapshot.

use std::collections::BTreeMap;

use extscore_core::config::OPT_KEY_FIELD;
use extscore_core::{Error, FieldTypes, Result, SourceConfig, SourceOptions, TermEncoding};

/// Connection defaults for a function-query source
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTemplate {
    options: SourceOptions,
}

impl FunctionTemplate {
    /// Parse template options. `keyField` is not accepted: the key field
    /// is the function's argument.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self> {
        if options.contains_key(OPT_KEY_FIELD) {
            return Err(Error::configuration(format!(
                "{} is taken from the function argument",
                OPT_KEY_FIELD
            )));
        }
        Ok(FunctionTemplate {
            options: SourceOptions::parse(options)?,
        })
    }

    /// Parsed options
    pub fn options(&self) -> &SourceOptions {
        &self.options
    }

    /// Bind the template to `field`.
    ///
    /// Fields unknown to the schema are matched as plain text.
    pub fn bind(&self, field: &str, fields: &dyn FieldTypes) -> SourceConfig {
        let encoding = fields.term_encoding(field).unwrap_or(TermEncoding::Text);
        self.options.bind_to(field, encoding)
    }

    /// Parse a call expression such as `redis(sku)` and bind it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the expression is not `name(field)`
    /// with a single non-empty argument.
    pub fn parse_call(&self, expr: &str, fields: &dyn FieldTypes) -> Result<SourceConfig> {
        let field = parse_single_arg(expr)?;
        Ok(self.bind(field, fields))
    }
}

/// Extract `field` from `name(field)`
fn parse_single_arg(expr: &str) -> Result<&str> {
    let syntax = || Error::InvalidOperation(format!("Expected name(field), got '{}'", expr));
    let open = expr.find('(').ok_or_else(syntax)?;
    let inner = expr[open + 1..]
        .trim_end()
        .strip_suffix(')')
        .ok_or_else(syntax)?
        .trim();
    if inner.is_empty() || inner.contains(',') || inner.contains('(') {
        return Err(syntax());
    }
    Ok(inner)
}
