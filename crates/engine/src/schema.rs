//! Index schema: indexed fields, external value fields and function templates
//!
//! A schema is loaded once and validated eagerly. Every external field's
//! options are parsed and bound to their key field at load time, so a
//! misconfigured field rejects the whole schema instead of failing on the
//! first query.
//!
//! # Example
//!
//! ```toml
//! unique_key = "id"
//!
//! [[fields]]
//! name = "id"
//!
//! [[fields]]
//! name = "sku"
//! encoding = "long"
//!
//! [[external_fields]]
//! name = "popularity"
//! dataType = "z"
//! redisKey = "popularity"
//!
//! [[external_fields]]
//! name = "stock"
//! dataType = "k"
//! redisKey = "stock"
//! keyField = "sku"
//! defVal = -1
//!
//! [[functions]]
//! name = "redis"
//! dataType = "z"
//! redisKey = "scores"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use extscore_core::{Error, FieldTypes, Result, SourceConfig, SourceOptions, TermEncoding};
use serde::Deserialize;
use tracing::info;

use crate::function::FunctionTemplate;

/// An external value field and its bound configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalField {
    name: String,
    config: SourceConfig,
}

impl ExternalField {
    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

/// Index schema
#[derive(Debug, Clone, Default)]
pub struct Schema {
    unique_key: Option<String>,
    fields: BTreeMap<String, TermEncoding>,
    external: Vec<ExternalField>,
    functions: BTreeMap<String, FunctionTemplate>,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    unique_key: Option<String>,
    #[serde(default)]
    fields: Vec<FieldEntry>,
    #[serde(default)]
    external_fields: Vec<OptionsEntry>,
    #[serde(default)]
    functions: Vec<OptionsEntry>,
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    name: String,
    #[serde(default)]
    encoding: TermEncoding,
}

#[derive(Debug, Deserialize)]
struct OptionsEntry {
    name: String,
    #[serde(flatten)]
    options: BTreeMap<String, toml::Value>,
}

impl OptionsEntry {
    /// Flatten TOML scalars into the string options the parsers expect
    fn string_options(&self) -> Result<BTreeMap<String, String>> {
        self.options
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    other => {
                        return Err(Error::configuration(format!(
                            "Option '{}' of '{}' must be a scalar, got {}",
                            k,
                            self.name,
                            other.type_str()
                        )))
                    }
                };
                Ok((k.clone(), s))
            })
            .collect()
    }
}

impl Schema {
    /// Create an empty schema
    pub fn new(unique_key: Option<&str>) -> Self {
        Schema {
            unique_key: unique_key.map(str::to_string),
            ..Default::default()
        }
    }

    /// Parse and validate a TOML schema
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the document cannot be parsed or any
    /// field is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(content)
            .map_err(|e| Error::configuration(format!("Failed to parse schema: {}", e)))?;

        let mut schema = Schema::new(file.unique_key.as_deref());
        for field in file.fields {
            schema.add_field(field.name, field.encoding)?;
        }
        if let Some(unique) = &schema.unique_key {
            if !schema.fields.contains_key(unique) {
                return Err(Error::configuration(format!(
                    "unique_key '{}' is not a declared field",
                    unique
                )));
            }
        }
        for entry in &file.external_fields {
            schema.add_external_field(entry.name.clone(), &entry.string_options()?)?;
        }
        for entry in &file.functions {
            schema.add_function(entry.name.clone(), &entry.string_options()?)?;
        }
        Ok(schema)
    }

    /// Read and validate a schema file
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!(
                "Failed to read schema file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Declare an indexed field
    pub fn add_field(&mut self, name: impl Into<String>, encoding: TermEncoding) -> Result<()> {
        let name = name.into();
        if self.fields.contains_key(&name) {
            return Err(Error::configuration(format!("Duplicate field '{}'", name)));
        }
        self.fields.insert(name, encoding);
        Ok(())
    }

    /// Declare an external value field from its string options
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the options are invalid, the name is
    /// taken, or the key field cannot be bound.
    pub fn add_external_field(
        &mut self,
        name: impl Into<String>,
        options: &BTreeMap<String, String>,
    ) -> Result<()> {
        let name = name.into();
        if self.fields.contains_key(&name) || self.external_field(&name).is_some() {
            return Err(Error::configuration(format!("Duplicate field '{}'", name)));
        }
        let config = SourceOptions::parse(options)
            .and_then(|opts| opts.bind(&*self))
            .map_err(|e| e.with_context(format_args!("External field '{}'", name)))?;
        info!(
            target: "extscore::schema",
            field = %name,
            layout = %config.layout(),
            key = config.store_key(),
            key_field = config.key_field(),
            "External value field declared"
        );
        self.external.push(ExternalField { name, config });
        Ok(())
    }

    /// Declare a function-query template
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        options: &BTreeMap<String, String>,
    ) -> Result<()> {
        let name = name.into();
        let template = FunctionTemplate::from_options(options)
            .map_err(|e| e.with_context(format_args!("Function '{}'", name)))?;
        self.functions.insert(name, template);
        Ok(())
    }

    /// External value fields in declaration order
    pub fn external_fields(&self) -> &[ExternalField] {
        &self.external
    }

    /// Look up an external value field
    pub fn external_field(&self, name: &str) -> Option<&ExternalField> {
        self.external.iter().find(|f| f.name == name)
    }

    /// Look up a function template
    pub fn function(&self, name: &str) -> Option<&FunctionTemplate> {
        self.functions.get(name)
    }

    /// Indexed field names
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl FieldTypes for Schema {
    fn unique_key_field(&self) -> Option<&str> {
        self.unique_key.as_deref()
    }

    fn term_encoding(&self, field: &str) -> Option<TermEncoding> {
        self.fields.get(field).copied()
    }
}
