//! External value source configuration
//!
//! A [`SourceConfig`] identifies one external value source: where the store
//! lives, how to page through it, which layout the values are stored in, and
//! which index field the store's keys are matched against.
//!
//! Configurations arrive as named string options (schema field-type
//! arguments). [`SourceOptions::parse`] validates them eagerly so that a bad
//! option rejects the field at load time instead of failing on first query.
//!
//! Equality and hashing are structural: two independently parsed but
//! identical configurations address the same cache slot.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::TermEncoding;
use crate::error::{Error, Result};

/// Store host option
pub const OPT_HOST: &str = "host";
/// Store port option
pub const OPT_PORT: &str = "port";
/// Store password option
pub const OPT_PASSWORD: &str = "password";
/// Per-call timeout option, in milliseconds
pub const OPT_TIMEOUT: &str = "timeout";
/// Scan page size option
pub const OPT_SCAN_COUNT: &str = "scanCount";
/// Layout option (`z`, `h` or `k`)
pub const OPT_DATA_TYPE: &str = "dataType";
/// Store key or key prefix option
pub const OPT_REDIS_KEY: &str = "redisKey";
/// Index field whose values are the store's keys
pub const OPT_KEY_FIELD: &str = "keyField";
/// Default value option
pub const OPT_DEF_VAL: &str = "defVal";
/// Value type option; only float types are accepted
pub const OPT_VAL_TYPE: &str = "valType";

/// Default store host
pub const DEFAULT_HOST: &str = "localhost";
/// Default store port
pub const DEFAULT_PORT: u16 = 6379;
/// Default per-call timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Default scan page size
pub const DEFAULT_SCAN_COUNT: usize = 1000;

const KNOWN_OPTIONS: &[&str] = &[
    OPT_HOST,
    OPT_PORT,
    OPT_PASSWORD,
    OPT_TIMEOUT,
    OPT_SCAN_COUNT,
    OPT_DATA_TYPE,
    OPT_REDIS_KEY,
    OPT_KEY_FIELD,
    OPT_DEF_VAL,
    OPT_VAL_TYPE,
];

const FLOAT_VAL_TYPES: &[&str] = &["float", "pfloat", "tfloat"];

// ============================================================================
// LayoutKind
// ============================================================================

/// How values are laid out in the external store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    /// One sorted set; members are keys, scores are values (`z`)
    SortedSet,
    /// One hash; fields are keys, field values are values (`h`).
    /// Accepted by configuration but not loaded: every document keeps the
    /// default value.
    Hash,
    /// Plain string keys named `<prefix>:<key>` holding numeric text (`k`)
    PrefixedKeys,
}

impl LayoutKind {
    /// Parse a `dataType` code, case-insensitively
    pub fn from_code(code: &str) -> Result<Self> {
        match code.to_ascii_lowercase().as_str() {
            "z" => Ok(LayoutKind::SortedSet),
            "h" => Ok(LayoutKind::Hash),
            "k" => Ok(LayoutKind::PrefixedKeys),
            _ => Err(Error::configuration(format!(
                "Invalid {} '{}': only sorted set (z), hash (h) or prefixed keys (k) are supported",
                OPT_DATA_TYPE, code
            ))),
        }
    }

    /// The `dataType` code for this layout
    pub fn code(&self) -> &'static str {
        match self {
            LayoutKind::SortedSet => "z",
            LayoutKind::Hash => "h",
            LayoutKind::PrefixedKeys => "k",
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayoutKind::SortedSet => "sorted-set",
            LayoutKind::Hash => "hash",
            LayoutKind::PrefixedKeys => "prefixed-keys",
        };
        f.write_str(name)
    }
}

// ============================================================================
// FieldTypes
// ============================================================================

/// Schema lookups needed to bind a configuration to its key field
pub trait FieldTypes {
    /// The schema's unique key field, if it declares one
    fn unique_key_field(&self) -> Option<&str>;

    /// Term encoding of `field`, or `None` if the field is unknown
    fn term_encoding(&self, field: &str) -> Option<TermEncoding>;
}

// ============================================================================
// SourceOptions
// ============================================================================

/// Parsed and validated options, not yet bound to a key field
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    /// Store host
    pub host: String,
    /// Store port
    pub port: u16,
    /// Password; empty means no authentication
    pub password: String,
    /// Per-call timeout
    pub timeout: Duration,
    /// Scan page size
    pub scan_count: usize,
    /// Layout of the values in the store
    pub layout: LayoutKind,
    /// Sorted-set/hash key, or key prefix for prefixed keys
    pub store_key: String,
    /// Explicit key field; `None` means the schema's unique key
    pub key_field: Option<String>,
    /// Value for documents without an external entry
    pub default_value: f32,
}

impl SourceOptions {
    /// Parse named string options, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for unknown option names, unparseable
    /// numbers, an invalid `dataType`, a missing `redisKey`, a zero
    /// `scanCount` or `timeout`, or a non-float `valType`.
    pub fn parse(options: &BTreeMap<String, String>) -> Result<Self> {
        if let Some(unknown) = options
            .keys()
            .find(|k| !KNOWN_OPTIONS.contains(&k.as_str()))
        {
            return Err(Error::configuration(format!(
                "Unknown option '{}'",
                unknown
            )));
        }

        if let Some(val_type) = options.get(OPT_VAL_TYPE) {
            if !FLOAT_VAL_TYPES.contains(&val_type.to_ascii_lowercase().as_str()) {
                return Err(Error::configuration(format!(
                    "Only float is supported as external value type. Got '{}'",
                    val_type
                )));
            }
        }

        let host = options
            .get(OPT_HOST)
            .cloned()
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_number(options, OPT_PORT, DEFAULT_PORT)?;
        let password = options.get(OPT_PASSWORD).cloned().unwrap_or_default();
        let timeout_ms = parse_number(options, OPT_TIMEOUT, DEFAULT_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(Error::configuration(format!("{} must be positive", OPT_TIMEOUT)));
        }
        let scan_count = parse_number(options, OPT_SCAN_COUNT, DEFAULT_SCAN_COUNT)?;
        if scan_count == 0 {
            return Err(Error::configuration(format!(
                "{} must be positive",
                OPT_SCAN_COUNT
            )));
        }

        let layout = match options.get(OPT_DATA_TYPE) {
            Some(code) => LayoutKind::from_code(code)?,
            None => {
                return Err(Error::configuration(format!(
                    "{} must be set to z, h or k",
                    OPT_DATA_TYPE
                )))
            }
        };

        let store_key = match options.get(OPT_REDIS_KEY) {
            Some(k) if !k.is_empty() => k.clone(),
            _ => {
                return Err(Error::configuration(format!(
                    "{} (sorted set, hash key or key prefix) must be set",
                    OPT_REDIS_KEY
                )))
            }
        };

        let key_field = options
            .get(OPT_KEY_FIELD)
            .filter(|f| !f.is_empty())
            .cloned();
        let default_value = parse_number(options, OPT_DEF_VAL, 0.0f32)?;

        Ok(SourceOptions {
            host,
            port,
            password,
            timeout: Duration::from_millis(timeout_ms),
            scan_count,
            layout,
            store_key,
            key_field,
            default_value,
        })
    }

    /// Bind to the configured key field, or the schema's unique key.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no key field can be determined or the key
    /// field is not defined in the schema.
    pub fn bind(&self, fields: &dyn FieldTypes) -> Result<SourceConfig> {
        let key_field = match (&self.key_field, fields.unique_key_field()) {
            (Some(f), _) => f.clone(),
            (None, Some(unique)) => unique.to_string(),
            (None, None) => {
                return Err(Error::configuration(format!(
                    "{} is not set and the schema has no unique key field",
                    OPT_KEY_FIELD
                )))
            }
        };
        let encoding = fields.term_encoding(&key_field).ok_or_else(|| {
            Error::configuration(format!(
                "{} '{}' is not defined in the schema",
                OPT_KEY_FIELD, key_field
            ))
        })?;
        Ok(self.bind_to(key_field, encoding))
    }

    /// Bind to an explicit key field and encoding
    pub fn bind_to(&self, key_field: impl Into<String>, encoding: TermEncoding) -> SourceConfig {
        SourceConfig {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            timeout: self.timeout,
            scan_count: self.scan_count,
            layout: self.layout,
            store_key: self.store_key.clone(),
            key_field: key_field.into(),
            key_encoding: encoding,
            default_value: self.default_value,
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    options: &BTreeMap<String, String>,
    name: &str,
    default: T,
) -> Result<T> {
    match options.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            Error::configuration(format!("Invalid value '{}' for option {}", raw, name))
        }),
    }
}

// ============================================================================
// SourceConfig
// ============================================================================

/// Immutable identity of one external value source
#[derive(Clone)]
pub struct SourceConfig {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
    scan_count: usize,
    layout: LayoutKind,
    store_key: String,
    key_field: String,
    key_encoding: TermEncoding,
    default_value: f32,
}

impl SourceConfig {
    /// Create a configuration with default connection settings
    pub fn new(layout: LayoutKind, store_key: impl Into<String>, key_field: impl Into<String>) -> Self {
        SourceConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: String::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            scan_count: DEFAULT_SCAN_COUNT,
            layout,
            store_key: store_key.into(),
            key_field: key_field.into(),
            key_encoding: TermEncoding::Text,
            default_value: 0.0,
        }
    }

    /// Parse options and bind them against `fields`
    pub fn from_options(
        options: &BTreeMap<String, String>,
        fields: &dyn FieldTypes,
    ) -> Result<Self> {
        SourceOptions::parse(options)?.bind(fields)
    }

    /// Set host and port
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the scan page size (at least 1)
    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    /// Set the key field's term encoding
    pub fn with_key_encoding(mut self, encoding: TermEncoding) -> Self {
        self.key_encoding = encoding;
        self
    }

    /// Set the default value
    pub fn with_default_value(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    /// Store host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Store port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Password; empty means no authentication
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Scan page size
    pub fn scan_count(&self) -> usize {
        self.scan_count
    }

    /// Store layout
    pub fn layout(&self) -> LayoutKind {
        self.layout
    }

    /// Sorted-set/hash key or key prefix
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    /// Index field the store keys are matched against
    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Term encoding of the key field
    pub fn key_encoding(&self) -> TermEncoding {
        self.key_encoding
    }

    /// Value for documents without an external entry
    pub fn default_value(&self) -> f32 {
        self.default_value
    }
}

impl PartialEq for SourceConfig {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.password == other.password
            && self.timeout == other.timeout
            && self.scan_count == other.scan_count
            && self.layout == other.layout
            && self.store_key == other.store_key
            && self.key_field == other.key_field
            && self.key_encoding == other.key_encoding
            && self.default_value.to_bits() == other.default_value.to_bits()
    }
}

impl Eq for SourceConfig {}

impl Hash for SourceConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.password.hash(state);
        self.timeout.hash(state);
        self.scan_count.hash(state);
        self.layout.hash(state);
        self.store_key.hash(state);
        self.key_field.hash(state);
        self.key_encoding.hash(state);
        self.default_value.to_bits().hash(state);
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("timeout", &self.timeout)
            .field("scan_count", &self.scan_count)
            .field("layout", &self.layout)
            .field("store_key", &self.store_key)
            .field("key_field", &self.key_field)
            .field("key_encoding", &self.key_encoding)
            .field("default_value", &self.default_value)
            .finish()
    }
}

impl fmt::Display for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExternalSource(host={},port={},password={},timeout={}ms,scanCount={},dataType={},field={},redisKey={},defVal={})",
            self.host,
            self.port,
            if self.password.is_empty() { "" } else { "***" },
            self.timeout.as_millis(),
            self.scan_count,
            self.layout.code(),
            self.key_field,
            self.store_key,
            self.default_value
        )
    }
}
