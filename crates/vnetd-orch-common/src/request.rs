//! Schema-checked typed parsing of change events.
//!
//! Each table declares a [`RequestDescription`]: the ordered, typed fields
//! of its compound key, its named attributes with their types, and which
//! attributes are mandatory. [`Request::parse`] validates one
//! [`KeyOpFieldsValues`] against the description and yields typed
//! accessors, so downstream code never re-validates shapes — only
//! domain-specific ranges.

use crate::consumer::{KeyOpFieldsValues, Operation};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use vnetd_types::{IpAddress, IpPrefix, MacAddress};

/// Delimiter inside set-valued attributes.
const SET_DELIMITER: char = ',';

/// The declared type of a key or attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free-form string.
    String,
    /// 48-bit MAC address.
    MacAddress,
    /// Unsigned integer.
    Uint,
    /// IPv4 or IPv6 address.
    Ip,
    /// IP prefix in CIDR notation.
    IpPrefix,
    /// Set of strings, comma-delimited on the wire.
    StringSet,
}

/// A parsed, typed field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Mac(MacAddress),
    Uint(u64),
    Ip(IpAddress),
    Prefix(IpPrefix),
    Set(BTreeSet<String>),
}

impl FieldValue {
    fn parse(kind: FieldKind, raw: &str) -> Option<FieldValue> {
        match kind {
            FieldKind::String => Some(FieldValue::String(raw.to_string())),
            FieldKind::MacAddress => raw.parse().ok().map(FieldValue::Mac),
            FieldKind::Uint => raw.parse().ok().map(FieldValue::Uint),
            FieldKind::Ip => raw.parse().ok().map(FieldValue::Ip),
            FieldKind::IpPrefix => raw.parse().ok().map(FieldValue::Prefix),
            FieldKind::StringSet => Some(FieldValue::Set(
                raw.split(SET_DELIMITER)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }
}

/// Schema for one table's change events.
#[derive(Debug, Clone)]
pub struct RequestDescription {
    /// Ordered, typed fields of the compound key.
    pub key_fields: &'static [FieldKind],
    /// Named attributes with their types.
    pub attr_fields: &'static [(&'static str, FieldKind)],
    /// Attributes that must be present on every SET.
    pub mandatory: &'static [&'static str],
    /// Separator joining the compound key fields.
    pub key_separator: char,
}

impl RequestDescription {
    fn attr_kind(&self, name: &str) -> Option<FieldKind> {
        self.attr_fields
            .iter()
            .find(|(f, _)| *f == name)
            .map(|(_, k)| *k)
    }
}

/// Schema violations: malformed input that is dropped, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("key '{key}' has {got} fields, schema expects {expected}")]
    KeyFieldCount {
        key: String,
        expected: usize,
        got: usize,
    },

    #[error("key field {index} of '{key}' is not a valid {expected:?}")]
    InvalidKeyField {
        key: String,
        index: usize,
        expected: FieldKind,
    },

    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("attribute '{field}' value '{value}' is not a valid {expected:?}")]
    InvalidAttribute {
        field: String,
        value: String,
        expected: FieldKind,
    },

    #[error("mandatory attribute '{0}' is missing")]
    MissingMandatory(String),

    #[error("DEL operation for '{0}' carries attributes")]
    AttributesOnDel(String),
}

/// One validated change event with typed accessors.
///
/// All accessors assume the caller asks for the type the schema declared;
/// asking for a different type returns `None`, which indicates a caller
/// bug, not bad input — bad input never parses.
#[derive(Debug, Clone)]
pub struct Request {
    op: Operation,
    full_key: String,
    key_values: Vec<FieldValue>,
    attrs: HashMap<String, FieldValue>,
}

impl Request {
    /// Validates an event against a description.
    pub fn parse(
        desc: &RequestDescription,
        event: &KeyOpFieldsValues,
    ) -> Result<Request, RequestError> {
        let key_values = Self::parse_key(desc, &event.key)?;

        if event.op.is_del() {
            if !event.fvs.is_empty() {
                return Err(RequestError::AttributesOnDel(event.key.clone()));
            }
            return Ok(Request {
                op: event.op,
                full_key: event.key.clone(),
                key_values,
                attrs: HashMap::new(),
            });
        }

        let mut attrs = HashMap::new();
        for (field, value) in &event.fvs {
            let kind = desc
                .attr_kind(field)
                .ok_or_else(|| RequestError::UnknownAttribute(field.clone()))?;
            let parsed =
                FieldValue::parse(kind, value).ok_or_else(|| RequestError::InvalidAttribute {
                    field: field.clone(),
                    value: value.clone(),
                    expected: kind,
                })?;
            attrs.insert(field.clone(), parsed);
        }

        for mandatory in desc.mandatory {
            if !attrs.contains_key(*mandatory) {
                return Err(RequestError::MissingMandatory(mandatory.to_string()));
            }
        }

        Ok(Request {
            op: event.op,
            full_key: event.key.clone(),
            key_values,
            attrs,
        })
    }

    fn parse_key(desc: &RequestDescription, key: &str) -> Result<Vec<FieldValue>, RequestError> {
        // The last key field absorbs any remaining separators, so IPv6
        // prefixes survive a ':' separator.
        let parts: Vec<&str> = key.splitn(desc.key_fields.len(), desc.key_separator).collect();
        if parts.len() != desc.key_fields.len() || parts.iter().any(|p| p.is_empty()) {
            return Err(RequestError::KeyFieldCount {
                key: key.to_string(),
                expected: desc.key_fields.len(),
                got: parts.iter().filter(|p| !p.is_empty()).count(),
            });
        }

        desc.key_fields
            .iter()
            .zip(parts.iter())
            .enumerate()
            .map(|(index, (kind, raw))| {
                FieldValue::parse(*kind, raw).ok_or(RequestError::InvalidKeyField {
                    key: key.to_string(),
                    index,
                    expected: *kind,
                })
            })
            .collect()
    }

    /// Returns the operation of this event.
    pub fn operation(&self) -> Operation {
        self.op
    }

    /// Returns the unparsed compound key.
    pub fn full_key(&self) -> &str {
        &self.full_key
    }

    /// Returns true if the named attribute was supplied.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Returns a string key field by position.
    pub fn key_string(&self, index: usize) -> Option<&str> {
        match self.key_values.get(index) {
            Some(FieldValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns an IP-prefix key field by position.
    pub fn key_prefix(&self, index: usize) -> Option<IpPrefix> {
        match self.key_values.get(index) {
            Some(FieldValue::Prefix(p)) => Some(*p),
            _ => None,
        }
    }

    /// Returns a string attribute.
    pub fn attr_string(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(FieldValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns a MAC attribute.
    pub fn attr_mac(&self, name: &str) -> Option<MacAddress> {
        match self.attrs.get(name) {
            Some(FieldValue::Mac(m)) => Some(*m),
            _ => None,
        }
    }

    /// Returns an unsigned integer attribute.
    pub fn attr_uint(&self, name: &str) -> Option<u64> {
        match self.attrs.get(name) {
            Some(FieldValue::Uint(u)) => Some(*u),
            _ => None,
        }
    }

    /// Returns an IP address attribute.
    pub fn attr_ip(&self, name: &str) -> Option<IpAddress> {
        match self.attrs.get(name) {
            Some(FieldValue::Ip(ip)) => Some(*ip),
            _ => None,
        }
    }

    /// Returns an IP-prefix attribute.
    pub fn attr_prefix(&self, name: &str) -> Option<IpPrefix> {
        match self.attrs.get(name) {
            Some(FieldValue::Prefix(p)) => Some(*p),
            _ => None,
        }
    }

    /// Returns a string-set attribute.
    pub fn attr_set(&self, name: &str) -> Option<&BTreeSet<String>> {
        match self.attrs.get(name) {
            Some(FieldValue::Set(s)) => Some(s),
            _ => None,
        }
    }
}
