//! Grouped key/value metadata documents.
//!
//! Application manifests and override files are TOML documents whose
//! top-level tables are groups (`[Context]`, `["Session Bus Policy"]`, …)
//! holding either strings or arrays of strings.

use std::path::Path;

use toml::{Table, Value};

use crate::error::ContextError;

/// A metadata document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDocument {
    table: Table,
}

impl MetadataDocument {
    /// Parse a document from text. `label` names it in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidMetadata`] if the text is not TOML.
    pub fn parse(label: &str, text: &str) -> Result<Self, ContextError> {
        let table = text
            .parse::<Table>()
            .map_err(|source| ContextError::InvalidMetadata {
                path: label.to_owned(),
                source,
            })?;
        Ok(Self { table })
    }

    /// Read and parse a document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Io`] if the file cannot be read and
    /// [`ContextError::InvalidMetadata`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        let text = std::fs::read_to_string(path).map_err(|source| ContextError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &text)
    }

    /// Render the document as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Serialize`] if rendering fails.
    pub fn render(&self) -> Result<String, ContextError> {
        Ok(toml::to_string(&self.table)?)
    }

    /// Names of every group.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.table
            .iter()
            .filter(|(_, v)| v.is_table())
            .map(|(k, _)| k.as_str())
    }

    /// Whether the document has no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn group(&self, group: &str) -> Option<&Table> {
        self.table.get(group).and_then(Value::as_table)
    }

    /// Insert `key` into `group`, replacing a non-table value of that name.
    fn insert(&mut self, group: &str, key: &str, value: Value) {
        let mut table = match self.table.remove(group) {
            Some(Value::Table(table)) => table,
            _ => Table::new(),
        };
        table.insert(key.to_owned(), value);
        self.table.insert(group.to_owned(), Value::Table(table));
    }

    /// An array-of-strings value, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MetadataType`] if the key holds anything else.
    pub fn string_list(&self, group: &str, key: &str) -> Result<Option<Vec<String>>, ContextError> {
        let Some(value) = self.group(group).and_then(|g| g.get(key)) else {
            return Ok(None);
        };
        let type_error = || ContextError::MetadataType {
            group: group.to_owned(),
            key: key.to_owned(),
            expected: "an array of strings",
        };
        value
            .as_array()
            .ok_or_else(type_error)?
            .iter()
            .map(|item| item.as_str().map(str::to_owned).ok_or_else(type_error))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Every `key = "string"` pair of a group, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MetadataType`] for a non-string value.
    pub fn string_entries(&self, group: &str) -> Result<Vec<(String, String)>, ContextError> {
        let Some(table) = self.group(group) else {
            return Ok(Vec::new());
        };
        table
            .iter()
            .map(|(key, value)| {
                value
                    .as_str()
                    .map(|s| (key.clone(), s.to_owned()))
                    .ok_or_else(|| ContextError::MetadataType {
                        group: group.to_owned(),
                        key: key.clone(),
                        expected: "a string",
                    })
            })
            .collect()
    }

    /// Every `key = [..]` pair of a group, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MetadataType`] for a value that is not an
    /// array of strings.
    pub fn list_entries(&self, group: &str) -> Result<Vec<(String, Vec<String>)>, ContextError> {
        let Some(table) = self.group(group) else {
            return Ok(Vec::new());
        };
        table
            .keys()
            .map(|key| {
                let values = self.string_list(group, key)?.unwrap_or_default();
                Ok((key.clone(), values))
            })
            .collect()
    }

    /// Set an array-of-strings value. Empty lists are not written.
    pub fn set_string_list<S: AsRef<str>>(&mut self, group: &str, key: &str, values: &[S]) {
        if values.is_empty() {
            return;
        }
        let array = values
            .iter()
            .map(|v| Value::String(v.as_ref().to_owned()))
            .collect();
        self.insert(group, key, Value::Array(array));
    }

    /// Set a string value.
    pub fn set_string(&mut self, group: &str, key: &str, value: &str) {
        self.insert(group, key, Value::String(value.to_owned()));
    }
}
