//! Open-ended `SUBSYSTEM.KEY=VALUE` policy.
//!
//! Each `SUBSYSTEM.KEY` holds an ordered list of values. A value prefixed
//! with `!` retracts that value from lower layers. Applying a value first
//! drops any existing entry with the same value regardless of `!`, then
//! appends, so the latest statement about a value wins.

use std::collections::BTreeMap;

use crate::error::ContextError;

/// Metadata group prefix for a subsystem: `Policy SUBSYSTEM`.
pub const POLICY_GROUP_PREFIX: &str = "Policy ";

/// A value with any retraction marker removed.
fn normalized(value: &str) -> &str {
    value.strip_prefix('!').unwrap_or(value)
}

/// Split `SUBSYSTEM.KEY=VALUE` into `("SUBSYSTEM.KEY", "VALUE")`.
///
/// # Errors
///
/// Returns [`ContextError::MalformedSyntax`] if the `=`, the subsystem, the
/// key, or the value is missing, or if the value starts with `!`.
pub fn parse_policy_assignment(spec: &str) -> Result<(&str, &str), ContextError> {
    let malformed = |reason: &str| ContextError::malformed("policy", spec, reason);

    let (key, value) = spec
        .split_once('=')
        .ok_or_else(|| malformed("expected SUBSYSTEM.KEY=VALUE"))?;
    let (subsystem, name) = key
        .split_once('.')
        .ok_or_else(|| malformed("expected SUBSYSTEM.KEY=VALUE"))?;
    if subsystem.is_empty() || name.is_empty() {
        return Err(malformed("subsystem and key must not be empty"));
    }
    if value.is_empty() {
        return Err(malformed("value must not be empty"));
    }
    if value.starts_with('!') {
        return Err(malformed("values must not start with !"));
    }
    Ok((key, value))
}

/// Policy values keyed by `SUBSYSTEM.KEY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericPolicyTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl GenericPolicyTable {
    /// Add a value per a `--add-policy` specifier.
    ///
    /// # Errors
    ///
    /// See [`parse_policy_assignment`].
    pub fn add(&mut self, spec: &str) -> Result<(), ContextError> {
        let (key, value) = parse_policy_assignment(spec)?;
        self.apply(key, value);
        Ok(())
    }

    /// Retract a value per a `--remove-policy` specifier.
    ///
    /// # Errors
    ///
    /// See [`parse_policy_assignment`].
    pub fn remove(&mut self, spec: &str) -> Result<(), ContextError> {
        let (key, value) = parse_policy_assignment(spec)?;
        self.apply(key, &format!("!{value}"));
        Ok(())
    }

    /// Append one raw value (possibly `!`-prefixed), replacing any entry
    /// for the same normalized value.
    pub fn apply(&mut self, key: &str, value: &str) {
        let values = self.entries.entry(key.to_owned()).or_default();
        let wanted = normalized(value);
        values.retain(|existing| normalized(existing) != wanted);
        values.push(value.to_owned());
    }

    /// Append several raw values in order.
    pub fn apply_values<S: AsRef<str>>(&mut self, key: &str, values: &[S]) {
        for value in values {
            self.apply(key, value.as_ref());
        }
    }

    /// Raw values for `key`, including retractions.
    #[must_use]
    pub fn get(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Values in effect for `key`: everything not retracted.
    pub fn effective(&self, key: &str) -> impl Iterator<Item = &str> {
        self.get(key)
            .iter()
            .filter(|v| !v.starts_with('!'))
            .map(String::as_str)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// True if no entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Layer `other` on top, applying its values in order.
    pub fn merge(&mut self, other: &Self) {
        for (key, values) in &other.entries {
            self.apply_values(key, values.as_slice());
        }
    }

    /// Values in `self` not present verbatim among `old`'s values for the same key.
    ///
    /// Matching is exact string comparison, so two spellings of the same
    /// value count as different. Retractions never grant anything.
    #[must_use]
    pub fn added_over(&self, old: &Self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .flat_map(|(key, values)| {
                let previous = old.get(key);
                values
                    .iter()
                    .filter(|v| !v.starts_with('!'))
                    .filter(move |v| !previous.contains(*v))
                    .map(move |v| (key.clone(), v.clone()))
            })
            .collect()
    }

    /// Project as `--add-policy=` / `--remove-policy=` flags.
    #[must_use]
    pub fn to_flags(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(key, values)| {
                values.iter().map(move |value| match value.strip_prefix('!') {
                    Some(retracted) => format!("--remove-policy={key}={retracted}"),
                    None => format!("--add-policy={key}={value}"),
                })
            })
            .collect()
    }
}
