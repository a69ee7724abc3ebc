//! D-Bus name ownership and talk policies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ContextError;

/// Maximum length of a D-Bus name.
const MAX_NAME_LEN: usize = 255;

/// What a sandboxed application may do with a bus name, ordered by capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusPolicy {
    /// The name is invisible.
    #[default]
    None,
    /// The name is visible but cannot be called.
    See,
    /// Calls to the name are allowed.
    Talk,
    /// The name may be owned.
    Own,
}

impl BusPolicy {
    const NAMES: [(Self, &'static str); 4] = [
        (Self::None, "none"),
        (Self::See, "see"),
        (Self::Talk, "talk"),
        (Self::Own, "own"),
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(p, _)| *p == self)
            .map_or("none", |(_, n)| n)
    }
}

impl fmt::Display for BusPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusPolicy {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == s)
            .map(|(p, _)| *p)
            .ok_or_else(|| ContextError::UnknownName {
                family: "bus policy",
                name: s.to_owned(),
                valid: Self::NAMES.iter().map(|(_, n)| *n).collect(),
            })
    }
}

/// The three buses a context carries policy for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    /// The user session bus.
    Session,
    /// The system bus.
    System,
    /// The accessibility bus.
    A11y,
}

impl Bus {
    /// Every bus, in serialization order.
    pub const ALL: [Self; 3] = [Self::Session, Self::System, Self::A11y];

    /// Metadata group holding this bus's policy.
    #[must_use]
    pub const fn group(self) -> &'static str {
        match self {
            Self::Session => "Session Bus Policy",
            Self::System => "System Bus Policy",
            Self::A11y => "A11y Bus Policy",
        }
    }

    /// Prefix for this bus's command-line flags (`--system-own-name=`).
    #[must_use]
    pub const fn flag_prefix(self) -> &'static str {
        match self {
            Self::Session => "",
            Self::System => "system-",
            Self::A11y => "a11y-",
        }
    }
}

/// Check a well-known bus name, optionally ending in the `.*` wildcard.
///
/// # Errors
///
/// Returns [`ContextError::InvalidBusName`] naming the violated rule.
pub fn validate_bus_name(name: &str) -> Result<(), ContextError> {
    let invalid = |reason| ContextError::InvalidBusName {
        name: name.to_owned(),
        reason,
    };

    let base = name.strip_suffix(".*").unwrap_or(name);
    if base.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name is longer than 255 characters"));
    }
    if base.starts_with(':') {
        return Err(invalid("unique names cannot carry policy"));
    }

    let mut elements = 0;
    for element in base.split('.') {
        elements += 1;
        let Some(first) = element.chars().next() else {
            return Err(invalid("name contains an empty element"));
        };
        if first.is_ascii_digit() {
            return Err(invalid("element starts with a digit"));
        }
        if !element
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid("element contains a character outside [A-Za-z0-9_-]"));
        }
    }
    if elements < 2 {
        return Err(invalid("name needs at least two elements"));
    }
    Ok(())
}

/// Policy per bus name for one bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusPolicyTable {
    entries: BTreeMap<String, BusPolicy>,
}

impl BusPolicyTable {
    /// Set the policy for a validated name.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidBusName`] if `name` is not a bus name.
    pub fn set(&mut self, name: &str, policy: BusPolicy) -> Result<(), ContextError> {
        validate_bus_name(name)?;
        self.entries.insert(name.to_owned(), policy);
        Ok(())
    }

    /// Policy for `name`, [`BusPolicy::None`] if unstated.
    #[must_use]
    pub fn get(&self, name: &str) -> BusPolicy {
        self.entries.get(name).copied().unwrap_or_default()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, BusPolicy)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
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

    /// Layer `other` on top; its entries win.
    pub fn merge(&mut self, other: &Self) {
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (k.clone(), *v)));
    }

    /// Names whose policy in `self` exceeds the one in `old`.
    #[must_use]
    pub fn added_over(&self, old: &Self) -> Vec<(String, BusPolicy)> {
        self.entries
            .iter()
            .filter(|(name, policy)| **policy > old.get(name))
            .map(|(name, policy)| (name.clone(), *policy))
            .collect()
    }

    /// Project as `--own-name=`, `--talk-name=`, `--see-name=`, `--no-talk-name=`.
    #[must_use]
    pub fn to_flags(&self, bus: Bus) -> Vec<String> {
        let prefix = bus.flag_prefix();
        self.entries
            .iter()
            .map(|(name, policy)| {
                let verb = match policy {
                    BusPolicy::Own => "own",
                    BusPolicy::Talk => "talk",
                    BusPolicy::See => "see",
                    BusPolicy::None => "no-talk",
                };
                format!("--{prefix}{verb}-name={name}")
            })
            .collect()
    }
}
