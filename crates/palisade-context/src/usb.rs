//! USB device queries.
//!
//! A query is a `+`-joined list of rules; a device matches the query when
//! it matches every rule. Rules:
//!
//! - `all`: any device
//! - `cls:CC:SS` / `cls:CC:*`: interface class and subclass (hex)
//! - `vnd:VVVV`: vendor id (hex)
//! - `dev:PPPP`: product id (hex), only meaningful with a vendor rule
//!
//! Queries print canonically (lowercase, zero-padded), and that form is
//! the deduplication key inside a [`UsbQuerySet`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ContextError;

/// One rule of a USB query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsbRule {
    /// Any device.
    All,
    /// Devices exposing an interface of this class (and subclass, if given).
    Class {
        /// Interface class.
        class: u8,
        /// Interface subclass, `None` for any.
        subclass: Option<u8>,
    },
    /// Devices with this product id.
    Device(u16),
    /// Devices with this vendor id.
    Vendor(u16),
}

fn parse_hex<T>(rule: &str, digits: &str, max_len: usize) -> Result<T, ContextError>
where
    T: TryFrom<u32>,
{
    if digits.is_empty() || digits.len() > max_len || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ContextError::malformed(
            "usb rule",
            rule,
            format!("expected 1 to {max_len} hex digits"),
        ));
    }
    u32::from_str_radix(digits, 16)
        .ok()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| ContextError::malformed("usb rule", rule, "invalid hex number"))
}

impl FromStr for UsbRule {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "all" {
            return Ok(Self::All);
        }
        if let Some(rest) = s.strip_prefix("cls:") {
            let (class, subclass) = rest
                .split_once(':')
                .ok_or_else(|| ContextError::malformed("usb rule", s, "expected cls:CLASS:SUBCLASS"))?;
            let class = parse_hex(s, class, 2)?;
            let subclass = match subclass {
                "*" => None,
                digits => Some(parse_hex(s, digits, 2)?),
            };
            return Ok(Self::Class { class, subclass });
        }
        if let Some(rest) = s.strip_prefix("dev:") {
            return parse_hex(s, rest, 4).map(Self::Device);
        }
        if let Some(rest) = s.strip_prefix("vnd:") {
            return parse_hex(s, rest, 4).map(Self::Vendor);
        }
        Err(ContextError::malformed(
            "usb rule",
            s,
            "expected all, cls:CLASS:SUBCLASS, dev:PRODUCT or vnd:VENDOR",
        ))
    }
}

impl fmt::Display for UsbRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Class {
                class,
                subclass: Some(sub),
            } => write!(f, "cls:{class:02x}:{sub:02x}"),
            Self::Class {
                class,
                subclass: None,
            } => write!(f, "cls:{class:02x}:*"),
            Self::Device(id) => write!(f, "dev:{id:04x}"),
            Self::Vendor(id) => write!(f, "vnd:{id:04x}"),
        }
    }
}

/// A conjunction of [`UsbRule`]s.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsbQuery {
    rules: Vec<UsbRule>,
}

impl FromStr for UsbQuery {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ContextError::malformed("usb query", s, "query is empty"));
        }
        let rules = s
            .split('+')
            .map(str::parse)
            .collect::<Result<Vec<UsbRule>, _>>()?;

        let has_device = rules.iter().any(|r| matches!(r, UsbRule::Device(_)));
        let has_vendor = rules.iter().any(|r| matches!(r, UsbRule::Vendor(_)));
        if has_device && !has_vendor {
            return Err(ContextError::malformed(
                "usb query",
                s,
                "a dev: rule needs a vnd: rule",
            ));
        }
        Ok(Self { rules })
    }
}

impl fmt::Display for UsbQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{rule}")?;
        }
        Ok(())
    }
}

/// Queries keyed by their canonical print form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbQuerySet {
    queries: BTreeMap<String, UsbQuery>,
}

impl UsbQuerySet {
    /// Add a query; duplicates by canonical form collapse.
    pub fn insert(&mut self, query: UsbQuery) {
        self.queries.insert(query.to_string(), query);
    }

    /// Whether a query with this canonical form is present.
    #[must_use]
    pub fn contains(&self, canonical: &str) -> bool {
        self.queries.contains_key(canonical)
    }

    /// Canonical forms in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    /// Queries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &UsbQuery> {
        self.queries.values()
    }

    /// True if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Drop every query.
    pub fn clear(&mut self) {
        self.queries.clear();
    }

    /// Add every query from `other`.
    pub fn merge(&mut self, other: &Self) {
        self.queries
            .extend(other.queries.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Allow-listed (enumerable) and deny-listed (hidden) USB devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbDevices {
    /// Devices the application may enumerate.
    pub enumerable: UsbQuerySet,
    /// Devices hidden from the application.
    pub hidden: UsbQuerySet,
}

impl UsbDevices {
    /// Allow devices matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] if the query does not parse.
    pub fn add_enumerable(&mut self, query: &str) -> Result<(), ContextError> {
        self.enumerable.insert(query.parse()?);
        Ok(())
    }

    /// Hide devices matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] if the query does not parse.
    pub fn add_hidden(&mut self, query: &str) -> Result<(), ContextError> {
        self.hidden.insert(query.parse()?);
        Ok(())
    }

    /// Apply one `;`-separated list of `query` / `!query` items.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for the first bad query.
    pub fn apply_list(&mut self, list: &str) -> Result<(), ContextError> {
        for item in list.split(';').map(str::trim).filter(|i| !i.is_empty()) {
            match item.strip_prefix('!') {
                Some(hidden) => self.add_hidden(hidden)?,
                None => self.add_enumerable(item)?,
            }
        }
        Ok(())
    }

    /// Apply a USB list file: one `;`-separated list per line, `#` comments.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for the first bad query.
    pub fn apply_list_file(&mut self, contents: &str) -> Result<(), ContextError> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .try_for_each(|line| self.apply_list(line))
    }

    /// True if neither set has a query.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enumerable.is_empty() && self.hidden.is_empty()
    }

    /// Drop every query.
    pub fn clear(&mut self) {
        self.enumerable.clear();
        self.hidden.clear();
    }

    /// Accumulate `other`'s queries.
    pub fn merge(&mut self, other: &Self) {
        self.enumerable.merge(&other.enumerable);
        self.hidden.merge(&other.hidden);
    }

    /// Render as one list line, hidden queries `!`-prefixed.
    #[must_use]
    pub fn to_list(&self) -> String {
        self.enumerable
            .keys()
            .map(str::to_owned)
            .chain(self.hidden.keys().map(|k| format!("!{k}")))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Newly enumerable queries, and previously hidden queries no longer hidden.
    #[must_use]
    pub fn added_over(&self, old: &Self) -> (Vec<String>, Vec<String>) {
        let enumerable = self
            .enumerable
            .keys()
            .filter(|k| !old.enumerable.contains(k))
            .map(str::to_owned)
            .collect();
        let unhidden = old
            .hidden
            .keys()
            .filter(|k| !self.hidden.contains(k))
            .map(str::to_owned)
            .collect();
        (enumerable, unhidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_print_canonically() {
        for (input, canonical) in [
            ("all", "all"),
            ("cls:E0:01", "cls:e0:01"),
            ("cls:3:*", "cls:03:*"),
            ("vnd:46D", "vnd:046d"),
            ("vnd:046d+dev:C52B", "vnd:046d+dev:c52b"),
        ] {
            let query: UsbQuery = input.parse().unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(query.to_string(), canonical);
        }
    }

    #[test]
    fn malformed_rules_are_rejected() {
        for bad in [
            "",
            "any",
            "cls:e0",
            "cls:100:01",
            "cls:zz:01",
            "vnd:12345",
            "vnd:",
            "dev:c52b",
            "all+",
        ] {
            let err = bad.parse::<UsbQuery>().expect_err(bad);
            assert!(matches!(err, ContextError::MalformedSyntax { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn sets_dedup_on_canonical_form() {
        let mut devices = UsbDevices::default();
        devices.add_enumerable("vnd:046D").expect("valid");
        devices.add_enumerable("vnd:046d").expect("valid");
        assert_eq!(devices.enumerable.keys().collect::<Vec<_>>(), vec!["vnd:046d"]);
    }

    #[test]
    fn list_file_format() {
        let mut devices = UsbDevices::default();
        devices
            .apply_list_file(
                "# game controllers\n\
                 vnd:054c+dev:0ce6; vnd:28de\n\
                 \n\
                 !cls:03:*\n",
            )
            .expect("valid list");
        assert_eq!(
            devices.enumerable.keys().collect::<Vec<_>>(),
            vec!["vnd:054c+dev:0ce6", "vnd:28de"]
        );
        assert!(devices.hidden.contains("cls:03:*"));
        assert_eq!(devices.to_list(), "vnd:054c+dev:0ce6;vnd:28de;!cls:03:*");
    }

    #[test]
    fn added_over_detects_new_and_unhidden() {
        let mut old = UsbDevices::default();
        old.add_enumerable("vnd:28de").expect("valid");
        old.add_hidden("cls:03:*").expect("valid");

        let mut new = old.clone();
        assert_eq!(new.added_over(&old), (vec![], vec![]));

        new.hidden.clear();
        new.add_enumerable("all").expect("valid");
        assert_eq!(
            new.added_over(&old),
            (vec!["all".to_owned()], vec!["cls:03:*".to_owned()])
        );
    }
}
