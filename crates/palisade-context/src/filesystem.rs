//! Filesystem specifiers and the filesystem permission table.
//!
//! A specifier is `LOCATION[:SUFFIX]` where `:` and `\` inside the location
//! are escaped with `\`. Locations are absolute paths, `~/`-relative paths,
//! `xdg-*` directories (optionally with a subpath), or one of the symbolic
//! names `home`, `host`, `host-os`, `host-etc`, `host-root`.
//!
//! Normalization is purely syntactic: no path is ever looked up on disk.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::ContextError;
use crate::registry::{NamedFamily, named_family};

/// Pseudo-location meaning "discard inherited filesystem entries first".
pub const HOST_RESET: &str = "host-reset";

/// Symbolic locations with fixed meaning.
pub const SPECIAL_LOCATIONS: &[&str] = &["home", "host", "host-os", "host-etc", "host-root", HOST_RESET];

const VALID_LOCATIONS: &str = "host, host-os, host-etc, host-root, home, xdg-*[/…], ~/dir, /dir";

/// Access granted to a filesystem location, ordered by capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilesystemMode {
    /// Not accessible.
    #[default]
    None,
    /// Read-only.
    ReadOnly,
    /// Read-write.
    ReadWrite,
    /// Read-write, created on the host if missing.
    Create,
}

impl fmt::Display for FilesystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::ReadOnly => "ro",
            Self::ReadWrite => "rw",
            Self::Create => "create",
        })
    }
}

named_family! {
    /// XDG directories addressable as `xdg-NAME[/subpath]`.
    pub enum XdgDir: "xdg directory" {
        /// `XDG_DESKTOP_DIR`
        Desktop => "xdg-desktop",
        /// `XDG_DOCUMENTS_DIR`
        Documents => "xdg-documents",
        /// `XDG_DOWNLOAD_DIR`
        Download => "xdg-download",
        /// `XDG_MUSIC_DIR`
        Music => "xdg-music",
        /// `XDG_PICTURES_DIR`
        Pictures => "xdg-pictures",
        /// `XDG_PUBLICSHARE_DIR`
        PublicShare => "xdg-public-share",
        /// `XDG_TEMPLATES_DIR`
        Templates => "xdg-templates",
        /// `XDG_VIDEOS_DIR`
        Videos => "xdg-videos",
        /// `XDG_RUNTIME_DIR`
        Run => "xdg-run",
        /// `XDG_CONFIG_HOME`
        Config => "xdg-config",
        /// `XDG_CACHE_HOME`
        Cache => "xdg-cache",
        /// `XDG_DATA_HOME`
        Data => "xdg-data",
    }
}

/// A canonical location split into its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    /// One of [`SPECIAL_LOCATIONS`].
    Special(&'a str),
    /// An XDG directory plus an optional subpath.
    Xdg {
        /// The directory.
        dir: XdgDir,
        /// Path below it, without leading `/`.
        subpath: Option<&'a str>,
    },
    /// A path below the home directory, without the `~/` prefix.
    HomeRelative(&'a str),
    /// An absolute path.
    Absolute(&'a str),
}

impl<'a> Location<'a> {
    /// Classify a canonical location. Returns `None` for non-canonical input.
    #[must_use]
    pub fn classify(location: &'a str) -> Option<Self> {
        if SPECIAL_LOCATIONS.contains(&location) {
            return Some(Self::Special(location));
        }
        if let Some((dir, subpath)) = split_xdg(location) {
            return Some(Self::Xdg { dir, subpath });
        }
        if let Some(rest) = location.strip_prefix("~/") {
            return Some(Self::HomeRelative(rest));
        }
        if location.starts_with('/') {
            return Some(Self::Absolute(location));
        }
        None
    }
}

fn split_xdg(location: &str) -> Option<(XdgDir, Option<&str>)> {
    XdgDir::all().find_map(|dir| {
        let rest = location.strip_prefix(dir.name())?;
        if rest.is_empty() {
            Some((dir, None))
        } else {
            rest.strip_prefix('/')
                .map(|sub| (dir, (!sub.is_empty()).then_some(sub)))
        }
    })
}

/// Parse a filesystem specifier into a canonical location and mode.
///
/// `negated` selects the `--nofilesystem` grammar: the mode is always
/// [`FilesystemMode::None`], and `host:reset` (or `host-reset`) is accepted.
///
/// # Errors
///
/// - [`ContextError::PathTraversal`] if any path segment is `..`
/// - [`ContextError::ReservedPath`] if the location is `/`
/// - [`ContextError::MalformedSyntax`] for unknown suffixes, misplaced
///   `reset`, or unrecognized locations
pub fn parse_filesystem(spec: &str, negated: bool) -> Result<(String, FilesystemMode), ContextError> {
    let (mut location, suffix) = split_unescaped(spec);
    let mut mode = if negated {
        FilesystemMode::None
    } else {
        FilesystemMode::ReadWrite
    };

    match suffix {
        None => {}
        Some("ro" | "rw" | "create") if negated => {
            warn!(filesystem = %spec, "suffix is not applicable for --nofilesystem, ignoring");
        }
        Some("ro") => mode = FilesystemMode::ReadOnly,
        Some("rw") => mode = FilesystemMode::ReadWrite,
        Some("create") => mode = FilesystemMode::Create,
        Some("reset") => {
            if !negated {
                return Err(ContextError::malformed(
                    "filesystem",
                    spec,
                    "the reset suffix is only valid with --nofilesystem",
                ));
            }
            if location != "host" {
                return Err(ContextError::malformed(
                    "filesystem",
                    spec,
                    "the reset suffix is only valid with host",
                ));
            }
            location = HOST_RESET.to_owned();
        }
        Some(other) => {
            return Err(ContextError::malformed(
                "filesystem",
                spec,
                format!("unknown suffix `{other}`, expected ro, rw, create or reset"),
            ));
        }
    }

    if location == HOST_RESET && !negated {
        return Err(ContextError::malformed(
            "filesystem",
            spec,
            "host-reset is only valid with --nofilesystem",
        ));
    }

    let location = if location.contains('/') {
        normalize_path(&location)?
    } else {
        location
    };

    resolve_location(location, spec).map(|location| (location, mode))
}

/// Render a location and mode back into specifier form.
///
/// The result, with its `!` prefix stripped and `negated` set accordingly,
/// parses back to the same pair.
#[must_use]
pub fn unparse_filesystem(location: &str, mode: FilesystemMode) -> String {
    if location == HOST_RESET {
        return "!host:reset".to_owned();
    }
    let escaped = escape_location(location);
    match mode {
        FilesystemMode::None => format!("!{escaped}"),
        FilesystemMode::ReadOnly => format!("{escaped}:ro"),
        FilesystemMode::ReadWrite => escaped,
        FilesystemMode::Create => format!("{escaped}:create"),
    }
}

fn escape_location(location: &str) -> String {
    let mut out = String::with_capacity(location.len());
    for c in location.chars() {
        if matches!(c, ':' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Split on the first unescaped `:`, unescaping `\:` and `\\` in the head.
fn split_unescaped(spec: &str) -> (String, Option<&str>) {
    let mut head = String::with_capacity(spec.len());
    let mut chars = spec.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, next @ (':' | '\\'))) => head.push(next),
                Some((_, next)) => {
                    head.push('\\');
                    head.push(next);
                }
                None => head.push('\\'),
            },
            ':' => return (head, Some(&spec[i + 1..])),
            _ => head.push(c),
        }
    }
    (head, None)
}

/// Reject `..`, collapse `//` and `/.`, and strip trailing separators.
fn normalize_path(location: &str) -> Result<String, ContextError> {
    if location.split('/').any(|segment| segment == "..") {
        return Err(ContextError::PathTraversal(location.to_owned()));
    }

    let absolute = location.starts_with('/');
    let segments: Vec<&str> = location
        .split('/')
        .enumerate()
        .filter(|(i, s)| !s.is_empty() && (*s != "." || (*i == 0 && !absolute)))
        .map(|(_, s)| s)
        .collect();

    let joined = segments.join("/");
    if absolute {
        if joined.is_empty() {
            return Err(ContextError::ReservedPath(location.to_owned()));
        }
        Ok(format!("/{joined}"))
    } else {
        Ok(joined)
    }
}

fn resolve_location(location: String, spec: &str) -> Result<String, ContextError> {
    if Location::classify(&location).is_some() {
        return Ok(location);
    }
    if location == "~" {
        return Ok("home".to_owned());
    }
    if let Some(rest) = location.strip_prefix("home/") {
        return Ok(format!("~/{rest}"));
    }
    Err(ContextError::malformed(
        "filesystem",
        spec,
        format!("unknown location, valid locations are: {VALID_LOCATIONS}"),
    ))
}

// ── Table ────────────────────────────────────────────────────────────

/// Filesystem access keyed by canonical location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemTable {
    entries: BTreeMap<String, FilesystemMode>,
}

impl FilesystemTable {
    /// Set the mode for a canonical location.
    ///
    /// [`HOST_RESET`] is always stored with [`FilesystemMode::None`].
    pub fn insert(&mut self, location: impl Into<String>, mode: FilesystemMode) {
        let location = location.into();
        let mode = if location == HOST_RESET {
            FilesystemMode::None
        } else {
            mode
        };
        self.entries.insert(location, mode);
    }

    /// Grant access per a `--filesystem` specifier.
    ///
    /// # Errors
    ///
    /// See [`parse_filesystem`].
    pub fn add(&mut self, spec: &str) -> Result<(), ContextError> {
        let (location, mode) = parse_filesystem(spec, false)?;
        self.insert(location, mode);
        Ok(())
    }

    /// Revoke access per a `--nofilesystem` specifier.
    ///
    /// # Errors
    ///
    /// See [`parse_filesystem`].
    pub fn remove(&mut self, spec: &str) -> Result<(), ContextError> {
        let (location, mode) = parse_filesystem(spec, true)?;
        self.insert(location, mode);
        Ok(())
    }

    /// Mode stated for exactly this location.
    #[must_use]
    pub fn get(&self, location: &str) -> Option<FilesystemMode> {
        self.entries.get(location).copied()
    }

    /// Mode for this location, [`FilesystemMode::None`] if unstated.
    #[must_use]
    pub fn mode_of(&self, location: &str) -> FilesystemMode {
        self.get(location).unwrap_or_default()
    }

    /// Whether this table discards inherited entries when merged.
    #[must_use]
    pub fn has_host_reset(&self) -> bool {
        self.entries.contains_key(HOST_RESET)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, FilesystemMode)> {
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

    /// Layer `other` on top, discarding everything first if it carries [`HOST_RESET`].
    pub fn merge(&mut self, other: &Self) {
        if other.has_host_reset() {
            debug!(discarded = self.entries.len(), "host-reset discards inherited filesystems");
            self.entries.clear();
        }
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (k.clone(), *v)));
    }

    /// Apply serialized `spec` / `!spec` tokens, skipping ones that do not parse.
    pub fn apply_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) {
        for raw in tokens {
            let raw = raw.as_ref();
            let (negated, spec) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            match parse_filesystem(spec, negated) {
                Ok((location, mode)) => self.insert(location, mode),
                Err(e) => debug!(filesystem = %raw, error = %e, "skipping unknown filesystem"),
            }
        }
    }

    /// Serialize as tokens, `!host:reset` first.
    ///
    /// With `flatten`, `host-reset` and inaccessible locations are omitted.
    #[must_use]
    pub fn to_tokens(&self, flatten: bool) -> Vec<String> {
        let mut tokens = Vec::with_capacity(self.entries.len());
        if self.has_host_reset() && !flatten {
            tokens.push(unparse_filesystem(HOST_RESET, FilesystemMode::None));
        }
        tokens.extend(
            self.entries
                .iter()
                .filter(|(location, mode)| {
                    *location != HOST_RESET && !(flatten && **mode == FilesystemMode::None)
                })
                .map(|(location, mode)| unparse_filesystem(location, *mode)),
        );
        tokens
    }

    /// Project as `--filesystem=` / `--nofilesystem=` flags.
    #[must_use]
    pub fn to_flags(&self) -> Vec<String> {
        self.to_tokens(false)
            .into_iter()
            .map(|token| match token.strip_prefix('!') {
                Some(spec) => format!("--nofilesystem={spec}"),
                None => format!("--filesystem={token}"),
            })
            .collect()
    }

    /// Entries whose mode exceeds both `old`'s mode for the same location
    /// and `old`'s mode for `host`.
    #[must_use]
    pub fn added_over(&self, old: &Self) -> Vec<(String, FilesystemMode)> {
        let old_host = old.mode_of("host");
        self.entries
            .iter()
            .filter(|(location, mode)| {
                **mode > old.mode_of(location) && **mode > old_host
            })
            .map(|(location, mode)| (location.clone(), *mode))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(spec: &str) -> (String, FilesystemMode) {
        parse_filesystem(spec, false).unwrap_or_else(|e| panic!("{spec} should parse: {e}"))
    }

    #[test]
    fn suffixes_select_mode() {
        assert_eq!(parse("/opt"), ("/opt".into(), FilesystemMode::ReadWrite));
        assert_eq!(parse("/opt:ro"), ("/opt".into(), FilesystemMode::ReadOnly));
        assert_eq!(parse("/opt:rw"), ("/opt".into(), FilesystemMode::ReadWrite));
        assert_eq!(parse("~/Games:create"), ("~/Games".into(), FilesystemMode::Create));
        assert_eq!(parse("xdg-music:ro"), ("xdg-music".into(), FilesystemMode::ReadOnly));
    }

    #[test]
    fn negation_forces_none_and_ignores_mode_suffix() {
        let (location, mode) = parse_filesystem("home:ro", true).expect("parse");
        assert_eq!(location, "home");
        assert_eq!(mode, FilesystemMode::None);
    }

    #[test]
    fn host_reset_only_when_negated() {
        assert_eq!(
            parse_filesystem("host:reset", true).expect("parse"),
            (HOST_RESET.to_owned(), FilesystemMode::None)
        );
        assert_eq!(
            parse_filesystem("host-reset", true).expect("parse"),
            (HOST_RESET.to_owned(), FilesystemMode::None)
        );
        for (spec, negated) in [("host:reset", false), ("home:reset", true), ("host-reset", false)] {
            let err = parse_filesystem(spec, negated).expect_err(spec);
            assert!(matches!(err, ContextError::MalformedSyntax { .. }), "{spec}: {err}");
        }
    }

    #[test]
    fn unknown_suffix_is_rejected() {
        let err = parse_filesystem("/opt:rwx", false).expect_err("bad suffix");
        assert!(err.to_string().contains("rwx"));
    }

    #[test]
    fn escaped_colons_stay_in_location() {
        assert_eq!(parse(r"/mnt/a\:b:ro"), ("/mnt/a:b".into(), FilesystemMode::ReadOnly));
        assert_eq!(parse(r"/mnt/a\\b"), (r"/mnt/a\b".into(), FilesystemMode::ReadWrite));
    }

    #[test]
    fn paths_are_collapsed() {
        assert_eq!(parse("/usr//share/./fonts/").0, "/usr/share/fonts");
        assert_eq!(parse("/usr/share/.").0, "/usr/share");
        assert_eq!(parse("~/./Music//").0, "~/Music");
        assert_eq!(parse("xdg-data/./themes").0, "xdg-data/themes");
    }

    #[test]
    fn traversal_and_root_are_rejected() {
        for spec in ["/usr/../etc", "~/..", "../foo", "xdg-data/../x"] {
            let err = parse_filesystem(spec, false).expect_err(spec);
            assert!(matches!(err, ContextError::PathTraversal(_)), "{spec}: {err}");
        }
        for spec in ["/", "//", "/.", "/./"] {
            let err = parse_filesystem(spec, false).expect_err(spec);
            assert!(matches!(err, ContextError::ReservedPath(_)), "{spec}: {err}");
        }
    }

    #[test]
    fn home_aliases_resolve() {
        assert_eq!(parse("~").0, "home");
        assert_eq!(parse("~/").0, "home");
        assert_eq!(parse("home/Documents").0, "~/Documents");
        assert_eq!(parse("home").0, "home");
    }

    #[test]
    fn xdg_prefix_must_be_whole_component() {
        assert_eq!(parse("xdg-run/pipewire-0").0, "xdg-run/pipewire-0");
        let err = parse_filesystem("xdg-musical", false).expect_err("not an xdg dir");
        assert!(err.to_string().contains("valid locations"), "{err}");
        assert!(parse_filesystem("relative/path", false).is_err());
        assert!(parse_filesystem("~user/x", false).is_err());
    }

    #[test]
    fn classify_locations() {
        assert_eq!(
            Location::classify("xdg-music/Albums"),
            Some(Location::Xdg { dir: XdgDir::Music, subpath: Some("Albums") })
        );
        assert_eq!(Location::classify("host-os"), Some(Location::Special("host-os")));
        assert_eq!(Location::classify("~/x"), Some(Location::HomeRelative("x")));
        assert_eq!(Location::classify("/x"), Some(Location::Absolute("/x")));
        assert_eq!(Location::classify("x"), None);
    }

    #[test]
    fn host_reset_serializes_first_and_reloads_distinct_from_host() {
        let mut table = FilesystemTable::default();
        table.remove("host").expect("parse");
        table.remove("host:reset").expect("parse");
        table.add("/opt:ro").expect("parse");

        let tokens = table.to_tokens(false);
        assert_eq!(tokens, vec!["!host:reset", "/opt:ro", "!host"]);

        let mut reloaded = FilesystemTable::default();
        reloaded.apply_tokens(&tokens);
        assert_eq!(reloaded, table);
        assert_eq!(reloaded.get(HOST_RESET), Some(FilesystemMode::None));
        assert_eq!(reloaded.get("host"), Some(FilesystemMode::None));

        assert_eq!(table.to_tokens(true), vec!["/opt:ro"]);
        assert_eq!(table.to_flags(), vec![
            "--nofilesystem=host:reset",
            "--filesystem=/opt:ro",
            "--nofilesystem=host"
        ]);
    }

    #[test]
    fn merge_with_host_reset_discards_inherited() {
        let mut base = FilesystemTable::default();
        base.add("host").expect("parse");
        base.add("~/Music").expect("parse");

        let mut over = FilesystemTable::default();
        over.remove("host:reset").expect("parse");
        over.add("xdg-download:ro").expect("parse");

        base.merge(&over);
        let entries: Vec<_> = base.iter().collect();
        assert_eq!(entries, vec![
            (HOST_RESET, FilesystemMode::None),
            ("xdg-download", FilesystemMode::ReadOnly)
        ]);
    }

    #[test]
    fn insert_forces_host_reset_to_none() {
        let mut table = FilesystemTable::default();
        table.insert(HOST_RESET, FilesystemMode::ReadWrite);
        assert_eq!(table.get(HOST_RESET), Some(FilesystemMode::None));
    }

    #[test]
    fn added_over_respects_host_access() {
        let mut old = FilesystemTable::default();
        old.add("~/Music:ro").expect("parse");

        let mut new = FilesystemTable::default();
        new.add("~/Music:ro").expect("parse");
        assert!(new.added_over(&old).is_empty());

        new.add("~/Music").expect("parse");
        assert_eq!(new.added_over(&old), vec![("~/Music".into(), FilesystemMode::ReadWrite)]);

        old.add("host").expect("parse");
        assert!(new.added_over(&old).is_empty(), "host already grants read-write");

        new.add("/srv:create").expect("parse");
        assert_eq!(new.added_over(&old), vec![("/srv".into(), FilesystemMode::Create)]);
    }

    #[test]
    fn unparseable_tokens_are_skipped() {
        let mut table = FilesystemTable::default();
        table.apply_tokens(&["/", "nowhere", "/opt:ro", "!host:reset"]);
        assert_eq!(table.iter().count(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_spec() -> impl Strategy<Value = String> {
            let head = prop_oneof![
                Just("/".to_owned()),
                Just("~/".to_owned()),
                Just("home/".to_owned()),
                Just("xdg-data/".to_owned()),
                Just("xdg-music".to_owned()),
                Just("host".to_owned()),
                Just("~".to_owned()),
            ];
            let segment = prop_oneof![
                "[a-z:\\\\]{1,6}",
                Just(".".to_owned()),
                Just(String::new()),
            ];
            let suffix = prop_oneof![
                Just(String::new()),
                Just(":ro".to_owned()),
                Just(":create".to_owned()),
                Just(":rw".to_owned()),
            ];
            (head, prop::collection::vec(segment, 0..5), suffix).prop_map(|(head, segs, suffix)| {
                let escaped: Vec<String> = segs
                    .iter()
                    .map(|s| s.replace('\\', "\\\\").replace(':', "\\:"))
                    .collect();
                format!("{head}{}{suffix}", escaped.join("/"))
            })
        }

        proptest! {
            /// Normalizing the unparsed output of a normalization is a no-op.
            #[test]
            fn normalization_is_idempotent(spec in arb_spec(), negated in any::<bool>()) {
                if let Ok((location, mode)) = parse_filesystem(&spec, negated) {
                    let rendered = unparse_filesystem(&location, mode);
                    let (again_negated, body) = match rendered.strip_prefix('!') {
                        Some(rest) => (true, rest),
                        None => (false, rendered.as_str()),
                    };
                    let again = parse_filesystem(body, again_negated).unwrap();
                    prop_assert_eq!(again, (location, mode));
                }
            }

            /// Parsing never panics on arbitrary input.
            #[test]
            fn parse_never_panics(spec in ".*", negated in any::<bool>()) {
                let _ = parse_filesystem(&spec, negated);
            }
        }
    }
}
