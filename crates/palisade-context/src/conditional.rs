//! Conditional permissions for sockets and devices.
//!
//! Each socket or device name maps to a [`PermissionRecord`] that is either
//! unconditionally allowed, unconditionally denied, or denied unless one of
//! a sorted set of runtime conditions holds.
//!
//! # Serialized form
//!
//! A record serializes to a short token list:
//!
//! | Record                         | Tokens                                   |
//! |--------------------------------|------------------------------------------|
//! | allowed                        | `name`                                   |
//! | denied (reset)                 | `!name`                                  |
//! | conditional                    | [`!name`] `name` `if:name:c1` `if:name:c2` |
//!
//! The bare `name` in the conditional form exists so engines that predate
//! conditions degrade to "always allowed" instead of "always denied". When
//! parsing, a bare `name` is therefore only *provisionally* an allow: a
//! later `if:name:…` token for the same name reverts it (see [`TokenState`]).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::error::ContextError;
use crate::registry::{NamedFamily, named_family};

named_family! {
    /// Sockets that can be exposed to the sandbox.
    pub enum Socket: "socket" {
        /// The X11 display socket.
        X11 => "x11",
        /// The Wayland compositor socket.
        Wayland => "wayland",
        /// X11, but only when no Wayland compositor is available.
        FallbackX11 => "fallback-x11",
        /// The `PulseAudio` socket.
        Pulseaudio => "pulseaudio",
        /// Unfiltered access to the session bus.
        SessionBus => "session-bus",
        /// Unfiltered access to the system bus.
        SystemBus => "system-bus",
        /// The SSH agent socket.
        SshAuth => "ssh-auth",
        /// The PC/SC smart card daemon socket.
        Pcsc => "pcsc",
        /// The CUPS printing socket.
        Cups => "cups",
        /// The GnuPG agent sockets.
        GpgAgent => "gpg-agent",
        /// The Wayland socket passed down by the parent, not the compositor's.
        InheritWaylandSocket => "inherit-wayland-socket",
    }
}

named_family! {
    /// Device classes that can be exposed to the sandbox.
    pub enum Device: "device" {
        /// GPU render nodes.
        Dri => "dri",
        /// Input devices under `/dev/input`.
        Input => "input",
        /// Raw USB device nodes.
        Usb => "usb",
        /// The KVM virtualization device.
        Kvm => "kvm",
        /// The host `/dev/shm`.
        Shm => "shm",
        /// Every device node.
        All => "all",
    }
}

named_family! {
    /// Conditions whose truth depends on the execution host.
    ///
    /// The engine never probes the host itself; callers supply an
    /// evaluator for these.
    pub enum RuntimeCondition: "condition" {
        /// At least one input device is present.
        HasInputDevice => "has-input-device",
        /// A Wayland compositor is reachable.
        HasWayland => "has-wayland",
    }
}

/// How this engine version understands a condition string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Known, with a fixed truth value.
    Static(bool),
    /// Known, evaluated on the host.
    Runtime(RuntimeCondition),
    /// Not in this version's vocabulary; never satisfied.
    Unknown,
}

impl ConditionKind {
    /// Classify a condition string.
    #[must_use]
    pub fn classify(condition: &str) -> Self {
        match condition {
            "true" => Self::Static(true),
            "false" => Self::Static(false),
            other => RuntimeCondition::from_name(other).map_or(Self::Unknown, Self::Runtime),
        }
    }
}

/// Allow/deny/conditional state for one socket or device.
///
/// Invariant: `allowed` implies `conditionals` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionRecord {
    allowed: bool,
    reset: bool,
    conditionals: BTreeSet<String>,
}

impl PermissionRecord {
    /// Grant unconditionally, replacing any previous state.
    pub fn set_allowed(&mut self) {
        self.allowed = true;
        self.reset = true;
        self.conditionals.clear();
    }

    /// Deny unconditionally, replacing any previous state.
    pub fn set_not_allowed(&mut self) {
        self.allowed = false;
        self.reset = true;
        self.conditionals.clear();
    }

    /// Grant when `condition` holds. No-op if already unconditionally allowed.
    pub fn set_allowed_if(&mut self, condition: &str) {
        if self.allowed {
            return;
        }
        self.conditionals.insert(condition.to_owned());
        self.check_invariant();
    }

    /// Whether access is granted without evaluating conditions.
    #[must_use]
    pub const fn allows_unconditionally(&self) -> bool {
        self.allowed
    }

    /// Whether applying this record discards what lower layers granted.
    #[must_use]
    pub const fn resets(&self) -> bool {
        self.reset
    }

    /// Sorted conditions under which access is granted.
    pub fn conditionals(&self) -> impl Iterator<Item = &str> {
        self.conditionals.iter().map(String::as_str)
    }

    /// True if the record states nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.allowed && !self.reset && self.conditionals.is_empty()
    }

    /// Decide whether access is granted on this host.
    ///
    /// Unknown conditions are skipped; `evaluator` is only consulted for
    /// [`RuntimeCondition`]s, in sorted condition order, stopping at the
    /// first one satisfied.
    pub fn compute_allowed<E>(&self, mut evaluator: E) -> bool
    where
        E: FnMut(RuntimeCondition) -> bool,
    {
        if self.allowed {
            return true;
        }
        self.conditionals
            .iter()
            .any(|condition| match ConditionKind::classify(condition) {
                ConditionKind::Static(value) => value,
                ConditionKind::Runtime(runtime) => evaluator(runtime),
                ConditionKind::Unknown => {
                    debug!(condition = %condition, "ignoring unknown condition");
                    false
                }
            })
    }

    /// Layer `other` on top of this record.
    pub fn merge(&mut self, other: &Self) {
        if other.reset {
            self.conditionals.clear();
            self.reset = true;
        }
        self.allowed = other.allowed;
        if self.allowed {
            self.conditionals.clear();
        }
        self.conditionals
            .extend(other.conditionals.iter().cloned());
        self.check_invariant();
    }

    /// What `self` grants that `old` does not, if anything.
    ///
    /// Compares the two sorted condition lists in a single pass: a
    /// condition present only in `self` is an addition, one present only in
    /// `old` is a removal and harmless.
    #[must_use]
    pub fn added_over(&self, old: &Self) -> Option<AddedGrant> {
        if old.allowed {
            return None;
        }
        if self.allowed {
            return Some(AddedGrant::Unconditional);
        }

        let mut added = Vec::new();
        let mut old_iter = old.conditionals.iter().peekable();
        for condition in &self.conditionals {
            loop {
                match old_iter.peek() {
                    Some(o) if *o < condition => {
                        old_iter.next();
                    }
                    Some(o) if *o == condition => {
                        old_iter.next();
                        break;
                    }
                    _ => {
                        added.push(condition.clone());
                        break;
                    }
                }
            }
        }

        if added.is_empty() {
            None
        } else {
            Some(AddedGrant::Conditions(added))
        }
    }

    /// Serialize as tokens for `name`.
    ///
    /// With `flatten`, explicit denials are omitted.
    #[must_use]
    pub fn to_tokens(&self, name: &str, flatten: bool) -> Vec<String> {
        if self.allowed {
            return vec![name.to_owned()];
        }
        if self.conditionals.is_empty() {
            return if self.reset && !flatten {
                vec![format!("!{name}")]
            } else {
                Vec::new()
            };
        }

        let mut tokens = Vec::with_capacity(self.conditionals.len() + 2);
        if self.reset && !flatten {
            tokens.push(format!("!{name}"));
        }
        tokens.push(name.to_owned());
        tokens.extend(self.conditionals.iter().map(|c| format!("if:{name}:{c}")));
        tokens
    }

    fn check_invariant(&self) {
        debug_assert!(
            !self.allowed || self.conditionals.is_empty(),
            "unconditionally allowed record must not carry conditions"
        );
    }
}

/// An escalation found by [`PermissionRecord::added_over`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "grant", content = "conditions")]
pub enum AddedGrant {
    /// Newly allowed without conditions.
    Unconditional,
    /// Newly allowed under these conditions.
    Conditions(Vec<String>),
}

// ── Token parsing ────────────────────────────────────────────────────

/// One parsed permission token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionToken {
    /// `name`
    Allow(String),
    /// `!name`
    Deny(String),
    /// `if:name:condition`
    AllowIf {
        /// Permission name.
        name: String,
        /// Gating condition.
        condition: String,
    },
}

impl PermissionToken {
    /// Parse a single token.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for an `if:` token without
    /// both a name and a condition, or a negated `if:` token.
    pub fn parse(raw: &str) -> Result<Self, ContextError> {
        let (negated, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        if let Some(rest) = body.strip_prefix("if:") {
            if negated {
                return Err(ContextError::malformed(
                    "permission",
                    raw,
                    "conditional permissions cannot be negated",
                ));
            }
            let (name, condition) = split_conditional(rest)
                .ok_or_else(|| ContextError::malformed("permission", raw, "expected if:NAME:CONDITION"))?;
            return Ok(Self::AllowIf {
                name: name.to_owned(),
                condition: condition.to_owned(),
            });
        }

        if body.is_empty() {
            return Err(ContextError::malformed("permission", raw, "empty name"));
        }
        Ok(if negated {
            Self::Deny(body.to_owned())
        } else {
            Self::Allow(body.to_owned())
        })
    }

    /// Name the token refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Allow(name) | Self::Deny(name) | Self::AllowIf { name, .. } => name,
        }
    }
}

/// Split `NAME:CONDITION`, requiring both halves to be non-empty.
pub(crate) fn split_conditional(spec: &str) -> Option<(&str, &str)> {
    let (name, condition) = spec.split_once(':')?;
    if name.is_empty() || condition.is_empty() {
        return None;
    }
    Some((name, condition))
}

/// Per-name parser state while applying a token list.
///
/// A bare `name` moves to [`TokenState::ProvisionalAllow`], remembering the
/// record as it was before. A following `if:name:…` restores that saved
/// record and adds the condition, so `name;if:name:c` means "only if c".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenState {
    /// Nothing stated yet.
    Empty,
    /// Allowed by a bare token, revertible by a later conditional token.
    ProvisionalAllow(PermissionRecord),
    /// Denied unless a condition holds.
    Conditional,
    /// Allowed by a state that no token in this list can revert.
    UnconditionalAllow,
    /// Denied.
    UnconditionalDeny,
}

impl TokenState {
    /// The state implied by a record before any token is applied.
    #[must_use]
    pub fn initial(record: &PermissionRecord) -> Self {
        if record.allowed {
            Self::UnconditionalAllow
        } else if !record.conditionals.is_empty() {
            Self::Conditional
        } else if record.reset {
            Self::UnconditionalDeny
        } else {
            Self::Empty
        }
    }

    /// Apply one token to `record` and return the next state.
    #[must_use]
    pub fn step(self, record: &mut PermissionRecord, token: &PermissionToken) -> Self {
        match token {
            PermissionToken::Deny(_) => {
                record.set_not_allowed();
                Self::UnconditionalDeny
            }
            PermissionToken::Allow(_) => match self {
                Self::ProvisionalAllow(saved) => Self::ProvisionalAllow(saved),
                _ => {
                    let saved = record.clone();
                    record.set_allowed();
                    Self::ProvisionalAllow(saved)
                }
            },
            PermissionToken::AllowIf { condition, .. } => {
                if let Self::ProvisionalAllow(saved) = self {
                    *record = saved;
                }
                record.set_allowed_if(condition);
                if record.allowed {
                    Self::UnconditionalAllow
                } else {
                    Self::Conditional
                }
            }
        }
    }
}

// ── Table ────────────────────────────────────────────────────────────

/// Permission records keyed by socket or device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalTable<K> {
    records: BTreeMap<K, PermissionRecord>,
}

impl<K> Default for ConditionalTable<K> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

impl<K: NamedFamily> ConditionalTable<K> {
    /// Record for `key`, if this table states anything about it.
    #[must_use]
    pub fn get(&self, key: K) -> Option<&PermissionRecord> {
        self.records.get(&key)
    }

    /// All records in registry order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &PermissionRecord)> {
        self.records.iter().map(|(k, r)| (*k, r))
    }

    /// True if no record exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Grant `key` unconditionally.
    pub fn set_allowed(&mut self, key: K) {
        self.records.entry(key).or_default().set_allowed();
    }

    /// Deny `key` unconditionally.
    pub fn set_not_allowed(&mut self, key: K) {
        self.records.entry(key).or_default().set_not_allowed();
    }

    /// Grant `key` when `condition` holds.
    pub fn set_allowed_if(&mut self, key: K, condition: &str) {
        self.records.entry(key).or_default().set_allowed_if(condition);
    }

    /// Whether `key` is granted without conditions.
    #[must_use]
    pub fn allows_unconditionally(&self, key: K) -> bool {
        self.get(key)
            .is_some_and(PermissionRecord::allows_unconditionally)
    }

    /// Whether `key` is granted on this host.
    pub fn compute_allowed<E>(&self, key: K, evaluator: E) -> bool
    where
        E: FnMut(RuntimeCondition) -> bool,
    {
        self.get(key)
            .is_some_and(|record| record.compute_allowed(evaluator))
    }

    /// Every key granted on this host.
    pub fn compute_granted<E>(&self, mut evaluator: E) -> BTreeSet<K>
    where
        E: FnMut(RuntimeCondition) -> bool,
    {
        self.records
            .iter()
            .filter(|(_, record)| record.compute_allowed(&mut evaluator))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Layer `other` on top of this table.
    pub fn merge(&mut self, other: &Self) {
        for (key, record) in &other.records {
            self.records.entry(*key).or_default().merge(record);
        }
    }

    /// Apply a serialized token list.
    ///
    /// Every token is validated before any record changes. Tokens naming a
    /// member this version does not know are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for a malformed token.
    pub fn apply_tokens<S: AsRef<str>>(&mut self, tokens: &[S]) -> Result<(), ContextError> {
        let parsed = tokens
            .iter()
            .map(|t| PermissionToken::parse(t.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut states: BTreeMap<K, TokenState> = BTreeMap::new();
        for token in &parsed {
            let Ok(key) = K::from_name(token.name()) else {
                debug!(family = K::FAMILY, name = token.name(), "skipping unknown name");
                continue;
            };
            let record = self.records.entry(key).or_default();
            let state = states
                .remove(&key)
                .unwrap_or_else(|| TokenState::initial(record));
            states.insert(key, state.step(record, token));
        }
        Ok(())
    }

    /// Serialize every record as tokens, in registry order.
    #[must_use]
    pub fn to_tokens(&self, flatten: bool) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|(key, record)| record.to_tokens(key.name(), flatten))
            .collect()
    }

    /// Project as command-line flags (`--socket=`, `--nosocket=`, `--socket-if=`).
    #[must_use]
    pub fn to_flags(&self, flag: &str) -> Vec<String> {
        let mut flags = Vec::new();
        for (key, record) in &self.records {
            let name = key.name();
            if record.allowed {
                flags.push(format!("--{flag}={name}"));
                continue;
            }
            if record.reset {
                flags.push(format!("--no{flag}={name}"));
            }
            flags.extend(
                record
                    .conditionals
                    .iter()
                    .map(|c| format!("--{flag}-if={name}:{c}")),
            );
        }
        flags
    }

    /// Everything `self` grants that `old` does not.
    #[must_use]
    pub fn added_over(&self, old: &Self) -> Vec<(K, AddedGrant)> {
        let empty = PermissionRecord::default();
        self.records
            .iter()
            .filter_map(|(key, record)| {
                let previous = old.records.get(key).unwrap_or(&empty);
                record.added_over(previous).map(|grant| (*key, grant))
            })
            .collect()
    }
}
