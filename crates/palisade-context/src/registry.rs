//! Fixed name registries for permission families.
//!
//! Every family (shares, features, sockets, devices) is a closed, ordered
//! list of `(variant, name)` pairs declared once with [`named_family!`].
//! A variant's position in that table is its bit for the bitmask
//! families, so adding a member never means renumbering anything by hand.

use std::fmt;
use std::marker::PhantomData;

use crate::error::ContextError;

/// A closed family of named permissions.
pub trait NamedFamily: Copy + Eq + Ord + fmt::Debug + 'static {
    /// Human-readable family label used in error messages.
    const FAMILY: &'static str;
    /// Registry order: `(variant, name)` pairs.
    const TABLE: &'static [(Self, &'static str)];

    /// The canonical name of this member.
    fn name(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(v, _)| *v == self)
            .map_or("", |(_, n)| n)
    }

    /// Look up a member by name.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] listing every valid name.
    fn from_name(name: &str) -> Result<Self, ContextError> {
        Self::TABLE
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(v, _)| *v)
            .ok_or_else(|| ContextError::UnknownName {
                family: Self::FAMILY,
                name: name.to_owned(),
                valid: Self::valid_names(),
            })
    }

    /// Every name in registry order.
    fn valid_names() -> Vec<&'static str> {
        Self::TABLE.iter().map(|(_, n)| *n).collect()
    }

    /// Every member in registry order.
    fn all() -> impl Iterator<Item = Self> {
        Self::TABLE.iter().map(|(v, _)| *v)
    }

    /// The bit this member occupies in a [`Bitmask`].
    fn bit(self) -> u32 {
        let index = Self::TABLE
            .iter()
            .position(|(v, _)| *v == self)
            .unwrap_or_default();
        1 << index
    }
}

/// Declare a [`NamedFamily`] enum together with its name table.
macro_rules! named_family {
    (
        $(#[$meta:meta])*
        $vis:vis enum $ty:ident : $family:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $name:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis enum $ty {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $crate::registry::NamedFamily for $ty {
            const FAMILY: &'static str = $family;
            const TABLE: &'static [(Self, &'static str)] = &[ $( (Self::$variant, $name), )+ ];
        }

        impl ::std::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::registry::NamedFamily::name(*self))
            }
        }
    };
}

pub(crate) use named_family;

named_family! {
    /// Process-namespace shares.
    pub enum Share: "share" {
        /// Host network namespace.
        Network => "network",
        /// Host IPC namespace.
        Ipc => "ipc",
    }
}

named_family! {
    /// Optional sandbox features.
    pub enum Feature: "feature" {
        /// Development syscalls (ptrace, perf).
        Devel => "devel",
        /// Running binaries for secondary architectures.
        Multiarch => "multiarch",
        /// `AF_BLUETOOTH` sockets.
        Bluetooth => "bluetooth",
        /// `AF_CAN` sockets.
        Canbus => "canbus",
        /// A private `/dev/shm` per application instead of per instance.
        PerAppDevShm => "per-app-dev-shm",
    }
}

/// A bitmask over one [`NamedFamily`] together with the bits this layer states.
///
/// `valid` marks which members this layer says anything about. Bits outside
/// `valid` are inherited from whatever the layer is merged onto.
pub struct Bitmask<F> {
    value: u32,
    valid: u32,
    family: PhantomData<F>,
}

impl<F> Clone for Bitmask<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for Bitmask<F> {}

impl<F> PartialEq for Bitmask<F> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.valid == other.valid
    }
}

impl<F> Eq for Bitmask<F> {}

impl<F> Default for Bitmask<F> {
    fn default() -> Self {
        Self {
            value: 0,
            valid: 0,
            family: PhantomData,
        }
    }
}

impl<F: NamedFamily> fmt::Debug for Bitmask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_names(false)).finish()
    }
}

impl<F: NamedFamily> Bitmask<F> {
    /// Explicitly grant `member`.
    pub fn allow(&mut self, member: F) {
        self.value |= member.bit();
        self.valid |= member.bit();
    }

    /// Explicitly revoke `member`.
    pub fn deny(&mut self, member: F) {
        self.value &= !member.bit();
        self.valid |= member.bit();
    }

    /// Whether `member` is granted.
    #[must_use]
    pub fn contains(&self, member: F) -> bool {
        self.value & member.bit() != 0
    }

    /// Whether this layer states anything about `member`.
    #[must_use]
    pub fn states(&self, member: F) -> bool {
        self.valid & member.bit() != 0
    }

    /// True if nothing is stated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.valid == 0
    }

    /// Raw `(value, valid)` pair.
    #[must_use]
    pub const fn bits(&self) -> (u32, u32) {
        (self.value, self.valid)
    }

    /// Forget everything this layer states.
    pub fn clear(&mut self) {
        self.value = 0;
        self.valid = 0;
    }

    /// Forget every stated bit except the members in `keep`.
    pub fn retain(&mut self, keep: &[F]) {
        let mask = keep.iter().fold(0, |acc, m| acc | m.bit());
        self.valid &= mask;
        self.value &= self.valid;
    }

    /// Override the bits `other` states and keep the rest.
    pub fn merge(&mut self, other: &Self) {
        self.value &= !other.valid;
        self.value |= other.value & other.valid;
        self.valid |= other.valid;
    }

    /// Granted bits that `old` did not grant, ignoring the `harmless` members.
    #[must_use]
    pub fn added_over(&self, old: &Self, harmless: &[F]) -> Vec<F> {
        let ignore = harmless.iter().fold(0, |acc, m| acc | m.bit());
        let added = (self.value & self.valid) & !(old.value & old.valid) & !ignore;
        F::all().filter(|m| added & m.bit() != 0).collect()
    }

    /// Stated members as names, `!`-prefixed when revoked.
    ///
    /// With `flatten`, revoked members are omitted.
    #[must_use]
    pub fn to_names(&self, flatten: bool) -> Vec<String> {
        F::all()
            .filter(|m| self.states(*m))
            .filter_map(|m| {
                if self.contains(m) {
                    Some(m.name().to_owned())
                } else if flatten {
                    None
                } else {
                    Some(format!("!{}", m.name()))
                }
            })
            .collect()
    }

    /// Apply a list of `name` / `!name` tokens.
    ///
    /// Unknown names are skipped so documents written by newer versions
    /// still load.
    pub fn apply_names<S: AsRef<str>>(&mut self, names: &[S]) {
        for raw in names {
            let raw = raw.as_ref();
            let (negated, name) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            match F::from_name(name) {
                Ok(member) if negated => self.deny(member),
                Ok(member) => self.allow(member),
                Err(_) => tracing::debug!(family = F::FAMILY, name, "skipping unknown name"),
            }
        }
    }
}
