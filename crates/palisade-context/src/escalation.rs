//! Permission escalation between two contexts.
//!
//! An update must not silently grant an application more than it had.
//! [`diff_permissions`] lists, per family, everything the new context
//! grants that the old one did not; removals are never reported.

use std::fmt::Write;

use serde::Serialize;

use crate::bus::{Bus, BusPolicy};
use crate::conditional::{AddedGrant, Socket};
use crate::context::Context;
use crate::filesystem::FilesystemMode;
use crate::registry::{Feature, NamedFamily};

/// Features whose addition never needs the user's consent.
const HARMLESS_FEATURES: &[Feature] = &[Feature::Multiarch, Feature::PerAppDevShm];

/// Everything a new context grants over an old one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionDiff {
    /// Newly granted shares.
    pub shares: Vec<String>,
    /// Newly granted features.
    pub features: Vec<String>,
    /// Newly granted sockets.
    pub sockets: Vec<GrantChange>,
    /// Newly granted devices.
    pub devices: Vec<GrantChange>,
    /// Filesystem locations with broader access.
    pub filesystems: Vec<FilesystemChange>,
    /// Bus names with a higher policy.
    pub bus_names: Vec<BusNameChange>,
    /// Generic policy values not previously present.
    pub policies: Vec<PolicyChange>,
    /// USB queries newly enumerable.
    pub usb_enumerable: Vec<String>,
    /// USB queries no longer hidden.
    pub usb_unhidden: Vec<String>,
}

/// A socket or device granted by the new context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantChange {
    /// Socket or device name.
    pub name: String,
    /// How it is granted.
    #[serde(flatten)]
    pub grant: AddedGrant,
}

/// A filesystem location with broader access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemChange {
    /// Canonical location.
    pub location: String,
    /// New access mode.
    pub mode: FilesystemMode,
}

/// A bus name with a higher policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusNameChange {
    /// Which bus.
    pub bus: Bus,
    /// Well-known name or `name.*` prefix.
    pub name: String,
    /// New policy.
    pub policy: BusPolicy,
}

/// A new generic policy value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyChange {
    /// `SUBSYSTEM.KEY`.
    pub key: String,
    /// The value as written.
    pub value: String,
}

impl PermissionDiff {
    /// True if the new context grants nothing new.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
            && self.features.is_empty()
            && self.sockets.is_empty()
            && self.devices.is_empty()
            && self.filesystems.is_empty()
            && self.bus_names.is_empty()
            && self.policies.is_empty()
            && self.usb_enumerable.is_empty()
            && self.usb_unhidden.is_empty()
    }
}

fn names<F: NamedFamily>(members: Vec<F>) -> Vec<String> {
    members.into_iter().map(|m| m.name().to_owned()).collect()
}

fn grants<F: NamedFamily>(added: Vec<(F, AddedGrant)>) -> Vec<GrantChange> {
    added
        .into_iter()
        .map(|(key, grant)| GrantChange {
            name: key.name().to_owned(),
            grant,
        })
        .collect()
}

/// Everything `new` grants that `old` does not.
#[must_use]
pub fn diff_permissions(old: &Context, new: &Context) -> PermissionDiff {
    // fallback-x11 is strictly less than x11.
    let mut old_sockets = old.sockets().clone();
    if old_sockets.allows_unconditionally(Socket::X11) {
        old_sockets.set_allowed(Socket::FallbackX11);
    }

    let bus_names = Bus::ALL
        .into_iter()
        .flat_map(|bus| {
            new.bus_policy(bus)
                .added_over(old.bus_policy(bus))
                .into_iter()
                .map(move |(name, policy)| BusNameChange { bus, name, policy })
        })
        .collect();

    let (usb_enumerable, usb_unhidden) = new.usb().added_over(old.usb());

    PermissionDiff {
        shares: names(new.shares().added_over(old.shares(), &[])),
        features: names(new.features().added_over(old.features(), HARMLESS_FEATURES)),
        sockets: grants(new.sockets().added_over(&old_sockets)),
        devices: grants(new.devices().added_over(old.devices())),
        filesystems: new
            .filesystems()
            .added_over(old.filesystems())
            .into_iter()
            .map(|(location, mode)| FilesystemChange { location, mode })
            .collect(),
        bus_names,
        policies: new
            .generic_policy()
            .added_over(old.generic_policy())
            .into_iter()
            .map(|(key, value)| PolicyChange { key, value })
            .collect(),
        usb_enumerable,
        usb_unhidden,
    }
}

/// Whether `new` grants anything `old` does not.
#[must_use]
pub fn adds_permissions(old: &Context, new: &Context) -> bool {
    !diff_permissions(old, new).is_empty()
}

fn describe(grant: &AddedGrant) -> String {
    match grant {
        AddedGrant::Unconditional => String::new(),
        AddedGrant::Conditions(conditions) => format!(" (if {})", conditions.join(" or ")),
    }
}

/// Format a diff as human-readable text.
#[must_use]
pub fn format_report(diff: &PermissionDiff) -> String {
    if diff.is_empty() {
        return "No new permissions.\n".to_owned();
    }

    let mut out = String::new();

    if !diff.shares.is_empty() {
        let _ = writeln!(out, "Shares:");
        for s in &diff.shares {
            let _ = writeln!(out, "  + {s}");
        }
        let _ = writeln!(out);
    }

    if !diff.features.is_empty() {
        let _ = writeln!(out, "Features:");
        for f in &diff.features {
            let _ = writeln!(out, "  + {f}");
        }
        let _ = writeln!(out);
    }

    for (label, changes) in [("Sockets:", &diff.sockets), ("Devices:", &diff.devices)] {
        if changes.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{label}");
        for c in changes {
            let _ = writeln!(out, "  + {}{}", c.name, describe(&c.grant));
        }
        let _ = writeln!(out);
    }

    if !diff.filesystems.is_empty() {
        let _ = writeln!(out, "Filesystems:");
        for c in &diff.filesystems {
            let _ = writeln!(out, "  + {} ({})", c.location, c.mode);
        }
        let _ = writeln!(out);
    }

    if !diff.bus_names.is_empty() {
        let _ = writeln!(out, "Bus names:");
        for c in &diff.bus_names {
            let _ = writeln!(out, "  + {} {:?} bus: {}", c.policy, c.bus, c.name);
        }
        let _ = writeln!(out);
    }

    if !diff.policies.is_empty() {
        let _ = writeln!(out, "Policies:");
        for c in &diff.policies {
            let _ = writeln!(out, "  + {}={}", c.key, c.value);
        }
        let _ = writeln!(out);
    }

    if !diff.usb_enumerable.is_empty() || !diff.usb_unhidden.is_empty() {
        let _ = writeln!(out, "USB devices:");
        for q in &diff.usb_enumerable {
            let _ = writeln!(out, "  + {q}");
        }
        for q in &diff.usb_unhidden {
            let _ = writeln!(out, "  + {q} (no longer hidden)");
        }
        let _ = writeln!(out);
    }

    out
}
