//! The permission context: every permission family for one application.
//!
//! A [`Context`] is assembled by layering documents onto a fresh, empty
//! context in priority order (runtime, application, overrides, command
//! line). Each layer only overrides what it states: bitmask bits in its
//! `valid` set, socket/device records, filesystem locations, and so on.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::bus::{Bus, BusPolicy, BusPolicyTable};
use crate::conditional::{ConditionalTable, Device, RuntimeCondition, Socket, split_conditional};
use crate::error::ContextError;
use crate::filesystem::FilesystemTable;
use crate::metadata::MetadataDocument;
use crate::policy::{GenericPolicyTable, POLICY_GROUP_PREFIX};
use crate::registry::{Bitmask, Feature, NamedFamily, Share};
use crate::usb::UsbDevices;

/// Group holding the list-valued permission keys.
pub const CONTEXT_GROUP: &str = "Context";
/// Group holding environment variables.
pub const ENVIRONMENT_GROUP: &str = "Environment";
/// Group holding USB device queries.
pub const USB_GROUP: &str = "USB Devices";

const KEY_SHARED: &str = "shared";
const KEY_SOCKETS: &str = "sockets";
const KEY_DEVICES: &str = "devices";
const KEY_FEATURES: &str = "features";
const KEY_FILESYSTEMS: &str = "filesystems";
const KEY_PERSISTENT: &str = "persistent";
const KEY_UNSET_ENVIRONMENT: &str = "unset-environment";
const KEY_ENUMERABLE_DEVICES: &str = "enumerable-devices";
const KEY_HIDDEN_DEVICES: &str = "hidden-devices";

/// Features that survive [`Context::make_sandboxed`].
const SANDBOX_KEPT_FEATURES: &[Feature] = &[Feature::Multiarch];

/// Every permission family for one application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    shares: Bitmask<Share>,
    features: Bitmask<Feature>,
    sockets: ConditionalTable<Socket>,
    devices: ConditionalTable<Device>,
    filesystems: FilesystemTable,
    persistent: BTreeSet<String>,
    env: BTreeMap<String, Option<String>>,
    session_bus: BusPolicyTable,
    system_bus: BusPolicyTable,
    a11y_bus: BusPolicyTable,
    generic_policy: GenericPolicyTable,
    usb: UsbDevices,
}

fn split_negation(raw: &str) -> (bool, &str) {
    match raw.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, raw),
    }
}

impl Context {
    /// Build a context from a single metadata document.
    ///
    /// # Errors
    ///
    /// See [`Context::load_metadata`].
    pub fn from_metadata(doc: &MetadataDocument) -> Result<Self, ContextError> {
        let mut context = Self::default();
        context.load_metadata(doc)?;
        Ok(context)
    }

    /// Build a context by layering `layers` onto an empty one, lowest priority first.
    #[must_use]
    pub fn layered<'a>(layers: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut context = Self::default();
        for layer in layers {
            context.merge(layer);
        }
        context
    }

    // ── Read access ─────────────────────────────────────────────────

    /// Namespace shares.
    #[must_use]
    pub const fn shares(&self) -> &Bitmask<Share> {
        &self.shares
    }

    /// Optional features.
    #[must_use]
    pub const fn features(&self) -> &Bitmask<Feature> {
        &self.features
    }

    /// Socket permissions.
    #[must_use]
    pub const fn sockets(&self) -> &ConditionalTable<Socket> {
        &self.sockets
    }

    /// Device permissions.
    #[must_use]
    pub const fn devices(&self) -> &ConditionalTable<Device> {
        &self.devices
    }

    /// Filesystem permissions.
    #[must_use]
    pub const fn filesystems(&self) -> &FilesystemTable {
        &self.filesystems
    }

    /// Home-relative paths persisted in the per-application data directory.
    #[must_use]
    pub const fn persistent(&self) -> &BTreeSet<String> {
        &self.persistent
    }

    /// Environment variables; `None` means explicitly unset.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, Option<String>> {
        &self.env
    }

    /// Policy table for `bus`.
    #[must_use]
    pub const fn bus_policy(&self, bus: Bus) -> &BusPolicyTable {
        match bus {
            Bus::Session => &self.session_bus,
            Bus::System => &self.system_bus,
            Bus::A11y => &self.a11y_bus,
        }
    }

    const fn bus_policy_mut(&mut self, bus: Bus) -> &mut BusPolicyTable {
        match bus {
            Bus::Session => &mut self.session_bus,
            Bus::System => &mut self.system_bus,
            Bus::A11y => &mut self.a11y_bus,
        }
    }

    /// Generic `SUBSYSTEM.KEY` policy.
    #[must_use]
    pub const fn generic_policy(&self) -> &GenericPolicyTable {
        &self.generic_policy
    }

    /// USB device queries.
    #[must_use]
    pub const fn usb(&self) -> &UsbDevices {
        &self.usb
    }

    /// Sockets granted on a host, given an evaluator for runtime conditions.
    pub fn compute_sockets<E>(&self, evaluator: E) -> BTreeSet<Socket>
    where
        E: FnMut(RuntimeCondition) -> bool,
    {
        self.sockets.compute_granted(evaluator)
    }

    /// Devices granted on a host, given an evaluator for runtime conditions.
    pub fn compute_devices<E>(&self, evaluator: E) -> BTreeSet<Device>
    where
        E: FnMut(RuntimeCondition) -> bool,
    {
        self.devices.compute_granted(evaluator)
    }

    // ── Option entry points ─────────────────────────────────────────

    /// `--share=NAME`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown share.
    pub fn share(&mut self, name: &str) -> Result<(), ContextError> {
        self.shares.allow(Share::from_name(name)?);
        Ok(())
    }

    /// `--unshare=NAME`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown share.
    pub fn unshare(&mut self, name: &str) -> Result<(), ContextError> {
        self.shares.deny(Share::from_name(name)?);
        Ok(())
    }

    /// `--allow=FEATURE`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown feature.
    pub fn allow_feature(&mut self, name: &str) -> Result<(), ContextError> {
        self.features.allow(Feature::from_name(name)?);
        Ok(())
    }

    /// `--disallow=FEATURE`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown feature.
    pub fn disallow_feature(&mut self, name: &str) -> Result<(), ContextError> {
        self.features.deny(Feature::from_name(name)?);
        Ok(())
    }

    /// `--socket=NAME`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown socket.
    pub fn allow_socket(&mut self, name: &str) -> Result<(), ContextError> {
        self.sockets.set_allowed(Socket::from_name(name)?);
        Ok(())
    }

    /// `--nosocket=NAME`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown socket.
    pub fn deny_socket(&mut self, name: &str) -> Result<(), ContextError> {
        self.sockets.set_not_allowed(Socket::from_name(name)?);
        Ok(())
    }

    /// `--socket-if=NAME:CONDITION`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] without both halves and
    /// [`ContextError::UnknownName`] for an unknown socket. Unknown
    /// conditions are accepted.
    pub fn allow_socket_if(&mut self, spec: &str) -> Result<(), ContextError> {
        let (name, condition) = split_conditional(spec)
            .ok_or_else(|| ContextError::malformed("socket-if", spec, "expected NAME:CONDITION"))?;
        self.sockets
            .set_allowed_if(Socket::from_name(name)?, condition);
        Ok(())
    }

    /// `--device=NAME`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown device.
    pub fn allow_device(&mut self, name: &str) -> Result<(), ContextError> {
        self.devices.set_allowed(Device::from_name(name)?);
        Ok(())
    }

    /// `--nodevice=NAME`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownName`] for an unknown device.
    pub fn deny_device(&mut self, name: &str) -> Result<(), ContextError> {
        self.devices.set_not_allowed(Device::from_name(name)?);
        Ok(())
    }

    /// `--device-if=NAME:CONDITION`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] without both halves and
    /// [`ContextError::UnknownName`] for an unknown device.
    pub fn allow_device_if(&mut self, spec: &str) -> Result<(), ContextError> {
        let (name, condition) = split_conditional(spec)
            .ok_or_else(|| ContextError::malformed("device-if", spec, "expected NAME:CONDITION"))?;
        self.devices
            .set_allowed_if(Device::from_name(name)?, condition);
        Ok(())
    }

    /// `--filesystem=SPEC`
    ///
    /// # Errors
    ///
    /// See [`crate::filesystem::parse_filesystem`].
    pub fn add_filesystem(&mut self, spec: &str) -> Result<(), ContextError> {
        self.filesystems.add(spec)
    }

    /// `--nofilesystem=SPEC`
    ///
    /// # Errors
    ///
    /// See [`crate::filesystem::parse_filesystem`].
    pub fn remove_filesystem(&mut self, spec: &str) -> Result<(), ContextError> {
        self.filesystems.remove(spec)
    }

    /// `--env=VAR=VALUE`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for an empty name or one containing `=`.
    pub fn set_env(&mut self, name: &str, value: &str) -> Result<(), ContextError> {
        validate_env_name(name)?;
        self.env.insert(name.to_owned(), Some(value.to_owned()));
        Ok(())
    }

    /// `--unset-env=VAR`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for an empty name or one containing `=`.
    pub fn unset_env(&mut self, name: &str) -> Result<(), ContextError> {
        validate_env_name(name)?;
        self.env.insert(name.to_owned(), None);
        Ok(())
    }

    /// `--persist=PATH`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::PathTraversal`] for `..` segments and
    /// [`ContextError::MalformedSyntax`] for empty or absolute paths.
    pub fn add_persistent(&mut self, path: &str) -> Result<(), ContextError> {
        let path = normalize_persistent(path)?;
        self.persistent.insert(path);
        Ok(())
    }

    /// `--own-name`, `--talk-name`, `--see-name`, `--no-talk-name` and their
    /// system/a11y variants.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidBusName`] for an invalid name.
    pub fn set_bus_policy(&mut self, bus: Bus, name: &str, policy: BusPolicy) -> Result<(), ContextError> {
        self.bus_policy_mut(bus).set(name, policy)
    }

    /// `--add-policy=SUBSYSTEM.KEY=VALUE`
    ///
    /// # Errors
    ///
    /// See [`crate::policy::parse_policy_assignment`].
    pub fn add_generic_policy(&mut self, spec: &str) -> Result<(), ContextError> {
        self.generic_policy.add(spec)
    }

    /// `--remove-policy=SUBSYSTEM.KEY=VALUE`
    ///
    /// # Errors
    ///
    /// See [`crate::policy::parse_policy_assignment`].
    pub fn remove_generic_policy(&mut self, spec: &str) -> Result<(), ContextError> {
        self.generic_policy.remove(spec)
    }

    /// `--usb=QUERY`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] if the query does not parse.
    pub fn add_usb(&mut self, query: &str) -> Result<(), ContextError> {
        self.usb.add_enumerable(query)
    }

    /// `--nousb=QUERY`
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] if the query does not parse.
    pub fn hide_usb(&mut self, query: &str) -> Result<(), ContextError> {
        self.usb.add_hidden(query)
    }

    /// Apply the contents of a USB list file.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::MalformedSyntax`] for the first bad query.
    pub fn add_usb_list(&mut self, contents: &str) -> Result<(), ContextError> {
        self.usb.apply_list_file(contents)
    }

    // ── Whole-context operations ────────────────────────────────────

    /// Layer `other` on top of this context.
    ///
    /// `other`'s stated bits and entries override; if its filesystem table
    /// holds `host-reset`, every inherited filesystem entry is dropped first.
    pub fn merge(&mut self, other: &Self) {
        self.shares.merge(&other.shares);
        self.features.merge(&other.features);
        self.sockets.merge(&other.sockets);
        self.devices.merge(&other.devices);
        self.filesystems.merge(&other.filesystems);
        self.persistent
            .extend(other.persistent.iter().cloned());
        self.env
            .extend(other.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        for bus in Bus::ALL {
            self.bus_policy_mut(bus).merge(other.bus_policy(bus));
        }
        self.generic_policy.merge(&other.generic_policy);
        self.usb.merge(&other.usb);
    }

    /// Forget every permission, keeping environment variables.
    pub fn reset_permissions(&mut self) {
        let env = std::mem::take(&mut self.env);
        *self = Self {
            env,
            ..Self::default()
        };
    }

    /// Forget environment variables, keeping every permission.
    pub fn reset_non_permissions(&mut self) {
        self.env.clear();
    }

    /// Drop everything a sub-sandbox must not inherit.
    ///
    /// Only the multiarch feature and environment variables survive.
    pub fn make_sandboxed(&mut self) {
        self.shares.clear();
        self.features.retain(SANDBOX_KEPT_FEATURES);
        self.sockets.clear();
        self.devices.clear();
        self.filesystems.clear();
        self.persistent.clear();
        for bus in Bus::ALL {
            self.bus_policy_mut(bus).clear();
        }
        self.generic_policy.clear();
        self.usb.clear();
    }

    // ── Metadata ────────────────────────────────────────────────────

    /// Apply a metadata document on top of this context.
    ///
    /// Unknown share, feature, socket and device names and unparsable
    /// filesystems are skipped so newer documents still load.
    ///
    /// # Errors
    ///
    /// Returns an error for wrongly-typed values, malformed socket/device
    /// tokens, invalid bus names or policies, and malformed USB queries.
    /// On error the context is left as it was.
    pub fn load_metadata(&mut self, doc: &MetadataDocument) -> Result<(), ContextError> {
        let mut loaded = self.clone();
        loaded.apply_metadata(doc)?;
        *self = loaded;
        Ok(())
    }

    fn apply_metadata(&mut self, doc: &MetadataDocument) -> Result<(), ContextError> {
        if let Some(names) = doc.string_list(CONTEXT_GROUP, KEY_SHARED)? {
            self.shares.apply_names(&names);
        }
        if let Some(names) = doc.string_list(CONTEXT_GROUP, KEY_FEATURES)? {
            self.features.apply_names(&names);
        }
        if let Some(tokens) = doc.string_list(CONTEXT_GROUP, KEY_SOCKETS)? {
            self.sockets.apply_tokens(&tokens)?;
        }
        if let Some(tokens) = doc.string_list(CONTEXT_GROUP, KEY_DEVICES)? {
            self.devices.apply_tokens(&tokens)?;
        }
        if let Some(tokens) = doc.string_list(CONTEXT_GROUP, KEY_FILESYSTEMS)? {
            self.filesystems.apply_tokens(&tokens);
        }
        if let Some(paths) = doc.string_list(CONTEXT_GROUP, KEY_PERSISTENT)? {
            for path in paths {
                match normalize_persistent(&path) {
                    Ok(path) => {
                        self.persistent.insert(path);
                    }
                    Err(e) => debug!(path = %path, error = %e, "skipping persistent path"),
                }
            }
        }

        for (name, value) in doc.string_entries(ENVIRONMENT_GROUP)? {
            self.env.insert(name, Some(value));
        }
        // Listed in both places on save: old readers treat the empty
        // string as unset, newer ones obey this list.
        if let Some(names) = doc.string_list(CONTEXT_GROUP, KEY_UNSET_ENVIRONMENT)? {
            for name in names {
                self.env.insert(name, None);
            }
        }

        for bus in Bus::ALL {
            for (name, policy) in doc.string_entries(bus.group())? {
                self.bus_policy_mut(bus).set(&name, policy.parse()?)?;
            }
        }

        let subsystems: Vec<String> = doc
            .groups()
            .filter_map(|g| g.strip_prefix(POLICY_GROUP_PREFIX))
            .map(str::to_owned)
            .collect();
        for subsystem in subsystems {
            let group = format!("{POLICY_GROUP_PREFIX}{subsystem}");
            for (key, values) in doc.list_entries(&group)? {
                self.generic_policy
                    .apply_values(&format!("{subsystem}.{key}"), &values);
            }
        }

        if let Some(queries) = doc.string_list(USB_GROUP, KEY_ENUMERABLE_DEVICES)? {
            for query in queries {
                self.usb.add_enumerable(&query)?;
            }
        }
        if let Some(queries) = doc.string_list(USB_GROUP, KEY_HIDDEN_DEVICES)? {
            for query in queries {
                self.usb.add_hidden(&query)?;
            }
        }
        Ok(())
    }

    /// Write this context as a metadata document.
    ///
    /// With `flatten`, explicit denials are left out; use it when the
    /// consumer will not layer the result on top of anything.
    #[must_use]
    pub fn save_metadata(&self, flatten: bool) -> MetadataDocument {
        let mut doc = MetadataDocument::default();

        doc.set_string_list(CONTEXT_GROUP, KEY_SHARED, &self.shares.to_names(flatten));
        doc.set_string_list(CONTEXT_GROUP, KEY_SOCKETS, &self.sockets.to_tokens(flatten));
        doc.set_string_list(CONTEXT_GROUP, KEY_DEVICES, &self.devices.to_tokens(flatten));
        doc.set_string_list(CONTEXT_GROUP, KEY_FEATURES, &self.features.to_names(flatten));
        doc.set_string_list(
            CONTEXT_GROUP,
            KEY_FILESYSTEMS,
            &self.filesystems.to_tokens(flatten),
        );
        let persistent: Vec<&str> = self.persistent.iter().map(String::as_str).collect();
        doc.set_string_list(CONTEXT_GROUP, KEY_PERSISTENT, &persistent);

        let mut unset = Vec::new();
        for (name, value) in &self.env {
            doc.set_string(ENVIRONMENT_GROUP, name, value.as_deref().unwrap_or(""));
            if value.is_none() {
                unset.push(name.as_str());
            }
        }
        doc.set_string_list(CONTEXT_GROUP, KEY_UNSET_ENVIRONMENT, &unset);

        for bus in Bus::ALL {
            for (name, policy) in self.bus_policy(bus).iter() {
                doc.set_string(bus.group(), name, policy.as_str());
            }
        }

        for (key, values) in self.generic_policy.iter() {
            if let Some((subsystem, name)) = key.split_once('.') {
                doc.set_string_list(&format!("{POLICY_GROUP_PREFIX}{subsystem}"), name, values);
            }
        }

        let enumerable: Vec<&str> = self.usb.enumerable.keys().collect();
        let hidden: Vec<&str> = self.usb.hidden.keys().collect();
        doc.set_string_list(USB_GROUP, KEY_ENUMERABLE_DEVICES, &enumerable);
        doc.set_string_list(USB_GROUP, KEY_HIDDEN_DEVICES, &hidden);

        doc
    }

    /// Project this context as command-line flags, in a fixed order.
    #[must_use]
    pub fn to_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();

        flags.extend(self.shares.to_names(false).into_iter().map(|name| {
            match split_negation(&name) {
                (true, share) => format!("--unshare={share}"),
                (false, share) => format!("--share={share}"),
            }
        }));
        flags.extend(self.sockets.to_flags("socket"));
        flags.extend(self.devices.to_flags("device"));
        flags.extend(self.features.to_names(false).into_iter().map(|name| {
            match split_negation(&name) {
                (true, feature) => format!("--disallow={feature}"),
                (false, feature) => format!("--allow={feature}"),
            }
        }));
        flags.extend(self.filesystems.to_flags());
        flags.extend(self.env.iter().map(|(name, value)| match value {
            Some(value) => format!("--env={name}={value}"),
            None => format!("--unset-env={name}"),
        }));
        flags.extend(self.persistent.iter().map(|p| format!("--persist={p}")));
        for bus in Bus::ALL {
            flags.extend(self.bus_policy(bus).to_flags(bus));
        }
        flags.extend(self.generic_policy.to_flags());
        if !self.usb.is_empty() {
            flags.push(format!("--usb-list={}", self.usb.to_list()));
        }

        flags
    }
}

fn validate_env_name(name: &str) -> Result<(), ContextError> {
    if name.is_empty() || name.contains('=') {
        return Err(ContextError::malformed(
            "environment variable",
            name,
            "name must be non-empty and must not contain =",
        ));
    }
    Ok(())
}

fn normalize_persistent(path: &str) -> Result<String, ContextError> {
    if path.split('/').any(|segment| segment == "..") {
        return Err(ContextError::PathTraversal(path.to_owned()));
    }
    if path.starts_with('/') {
        return Err(ContextError::malformed(
            "persistent path",
            path,
            "must be relative to the home directory",
        ));
    }
    let joined = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return Err(ContextError::malformed("persistent path", path, "path is empty"));
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::{FilesystemMode, HOST_RESET};

    fn sample() -> Context {
        let mut ctx = Context::default();
        ctx.share("network").expect("share");
        ctx.unshare("ipc").expect("unshare");
        ctx.allow_socket("x11").expect("socket");
        ctx.deny_socket("pulseaudio").expect("nosocket");
        ctx.allow_socket_if("wayland:has-wayland").expect("socket-if");
        ctx.allow_device("dri").expect("device");
        ctx.allow_device_if("input:has-input-device").expect("device-if");
        ctx.allow_feature("devel").expect("allow");
        ctx.disallow_feature("bluetooth").expect("disallow");
        ctx.add_filesystem("xdg-music:ro").expect("filesystem");
        ctx.remove_filesystem("host:reset").expect("nofilesystem");
        ctx.set_env("LANG", "C.UTF-8").expect("env");
        ctx.unset_env("LD_PRELOAD").expect("unset-env");
        ctx.add_persistent(".mozilla").expect("persist");
        ctx.set_bus_policy(Bus::Session, "org.freedesktop.Notifications", BusPolicy::Talk)
            .expect("talk");
        ctx.set_bus_policy(Bus::System, "org.freedesktop.UPower", BusPolicy::See)
            .expect("see");
        ctx.add_generic_policy("gsettings.paths=/org/example/").expect("policy");
        ctx.remove_generic_policy("gsettings.paths=/org/other/").expect("policy");
        ctx.add_usb("vnd:28de").expect("usb");
        ctx.hide_usb("cls:03:*").expect("nousb");
        ctx
    }

    #[test]
    fn unknown_names_are_rejected_at_entry_points() {
        let mut ctx = Context::default();
        assert!(matches!(ctx.share("telepathy"), Err(ContextError::UnknownName { .. })));
        assert!(matches!(ctx.allow_socket("x12"), Err(ContextError::UnknownName { .. })));
        assert!(matches!(ctx.allow_device_if("gpu:true"), Err(ContextError::UnknownName { .. })));
        assert!(matches!(ctx.allow_socket_if("x11"), Err(ContextError::MalformedSyntax { .. })));
        assert!(matches!(ctx.set_env("", "x"), Err(ContextError::MalformedSyntax { .. })));
        assert!(matches!(ctx.add_persistent("../x"), Err(ContextError::PathTraversal(_))));
        assert!(matches!(ctx.add_persistent("/abs"), Err(ContextError::MalformedSyntax { .. })));
        assert_eq!(ctx, Context::default());
    }

    #[test]
    fn unknown_condition_is_accepted_but_unsatisfiable() {
        let mut ctx = Context::default();
        ctx.allow_socket_if("wayland:has-hologram").expect("accepted");
        assert!(ctx.compute_sockets(|_| true).is_empty());
    }

    #[test]
    fn metadata_round_trips_exactly() {
        let ctx = sample();
        let text = ctx.save_metadata(false).render().expect("render");
        let doc = MetadataDocument::parse("saved", &text).expect("reparse");
        let reloaded = Context::from_metadata(&doc).expect("load");
        assert_eq!(reloaded, ctx, "document was:\n{text}");
    }

    #[test]
    fn flattened_metadata_drops_denials() {
        let doc = sample().save_metadata(true);
        assert_eq!(
            doc.string_list(CONTEXT_GROUP, KEY_SHARED).expect("list"),
            Some(vec!["network".to_owned()])
        );
        assert_eq!(
            doc.string_list(CONTEXT_GROUP, KEY_SOCKETS).expect("list"),
            Some(vec![
                "x11".to_owned(),
                "wayland".to_owned(),
                "if:wayland:has-wayland".to_owned()
            ])
        );
        assert_eq!(
            doc.string_list(CONTEXT_GROUP, KEY_FILESYSTEMS).expect("list"),
            Some(vec!["xdg-music:ro".to_owned()])
        );
    }

    #[test]
    fn unset_environment_wins_over_empty_value() {
        let doc = MetadataDocument::parse(
            "env",
            r#"
[Context]
unset-environment = ["GONE"]

[Environment]
GONE = ""
EMPTY = ""
"#,
        )
        .expect("valid");
        let ctx = Context::from_metadata(&doc).expect("load");
        assert_eq!(ctx.env().get("GONE"), Some(&None));
        assert_eq!(ctx.env().get("EMPTY"), Some(&Some(String::new())));
    }

    #[test]
    fn unknown_vocabulary_in_documents_is_skipped() {
        let doc = MetadataDocument::parse(
            "future",
            r#"
[Context]
shared = ["network", "quantum"]
sockets = ["holo-display", "x11"]
devices = ["neural-link"]
features = ["time-travel"]
filesystems = ["/", "xdg-music"]
"#,
        )
        .expect("valid");
        let ctx = Context::from_metadata(&doc).expect("load");
        assert!(ctx.shares().contains(Share::Network));
        assert!(ctx.sockets().allows_unconditionally(Socket::X11));
        assert!(ctx.devices().is_empty());
        assert!(ctx.features().is_empty());
        assert_eq!(ctx.filesystems().iter().count(), 1);
    }

    #[test]
    fn invalid_bus_names_in_documents_are_fatal() {
        let doc = MetadataDocument::parse("bus", "[\"Session Bus Policy\"]\n\"not a name\" = \"talk\"\n")
            .expect("valid");
        let err = Context::from_metadata(&doc).expect_err("invalid bus name");
        assert!(matches!(err, ContextError::InvalidBusName { .. }), "{err}");

        let doc = MetadataDocument::parse("bus", "[\"Session Bus Policy\"]\n\"org.a.B\" = \"shout\"\n")
            .expect("valid");
        assert!(matches!(
            Context::from_metadata(&doc),
            Err(ContextError::UnknownName { family: "bus policy", .. })
        ));
    }

    #[test]
    fn failed_load_leaves_context_untouched() {
        let doc = MetadataDocument::parse(
            "partial",
            "[Context]\nshared = [\"!network\"]\nfilesystems = [\"home\"]\n\n\
             [\"System Bus Policy\"]\n\":1.42\" = \"own\"\n",
        )
        .expect("valid");

        let mut ctx = sample();
        ctx.load_metadata(&doc).expect_err("unique bus name");
        assert_eq!(ctx, sample());
    }

    #[test]
    fn flags_are_deterministic() {
        assert_eq!(sample().to_flags(), vec![
            "--share=network",
            "--unshare=ipc",
            "--socket=x11",
            "--socket-if=wayland:has-wayland",
            "--nosocket=pulseaudio",
            "--device=dri",
            "--device-if=input:has-input-device",
            "--allow=devel",
            "--disallow=bluetooth",
            "--nofilesystem=host:reset",
            "--filesystem=xdg-music:ro",
            "--env=LANG=C.UTF-8",
            "--unset-env=LD_PRELOAD",
            "--persist=.mozilla",
            "--talk-name=org.freedesktop.Notifications",
            "--system-see-name=org.freedesktop.UPower",
            "--add-policy=gsettings.paths=/org/example/",
            "--remove-policy=gsettings.paths=/org/other/",
            "--usb-list=vnd:28de;!cls:03:*",
        ]);
    }

    #[test]
    fn merge_overrides_and_accumulates() {
        let mut base = Context::default();
        base.share("network").expect("share");
        base.set_env("A", "1").expect("env");
        base.add_filesystem("home").expect("fs");
        base.add_usb("vnd:0001").expect("usb");

        let mut over = Context::default();
        over.unshare("network").expect("unshare");
        over.unset_env("A").expect("unset");
        over.add_filesystem("home:ro").expect("fs");
        over.add_usb("vnd:0002").expect("usb");

        base.merge(&over);
        assert!(!base.shares().contains(Share::Network));
        assert_eq!(base.env().get("A"), Some(&None));
        assert_eq!(base.filesystems().get("home"), Some(FilesystemMode::ReadOnly));
        assert_eq!(base.usb().enumerable.keys().count(), 2);
    }

    #[test]
    fn host_reset_layer_drops_every_inherited_filesystem() {
        let mut base = Context::default();
        base.add_filesystem("host").expect("fs");
        base.add_filesystem("/opt:ro").expect("fs");

        let mut over = Context::default();
        over.remove_filesystem("host:reset").expect("fs");

        let merged = Context::layered([&base, &over]);
        let entries: Vec<_> = merged.filesystems().iter().collect();
        assert_eq!(entries, vec![(HOST_RESET, FilesystemMode::None)]);
    }

    #[test]
    fn make_sandboxed_keeps_only_multiarch_and_env() {
        let mut ctx = sample();
        ctx.allow_feature("multiarch").expect("allow");
        ctx.make_sandboxed();

        assert!(ctx.shares().is_empty());
        assert!(ctx.sockets().is_empty());
        assert!(ctx.filesystems().is_empty());
        assert!(ctx.features().contains(Feature::Multiarch));
        assert!(!ctx.features().states(Feature::Devel));
        assert_eq!(ctx.env().len(), 2);
        assert_eq!(ctx.to_flags(), vec![
            "--allow=multiarch",
            "--env=LANG=C.UTF-8",
            "--unset-env=LD_PRELOAD"
        ]);
    }

    #[test]
    fn reset_permissions_and_non_permissions() {
        let mut ctx = sample();
        ctx.reset_permissions();
        assert_eq!(ctx.env().len(), 2);
        ctx.reset_non_permissions();
        assert_eq!(ctx, Context::default());
    }

    mod proptests {
        use super::*;
        use crate::testing::{arb_context, arb_op, build};
        use proptest::prelude::*;

        proptest! {
            /// Unflattened metadata reloads to an identical context.
            #[test]
            fn metadata_round_trip(ctx in arb_context()) {
                let text = ctx.save_metadata(false).render().unwrap();
                let doc = MetadataDocument::parse("generated", &text).unwrap();
                prop_assert_eq!(Context::from_metadata(&doc).unwrap(), ctx);
            }

            /// Flattened metadata reloads to a context granting the same sockets and devices.
            #[test]
            fn flattened_round_trip_grants_the_same(
                ctx in arb_context(),
                wayland in any::<bool>(),
                input in any::<bool>(),
            ) {
                let doc = ctx.save_metadata(true);
                let reloaded = Context::from_metadata(&doc).unwrap();
                let eval = |c: RuntimeCondition| match c {
                    RuntimeCondition::HasWayland => wayland,
                    RuntimeCondition::HasInputDevice => input,
                };
                prop_assert_eq!(ctx.compute_sockets(eval), reloaded.compute_sockets(eval));
                prop_assert_eq!(ctx.compute_devices(eval), reloaded.compute_devices(eval));
            }

            /// Layering a, b, c equals layering a onto the pre-merged b and c.
            #[test]
            fn merge_is_associative_in_order(
                a in arb_context(),
                b in arb_context(),
                c in arb_context(),
            ) {
                let sequential = Context::layered([&a, &b, &c]);
                let bc = Context::layered([&b, &c]);
                let grouped = Context::layered([&a, &bc]);
                prop_assert_eq!(sequential, grouped);
            }

            /// A host-reset layer leaves only its own filesystem entries.
            #[test]
            fn host_reset_discards_everything_below(x in arb_context(), ops in prop::collection::vec(arb_op(), 0..8)) {
                let mut over = build(&ops);
                over.remove_filesystem("host:reset").unwrap();
                let merged = Context::layered([&x, &over]);
                prop_assert_eq!(merged.filesystems(), over.filesystems());
            }
        }
    }
}
