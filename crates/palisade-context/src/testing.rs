//! Proptest strategies shared by the context and escalation tests.

use proptest::prelude::*;

use crate::bus::{Bus, BusPolicy};
use crate::conditional::{Device, Socket};
use crate::context::Context;
use crate::registry::{Feature, NamedFamily, Share};

/// One option-level operation on a context.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Share(&'static str, bool),
    /// 0 allows, 1 denies, 2.. adds a condition.
    Socket(Socket, u8),
    Device(Device, u8),
    Feature(&'static str, bool),
    Filesystem(&'static str, bool),
    Env(&'static str, Option<&'static str>),
    Persist(&'static str),
    Bus(Bus, &'static str, BusPolicy),
    Policy(&'static str, bool),
    Usb(&'static str, bool),
}

impl Op {
    /// Whether the operation can only take permissions away.
    pub(crate) fn narrows(&self) -> bool {
        match self {
            Self::Share(_, allow) | Self::Feature(_, allow) | Self::Policy(_, allow) | Self::Usb(_, allow) => {
                !allow
            }
            Self::Socket(_, kind) | Self::Device(_, kind) => *kind == 1,
            Self::Filesystem(_, allow) => !allow,
            Self::Bus(_, _, policy) => *policy == BusPolicy::None,
            Self::Env(..) | Self::Persist(_) => false,
        }
    }
}

const CONDITIONS: &[&str] = &["true", "false", "has-wayland", "has-input-device", "newer"];
const FILESYSTEMS: &[&str] = &[
    "host",
    "host:reset",
    "home",
    "~/Music:ro",
    "/opt:create",
    "xdg-data/icons",
];
const BUS_NAMES: &[&str] = &["org.example.A", "org.example.B", "org.example.*"];
const POLICIES: &[&str] = &["x.k=a", "x.k=b", "y.k=c"];
const USB: &[&str] = &["all", "vnd:28de", "cls:03:*"];

fn condition(kind: u8) -> &'static str {
    CONDITIONS[usize::from(kind.saturating_sub(2)) % CONDITIONS.len()]
}

pub(crate) fn arb_op() -> impl Strategy<Value = Op> {
    let policy = prop::sample::select(vec![
        BusPolicy::None,
        BusPolicy::See,
        BusPolicy::Talk,
        BusPolicy::Own,
    ]);
    prop_oneof![
        (prop::sample::select(Share::valid_names()), any::<bool>()).prop_map(|(n, a)| Op::Share(n, a)),
        (prop::sample::select(Socket::all().collect::<Vec<_>>()), 0..7u8)
            .prop_map(|(s, k)| Op::Socket(s, k)),
        (prop::sample::select(Device::all().collect::<Vec<_>>()), 0..7u8)
            .prop_map(|(d, k)| Op::Device(d, k)),
        (prop::sample::select(Feature::valid_names()), any::<bool>())
            .prop_map(|(n, a)| Op::Feature(n, a)),
        (prop::sample::select(FILESYSTEMS), any::<bool>()).prop_map(|(f, a)| Op::Filesystem(f, a)),
        (
            prop::sample::select(vec!["A", "B"]),
            prop::option::of(prop::sample::select(vec!["", "1"])),
        )
            .prop_map(|(n, v)| Op::Env(n, v)),
        prop::sample::select(vec![".config/app", ".local"]).prop_map(Op::Persist),
        (
            prop::sample::select(Bus::ALL.to_vec()),
            prop::sample::select(BUS_NAMES),
            policy,
        )
            .prop_map(|(b, n, p)| Op::Bus(b, n, p)),
        (prop::sample::select(POLICIES), any::<bool>()).prop_map(|(p, a)| Op::Policy(p, a)),
        (prop::sample::select(USB), any::<bool>()).prop_map(|(u, a)| Op::Usb(u, a)),
    ]
}

/// Apply `ops` to an empty context.
pub(crate) fn build(ops: &[Op]) -> Context {
    let mut ctx = Context::default();
    for op in ops {
        let result = match op {
            Op::Share(n, true) => ctx.share(n),
            Op::Share(n, false) => ctx.unshare(n),
            Op::Socket(s, 0) => ctx.allow_socket(s.name()),
            Op::Socket(s, 1) => ctx.deny_socket(s.name()),
            Op::Socket(s, k) => ctx.allow_socket_if(&format!("{}:{}", s.name(), condition(*k))),
            Op::Device(d, 0) => ctx.allow_device(d.name()),
            Op::Device(d, 1) => ctx.deny_device(d.name()),
            Op::Device(d, k) => ctx.allow_device_if(&format!("{}:{}", d.name(), condition(*k))),
            Op::Feature(n, true) => ctx.allow_feature(n),
            Op::Feature(n, false) => ctx.disallow_feature(n),
            Op::Filesystem(f, true) if *f != "host:reset" => ctx.add_filesystem(f),
            Op::Filesystem(f, _) => ctx.remove_filesystem(f),
            Op::Env(n, Some(v)) => ctx.set_env(n, v),
            Op::Env(n, None) => ctx.unset_env(n),
            Op::Persist(p) => ctx.add_persistent(p),
            Op::Bus(b, n, p) => ctx.set_bus_policy(*b, n, *p),
            Op::Policy(p, true) => ctx.add_generic_policy(p),
            Op::Policy(p, false) => ctx.remove_generic_policy(p),
            Op::Usb(u, true) => ctx.add_usb(u),
            Op::Usb(u, false) => ctx.hide_usb(u),
        };
        result.expect("generated operations are valid");
    }
    ctx
}

pub(crate) fn arb_context() -> impl Strategy<Value = Context> {
    prop::collection::vec(arb_op(), 0..16).prop_map(|ops| build(&ops))
}

/// Contexts built only from operations that take permissions away.
pub(crate) fn arb_narrowing() -> impl Strategy<Value = Context> {
    prop::collection::vec(arb_op().prop_filter("narrowing ops only", Op::narrows), 0..12)
        .prop_map(|ops| build(&ops))
}
