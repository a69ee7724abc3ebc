//! CLI subcommands.

#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod check_update;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod plan;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod show;
#[expect(
    unreachable_pub,
    reason = "binary crate: pub inside private module is fine"
)]
pub mod usb;
