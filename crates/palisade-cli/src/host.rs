//! Evaluation of runtime conditions against the current host.

use std::path::{Path, PathBuf};

use palisade_context::RuntimeCondition;
use tracing::debug;

/// Decide a runtime condition on this host.
pub(crate) fn evaluate(condition: RuntimeCondition) -> bool {
    let holds = match condition {
        RuntimeCondition::HasWayland => has_wayland(),
        RuntimeCondition::HasInputDevice => has_input_device(),
    };
    debug!(%condition, holds, "evaluated runtime condition");
    holds
}

fn has_wayland() -> bool {
    let display = std::env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-0".into());
    let display = PathBuf::from(display);
    if display.is_absolute() {
        return display.exists();
    }
    std::env::var_os("XDG_RUNTIME_DIR")
        .is_some_and(|runtime| Path::new(&runtime).join(display).exists())
}

fn has_input_device() -> bool {
    std::fs::read_dir("/dev/input").is_ok_and(|entries| {
        entries
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().starts_with("event"))
    })
}
