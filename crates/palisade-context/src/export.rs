//! Export planning: turning a resolved context into mount operations.
//!
//! The plan is handed to the sandbox launcher, so order matters: later
//! operations shadow earlier ones. Host-wide access comes first, then the
//! host OS views and home, then every explicit location, and finally the
//! per-application data directory. Explicit locations are ordered by the
//! path they occupy inside the sandbox, parents before children, so a
//! hidden directory never covers a grant beneath it.
//!
//! Planning only reads the host (directory listings and existence
//! checks). Locations that cannot be exposed are logged and skipped.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::context::Context;
use crate::filesystem::{FilesystemMode, Location, XdgDir};

/// Top-level host entries never exposed by host-wide access.
const HOST_EXCLUDED: &[&str] = &[
    ".", "..", "lib", "lib32", "lib64", "bin", "sbin", "usr", "boot", "root", "tmp", "etc", "app",
    "run", "proc", "sys", "dev", "var",
];

/// Host OS directories exposed by `host-os`.
const HOST_OS_DIRS: &[&str] = &["usr", "bin", "sbin", "lib", "lib32", "lib64"];

/// Where host views appear inside the sandbox.
const RUN_HOST: &str = "/run/host";

/// Absolute locations owned by the sandbox itself.
const RESERVED_PREFIXES: &[&str] = &[
    "app", "usr", "etc", "proc", "sys", "dev", "bin", "sbin", "lib", "lib32", "lib64",
];

/// One operation for the sandbox launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ExportOp {
    /// Bind `source` at `dest` with the given access.
    Expose {
        /// Host path.
        source: PathBuf,
        /// Path inside the sandbox.
        dest: PathBuf,
        /// Access mode, never [`FilesystemMode::None`].
        mode: FilesystemMode,
    },
    /// Replace `path` with an empty directory.
    HideEmpty {
        /// Path inside the sandbox.
        path: PathBuf,
    },
    /// Mount an empty tmpfs over `path`.
    Tmpfs {
        /// Path inside the sandbox.
        path: PathBuf,
    },
    /// Bind a per-application directory over a home path.
    Persist {
        /// Directory under the application data directory.
        source: PathBuf,
        /// Home path it replaces.
        dest: PathBuf,
    },
}

impl ExportOp {
    /// The path this operation occupies inside the sandbox.
    #[must_use]
    pub fn target(&self) -> &Path {
        match self {
            Self::Expose { dest, .. } | Self::Persist { dest, .. } => dest,
            Self::HideEmpty { path } | Self::Tmpfs { path } => path,
        }
    }
}

impl fmt::Display for ExportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expose { source, dest, mode } if source == dest => {
                write!(f, "expose {mode} {}", source.display())
            }
            Self::Expose { source, dest, mode } => {
                write!(f, "expose {mode} {} -> {}", source.display(), dest.display())
            }
            Self::HideEmpty { path } => write!(f, "hide {}", path.display()),
            Self::Tmpfs { path } => write!(f, "tmpfs {}", path.display()),
            Self::Persist { source, dest } => {
                write!(f, "persist {} -> {}", source.display(), dest.display())
            }
        }
    }
}

/// The application a plan is computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    /// Application id, e.g. `org.example.App`.
    pub id: String,
    /// Per-application data directory on the host.
    pub data_dir: PathBuf,
}

impl AppIdentity {
    /// Identity whose data directory is `~/.var/app/<id>`.
    #[must_use]
    pub fn under_home(id: &str, home: &Path) -> Self {
        Self {
            id: id.to_owned(),
            data_dir: home.join(".var").join("app").join(id),
        }
    }
}

/// Paths of the host the plan is computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    /// The host's real root.
    pub root: PathBuf,
    /// The user's home directory.
    pub home: PathBuf,
    /// Resolved XDG directories. Missing entries are unset.
    pub xdg: BTreeMap<XdgDir, PathBuf>,
}

impl HostLayout {
    /// A layout with no XDG directories.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            home: home.into(),
            xdg: BTreeMap::new(),
        }
    }

    /// Set one XDG directory.
    #[must_use]
    pub fn with_xdg(mut self, dir: XdgDir, path: impl Into<PathBuf>) -> Self {
        self.xdg.insert(dir, path.into());
        self
    }

    /// The current user's layout, from the environment and `user-dirs.dirs`.
    ///
    /// Returns `None` if no home directory can be determined.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base = directories::BaseDirs::new()?;
        let mut layout = Self::new("/", base.home_dir());

        let mut set = |dir, path: Option<&Path>| {
            if let Some(path) = path {
                layout.xdg.insert(dir, path.to_path_buf());
            }
        };
        set(XdgDir::Config, Some(base.config_dir()));
        set(XdgDir::Cache, Some(base.cache_dir()));
        set(XdgDir::Data, Some(base.data_dir()));
        set(XdgDir::Run, base.runtime_dir());
        if let Some(user) = directories::UserDirs::new() {
            set(XdgDir::Desktop, user.desktop_dir());
            set(XdgDir::Documents, user.document_dir());
            set(XdgDir::Download, user.download_dir());
            set(XdgDir::Music, user.audio_dir());
            set(XdgDir::Pictures, user.picture_dir());
            set(XdgDir::PublicShare, user.public_dir());
            set(XdgDir::Templates, user.template_dir());
            set(XdgDir::Videos, user.video_dir());
        }
        Some(layout)
    }

    fn host_path(&self, absolute: &str) -> PathBuf {
        self.root.join(absolute.trim_start_matches('/'))
    }
}

struct Planner<'a> {
    host: &'a HostLayout,
    ops: Vec<ExportOp>,
}

impl Planner<'_> {
    fn expose(&mut self, source: PathBuf, dest: PathBuf, mode: FilesystemMode) -> bool {
        if mode == FilesystemMode::None {
            return false;
        }
        if mode != FilesystemMode::Create && !source.exists() {
            debug!(path = %source.display(), "not exposing missing path");
            return false;
        }
        self.ops.push(ExportOp::Expose { source, dest, mode });
        true
    }

    fn expose_same(&mut self, path: PathBuf, mode: FilesystemMode) -> bool {
        self.expose(path.clone(), path, mode)
    }

    fn hide(&mut self, source: &Path, dest: PathBuf) {
        if source.exists() {
            self.ops.push(ExportOp::HideEmpty { path: dest });
        }
    }

    fn expose_host(&mut self, mode: FilesystemMode) {
        if mode == FilesystemMode::None {
            return;
        }
        let entries = match std::fs::read_dir(&self.host.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.host.root.display(), error = %e, "cannot list host root");
                return;
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !HOST_EXCLUDED.contains(&name.as_str()))
            .collect();
        names.sort();
        for name in names {
            let source = self.host.root.join(&name);
            self.expose(source, Path::new("/").join(&name), mode);
        }
    }

    fn expose_host_views(&mut self, host_mode: FilesystemMode, ctx: &Context) {
        let fs = ctx.filesystems();
        let run_host = Path::new(RUN_HOST);

        let os_mode = fs.mode_of("host-os").max(host_mode);
        for dir in HOST_OS_DIRS {
            self.expose(self.host.root.join(dir), run_host.join(dir), os_mode);
        }
        let etc_mode = fs.mode_of("host-etc").max(host_mode);
        self.expose(self.host.root.join("etc"), run_host.join("etc"), etc_mode);
        let root_mode = fs.mode_of("host-root").max(host_mode);
        self.expose(self.host.root.clone(), run_host.join("root"), root_mode);
    }

    fn expose_home(&mut self, host_mode: FilesystemMode, ctx: &Context) {
        let mode = ctx.filesystems().mode_of("home").max(host_mode);
        if mode == FilesystemMode::None {
            return;
        }
        if !self.expose_same(self.host.home.clone(), mode) {
            warn!(home = %self.host.home.display(), "cannot expose home directory");
        }
    }

    fn resolve(&self, location: Location<'_>) -> Option<(PathBuf, PathBuf)> {
        match location {
            Location::Special(_) => None,
            Location::Xdg { dir, subpath } => {
                let Some(base) = self.host.xdg.get(&dir) else {
                    debug!(dir = %dir, "xdg directory is not set");
                    return None;
                };
                if *base == self.host.home {
                    debug!(dir = %dir, "xdg directory is the home directory, treating as disabled");
                    return None;
                }
                let path = subpath.map_or_else(|| base.clone(), |sub| base.join(sub));
                Some((path.clone(), path))
            }
            Location::HomeRelative(rest) => {
                let path = self.host.home.join(rest);
                Some((path.clone(), path))
            }
            Location::Absolute(path) => {
                let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
                if RESERVED_PREFIXES.contains(&first) {
                    debug!(path = %path, "path is reserved inside the sandbox");
                    return None;
                }
                Some((self.host.host_path(path), PathBuf::from(path)))
            }
        }
    }

    fn expose_entries(&mut self, ctx: &Context) {
        let start = self.ops.len();
        for (location, mode) in ctx.filesystems().iter() {
            let Some(kind) = Location::classify(location) else {
                debug!(location, "skipping non-canonical location");
                continue;
            };
            let Some((source, dest)) = self.resolve(kind) else {
                continue;
            };
            if mode == FilesystemMode::None {
                self.hide(&source, dest);
            } else if !self.expose(source, dest, mode) {
                debug!(location, %mode, "filesystem entry not exposed");
            }
        }
        self.ops[start..].sort_by(|a, b| a.target().cmp(b.target()));
    }

    fn expose_app_data(&mut self, ctx: &Context, app: &AppIdentity) {
        if let Some(parent) = app.data_dir.parent() {
            self.ops.push(ExportOp::Tmpfs {
                path: parent.to_path_buf(),
            });
        }
        self.ops.push(ExportOp::Expose {
            source: app.data_dir.clone(),
            dest: app.data_dir.clone(),
            mode: FilesystemMode::ReadWrite,
        });
        for path in ctx.persistent() {
            self.ops.push(ExportOp::Persist {
                source: app.data_dir.join(path),
                dest: self.host.home.join(path),
            });
        }
    }
}

/// Compute the ordered export plan for `ctx` on `host`.
#[must_use]
pub fn plan_exports(ctx: &Context, host: &HostLayout, app: Option<&AppIdentity>) -> Vec<ExportOp> {
    let mut planner = Planner {
        host,
        ops: Vec::new(),
    };
    let host_mode = ctx.filesystems().mode_of("host");

    planner.expose_host(host_mode);
    planner.expose_host_views(host_mode, ctx);
    planner.expose_home(host_mode, ctx);
    planner.expose_entries(ctx);
    if let Some(app) = app {
        planner.expose_app_data(ctx, app);
    }

    debug!(ops = planner.ops.len(), "planned exports");
    planner.ops
}
