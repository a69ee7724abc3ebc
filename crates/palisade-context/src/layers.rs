//! Resolution of the metadata stack that makes up one application's context.
//!
//! Layers, lowest priority first:
//! 1. runtime metadata
//! 2. application metadata
//! 3. system overrides (`/var/lib/palisade/overrides/{global,<app>}`)
//! 4. user overrides (`$XDG_DATA_HOME/palisade/overrides/{global,<app>}`)
//! 5. an extra file, usually from the command line

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::context::Context;
use crate::error::ContextError;
use crate::metadata::MetadataDocument;

/// System-wide override directory.
pub const SYSTEM_OVERRIDES_DIR: &str = "/var/lib/palisade/overrides";

/// Override file applying to every application.
pub const GLOBAL_OVERRIDE: &str = "global";

/// The user override directory, `$XDG_DATA_HOME/palisade/overrides`.
#[must_use]
pub fn user_overrides_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.data_dir().join("palisade").join("overrides"))
}

/// One loaded layer.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Where it was read from.
    pub path: PathBuf,
    /// Its permissions, not yet merged with anything.
    pub context: Context,
}

/// The ordered set of metadata files for one application.
#[derive(Debug, Clone, Default)]
pub struct LayerSources {
    runtime: Option<PathBuf>,
    app: Option<PathBuf>,
    app_id: Option<String>,
    system_overrides: Option<PathBuf>,
    user_overrides: Option<PathBuf>,
    extra: Option<PathBuf>,
}

impl LayerSources {
    /// Sources for `app_id` with the standard override directories.
    #[must_use]
    pub fn for_app(app_id: &str) -> Self {
        Self {
            app_id: Some(app_id.to_owned()),
            system_overrides: Some(PathBuf::from(SYSTEM_OVERRIDES_DIR)),
            user_overrides: user_overrides_dir(),
            ..Self::default()
        }
    }

    /// Set the runtime metadata file.
    #[must_use]
    pub fn runtime(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime = Some(path.into());
        self
    }

    /// Set the application metadata file.
    #[must_use]
    pub fn app(mut self, path: impl Into<PathBuf>) -> Self {
        self.app = Some(path.into());
        self
    }

    /// Replace the system override directory.
    #[must_use]
    pub fn system_overrides(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_overrides = Some(dir.into());
        self
    }

    /// Replace the user override directory.
    #[must_use]
    pub fn user_overrides(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_overrides = Some(dir.into());
        self
    }

    /// Set a final, highest-priority file.
    #[must_use]
    pub fn extra(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra = Some(path.into());
        self
    }

    fn override_files(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = vec![dir.join(GLOBAL_OVERRIDE)];
        if let Some(id) = &self.app_id {
            files.push(dir.join(id));
        }
        files
    }

    /// Candidate files, lowest priority first. Some may not exist.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        paths.extend(self.runtime.clone());
        paths.extend(self.app.clone());
        for dir in [&self.system_overrides, &self.user_overrides]
            .into_iter()
            .flatten()
        {
            paths.extend(self.override_files(dir));
        }
        paths.extend(self.extra.clone());
        paths
    }

    /// Load every existing candidate.
    ///
    /// # Errors
    ///
    /// Returns the first read, parse or load error of a file that exists.
    pub fn load(&self) -> Result<Vec<Layer>, ContextError> {
        let mut layers = Vec::new();
        for path in self.candidates() {
            if !path.is_file() {
                debug!(path = %path.display(), "no metadata layer here");
                continue;
            }
            let doc = MetadataDocument::load(&path)?;
            let context = Context::from_metadata(&doc)?;
            info!(path = %path.display(), "loaded metadata layer");
            layers.push(Layer { path, context });
        }
        Ok(layers)
    }

    /// Load every layer and merge them onto an empty context.
    ///
    /// # Errors
    ///
    /// See [`LayerSources::load`].
    pub fn resolve(&self) -> Result<Context, ContextError> {
        let layers = self.load()?;
        Ok(Context::layered(layers.iter().map(|l| &l.context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditional::Socket;
    use crate::registry::Share;
    use std::fs;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn sources(root: &Path) -> LayerSources {
        LayerSources::for_app("org.example.App")
            .system_overrides(root.join("system"))
            .user_overrides(root.join("user"))
    }

    #[test]
    fn candidates_follow_priority_order() {
        let root = Path::new("/x");
        let paths = sources(root)
            .runtime("/x/runtime")
            .app("/x/app")
            .extra("/x/extra")
            .candidates();
        assert_eq!(paths, vec![
            PathBuf::from("/x/runtime"),
            PathBuf::from("/x/app"),
            PathBuf::from("/x/system/global"),
            PathBuf::from("/x/system/org.example.App"),
            PathBuf::from("/x/user/global"),
            PathBuf::from("/x/user/org.example.App"),
            PathBuf::from("/x/extra"),
        ]);
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("app"),
            "[Context]\nshared = [\"network\"]\nsockets = [\"x11\"]\nfilesystems = [\"host\"]\n",
        );
        write(
            &root.join("system/global"),
            "[Context]\nfilesystems = [\"!host:reset\", \"xdg-download\"]\n",
        );
        write(&root.join("user/org.example.App"), "[Context]\nshared = [\"!network\"]\n");

        let ctx = sources(root).app(root.join("app")).resolve().expect("resolve");
        assert!(!ctx.shares().contains(Share::Network));
        assert!(ctx.sockets().allows_unconditionally(Socket::X11));
        assert_eq!(ctx.filesystems().get("host"), None, "host-reset dropped it");
        assert!(ctx.filesystems().get("xdg-download").is_some());
    }

    #[test]
    fn missing_files_are_skipped_broken_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        assert!(sources(root).load().expect("nothing to load").is_empty());

        write(&root.join("user/global"), "[Context\n");
        let err = sources(root).resolve().expect_err("broken override");
        assert!(matches!(err, ContextError::InvalidMetadata { .. }), "{err}");
    }
}
