//! Loading the metadata stack named on the command line.

use std::path::PathBuf;

use color_eyre::eyre::{Result, bail};
use palisade_context::{Context, LayerSources, MetadataDocument};
use tracing::info;

/// Build a context from `documents`, lowest priority first.
///
/// With `app_id`, `documents` is the application metadata, optionally
/// preceded by the runtime metadata, and the system and user overrides
/// for that application are layered on top.
pub(crate) fn load_context(documents: &[PathBuf], app_id: Option<&str>) -> Result<Context> {
    let Some(app_id) = app_id else {
        let layers = documents
            .iter()
            .map(|path| -> Result<Context> {
                let doc = MetadataDocument::load(path)?;
                info!(path = %path.display(), "loaded metadata layer");
                Ok(Context::from_metadata(&doc)?)
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Context::layered(&layers));
    };

    let sources = match documents {
        [app] => LayerSources::for_app(app_id).app(app),
        [runtime, app] => LayerSources::for_app(app_id).runtime(runtime).app(app),
        _ => bail!("with --app-id, pass the application metadata, optionally preceded by the runtime metadata"),
    };
    Ok(sources.resolve()?)
}
