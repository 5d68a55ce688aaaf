pub mod init;
pub mod norms;
pub mod play;
pub mod score;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};

use psytest_core::content::ContentModel;
use psytest_core::parser;

/// Parse a single bundle file and index it.
pub fn load_model(path: &Path) -> Result<ContentModel> {
    let bundle = parser::parse_bundle(path)?;
    ContentModel::from_bundle(bundle)
        .with_context(|| format!("failed to load bundle: {}", path.display()))
}
