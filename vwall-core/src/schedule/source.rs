//! Content sources.
//!
//! Adapters for signage content services (MagicInfo, OptiSigns, ...) live
//! outside the engine and plug in here. They only have to turn a query into
//! an asset reference the displays understand.

use async_trait::async_trait;

use crate::error::WallError;
use crate::message::AssetRef;

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    async fn resolve(&self, query: &str) -> Result<AssetRef, WallError>;
}

/// Treats the query itself as the asset reference (a URL, a file name).
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAsset;

#[async_trait]
impl ContentSource for DirectAsset {
    fn name(&self) -> &str {
        "direct"
    }

    async fn resolve(&self, query: &str) -> Result<AssetRef, WallError> {
        let asset = AssetRef::new(query.trim());
        if asset.is_empty() {
            return Err(WallError::JobValidation("empty asset reference".into()));
        }
        Ok(asset)
    }
}
