//! On-demand installation: resources are fetched when first requested, and
//! an update only carries over what the previous version already held.

use std::sync::Arc;

use super::{AssetGroup, UpdateCacheStatus, UpdateSource};
use crate::Error;
use crate::manifest::InstallMode;
use crate::net::Request;

impl AssetGroup {
    /// Migrate listed resources from `update_from`. With an update mode of
    /// prefetch, resources the previous version actually served are fetched
    /// again when no matching copy exists.
    pub(super) async fn initialize_lazy(
        self: &Arc<Self>,
        update_from: Option<&dyn UpdateSource>,
    ) -> Result<(), Error> {
        let Some(source) = update_from else {
            return Ok(());
        };

        for url in self.urls.clone() {
            let req = Request::get(self.scope.adapter.resolve(&url));
            if self.is_cached(&req.url).await? {
                continue;
            }

            let updated = self.maybe_update(source, &req).await?;
            if updated || self.config.update_mode() != InstallMode::Prefetch {
                continue;
            }

            // Unused or absent resources stay lazy.
            if source.recent_cache_status(&url).await? != UpdateCacheStatus::Cached {
                continue;
            }
            self.fetch_and_cache_once(req, false).await?;
        }

        Ok(())
    }
}
