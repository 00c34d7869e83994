//! Eager installation: every listed resource is cached before the version
//! is considered ready.

use std::sync::Arc;

use super::{AssetGroup, AssetMeta, UpdateSource};
use crate::Error;
use crate::net::Request;

impl AssetGroup {
    /// Cache every listed URL serially, reusing copies from `update_from`
    /// where the hash still matches, then carry over previously cached
    /// unhashed resources this group owns.
    pub(super) async fn initialize_prefetch(
        self: &Arc<Self>,
        update_from: Option<&dyn UpdateSource>,
    ) -> Result<(), Error> {
        for url in self.urls.clone() {
            let req = Request::get(self.scope.adapter.resolve(&url));
            if self.is_cached(&req.url).await? {
                continue;
            }
            if let Some(source) = update_from {
                if self.maybe_update(source, &req).await? {
                    continue;
                }
            }
            self.fetch_and_cache_once(req, false).await?;
        }

        let Some(source) = update_from else {
            return Ok(());
        };

        let owned: Vec<String> = source
            .previously_cached_resources()
            .await?
            .into_iter()
            .filter(|url| self.owns(url))
            .collect();

        for url in owned {
            let req = Request::get(self.scope.adapter.resolve(&url));
            if self.is_cached(&req.url).await? {
                continue;
            }
            // Possibly expired already; it still serves until revalidated.
            let Some(previous) = source.lookup_resource_without_hash(&url).await? else {
                continue;
            };
            let Some(meta) = previous.metadata else {
                continue;
            };
            let key = self.cache_key(&req.url);
            self.cache.put(&key, &previous.response).await?;
            self.metadata
                .write_as(&key, &AssetMeta { used: false, ..meta })
                .await?;
            tracing::debug!(group = %self.config.name, url = %url, "migrated unhashed resource");
        }

        Ok(())
    }
}
