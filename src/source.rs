//! Cached access to the derived tables of the published snapshot.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::TtlCache;
use crate::config::Settings;
use crate::fetch::{HttpClient, read_source};
use crate::loader::load_source;
use crate::pipeline::{Tables, build_tables};

/// Downloads, loads and derives the snapshot at `settings.data_url`, keeping
/// the result for `settings.cache_ttl_secs`. Concurrent readers of an expired
/// cache wait on a single refresh.
pub struct DataSource<C: HttpClient> {
    client: C,
    settings: Settings,
    cache: Mutex<TtlCache<Arc<Tables>>>,
}

impl<C: HttpClient> DataSource<C> {
    pub fn new(client: C, settings: Settings) -> Self {
        let cache = Mutex::new(TtlCache::new(settings.cache_ttl()));
        Self {
            client,
            settings,
            cache,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The derived tables as of `now`, refreshed in full once the TTL lapses.
    pub async fn tables(&self, now: DateTime<Utc>) -> Result<Arc<Tables>> {
        let mut cache = self.cache.lock().await;
        cache.get_or_refresh(now, || self.refresh()).await
    }

    #[tracing::instrument(skip(self), fields(source = %self.settings.data_url))]
    async fn refresh(&self) -> Result<Arc<Tables>> {
        let bytes = read_source(&self.client, &self.settings.data_url).await?;
        let (observations, _) = load_source(&bytes, &self.settings)?;

        let settings = self.settings.clone();
        let tables = tokio::task::spawn_blocking(move || build_tables(&observations, &settings))
            .await
            .context("derivation task panicked")??;
        info!(latest = ?tables.latest_date(), "Snapshot refreshed");
        Ok(Arc::new(tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;
    use chrono::{Duration, TimeZone};
    use httpmock::prelude::*;

    const FIXTURE: &str = include_str!("../tests/fixtures/air_residence_sample.csv");

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_631_318_400, 0).unwrap() + Duration::seconds(secs)
    }

    fn settings(url: String) -> Settings {
        Settings {
            data_url: url,
            cache_ttl_secs: 600,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_tables_are_cached_until_ttl() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/air_residence.csv");
                then.status(200).body(FIXTURE);
            })
            .await;
        let url = server.url("/air_residence.csv");
        let source = DataSource::new(BasicClient::new(), settings(url));

        let first = source.tables(at(0)).await.unwrap();
        let second = source.tables(at(599)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        mock.assert_hits_async(1).await;

        let third = source.tables(at(600)).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(first, third);
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_failed_fetch_is_an_error() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/air_residence.csv");
                then.status(500);
            })
            .await;
        let url = server.url("/air_residence.csv");
        let source = DataSource::new(BasicClient::new(), settings(url));

        assert!(source.tables(at(0)).await.is_err());
        // The failure is not cached; the next read asks upstream again.
        assert!(source.tables(at(1)).await.is_err());
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_local_file_source() {
        let path = std::env::temp_dir().join("vac_race_source_fixture.csv");
        std::fs::write(&path, FIXTURE).unwrap();
        let source = DataSource::new(BasicClient::new(), settings(path.display().to_string()));

        let tables = source.tables(at(0)).await.unwrap();
        assert!(!tables.region.is_empty());
        assert_eq!(tables.latest_date(), chrono::NaiveDate::from_ymd_opt(2021, 9, 10));
        std::fs::remove_file(&path).unwrap();
    }
}
