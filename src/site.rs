use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-site engines. Each site gets its own Engine + WAL + compactor.
/// Site = database name from the pgwire connection, so one server can serve
/// several independent campuses or facility groups.
pub struct SiteManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl SiteManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given site.
    pub fn get_or_create(&self, site: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(site) {
            return Ok(engine.value().clone());
        }
        if site.len() > MAX_SITE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "site name too long",
            ));
        }
        if self.engines.len() >= MAX_SITES {
            return Err(std::io::Error::other("too many sites"));
        }

        // Sanitize site name to prevent path traversal
        let safe_name: String = site
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty site name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        // Spawn the WAL compactor for this site
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(site.to_string(), engine.clone());
        metrics::gauge!(crate::observability::SITES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Actor, Role, SlotRef};
    use chrono::{NaiveDate, NaiveTime};
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slated_test_site").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn admin() -> Actor {
        Actor::new("root", Role::Admin)
    }

    #[tokio::test]
    async fn site_isolation() {
        let dir = test_data_dir("isolation");
        let sm = SiteManager::new(dir, 1000);

        let eng_a = sm.get_or_create("campus_a").unwrap();
        let eng_b = sm.get_or_create("campus_b").unwrap();

        let rid = Ulid::new();
        let sid = Ulid::new();
        let start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();

        // Same ids in both sites
        for eng in [&eng_a, &eng_b] {
            eng.create_resource(&admin(), rid, "Gym".into(), "hall".into(), 40, "Main".into())
                .await
                .unwrap();
            eng.create_slot(&admin(), sid, "morning".into(), start, end)
                .await
                .unwrap();
        }

        // Booking in site A does not occupy the slot in site B
        eng_a
            .create_booking(
                &admin(),
                Ulid::new(),
                rid,
                date,
                SlotRef::Preset(sid),
                "a-side".into(),
            )
            .await
            .unwrap();

        let grid_b = eng_b.list_availability(rid, date).await.unwrap();
        assert!(grid_b[0].available);

        let grid_a = eng_a.list_availability(rid, date).await.unwrap();
        assert!(!grid_a[0].available);
    }

    #[tokio::test]
    async fn site_lazy_creation() {
        let dir = test_data_dir("lazy");
        let sm = SiteManager::new(dir.clone(), 1000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        // Create a site
        let _eng = sm.get_or_create("my_campus").unwrap();

        // WAL file should now exist
        assert!(dir.join("my_campus.wal").exists());
    }

    #[tokio::test]
    async fn site_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let sm = SiteManager::new(dir, 1000);

        let eng1 = sm.get_or_create("foo").unwrap();
        let eng2 = sm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn site_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let sm = SiteManager::new(dir.clone(), 1000);

        // Path traversal attempt
        let _eng = sm.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = sm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn site_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let sm = SiteManager::new(dir, 1000);

        let long_name = "x".repeat(MAX_SITE_NAME_LEN + 1);
        let result = sm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("site name too long"));
    }

    #[tokio::test]
    async fn site_count_limit() {
        let dir = test_data_dir("count_limit");
        let sm = SiteManager::new(dir, 1000);

        for i in 0..MAX_SITES {
            sm.get_or_create(&format!("s{i}")).unwrap();
        }
        let result = sm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many sites"));
    }
}
