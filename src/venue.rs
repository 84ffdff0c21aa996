use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-venue engines. Each venue gets its own Engine + WAL + reaper
/// + compactor. Venue = database name from the pgwire connection, so one
/// server can carry several auditoriums without their registers mixing.
pub struct VenueManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    retention_days: i64,
}

impl VenueManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, retention_days: i64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            retention_days,
        }
    }

    /// Get or lazily create an engine for the given venue.
    pub fn get_or_create(&self, venue: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(venue) {
            return Ok(engine.value().clone());
        }
        if venue.len() > MAX_VENUE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "venue name too long",
            ));
        }
        if self.engines.len() >= MAX_VENUES {
            return Err(std::io::Error::other("too many venues"));
        }

        // Sanitize venue name to prevent path traversal
        let safe_name: String = venue
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty venue name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        let reaper_engine = engine.clone();
        let retention = self.retention_days;
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine, retention).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(venue.to_string(), engine.clone());
        metrics::gauge!(crate::observability::VENUES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("sabha_test_venue").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn venue_isolation() {
        let dir = test_data_dir("isolation");
        let vm = VenueManager::new(dir, 1000, 730);

        let town_hall = vm.get_or_create("town_hall").unwrap();
        let kala_bhavan = vm.get_or_create("kala_bhavan").unwrap();

        let today = d("2026-01-01");
        town_hall
            .submit_booking(
                Ulid::new(),
                "rotary".into(),
                "Charity gala".into(),
                Category::NgoB,
                d("2026-03-01"),
                Slot::Morning,
                false,
                today,
            )
            .await
            .unwrap();

        // The other venue's calendar stays untouched.
        let statuses = kala_bhavan.slot_statuses(d("2026-03-01")).await;
        assert!(statuses.iter().all(|(_, s)| *s == SlotStatus::Available));

        let statuses = town_hall.slot_statuses(d("2026-03-01")).await;
        assert_eq!(statuses[0].1, SlotStatus::Pending);
    }

    #[tokio::test]
    async fn venue_lazy_creation() {
        let dir = test_data_dir("lazy");
        let vm = VenueManager::new(dir.clone(), 1000, 730);

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = vm.get_or_create("town_hall").unwrap();
        assert!(dir.join("town_hall.wal").exists());
    }

    #[tokio::test]
    async fn venue_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let vm = VenueManager::new(dir, 1000, 730);

        let eng1 = vm.get_or_create("hall").unwrap();
        let eng2 = vm.get_or_create("hall").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn venue_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let vm = VenueManager::new(dir.clone(), 1000, 730);

        let _eng = vm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        let result = vm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn venue_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let vm = VenueManager::new(dir, 1000, 730);

        let long_name = "x".repeat(MAX_VENUE_NAME_LEN + 1);
        let result = vm.get_or_create(&long_name);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("venue name too long"));
    }

    #[tokio::test]
    async fn venue_count_limit() {
        let dir = test_data_dir("count_limit");
        let vm = VenueManager::new(dir, 1000, 730);

        for i in 0..MAX_VENUES {
            vm.get_or_create(&format!("v{i}")).unwrap();
        }
        let result = vm.get_or_create("one_more");
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("too many venues"));
    }
}
