//! Destination inspection and cleanup.
//!
//! mongosync refuses to start against a destination that holds prior data or
//! stale replication bookkeeping. The sanitizer clears what it can while
//! never touching the cluster's own system databases: dropping `admin`,
//! `local` or `config` would break the destination itself, migration or not.

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// Databases that belong to the cluster itself. Never dropped whole.
pub const PROTECTED_DATABASES: [&str; 3] = ["admin", "local", "config"];

/// Replication bookkeeping in `local` that blocks a fresh sync. Matched by
/// exact name; everything else in `local` is left alone.
const LOCAL_BOOKKEEPING: [&str; 3] = [
    "oplog.rs",
    "replset.minvalid",
    "replset.oplogTruncateAfterPoint",
];

/// Admin collections that must survive a thorough pass.
const ADMIN_KEEP: [&str; 3] = ["system.users", "system.roles", "system.version"];

/// Which cleanup pass runs before the sync starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CleanupMode {
    /// Leave the destination untouched.
    Off,
    /// Drop every non-system database.
    Standard,
    /// Also scrub replication bookkeeping out of `local` and leftover
    /// collections out of `admin`.
    Thorough,
}

/// Minimal destination surface the sanitizer needs.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn database_names(&self) -> anyhow::Result<Vec<String>>;
    async fn collection_names(&self, database: &str) -> anyhow::Result<Vec<String>>;
    async fn count_documents(&self, database: &str, collection: &str) -> anyhow::Result<u64>;
    async fn drop_database(&self, database: &str) -> anyhow::Result<()>;
    async fn drop_collection(&self, database: &str, collection: &str) -> anyhow::Result<()>;
}

/// Destination access over the MongoDB driver.
pub struct MongoStore {
    client: mongodb::Client,
}

impl MongoStore {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = mongodb::Client::with_uri_str(uri).await.map_err(|err| {
            MigrateError::DestinationClean(format!("failed to connect to destination: {err}"))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DestinationStore for MongoStore {
    async fn database_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }

    async fn collection_names(&self, database: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.client.database(database).list_collection_names().await?)
    }

    async fn count_documents(&self, database: &str, collection: &str) -> anyhow::Result<u64> {
        let collection = self
            .client
            .database(database)
            .collection::<Document>(collection);
        Ok(collection.count_documents(doc! {}).await?)
    }

    async fn drop_database(&self, database: &str) -> anyhow::Result<()> {
        self.client.database(database).drop().await?;
        Ok(())
    }

    async fn drop_collection(&self, database: &str, collection: &str) -> anyhow::Result<()> {
        self.client
            .database(database)
            .collection::<Document>(collection)
            .drop()
            .await?;
        Ok(())
    }
}

/// Destination databases split into the cluster's own and user data.
#[derive(Debug)]
pub struct Inventory {
    pub system: Vec<String>,
    pub user: Vec<String>,
}

impl Inventory {
    pub fn of(names: Vec<String>) -> Self {
        let (system, user) = names
            .into_iter()
            .partition(|name| PROTECTED_DATABASES.contains(&name.as_str()));
        Self { system, user }
    }
}

/// Outcome of a cleanup pass. Best-effort skips land in `warnings` so they
/// can be asserted on instead of scraped out of logs.
#[derive(Debug, Default)]
pub struct CleanReport {
    pub dropped_databases: Vec<String>,
    pub dropped_collections: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

/// What one collection on the destination currently holds.
#[derive(Debug)]
pub struct CollectionInfo {
    pub database: String,
    pub name: String,
    pub documents: u64,
}

/// Read-only picture of the destination.
#[derive(Debug, Default)]
pub struct DiagnoseReport {
    pub databases: Vec<String>,
    pub collections: Vec<CollectionInfo>,
    pub warnings: Vec<String>,
}

/// Pre-flight cleanup of the destination cluster.
pub struct Sanitizer<S> {
    store: S,
}

impl<S: DestinationStore> Sanitizer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Read-only pass over the destination for operator visibility.
    ///
    /// Per-item failures become warnings; only a failure to list databases
    /// at all is an error, and even that is advisory to the workflow.
    pub async fn diagnose(&self) -> Result<DiagnoseReport> {
        let names = self.store.database_names().await.map_err(|err| {
            MigrateError::DestinationDiagnose(format!("failed to list databases: {err}"))
        })?;
        info!(count = names.len(), databases = ?names, "destination databases");

        let mut report = DiagnoseReport {
            databases: names.clone(),
            ..Default::default()
        };
        for database in &names {
            let collections = match self.store.collection_names(database).await {
                Ok(collections) => collections,
                Err(err) => {
                    report
                        .warnings
                        .push(format!("failed to list collections in {database}: {err}"));
                    continue;
                }
            };
            info!(%database, collections = collections.len(), "database contents");

            for collection in collections {
                match self.store.count_documents(database, &collection).await {
                    Ok(documents) => {
                        if documents > 0 {
                            info!(%database, %collection, documents, "collection holds documents");
                        }
                        report.collections.push(CollectionInfo {
                            database: database.clone(),
                            name: collection,
                            documents,
                        });
                    }
                    Err(err) => report
                        .warnings
                        .push(format!("failed to count {database}.{collection}: {err}")),
                }
            }
        }
        Ok(report)
    }

    /// Drop every database that is not the cluster's own.
    pub async fn clean(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        self.drop_user_databases(&mut report).await?;
        Ok(report)
    }

    /// `clean`, then best-effort removal of replication bookkeeping from
    /// `local` and of leftover collections from `admin`.
    pub async fn thorough_clean(&self) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        self.drop_user_databases(&mut report).await?;
        self.scrub_local_bookkeeping(&mut report).await;
        self.scrub_admin_extras(&mut report).await;
        Ok(report)
    }

    /// User data is the point of the cleanup; failures here are fatal.
    async fn drop_user_databases(&self, report: &mut CleanReport) -> Result<()> {
        let names = self.store.database_names().await.map_err(|err| {
            MigrateError::DestinationClean(format!("failed to list databases: {err}"))
        })?;

        let inventory = Inventory::of(names);
        for database in &inventory.user {
            info!(%database, "dropping database");
            self.store.drop_database(database).await.map_err(|err| {
                MigrateError::DestinationClean(format!(
                    "failed to drop database {database}: {err}"
                ))
            })?;
            report.dropped_databases.push(database.clone());
        }
        Ok(())
    }

    /// Stale oplog and replica-set metadata are the usual reason the engine
    /// refuses an otherwise empty destination. Best effort: `local` belongs
    /// to the cluster, so anything we cannot remove is only a warning.
    async fn scrub_local_bookkeeping(&self, report: &mut CleanReport) {
        let collections = match self.store.collection_names("local").await {
            Ok(collections) => collections,
            Err(err) => {
                report
                    .warnings
                    .push(format!("failed to list collections in local: {err}"));
                return;
            }
        };

        for collection in collections {
            if !LOCAL_BOOKKEEPING.contains(&collection.as_str()) {
                continue;
            }
            info!(%collection, "dropping replication bookkeeping from local");
            match self.store.drop_collection("local", &collection).await {
                Ok(()) => report
                    .dropped_collections
                    .push(("local".to_string(), collection)),
                Err(err) => {
                    let warning = format!("failed to drop local.{collection}: {err}");
                    warn!("{warning}");
                    report.warnings.push(warning);
                }
            }
        }
    }

    /// Drop non-system collections a previous run may have left in `admin`,
    /// keeping the allow-list and anything under the `system.` prefix.
    async fn scrub_admin_extras(&self, report: &mut CleanReport) {
        let collections = match self.store.collection_names("admin").await {
            Ok(collections) => collections,
            Err(err) => {
                report
                    .warnings
                    .push(format!("failed to list collections in admin: {err}"));
                return;
            }
        };

        for collection in collections {
            if ADMIN_KEEP.contains(&collection.as_str()) || collection.starts_with("system.") {
                continue;
            }
            info!(%collection, "dropping leftover admin collection");
            match self.store.drop_collection("admin", &collection).await {
                Ok(()) => report
                    .dropped_collections
                    .push(("admin".to_string(), collection)),
                Err(err) => {
                    let warning = format!("failed to drop admin.{collection}: {err}");
                    warn!("{warning}");
                    report.warnings.push(warning);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory destination with injectable failures. Every attempted drop
    /// is journaled, including ones that fail.
    #[derive(Default)]
    struct FakeStore {
        databases: Mutex<BTreeMap<String, BTreeMap<String, u64>>>,
        dropped_databases: Mutex<Vec<String>>,
        dropped_collections: Mutex<Vec<(String, String)>>,
        fail_drop_database: Option<String>,
        fail_drop_collection: Option<(String, String)>,
        fail_list_collections: Option<String>,
        fail_count: Option<(String, String)>,
    }

    impl FakeStore {
        fn with_databases(specs: &[(&str, &[(&str, u64)])]) -> Self {
            let databases = specs
                .iter()
                .map(|(name, collections)| {
                    let collections = collections
                        .iter()
                        .map(|(coll, count)| (coll.to_string(), *count))
                        .collect();
                    (name.to_string(), collections)
                })
                .collect();
            Self {
                databases: Mutex::new(databases),
                ..Default::default()
            }
        }

        fn database_drops(&self) -> Vec<String> {
            self.dropped_databases.lock().unwrap().clone()
        }

        fn collection_drops(&self) -> Vec<(String, String)> {
            self.dropped_collections.lock().unwrap().clone()
        }

        fn remaining(&self) -> Vec<String> {
            self.databases.lock().unwrap().keys().cloned().collect()
        }

        fn remaining_collections(&self, database: &str) -> Vec<String> {
            self.databases
                .lock()
                .unwrap()
                .get(database)
                .map(|collections| collections.keys().cloned().collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl DestinationStore for FakeStore {
        async fn database_names(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.databases.lock().unwrap().keys().cloned().collect())
        }

        async fn collection_names(&self, database: &str) -> anyhow::Result<Vec<String>> {
            if self.fail_list_collections.as_deref() == Some(database) {
                anyhow::bail!("listCollections denied on {database}");
            }
            Ok(self.remaining_collections(database))
        }

        async fn count_documents(&self, database: &str, collection: &str) -> anyhow::Result<u64> {
            if let Some((db, coll)) = &self.fail_count {
                if db == database && coll == collection {
                    anyhow::bail!("count denied on {database}.{collection}");
                }
            }
            Ok(self
                .databases
                .lock()
                .unwrap()
                .get(database)
                .and_then(|collections| collections.get(collection))
                .copied()
                .unwrap_or(0))
        }

        async fn drop_database(&self, database: &str) -> anyhow::Result<()> {
            self.dropped_databases
                .lock()
                .unwrap()
                .push(database.to_string());
            if self.fail_drop_database.as_deref() == Some(database) {
                anyhow::bail!("dropDatabase denied on {database}");
            }
            self.databases.lock().unwrap().remove(database);
            Ok(())
        }

        async fn drop_collection(&self, database: &str, collection: &str) -> anyhow::Result<()> {
            self.dropped_collections
                .lock()
                .unwrap()
                .push((database.to_string(), collection.to_string()));
            if let Some((db, coll)) = &self.fail_drop_collection {
                if db == database && coll == collection {
                    anyhow::bail!("dropCollection denied on {database}.{collection}");
                }
            }
            if let Some(collections) = self.databases.lock().unwrap().get_mut(database) {
                collections.remove(collection);
            }
            Ok(())
        }
    }

    fn typical_destination() -> FakeStore {
        FakeStore::with_databases(&[
            (
                "admin",
                &[
                    ("system.users", 2),
                    ("system.roles", 1),
                    ("system.version", 1),
                    ("system.keys", 4),
                    ("leftover", 9),
                ],
            ),
            (
                "local",
                &[
                    ("oplog.rs", 1000),
                    ("replset.minvalid", 1),
                    ("replset.oplogTruncateAfterPoint", 1),
                    ("startup_log", 12),
                ],
            ),
            ("config", &[("settings", 3)]),
            ("shop", &[("orders", 50), ("customers", 10)]),
        ])
    }

    #[tokio::test]
    async fn clean_drops_only_user_databases() {
        let store = typical_destination();
        let sanitizer = Sanitizer::new(store);

        let report = sanitizer.clean().await.unwrap();

        assert_eq!(report.dropped_databases, vec!["shop"]);
        assert!(report.warnings.is_empty());
        assert_eq!(sanitizer.store.database_drops(), vec!["shop"]);
        assert_eq!(sanitizer.store.remaining(), vec!["admin", "config", "local"]);
    }

    #[tokio::test]
    async fn clean_fails_when_a_user_database_cannot_be_dropped() {
        let mut store = typical_destination();
        store.fail_drop_database = Some("shop".to_string());
        let sanitizer = Sanitizer::new(store);

        let err = sanitizer.clean().await.unwrap_err();
        assert!(matches!(err, MigrateError::DestinationClean(_)));
        assert!(err.to_string().contains("shop"));
    }

    #[tokio::test]
    async fn thorough_clean_scrubs_exact_bookkeeping_names() {
        let store = typical_destination();
        let sanitizer = Sanitizer::new(store);

        let report = sanitizer.thorough_clean().await.unwrap();

        assert_eq!(report.dropped_databases, vec!["shop"]);
        assert!(report.warnings.is_empty());
        // Bookkeeping goes, the rest of local stays.
        assert_eq!(
            sanitizer.store.remaining_collections("local"),
            vec!["startup_log"]
        );
        // The admin allow-list and system.* survive; leftovers do not.
        assert_eq!(
            sanitizer.store.remaining_collections("admin"),
            vec![
                "system.keys",
                "system.roles",
                "system.users",
                "system.version"
            ]
        );
        assert!(report
            .dropped_collections
            .contains(&("admin".to_string(), "leftover".to_string())));
    }

    #[tokio::test]
    async fn thorough_clean_turns_bookkeeping_failures_into_warnings() {
        let mut store = typical_destination();
        store.fail_drop_collection = Some(("local".to_string(), "oplog.rs".to_string()));
        let sanitizer = Sanitizer::new(store);

        let report = sanitizer.thorough_clean().await.unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("local.oplog.rs"));
        // The other bookkeeping collections still went away.
        assert!(report
            .dropped_collections
            .contains(&("local".to_string(), "replset.minvalid".to_string())));
    }

    #[tokio::test]
    async fn thorough_clean_tolerates_unlistable_system_databases() {
        let mut store = typical_destination();
        store.fail_list_collections = Some("local".to_string());
        let sanitizer = Sanitizer::new(store);

        let report = sanitizer.thorough_clean().await.unwrap();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("local"));
        // The admin pass still ran.
        assert!(report
            .dropped_collections
            .contains(&("admin".to_string(), "leftover".to_string())));
    }

    #[tokio::test]
    async fn diagnose_reports_contents_and_warnings() {
        let mut store = typical_destination();
        store.fail_count = Some(("shop".to_string(), "orders".to_string()));
        let sanitizer = Sanitizer::new(store);

        let report = sanitizer.diagnose().await.unwrap();

        assert_eq!(report.databases, vec!["admin", "config", "local", "shop"]);
        assert!(report
            .collections
            .iter()
            .any(|info| info.database == "shop" && info.name == "customers" && info.documents == 10));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("shop.orders"));
        // Diagnosis never mutates anything.
        assert!(sanitizer.store.database_drops().is_empty());
        assert!(sanitizer.store.collection_drops().is_empty());
    }

    #[tokio::test]
    async fn diagnose_fails_only_when_databases_cannot_be_listed() {
        struct BrokenStore;

        #[async_trait]
        impl DestinationStore for BrokenStore {
            async fn database_names(&self) -> anyhow::Result<Vec<String>> {
                anyhow::bail!("no route to destination")
            }
            async fn collection_names(&self, _: &str) -> anyhow::Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn count_documents(&self, _: &str, _: &str) -> anyhow::Result<u64> {
                Ok(0)
            }
            async fn drop_database(&self, _: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn drop_collection(&self, _: &str, _: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let err = Sanitizer::new(BrokenStore).diagnose().await.unwrap_err();
        assert!(matches!(err, MigrateError::DestinationDiagnose(_)));
    }

    proptest::proptest! {
        /// No inventory, whatever its shape or ordering, makes either pass
        /// drop a protected database.
        #[test]
        fn protected_databases_always_survive(
            names in proptest::collection::vec(
                proptest::prop_oneof![
                    proptest::string::string_regex("[a-z]{1,8}").unwrap(),
                    proptest::strategy::Just("admin".to_string()),
                    proptest::strategy::Just("local".to_string()),
                    proptest::strategy::Just("config".to_string()),
                ],
                0..8,
            ),
            thorough in proptest::bool::ANY,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let specs: Vec<(&str, &[(&str, u64)])> =
                    names.iter().map(|name| (name.as_str(), &[][..])).collect();
                let store = FakeStore::with_databases(&specs);
                let sanitizer = Sanitizer::new(store);

                let report = if thorough {
                    sanitizer.thorough_clean().await.unwrap()
                } else {
                    sanitizer.clean().await.unwrap()
                };

                for protected in PROTECTED_DATABASES {
                    assert!(!report.dropped_databases.iter().any(|name| name == protected));
                    assert!(!sanitizer.store.database_drops().iter().any(|name| name == protected));
                }
                // Everything that is not protected is gone.
                for name in sanitizer.store.remaining() {
                    assert!(PROTECTED_DATABASES.contains(&name.as_str()));
                }
            });
        }
    }
}
