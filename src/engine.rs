//! The scan engine facade.
//!
//! [`ScanEngine`] wires the registry, catalog, aggregation engine and
//! scheduler together over one SQLite database, and exposes the operations
//! an HTTP layer (or the bundled CLI) needs: root management, job
//! submission and polling, and catalog/aggregate queries.
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_scan::config::Config;
//! use catalog_scan::engine::ScanEngine;
//! use catalog_scan::registry::{Protocol, RootSpec};
//! use catalog_scan::scheduler::{ScanRequest, ScanType};
//!
//! let engine = ScanEngine::open(Config::default())?;
//! engine.register_root(RootSpec::new("photos", Protocol::Local).with_path("/srv/photos"))?;
//! let job = engine.queue_scan(ScanRequest::new("photos", ScanType::Full))?;
//! let status = engine.wait_for(&job, None);
//! println!("{status:?}");
//! # Ok::<(), catalog_scan::error::ScanError>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{AggregationEngine, DirectoryAggregate, RootAggregates};
use crate::catalog::database::Database;
use crate::catalog::{CatalogError, CatalogStore, DuplicateGroup, FileRecord, SqliteCatalog};
use crate::config::Config;
use crate::error::ScanError;
use crate::registry::{Protocol, RootRef, RootRegistry, RootSpec, StorageRoot};
use crate::scheduler::{JobId, ScanRequest, ScanScheduler, ScanStatus};
use crate::walker::path_utils;
use crate::walker::{Connector, ConnectorSet};

/// How long `remove_root` waits for a cancelled job to wind down.
const REMOVE_GRACE: Duration = Duration::from_secs(5);

/// Storage scan engine.
#[derive(Debug)]
pub struct ScanEngine {
    config: Config,
    db: Arc<Database>,
    registry: RootRegistry,
    catalog: Arc<SqliteCatalog>,
    aggregates: Arc<AggregationEngine>,
    scheduler: ScanScheduler,
}

impl ScanEngine {
    /// Open the configured database and start the worker pool with the
    /// built-in connectors.
    ///
    /// # Errors
    ///
    /// The database cannot be opened, or workers cannot be started.
    pub fn open(config: Config) -> Result<Self, ScanError> {
        let location = config.database_location();
        if !config.is_in_memory() {
            if let Some(parent) = Path::new(&location).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        let db = Database::open_location(&location).map_err(CatalogError::from)?;
        log::debug!("Opened catalog at {location}");
        Self::with_database(config, Arc::new(db), ConnectorSet::builtin())
    }

    /// Build an engine over an already open database.
    ///
    /// # Errors
    ///
    /// Aggregates cannot be rebuilt, or workers cannot be started.
    pub fn with_database(
        config: Config,
        db: Arc<Database>,
        connectors: ConnectorSet,
    ) -> Result<Self, ScanError> {
        let registry = RootRegistry::new(Arc::clone(&db), config.default_max_depth);
        let catalog = Arc::new(SqliteCatalog::new(Arc::clone(&db)));
        let aggregates = Arc::new(AggregationEngine::new());

        for root in registry.list()? {
            let records = catalog.live_records(root.id)?;
            aggregates.rebuild(root.id, &records);
        }

        let scheduler = ScanScheduler::start(
            registry.clone(),
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            Arc::clone(&aggregates) as Arc<dyn crate::catalog::ChangeObserver>,
            connectors,
            config.scheduler_options(),
        )?;

        Ok(Self {
            config,
            db,
            registry,
            catalog,
            aggregates,
            scheduler,
        })
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared database handle.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // Roots

    /// Register or overwrite a root by name.
    ///
    /// # Errors
    ///
    /// [`ScanError::InvalidConfiguration`] for incomplete definitions.
    pub fn register_root(&self, spec: RootSpec) -> Result<StorageRoot, ScanError> {
        let root = self.registry.register(spec)?;
        // A running scan owns the table and feeds it deltas.
        if self.scheduler.active_job(root.id).is_none()
            && self.aggregates.directory(root.id, path_utils::ROOT_PATH).is_none()
        {
            let records = self.catalog.live_records(root.id)?;
            self.aggregates.rebuild(root.id, &records);
        }
        Ok(root)
    }

    /// Every root, ordered by name.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn list_roots(&self) -> Result<Vec<StorageRoot>, ScanError> {
        Ok(self.registry.list()?)
    }

    /// Look a root up by ID or name.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn get_root(&self, root: &RootRef) -> Result<StorageRoot, ScanError> {
        Ok(self.registry.resolve(root)?)
    }

    /// Remove a root and its catalog records, cancelling any job for it.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn remove_root(&self, root: &RootRef) -> Result<StorageRoot, ScanError> {
        let existing = self.registry.resolve(root)?;
        if let Some(job) = self
            .scheduler
            .cancel_root(existing.id, "storage root removed")
        {
            if self
                .scheduler
                .wait_for(&job, Some(REMOVE_GRACE))
                .is_some_and(|s| !s.state.is_terminal())
            {
                log::warn!("Job {job} still winding down while root '{}' is removed", existing.name);
            }
        }
        let removed = self.registry.remove(&RootRef::Id(existing.id))?;
        self.aggregates.drop_root(removed.id);
        Ok(removed)
    }

    /// Enable or disable scanning of a root.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn set_root_enabled(&self, root: &RootRef, enabled: bool) -> Result<StorageRoot, ScanError> {
        Ok(self.registry.set_enabled(root, enabled)?)
    }

    // Jobs

    /// Submit a scan; returns immediately with the job ID.
    ///
    /// # Errors
    ///
    /// See [`ScanScheduler::queue_scan`].
    pub fn queue_scan(&self, request: ScanRequest) -> Result<JobId, ScanError> {
        self.scheduler.queue_scan(request)
    }

    /// Copy of a job's status; `None` if it never existed or was evicted.
    #[must_use]
    pub fn get_active_scan_status(&self, job: &JobId) -> Option<ScanStatus> {
        self.scheduler.get_active_scan_status(job)
    }

    /// Copies of every retained job status.
    #[must_use]
    pub fn get_all_active_scan_statuses(&self) -> HashMap<JobId, ScanStatus> {
        self.scheduler.get_all_active_scan_statuses()
    }

    /// Cancel a job. Returns false when it had already finished.
    ///
    /// # Errors
    ///
    /// [`ScanError::JobNotFound`].
    pub fn cancel_scan(&self, job: &JobId) -> Result<bool, ScanError> {
        self.scheduler.cancel_job(job)
    }

    /// Block until a job is terminal or `timeout` passes.
    #[must_use]
    pub fn wait_for(&self, job: &JobId, timeout: Option<Duration>) -> Option<ScanStatus> {
        self.scheduler.wait_for(job, timeout)
    }

    /// Plug in a connector, e.g. for `webdav` or a test double.
    pub fn register_connector(&self, protocol: Protocol, connector: Arc<dyn Connector>) {
        self.scheduler.register_connector(protocol, connector);
    }

    /// Protocols that can currently be scanned.
    #[must_use]
    pub fn protocols(&self) -> Vec<Protocol> {
        self.scheduler.protocols()
    }

    /// Stop accepting jobs, cancel running ones and join the workers.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    // Queries

    /// Directories of a root ordered by recursive size, ties by path.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn sorted_by_size(
        &self,
        root: &RootRef,
        ascending: bool,
    ) -> Result<Vec<DirectoryAggregate>, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self.aggregates.sorted_by_size(root.id, ascending))
    }

    /// Directories of a root ordered by recursive duplicate count, ties by
    /// path.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn sorted_by_duplicates(
        &self,
        root: &RootRef,
        ascending: bool,
    ) -> Result<Vec<DirectoryAggregate>, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self.aggregates.sorted_by_duplicates(root.id, ascending))
    }

    /// Aggregate of one directory.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn directory_aggregate(
        &self,
        root: &RootRef,
        path: &str,
    ) -> Result<Option<DirectoryAggregate>, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self
            .aggregates
            .directory(root.id, &path_utils::canonicalize(path)))
    }

    /// The record at `path`, including soft-deleted ones.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`] or store failures.
    pub fn lookup_path(&self, root: &RootRef, path: &str) -> Result<Option<FileRecord>, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self
            .catalog
            .lookup_path(root.id, &path_utils::canonicalize(path))?)
    }

    /// Live children of a directory.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`] or store failures.
    pub fn list_directory(&self, root: &RootRef, dir: &str) -> Result<Vec<FileRecord>, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self
            .catalog
            .list_children(root.id, &path_utils::canonicalize(dir))?)
    }

    /// Groups of live files sharing a content signature.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`] or store failures.
    pub fn duplicate_groups(&self, root: &RootRef) -> Result<Vec<DuplicateGroup>, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self.catalog.duplicate_groups(root.id)?)
    }

    /// Current incrementally maintained aggregates of a root.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`].
    pub fn aggregates(&self, root: &RootRef) -> Result<RootAggregates, ScanError> {
        let root = self.registry.resolve(root)?;
        Ok(self.aggregates.snapshot(root.id))
    }

    /// Aggregates of a root computed from scratch out of the catalog. The
    /// maintained table is left untouched, so the two can be compared.
    ///
    /// # Errors
    ///
    /// [`ScanError::RootNotFound`] or store failures.
    pub fn recompute_aggregates(&self, root: &RootRef) -> Result<RootAggregates, ScanError> {
        let root = self.registry.resolve(root)?;
        let records = self.catalog.live_records(root.id)?;
        Ok(RootAggregates::recompute(&records))
    }
}
