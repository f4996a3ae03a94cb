//! Component wiring.
//!
//! Every pipeline component takes its collaborators through its
//! constructor. [`Services`] assembles the production set from a
//! [`Config`]; tests call [`Services::assemble`] with their own bytes
//! provider and mail transport, and hand a fake matcher to
//! [`Services::scanner`].
//!
//! The remote matcher is built on demand because it needs credentials that
//! `import` and `status` do not.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::batch::{ScanDriver, WalCheckpoint};
use crate::config::Config;
use crate::db;
use crate::import::Importer;
use crate::matcher::{PhotoDnaClient, RemoteMatcher};
use crate::media::{BytesProvider, FilesystemBytesProvider};
use crate::notify::{create_transport, MailTransport, Notifier};
use crate::rows::{RowSource, SqliteRowFetcher};
use crate::scan::Scanner;
use crate::store::sqlite::{SqliteMatchStore, SqliteUpdateLog};
use crate::store::{MatchStore, UpdateLog};

pub struct Services {
    pub pool: SqlitePool,
    pub store: Arc<dyn MatchStore>,
    pub updatelog: Arc<dyn UpdateLog>,
    pub rows: RowSource,
    pub notifier: Arc<Notifier>,
    bytes: Arc<dyn BytesProvider>,
}

impl Services {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let bytes = Arc::new(FilesystemBytesProvider::new(&config.media));
        let transport = create_transport(&config.notify)?;
        Ok(Self::assemble(pool, config, bytes, transport))
    }

    pub fn assemble(
        pool: SqlitePool,
        config: &Config,
        bytes: Arc<dyn BytesProvider>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let store: Arc<dyn MatchStore> = Arc::new(SqliteMatchStore::new(pool.clone()));
        let updatelog: Arc<dyn UpdateLog> = Arc::new(SqliteUpdateLog::new(pool.clone()));
        let rows = RowSource::new(
            Arc::new(SqliteRowFetcher::new(pool.clone())),
            config.scan.candidate_batch_size,
        );
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            rows.clone(),
            transport,
            &config.notify,
            config.wiki.clone(),
        ));

        Self {
            pool,
            store,
            updatelog,
            rows,
            notifier,
            bytes,
        }
    }

    pub fn importer(&self) -> Importer {
        Importer::new(self.store.clone(), self.rows.clone(), self.updatelog.clone())
    }

    pub fn scanner(&self, matcher: Arc<dyn RemoteMatcher>) -> Arc<Scanner> {
        Arc::new(Scanner::new(
            self.store.clone(),
            self.rows.clone(),
            matcher,
            self.bytes.clone(),
            self.notifier.clone(),
        ))
    }

    /// Scanner backed by the configured PhotoDNA endpoint.
    pub fn photodna_scanner(&self, config: &Config) -> Result<Arc<Scanner>> {
        let client = PhotoDnaClient::new(&config.matcher)?;
        Ok(self.scanner(Arc::new(client)))
    }

    pub fn scan_driver(&self, scanner: Arc<Scanner>) -> ScanDriver {
        ScanDriver::new(
            self.store.clone(),
            scanner,
            Arc::new(WalCheckpoint::new(self.pool.clone())),
        )
    }
}
