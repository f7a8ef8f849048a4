//! Pipeline orchestration
//!
//! Sequences one ingestion run:
//!
//! 1. acquire the remote session (tunnel, database, SFTP)
//! 2. apply the schema script, if configured
//! 3. truncate target then staging tables, if requested
//! 4. load the users directory, then the purchases directory
//! 5. apply the transform script, if configured
//! 6. report staging row counts, and target row counts if a transform ran
//! 7. release the session
//!
//! Every step is fatal on failure except the two documented soft cases
//! (missing remote directory, missing script file). The session is released
//! on every exit path, including interruption by a shutdown signal.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{ConfigError, PipelineConfig};
use crate::database::{DatabaseBackend, DatabaseError, TableTarget};
use crate::load::{self, LoadError, LoadResult};
use crate::remote::RemoteFs;
use crate::script::{self, ScriptError};
use crate::session::{
    Release, RemoteSession, SessionError, SessionOpener, SshOpener, TunnelEndpoint,
};
use crate::tables;

/// Error type for a pipeline run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration is incomplete or invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The remote session could not be acquired
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A script failed
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// A directory load failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Truncation or row counting failed
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A shutdown signal arrived before the run finished
    #[error("Interrupted by shutdown signal")]
    Interrupted,
}

impl PipelineError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) | PipelineError::Session(SessionError::Config(_)) => 2,
            PipelineError::Interrupted => 130,
            _ => 1,
        }
    }
}

/// Result type for pipeline runs
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Row counts of a users/purchases table pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCountSnapshot {
    /// Rows in the users table
    pub users: u64,
    /// Rows in the purchases table
    pub purchases: u64,
}

impl RowCountSnapshot {
    /// Count the rows of both tables
    pub async fn take<D>(
        db: &mut D,
        users: &TableTarget,
        purchases: &TableTarget,
    ) -> Result<Self, DatabaseError>
    where
        D: DatabaseBackend + ?Sized,
    {
        Ok(Self {
            users: db.count_rows(users).await?,
            purchases: db.count_rows(purchases).await?,
        })
    }
}

impl fmt::Display for RowCountSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "users={} purchases={}", self.users, self.purchases)
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Identifier of the run, as carried by its log span
    pub run_id: Uuid,
    /// Whether the schema script was applied
    pub schema_applied: bool,
    /// Whether the tables were truncated before loading
    pub tables_cleared: bool,
    /// Users directory load
    pub users: LoadResult,
    /// Purchases directory load
    pub purchases: LoadResult,
    /// Whether the transform script was applied
    pub transform_applied: bool,
    /// Staging row counts after loading
    pub staging: RowCountSnapshot,
    /// Target row counts, only when a transform ran
    pub targets: Option<RowCountSnapshot>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Loaded {} file(s) into {} and {} file(s) into {}",
            self.users.files, self.users.table, self.purchases.files, self.purchases.table
        )?;
        write!(f, "Staging rows: {}", self.staging)?;
        if let Some(targets) = &self.targets {
            write!(f, "\nTarget rows: {}", targets)?;
        }
        Ok(())
    }
}

/// Row counts reported by a status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Staging table counts
    pub staging: RowCountSnapshot,
    /// Target table counts
    pub targets: RowCountSnapshot,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Staging rows: {}", self.staging)?;
        write!(f, "Target rows: {}", self.targets)
    }
}

/// Pipeline orchestrator
///
/// Holds nothing but the configuration it was given.
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline for `config`
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the full ingestion pipeline against the remote host
    ///
    /// `shutdown` resolving aborts the run; the session is still released.
    pub async fn run<S>(&self, shutdown: S) -> PipelineResult<RunSummary>
    where
        S: Future<Output = ()>,
    {
        self.config.validate(true)?;
        let opener = SshOpener::new(&self.config.ssh, &self.config.database);
        self.run_with(&opener, shutdown).await
    }

    /// Run the full pipeline on a session opened by `opener`
    ///
    /// The configuration is assumed to be validated already.
    pub async fn run_with<O, S>(&self, opener: &O, shutdown: S) -> PipelineResult<RunSummary>
    where
        O: SessionOpener + ?Sized,
        S: Future<Output = ()>,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", run_id = %run_id);

        async move {
            info!(
                ssh_host = %self.config.ssh.host,
                database = %self.config.database.name,
                "Starting pipeline run"
            );

            tokio::pin!(shutdown);

            let mut session = tokio::select! {
                session = RemoteSession::<O::Database, O::Files, O::Tunnel>::open_with(opener, true) => session?,
                _ = &mut shutdown => return Err(PipelineError::Interrupted),
            };

            let outcome = tokio::select! {
                outcome = self.execute_in(&mut session, run_id) => outcome,
                _ = &mut shutdown => Err(PipelineError::Interrupted),
            };

            session.close().await;

            match &outcome {
                Ok(summary) => info!(elapsed_ms = summary.elapsed.as_millis() as u64, "Pipeline run complete"),
                Err(e) => warn!(error = %e, "Pipeline run failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute_in<D, F, T>(
        &self,
        session: &mut RemoteSession<D, F, T>,
        run_id: Uuid,
    ) -> PipelineResult<RunSummary>
    where
        D: DatabaseBackend + Release,
        F: RemoteFs + Release,
        T: TunnelEndpoint,
    {
        let (db, files) = session.parts()?;
        self.execute(db, files, run_id).await
    }

    /// Run every step after session acquisition against the given database
    /// and file source
    pub async fn execute<D, F>(&self, db: &mut D, fs: &F, run_id: Uuid) -> PipelineResult<RunSummary>
    where
        D: DatabaseBackend + ?Sized,
        F: RemoteFs + ?Sized,
    {
        let started = Instant::now();
        let config = self.config;
        let splitter = config.pipeline.splitter;

        let schema_applied = script::apply(
            db,
            config.pipeline.schema_script.as_deref(),
            "schema",
            splitter,
        )
        .await?;

        let tables_cleared = config.pipeline.clear_tables;
        if tables_cleared {
            tables::truncate_all(db, &config.tables).await?;
        }

        let encoding = config.remote.encoding.as_str();
        let users = load::load_directory(
            db,
            fs,
            &config.remote.users_dir(),
            &config.tables.users_staging,
            encoding,
        )
        .await?;
        let purchases = load::load_directory(
            db,
            fs,
            &config.remote.purchases_dir(),
            &config.tables.purchases_staging,
            encoding,
        )
        .await?;

        let transform_applied = script::apply(
            db,
            config.pipeline.transform_script.as_deref(),
            "transform",
            splitter,
        )
        .await?;

        let staging = RowCountSnapshot::take(
            db,
            &config.tables.users_staging,
            &config.tables.purchases_staging,
        )
        .await?;
        info!(
            users = staging.users,
            purchases = staging.purchases,
            "Staging row counts"
        );

        let targets = if transform_applied {
            let targets = RowCountSnapshot::take(
                db,
                &config.tables.users_target,
                &config.tables.purchases_target,
            )
            .await?;
            info!(
                users = targets.users,
                purchases = targets.purchases,
                "Target row counts"
            );
            Some(targets)
        } else {
            debug!("No transform applied; skipping target row counts");
            None
        };

        Ok(RunSummary {
            run_id,
            schema_applied,
            tables_cleared,
            users,
            purchases,
            transform_applied,
            staging,
            targets,
            elapsed: started.elapsed(),
        })
    }

    /// Report staging and target row counts without touching remote files
    pub async fn status<S>(&self, shutdown: S) -> PipelineResult<StatusReport>
    where
        S: Future<Output = ()>,
    {
        self.config.validate(false)?;
        let opener = SshOpener::new(&self.config.ssh, &self.config.database);
        self.status_with(&opener, shutdown).await
    }

    /// Report row counts on a session opened by `opener`, without a
    /// file-transfer channel
    pub async fn status_with<O, S>(&self, opener: &O, shutdown: S) -> PipelineResult<StatusReport>
    where
        O: SessionOpener + ?Sized,
        S: Future<Output = ()>,
    {
        let span = info_span!("status", run_id = %Uuid::new_v4());

        async move {
            tokio::pin!(shutdown);

            let mut session = tokio::select! {
                session = RemoteSession::<O::Database, O::Files, O::Tunnel>::open_with(opener, false) => session?,
                _ = &mut shutdown => return Err(PipelineError::Interrupted),
            };

            let outcome = tokio::select! {
                outcome = self.report(session.database()) => outcome,
                _ = &mut shutdown => Err(PipelineError::Interrupted),
            };

            session.close().await;
            outcome
        }
        .instrument(span)
        .await
    }

    /// Take staging and target row counts
    pub async fn report<D>(&self, db: &mut D) -> PipelineResult<StatusReport>
    where
        D: DatabaseBackend + ?Sized,
    {
        let tables = &self.config.tables;
        let staging = RowCountSnapshot::take(db, &tables.users_staging, &tables.purchases_staging).await?;
        let targets = RowCountSnapshot::take(db, &tables.users_target, &tables.purchases_target).await?;
        Ok(StatusReport { staging, targets })
    }
}
