//! Provisioning workflow.
//!
//! ```text
//! Received → Validated → CredentialsWritten → IndexRebuilt
//!          → ConfigWritten → OwnershipSet → Reloaded → Succeeded
//! ```
//!
//! Each stage is awaited before the next begins and the first failure ends
//! the run. Nothing is retried. A failure after the store commit does not
//! undo the commit: the account exists and the error says which stage
//! broke.

use std::path::PathBuf;
use std::sync::Arc;

use ftpgate_types::CreateUserRequest;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::account_config::{AccountConfig, AccountConfigError, AccountConfigWriter};
use crate::config::ProvisionConfig;
use crate::credential_store::{CredentialStore, StoreError};
use crate::index::DbLoadIndexBuilder;
use crate::jail::{Jail, JailError};
use crate::reload::{DaemonReloader, ReloadError, SystemctlReloader};
use crate::request::{AccountRequest, ErrorKind, RequestError};
use crate::tool::ToolRunner;

/// Position in the provisioning state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, IntoStaticStr)]
pub enum Stage {
    Received,
    Validated,
    CredentialsWritten,
    IndexRebuilt,
    ConfigWritten,
    OwnershipSet,
    Reloaded,
    Succeeded,
}

/// Error type for the provisioning workflow.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Path(#[from] JailError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] AccountConfigError),

    #[error(transparent)]
    Reload(#[from] ReloadError),
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request(e) => e.kind(),
            Self::Path(JailError::InvalidPath { .. }) => ErrorKind::InvalidPath,
            Self::Path(JailError::DirectoryNotFound(_)) => ErrorKind::DirectoryNotFound,
            Self::Store(e) if e.is_timeout() => ErrorKind::OperationTimeout,
            Self::Store(StoreError::Duplicate(_)) => ErrorKind::DuplicateAccount,
            Self::Store(StoreError::IndexBuild(_)) => ErrorKind::IndexBuildFailed,
            Self::Store(_) => ErrorKind::StoreUnavailable,
            Self::Config(e) if e.is_timeout() => ErrorKind::OperationTimeout,
            Self::Config(_) => ErrorKind::ConfigWriteFailed,
            Self::Reload(e) if e.is_timeout() => ErrorKind::OperationTimeout,
            Self::Reload(_) => ErrorKind::ReloadFailed,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind().is_validation()
    }
}

/// A workflow that stopped short of `Succeeded`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ProvisionFailure {
    /// The stage that was being attempted when the error occurred.
    pub stage: Stage,
    pub username: String,
    #[source]
    pub error: ProvisionError,
}

impl ProvisionFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub username: String,
    pub local_root: PathBuf,
    pub config_path: PathBuf,
    /// Records in the store after the commit.
    pub records: usize,
    pub reloaded: bool,
}

impl ProvisionReport {
    /// Confirmation shown to the caller.
    pub fn message(&self) -> String {
        format!("User {} created successfully!", self.username)
    }
}

/// Runs the provisioning workflow against one jail, store, and config dir.
pub struct Provisioner {
    jail: Jail,
    store: Arc<CredentialStore>,
    writer: AccountConfigWriter,
    reloader: Option<Arc<dyn DaemonReloader>>,
}

impl Provisioner {
    /// `reloader` is `None` when daemon reload is disabled.
    pub fn new(
        jail: Jail,
        store: Arc<CredentialStore>,
        writer: AccountConfigWriter,
        reloader: Option<Arc<dyn DaemonReloader>>,
    ) -> Self {
        Self {
            jail,
            store,
            writer,
            reloader,
        }
    }

    /// Wire up the real tools from configuration.
    pub fn from_config(config: &ProvisionConfig) -> Self {
        let runner = ToolRunner::new(config.tools.privilege_prefix.clone(), config.tools.timeout());

        let index = DbLoadIndexBuilder::new(
            runner.clone(),
            config.tools.db_load.clone(),
            &config.credential_index,
        );
        let store = CredentialStore::new(
            &config.credential_store,
            Arc::new(index),
            config.tools.timeout(),
        );
        let writer = AccountConfigWriter::new(
            &config.user_config_dir,
            config.config_owner.clone(),
            config.tools.chown.clone(),
            runner.clone(),
        );
        let reloader: Option<Arc<dyn DaemonReloader>> = config.daemon.enabled.then(|| {
            Arc::new(SystemctlReloader::new(
                runner,
                config.tools.systemctl.clone(),
                config.daemon.action.clone(),
                config.daemon.service.clone(),
            )) as Arc<dyn DaemonReloader>
        });

        Self::new(Jail::new(&config.jail_root), Arc::new(store), writer, reloader)
    }

    pub fn jail(&self) -> &Jail {
        &self.jail
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Run the workflow for one request.
    pub async fn provision(&self, request: &CreateUserRequest) -> Result<ProvisionReport, ProvisionFailure> {
        let mut run = Run {
            username: request.username.clone(),
            stage: Stage::Received,
        };

        let result = self.run(&mut run, request).await;
        match &result {
            Ok(report) => {
                tracing::info!(
                    username = %report.username,
                    local_root = %report.local_root.display(),
                    records = report.records,
                    "account provisioned"
                );
            }
            Err(failure) if failure.error.is_validation() => {
                tracing::warn!(
                    username = %failure.username,
                    stage = %failure.stage,
                    kind = %failure.kind(),
                    "provisioning rejected: {}",
                    failure.error
                );
            }
            Err(failure) => {
                tracing::error!(
                    username = %failure.username,
                    stage = %failure.stage,
                    kind = %failure.kind(),
                    "provisioning failed: {}",
                    failure.error
                );
            }
        }
        result
    }

    async fn run(&self, run: &mut Run, request: &CreateUserRequest) -> Result<ProvisionReport, ProvisionFailure> {
        run.enter(Stage::Received);
        let account = AccountRequest::parse(request).map_err(|e| run.fail(e))?;

        let local_root = self
            .jail
            .resolve(&account.requested_path)
            .await
            .map_err(|e| run.fail(e))?;
        run.enter(Stage::Validated);

        // Append and rebuild share one critical section in the store; the
        // index failure is attributed to the rebuild stage.
        let commit = match self.store.add(&account.username, &account.password).await {
            Ok(commit) => commit,
            Err(e @ StoreError::IndexBuild(_)) => {
                run.enter(Stage::CredentialsWritten);
                return Err(run.fail(e));
            }
            Err(e) => return Err(run.fail(e)),
        };
        run.enter(Stage::CredentialsWritten);
        run.enter(Stage::IndexRebuilt);

        let config = AccountConfig::new(&local_root, account.write);
        let config_path = self
            .writer
            .write(&account.username, &config)
            .await
            .map_err(|e| run.fail(e))?;
        run.enter(Stage::ConfigWritten);

        self.writer
            .set_ownership(&config_path)
            .await
            .map_err(|e| run.fail(e))?;
        run.enter(Stage::OwnershipSet);

        let reloaded = match &self.reloader {
            Some(reloader) => {
                if let Err(e) = reloader.reload().await {
                    tracing::error!(
                        username = %run.username,
                        command = %reloader.describe(),
                        "daemon reload failed; account is committed but not yet live"
                    );
                    return Err(run.fail(e));
                }
                true
            }
            None => {
                tracing::debug!(username = %run.username, "daemon reload disabled");
                false
            }
        };
        run.enter(Stage::Reloaded);
        run.enter(Stage::Succeeded);

        Ok(ProvisionReport {
            username: account.username,
            local_root,
            config_path,
            records: commit.records,
            reloaded,
        })
    }
}

/// Progress of one workflow run.
struct Run {
    username: String,
    /// Last stage reached.
    stage: Stage,
}

impl Run {
    fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        tracing::debug!(username = %self.username, stage = %stage, "provisioning stage");
    }

    /// The stage being attempted is the one after the last reached.
    fn fail(&self, error: impl Into<ProvisionError>) -> ProvisionFailure {
        ProvisionFailure {
            stage: next(self.stage),
            username: self.username.clone(),
            error: error.into(),
        }
    }
}

fn next(stage: Stage) -> Stage {
    match stage {
        Stage::Received => Stage::Validated,
        Stage::Validated => Stage::CredentialsWritten,
        Stage::CredentialsWritten => Stage::IndexRebuilt,
        Stage::IndexRebuilt => Stage::ConfigWritten,
        Stage::ConfigWritten => Stage::OwnershipSet,
        Stage::OwnershipSet => Stage::Reloaded,
        Stage::Reloaded | Stage::Succeeded => Stage::Succeeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexBuilder, IndexError};
    use crate::tool::ToolError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records every rebuild; optionally fails.
    struct FakeIndex {
        path: PathBuf,
        rebuilds: StdMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl IndexBuilder for FakeIndex {
        async fn rebuild(&self, store_contents: &[u8]) -> Result<(), IndexError> {
            if self.fail {
                return Err(IndexError::Tool(ToolError::Exit {
                    command: "db_load".into(),
                    code: Some(1),
                    stderr: "db_load: corrupt input".into(),
                }));
            }
            self.rebuilds
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(store_contents).into_owned());
            Ok(())
        }

        fn index_path(&self) -> &Path {
            &self.path
        }
    }

    #[derive(Default)]
    struct FakeReloader {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl DaemonReloader for FakeReloader {
        async fn reload(&self) -> Result<(), ReloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ReloadError(ToolError::Exit {
                    command: "systemctl restart vsftpd".into(),
                    code: Some(5),
                    stderr: "Unit vsftpd.service not found.".into(),
                }));
            }
            Ok(())
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    struct Fixture {
        jail_dir: TempDir,
        etc_dir: TempDir,
        index: Arc<FakeIndex>,
        reloader: Arc<FakeReloader>,
        provisioner: Provisioner,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(false, false)
        }

        fn with(fail_index: bool, fail_reload: bool) -> Self {
            let jail_dir = TempDir::new().unwrap();
            std::fs::create_dir_all(jail_dir.path().join("clients/alice")).unwrap();
            let etc_dir = TempDir::new().unwrap();
            std::fs::create_dir_all(etc_dir.path().join("vsftpd_user_conf")).unwrap();

            let index = Arc::new(FakeIndex {
                path: etc_dir.path().join("vsftpd_virtual_users.db"),
                rebuilds: StdMutex::new(Vec::new()),
                fail: fail_index,
            });
            let reloader = Arc::new(FakeReloader {
                fail: fail_reload,
                ..Default::default()
            });

            let timeout = Duration::from_secs(5);
            let store = CredentialStore::new(
                etc_dir.path().join("vsftpd_virtual_users"),
                index.clone(),
                timeout,
            );
            let writer = AccountConfigWriter::new(
                etc_dir.path().join("vsftpd_user_conf"),
                None,
                "chown",
                ToolRunner::unprivileged(timeout),
            );
            let provisioner = Provisioner::new(
                Jail::new(jail_dir.path()),
                Arc::new(store),
                writer,
                Some(reloader.clone() as Arc<dyn DaemonReloader>),
            );

            Self {
                jail_dir,
                etc_dir,
                index,
                reloader,
                provisioner,
            }
        }

        fn store_text(&self) -> String {
            std::fs::read_to_string(self.etc_dir.path().join("vsftpd_virtual_users"))
                .unwrap_or_default()
        }

        fn config_text(&self, username: &str) -> Option<String> {
            std::fs::read_to_string(self.etc_dir.path().join("vsftpd_user_conf").join(username)).ok()
        }

        fn config_count(&self) -> usize {
            std::fs::read_dir(self.etc_dir.path().join("vsftpd_user_conf"))
                .unwrap()
                .count()
        }

        fn rebuilds(&self) -> Vec<String> {
            self.index.rebuilds.lock().unwrap().clone()
        }

        fn reloads(&self) -> usize {
            self.reloader.calls.load(Ordering::SeqCst)
        }
    }

    fn request(username: &str, folder: &str, write: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            password: "p@ss".into(),
            user_folder: folder.into(),
            write_permission: write.into(),
        }
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let fx = Fixture::new();
        let report = fx
            .provisioner
            .provision(&request("alice", "/clients/alice", "yes"))
            .await
            .unwrap();

        let home = fx.jail_dir.path().join("clients/alice").canonicalize().unwrap();
        assert_eq!(report.local_root, home);
        assert_eq!(report.records, 1);
        assert!(report.reloaded);
        assert_eq!(report.message(), "User alice created successfully!");

        assert_eq!(fx.store_text(), "alice\np@ss\n");
        assert_eq!(fx.rebuilds(), ["alice\np@ss\n"]);

        let config = fx.config_text("alice").unwrap();
        assert!(config.starts_with(&format!("local_root={}\n", home.display())));
        assert!(config.contains("write_enable=YES\n"));
        assert_eq!(fx.config_count(), 1);
        assert_eq!(fx.reloads(), 1);
    }

    #[tokio::test]
    async fn test_missing_field_has_no_side_effects() {
        let fx = Fixture::new();
        let failure = fx
            .provisioner
            .provision(&request("alice", "", "no"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::MissingField);
        assert_eq!(failure.stage, Stage::Validated);
        assert!(failure.error.is_validation());
        assert_eq!(fx.store_text(), "");
        assert!(fx.rebuilds().is_empty());
        assert_eq!(fx.config_count(), 0);
        assert_eq!(fx.reloads(), 0);
    }

    #[tokio::test]
    async fn test_traversal_has_no_side_effects() {
        let fx = Fixture::new();
        let failure = fx
            .provisioner
            .provision(&request("alice", "/clients/../../../etc", "yes"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::InvalidPath);
        assert_eq!(fx.store_text(), "");
        assert_eq!(fx.config_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_has_no_side_effects() {
        let fx = Fixture::new();
        let failure = fx
            .provisioner
            .provision(&request("bob", "/clients/bob", "yes"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::DirectoryNotFound);
        assert_eq!(fx.store_text(), "");
        assert_eq!(fx.reloads(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let fx = Fixture::new();
        fx.provisioner
            .provision(&request("alice", "/clients/alice", "yes"))
            .await
            .unwrap();

        let failure = fx
            .provisioner
            .provision(&request("alice", "/clients/alice", "no"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::DuplicateAccount);
        assert_eq!(failure.stage, Stage::CredentialsWritten);
        assert_eq!(fx.store_text(), "alice\np@ss\n");
        // config still from the first run
        assert!(fx.config_text("alice").unwrap().contains("write_enable=YES"));
        assert_eq!(fx.reloads(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_rolls_back_store() {
        let fx = Fixture::with(true, false);
        std::fs::write(
            fx.etc_dir.path().join("vsftpd_virtual_users"),
            "carol\nsecret\n",
        )
        .unwrap();

        let failure = fx
            .provisioner
            .provision(&request("alice", "/clients/alice", "yes"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::IndexBuildFailed);
        assert_eq!(failure.stage, Stage::IndexRebuilt);
        assert!(!failure.error.is_validation());
        assert_eq!(fx.store_text(), "carol\nsecret\n");
        assert!(fx.config_text("alice").is_none());
        assert_eq!(fx.reloads(), 0);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_commit() {
        let fx = Fixture::with(false, true);
        let failure = fx
            .provisioner
            .provision(&request("alice", "/clients/alice", "yes"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::ReloadFailed);
        assert_eq!(failure.stage, Stage::Reloaded);
        assert_eq!(fx.store_text(), "alice\np@ss\n");
        assert!(fx.config_text("alice").is_some());
    }

    #[tokio::test]
    async fn test_config_write_failure() {
        let fx = Fixture::new();
        std::fs::remove_dir(fx.etc_dir.path().join("vsftpd_user_conf")).unwrap();

        let failure = fx
            .provisioner
            .provision(&request("alice", "/clients/alice", "yes"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::ConfigWriteFailed);
        assert_eq!(failure.stage, Stage::ConfigWritten);
        assert_eq!(fx.reloads(), 0);
    }

    #[tokio::test]
    async fn test_reload_disabled() {
        let fx = Fixture::new();
        let provisioner = Provisioner::new(
            Jail::new(fx.jail_dir.path()),
            fx.provisioner.store().clone(),
            AccountConfigWriter::new(
                fx.etc_dir.path().join("vsftpd_user_conf"),
                None,
                "chown",
                ToolRunner::unprivileged(Duration::from_secs(5)),
            ),
            None,
        );

        let report = provisioner
            .provision(&request("alice", "clients/alice", "no"))
            .await
            .unwrap();
        assert!(!report.reloaded);
        assert_eq!(fx.reloads(), 0);
        assert!(fx.config_text("alice").unwrap().contains("write_enable=NO"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_users() {
        let fx = Arc::new(Fixture::new());
        for i in 0..12 {
            std::fs::create_dir_all(fx.jail_dir.path().join(format!("clients/u{i}"))).unwrap();
        }

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let fx = fx.clone();
                tokio::spawn(async move {
                    fx.provisioner
                        .provision(&request(&format!("u{i}"), &format!("/clients/u{i}"), "yes"))
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result.unwrap().unwrap();
        }

        let store = fx.store_text();
        assert_eq!(store.lines().count(), 24);
        let last = fx.rebuilds().pop().unwrap();
        assert_eq!(last, store);
        for i in 0..12 {
            assert!(last.lines().any(|l| l == format!("u{i}")));
        }
        assert_eq!(fx.config_count(), 12);
        assert_eq!(fx.reloads(), 12);
    }

    #[test]
    fn test_timeout_kind() {
        let err = ProvisionError::Reload(ReloadError(ToolError::Timeout {
            command: "systemctl restart vsftpd".into(),
            after: Duration::from_secs(30),
        }));
        assert_eq!(err.kind(), ErrorKind::OperationTimeout);

        let err = ProvisionError::Store(StoreError::Timeout {
            path: PathBuf::from("/etc/vsftpd_virtual_users"),
            after: Duration::from_secs(30),
        });
        assert_eq!(err.kind(), ErrorKind::OperationTimeout);
    }

    #[test]
    fn test_from_config_respects_disabled_reload() {
        let mut config = ProvisionConfig::default();
        config.daemon.enabled = false;
        let provisioner = Provisioner::from_config(&config);
        assert!(provisioner.reloader.is_none());
        assert_eq!(provisioner.jail().root(), Path::new("/mnt/stgw/SFTP"));
    }
}
