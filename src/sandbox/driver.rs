//! Sandbox driver: per-project container lifecycle and command execution.
//!
//! Each project's handle sits behind its own async mutex, so lifecycle
//! transitions for one project are serialized while different projects
//! proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::languages::{shell_quote, Language};
use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, RuntimeError};
use super::{container_name, SandboxError, SandboxHandle, SandboxResult, SandboxStatus};
use crate::config::SandboxConfig;
use crate::store::Project;
use crate::workspace::{normalize, WorkspaceError};

type Slot = Arc<Mutex<Option<SandboxHandle>>>;

pub struct SandboxDriver {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SandboxDriver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: SandboxConfig) -> Self {
        Self {
            runtime,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, project_id: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(project_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Stored handle, without polling the runtime.
    pub async fn handle(&self, project_id: &str) -> Option<SandboxHandle> {
        let slot = self.slot(project_id).await;
        let handle = slot.lock().await.clone();
        handle
    }

    /// Create a fresh idle container for the project, force-removing any
    /// existing container with the same derived name first.
    pub async fn provision(&self, project: &Project) -> SandboxResult<SandboxHandle> {
        let slot = self.slot(&project.id).await;
        let mut stored = slot.lock().await;

        let name = container_name(&project.id, &project.title);
        if let Some(existing) = self.runtime.find_by_name(&name).await? {
            info!(container = %existing, %name, "removing existing sandbox before provisioning");
            match self.runtime.remove(&existing, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        tokio::fs::create_dir_all(&project.root)
            .await
            .map_err(|source| io_error(project, source))?;
        let host_dir = tokio::fs::canonicalize(&project.root)
            .await
            .map_err(|source| io_error(project, source))?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: project
                .image
                .clone()
                .unwrap_or_else(|| self.config.image.clone()),
            host_dir,
            mount_point: self.config.mount_point.clone(),
            working_dir: self.config.working_dir.clone(),
            env: vec![
                ("PROJECT_ID".into(), project.id.clone()),
                ("PROJECT_TITLE".into(), project.title.clone()),
            ],
            command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
        };
        let container_id = self.runtime.create(&spec).await?;

        let handle = SandboxHandle {
            container_id,
            status: SandboxStatus::Created,
            created_at: Utc::now(),
        };
        info!(
            project = %project.id,
            container = %handle.container_id,
            %name,
            "sandbox provisioned"
        );
        *stored = Some(handle.clone());
        Ok(handle)
    }

    /// Adopt a container provisioned earlier (e.g. by another process).
    pub async fn attach(&self, project: &Project) -> SandboxResult<Option<SandboxHandle>> {
        let slot = self.slot(&project.id).await;
        let mut stored = slot.lock().await;

        let name = container_name(&project.id, &project.title);
        let Some(container_id) = self.runtime.find_by_name(&name).await? else {
            *stored = None;
            return Ok(None);
        };
        let status = match self.runtime.inspect_status(&container_id).await {
            Ok(status) => status,
            Err(RuntimeError::NotFound(_)) => {
                *stored = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let handle = SandboxHandle {
            container_id,
            status,
            created_at: Utc::now(),
        };
        info!(project = %project.id, container = %handle.container_id, %status, "sandbox attached");
        *stored = Some(handle.clone());
        Ok(Some(handle))
    }

    pub async fn start(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        self.transition(project_id, SandboxStatus::Running).await
    }

    pub async fn stop(&self, project_id: &str) -> SandboxResult<SandboxHandle> {
        self.transition(project_id, SandboxStatus::Stopped).await
    }

    async fn transition(
        &self,
        project_id: &str,
        target: SandboxStatus,
    ) -> SandboxResult<SandboxHandle> {
        let slot = self.slot(project_id).await;
        let mut stored = slot.lock().await;
        let Some(handle) = stored.as_mut() else {
            return Err(no_sandbox(project_id));
        };

        let result = match target {
            SandboxStatus::Running => self.runtime.start(&handle.container_id).await,
            _ => self.runtime.stop(&handle.container_id).await,
        };
        match result {
            Ok(()) => {
                handle.status = target;
                info!(
                    project = %project_id,
                    container = %handle.container_id,
                    status = %target,
                    "sandbox transition"
                );
                Ok(handle.clone())
            }
            Err(RuntimeError::NotFound(id)) => {
                warn!(project = %project_id, container = %id, "sandbox vanished; clearing handle");
                *stored = None;
                Err(no_sandbox(project_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Poll the runtime, reconcile the stored status, and return the handle.
    /// `None` when there is no sandbox (a vanished container clears the handle).
    pub async fn status(&self, project_id: &str) -> SandboxResult<Option<SandboxHandle>> {
        let slot = self.slot(project_id).await;
        let mut stored = slot.lock().await;
        self.refresh(project_id, &mut *stored).await
    }

    async fn refresh(
        &self,
        project_id: &str,
        stored: &mut Option<SandboxHandle>,
    ) -> SandboxResult<Option<SandboxHandle>> {
        let Some(handle) = stored.as_mut() else {
            return Ok(None);
        };
        match self.runtime.inspect_status(&handle.container_id).await {
            Ok(actual) => {
                if actual != handle.status {
                    info!(
                        project = %project_id,
                        container = %handle.container_id,
                        stored = %handle.status,
                        %actual,
                        "reconciling sandbox status"
                    );
                    handle.status = actual;
                }
                Ok(Some(handle.clone()))
            }
            Err(RuntimeError::NotFound(_)) => {
                warn!(project = %project_id, "sandbox not found; clearing handle");
                *stored = None;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop (if running) and remove the container. A container that is
    /// already gone counts as removed.
    pub async fn remove(&self, project_id: &str) -> SandboxResult<()> {
        let slot = self.slot(project_id).await;
        let mut stored = slot.lock().await;
        let Some(handle) = stored.clone() else {
            return Ok(());
        };

        let running = matches!(
            self.runtime.inspect_status(&handle.container_id).await,
            Ok(SandboxStatus::Running)
        );
        if running {
            match self.runtime.stop(&handle.container_id).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        match self.runtime.remove(&handle.container_id, false).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(project = %project_id, container = %handle.container_id, "sandbox removed");
        *stored = None;
        Ok(())
    }

    /// Run a workspace file inside the running sandbox.
    ///
    /// The extension and path are checked before the runtime is contacted.
    /// A non-zero exit is returned as output; only a timeout is an error.
    pub async fn exec(&self, project_id: &str, path: &str) -> SandboxResult<ExecOutput> {
        let language = Language::for_path(path).ok_or_else(|| SandboxError::UnsupportedFileType {
            path: path.to_string(),
        })?;
        let normalized = normalize(path)?;
        if normalized.is_empty() {
            return Err(WorkspaceError::IsADirectory { path: path.into() }.into());
        }

        let container_path = format!(
            "{}/{}",
            self.config.mount_point.trim_end_matches('/'),
            normalized
        );
        let command = language.command(&container_path);
        info!(
            project = %project_id,
            language = language.name(),
            %command,
            "executing file in sandbox"
        );
        self.run_in_shell(project_id, command, self.config.exec_timeout_secs)
            .await
    }

    /// `pip install` space-separated package specs in the running sandbox.
    pub async fn install_packages(
        &self,
        project_id: &str,
        packages: &str,
    ) -> SandboxResult<ExecOutput> {
        let specs = parse_packages(packages)?;
        let command = format!(
            "pip install {}",
            specs
                .iter()
                .map(|s| shell_quote(s))
                .collect::<Vec<_>>()
                .join(" ")
        );
        info!(project = %project_id, %command, "installing packages in sandbox");
        self.run_in_shell(project_id, command, self.config.install_timeout_secs)
            .await
    }

    async fn run_in_shell(
        &self,
        project_id: &str,
        command: String,
        timeout_secs: u64,
    ) -> SandboxResult<ExecOutput> {
        let slot = self.slot(project_id).await;
        let mut stored = slot.lock().await;
        let handle = self
            .refresh(project_id, &mut *stored)
            .await?
            .ok_or_else(|| no_sandbox(project_id))?;
        if handle.status != SandboxStatus::Running {
            return Err(SandboxError::NotRunning {
                status: handle.status,
            });
        }

        let argv = vec![self.config.shell.clone(), "-c".into(), command];
        let timeout = std::time::Duration::from_secs(timeout_secs);
        match self.runtime.exec(&handle.container_id, &argv, timeout).await {
            Ok(output) => {
                info!(
                    project = %project_id,
                    exit_code = output.exit_code,
                    "sandbox command finished"
                );
                Ok(output)
            }
            Err(RuntimeError::Timeout(_)) => {
                warn!(project = %project_id, timeout_secs, "sandbox command timed out");
                Err(SandboxError::Timeout { secs: timeout_secs })
            }
            Err(RuntimeError::NotFound(_)) => {
                *stored = None;
                Err(no_sandbox(project_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn no_sandbox(project_id: &str) -> SandboxError {
    SandboxError::NoSandbox {
        project_id: project_id.to_string(),
    }
}

fn io_error(project: &Project, source: std::io::Error) -> SandboxError {
    WorkspaceError::Io {
        path: project.root.display().to_string(),
        source,
    }
    .into()
}

/// Split and check package specs. Only package-spec characters are allowed
/// and options (leading `-`) are refused.
fn parse_packages(packages: &str) -> SandboxResult<Vec<String>> {
    let specs: Vec<String> = packages.split_whitespace().map(str::to_string).collect();
    if specs.is_empty() {
        return Err(SandboxError::InvalidPackage("no packages given".into()));
    }
    for spec in &specs {
        let valid = !spec.starts_with('-')
            && spec
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_.=<>!~[],+".contains(c));
        if !valid {
            return Err(SandboxError::InvalidPackage(spec.clone()));
        }
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sandbox::testing::{ExecScript, FakeRuntime};

    fn project(dir: &tempfile::TempDir) -> Project {
        Project {
            id: "7".into(),
            title: "Demo App".into(),
            root: dir.path().to_path_buf(),
            image: None,
        }
    }

    fn driver(runtime: &Arc<FakeRuntime>) -> SandboxDriver {
        SandboxDriver::new(runtime.clone(), SandboxConfig::default())
    }

    async fn running(runtime: &Arc<FakeRuntime>, dir: &tempfile::TempDir) -> SandboxDriver {
        let driver = driver(runtime);
        driver.provision(&project(dir)).await.unwrap();
        driver.start("7").await.unwrap();
        driver
    }

    #[tokio::test]
    async fn provision_creates_idle_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = driver(&runtime);

        let handle = driver.provision(&project(&dir)).await.unwrap();
        assert_eq!(handle.status, SandboxStatus::Created);
        assert!(runtime
            .calls()
            .contains(&"create project_7_demo_app".to_string()));
        assert_eq!(driver.handle("7").await, Some(handle));
    }

    #[tokio::test]
    async fn provision_replaces_existing_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = driver(&runtime);

        let first = driver.provision(&project(&dir)).await.unwrap();
        let second = driver.provision(&project(&dir)).await.unwrap();

        assert_ne!(first.container_id, second.container_id);
        let removal = format!("remove {} force=true", first.container_id);
        assert!(runtime.calls().contains(&removal));
    }

    #[tokio::test]
    async fn exec_runs_language_command_in_shell() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;

        let out = driver.exec("7", "src/main.py").await.unwrap();
        assert_eq!(out.stdout, "ok\n");

        let id = driver.handle("7").await.unwrap().container_id;
        let expected = format!("exec {id} bash -c python /app/data/src/main.py");
        assert!(runtime.calls().contains(&expected), "{:?}", runtime.calls());
    }

    #[tokio::test]
    async fn unsupported_extension_never_contacts_runtime() {
        let runtime = FakeRuntime::new();
        let driver = driver(&runtime);

        let err = driver.exec("7", "readme.md").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFileType);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn stopped_sandbox_refuses_exec() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        driver.stop("7").await.unwrap();

        let err = driver.exec("7", "main.py").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SandboxNotRunning);
        assert!(!runtime.calls().iter().any(|c| c.starts_with("exec")));
    }

    #[tokio::test]
    async fn escaping_path_is_rejected() {
        let runtime = FakeRuntime::new();
        let driver = driver(&runtime);

        let err = driver.exec("7", "../other/main.py").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathEscape);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_its_own_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        runtime.script(ExecScript::Timeout);

        let err = driver.exec("7", "loop.py").await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { secs: 30 }));
        assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
    }

    #[tokio::test]
    async fn nonzero_exit_is_output_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        runtime.script(ExecScript::Output(ExecOutput {
            stdout: String::new(),
            stderr: "Traceback".into(),
            exit_code: 1,
        }));

        let out = driver.exec("7", "main.py").await.unwrap();
        assert!(!out.success());
        assert_eq!(out.stderr, "Traceback");
    }

    #[tokio::test]
    async fn status_reconciles_drift() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        let id = driver.handle("7").await.unwrap().container_id;

        runtime.set_status(&id, SandboxStatus::Stopped);
        let handle = driver.status("7").await.unwrap().unwrap();
        assert_eq!(handle.status, SandboxStatus::Stopped);
        assert_eq!(driver.handle("7").await.unwrap().status, SandboxStatus::Stopped);
    }

    #[tokio::test]
    async fn vanished_container_clears_handle() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        let id = driver.handle("7").await.unwrap().container_id;

        runtime.vanish(&id);
        assert!(driver.status("7").await.unwrap().is_none());
        assert!(driver.handle("7").await.is_none());

        let before = runtime.calls().len();
        let err = driver.start("7").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSandbox);
        assert_eq!(runtime.calls().len(), before);
    }

    #[tokio::test]
    async fn start_on_vanished_container_clears_handle() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = driver(&runtime);
        let handle = driver.provision(&project(&dir)).await.unwrap();
        runtime.vanish(&handle.container_id);

        let err = driver.start("7").await.unwrap_err();
        assert!(matches!(err, SandboxError::NoSandbox { .. }));
        assert!(driver.handle("7").await.is_none());
    }

    #[tokio::test]
    async fn remove_stops_running_then_removes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        let id = driver.handle("7").await.unwrap().container_id;

        driver.remove("7").await.unwrap();
        let calls = runtime.calls();
        let stop = calls.iter().rposition(|c| c == &format!("stop {id}")).unwrap();
        let remove = calls
            .iter()
            .position(|c| c == &format!("remove {id} force=false"))
            .unwrap();
        assert!(stop < remove);
        assert!(driver.handle("7").await.is_none());

        // Nothing left: still fine.
        driver.remove("7").await.unwrap();
    }

    #[tokio::test]
    async fn remove_tolerates_missing_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = driver(&runtime);
        let handle = driver.provision(&project(&dir)).await.unwrap();
        runtime.vanish(&handle.container_id);

        driver.remove("7").await.unwrap();
        assert!(driver.handle("7").await.is_none());
    }

    #[tokio::test]
    async fn attach_adopts_existing_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let first = running(&runtime, &dir).await;
        let id = first.handle("7").await.unwrap().container_id;

        let second = driver(&runtime);
        let handle = second.attach(&project(&dir)).await.unwrap().unwrap();
        assert_eq!(handle.container_id, id);
        assert_eq!(handle.status, SandboxStatus::Running);
    }

    #[tokio::test]
    async fn install_packages_quotes_specs() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;
        let id = driver.handle("7").await.unwrap().container_id;

        driver.install_packages("7", "numpy pandas>=2").await.unwrap();
        let expected = format!("exec {id} bash -c pip install numpy 'pandas>=2'");
        assert!(runtime.calls().contains(&expected), "{:?}", runtime.calls());
    }

    #[tokio::test]
    async fn install_packages_rejects_shell_metacharacters() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let driver = running(&runtime, &dir).await;

        for bad in ["numpy; rm -rf /", "$(whoami)", "--index-url=http://evil", "   "] {
            let err = driver.install_packages("7", bad).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArguments, "{bad}");
        }
        assert!(!runtime.calls().iter().any(|c| c.starts_with("exec")));
    }
}
