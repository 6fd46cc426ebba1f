//! Recording container runtime for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use super::runtime::{ContainerRuntime, ContainerSpec, ExecOutput, RuntimeError};
use super::SandboxStatus;

pub enum ExecScript {
    Output(ExecOutput),
    Timeout,
}

/// Records every call; containers live in a map keyed by id.
pub struct FakeRuntime {
    calls: StdMutex<Vec<String>>,
    containers: StdMutex<HashMap<String, SandboxStatus>>,
    names: StdMutex<HashMap<String, String>>,
    script: StdMutex<ExecScript>,
    created: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            containers: StdMutex::new(HashMap::new()),
            names: StdMutex::new(HashMap::new()),
            script: StdMutex::new(ExecScript::Output(ExecOutput {
                stdout: "ok\n".into(),
                stderr: String::new(),
                exit_code: 0,
            })),
            created: AtomicUsize::new(0),
        })
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_status(&self, id: &str, status: SandboxStatus) {
        self.containers.lock().unwrap().insert(id.into(), status);
    }

    pub fn script(&self, script: ExecScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn vanish(&self, id: &str) {
        self.containers.lock().unwrap().remove(id);
    }

    fn known(&self, id: &str) -> Result<(), RuntimeError> {
        if self.containers.lock().unwrap().contains_key(id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(id.into()))
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn find_by_name(&self, name: &str) -> Result<Option<String>, RuntimeError> {
        self.record(format!("find {name}"));
        Ok(self.names.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(format!("create {}", spec.name));
        let id = format!("c{}", self.created.fetch_add(1, Ordering::SeqCst));
        self.names.lock().unwrap().insert(spec.name.clone(), id.clone());
        self.set_status(&id, SandboxStatus::Created);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start {id}"));
        self.known(id)?;
        self.set_status(id, SandboxStatus::Running);
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("stop {id}"));
        self.known(id)?;
        self.set_status(id, SandboxStatus::Stopped);
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.record(format!("remove {id} force={force}"));
        self.known(id)?;
        self.vanish(id);
        self.names.lock().unwrap().retain(|_, v| v != id);
        Ok(())
    }

    async fn inspect_status(&self, id: &str) -> Result<SandboxStatus, RuntimeError> {
        self.record(format!("inspect {id}"));
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .ok_or_else(|| RuntimeError::NotFound(id.into()))
    }

    async fn exec(
        &self,
        id: &str,
        argv: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        self.record(format!("exec {id} {}", argv.join(" ")));
        self.known(id)?;
        match &*self.script.lock().unwrap() {
            ExecScript::Output(out) => Ok(out.clone()),
            ExecScript::Timeout => Err(RuntimeError::Timeout(timeout)),
        }
    }
}
