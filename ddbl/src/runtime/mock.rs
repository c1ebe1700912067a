//! In-memory runtime that records every call.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};

use super::{ContainerRuntime, ContainerSpec, OutputStream};
use crate::error::RuntimeError;

#[derive(Default)]
pub(crate) struct MockRuntime {
    pub calls: Mutex<Vec<String>>,
    pub live: Mutex<HashSet<String>>,
    pub fail_kill: bool,
    pub fail_start: bool,
}

impl MockRuntime {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn insert(&self, id: &str) {
        self.live.lock().unwrap().insert(id.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("ensure_image {image}"));
        Ok(())
    }

    async fn create_container(&self, _spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record("create".to_string());
        self.insert("mock-1");
        Ok("mock-1".to_string())
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start {id}"));
        if self.fail_start {
            return Err(RuntimeError::Api("port is already allocated".into()));
        }
        Ok(())
    }

    async fn attach(&self, id: &str) -> Result<OutputStream, RuntimeError> {
        self.record(format!("attach {id}"));
        // Stays open like a running container's output.
        Ok(Box::pin(
            stream::iter(vec![Ok(b"Initializing DynamoDB Local\n".to_vec())])
                .chain(stream::pending()),
        ))
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("kill {id}"));
        if self.fail_kill {
            return Err(RuntimeError::Api("kill failed".into()));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove {id}"));
        if self.live.lock().unwrap().remove(id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(id.to_string()))
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, RuntimeError> {
        Ok(self.live.lock().unwrap().contains(id))
    }
}
