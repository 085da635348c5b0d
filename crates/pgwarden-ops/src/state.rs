// ABOUTME: Copies the local state file to and from object storage.
// ABOUTME: Lets a fresh host pick up the record history of the one it replaces.

use tracing::info;

use crate::context::{Context, object_key};
use crate::error::LifecycleError;

pub struct StateSync<'a> {
    ctx: &'a Context,
}

impl<'a> StateSync<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Object key the state file is stored under.
    pub fn key(&self) -> Result<String, LifecycleError> {
        let file_name = self
            .ctx
            .settings
            .state_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                LifecycleError::NotFound(format!(
                    "file name in {}",
                    self.ctx.settings.state_file.display()
                ))
            })?;
        Ok(object_key("", &file_name))
    }

    pub fn push(&self) -> Result<String, LifecycleError> {
        let local = &self.ctx.settings.state_file;
        if !self.ctx.fs.exists(local) {
            return Err(LifecycleError::NotFound(format!("state file {}", local.display())));
        }
        let key = self.key()?;
        let bytes = self.ctx.storage.put(&key, local)?;
        info!(%key, bytes, "state pushed");
        Ok(key)
    }

    /// Download the state file. An existing local file is never overwritten.
    pub fn pull(&self) -> Result<String, LifecycleError> {
        let local = &self.ctx.settings.state_file;
        if self.ctx.fs.exists(local) {
            return Err(LifecycleError::AlreadyExists(local.clone()));
        }
        let key = self.key()?;
        let bytes = self.ctx.storage.get(&key, local)?;
        info!(%key, bytes, "state pulled");
        Ok(key)
    }
}
