//! Served control variables.
//!
//! Every variable sits behind its own mutex, so writes to different
//! variables never contend. A successful write broadcasts the new state to
//! every subscriber before returning.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pvsim_core::{ControlVariable, Dtype, ModelError, ScalarValue};
use pvsim_protocol::VariableUpdate;
use pvsim_providers::{ClientError, VariableClient};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors returned by the write handler.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Invalid value for {name}: {source}")]
    InvalidValue {
        name: String,
        #[source]
        source: ModelError,
    },
}

impl WriteError {
    /// Status code reported to WebSocket clients.
    pub fn status_code(&self) -> u16 {
        match self {
            WriteError::UnknownVariable(_) => 404,
            WriteError::InvalidValue { .. } => 400,
        }
    }
}

/// One served variable.
#[derive(Debug)]
pub struct SharedVariable {
    name: String,
    dtype: Dtype,
    state: Mutex<ControlVariable>,
    updates: broadcast::Sender<VariableUpdate>,
}

impl SharedVariable {
    pub fn new(
        name: impl Into<String>,
        dtype: Dtype,
        initial: ControlVariable,
        updates: broadcast::Sender<VariableUpdate>,
    ) -> Self {
        Self {
            name: name.into(),
            dtype,
            state: Mutex::new(initial),
            updates,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Current state of the variable.
    pub fn snapshot(&self) -> ControlVariable {
        self.lock().clone()
    }

    /// Write handler: coerce, overwrite, stamp and broadcast.
    pub fn put(&self, value: &Value) -> Result<ControlVariable, WriteError> {
        let value =
            ScalarValue::coerce(self.dtype, value).map_err(|source| WriteError::InvalidValue {
                name: self.name.clone(),
                source,
            })?;

        let mut state = self.lock();
        state.update(value);
        let snapshot = state.clone();

        // Sent under the lock so subscribers see writes in order
        let receivers = self
            .updates
            .send(VariableUpdate {
                name: self.name.clone(),
                variable: snapshot.clone(),
            })
            .unwrap_or(0);
        debug!("{} = {} ({} subscribers)", self.name, snapshot.value, receivers);

        Ok(snapshot)
    }

    fn lock(&self) -> MutexGuard<'_, ControlVariable> {
        // A panic while holding the lock cannot leave the variable half written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The name → variable map served to clients.
#[derive(Debug)]
pub struct Variables {
    map: BTreeMap<String, Arc<SharedVariable>>,
    updates: broadcast::Sender<VariableUpdate>,
}

impl Variables {
    pub fn new(updates: broadcast::Sender<VariableUpdate>) -> Self {
        Self {
            map: BTreeMap::new(),
            updates,
        }
    }

    /// Add a variable sharing this map's update channel.
    pub fn insert(&mut self, name: impl Into<String>, dtype: Dtype, initial: ControlVariable) {
        let name = name.into();
        let variable = SharedVariable::new(name.clone(), dtype, initial, self.updates.clone());
        self.map.insert(name, Arc::new(variable));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SharedVariable>> {
        self.map.get(name)
    }

    pub fn snapshot(&self, name: &str) -> Result<ControlVariable, WriteError> {
        self.get(name)
            .map(|variable| variable.snapshot())
            .ok_or_else(|| WriteError::UnknownVariable(name.to_string()))
    }

    pub fn put(&self, name: &str, value: &Value) -> Result<ControlVariable, WriteError> {
        self.get(name)
            .ok_or_else(|| WriteError::UnknownVariable(name.to_string()))?
            .put(value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<SharedVariable>)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Receive every update broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VariableUpdate> {
        self.updates.subscribe()
    }
}

/// In-process [`VariableClient`] that calls the write handler directly.
#[derive(Debug, Clone)]
pub struct LocalClient {
    variables: Arc<Variables>,
}

impl LocalClient {
    pub fn new(variables: Arc<Variables>) -> Self {
        Self { variables }
    }
}

impl VariableClient for LocalClient {
    fn put(&self, name: &str, value: Value) -> Result<(), ClientError> {
        match self.variables.put(name, &value) {
            Ok(_) => Ok(()),
            Err(WriteError::UnknownVariable(name)) => Err(ClientError::UnknownVariable(name)),
            Err(e @ WriteError::InvalidValue { .. }) => Err(ClientError::Rejected {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}
