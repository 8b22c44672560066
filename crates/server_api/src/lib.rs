use std::sync::Arc;

use shared::error::ApiError;
use storage::{EventStore, GroupStore, Storage};
use tracing::error;

pub mod events;
pub mod groups;
pub mod validators;

pub use events::{create_event, delete_event, get_event, list_events, update_event};
pub use groups::{create_group, delete_group, get_group, list_groups, update_group};
pub use validators::{
    EventValidator, GroupValidator, SchemaEventValidator, StoreGroupValidator, ValidationError,
};

/// Everything a controller operation needs, injected once at startup.
#[derive(Clone)]
pub struct ApiContext {
    pub groups: Arc<dyn GroupStore>,
    pub events: Arc<dyn EventStore>,
    pub group_validator: Arc<dyn GroupValidator>,
    pub event_validator: Arc<dyn EventValidator>,
    /// When false, internal failures reach the caller as the operation
    /// context only; the cause is still logged.
    pub expose_internal_errors: bool,
}

impl ApiContext {
    /// Wires both collections and the default validators to one storage handle.
    pub fn from_storage(storage: Storage) -> Self {
        let storage = Arc::new(storage);
        let groups: Arc<dyn GroupStore> = storage.clone();
        let events: Arc<dyn EventStore> = storage;
        Self {
            group_validator: Arc::new(StoreGroupValidator::new(groups.clone())),
            event_validator: Arc::new(SchemaEventValidator),
            groups,
            events,
            expose_internal_errors: true,
        }
    }

    pub fn with_expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    pub(crate) fn internal(&self, context: &str, err: &anyhow::Error) -> ApiError {
        error!(error = %format!("{err:#}"), "{context}");
        if self.expose_internal_errors {
            ApiError::internal(format!("{context}: {err:#}"))
        } else {
            ApiError::internal(context)
        }
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod support;
