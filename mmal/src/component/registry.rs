// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide table of component constructors.

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::Component;
use crate::{Error, Result};

/// Builds a component. Receives the name it was looked up with.
pub type Constructor = Arc<dyn Fn(&str) -> Result<Component> + Send + Sync>;

static REGISTRY: LazyLock<Mutex<HashMap<String, Constructor>>> = LazyLock::new(Default::default);

/// Registers a constructor under `name`, replacing any previous one.
pub fn register<F>(name: &str, constructor: F)
where
    F: Fn(&str) -> Result<Component> + Send + Sync + 'static,
{
    debug!("registering component {}", name);
    REGISTRY
        .lock()
        .insert(name.to_string(), Arc::new(constructor));
}

/// Removes the constructor registered under `name`.
pub fn unregister(name: &str) -> bool {
    REGISTRY.lock().remove(name).is_some()
}

impl Component {
    /// Creates a component from the constructor registered under `name`.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if nothing is registered under `name`, or the
    /// constructor's error.
    pub fn create(name: &str) -> Result<Component> {
        let constructor = REGISTRY.lock().get(name).cloned();
        let Some(constructor) = constructor else {
            error!("no component registered as {}", name);
            return Err(Error::NotSupported);
        };
        constructor(name)
    }
}
