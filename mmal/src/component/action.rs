// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The per-component action thread.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error};

use super::{Component, ComponentInner};
use crate::{Error, Result, sync::Semaphore};

/// Work run on a component's action thread, with its action lock held.
pub type ActionFn = Arc<dyn Fn(&Component) + Send + Sync>;

#[derive(Default)]
struct Signal {
    wake: Semaphore,
    stop: AtomicBool,
}

struct Worker {
    signal: Arc<Signal>,
    handle: JoinHandle<()>,
}

/// Action lock plus the optional action thread.
#[derive(Default)]
pub(crate) struct Action {
    lock: Mutex<()>,
    worker: Mutex<Option<Worker>>,
}

impl Action {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn register(&self, component: &Component, action: ActionFn) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            error!("{}: action already registered", component.name());
            return Err(Error::InvalidArg);
        }

        let signal = Arc::new(Signal::default());
        let weak = Arc::downgrade(&component.inner);
        let handle = {
            let signal = signal.clone();
            thread::Builder::new()
                .name(format!("{}:action", component.name()))
                .spawn(move || run(weak, signal, action))
                .map_err(|err| {
                    error!("{}: could not start action thread ({})", component.name(), err);
                    Error::OutOfMemory
                })?
        };
        *worker = Some(Worker { signal, handle });
        debug!("{}: action thread started", component.name());
        Ok(())
    }

    pub(crate) fn trigger(&self) -> Result<()> {
        match self.worker.lock().as_ref() {
            Some(worker) => {
                worker.signal.wake.post();
                Ok(())
            }
            None => Err(Error::InvalidArg),
        }
    }

    /// Stops the action thread. Returns `false` if none was registered.
    pub(crate) fn deregister(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        worker.signal.stop.store(true, Ordering::Release);
        worker.signal.wake.post();
        // The last handle on a component may be dropped by its own action.
        if worker.handle.thread().id() == thread::current().id() {
            return true;
        }
        if worker.handle.join().is_err() {
            error!("action thread panicked");
        }
        true
    }
}

fn run(component: Weak<ComponentInner>, signal: Arc<Signal>, action: ActionFn) {
    loop {
        signal.wake.wait();
        if signal.stop.load(Ordering::Acquire) {
            break;
        }
        let Some(inner) = component.upgrade() else {
            break;
        };
        let component = Component { inner };
        {
            let _lock = component.inner.shared.action.lock();
            action(&component);
        }
    }
}
