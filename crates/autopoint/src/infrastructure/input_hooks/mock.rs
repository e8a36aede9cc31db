//! Mock hook backend for unit testing.
//!
//! Allows tests to inject synthetic [`RawHookEvent`]s without a Windows
//! message loop, and to observe how often hooks were installed and removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::{DeviceClass, HookBackend, HookCallback, HookError, HookVerdict, RawHookEvent};

#[derive(Default)]
struct MockHookState {
    callbacks: Mutex<HashMap<DeviceClass, HookCallback>>,
    installs: AtomicU32,
    uninstalls: AtomicU32,
    fail_install: AtomicBool,
}

/// A mock implementation of [`HookBackend`].
///
/// Clones share state, so a test keeps one clone and boxes the other into
/// the manager.
#[derive(Clone, Default)]
pub struct MockHookBackend {
    state: Arc<MockHookState>,
}

impl MockHookBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `install` fail until reset with `false`.
    pub fn set_fail_install(&self, fail: bool) {
        self.state.fail_install.store(fail, Ordering::SeqCst);
    }

    /// Delivers `event` to the installed hook of its device class.
    ///
    /// Returns `None` when no hook is installed for that class, i.e. the OS
    /// would never have called us.
    pub fn inject(&self, event: RawHookEvent) -> Option<HookVerdict> {
        let callback = self
            .state
            .callbacks
            .lock()
            .expect("lock poisoned")
            .get(&event.device())
            .cloned()?;
        Some(callback(&event))
    }

    pub fn is_installed(&self, device: DeviceClass) -> bool {
        self.state
            .callbacks
            .lock()
            .expect("lock poisoned")
            .contains_key(&device)
    }

    pub fn install_count(&self) -> u32 {
        self.state.installs.load(Ordering::SeqCst)
    }

    pub fn uninstall_count(&self) -> u32 {
        self.state.uninstalls.load(Ordering::SeqCst)
    }
}

impl HookBackend for MockHookBackend {
    fn install(&mut self, device: DeviceClass, callback: HookCallback) -> Result<(), HookError> {
        if self.state.fail_install.load(Ordering::SeqCst) {
            return Err(HookError::InstallFailed {
                device,
                reason: "injected failure".to_string(),
            });
        }
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        self.state
            .callbacks
            .lock()
            .expect("lock poisoned")
            .insert(device, callback);
        Ok(())
    }

    fn uninstall(&mut self, device: DeviceClass) {
        let removed = self
            .state
            .callbacks
            .lock()
            .expect("lock poisoned")
            .remove(&device);
        if removed.is_some() {
            self.state.uninstalls.fetch_add(1, Ordering::SeqCst);
        }
    }
}
