//! Lock controller (component H).

use crate::config::LockConfig;
use crate::error::{Error, ErrorKind};
use crate::runtime::{Controller, HandlerReply, HandlerSpec, Publisher};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Drives the actual actuator. The mock driver is an in-process bool; the
/// real driver writes `"0"`/`"1"` to a sysfs-style path, the way the
/// dummy-lock/real-lock split works in the original controller this is
/// grounded on.
trait LockDriver: Send + Sync {
    fn set_locked(&self, locked: bool) -> Result<(), Error>;
    fn is_locked(&self) -> bool;
}

/// In-memory mock lock. Owns the `was_open` persistent memory across taps,
/// since that state belongs to the shared actuator resource, not to any one
/// NFC session.
struct MockLockDriver {
    locked: AtomicBool,
}

impl MockLockDriver {
    fn new(default_locked: bool) -> Self {
        Self { locked: AtomicBool::new(default_locked) }
    }
}

impl LockDriver for MockLockDriver {
    fn set_locked(&self, locked: bool) -> Result<(), Error> {
        self.locked.store(locked, Ordering::SeqCst);
        info!("Lock: mock actuator now {}", if locked { "locked" } else { "unlocked" });
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// Writes `"0"`/`"1"` to a sysfs-style GPIO path, `active_low` inverting the
/// written bit for wiring that pulls the line low to engage the actuator.
struct GpioLockDriver {
    path: String,
    active_low: bool,
    locked: AtomicBool,
}

impl GpioLockDriver {
    fn new(path: String, active_low: bool, default_locked: bool) -> Self {
        Self { path, active_low, locked: AtomicBool::new(default_locked) }
    }

    fn line_value(&self, locked: bool) -> &'static str {
        if locked ^ self.active_low {
            "1"
        } else {
            "0"
        }
    }
}

impl LockDriver for GpioLockDriver {
    fn set_locked(&self, locked: bool) -> Result<(), Error> {
        std::fs::write(&self.path, self.line_value(locked))
            .map_err(|err| ErrorKind::Hardware(format!("writing {}: {err}", self.path)))?;
        self.locked.store(locked, Ordering::SeqCst);
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

fn build_driver(config: &LockConfig) -> Arc<dyn LockDriver> {
    if config.mock || config.gpio_path.is_empty() {
        Arc::new(MockLockDriver::new(config.default_locked))
    } else {
        Arc::new(GpioLockDriver::new(config.gpio_path.clone(), config.active_low, config.default_locked))
    }
}

pub struct LockController {
    driver: Arc<dyn LockDriver>,
    default_locked: bool,
    publisher: Mutex<Option<Publisher>>,
}

impl LockController {
    pub fn new(config: &LockConfig) -> Self {
        Self { driver: build_driver(config), default_locked: config.default_locked, publisher: Mutex::new(None) }
    }
}

/// `/lock` payload convention: non-zero means locked.
fn handle_lock(driver: &dyn LockDriver, payload: serde_json::Value) -> HandlerReply {
    let locked = payload.as_i64().unwrap_or(0) != 0;
    match driver.set_locked(locked) {
        Ok(()) => Some(serde_json::json!(i32::from(driver.is_locked()))),
        Err(err) => {
            warn!("Lock: set_locked failed: {err}");
            None
        }
    }
}

fn handle_lock_state(driver: &dyn LockDriver, _payload: serde_json::Value) -> HandlerReply {
    Some(serde_json::json!(i32::from(driver.is_locked())))
}

#[async_trait::async_trait]
impl Controller for LockController {
    fn handlers(&self) -> Vec<HandlerSpec> {
        let lock_driver = self.driver.clone();
        let state_driver = self.driver.clone();
        vec![
            HandlerSpec::new("/lock", move |payload| {
                let driver = lock_driver.clone();
                async move { handle_lock(driver.as_ref(), payload) }
            }),
            HandlerSpec::new("/lock/state", move |payload| {
                let driver = state_driver.clone();
                async move { handle_lock_state(driver.as_ref(), payload) }
            }),
        ]
    }

    async fn set_publisher(&self, publisher: Publisher) {
        *self.publisher.lock().await = Some(publisher);
    }

    async fn initialize(&self) -> Result<(), Error> {
        self.driver.set_locked(self.default_locked)?;
        info!("Lock: initialized, default {}", if self.default_locked { "locked" } else { "unlocked" });
        Ok(())
    }

    async fn uninitialize(&self) {
        info!("Lock: uninitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_driver_starts_at_its_configured_default() {
        let driver = MockLockDriver::new(true);
        assert!(driver.is_locked());
    }

    #[test]
    fn lock_handler_reports_the_new_state() {
        let driver = MockLockDriver::new(false);
        let reply = handle_lock(&driver, serde_json::json!(1)).unwrap();
        assert_eq!(reply, serde_json::json!(1));
        assert!(driver.is_locked());
    }

    #[test]
    fn zero_payload_unlocks() {
        let driver = MockLockDriver::new(true);
        let reply = handle_lock(&driver, serde_json::json!(0)).unwrap();
        assert_eq!(reply, serde_json::json!(0));
        assert!(!driver.is_locked());
    }

    #[test]
    fn gpio_driver_inverts_the_line_for_active_low_wiring() {
        let driver = GpioLockDriver::new(String::new(), true, false);
        assert_eq!(driver.line_value(true), "0");
        assert_eq!(driver.line_value(false), "1");
    }

    #[tokio::test]
    async fn lock_state_handler_reflects_driver_state_without_mutating_it() {
        let driver = MockLockDriver::new(true);
        let reply = handle_lock_state(&driver, serde_json::Value::Null).unwrap();
        assert_eq!(reply, serde_json::json!(1));
        assert!(driver.is_locked());
    }
}
