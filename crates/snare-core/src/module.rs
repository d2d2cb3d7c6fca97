//! Module status registry.
//!
//! Each listener registers its name, port, and state at startup. The
//! `/monitor` endpoint reads the registry; a bind failure shows up as
//! `status: "error"` without affecting other modules.

use std::sync::{Arc, RwLock};

use serde::Serialize;

/// Lifecycle state of a listener module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Running,
    Error,
    Disabled,
    Stopped,
}

/// One listener's status as reported by `/monitor`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub port: u16,
    pub status: ModuleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleStatus {
    pub fn running(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            port,
            status: ModuleState::Running,
            error: None,
        }
    }

    pub fn error(name: &str, port: u16, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            port,
            status: ModuleState::Error,
            error: Some(error.into()),
        }
    }

    pub fn disabled(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            port,
            status: ModuleState::Disabled,
            error: None,
        }
    }
}

/// Shared, cheaply-clonable view over all module statuses.
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Arc<RwLock<Vec<ModuleStatus>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the status entry for `status.name`.
    pub fn set(&self, status: ModuleStatus) {
        let mut modules = self.modules.write().expect("module registry lock");
        if let Some(existing) = modules.iter_mut().find(|m| m.name == status.name) {
            *existing = status;
        } else {
            modules.push(status);
        }
    }

    /// Mark every running module stopped (graceful shutdown).
    pub fn stop_all(&self) {
        let mut modules = self.modules.write().expect("module registry lock");
        for module in modules.iter_mut() {
            if module.status == ModuleState::Running {
                module.status = ModuleState::Stopped;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<ModuleStatus> {
        self.modules.read().expect("module registry lock").clone()
    }

    /// True when at least one module is accepting connections.
    pub fn any_running(&self) -> bool {
        self.modules
            .read()
            .expect("module registry lock")
            .iter()
            .any(|m| m.status == ModuleState::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_by_name() {
        let registry = ModuleRegistry::new();
        registry.set(ModuleStatus::error("http", 8080, "bind failed"));
        registry.set(ModuleStatus::running("http", 8080));

        let modules = registry.snapshot();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].status, ModuleState::Running);
        assert!(modules[0].error.is_none());
    }

    #[test]
    fn any_running_reflects_states() {
        let registry = ModuleRegistry::new();
        assert!(!registry.any_running());

        registry.set(ModuleStatus::disabled("mysql", 3306));
        registry.set(ModuleStatus::error("ftp", 21, "port in use"));
        assert!(!registry.any_running());

        registry.set(ModuleStatus::running("ssh", 2222));
        assert!(registry.any_running());
    }

    #[test]
    fn stop_all_only_touches_running() {
        let registry = ModuleRegistry::new();
        registry.set(ModuleStatus::running("ssh", 2222));
        registry.set(ModuleStatus::error("ftp", 21, "port in use"));

        registry.stop_all();
        let modules = registry.snapshot();
        assert_eq!(modules[0].status, ModuleState::Stopped);
        assert_eq!(modules[1].status, ModuleState::Error);
    }

    #[test]
    fn status_serializes_without_null_error() {
        let status = ModuleStatus::running("http", 8080);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"running\""));
        assert!(!json.contains("error"));
    }
}
