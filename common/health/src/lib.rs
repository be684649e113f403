use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Health reporting for the components of a service.
///
/// Each long-running loop registers itself with a deadline and must report
/// healthy more often than that deadline, otherwise the component (and with it
/// the whole process) is considered stalled and the liveness probe fails.
///
/// Liveness and readiness are deliberately not merged into one state; a probe
/// should get its own registry instance.

#[derive(Debug, Default)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy.
    pub healthy: bool,
    /// Current status of each registered component, for display.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Automatically set when a component is newly registered.
    Starting,
    /// Recently reported healthy, will need to report again before the date.
    HealthyUntil(DateTime<Utc>),
    /// Reported unhealthy.
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => *until > Utc::now(),
            _ => false,
        }
    }
}

type ComponentMap = Arc<RwLock<HashMap<String, ComponentStatus>>>;

/// A handle passed to a component so it can report its own health.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: ComponentMap,
}

impl HealthHandle {
    /// Report healthy. Must be called more frequently than the registered deadline.
    pub fn report_healthy(&self) {
        let until = Utc::now()
            + chrono::Duration::from_std(self.deadline).unwrap_or(chrono::Duration::zero());
        self.report_status(ComponentStatus::HealthyUntil(until));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(_) => warn!(
                component = self.component,
                "health registry lock poisoned, dropping report"
            ),
        }
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: ComponentMap,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            components: Default::default(),
        }
    }

    /// Register a component under the given name. It starts in `Starting` and
    /// must report healthy at least once per `deadline` from then on.
    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_string(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Compute the overall status from the latest component reports.
    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components.clone(),
            Err(_) => {
                warn!(registry = self.name, "health registry lock poisoned");
                return HealthStatus::default();
            }
        };

        let healthy = !components.is_empty() && components.values().all(|c| c.is_healthy());

        HealthStatus {
            healthy,
            components,
        }
    }
}
