//! Status reporting and cooperative cancellation
//!
//! The status service is the only object a harvest run shares with other
//! tasks. An operator (or the Ctrl-C handler) requests an interrupt from the
//! outside; the run polls for it at commits, record boundaries and sweep
//! pages.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::{HarvestError, HarvestResult};

pub trait StatusService: Send + Sync {
    /// Fail with [`HarvestError::Interrupted`] if an interrupt was requested
    fn check_interrupt(&self, service_id: &str) -> HarvestResult<()>;

    fn request_interrupt(&self, service_id: &str);

    fn set_status_text(&self, service_id: &str, message: &str);

    /// Set the status text and also keep it in the service's status log
    fn set_status_text_and_log(&self, service_id: &str, message: &str);

    /// Record a non-fatal per-record problem
    fn report_problem(&self, message: &str);

    /// Problems reported so far, oldest first
    fn problems(&self) -> Vec<String>;

    /// Drain the problem list, oldest first
    fn take_problems(&self) -> Vec<String>;

    /// Flag that a payload of this service could not be analyzed
    fn signal_rdf_error(&self, service_id: &str);
}

#[derive(Debug, Default, Clone)]
struct ServiceStatus {
    text: Option<String>,
    log: Vec<String>,
    interrupt_requested: bool,
    rdf_error: bool,
}

#[derive(Debug, Default)]
struct StatusState {
    services: HashMap<String, ServiceStatus>,
    problems: Vec<String>,
}

/// In-process status service that mirrors everything to `tracing`
#[derive(Debug, Default)]
pub struct TracingStatusService {
    state: Mutex<StatusState>,
}

impl TracingStatusService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusState> {
        // a panic while holding the lock leaves plain data behind, still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status_text(&self, service_id: &str) -> Option<String> {
        self.lock()
            .services
            .get(service_id)
            .and_then(|s| s.text.clone())
    }

    pub fn status_log(&self, service_id: &str) -> Vec<String> {
        self.lock()
            .services
            .get(service_id)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    pub fn has_rdf_error(&self, service_id: &str) -> bool {
        self.lock()
            .services
            .get(service_id)
            .is_some_and(|s| s.rdf_error)
    }

    /// Forget a previous interrupt request, e.g. before starting a new run
    pub fn clear_interrupt(&self, service_id: &str) {
        if let Some(status) = self.lock().services.get_mut(service_id) {
            status.interrupt_requested = false;
        }
    }
}

impl StatusService for TracingStatusService {
    fn check_interrupt(&self, service_id: &str) -> HarvestResult<()> {
        let requested = self
            .lock()
            .services
            .get(service_id)
            .is_some_and(|s| s.interrupt_requested);
        if requested {
            warn!(service_id, "Interrupt requested, aborting harvest");
            return Err(HarvestError::Interrupted {
                service_id: service_id.to_string(),
            });
        }
        Ok(())
    }

    fn request_interrupt(&self, service_id: &str) {
        info!(service_id, "Interrupt requested");
        self.lock()
            .services
            .entry(service_id.to_string())
            .or_default()
            .interrupt_requested = true;
    }

    fn set_status_text(&self, service_id: &str, message: &str) {
        debug!(service_id, "{}", message);
        self.lock()
            .services
            .entry(service_id.to_string())
            .or_default()
            .text = Some(message.to_string());
    }

    fn set_status_text_and_log(&self, service_id: &str, message: &str) {
        info!(service_id, "{}", message);
        let mut state = self.lock();
        let status = state.services.entry(service_id.to_string()).or_default();
        status.text = Some(message.to_string());
        status.log.push(message.to_string());
    }

    fn report_problem(&self, message: &str) {
        warn!(problem = message, "Harvest problem");
        self.lock().problems.push(message.to_string());
    }

    fn problems(&self) -> Vec<String> {
        self.lock().problems.clone()
    }

    fn take_problems(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().problems)
    }

    fn signal_rdf_error(&self, service_id: &str) {
        warn!(service_id, "RDF error signalled");
        self.lock()
            .services
            .entry(service_id.to_string())
            .or_default()
            .rdf_error = true;
    }
}
