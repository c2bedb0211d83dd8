//! Test infrastructure gate.
//!
//! Tasks whose verify command needs a running stack are gated on
//! [`InfraGate::ensure`]. The started stack is an explicit [`InfraSession`]
//! value; its teardown runs exactly once, whether the run returns, errors,
//! unwinds, or is interrupted with Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, info, instrument, warn};

use crate::core::infra_detect::requires_infra;
use crate::core::plan_record::TaskRecord;
use crate::error::ConductorError;
use crate::io::clock::Clock;
use crate::io::config::{HealthCheck, InfraConfig};
use crate::io::infra_backend::InfraBackend;

type Hook = Box<dyn Fn() + Send + Sync>;

/// Callbacks run by the interrupt handler before the process exits.
#[derive(Clone, Default)]
pub struct ExitHooks {
    hooks: Arc<Mutex<Vec<Hook>>>,
}

impl ExitHooks {
    pub fn register(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        hooks.push(Box::new(hook));
    }

    /// Run every registered hook in registration order.
    pub fn run_all(&self) {
        let hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        debug!(count = hooks.len(), "running exit hooks");
        for hook in &*hooks {
            hook();
        }
    }
}

/// Stops one started stack, at most once.
struct Teardown {
    backend: Arc<dyn InfraBackend>,
    namespace: String,
    done: AtomicBool,
}

impl Teardown {
    fn run(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(namespace = %self.namespace, "tearing down test infrastructure");
        if let Err(err) = self.backend.stop(&self.namespace) {
            warn!(namespace = %self.namespace, err = %err, "infra teardown failed");
        }
    }
}

/// Scoped owner of a teardown; dropping it stops the stack.
struct TeardownGuard {
    teardown: Arc<Teardown>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.teardown.run();
    }
}

/// Test stack state for one run. Not started until an infra-dependent task needs it.
#[derive(Default)]
pub struct InfraSession {
    guard: Option<TeardownGuard>,
}

impl InfraSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.guard.is_some()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.guard
            .as_ref()
            .map(|guard| guard.teardown.namespace.as_str())
    }

    /// Stop the stack now if it was started. Later calls are no-ops.
    pub fn teardown(&mut self) {
        self.guard.take();
    }
}

impl std::fmt::Debug for InfraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfraSession")
            .field("namespace", &self.namespace())
            .finish()
    }
}

/// Detects infra-dependent work and provisions the stack on demand.
pub struct InfraGate<'a> {
    backend: Arc<dyn InfraBackend>,
    config: &'a InfraConfig,
    clock: &'a dyn Clock,
    hooks: ExitHooks,
}

impl<'a> InfraGate<'a> {
    pub fn new(
        backend: Arc<dyn InfraBackend>,
        config: &'a InfraConfig,
        clock: &'a dyn Clock,
        hooks: ExitHooks,
    ) -> Self {
        Self {
            backend,
            config,
            clock,
            hooks,
        }
    }

    pub fn task_requires(&self, task: &TaskRecord) -> bool {
        requires_infra(&task.verify, &self.config.signatures)
    }

    pub fn checks_require(&self, checks: &[String]) -> bool {
        checks
            .iter()
            .any(|check| requires_infra(check, &self.config.signatures))
    }

    /// Start the stack unless `session` already holds one.
    ///
    /// Services that never report ready are logged and do not fail the call.
    #[instrument(skip_all)]
    pub fn ensure(&self, session: &mut InfraSession) -> Result<()> {
        if session.is_started() {
            debug!("infra already started");
            return Ok(());
        }
        let namespace = allocate_namespace();
        info!(namespace = %namespace, "starting test infrastructure");

        if let Err(err) = self.backend.clear(&namespace) {
            warn!(err = %err, "clearing stale infra failed");
        }

        let teardown = Arc::new(Teardown {
            backend: Arc::clone(&self.backend),
            namespace: namespace.clone(),
            done: AtomicBool::new(false),
        });
        let hook = Arc::clone(&teardown);
        self.hooks.register(move || hook.run());
        // Guard first so a partially started stack is still stopped.
        let guard = TeardownGuard { teardown };

        self.backend
            .start(&namespace)
            .with_context(|| format!("start infra {namespace}"))?;
        session.guard = Some(guard);

        for check in &self.config.health_checks {
            if let Err(err) = self.wait_ready(&namespace, check) {
                warn!(err = %err, "continuing without ready service");
            }
        }
        Ok(())
    }

    fn wait_ready(&self, namespace: &str, check: &HealthCheck) -> Result<(), ConductorError> {
        let attempts = self.config.health_attempts.max(1);
        let interval = Duration::from_secs(self.config.health_interval_secs);
        for attempt in 1..=attempts {
            match self.backend.health(namespace, check) {
                Ok(true) => {
                    info!(service = %check.name, attempt, "service ready");
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => debug!(service = %check.name, err = %err, "health check errored"),
            }
            if attempt < attempts {
                self.clock.sleep(interval);
            }
        }
        Err(ConductorError::InfraUnavailable {
            service: check.name.clone(),
            attempts,
        })
    }
}

/// Unique, docker-compatible namespace: `conductor-<utc timestamp>-<6 chars>`.
pub fn allocate_namespace() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let mut rng = rand::thread_rng();
    let short_id = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("conductor-{timestamp}-{short_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeClock, RecordingInfra};

    fn config(checks: &[&str]) -> InfraConfig {
        InfraConfig {
            health_attempts: 3,
            health_interval_secs: 2,
            health_checks: checks
                .iter()
                .map(|name| HealthCheck {
                    name: name.to_string(),
                    command: Vec::new(),
                })
                .collect(),
            ..InfraConfig::default()
        }
    }

    #[test]
    fn ensure_is_idempotent_and_teardown_runs_once() {
        let infra = Arc::new(RecordingInfra::ready());
        let cfg = config(&["api"]);
        let clock = FakeClock::new();
        let hooks = ExitHooks::default();
        let gate = InfraGate::new(infra.clone(), &cfg, &clock, hooks.clone());

        let mut session = InfraSession::new();
        gate.ensure(&mut session).expect("ensure");
        gate.ensure(&mut session).expect("ensure again");
        assert_eq!(infra.clears(), 1);
        assert_eq!(infra.starts(), 1);

        session.teardown();
        session.teardown();
        hooks.run_all();
        drop(session);
        assert_eq!(infra.stops(), 1);
    }

    #[test]
    fn interrupt_hook_then_drop_stops_once() {
        let infra = Arc::new(RecordingInfra::ready());
        let cfg = config(&[]);
        let clock = FakeClock::new();
        let hooks = ExitHooks::default();
        let gate = InfraGate::new(infra.clone(), &cfg, &clock, hooks.clone());

        let mut session = InfraSession::new();
        gate.ensure(&mut session).expect("ensure");
        hooks.run_all();
        assert_eq!(infra.stops(), 1);
        drop(session);
        assert_eq!(infra.stops(), 1);
    }

    #[test]
    fn panic_unwind_stops_a_started_stack_once() {
        let infra = Arc::new(RecordingInfra::ready());
        let cfg = config(&[]);
        let clock = FakeClock::new();
        let hooks = ExitHooks::default();
        let gate = InfraGate::new(infra.clone(), &cfg, &clock, hooks.clone());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut session = InfraSession::new();
            gate.ensure(&mut session).expect("ensure");
            panic!("task blew up");
        }));

        assert!(result.is_err());
        assert_eq!(infra.starts(), 1);
        assert_eq!(infra.stops(), 1);
        hooks.run_all();
        assert_eq!(infra.stops(), 1);
    }

    #[test]
    fn unready_service_is_soft_and_bounded() {
        let infra = Arc::new(RecordingInfra::never_ready());
        let cfg = config(&["api", "web"]);
        let clock = FakeClock::new();
        let gate = InfraGate::new(infra.clone(), &cfg, &clock, ExitHooks::default());

        let mut session = InfraSession::new();
        gate.ensure(&mut session).expect("ensure is soft");
        assert!(session.is_started());
        assert_eq!(infra.health_calls(), 6);
        assert_eq!(clock.total_slept(), Duration::from_secs(8));
    }

    #[test]
    fn failed_start_still_tears_down() {
        let infra = Arc::new(RecordingInfra::failing_start());
        let cfg = config(&[]);
        let clock = FakeClock::new();
        let gate = InfraGate::new(infra.clone(), &cfg, &clock, ExitHooks::default());

        let mut session = InfraSession::new();
        assert!(gate.ensure(&mut session).is_err());
        assert!(!session.is_started());
        assert_eq!(infra.stops(), 1);
    }

    #[test]
    fn namespaces_are_lowercase_and_unique() {
        let a = allocate_namespace();
        let b = allocate_namespace();
        assert!(a.starts_with("conductor-"));
        assert_eq!(a, a.to_lowercase());
        assert_ne!(a, b);
    }
}
