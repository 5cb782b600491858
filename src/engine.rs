use arc_swap::ArcSwap;
use itertools::Itertools;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::EngineConfig;
use crate::error::PolicyError;
use crate::evaluator::Authorizer;
use crate::metrics::{self, EvaluationPhases, EvaluationStats, ReloadStats};
use crate::query::PolicyQuery;
use crate::slice::Slice;
use crate::types::{
    Decision, EntityUid, Policy, PolicyEffectFilter, PolicyVersion, PrincipalPolicies, Request,
};

use tracing::{debug, info, warn};

/// The main engine handle. Cloneable and thread-safe.
///
/// Evaluation reads the current [`Slice`] without locking. Reloads build a
/// complete new slice first and then swap it in, so a request always sees
/// one whole slice, and a failed reload leaves the previous one in place.
/// Reloads are serialised, so one built from the current slice never
/// overwrites a reload that finished while it was building.
#[derive(Clone)]
pub struct PolicyEngine {
    inner: Arc<ArcSwap<Slice>>,
    reload_lock: Arc<Mutex<()>>,
    config: EngineConfig,
    authorizer: Authorizer,
}

impl PolicyEngine {
    /// An engine over policy text alone, with no entities or templates.
    pub fn new_from_str(policy_text: &str) -> Result<Self, PolicyError> {
        Ok(PolicyEngine::from_slice(Slice::from_policy_text(policy_text)?))
    }

    pub fn from_json(text: &str) -> Result<Self, PolicyError> {
        Ok(PolicyEngine::from_slice(Slice::from_json(text)?))
    }

    pub fn from_slice(slice: Slice) -> Self {
        PolicyEngine::with_config(slice, EngineConfig::default())
    }

    pub fn with_config(slice: Slice, config: EngineConfig) -> Self {
        info!(
            event = "Engine",
            phase = "Created",
            hash = slice.version().hash,
            unknown_entities = config.unknown_entities.to_string()
        );
        PolicyEngine {
            inner: Arc::new(ArcSwap::from_pointee(slice)),
            reload_lock: Arc::new(Mutex::new(())),
            authorizer: Authorizer::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the static policies, keeping the current entities, templates
    /// and template links.
    pub fn reload_from_str(&self, policy_text: &str) -> Result<(), PolicyError> {
        let _reloading = self.lock_reloads();
        let current = self.inner.load_full();
        let slice = Slice::builder()
            .policy_text(policy_text)
            .and_then(|builder| {
                builder
                    .entities(current.entities().iter().cloned())
                    .templates(current.templates().iter().cloned())
                    .links(current.links().iter().cloned())
                    .build()
            })
            .inspect_err(reload_failed)?;
        self.install(slice);
        Ok(())
    }

    /// Replace the whole slice with one read from the wire format.
    pub fn reload_from_json(&self, text: &str) -> Result<(), PolicyError> {
        let slice = Slice::from_json(text).inspect_err(reload_failed)?;
        self.reload_slice(slice);
        Ok(())
    }

    pub fn reload_slice(&self, slice: Slice) {
        let _reloading = self.lock_reloads();
        self.install(slice);
    }

    /// The lock guards no data, so a poisoned lock is still usable.
    fn lock_reloads(&self) -> MutexGuard<'_, ()> {
        self.reload_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in `slice`; callers hold the reload lock.
    fn install(&self, slice: Slice) {
        let stats = ReloadStats {
            reload_time: std::time::SystemTime::now(),
            version_hash: slice.version().hash.clone(),
            policies: slice.expanded().len(),
            entities: slice.entities().len(),
            link_errors: slice.link_errors().len(),
        };
        self.inner.store(Arc::new(slice));
        info!(
            event = "Engine",
            phase = "Reloaded",
            hash = stats.version_hash,
            policies = stats.policies,
            entities = stats.entities
        );
        metrics::record_reload(stats);
    }

    /// Decide a request against the current slice. Never fails; condition
    /// errors are reported on the decision.
    pub fn evaluate(&self, request: &Request) -> Decision {
        let start = Instant::now();
        let slice = self.inner.load();

        debug!(
            event = "Request",
            phase = "Evaluation",
            principal = request.principal.to_string(),
            action = request.action.to_string(),
            resource = request.resource.to_string(),
            hash = slice.version().hash
        );

        let (decision, phases) = if self.config.collect_phase_timings {
            let (decision, phases) = self.authorizer.is_authorized_timed(&slice, request);
            (decision, Some(phases))
        } else {
            (self.authorizer.is_authorized(&slice, request), None)
        };
        let duration = start.elapsed();

        for error in &decision.errors {
            warn!(event = "Request", phase = "Policy", error = error.to_string());
        }
        debug!(
            event = "Request",
            phase = "Result",
            allowed = decision.allowed,
            policies = decision.determining_policies.iter().join(", ")
        );

        let stats = EvaluationStats::new(request, &decision, duration);
        metrics::record_evaluation(&stats);
        if let Some(phases) = phases {
            metrics::record_evaluation_phases(&stats, &EvaluationPhases::new(&phases, duration));
        }

        decision
    }

    /// The slice currently being served. Holding it does not block reloads.
    pub fn current_snapshot(&self) -> Arc<Slice> {
        self.inner.load_full()
    }

    pub fn current_version(&self) -> PolicyVersion {
        self.inner.load().version().clone()
    }

    /// Policies whose principal scope admits `principal`, through its
    /// ancestors in the current entity store.
    pub fn list_policies_for_principal(
        &self,
        principal: &EntityUid,
        effect: PolicyEffectFilter,
    ) -> PrincipalPolicies {
        let slice = self.inner.load();
        let listed = PolicyQuery::for_principal(principal, effect).run(&slice);
        debug!(
            event = "Request",
            phase = "List",
            principal = principal.to_string(),
            policies = listed.len()
        );
        listed
    }

    /// Policies whose whole scope matches `request`, conditions aside.
    pub fn list_policies_for_request(
        &self,
        request: &Request,
        effect: PolicyEffectFilter,
    ) -> PrincipalPolicies {
        PolicyQuery::for_request(request, effect).run(&self.inner.load())
    }

    /// Every evaluable policy of the current slice, linked templates included.
    pub fn policies(&self) -> Vec<Policy> {
        self.inner.load().expanded().iter().cloned().collect()
    }
}

fn reload_failed(error: &PolicyError) {
    warn!(event = "Engine", phase = "Reload", error = error.to_string());
}

#[cfg(test)]
mod tests;
