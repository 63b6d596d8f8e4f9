//! Plan catalog and tenant contract registry.
//!
//! Plans are immutable catalog entries with per-metric limits. A contract
//! binds a tenant to one plan plus the admin contact used for alerts; the
//! last registration for a tenant wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use commerce_core::{MeteringError, MeteringResult, Metric};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    pub limits: BTreeMap<Metric, f64>,
    #[serde(default)]
    pub description: String,
}

impl Plan {
    /// Limit for `metric`; zero (unmetered) when the plan does not set one.
    pub fn limit(&self, metric: Metric) -> f64 {
        self.limits.get(&metric).copied().unwrap_or(0.0)
    }
}

/// Where usage alerts for a tenant go. Empty values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminContact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_app_user_id: Option<String>,
}

impl AdminContact {
    pub fn email(address: impl Into<String>) -> Self {
        Self {
            email: Some(address.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContract {
    pub tenant_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub admin_contact: AdminContact,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Catalog and contract registry backed by `DashMap`.
#[derive(Clone)]
pub struct ContractRegistry {
    plans: Arc<DashMap<String, Plan>>,
    contracts: Arc<DashMap<String, TenantContract>>,
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractRegistry {
    /// Registry seeded with the baseline catalog and sample contract.
    pub fn new() -> Self {
        let registry = Self {
            plans: Arc::new(DashMap::new()),
            contracts: Arc::new(DashMap::new()),
        };
        registry.reset();
        info!(plans = registry.plans.len(), "ContractRegistry initialized");
        registry
    }

    pub fn get_plan(&self, plan_id: &str) -> Option<Plan> {
        self.plans.get(plan_id).map(|p| p.clone())
    }

    /// Catalog entries ordered by plan id.
    pub fn list_plans(&self) -> Vec<Plan> {
        let mut plans: Vec<Plan> = self.plans.iter().map(|e| e.value().clone()).collect();
        plans.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        plans
    }

    /// Bind `tenant_id` to `plan_id`, replacing any previous contract.
    pub fn register_contract(
        &self,
        tenant_id: &str,
        plan_id: &str,
        admin_contact: AdminContact,
    ) -> MeteringResult<TenantContract> {
        if !self.plans.contains_key(plan_id) {
            warn!(tenant_id = %tenant_id, plan_id = %plan_id, "Rejecting contract for unknown plan");
            return Err(MeteringError::InvalidPlan(plan_id.to_string()));
        }
        let contract = TenantContract {
            tenant_id: tenant_id.to_string(),
            plan_id: plan_id.to_string(),
            admin_contact,
        };
        self.contracts.insert(tenant_id.to_string(), contract.clone());
        info!(tenant_id = %tenant_id, plan_id = %plan_id, "Tenant contract registered");
        Ok(contract)
    }

    pub fn get_tenant_contract(&self, tenant_id: &str) -> Option<TenantContract> {
        self.contracts.get(tenant_id).map(|c| c.clone())
    }

    /// Resolve the plan a contract points at.
    pub fn resolve_plan(&self, contract: &TenantContract) -> MeteringResult<Plan> {
        self.get_plan(&contract.plan_id)
            .ok_or_else(|| MeteringError::PlanNotFound {
                tenant_id: contract.tenant_id.clone(),
                plan_id: contract.plan_id.clone(),
            })
    }

    /// Remove a plan from the catalog. Existing contracts keep pointing at
    /// it and fail resolution from then on.
    pub fn retire_plan(&self, plan_id: &str) -> Option<Plan> {
        let removed = self.plans.remove(plan_id).map(|(_, plan)| plan);
        if removed.is_some() {
            warn!(plan_id = %plan_id, "Plan retired from catalog");
        }
        removed
    }

    /// Restore the baseline catalog and contracts.
    pub fn reset(&self) {
        self.plans.clear();
        for plan in default_plans() {
            self.plans.insert(plan.plan_id.clone(), plan);
        }
        self.contracts.clear();
        self.contracts.insert(
            "t-sample".into(),
            TenantContract {
                tenant_id: "t-sample".into(),
                plan_id: "starter".into(),
                admin_contact: AdminContact::email("ops+t-sample@example.com"),
            },
        );
    }
}

fn plan(plan_id: &str, name: &str, description: &str, requests: f64, orders: f64, gmv: f64) -> Plan {
    Plan {
        plan_id: plan_id.into(),
        name: name.into(),
        description: description.into(),
        limits: BTreeMap::from([
            (Metric::Requests, requests),
            (Metric::Orders, orders),
            (Metric::Gmv, gmv),
        ]),
    }
}

fn default_plans() -> Vec<Plan> {
    vec![
        plan("starter", "Starter", "Basic plan for small tenants", 1000.0, 100.0, 10_000.0),
        plan("growth", "Growth", "Mid-market plan with higher allowances", 5000.0, 500.0, 75_000.0),
        plan("enterprise", "Enterprise", "Custom negotiated limits", 20_000.0, 2500.0, 300_000.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_catalog() {
        let registry = ContractRegistry::new();
        let ids: Vec<String> = registry.list_plans().into_iter().map(|p| p.plan_id).collect();
        assert_eq!(ids, vec!["enterprise", "growth", "starter"]);

        let starter = registry.get_plan("starter").unwrap();
        assert_eq!(starter.limit(Metric::Requests), 1000.0);
        assert_eq!(starter.limit(Metric::Orders), 100.0);
        assert_eq!(starter.limit(Metric::Gmv), 10_000.0);
        assert_eq!(starter.limit(Metric::Bytes), 0.0);

        let sample = registry.get_tenant_contract("t-sample").unwrap();
        assert_eq!(sample.plan_id, "starter");
        assert_eq!(
            sample.admin_contact.email.as_deref(),
            Some("ops+t-sample@example.com")
        );
    }

    #[test]
    fn test_register_contract_last_write_wins() {
        let registry = ContractRegistry::new();
        registry
            .register_contract("t-001", "starter", AdminContact::email("a@example.com"))
            .unwrap();
        registry
            .register_contract("t-001", "growth", AdminContact::default())
            .unwrap();

        let contract = registry.get_tenant_contract("t-001").unwrap();
        assert_eq!(contract.plan_id, "growth");
        assert_eq!(registry.resolve_plan(&contract).unwrap().name, "Growth");
    }

    #[test]
    fn test_unknown_plan_is_rejected_without_mutation() {
        let registry = ContractRegistry::new();
        registry
            .register_contract("t-001", "starter", AdminContact::default())
            .unwrap();

        let err = registry
            .register_contract("t-001", "platinum", AdminContact::default())
            .unwrap_err();
        assert!(matches!(err, MeteringError::InvalidPlan(ref id) if id == "platinum"));
        assert_eq!(registry.get_tenant_contract("t-001").unwrap().plan_id, "starter");

        assert!(registry
            .register_contract("t-002", "platinum", AdminContact::default())
            .is_err());
        assert!(registry.get_tenant_contract("t-002").is_none());
    }

    #[test]
    fn test_retired_plan_fails_resolution() {
        let registry = ContractRegistry::new();
        let contract = registry
            .register_contract("t-001", "growth", AdminContact::default())
            .unwrap();
        registry.retire_plan("growth").unwrap();

        assert!(matches!(
            registry.resolve_plan(&contract),
            Err(MeteringError::PlanNotFound { .. })
        ));
    }

    #[test]
    fn test_reset_restores_baseline() {
        let registry = ContractRegistry::new();
        registry
            .register_contract("t-001", "starter", AdminContact::default())
            .unwrap();
        registry.retire_plan("enterprise");

        registry.reset();
        assert!(registry.get_tenant_contract("t-001").is_none());
        assert!(registry.get_tenant_contract("t-sample").is_some());
        assert!(registry.get_plan("enterprise").is_some());
    }

    #[test]
    fn test_contact_uses_camel_case_keys() {
        let contact: AdminContact = serde_json::from_str(
            r#"{"email":"ops@t-001.example.com","webhookUrl":"https://hooks.example.com/t-001"}"#,
        )
        .unwrap();
        assert_eq!(contact.webhook_url.as_deref(), Some("https://hooks.example.com/t-001"));
        assert!(contact.in_app_user_id.is_none());
    }
}
