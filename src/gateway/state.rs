use std::sync::Arc;

use crate::balance::ProfitShareAccessor;
use crate::config::WebhookConfig;
use crate::db::Database;
use crate::fee::FeeSchedule;
use crate::payment::PaymentOrchestrator;
use crate::profiles::ProfileService;
use crate::rail::RailRegistry;
use crate::store::Store;
use crate::webhook::WebhookReconciler;
use crate::withdrawal::{WithdrawalConfig, WithdrawalManager};

/// Gateway shared state
pub struct AppState {
    pub store: Arc<dyn Store>,
    /// Present with the postgres backend; pinged by the health check
    pub db: Option<Arc<Database>>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub withdrawals: WithdrawalManager,
    pub webhooks: WebhookReconciler,
    pub balances: ProfitShareAccessor,
    pub profiles: Arc<ProfileService>,
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        rails: RailRegistry,
        fees: FeeSchedule,
        withdrawal: WithdrawalConfig,
        webhook: &WebhookConfig,
        jwt_secret: impl Into<String>,
    ) -> Self {
        let orchestrator = Arc::new(PaymentOrchestrator::new(store.clone(), rails.clone(), fees));
        Self {
            withdrawals: WithdrawalManager::new(store.clone(), orchestrator.clone(), withdrawal),
            webhooks: WebhookReconciler::new(
                store.clone(),
                orchestrator.clone(),
                webhook.secret.clone(),
                webhook.tolerance_secs,
            ),
            balances: ProfitShareAccessor::new(store.clone(), rails.clone()),
            profiles: Arc::new(ProfileService::new(store.clone(), rails)),
            orchestrator,
            store,
            db: None,
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.db = Some(db);
        self
    }
}
