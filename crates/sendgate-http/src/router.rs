use std::{collections::HashMap, sync::Arc};

use actix_web::{web, App, HttpServer};
use tokio::sync::Mutex;

use sendgate_core::{
    config::Config,
    domain::TenantId,
    governance::{Governance, SendOrchestrator},
    history::{HistoryRecorder, InMemoryChatHistory},
    messaging::port::SendCapability,
    ports::{Clock, Waiter},
};
use sendgate_sidecar::SidecarClient;

use crate::{errors::ApiError, handlers};

/// Largest accepted request body; media travels inline as base64 in JSON
/// or as a `file` part in multipart form data.
pub(crate) const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Builds the send capability for a tenant's session.
pub trait CapabilityFactory: Send + Sync {
    fn capability(&self, tenant: &TenantId) -> Arc<dyn SendCapability>;
}

impl CapabilityFactory for SidecarClient {
    fn capability(&self, tenant: &TenantId) -> Arc<dyn SendCapability> {
        Arc::new(self.for_tenant(tenant.clone()))
    }
}

/// Everything one tenant needs to send.
pub struct Tenant {
    pub id: TenantId,
    pub orchestrator: SendOrchestrator,
    pub recorder: HistoryRecorder,
}

/// Tenants are created on first use and live for the life of the process,
/// up to `capacity` of them.
pub struct TenantRegistry {
    inner: Mutex<HashMap<TenantId, Arc<Tenant>>>,
    capacity: usize,
}

impl TenantRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// `None` when `id` is new and the registry is full.
    pub async fn get_or_create(&self, id: &TenantId, make: impl FnOnce() -> Tenant) -> Option<Arc<Tenant>> {
        let mut map = self.inner.lock().await;
        if let Some(tenant) = map.get(id) {
            return Some(tenant.clone());
        }
        if map.len() >= self.capacity {
            tracing::warn!(tenant = %id, capacity = self.capacity, "tenant registry full");
            return None;
        }
        tracing::info!(tenant = %id, "registering tenant");
        let tenant = Arc::new(make());
        map.insert(id.clone(), tenant.clone());
        Some(tenant)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub governance: Governance,
    pub capabilities: Arc<dyn CapabilityFactory>,
    pub tenants: Arc<TenantRegistry>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, governance: Governance, capabilities: Arc<dyn CapabilityFactory>) -> Self {
        Self {
            governance,
            capabilities,
            tenants: Arc::new(TenantRegistry::new(cfg.max_tenants)),
            cfg,
        }
    }

    pub async fn tenant(&self, id: &TenantId) -> Result<Arc<Tenant>, ApiError> {
        self.tenants
            .get_or_create(id, || {
                let capability = self.capabilities.capability(id);
                Tenant {
                    id: id.clone(),
                    orchestrator: SendOrchestrator::new(capability.clone(), self.governance.clone()),
                    recorder: HistoryRecorder::new(
                        Arc::new(InMemoryChatHistory::new()),
                        capability,
                        self.cfg.default_label.clone(),
                    ),
                }
            })
            .await
            .ok_or_else(|| ApiError::Unavailable(format!("Tenant limit of {} reached", self.cfg.max_tenants)))
    }
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

/// Route table, shared by the server and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(handlers::stats::health))
        .route("/rate-limit-stats", web::get().to(handlers::stats::rate_limit_stats))
        .route("/send-message", web::post().to(handlers::send::send_message))
        .route("/send-bulk-message", web::post().to(handlers::send::send_bulk_message))
        .route("/send-bulk-to-label", web::post().to(handlers::send::send_bulk_to_label))
        .route("/save-message", web::post().to(handlers::history::save_message));
}

pub async fn serve(cfg: Arc<Config>, clock: Arc<dyn Clock>, waiter: Arc<dyn Waiter>) -> anyhow::Result<()> {
    let sidecar = SidecarClient::new(&cfg.sidecar_url, cfg.sidecar_timeout)?;
    let governance = Governance::from_config(&cfg, clock, waiter);
    let state = web::Data::new(AppState::new(cfg.clone(), governance, Arc::new(sidecar)));

    tracing::info!(
        bind = %cfg.bind_addr,
        sidecar = %cfg.sidecar_url,
        max_per_hour = cfg.rate_limits.max_per_hour,
        max_per_day = cfg.rate_limits.max_per_day,
        max_per_destination_per_day = cfg.rate_limits.max_per_destination_per_day,
        auth = cfg.api_key.is_some(),
        "sendgate starting"
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(cfg.bind_addr.as_str())?
        .run()
        .await?;

    tracing::info!("sendgate stopped");
    Ok(())
}
