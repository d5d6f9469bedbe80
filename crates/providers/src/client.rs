//! Multi-service client: domain routing, per-service retry, and fallback
//! across candidates in priority order.
//!
//! `fetch` never returns `Err` and never panics. Every outcome, including
//! routing failures, is an [`EnhancementResponse`].

use serde::Serialize;
use sidekick_config::{Protocol, ServiceDescriptor, ServiceRegistry};
use sidekick_core::error::{RoutingError, ServiceError};
use sidekick_core::result::EnhancementResponse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::backend::{ServiceBackend, ServiceCall};
use crate::extract::{ArgumentExtractor, PlaceExtractor, tool_arguments};
use crate::grpc::GrpcBackend;
use crate::rest::RestBackend;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::session::{InMemorySessionStore, SessionStore};

/// Service name used for failures that happen before any service is chosen.
const SYSTEM_SERVICE: &str = "system";

pub struct MultiServiceClient {
    registry: RwLock<Arc<ServiceRegistry>>,
    backends: HashMap<Protocol, Arc<dyn ServiceBackend>>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    extractor: Arc<dyn ArgumentExtractor>,
    request_count: AtomicU64,
}

impl MultiServiceClient {
    /// A client with the default REST and gRPC backends sharing an
    /// in-memory session store.
    pub fn new(registry: ServiceRegistry) -> Self {
        Self::with_session_store(registry, Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_session_store(registry: ServiceRegistry, sessions: Arc<dyn SessionStore>) -> Self {
        let mut backends: HashMap<Protocol, Arc<dyn ServiceBackend>> = HashMap::new();
        backends.insert(Protocol::Rest, Arc::new(RestBackend::new(sessions)));
        backends.insert(Protocol::Grpc, Arc::new(GrpcBackend::new()));
        Self {
            registry: RwLock::new(Arc::new(registry)),
            backends,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            extractor: Arc::new(PlaceExtractor::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Replace the backend for a protocol.
    pub fn with_backend(mut self, protocol: Protocol, backend: Arc<dyn ServiceBackend>) -> Self {
        self.backends.insert(protocol, backend);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArgumentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<ServiceRegistry> {
        match self.registry.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a new registry. In-flight fetches keep the snapshot they
    /// started with.
    pub fn reload(&self, registry: ServiceRegistry) {
        let registry = Arc::new(registry);
        match self.registry.write() {
            Ok(mut guard) => *guard = registry,
            Err(poisoned) => *poisoned.into_inner() = registry,
        }
        info!("Service registry reloaded");
    }

    fn next_request(&self) -> (u64, String) {
        let n = self.request_count.fetch_add(1, Ordering::Relaxed) + 1;
        (n, format!("REQ-{n:06}"))
    }

    /// Fetch context for `query` from the services serving `domain`.
    pub async fn fetch(&self, domain: &str, query: &str) -> EnhancementResponse {
        let (sequence, request_id) = self.next_request();
        let registry = self.registry();
        let preview: String = query.chars().take(50).collect();
        info!(request_id = %request_id, domain = %domain, query = %preview, "Fetch request");

        if !registry.is_enabled() {
            warn!(request_id = %request_id, "Service routing is globally disabled");
            return EnhancementResponse::failure(
                RoutingError::GloballyDisabled.to_string(),
                domain,
                SYSTEM_SERVICE,
            );
        }

        let candidates = registry.get_services_for_domain(domain);
        if candidates.is_empty() {
            let err = RoutingError::DomainUnresolved {
                domain: domain.to_string(),
            };
            warn!(request_id = %request_id, error = %err, "No candidate services");
            return EnhancementResponse::failure(err.to_string(), domain, SYSTEM_SERVICE);
        }

        let mut last_error = String::new();
        let mut last_service = SYSTEM_SERVICE.to_string();

        for (i, service) in candidates.iter().enumerate() {
            info!(
                request_id = %request_id,
                service = %service.name,
                candidate = i + 1,
                total = candidates.len(),
                "Trying service"
            );

            let call = ServiceCall {
                request_id: request_id.clone(),
                sequence,
                domain: domain.to_string(),
                query: query.to_string(),
                arguments: tool_arguments(&service.tool, query, self.extractor.as_ref()),
            };

            last_service = service.name.clone();
            match self.query_service(service, &call).await {
                Ok(response) => {
                    info!(request_id = %request_id, service = %service.name, "Fetch succeeded");
                    return response;
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        service = %service.name,
                        error = %e,
                        "Service failed, trying next"
                    );
                    last_error = e.to_string();
                }
            }
        }

        let err = RoutingError::Exhausted {
            domain: domain.to_string(),
            service: last_service.clone(),
            last_error,
        };
        error!(request_id = %request_id, error = %err, "All services failed");
        EnhancementResponse::failure(err.to_string(), domain, last_service)
    }

    /// Attempt one service up to `retries + 1` times.
    async fn query_service(
        &self,
        service: &ServiceDescriptor,
        call: &ServiceCall,
    ) -> Result<EnhancementResponse, ServiceError> {
        let Some(backend) = self.backends.get(&service.protocol) else {
            return Err(ServiceError::UnsupportedProtocol(service.protocol.to_string()));
        };

        let attempts = self.retry.attempts(service.retries);
        let mut last_error = ServiceError::Transport("no attempt made".into());

        for attempt in 0..attempts {
            if attempt > 0 {
                let wait = self.retry.delay_for_attempt(attempt);
                info!(
                    request_id = %call.request_id,
                    service = %service.name,
                    retry = attempt,
                    of = service.retries,
                    wait_secs = wait.as_secs(),
                    "Retrying after backoff"
                );
                self.sleeper.sleep(wait).await;
            }

            match self.attempt(backend.as_ref(), service, call).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(
                        request_id = %call.request_id,
                        service = %service.name,
                        protocol = backend.protocol(),
                        attempt = attempt + 1,
                        error = %e,
                        "Attempt failed"
                    );
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        backend: &dyn ServiceBackend,
        service: &ServiceDescriptor,
        call: &ServiceCall,
    ) -> Result<EnhancementResponse, ServiceError> {
        let payload = if service.timeout > 0 {
            tokio::time::timeout(
                Duration::from_secs(service.timeout),
                backend.call(service, call),
            )
            .await
            .map_err(|_| ServiceError::Timeout {
                service: service.name.clone(),
                timeout_secs: service.timeout,
            })??
        } else {
            backend.call(service, call).await?
        };
        payload.normalize(&service.name)
    }

    /// Sorted, deduplicated domains served by enabled services.
    pub fn available_domains(&self) -> Vec<String> {
        let registry = self.registry();
        if !registry.is_enabled() {
            return Vec::new();
        }
        registry.available_domains()
    }

    /// Snapshot of the registry for diagnostics.
    pub fn service_status(&self) -> ServiceStatus {
        let registry = self.registry();
        ServiceStatus {
            enabled: registry.is_enabled(),
            total_services: registry.services().len(),
            enabled_services: registry.get_enabled_services().len(),
            available_domains: self.available_domains(),
            services: registry
                .services()
                .iter()
                .map(|s| ServiceSummary {
                    name: s.name.clone(),
                    enabled: s.enabled,
                    protocol: s.protocol.to_string(),
                    domains: s.domains.clone(),
                    priority: s.priority,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub enabled: bool,
    pub total_services: usize,
    pub enabled_services: usize,
    pub available_domains: Vec<String>,
    pub services: Vec<ServiceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub enabled: bool,
    pub protocol: String,
    pub domains: Vec<String>,
    pub priority: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ProviderPayload;
    use crate::retry::NoopSleeper;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A backend scripted per service name: services listed in `failing`
    /// always fail, every other service answers with its own name.
    struct ScriptedBackend {
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ServiceBackend for ScriptedBackend {
        fn protocol(&self) -> &str {
            "rest"
        }

        async fn call(
            &self,
            service: &ServiceDescriptor,
            call: &ServiceCall,
        ) -> Result<ProviderPayload, ServiceError> {
            self.calls.lock().unwrap().push(service.name.clone());
            if self.failing.contains(&service.name) {
                return Err(ServiceError::Transport(format!("{} refused", service.name)));
            }
            Ok(ProviderPayload::Structured {
                content: format!("{} says hi to {}", service.name, call.query),
                confidence: 0.9,
                data: None,
                extra: Default::default(),
            })
        }
    }

    /// Never returns in time.
    struct HangingBackend;

    #[async_trait]
    impl ServiceBackend for HangingBackend {
        fn protocol(&self) -> &str {
            "rest"
        }

        async fn call(
            &self,
            _service: &ServiceDescriptor,
            _call: &ServiceCall,
        ) -> Result<ProviderPayload, ServiceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ServiceError::Transport("unreachable".into()))
        }
    }

    fn weather_registry() -> ServiceRegistry {
        ServiceRegistry::new(vec![
            ServiceDescriptor::new("primary", "http://p", &["weather"])
                .with_priority(1)
                .with_retries(2),
            ServiceDescriptor::new("backup", "http://b", &["Weather"]).with_priority(10),
        ])
    }

    fn client(registry: ServiceRegistry, backend: Arc<ScriptedBackend>) -> MultiServiceClient {
        MultiServiceClient::new(registry)
            .with_backend(Protocol::Rest, backend)
            .with_sleeper(Arc::new(NoopSleeper))
    }

    #[tokio::test]
    async fn falls_back_to_lower_priority_service() {
        let backend = Arc::new(ScriptedBackend::new(&["primary"]));
        let client = client(weather_registry(), backend.clone());

        let resp = client.fetch("weather", "上海天气怎么样").await;
        assert!(resp.success, "{:?}", resp.error);
        assert_eq!(resp.service_name, "backup");
        assert!(resp.content.contains("上海"));
        // primary: 1 + 2 retries, then backup once
        assert_eq!(backend.calls(), vec!["primary", "primary", "primary", "backup"]);
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let backend = Arc::new(ScriptedBackend::new(&[]));
        let client = client(weather_registry(), backend.clone());

        let resp = client.fetch("WEATHER", "北京").await;
        assert!(resp.success);
        assert_eq!(resp.service_name, "primary");
        assert_eq!(backend.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn exhausted_candidates_name_last_service() {
        let backend = Arc::new(ScriptedBackend::new(&["primary", "backup"]));
        let client = client(weather_registry(), backend.clone());

        let resp = client.fetch("weather", "北京").await;
        assert!(!resp.success);
        assert_eq!(resp.service_name, "backup");
        let error = resp.error.unwrap();
        assert!(error.contains("All services failed"));
        assert!(error.contains("backup refused"));
        assert_eq!(resp.confidence.value(), 0.0);
    }

    #[tokio::test]
    async fn globally_disabled_fails_without_calls() {
        let backend = Arc::new(ScriptedBackend::new(&[]));
        let client = client(weather_registry().with_enabled(false), backend.clone());

        let resp = client.fetch("weather", "北京天气").await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("globally disabled"));
        assert_eq!(resp.service_name, "system");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn unresolved_domain_fails_without_calls() {
        let backend = Arc::new(ScriptedBackend::new(&[]));
        let client = client(weather_registry(), backend.clone());

        let resp = client.fetch("stocks", "今天股市").await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("No services available for domain: stocks"));
        assert_eq!(resp.metadata["domain"], "stocks");
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_protocol_is_structured_failure_and_not_retried() {
        let registry = ServiceRegistry::new(vec![
            ServiceDescriptor::new("soap-weather", "http://s", &["weather"])
                .with_protocol(Protocol::parse("soap"))
                .with_retries(3),
        ]);
        let sleeper_calls = Arc::new(CountingSleeper::default());
        let client = MultiServiceClient::new(registry).with_sleeper(sleeper_calls.clone());

        let resp = client.fetch("weather", "北京").await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("Unsupported protocol: soap"));
        assert_eq!(*sleeper_calls.waits.lock().unwrap(), Vec::<Duration>::new());
    }

    #[derive(Default)]
    struct CountingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn backoff_follows_policy() {
        let backend = Arc::new(ScriptedBackend::new(&["primary", "backup"]));
        let sleeper = Arc::new(CountingSleeper::default());
        let client = MultiServiceClient::new(ServiceRegistry::new(vec![
            ServiceDescriptor::new("primary", "http://p", &["weather"]).with_retries(4),
        ]))
        .with_backend(Protocol::Rest, backend)
        .with_sleeper(sleeper.clone());

        client.fetch("weather", "北京").await;
        let waits: Vec<u64> = sleeper.waits.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(waits, vec![2, 4, 8, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_service_times_out() {
        let client = MultiServiceClient::new(ServiceRegistry::new(vec![
            ServiceDescriptor::new("slow", "http://s", &["weather"])
                .with_timeout(2)
                .with_retries(0),
        ]))
        .with_backend(Protocol::Rest, Arc::new(HangingBackend));

        let resp = client.fetch("weather", "北京").await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("timed out after 2s"));
    }

    #[tokio::test]
    async fn request_ids_increase() {
        let client = MultiServiceClient::new(ServiceRegistry::disabled());
        assert_eq!(client.next_request(), (1, "REQ-000001".to_string()));
        assert_eq!(client.next_request(), (2, "REQ-000002".to_string()));
    }

    #[test]
    fn status_and_domains() {
        let client = MultiServiceClient::new(ServiceRegistry::new(vec![
            ServiceDescriptor::new("w", "http://w", &["weather", "forecast"]),
            ServiceDescriptor::new("n", "http://n", &["news"]).disabled(),
        ]));
        assert_eq!(client.available_domains(), vec!["forecast", "weather"]);
        let status = client.service_status();
        assert!(status.enabled);
        assert_eq!(status.total_services, 2);
        assert_eq!(status.enabled_services, 1);
        assert_eq!(status.services.len(), 2);
    }

    #[tokio::test]
    async fn reload_swaps_registry() {
        let backend = Arc::new(ScriptedBackend::new(&[]));
        let client = client(ServiceRegistry::disabled(), backend.clone());
        assert!(!client.fetch("weather", "北京").await.success);

        client.reload(weather_registry());
        assert!(client.fetch("weather", "北京").await.success);
        assert!(client.fetch("weather", "北京").await.success);
    }
}
