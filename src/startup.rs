//! Runtime Startup
//!
//! Wires one runtime instance ("tab") of the lifecycle core: credential
//! store, refresh coordinator, expiry scheduler, session monitor,
//! authenticated HTTP client, and the realtime channel. Collaborator traits
//! without an injected implementation fall back to the shipped reqwest /
//! websocket transports built from settings.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::application::monitor::{MonitorHandle, SessionMonitor};
use crate::application::refresh::{RefreshCoordinator, RefreshTransport};
use crate::application::scheduler::ExpiryScheduler;
use crate::config::Settings;
use crate::domain::collaborators::{AlertSurface, Navigator, NotificationFetcher, SessionProvider};
use crate::domain::notification::NotificationCache;
use crate::infrastructure::http::{
    AuthHttpClient, HttpExecute, HttpNotificationFetcher, HttpRefreshTransport, LogoutGuard,
    ReqwestExecutor,
};
use crate::infrastructure::realtime::{
    ChannelHandle, ConnectionState, RealtimeChannelManager, RealtimeTransport, WebsocketTransport,
};
use crate::infrastructure::storage::{CredentialStore, MemorySharedStore, SharedStore, TabStore};

/// One wired runtime instance of the lifecycle core.
pub struct SessionRuntime {
    pub runtime_id: Uuid,
    pub store: Arc<CredentialStore>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub scheduler: Arc<ExpiryScheduler>,
    pub cache: Arc<NotificationCache>,
    pub http: Arc<AuthHttpClient>,
    pub tab_store: Arc<TabStore>,
    handle: MonitorHandle,
    channel: ChannelHandle,
    monitor_task: JoinHandle<()>,
}

impl SessionRuntime {
    pub fn builder(settings: Settings) -> SessionRuntimeBuilder {
        SessionRuntimeBuilder::new(settings)
    }

    /// Handle for feeding lifecycle signals (login, focus, logout) into the
    /// monitor.
    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn channel_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// True after the realtime channel gave up on authentication;
    /// notifications are offline but the session itself is untouched.
    pub fn channel_degraded(&self) -> bool {
        self.channel.is_degraded()
    }

    /// Stop the monitor and the realtime channel.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = self.monitor_task.await;
    }
}

/// Builder for a runtime instance. `alerts` and `navigator` are required;
/// everything else defaults to the shipped implementations.
pub struct SessionRuntimeBuilder {
    settings: Settings,
    shared: Option<Arc<dyn SharedStore>>,
    session_provider: Option<Arc<dyn SessionProvider>>,
    alerts: Option<Arc<dyn AlertSurface>>,
    navigator: Option<Arc<dyn Navigator>>,
    executor: Option<Arc<dyn HttpExecute>>,
    refresh_transport: Option<Arc<dyn RefreshTransport>>,
    realtime_transport: Option<Arc<dyn RealtimeTransport>>,
    fetcher: Option<Arc<dyn NotificationFetcher>>,
}

impl SessionRuntimeBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            shared: None,
            session_provider: None,
            alerts: None,
            navigator: None,
            executor: None,
            refresh_transport: None,
            realtime_transport: None,
            fetcher: None,
        }
    }

    /// Share durable storage with other runtimes of the same principal.
    pub fn with_shared_store(mut self, shared: Arc<dyn SharedStore>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn with_session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.session_provider = Some(provider);
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSurface>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn HttpExecute>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_refresh_transport(mut self, transport: Arc<dyn RefreshTransport>) -> Self {
        self.refresh_transport = Some(transport);
        self
    }

    pub fn with_realtime_transport(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.realtime_transport = Some(transport);
        self
    }

    pub fn with_notification_fetcher(mut self, fetcher: Arc<dyn NotificationFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build and start the runtime: spawns the monitor loop and the
    /// realtime channel task.
    pub async fn build(self) -> Result<SessionRuntime> {
        let settings = self.settings;
        let runtime_id = Uuid::new_v4();

        let alerts = self.alerts.context("an AlertSurface is required")?;
        let navigator = self.navigator.context("a Navigator is required")?;

        let shared: Arc<dyn SharedStore> = self
            .shared
            .unwrap_or_else(|| Arc::new(MemorySharedStore::new()));
        let tab_store = Arc::new(TabStore::new());
        let store = Arc::new(CredentialStore::new(
            runtime_id,
            shared.clone(),
            self.session_provider,
            settings.storage.clone(),
        ));

        let executor: Arc<dyn HttpExecute> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(ReqwestExecutor::new(&settings.endpoints.base_url)?),
        };
        let refresh_transport: Arc<dyn RefreshTransport> =
            self.refresh_transport.unwrap_or_else(|| {
                Arc::new(HttpRefreshTransport::new(
                    executor.clone(),
                    settings.endpoints.refresh_path.clone(),
                ))
            });
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            refresh_transport,
            settings.session.refresh_cooldown(),
        ));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let guard = Arc::new(LogoutGuard::new(settings.session.logout_guard_ttl()));
        let http = Arc::new(AuthHttpClient::new(
            executor,
            store.clone(),
            guard.clone(),
            events_tx.clone(),
            settings.endpoints.public_prefixes.clone(),
        ));

        let fetcher: Arc<dyn NotificationFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpNotificationFetcher::new(
                http.clone(),
                settings.endpoints.notifications_path.clone(),
            )),
        };
        let realtime_transport: Arc<dyn RealtimeTransport> = match self.realtime_transport {
            Some(transport) => transport,
            None => Arc::new(WebsocketTransport::new(&settings.endpoints.realtime_url)?),
        };

        let cache = Arc::new(NotificationCache::new());
        let channel = RealtimeChannelManager::new(
            realtime_transport,
            store.clone(),
            coordinator.clone(),
            cache.clone(),
            fetcher,
            settings.realtime.clone(),
        )
        .spawn();

        let scheduler = Arc::new(ExpiryScheduler::new(
            store.clone(),
            coordinator.clone(),
            settings.session.warning_threshold(),
            events_tx.clone(),
        ));

        let (monitor, handle) = SessionMonitor::new(
            store.clone(),
            scheduler.clone(),
            coordinator.clone(),
            shared,
            tab_store.clone(),
            alerts,
            navigator,
            guard,
            Some(channel.clone()),
            settings.storage.clone(),
            &settings.session,
            (events_tx, events_rx),
        );
        let monitor_task = tokio::spawn(monitor.run());
        tracing::info!(%runtime_id, "session runtime started");

        Ok(SessionRuntime {
            runtime_id,
            store,
            coordinator,
            scheduler,
            cache,
            http,
            tab_store,
            handle,
            channel,
            monitor_task,
        })
    }
}
