//! Coordination context
//!
//! Owns the storage session and the three components built on it. The
//! session is opened once on start and released on dispose, including when
//! initialization fails halfway.

use std::sync::Arc;

use tracing::{info, warn};
use trellis_clustering::{
    GatewayListProvider, MembershipDirectory, MembershipGatewayListProvider, MembershipTable,
};
use trellis_common::metrics::init_metrics;
use trellis_persistence::{StorageSession, connect};
use trellis_reminders::{ReminderDirectory, ReminderTable};

use crate::startup::Settings;

/// Running membership, gateway and reminder components of one cluster
pub struct CoordinationContext {
    settings: Settings,
    session: Arc<dyn StorageSession>,
    membership: Arc<MembershipDirectory>,
    gateways: Arc<MembershipGatewayListProvider>,
    reminders: Arc<ReminderDirectory>,
}

impl CoordinationContext {
    /// Open the session, then build and initialize every component
    pub async fn start(settings: Settings) -> anyhow::Result<Self> {
        settings.check()?;
        init_metrics();

        let session = connect(&settings.storage).await?;
        let context = Self::with_session(settings, session);

        if let Err(e) = context.initialize().await {
            context.dispose().await;
            return Err(e);
        }

        info!(
            cluster_id = %context.settings.cluster_id,
            mode = %context.session.storage_mode(),
            "Coordination context started"
        );
        Ok(context)
    }

    /// Build the components over an existing session, without initializing
    pub fn with_session(settings: Settings, session: Arc<dyn StorageSession>) -> Self {
        let membership = Arc::new(MembershipDirectory::new(
            settings.client_name.clone(),
            settings.cluster_id.clone(),
            session.clone(),
        ));
        let gateways = Arc::new(MembershipGatewayListProvider::new(
            membership.clone(),
            settings.gateway.max_staleness(),
        ));
        let reminders = Arc::new(ReminderDirectory::new(
            settings.client_name.clone(),
            session.clone(),
        ));

        Self {
            settings,
            session,
            membership,
            gateways,
            reminders,
        }
    }

    /// Initialize every component; each step is idempotent
    pub async fn initialize(&self) -> anyhow::Result<()> {
        self.session.health_check().await?;
        self.membership.initialize(true).await?;
        self.gateways.initialize_gateway_list_provider().await?;
        self.reminders.init().await?;
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> Arc<dyn StorageSession> {
        self.session.clone()
    }

    pub fn membership(&self) -> Arc<MembershipDirectory> {
        self.membership.clone()
    }

    pub fn gateways(&self) -> Arc<MembershipGatewayListProvider> {
        self.gateways.clone()
    }

    pub fn reminders(&self) -> Arc<ReminderDirectory> {
        self.reminders.clone()
    }

    /// Release the storage session; failures are logged and swallowed
    pub async fn dispose(&self) {
        match self.session.close().await {
            Ok(()) => info!(
                cluster_id = %self.settings.cluster_id,
                "Coordination context disposed"
            ),
            Err(e) => warn!(
                cluster_id = %self.settings.cluster_id,
                error = %e,
                "Ignoring failure while closing storage session"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_clustering::{MembershipEntry, SiloStatus, TableVersion};
    use trellis_common::TrellisError;
    use trellis_persistence::{MembershipPersistence, MemorySession};

    #[tokio::test]
    async fn test_start_in_memory() {
        let context = CoordinationContext::start(Settings::in_memory("c1"))
            .await
            .unwrap();
        assert_eq!(context.settings().cluster_id, "c1");
        assert_eq!(context.membership().cluster_id(), "c1");

        let data = context.membership().read_all().await.unwrap();
        assert_eq!(data.version, TableVersion::initial());
        assert!(context.gateways().get_gateways().await.unwrap().is_empty());
        assert!(
            context
                .reminders()
                .read_rows_in_range(0, u64::MAX)
                .await
                .unwrap()
                .is_empty()
        );

        context.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_swallows_close_errors() {
        let context = CoordinationContext::start(Settings::in_memory("c1"))
            .await
            .unwrap();
        context.dispose().await;
        context.dispose().await;

        let err = context.membership().read_all().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<TrellisError>(),
            Some(&TrellisError::SessionClosed)
        );
    }

    #[tokio::test]
    async fn test_components_share_the_session() {
        let session: Arc<dyn StorageSession> = Arc::new(MemorySession::new());
        let context =
            CoordinationContext::with_session(Settings::in_memory("c1"), session.clone());
        context.initialize().await.unwrap();

        let mut entry = MembershipEntry::new(
            "127.0.0.1:11111@1".parse().unwrap(),
            SiloStatus::Active,
            "local",
        );
        entry.proxy_port = 30000;
        assert!(
            context
                .membership()
                .insert_row(&entry, &TableVersion::initial())
                .await
                .unwrap()
        );

        let gateways = context.gateways().get_gateways().await.unwrap();
        assert_eq!(gateways.len(), 1);
        assert!(session.membership_find("c1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let mut settings = Settings::in_memory("c1");
        settings.cluster_id.clear();
        assert!(CoordinationContext::start(settings).await.is_err());
    }
}
