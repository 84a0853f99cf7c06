//! Gateway list provider
//!
//! Clients connect to silos through gateways. The list is derived from the
//! membership table on every call: active silos only, addressed by their
//! proxy port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use trellis_common::TrellisError;
use url::Url;

use crate::membership::MembershipTable;
use crate::model::{MembershipEntry, SiloStatus};

/// URI scheme of gateway endpoints
pub const GATEWAY_SCHEME: &str = "gwy.tcp";

/// Source of the gateways a client may connect to
#[async_trait]
pub trait GatewayListProvider: Send + Sync {
    /// How stale a returned list may be
    fn max_staleness(&self) -> Duration;

    /// Whether the list can change after startup
    fn is_updatable(&self) -> bool;

    async fn initialize_gateway_list_provider(&self) -> anyhow::Result<()>;

    /// Current gateway URIs, in no particular order
    async fn get_gateways(&self) -> anyhow::Result<Vec<Url>>;
}

/// Gateway list read from a membership table
pub struct MembershipGatewayListProvider {
    membership: Arc<dyn MembershipTable>,
    max_staleness: Duration,
}

impl MembershipGatewayListProvider {
    pub fn new(membership: Arc<dyn MembershipTable>, max_staleness: Duration) -> Self {
        Self {
            membership,
            max_staleness,
        }
    }
}

/// Gateway URI of an entry: `gwy.tcp://host:proxy_port/generation`
///
/// Falls back to the silo port when the entry has no proxy port.
pub fn gateway_uri(entry: &MembershipEntry) -> anyhow::Result<Url> {
    let address = entry.silo_address;
    let port = match entry.proxy_port {
        0 => address.endpoint.port(),
        port => u16::try_from(port)
            .map_err(|_| TrellisError::Coercion(format!("invalid proxy port {}", port)))?,
    };
    let endpoint = SocketAddr::new(address.endpoint.ip(), port);

    let uri = format!("{}://{}/{}", GATEWAY_SCHEME, endpoint, address.generation);
    Url::parse(&uri).map_err(|e| anyhow::anyhow!("invalid gateway uri '{}': {}", uri, e))
}

#[async_trait]
impl GatewayListProvider for MembershipGatewayListProvider {
    fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    fn is_updatable(&self) -> bool {
        true
    }

    async fn initialize_gateway_list_provider(&self) -> anyhow::Result<()> {
        self.membership.initialize(false).await
    }

    async fn get_gateways(&self) -> anyhow::Result<Vec<Url>> {
        let data = self.membership.read_all().await?;
        let gateways = data
            .entries
            .iter()
            .filter(|e| e.entry.status == SiloStatus::Active)
            .map(|e| gateway_uri(&e.entry))
            .collect::<anyhow::Result<Vec<_>>>()?;

        debug!(count = gateways.len(), "Gateway list read");
        Ok(gateways)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipDirectory;
    use crate::model::SiloAddress;
    use trellis_persistence::{MemorySession, TableVersion};

    fn entry(address: &str, status: SiloStatus, proxy_port: i32) -> MembershipEntry {
        let mut entry = MembershipEntry::new(address.parse().unwrap(), status, "node");
        entry.proxy_port = proxy_port;
        entry
    }

    #[test]
    fn test_gateway_uri_uses_proxy_port() {
        let uri = gateway_uri(&entry("10.0.0.1:11111@5", SiloStatus::Active, 30000)).unwrap();
        assert_eq!(uri.as_str(), "gwy.tcp://10.0.0.1:30000/5");
        assert_eq!(uri.scheme(), GATEWAY_SCHEME);
        assert_eq!(uri.port(), Some(30000));
    }

    #[test]
    fn test_gateway_uri_falls_back_to_silo_port() {
        let uri = gateway_uri(&entry("10.0.0.1:11111@5", SiloStatus::Active, 0)).unwrap();
        assert_eq!(uri.port(), Some(11111));

        assert!(gateway_uri(&entry("10.0.0.1:11111@5", SiloStatus::Active, 70000)).is_err());
    }

    #[tokio::test]
    async fn test_get_gateways_returns_active_silos() {
        let directory = Arc::new(MembershipDirectory::new(
            "test",
            "cluster-a",
            Arc::new(MemorySession::new()),
        ));
        directory.initialize(true).await.unwrap();

        let provider =
            MembershipGatewayListProvider::new(directory.clone(), Duration::from_secs(60));
        provider.initialize_gateway_list_provider().await.unwrap();
        assert!(provider.is_updatable());
        assert_eq!(provider.max_staleness(), Duration::from_secs(60));
        assert!(provider.get_gateways().await.unwrap().is_empty());

        let silos = [
            entry("10.0.0.1:11111@1", SiloStatus::Active, 30000),
            entry("10.0.0.2:11111@1", SiloStatus::Active, 30001),
            entry("10.0.0.3:11111@1", SiloStatus::Dead, 30002),
            entry("10.0.0.4:11111@1", SiloStatus::Joining, 30003),
        ];
        for silo in &silos {
            let version: TableVersion = directory.read_all().await.unwrap().version;
            assert!(directory.insert_row(silo, &version).await.unwrap());
        }

        let mut gateways: Vec<String> = provider
            .get_gateways()
            .await
            .unwrap()
            .into_iter()
            .map(|uri| uri.to_string())
            .collect();
        gateways.sort();
        assert_eq!(
            gateways,
            vec![
                "gwy.tcp://10.0.0.1:30000/1".to_string(),
                "gwy.tcp://10.0.0.2:30001/1".to_string(),
            ]
        );

        let address: SiloAddress = "10.0.0.3:11111@1".parse().unwrap();
        assert!(
            directory
                .read_row(&address)
                .await
                .unwrap()
                .get(&address)
                .is_some()
        );
    }
}
