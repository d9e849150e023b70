//! Resolves which host interface owns a given IP address. The network
//! controller calls this once per unique `hostIP` per install and caches
//! the result for the duration of that install.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::TryStreamExt;
use netlink_packet_route::address::AddressAttribute;
use netlink_packet_route::link::LinkAttribute;

use crate::error::NetworkError;

/// Enumerates host interfaces and compares by address equality
/// (deliberately not a default-route lookup).
#[async_trait]
pub trait InterfaceResolver: Send + Sync {
    async fn resolve(&self, host_ip: IpAddr) -> Result<String, NetworkError>;
}

/// Real resolver, backed by a netlink `rtnetlink` connection.
pub struct RtnetlinkResolver;

impl RtnetlinkResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RtnetlinkResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterfaceResolver for RtnetlinkResolver {
    async fn resolve(&self, host_ip: IpAddr) -> Result<String, NetworkError> {
        let (connection, handle, _) = rtnetlink::new_connection()
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?;
        tokio::spawn(connection);

        let mut addresses = handle.address().get().execute();
        let mut owning_index = None;
        while let Some(msg) = addresses
            .try_next()
            .await
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?
        {
            let matches = msg.attributes.iter().any(|attr| {
                matches!(attr, AddressAttribute::Address(addr) if *addr == host_ip)
            });
            if matches {
                owning_index = Some(msg.header.index);
                break;
            }
        }

        let index = owning_index.ok_or_else(|| NetworkError::InterfaceNotFound(host_ip.to_string()))?;

        let mut links = handle.link().get().match_index(index).execute();
        let link = links
            .try_next()
            .await
            .map_err(|e| NetworkError::BackendUnavailable(e.to_string()))?
            .ok_or_else(|| NetworkError::InterfaceNotFound(host_ip.to_string()))?;

        link.attributes
            .iter()
            .find_map(|attr| match attr {
                LinkAttribute::IfName(name) => Some(name.clone()),
                _ => None,
            })
            .ok_or_else(|| NetworkError::InterfaceNotFound(host_ip.to_string()))
    }
}

/// Cache wrapping any resolver, so repeated lookups of the same `hostIP` —
/// within one `vm_started_build` call, or across calls over the lifetime of
/// the controller — cost one netlink round trip. Meant to sit between the
/// controller and the real `RtnetlinkResolver`; the mapping from host IP to
/// owning interface does not change once the controller is constructed.
pub struct CachingResolver<R: InterfaceResolver> {
    inner: R,
    cache: Mutex<HashMap<IpAddr, String>>,
}

impl<R: InterfaceResolver> CachingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, cache: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl<R: InterfaceResolver> InterfaceResolver for CachingResolver<R> {
    async fn resolve(&self, host_ip: IpAddr) -> Result<String, NetworkError> {
        if let Some(name) = self.cache.lock().unwrap().get(&host_ip) {
            return Ok(name.clone());
        }
        let name = self.inner.resolve(host_ip).await?;
        self.cache.lock().unwrap().insert(host_ip, name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct FakeResolver {
        addrs: StdHashMap<IpAddr, String>,
    }

    #[async_trait]
    impl InterfaceResolver for FakeResolver {
        async fn resolve(&self, host_ip: IpAddr) -> Result<String, NetworkError> {
            self.addrs
                .get(&host_ip)
                .cloned()
                .ok_or_else(|| NetworkError::InterfaceNotFound(host_ip.to_string()))
        }
    }

    #[tokio::test]
    async fn caching_resolver_hits_cache_on_second_call() {
        let mut addrs = StdHashMap::new();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        addrs.insert(ip, "eth0".to_string());
        let resolver = CachingResolver::new(FakeResolver { addrs });

        assert_eq!(resolver.resolve(ip).await.unwrap(), "eth0");
        assert_eq!(resolver.cache.lock().unwrap().len(), 1);
        assert_eq!(resolver.resolve(ip).await.unwrap(), "eth0");
    }

    #[tokio::test]
    async fn unresolved_address_is_interface_not_found() {
        let resolver = FakeResolver { addrs: StdHashMap::new() };
        let err = resolver.resolve("192.168.1.1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, NetworkError::InterfaceNotFound(_)));
    }
}
