//! Reverse DNS enrichment of observed source addresses.

use std::net::IpAddr;

/// PTR lookup behind a trait so pipeline logic can be exercised without the
/// network. Lookups are best-effort: failures yield an empty result.
#[async_trait::async_trait]
pub trait ReverseDns: Send + Sync {
    async fn lookup_ptr(&self, ip: IpAddr) -> Vec<String>;
}

pub struct SystemDns(hickory_resolver::TokioAsyncResolver);

impl SystemDns {
    pub fn from_system_conf() -> anyhow::Result<Self> {
        Ok(Self(hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()?))
    }
}

#[async_trait::async_trait]
impl ReverseDns for SystemDns {
    async fn lookup_ptr(&self, ip: IpAddr) -> Vec<String> {
        match self.0.reverse_lookup(ip).await {
            Ok(lookup) => lookup.iter().map(|name| name.to_string()).collect(),
            Err(err) => {
                tracing::debug!(%ip, error = %err, "reverse lookup failed");
                Vec::new()
            }
        }
    }
}
