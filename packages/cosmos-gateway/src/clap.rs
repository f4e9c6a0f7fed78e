use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::{Gateway, GatewayBuilder, RegistrySource, SignMode};

/// Command line options for loading chains and talking to their nodes
#[derive(clap::Parser, Clone, Debug)]
pub struct GatewayOpt {
    /// Local chain-registry checkout, GitHub is used when absent
    #[clap(long, env = "COSMOS_REGISTRY_DIR", global = true)]
    pub registry_dir: Option<PathBuf>,
    /// Seconds a healthy RPC endpoint is reused before probing again
    #[clap(long, env = "COSMOS_CONNECTION_TTL", global = true)]
    pub connection_ttl: Option<u64>,
    /// Seconds allowed for each endpoint health probe
    #[clap(long, env = "COSMOS_PROBE_TIMEOUT", global = true)]
    pub probe_timeout: Option<u64>,
    /// Seconds allowed for a single query
    #[clap(long, env = "COSMOS_QUERY_TIMEOUT", global = true)]
    pub query_timeout: Option<u64>,
    /// Optional gas adjustment override
    #[clap(long, env = "COSMOS_GAS_ADJUSTMENT", global = true)]
    pub gas_adjustment: Option<f64>,
    /// Seconds between registry refreshes
    #[clap(long, env = "COSMOS_REFRESH_INTERVAL", global = true)]
    pub refresh_interval: Option<u64>,
    /// Default sign mode: direct or amino-json
    #[clap(long, env = "COSMOS_SIGN_MODE", global = true)]
    pub sign_mode: Option<SignMode>,
}

impl GatewayOpt {
    pub fn builder(&self) -> GatewayBuilder {
        self.clone().into_builder()
    }

    pub fn into_builder(self) -> GatewayBuilder {
        let GatewayOpt {
            registry_dir,
            connection_ttl,
            probe_timeout,
            query_timeout,
            gas_adjustment,
            refresh_interval,
            sign_mode,
        } = self;

        let mut builder = GatewayBuilder::new();
        if let Some(dir) = registry_dir {
            builder.set_registry_source(RegistrySource::Filesystem(dir));
        }
        builder.set_connection_ttl(connection_ttl.map(Duration::from_secs));
        builder.set_probe_timeout(probe_timeout.map(Duration::from_secs));
        builder.set_query_timeout(query_timeout.map(Duration::from_secs));
        builder.set_gas_adjustment(gas_adjustment);
        builder.set_refresh_interval(refresh_interval.map(Duration::from_secs));
        builder.set_sign_mode(sign_mode);
        builder
    }

    pub async fn build(&self) -> Result<Gateway> {
        self.builder()
            .build()
            .await
            .context("Unable to load the chain registry")
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(clap::Parser)]
    struct Cmd {
        #[clap(flatten)]
        opt: GatewayOpt,
    }

    #[test]
    fn options_reach_the_builder() {
        let cmd = Cmd::try_parse_from([
            "test",
            "--registry-dir",
            "/tmp/chain-registry",
            "--query-timeout",
            "3",
            "--sign-mode",
            "amino-json",
        ])
        .unwrap();
        let builder = cmd.opt.into_builder();
        assert_eq!(
            builder.registry_source(),
            &RegistrySource::Filesystem("/tmp/chain-registry".into())
        );
        assert_eq!(builder.query_timeout(), Duration::from_secs(3));
        assert_eq!(builder.sign_mode(), SignMode::AminoJson);
        assert_eq!(builder.probe_timeout(), Duration::from_secs(5));
    }
}
