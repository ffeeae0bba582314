use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;
use tenant_gate::{KeyMaterialCache, OidcConfig, api, create_extractor};

#[derive(Parser)]
#[command(name = "tenant-gate")]
#[command(about = "OIDC bearer-token gate with per-owner resource scoping")]
struct Cli {
    #[command(flatten)]
    oidc: OidcArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `AUTH_OIDC_*` environment settings.
#[derive(Args)]
struct OidcArgs {
    /// OIDC issuer base URL
    #[arg(long, global = true)]
    issuer: Option<String>,
    /// Expected token audience (not checked when omitted)
    #[arg(long, global = true)]
    audience: Option<String>,
    /// Discovery document URL, if not under the issuer's well-known path
    #[arg(long, global = true)]
    discovery_url: Option<String>,
    #[arg(long, global = true)]
    http_timeout_seconds: Option<u64>,
    #[arg(long, global = true)]
    leeway_seconds: Option<u64>,
}

impl OidcArgs {
    fn apply(self, mut config: OidcConfig) -> OidcConfig {
        if let Some(issuer) = self.issuer {
            config.issuer = issuer.trim().to_string();
        }
        if let Some(audience) = self.audience.filter(|a| !a.trim().is_empty()) {
            config.audience = Some(audience);
        }
        if let Some(url) = self.discovery_url.filter(|u| !u.trim().is_empty()) {
            config.discovery_url = Some(url);
        }
        if let Some(seconds) = self.http_timeout_seconds {
            config.http_timeout_seconds = seconds;
        }
        if let Some(seconds) = self.leeway_seconds {
            config.leeway_seconds = seconds;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Validate a token and print the resulting identity
    CheckToken {
        /// Raw JWT (without the "Bearer " prefix)
        token: String,
    },
    /// Fetch the provider's signing keys and list their key IDs
    FetchKeys,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tenant_gate=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let config = cli.oidc.apply(OidcConfig::from_env()?);

    match cli.command {
        Commands::Serve { bind } => {
            if !config.is_configured() {
                anyhow::bail!("AUTH_OIDC_ISSUER is not set; refusing to start");
            }
            info!("Using OIDC issuer {}", config.normalized_issuer());

            let extractor = Arc::new(create_extractor(config)?);
            let app = api::create_router(api::AppState::new(extractor));

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Server listening on http://{}", bind);

            axum::serve(listener, app).await?;
        }
        Commands::CheckToken { token } => {
            let extractor = create_extractor(config)?;
            let header = format!("Bearer {}", token.trim());

            match extractor.extract_identity(Some(&header)).await {
                Ok(identity) => {
                    println!("{}", serde_json::to_string_pretty(&identity)?);
                }
                Err(e) => {
                    anyhow::bail!("{}", e);
                }
            }
        }
        Commands::FetchKeys => {
            let cache = KeyMaterialCache::new(config)?;
            let keys = cache.get(true).await?;

            println!("JWKS URI: {}", keys.jwks_uri());
            println!("Found {} signing keys", keys.len());
            for key in keys.keys() {
                println!(
                    "  kid={} alg={}",
                    key.kid().map(|k| k.as_str()).unwrap_or("<none>"),
                    key.jwk().alg.as_deref().unwrap_or("<any>")
                );
            }
        }
    }

    Ok(())
}
