use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use certkeep_server::certificate::{CertificateService, IssuanceConfig};
use certkeep_server::config::{ConfigService, JwtSecret};
use certkeep_server::handler::CommandHandler;
use certkeep_server::issuer::{
    AcmeConfig, AcmeIssuer, ChallengeResponder, Issuer, SelfSignedConfig, SelfSignedIssuer,
};
use certkeep_server::paths::Layout;
use certkeep_server::socket::SocketServer;
use certkeep_server::store::SqliteStateStore;
use clap::{Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// certkeep - TLS certificate lifecycle and signing-secret service
#[derive(Parser)]
#[command(name = "certkeep-server")]
#[command(version)]
#[command(about = "certkeep - TLS certificate lifecycle and signing-secret service")]
pub struct Args {
    /// Unix socket path for management commands
    #[arg(long, env = "CERTKEEP_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Data directory for the database and ACME account
    #[arg(long, env = "CERTKEEP_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Disable ACME and issue self-signed certificates
    #[arg(long, env = "CERTKEEP_NO_ACME")]
    pub no_acme: bool,

    /// Use Let's Encrypt staging environment
    #[arg(long, env = "CERTKEEP_ACME_STAGING")]
    pub acme_staging: bool,

    /// ACME contact email for Let's Encrypt
    #[arg(long, env = "CERTKEEP_ACME_EMAIL")]
    pub acme_email: Option<String>,

    /// Port for the HTTP-01 challenge responder
    #[arg(long, env = "CERTKEEP_HTTP_PORT", default_value_t = 80)]
    pub http_port: u16,

    /// Maximum number of certificate issuances in flight
    #[arg(long, env = "CERTKEEP_MAX_CONCURRENT_ISSUANCES", default_value_t = 4)]
    pub max_concurrent_issuances: usize,

    /// Lifetime of self-signed certificates in days
    #[arg(long, env = "CERTKEEP_SELF_SIGNED_VALIDITY_DAYS", default_value_t = 90)]
    pub self_signed_validity_days: u32,

    /// Base64 signing secret to import at startup
    #[arg(long, env = "CERTKEEP_IMPORT_JWT_SECRET", hide_env_values = true)]
    pub import_jwt_secret: Option<String>,

    /// Log output format
    #[arg(long, env = "CERTKEEP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    layout: Layout,
    no_acme: bool,
    acme_staging: bool,
    acme_email: Option<String>,
    http_port: u16,
    max_concurrent_issuances: usize,
    self_signed_validity_days: u32,
    import_jwt_secret: Option<JwtSecret>,
}

impl ServerConfig {
    /// Resolve arguments into a config, applying checkout-relative defaults in debug builds
    fn resolve(args: &Args, exe: Option<&Path>) -> Result<Self, String> {
        let layout = Layout::detect(exe, cfg!(debug_assertions))
            .with_overrides(args.socket.clone(), args.data_dir.clone());

        let import_jwt_secret = match &args.import_jwt_secret {
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded.trim())
                    .map_err(|e| format!("--import-jwt-secret is not valid base64: {}", e))?;
                if bytes.is_empty() {
                    return Err("--import-jwt-secret must not be empty".to_string());
                }
                Some(JwtSecret::from_bytes(bytes))
            }
            None => None,
        };

        if args.max_concurrent_issuances == 0 {
            return Err("--max-concurrent-issuances must be at least 1".to_string());
        }
        if args.self_signed_validity_days == 0 {
            return Err("--self-signed-validity-days must be at least 1".to_string());
        }

        Ok(Self {
            layout,
            no_acme: args.no_acme,
            acme_staging: args.acme_staging,
            acme_email: args.acme_email.clone(),
            http_port: args.http_port,
            max_concurrent_issuances: args.max_concurrent_issuances,
            self_signed_validity_days: args.self_signed_validity_days,
            import_jwt_secret,
        })
    }
}

fn install_rustls_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return;
    }

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_rustls_crypto_provider();

    let args = Args::parse();
    init_tracing(args.log_format);

    let exe = std::env::current_exe().ok();
    let config = ServerConfig::resolve(&args, exe.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("certkeep v{}", env!("CARGO_PKG_VERSION"));
    let layout = &config.layout;
    tracing::info!("Socket: {}", layout.socket.display());
    tracing::info!("Data directory: {}", layout.data_dir.display());

    std::fs::create_dir_all(&layout.data_dir)?;
    let store = Arc::new(SqliteStateStore::open(layout.database_path())?);

    let config_service = Arc::new(ConfigService::new(store.clone()));
    match &config.import_jwt_secret {
        Some(secret) => {
            config_service.set_jwt_secret(secret.as_bytes())?;
        }
        None => {
            let secret = config_service.jwt_secret()?;
            tracing::debug!(bytes = secret.len(), "Signing secret ready");
        }
    }

    let mut challenge_task = None;
    let issuer: Arc<dyn Issuer> = if config.no_acme {
        tracing::info!("ACME disabled, issuing self-signed certificates");
        self_signed_issuer(&config)
    } else {
        let acme = Arc::new(AcmeIssuer::new(AcmeConfig {
            staging: config.acme_staging,
            email: config.acme_email.clone(),
            account_dir: layout.acme_dir(),
            ..Default::default()
        }));

        match acme.init().await {
            Ok(()) => {
                if config.acme_staging {
                    tracing::warn!(
                        "Using Let's Encrypt STAGING environment - certificates will NOT be trusted!"
                    );
                } else {
                    tracing::info!("ACME client initialized with Let's Encrypt production");
                }

                let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.http_port));
                let responder = ChallengeResponder::bind(addr, acme.challenge_tokens()).await?;
                challenge_task = Some(tokio::spawn(responder.serve()));
                acme as Arc<dyn Issuer>
            }
            Err(e) => {
                tracing::error!("Failed to initialize ACME client: {}", e);
                tracing::warn!("Continuing without ACME - issuing self-signed certificates");
                self_signed_issuer(&config)
            }
        }
    };

    let certs = CertificateService::new(
        store.clone(),
        issuer,
        IssuanceConfig {
            max_concurrent_issuances: config.max_concurrent_issuances,
        },
    );
    let handler = CommandHandler::new(certs, config_service);

    let server = SocketServer::new(&layout.socket);
    let serve = server.run(move |cmd| {
        let handler = handler.clone();
        async move { handler.handle(cmd) }
    });

    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!("Management socket failed: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutting down");
        }
    }

    if let Some(task) = challenge_task {
        task.abort();
    }
    if let Err(e) = std::fs::remove_file(&layout.socket)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!("Failed to remove socket {}: {}", layout.socket.display(), e);
    }

    Ok(())
}

fn self_signed_issuer(config: &ServerConfig) -> Arc<dyn Issuer> {
    Arc::new(SelfSignedIssuer::new(SelfSignedConfig {
        validity_days: config.self_signed_validity_days,
    }))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
