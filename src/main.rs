use anyhow::{Context, Result};
use drive_gateway::{config::Config, gateway::FileField, server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

const USAGE: &str = "Usage: drive-gateway [serve | status | files [page_size] | download <file_id> [output]]";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; the configured level applies once config is loaded
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("serve");

    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    if std::env::var("RUST_LOG").is_err() {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.server.log_level)) {
            tracing::warn!("Invalid log level '{}': {}", config.server.log_level, e);
        }
    }

    match command {
        "serve" => {
            info!("🚀 Drive Gateway v{}", drive_gateway::VERSION);
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            info!("✓ Configuration loaded");
            info!("  HTTP: {}", config.server.bind);
            info!("  Redirect URI: {}", config.google.redirect_uri);

            server::serve(config).await?;
        }

        "status" => status(&config).await?,

        "files" => {
            let page_size = match args.get(2) {
                Some(raw) => raw.parse().context("page_size must be a positive integer")?,
                None => config.google.page_size,
            };
            list_files(&config, page_size).await?;
        }

        "download" => {
            let Some(file_id) = args.get(2) else {
                eprintln!("{}", USAGE);
                std::process::exit(1);
            };
            download(&config, file_id, args.get(3).map(String::as_str)).await?;
        }

        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let store = config.credential_store()?;

    println!("\n🔐 Authentication Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

    match store.load().await {
        Ok(Some(credential)) => {
            println!("✅ Google Drive: credential stored");
            println!("   Scopes: {}", credential.scopes.join(" "));
            println!(
                "   Refresh token: {}",
                if credential.refresh_token.is_some() { "yes" } else { "no" }
            );
            match credential.expires_at {
                Some(expires) if credential.is_expired() => {
                    println!("⚠️  Access token expired at {} - re-authorize via /auth", expires)
                }
                Some(expires) => {
                    let remaining = expires - chrono::Utc::now();
                    println!("   Expires: {} ({} minutes remaining)", expires, remaining.num_minutes())
                }
                None => println!("   Expires: unknown"),
            }
        }
        Ok(None) => println!("❌ Google Drive: not authenticated"),
        Err(e) => println!("❌ Google Drive: stored credential unusable ({})", e),
    }
    println!();

    Ok(())
}

async fn list_files(config: &Config, page_size: u32) -> Result<()> {
    let state = server::build_state(config).await?;
    let page = state
        .gateway
        .list_files(page_size, &FileField::ALL, None)
        .await?;

    for file in &page.files {
        println!(
            "{}  {}  {}",
            file.id,
            file.mime_type.as_deref().unwrap_or("-"),
            file.display_name()
        );
    }
    if let Some(token) = page.next_page_token {
        println!("\n(more files available, page token: {})", token);
    }

    Ok(())
}

async fn download(config: &Config, file_id: &str, output: Option<&str>) -> Result<()> {
    let state = server::build_state(config).await?;

    let metadata = state.gateway.get_file_metadata(file_id).await?;
    if metadata.is_google_native() {
        anyhow::bail!(
            "{} is a Google Workspace document ({}) with no binary content to download",
            metadata.display_name(),
            metadata.mime_type.as_deref().unwrap_or_default()
        );
    }

    // An explicit output may replace an existing file; a provider-named one never does
    let (path, overwrite) = match output {
        Some(output) => (PathBuf::from(output), true),
        None => (PathBuf::from(metadata.local_file_name()), false),
    };

    let stream = state.gateway.download_file(file_id).await?;
    let bytes = stream
        .save_as(&path, overwrite)
        .await
        .with_context(|| format!("Failed to save {}", path.display()))?;

    println!(
        "✅ Downloaded {} ({} bytes) to {}",
        metadata.display_name(),
        bytes,
        path.display()
    );
    Ok(())
}
