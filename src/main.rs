use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use calibre_web_upload::batch::{BatchOptions, BatchUploader, BookFile, ItemReport, RetryConfig};
use calibre_web_upload::client::{MetadataValue, ReqwestTransport, SessionAuthenticator};
use calibre_web_upload::config::{
    self, Config, CredentialOverrides, CredentialSource, LayeredCredentials,
};

#[derive(Debug, Parser)]
#[command(name = "calibre-web-upload", version, about = "Upload books to Calibre-Web")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server base URL, e.g. https://calibre.example.com
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload one or more book files, one login per file
    Upload(UploadArgs),
    /// Log in without uploading, to check credentials
    Login,
    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (password hidden)
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
struct UploadArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    author: Option<String>,

    #[arg(long)]
    description: Option<String>,

    /// Comma-separated list of tags
    #[arg(long)]
    tags: Option<String>,

    #[arg(long)]
    series: Option<String>,

    /// Position in series
    #[arg(long)]
    series_index: Option<f64>,

    /// Comma-separated list of languages
    #[arg(long)]
    languages: Option<String>,

    /// Override the MIME type guessed from the file extension
    #[arg(long)]
    mime_type: Option<String>,

    /// Keep going after a failed file
    #[arg(long)]
    continue_on_fail: bool,

    /// Number of files uploaded at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per file for network failures
    #[arg(long)]
    retries: Option<u32>,
}

impl UploadArgs {
    fn book_files(&self) -> Vec<BookFile> {
        let mut metadata = std::collections::BTreeMap::new();
        let text_fields = [
            ("title", &self.title),
            ("author", &self.author),
            ("description", &self.description),
            ("tags", &self.tags),
            ("series", &self.series),
            ("languages", &self.languages),
        ];
        for (field, value) in text_fields {
            if let Some(value) = value {
                metadata.insert(field.to_string(), MetadataValue::from(value.as_str()));
            }
        }
        if let Some(index) = self.series_index {
            metadata.insert("series_index".to_string(), MetadataValue::from(index));
        }

        self.files
            .iter()
            .map(|path| BookFile {
                path: path.clone(),
                mime_type: self.mime_type.clone(),
                metadata: metadata.clone(),
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => config::get_config_path()?,
    };
    let config_result = config::load_config_from(&config_path);

    let log_level = config_result
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .target(env_logger::Target::Stderr)
        .init();

    log::debug!("Starting calibre-web-upload {}", env!("CARGO_PKG_VERSION"));

    let mut config = config_result
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(timeout) = cli.timeout {
        config.request_timeout_secs = timeout;
    }

    match &cli.command {
        Command::Upload(args) => upload(&cli, config, args).await,
        Command::Login => login(&cli, &config).await,
        Command::Config { action } => config_command(action, &config, &config_path),
    }
}

fn credential_source(cli: &Cli, config: &Config) -> LayeredCredentials {
    let from_cli = CredentialOverrides {
        base_url: cli.base_url.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
    };
    LayeredCredentials::new(vec![
        from_cli,
        CredentialOverrides::from_env(),
        CredentialOverrides::from(config),
    ])
}

fn transport(config: &Config) -> anyhow::Result<ReqwestTransport> {
    Ok(ReqwestTransport::new(Duration::from_secs(
        config.request_timeout_secs,
    ))?)
}

async fn upload(cli: &Cli, mut config: Config, args: &UploadArgs) -> anyhow::Result<ExitCode> {
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(retries) = args.retries {
        config.max_retry_attempts = retries;
    }
    config.continue_on_fail |= args.continue_on_fail;
    config::validate_config(&config)?;

    let credentials = credential_source(cli, &config);
    // Fail once up front instead of once per file
    credentials.credentials()?;

    let options = BatchOptions {
        concurrency: config.concurrency,
        continue_on_fail: config.continue_on_fail,
        retry: RetryConfig {
            max_retries: config.max_retry_attempts,
            ..RetryConfig::default()
        },
    };

    let files = args.book_files();
    let total = files.len();
    let uploader = BatchUploader::new(
        Arc::new(transport(&config)?),
        Arc::new(credentials),
        options,
    );
    let outcomes = uploader.run(files).await;

    let mut all_ok = outcomes.len() == total;
    for outcome in &outcomes {
        let report = ItemReport::from(outcome);
        all_ok &= report.success;
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn login(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    let credentials = credential_source(cli, config).credentials()?;
    let transport = transport(config)?;

    match SessionAuthenticator::new(&transport)
        .authenticate(&credentials)
        .await
    {
        Ok(session) => {
            println!(
                "{}",
                json!({
                    "success": true,
                    "base_url": session.base_url(),
                    "username": credentials.username(),
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!(
                "{}",
                json!({
                    "success": false,
                    "error": e.to_string(),
                    "kind": e.kind(),
                    "step": e.step(),
                })
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn config_command(
    action: &ConfigAction,
    config: &Config,
    config_path: &std::path::Path,
) -> anyhow::Result<ExitCode> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            config::save_config(&Config::default(), config_path)?;
            println!("Wrote {}", config_path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
