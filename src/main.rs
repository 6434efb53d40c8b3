use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use issuebridge::exclusion;
use issuebridge::{
    Config, EffectiveSettings, FetchResult, GitHubGatewayFactory, Identity, IssueCollector,
    Purpose, RepositoryTarget, SettingsResolver, SqliteCredentialStore, TokenCipher,
};

#[derive(Parser)]
#[command(name = "issuebridge")]
#[command(about = "Fetch GitHub issues on behalf of chat community members")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Community (server) the user belongs to
    #[arg(long, global = true)]
    community: Option<String>,

    /// User whose settings are read and written
    #[arg(long, global = true)]
    user: Option<String>,

    /// Channel the command is issued from
    #[arg(long, global = true, default_value = "cli")]
    channel: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init,

    /// Register a GitHub token (validated before it is stored)
    Token {
        /// Personal access token
        token: String,
    },

    /// Manage repository exclusions
    Exclude {
        #[command(subcommand)]
        exclude_command: ExcludeCommands,
    },

    /// Manage notification channels
    Notify {
        #[command(subcommand)]
        notify_command: NotifyCommands,
    },

    /// List open issues for all repositories, a user, or owner/repo
    Issues {
        /// `all`, a username, or `owner/repo`
        target: String,
    },

    /// List open issues assigned to you
    Assigned,
}

#[derive(Subcommand)]
enum ExcludeCommands {
    /// Replace the exclusion list (no patterns clears it)
    Set {
        #[arg(long, value_enum)]
        purpose: PurposeArg,

        /// Patterns: owner/repo, owner/* or owner
        patterns: Vec<String>,

        /// Read patterns from a file, one per line
        #[arg(long, conflicts_with = "patterns")]
        from_file: Option<PathBuf>,
    },

    /// Show the exclusion list
    Show {
        #[arg(long, value_enum)]
        purpose: PurposeArg,
    },
}

#[derive(Subcommand)]
enum NotifyCommands {
    /// Route notifications to a channel
    Set {
        #[arg(long, value_enum, default_value = "all")]
        purpose: NotifyScope,

        /// Target channel id
        target_channel: String,
    },

    /// Show notification channels
    Show,

    /// Remove all notification channels
    Clear,
}

#[derive(ValueEnum, Clone, Copy)]
enum PurposeArg {
    Issues,
    Assign,
}

impl From<PurposeArg> for Purpose {
    fn from(arg: PurposeArg) -> Self {
        match arg {
            PurposeArg::Issues => Purpose::Issues,
            PurposeArg::Assign => Purpose::Assign,
        }
    }
}

#[derive(ValueEnum, Clone, Copy)]
enum NotifyScope {
    Issues,
    Assign,
    All,
}

/// Services wired from configuration
struct App {
    config: Config,
    resolver: SettingsResolver,
    sources: Arc<GitHubGatewayFactory>,
    collector: IssueCollector,
}

impl App {
    fn build(config: Config) -> Result<Self> {
        let store = SqliteCredentialStore::open_at(&config.database_path)
            .with_context(|| format!("Failed to open database: {}", config.database_path))?;
        let cipher = TokenCipher::from_env(&config.security.encryption_key_env)
            .context("Credential encryption is not configured")?;
        let sources = Arc::new(
            GitHubGatewayFactory::new(&config.github).context("Failed to create GitHub client")?,
        );

        let resolver = SettingsResolver::new(Arc::new(store), Arc::new(cipher));
        let collector = IssueCollector::new(sources.clone(), (&config).into());

        Ok(Self {
            config,
            resolver,
            sources,
            collector,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;

    init_logging(cli.verbose, &config.logging.level)?;
    info!("Starting issuebridge v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init => cmd_init(cli.config.as_deref(), &config),
        Commands::Token { ref token } => {
            let app = App::build(config)?;
            cmd_token(&app, &identity(&cli)?, &cli.channel, token).await
        }
        Commands::Exclude {
            ref exclude_command,
        } => {
            let app = App::build(config)?;
            cmd_exclude(&app, &identity(&cli)?, &cli.channel, exclude_command)
        }
        Commands::Notify {
            ref notify_command,
        } => {
            let app = App::build(config)?;
            cmd_notify(&app, &identity(&cli)?, &cli.channel, notify_command)
        }
        Commands::Issues { ref target } => {
            let app = App::build(config)?;
            cmd_issues(&app, &identity(&cli)?, target).await
        }
        Commands::Assigned => {
            let app = App::build(config)?;
            cmd_assigned(&app, &identity(&cli)?).await
        }
    }
}

fn init_logging(verbose: bool, level: &str) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) if path.exists() => Config::load(&path),
        Some(_) => Ok(Config::default()),
        None => Config::load_or_default(),
    }
}

fn identity(cli: &Cli) -> Result<Identity> {
    let community = cli
        .community
        .as_deref()
        .context("--community is required for this command")?;
    let user = cli
        .user
        .as_deref()
        .context("--user is required for this command")?;
    Ok(Identity::new(community, user))
}

fn cmd_init(config_path: Option<&std::path::Path>, config: &Config) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    config.save(&path)?;

    println!("✅ issuebridge initialized");
    println!("   Config: {:?}", path);
    println!("   Database: {}", config.database_path);
    println!(
        "   Next: export {} and run 'issuebridge token <TOKEN>'",
        config.security.encryption_key_env
    );
    Ok(())
}

async fn cmd_token(app: &App, identity: &Identity, channel: &str, token: &str) -> Result<()> {
    println!("🔐 Validating token with GitHub...");
    app.resolver
        .register_credential(identity, channel, token, app.sources.as_ref())
        .await
        .context("Token registration failed")?;

    println!("✅ Token saved for {}", identity);
    Ok(())
}

fn cmd_exclude(
    app: &App,
    identity: &Identity,
    channel: &str,
    command: &ExcludeCommands,
) -> Result<()> {
    match command {
        ExcludeCommands::Set {
            purpose,
            patterns,
            from_file,
        } => {
            let patterns = match from_file {
                Some(path) => {
                    let text = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read patterns from {:?}", path))?;
                    exclusion::parse_patterns(&text)?
                }
                None => patterns.clone(),
            };

            let purpose = Purpose::from(*purpose);
            let saved = app
                .resolver
                .save_exclusions(identity, channel, purpose, patterns.as_slice())?;

            if saved.is_empty() {
                println!("🧹 Cleared {} exclusions", purpose);
            } else {
                println!("✅ Saved {} {} exclusions:", saved.len(), purpose);
                for pattern in saved {
                    println!("   🚫 {}", pattern);
                }
            }
        }
        ExcludeCommands::Show { purpose } => {
            let purpose = Purpose::from(*purpose);
            let patterns = app.resolver.excluded_repositories(identity, purpose)?;

            if patterns.is_empty() {
                println!("No {} exclusions configured", purpose);
            } else {
                println!("{} exclusions ({}):", purpose, patterns.len());
                for pattern in patterns {
                    println!("   🚫 {}", pattern);
                }
            }
        }
    }
    Ok(())
}

fn cmd_notify(
    app: &App,
    identity: &Identity,
    channel: &str,
    command: &NotifyCommands,
) -> Result<()> {
    match command {
        NotifyCommands::Set {
            purpose,
            target_channel,
        } => {
            match purpose {
                NotifyScope::All => {
                    app.resolver
                        .save_notification_channel_all(identity, channel, target_channel)?
                }
                NotifyScope::Issues => app.resolver.save_notification_channel(
                    identity,
                    channel,
                    Purpose::Issues,
                    target_channel,
                )?,
                NotifyScope::Assign => app.resolver.save_notification_channel(
                    identity,
                    channel,
                    Purpose::Assign,
                    target_channel,
                )?,
            }
            println!("✅ Notifications routed to {}", target_channel);
        }
        NotifyCommands::Show => {
            for purpose in Purpose::ALL {
                match app.resolver.notification_channel(identity, purpose)? {
                    Some(target) => println!("   📣 {}: {}", purpose, target),
                    None => println!("   📣 {}: (not set)", purpose),
                }
            }
        }
        NotifyCommands::Clear => {
            app.resolver.clear_notification_channels(identity)?;
            println!("🧹 Notification channels cleared");
        }
    }
    Ok(())
}

async fn cmd_issues(app: &App, identity: &Identity, target: &str) -> Result<()> {
    let target = RepositoryTarget::parse(target)?;
    let settings = resolve(app, identity)?;

    println!("🔍 Fetching issues...");
    let result = app.collector.fetch_target(&settings, &target).await?;
    print_result(app, &result);
    Ok(())
}

async fn cmd_assigned(app: &App, identity: &Identity) -> Result<()> {
    let settings = resolve(app, identity)?;

    println!("🔍 Fetching assigned issues...");
    let result = app.collector.fetch_assigned(&settings).await?;
    print_result(app, &result);
    Ok(())
}

fn resolve(app: &App, identity: &Identity) -> Result<EffectiveSettings> {
    app.resolver
        .resolve_with_credential(identity)
        .context("Register a token first with 'issuebridge token <TOKEN>'")
}

fn print_result(app: &App, result: &FetchResult) {
    if result.issues.is_empty() {
        println!("No open issues found");
    } else {
        println!("Issues ({}):", result.issues.len());
        for issue in &result.issues {
            let repository = issue.repository_full_name().unwrap_or("?");
            println!("📌 {}#{} {}", repository, issue.number, issue.title);
            println!("   🔗 {}", issue.url);
            if !issue.labels.is_empty() {
                let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
                println!("   🏷️  {}", labels.join(", "));
            }
        }
    }

    if result.is_partial() {
        println!("\n⚠️  Some repositories could not be fetched:");
        for failure in &result.failed_repos {
            println!("   ❌ {}: {}", failure.repository, failure.cause);
        }
        println!("   Check that your token can access these repositories");
    }

    if let Some(rate_limit) = result.rate_limit {
        if rate_limit.is_low(app.config.fetch.rate_limit_warning_threshold) {
            println!(
                "\n⏳ GitHub rate limit nearly exhausted: {} calls left, resets at {}",
                rate_limit.remaining, rate_limit.reset_at
            );
        }
    }
}
