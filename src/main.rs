mod config;

/// Version injected at compile time via NOVACONVERGE_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("NOVACONVERGE_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use config::{Config, TOKEN_ENV};
use novaconverge::resource::{
    ImageCaptureOptions, ImageClass, ImageFilter, IpVersion, LifecycleState, VolumeCreateOptions, VolumeFilter,
};
use novaconverge::{format_cloud_error, NovaClient, NovaServices, ProviderContext, ServiceSettings};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Converge volumes, images and floating IPs on OpenStack
#[derive(Parser, Debug)]
#[command(name = "novaconverge", version = VERSION, about, long_about = None)]
struct Args {
    #[command(flatten)]
    connection: Connection,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Persist the connection flags to the config file
    #[arg(long, global = true)]
    save: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct Connection {
    /// Nova endpoint including the tenant path
    #[arg(long, global = true)]
    compute_endpoint: Option<String>,

    /// Cinder endpoint including the tenant path
    #[arg(long, global = true)]
    volume_endpoint: Option<String>,

    #[arg(short, long, global = true)]
    region: Option<String>,

    #[arg(short, long, global = true)]
    tenant: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Block storage volumes
    #[command(subcommand)]
    Volumes(VolumeCommand),
    /// Machine images
    #[command(subcommand)]
    Images(ImageCommand),
    /// Floating IP addresses
    #[command(subcommand)]
    Ips(IpCommand),
}

#[derive(Subcommand, Debug)]
enum VolumeCommand {
    List {
        /// Only volumes attached to this server
        #[arg(long)]
        attached_to: Option<String>,
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
    Get {
        id: String,
    },
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        size: Option<u64>,
        /// Volume type id or name
        #[arg(long)]
        product: Option<String>,
        #[arg(long)]
        snapshot: Option<String>,
        /// Wait until the volume leaves the pending state
        #[arg(long)]
        wait: bool,
    },
    Delete {
        id: String,
    },
    Attach {
        id: String,
        server: String,
        device: String,
    },
    Detach {
        id: String,
        #[arg(long)]
        force: bool,
    },
    Products,
    Status,
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    List {
        /// Search images owned by others instead of the tenant's own
        #[arg(long)]
        public: bool,
        #[arg(long)]
        name: Option<String>,
    },
    Get {
        id: String,
    },
    Capture {
        server: String,
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Delete {
        id: String,
    },
    Status,
}

#[derive(Subcommand, Debug)]
enum IpCommand {
    List {
        #[arg(long)]
        unassigned: bool,
    },
    Get {
        id: String,
    },
    Request,
    Release {
        id: String,
    },
    Assign {
        id: String,
        server: String,
    },
    Unassign {
        id: String,
    },
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    Pending,
    Available,
    Active,
    Error,
    Deleted,
}

impl From<StateArg> for LifecycleState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Pending => LifecycleState::Pending,
            StateArg::Available => LifecycleState::Available,
            StateArg::Active => LifecycleState::Active,
            StateArg::Error => LifecycleState::Error,
            StateArg::Deleted => LifecycleState::Deleted,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("novaconverge {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("novaconverge").join("novaconverge.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".novaconverge").join("novaconverge.log");
    }
    PathBuf::from("novaconverge.log")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Merge CLI flags over the stored config (CLI > config)
fn apply_flags(mut config: Config, flags: &Connection) -> Config {
    if let Some(v) = &flags.compute_endpoint {
        config.compute_endpoint = Some(v.clone());
    }
    if let Some(v) = &flags.volume_endpoint {
        config.volume_endpoint = Some(v.clone());
    }
    if let Some(v) = &flags.region {
        config.region = Some(v.clone());
    }
    if let Some(v) = &flags.tenant {
        config.tenant = Some(v.clone());
    }
    config
}

fn build_services(config: &Config) -> Result<NovaServices> {
    let compute = config
        .compute_endpoint
        .as_deref()
        .context("No compute endpoint configured (use --compute-endpoint)")?;
    let volume = config
        .volume_endpoint
        .as_deref()
        .context("No volume endpoint configured (use --volume-endpoint)")?;
    let region = config.region.clone().context("No region configured (use --region)")?;
    let tenant = config.tenant.clone().context("No tenant configured (use --tenant)")?;
    let token = config
        .effective_token()
        .with_context(|| format!("No auth token configured (set {})", TOKEN_ENV))?;

    let client = NovaClient::new(compute, volume, &token).map_err(|e| anyhow::anyhow!(format_cloud_error(&e)))?;
    let settings = ServiceSettings {
        capabilities: config.capabilities()?,
        ..ServiceSettings::default()
    }
    .with_workers(config.listing_workers);

    Ok(NovaServices::new(
        Arc::new(client),
        ProviderContext::new(region, tenant),
        settings,
    ))
}

async fn run_volumes(services: &NovaServices, command: VolumeCommand) -> novaconverge::Result<()> {
    let volumes = services.volumes();
    match command {
        VolumeCommand::List { attached_to, state } => {
            let filter = VolumeFilter {
                attached_to,
                state: state.map(Into::into),
            };
            emit(&volumes.list(Some(&filter)).await?)
        }
        VolumeCommand::Get { id } => emit(&volumes.get(&id).await?),
        VolumeCommand::Create {
            name,
            description,
            size,
            product,
            snapshot,
            wait,
        } => {
            let mut options = VolumeCreateOptions::new(name, description);
            options.size_gib = size;
            options.product_id = product;
            options.snapshot_id = snapshot;
            if wait {
                emit(&volumes.create_and_wait(&options).await?)
            } else {
                emit(&serde_json::json!({ "id": volumes.create(&options).await? }))
            }
        }
        VolumeCommand::Delete { id } => volumes.delete(&id).await,
        VolumeCommand::Attach { id, server, device } => volumes.attach(&id, &server, &device).await,
        VolumeCommand::Detach { id, force } => volumes.detach(&id, force).await,
        VolumeCommand::Products => emit(&volumes.list_products().await?),
        VolumeCommand::Status => emit(&volumes.list_status().await?),
    }
}

/// Print a command result as pretty JSON
fn emit<T: Serialize>(value: &T) -> novaconverge::Result<()> {
    print_json(value).map_err(|e| novaconverge::CloudError::Internal(e.to_string()))
}

async fn run_images(services: &NovaServices, command: ImageCommand) -> novaconverge::Result<()> {
    let images = services.images();
    match command {
        ImageCommand::List { public, name } => {
            let filter = ImageFilter {
                name_contains: name,
                ..Default::default()
            };
            if public {
                emit(&images.search_public(&filter).await?)
            } else {
                emit(&images.list(Some(&filter)).await?)
            }
        }
        ImageCommand::Get { id } => emit(&images.get(&id).await?),
        ImageCommand::Capture {
            server,
            name,
            description,
        } => {
            let options = ImageCaptureOptions::new(server, name, description);
            emit(&images.capture(&options).await?)
        }
        ImageCommand::Delete { id } => images.delete(&id).await,
        ImageCommand::Status => emit(&images.list_status(ImageClass::Machine).await?),
    }
}

async fn run_ips(services: &NovaServices, command: IpCommand) -> novaconverge::Result<()> {
    let ips = services.floating_ips();
    match command {
        IpCommand::List { unassigned } => emit(&ips.list(IpVersion::V4, unassigned).await?),
        IpCommand::Get { id } => emit(&ips.get(&id).await?),
        IpCommand::Request => emit(&serde_json::json!({ "id": ips.request(IpVersion::V4).await? })),
        IpCommand::Release { id } => ips.release(&id).await,
        IpCommand::Assign { id, server } => ips.assign(&id, &server).await,
        IpCommand::Unassign { id } => ips.unassign(&id).await,
        IpCommand::Status => emit(&ips.list_status(IpVersion::V4).await?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = apply_flags(Config::load(), &args.connection);
    if args.save {
        config.save().context("Failed to save config")?;
    }

    let services = build_services(&config)?;

    let result = match args.command {
        Command::Volumes(command) => run_volumes(&services, command).await,
        Command::Images(command) => run_images(&services, command).await,
        Command::Ips(command) => run_ips(&services, command).await,
    };

    if let Err(err) = result {
        tracing::error!("Command failed: {}", err);
        anyhow::bail!(format_cloud_error(&err));
    }

    Ok(())
}
