use std::{
    error::Error,
    fs::OpenOptions,
    io::Write,
    path::PathBuf,
    process,
    sync::Arc,
    time::SystemTime,
};

use async_trait::async_trait;
use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use veil::Redact;

use soundtrail::{
    backend::{
        ActivitySink, BackendSession, GeoFix, HydrationStatus, ListenEvent, ListenSink,
        LocationProvider,
    },
    config::Config,
    credentials::Credential,
    engine::{Collaborators, Engine},
    error::ErrorKind,
    secrets::Secrets,
    signal,
    store::CredentialStore,
};

/// Profile tag logged at startup, debug builds.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile tag logged at startup, release builds.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// `clap` group keeping `--quiet` and `--verbose` mutually exclusive.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line surface of the daemon.
#[derive(Clone, Default, PartialEq, Parser, Redact)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client secrets file
    ///
    /// Keep this file private; it carries the client credentials of your
    /// Spotify application.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Device name
    ///
    /// Set the name this device reports in its log output.
    ///
    /// [default: system hostname]
    #[arg(short, long, value_hint = ValueHint::Hostname)]
    name: Option<String>,

    /// Listener latitude in decimal degrees
    ///
    /// Listens are tagged with this fixed position. Without a position,
    /// listens are skipped.
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, requires = "longitude")]
    latitude: Option<f64>,

    /// Listener longitude in decimal degrees
    #[arg(long, value_name = "DEG", allow_negative_numbers = true, requires = "latitude")]
    longitude: Option<f64>,

    /// File that recorded listens are appended to
    ///
    /// One JSON object per line.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("listens.jsonl"))]
    listens_file: String,

    /// Refresh token to seed the credential store with
    ///
    /// Replaces the stored token pair before the engine starts. Needed
    /// once on first run, or again after access was revoked.
    ///
    /// Redacted in debug output.
    #[redact]
    #[arg(long, value_name = "TOKEN", env = "SOUNDTRAIL_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    /// User id to attribute listens to
    ///
    /// Stored alongside the token pair when seeding.
    #[arg(long, value_name = "ID")]
    user_id: Option<String>,

    /// Email address stored with the user id
    #[arg(long, value_name = "EMAIL", requires = "refresh_token")]
    email: Option<String>,

    /// Log warnings and errors only
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Raise the log level
    ///
    /// Once for debug, twice for trace.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Sets up `env_logger`.
///
/// Command line flags win over `RUST_LOG`, which wins over the built-in
/// default of `info`.
///
/// # Panics
///
/// Panics when a logger is already installed.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Keep this default in line with the verbosity mapping below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // The logging group makes quiet and verbose exclusive, so
                // zero verbosity in this branch can only mean `--quiet`.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Leave external crates at the default level.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the client secrets from a file.
///
/// # Errors
///
/// Returns error if the file could not be read or does not contain a
/// usable client id and secret.
fn load_secrets(secrets_file: &str) -> soundtrail::error::Result<Secrets> {
    let secrets = Secrets::from_file(secrets_file);

    if let Err(ref e) = secrets {
        if e.kind == ErrorKind::NotFound {
            info!("read the documentation on how to create {secrets_file}");
        }
    }

    secrets
}

/// A fixed position from the command line, or none at all.
struct StaticLocation(Option<GeoFix>);

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn current_location(&self) -> Option<GeoFix> {
        self.0
    }
}

/// Appends listens to a local file, one JSON object per line.
struct ListenJournal(PathBuf);

#[async_trait]
impl ListenSink for ListenJournal {
    async fn record_listen(&self, event: &ListenEvent) -> soundtrail::error::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.0)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Reports activity transitions in the log instead of a backend.
struct LogActivity;

#[async_trait]
impl ActivitySink for LogActivity {
    async fn set_active(&self, user_id: &str, active: bool) -> soundtrail::error::Result<()> {
        info!(
            "{user_id} is {}",
            if active {
                "now listening"
            } else {
                "no longer listening"
            }
        );
        Ok(())
    }
}

/// A stand-in for a backend session.
///
/// This binary has no live backend, so hydration settles immediately as
/// unauthenticated and the bootstrapper falls back to the stored owner
/// record. With an owner on file the engine runs degraded, which is the
/// normal mode here.
struct LocalSession;

#[async_trait]
impl BackendSession for LocalSession {
    fn hydration_status(&self) -> HydrationStatus {
        HydrationStatus::Unauthenticated
    }

    fn user_id(&self) -> Option<String> {
        None
    }

    async fn sign_in(&self, _email: &str, _auth_secret: &str) -> soundtrail::error::Result<String> {
        Err(soundtrail::error::Error::unimplemented(
            "this binary has no backend to sign in to",
        ))
    }
}

/// Stores the token pair and owner identity given on the command line.
fn seed_store(
    store: &CredentialStore,
    refresh_token: String,
    user_id: Option<String>,
    email: Option<String>,
) -> soundtrail::error::Result<()> {
    store.save_credential(&Credential {
        access_token: None,
        refresh_token: Some(refresh_token),
        // Stale on purpose, so the first poll refreshes right away and
        // verifies the seeded token.
        expires_at: SystemTime::UNIX_EPOCH,
        owner_id: user_id,
        owner_email: email,
        auth_secret: None,
    })?;

    info!("credential store seeded from the command line");
    Ok(())
}

/// Brings the engine up and follows it until shutdown.
///
/// Status transitions are echoed to the log as they happen.
///
/// # Errors
///
/// Returns error when the secrets cannot be loaded or the engine cannot
/// start.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let secrets = load_secrets(&args.secrets_file)?;

    let mut config = Config::with_secrets(secrets);
    config.device_name = args
        .name
        .clone()
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| config.app_name.clone());
    info!("monitoring as {}", config.device_name);

    if let Some(refresh_token) = args.refresh_token.clone() {
        let store = CredentialStore::open(&config)?;
        seed_store(&store, refresh_token, args.user_id.clone(), args.email.clone())?;
    }

    let fix = match (args.latitude, args.longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoFix {
            latitude,
            longitude,
        }),
        _ => {
            warn!("no position configured, listens will be skipped");
            None
        }
    };

    let collaborators = Collaborators {
        session: Arc::new(LocalSession),
        location: Arc::new(StaticLocation(fix)),
        listens: Arc::new(ListenJournal(PathBuf::from(&args.listens_file))),
        activity: Arc::new(LogActivity),
        credentials: None,
    };

    let mut signals = signal::Handler::new()?;
    let engine = Engine::start(&config, collaborators).await?;
    let mut status = engine.status();

    loop {
        tokio::select! {
            // Shutdown wins over pending status updates.
            biased;

            received = signals.recv() => {
                info!("received {received}, shutting down gracefully");
                break;
            }

            changed = status.changed() => {
                if changed.is_err() {
                    // The poller is gone; the engine is beyond restarting.
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!("{current}");
            }
        }
    }

    engine.stop().await;
    Ok(())
}

/// Binary entry point. Parses the arguments and installs logging before
/// handing over to [`run`].
#[tokio::main]
async fn main() {
    // Parsing exits on `--help` and `--version` before logging is up.
    let args = Args::parse();
    init_logger(&args);

    // Log the parsed arguments first, redactions applied, so whatever
    // fails next can be read in context.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
