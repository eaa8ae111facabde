use std::{error::Error, net::IpAddr, path::PathBuf, process, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

use omxremote::{
    config::Config,
    events::Event,
    player::PlayerState,
    protocol::files,
    remote::Client,
    signal::Signals,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

const HELP: &str = "\
commands:
  ls [path]            list a remote directory
  settings             list server settings
  set <key> <value>    change a server setting
  play <video> [sub]   start playback, optionally with subtitles
  stop                 stop playback
  pause                toggle pause
  seek <seconds>       jump to a position
  vol <millibels>      set the volume
  faster | slower      change playback speed
  subdelay+ | subdelay-
                       shift subtitles
  subs                 toggle subtitles
  status               show the current playback
  quit                 log off and exit";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// TOML file with engine settings. Every setting is optional.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "OMXREMOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Multicast group (or unicast address) of the server
    ///
    /// Overrides the configuration file.
    #[arg(short, long, env = "OMXREMOTE_GROUP")]
    group: Option<IpAddr>,

    /// UDP port of the server
    ///
    /// Overrides the configuration file.
    #[arg(short, long, env = "OMXREMOTE_PORT")]
    port: Option<u16>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("omxremote", level);
    }

    logger.init();
}

fn load_config(args: &Args) -> omxremote::error::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(group) = args.group {
        config.group = group;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    config.validate()?;
    Ok(config)
}

fn format_time(time: Duration) -> String {
    let secs = time.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

fn describe(state: &PlayerState) -> String {
    let mut line = String::from(state.title());
    for detail in [state.info(), state.extra()] {
        if !detail.is_empty() {
            line.push_str(" - ");
            line.push_str(detail);
        }
    }

    line.push_str(&format!(
        " [{} / {}{}] volume {}",
        format_time(state.position()),
        format_time(state.duration()),
        if state.is_paused() { ", paused" } else { "" },
        state.volume()
    ));
    line
}

fn report(client: &Client, event: &Event) {
    match event {
        Event::ParseFailed { .. } => warn!("{event}"),
        Event::PlayerInitialized | Event::InfoUpdated | Event::ExtraUpdated => {
            match client.current_player_state() {
                Some(state) => {
                    info!("{event}: {}", describe(&state));
                    if let Some(poster) = state.poster() {
                        let (width, height) = poster.dimensions();
                        debug!("poster {width}x{height} from {}", poster.source);
                    }
                }
                None => info!("{event}"),
            }
        }
        Event::StateChanged => {
            if let Some(state) = client.current_player_state() {
                info!("{}", if state.is_paused() { "paused" } else { "playing" });
            }
        }
        _ => info!("{event}"),
    }
}

/// Runs one line of user input. Returns `false` when the user wants to quit.
async fn execute(client: &Client, line: &str) -> omxremote::error::Result<bool> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(true);
    };
    let rest: Vec<&str> = words.collect();

    match (command, rest.as_slice()) {
        ("ls", args) => match client.list_files(args.first().copied()).await? {
            Some(listing) => {
                println!("{}", listing.path);
                for entry in &listing.entries {
                    let marker = if files::is_directory(entry) {
                        "d"
                    } else if files::is_video(entry) {
                        "v"
                    } else if files::is_subtitle(entry) {
                        "s"
                    } else {
                        " "
                    };
                    println!("  {marker} {entry}");
                }
            }
            None => warn!("no file listing received"),
        },
        ("settings", []) => match client.list_settings().await? {
            Some(settings) => {
                for setting in settings {
                    println!("{setting}  # {}", setting.description);
                }
            }
            None => warn!("no settings received"),
        },
        ("set", [key, value]) => client.set_setting(key, value)?,
        ("play", [video]) => client.start_playback(video, None)?,
        ("play", [video, subtitle]) => client.start_playback(video, Some(*subtitle))?,
        ("stop", []) => client.stop_playback()?,
        ("pause", []) => client.pause()?,
        ("seek", [seconds]) => client.seek(Duration::from_secs(seconds.parse()?))?,
        ("vol", [volume]) => client.set_volume(volume.parse()?)?,
        ("faster", []) => client.speed_up()?,
        ("slower", []) => client.speed_down()?,
        ("subdelay+", []) => client.increase_subtitle_delay()?,
        ("subdelay-", []) => client.decrease_subtitle_delay()?,
        ("subs", []) => client.toggle_subtitles()?,
        ("status", []) => match client.current_player_state() {
            Some(state) => println!("{}", describe(&state)),
            None if client.is_connected() => println!("nothing playing"),
            None => println!("{}", client.link_state()),
        },
        ("quit" | "exit", []) => return Ok(false),
        _ => println!("{HELP}"),
    }

    Ok(true)
}

/// Main application loop.
///
/// Reads commands from standard input until the user quits, standard input
/// closes or a shutdown signal arrives. SIGHUP reconnects.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the socket cannot
/// be bound.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;
    let mut client = Client::new(config)?;
    let mut events = client.subscribe();
    let mut signals = Signals::new()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    client.connect().await?;

    loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("received {signal}, shutting down gracefully");
                    break;
                }

                info!("received {signal}, reconnecting");
                client.connect().await?;
            }

            event = events.recv() => match event {
                Ok(event) => report(&client, &event),
                Err(RecvError::Lagged(skipped)) => warn!("missed {skipped} events"),
                Err(RecvError::Closed) => break,
            },

            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("standard input closed");
                    break;
                };

                match execute(&client, &line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => error!("{e}"),
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
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
