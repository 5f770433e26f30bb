use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use soundboard::api::ApiClient;
use soundboard::audio::output::LazyCpalBackend;
use soundboard::config::{Config, PreloadPolicy};
use soundboard::error::ClientError;
use soundboard::keys::{self, KeyAction, KeyInput};
use soundboard::models::sound::Sound;
use soundboard::notify::Level;
use soundboard::playback::PlaybackEngine;
use soundboard::session::forms::{LoginForm, SignupForm};
use soundboard::session::store::SessionStore;
use soundboard::session::{AuthHandle, AuthState, Session, SessionEvent};
use soundboard::soundboard::Soundboard;
use soundboard::upload::{AudioFile, UploadPolicy, Validator};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("SOUNDBOARD_BUILD"), ")");

#[derive(Parser)]
#[command(name = "soundboard", version = VERSION, about = "Upload short clips and play them from the keyboard")]
struct Cli {
    /// Base URL of the soundboard API
    #[arg(long, env = "SOUNDBOARD_API_URL", global = true)]
    api_url: Option<String>,

    /// Where the login session is kept between runs
    #[arg(long, env = "SOUNDBOARD_SESSION_FILE", global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account and log in
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "SOUNDBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log in with an existing account
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "SOUNDBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List your sounds with their shortcuts
    List,
    /// Validate and upload an audio file
    Upload {
        file: PathBuf,
        /// Defaults to the file name without its extension
        #[arg(long)]
        title: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Overrides the type guessed from the extension
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Delete a sound by id
    Delete { id: String },
    /// Play the sound at a 1-based list position
    Play { position: usize },
    /// Interactive board driven by key presses
    Board,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soundboard=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    };
    // A pending stdin read would otherwise hold shutdown until the next line.
    runtime.shutdown_timeout(std::time::Duration::from_millis(250));
    code
}

async fn run(cli: Cli) -> Result<ExitCode, ClientError> {
    let mut config = Config::from_env();
    if let Some(url) = cli.api_url.as_deref() {
        config = config.with_api_url(url);
    }
    if let Some(path) = cli.session_file {
        config = config.with_session_file(path);
    }

    let auth = AuthHandle::new(SessionStore::new(config.session_file.clone()));
    let api = ApiClient::new(&config, auth)?;

    let interrupt = api.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling requests");
            interrupt.shutdown();
        }
    });

    let session = Session::new(api.clone());
    session.initialize().await;

    match cli.command {
        Command::Signup {
            username,
            email,
            password,
        } => {
            let password = password_or_prompt(password).await?;
            let user = session
                .signup(&SignupForm::new(username, email, password))
                .await?;
            println!("Signed up and logged in as {}", user.username);
        }
        Command::Login { email, password } => {
            let password = password_or_prompt(password).await?;
            let user = session.login(&LoginForm::new(email, password)).await?;
            println!("Logged in as {}", user.username);
        }
        Command::Logout => {
            session.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => match session.state() {
            AuthState::Authenticated { user, .. } => println!("{} <{}>", user.username, user.email),
            _ => {
                println!("Not logged in");
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::List => {
            session.require_user()?;
            let mut board = soundboard(&config, &api, PreloadPolicy::None);
            let loaded = board.load_sounds().await;
            print_notifications(&mut board);
            if loaded.is_err() {
                return Ok(ExitCode::FAILURE);
            }
            print_sounds(board.sounds());
        }
        Command::Upload {
            file,
            title,
            description,
            content_type,
        } => {
            session.require_user()?;
            let mut board = soundboard(&config, &api, PreloadPolicy::None);
            let file = AudioFile::open(&file, content_type.as_deref()).await?;
            let uploaded = match board.select_file(file).await {
                Ok(_) => {
                    if let Some(title) = title {
                        board.set_title(title);
                    }
                    match board.upload(&description).await {
                        Ok(sound) => {
                            println!("{}  {}", sound.id, sound.title);
                            true
                        }
                        Err(_) => false,
                    }
                }
                Err(_) => false,
            };
            print_notifications(&mut board);
            if !uploaded {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Delete { id } => {
            session.require_user()?;
            let mut board = soundboard(&config, &api, PreloadPolicy::None);
            let deleted = board.delete_sound(&id).await;
            print_notifications(&mut board);
            if deleted.is_err() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Play { position } => {
            session.require_user()?;
            let mut board = soundboard(&config, &api, PreloadPolicy::None);
            board.load_sounds().await?;
            let Some(index) = position.checked_sub(1) else {
                eprintln!("positions start at 1");
                return Ok(ExitCode::FAILURE);
            };
            let Some(sound) = board.sounds().get(index).cloned() else {
                eprintln!("no sound at position {position}");
                return Ok(ExitCode::FAILURE);
            };
            let played = board.play_sound(&sound).await;
            print_notifications(&mut board);
            if played.is_err() {
                return Ok(ExitCode::FAILURE);
            }
            println!("Playing {}", sound.title);
            wait_until_silent(&board, &api).await;
        }
        Command::Board => {
            session.require_user()?;
            let mut board = soundboard(&config, &api, config.preload);
            run_board(&session, &mut board, &api).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn soundboard(config: &Config, api: &ApiClient, preload: PreloadPolicy) -> Soundboard {
    let engine = PlaybackEngine::new(api.clone(), Arc::new(LazyCpalBackend::new()));
    let validator = Validator::new(UploadPolicy::from_config(config));
    Soundboard::new(api.clone(), engine, validator, preload)
}

async fn password_or_prompt(password: Option<String>) -> Result<String, ClientError> {
    if let Some(password) = password {
        return Ok(password);
    }
    let mut stderr = tokio::io::stderr();
    stderr.write_all(b"Password: ").await?;
    stderr.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_sounds(sounds: &[Sound]) {
    if sounds.is_empty() {
        println!("No sounds yet. Upload one with `soundboard upload <FILE>`.");
        return;
    }
    for (index, sound) in sounds.iter().enumerate() {
        let key = keys::shortcut_label(index).unwrap_or_default();
        println!(
            "{:>3}  {:<4} {:<20}  {:>7}  {}",
            index + 1,
            key,
            sound.title,
            format_size(sound.metadata.file_size),
            sound.id
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    }
}

fn print_notifications(board: &mut Soundboard) {
    for notification in board.notifications().drain() {
        match notification.level {
            Level::Error => eprintln!("{notification}"),
            _ => println!("{notification}"),
        }
    }
}

/// Keep the process (and its audio stream) alive until playback ends.
async fn wait_until_silent(board: &Soundboard, api: &ApiClient) {
    let shutdown = api.shutdown_token();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                board.stop_all();
                return;
            }
            _ = ticker.tick() => {
                if !board.engine().any_playing() {
                    return;
                }
            }
        }
    }
}

async fn run_board(
    session: &Session,
    board: &mut Soundboard,
    api: &ApiClient,
) -> Result<(), ClientError> {
    let mut events = session.events();
    let shutdown = api.shutdown_token();

    let _ = board.load_sounds().await;
    print_notifications(board);
    print_sounds(board.sounds());
    println!("\n{}\n", keys::help_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                board.stop_all();
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Expired) => {
                    board.reset();
                    eprintln!("Session expired. Please log in again.");
                    return Ok(());
                }
                Ok(SessionEvent::SignedOut) | Err(RecvError::Closed) => {
                    board.reset();
                    return Ok(());
                }
                Ok(SessionEvent::SignedIn(_)) | Err(RecvError::Lagged(_)) => {}
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    board.stop_all();
                    return Ok(());
                };
                match line.trim() {
                    "q" => {
                        board.stop_all();
                        return Ok(());
                    }
                    "r" => {
                        let _ = board.load_sounds().await;
                        print_notifications(board);
                        print_sounds(board.sounds());
                    }
                    "?" => println!("{}", keys::help_text()),
                    _ if line.is_empty() => {}
                    _ => match KeyInput::parse(&line) {
                        Some(key) => match board.handle_key(key).await {
                            Ok(KeyAction::Play(index)) => match board.sounds().get(index) {
                                Some(sound) => println!("> {}", sound.title),
                                None => println!("no sound on that key"),
                            },
                            Ok(KeyAction::StopAll) => println!("stopped"),
                            Ok(KeyAction::Ignore) => println!("unbound key, ? for help"),
                            Err(_) => {}
                        },
                        None => println!("unknown key {line:?}, ? for help"),
                    },
                }
                print_notifications(board);
            }
        }
    }
}
