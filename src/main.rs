mod app_runtime;
mod channel_manager;
mod command_manager;
mod config;
mod player_state;
mod protocol;
mod server_api;
mod state_manager;
mod sync_manager;

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use app_runtime::AppRuntime;
use config::Config;
use log::{info, warn};
use player_state::PlayerState;
use protocol::{
    ChannelMessage, IntentMessage, Message, NoticeLevel, NoticeMessage, StateMessage,
};

fn load_config() -> Config {
    let Some(config_root) = dirs::config_dir().map(|dir| dir.join("evoremote")) else {
        warn!("No config directory available, using built-in defaults");
        return Config::default();
    };
    let config_file = config_root.join("config.toml");

    if let Err(err) = std::fs::create_dir_all(&config_root) {
        warn!(
            "Failed to create config directory {}: {}",
            config_root.display(),
            err
        );
        return Config::default();
    }

    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        match toml::to_string(&default_config) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&config_file, text) {
                    warn!("Failed to write default config: {}", err);
                }
            }
            Err(err) => warn!("Failed to serialize default config: {}", err),
        }
        return default_config;
    }

    match std::fs::read_to_string(&config_file) {
        Ok(content) => toml::from_str::<Config>(&content).unwrap_or_else(|err| {
            warn!("Failed to parse config, using defaults: {}", err);
            Config::default()
        }),
        Err(err) => {
            warn!("Failed to read config, using defaults: {}", err);
            Config::default()
        }
    }
}

/// Prints a one-line summary when something the user can see changed.
/// Progress-only updates tick every second and stay quiet.
fn print_state_transition(previous: &PlayerState, current: &PlayerState) {
    let selection_changed = previous.current_song_index != current.current_song_index;
    let playback_changed = previous.is_playing != current.is_playing;
    let playlist_changed = previous.playlist != current.playlist;
    let volume_changed = (previous.volume - current.volume).abs() > f32::EPSILON;
    if !(selection_changed || playback_changed || playlist_changed || volume_changed) {
        return;
    }
    let song = current
        .current_song()
        .map(|song| song.name.as_str())
        .unwrap_or("(none)");
    let transport = if current.is_playing { "playing" } else { "stopped" };
    println!(
        "* {} | {} | {} song(s) | volume {:.0}%",
        song,
        transport,
        current.playlist.len(),
        current.volume * 100.0
    );
}

/// Console stand-in for the external view notifier: renders notices and
/// state-change summaries from bus notifications.
fn spawn_console_notifier(runtime: &AppRuntime) {
    let mut bus_receiver = runtime.subscribe();
    thread::spawn(move || {
        let mut last_state = PlayerState::default();
        loop {
            match bus_receiver.blocking_recv() {
                Ok(Message::Notice(NoticeMessage::Show(notice))) => {
                    let tag = match notice.level {
                        NoticeLevel::Info => "i",
                        NoticeLevel::Success => "+",
                        NoticeLevel::Error => "!",
                    };
                    println!("[{}] {}", tag, notice.text);
                }
                Ok(Message::Notice(NoticeMessage::ConfirmRemoval { index, song_name })) => {
                    println!("[?] Remove \"{song_name}\"? Confirm with: rm! {index}");
                }
                Ok(Message::State(StateMessage::PlayerStateChanged(state))) => {
                    print_state_transition(&last_state, &state);
                    last_state = state;
                }
                Ok(Message::Channel(ChannelMessage::Connected)) => {
                    println!("[i] Live updates connected");
                }
                Ok(Message::Channel(ChannelMessage::Disconnected)) => {
                    println!("[!] Live updates lost, reconnecting...");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Console notifier lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn parse_index(argument: Option<&str>) -> Option<usize> {
    argument.and_then(|raw| raw.parse::<usize>().ok())
}

/// Maps one console line to an intent. `None` means unrecognized input.
fn parse_intent(line: &str) -> Option<IntentMessage> {
    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    let argument = parts.next();
    match command {
        "play" => Some(IntentMessage::Play),
        "pause" => Some(IntentMessage::Pause),
        "toggle" | "t" => Some(IntentMessage::TogglePlay),
        "next" | "n" => Some(IntentMessage::NextSong),
        "prev" | "p" => Some(IntentMessage::PreviousSong),
        "sel" => parse_index(argument).map(IntentMessage::SelectAndPlay),
        "vol" => argument
            .and_then(|raw| raw.parse::<f32>().ok())
            .map(IntentMessage::SetVolume),
        "rm" => parse_index(argument).map(IntentMessage::RemoveSong),
        "rm!" => parse_index(argument).map(IntentMessage::RemoveSongConfirmed),
        "add" => {
            let paths: Vec<PathBuf> = line
                .split_whitespace()
                .skip(1)
                .map(PathBuf::from)
                .collect();
            if paths.is_empty() {
                None
            } else {
                Some(IntentMessage::UploadSongs(paths))
            }
        }
        "shuffle" => Some(IntentMessage::ToggleShuffle),
        "repeat" => Some(IntentMessage::CycleRepeatMode),
        _ => None,
    }
}

fn print_help() {
    println!("commands:");
    println!("  sel N          select song N and play it");
    println!("  toggle         play/pause the current song");
    println!("  play | pause   explicit transport control");
    println!("  next | prev    change song");
    println!("  vol V          set volume, 0.0 to 1.0");
    println!("  rm N           remove song N (asks for confirmation)");
    println!("  add PATH...    upload MP3 files");
    println!("  shuffle        toggle shuffle (local)");
    println!("  repeat         cycle repeat mode (local)");
    println!("  quit           exit");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = load_config();
    info!(
        "Connecting to {} (push channel {})",
        config.command_base_url(),
        config.push_channel_url()
    );

    let runtime = AppRuntime::start(&config);
    spawn_console_notifier(&runtime);
    let bus_sender = runtime.bus_sender();

    print_help();
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed {
            "quit" | "exit" => break,
            "help" => print_help(),
            _ => match parse_intent(trimmed) {
                Some(intent) => {
                    let _ = bus_sender.send(Message::Intent(intent));
                }
                None => println!("[!] Unrecognized command, try 'help'"),
            },
        }
    }

    info!("Application exiting");
    Ok(())
}
