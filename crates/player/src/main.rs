//! Command-line player.
//!
//! Builds a playlist from the given paths, starts the engine on the selected output device
//! and reads one-line commands from stdin:
//!
//! `p` pause/resume, `n` next, `b` previous, `s` stop, `g` play, `i` status,
//! `seek <secs>`, `tempo <coef>`, `vol <0..1>`, `q` quit.

mod cli;

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use audio_engine::{
    CpalBackend, FileTrack, PassthroughChain, Player, PlayerEvent, State, Track, TrackList,
};
use clap::Parser;
use crossbeam_channel::{Receiver, never, select, unbounded};
use tracing_subscriber::EnvFilter;

use cli::Input;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_engine=info,player=info")
        }))
        .init();

    if args.list_devices {
        audio_engine::device::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    let config = args.engine_config();
    let tracks: Vec<Arc<dyn Track>> = args
        .paths
        .iter()
        .map(|p| Arc::new(FileTrack::new(p).with_chunk_frames(config.chunk_frames)) as Arc<dyn Track>)
        .collect();
    tracing::info!(tracks = tracks.len(), "playlist loaded");

    let backend = CpalBackend::factory(&config);
    let player = Player::spawn(
        config,
        Box::new(TrackList::new(tracks)),
        PassthroughChain::factory(),
        backend,
    )
    .context("start player")?;
    player.set_volume(args.volume);

    let (interrupt_tx, interrupt_rx) = unbounded();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("install Ctrl-C handler")?;

    let events = player.subscribe();
    let lines = spawn_stdin_reader();
    let closed = never::<String>();
    let mut stdin_open = true;
    player.play();

    loop {
        let input = if stdin_open { &lines } else { &closed };
        select! {
            recv(input) -> line => {
                let Ok(line) = line else {
                    // No terminal: play to the end of the playlist.
                    stdin_open = false;
                    continue;
                };
                match cli::parse_input(&line) {
                    Some(Input::Quit) => break,
                    Some(cmd) => apply(&player, cmd),
                    None => println!("? p n b s g i | seek <secs> | tempo <coef> | vol <0..1> | q"),
                }
            }
            recv(events) -> event => match event {
                Ok(PlayerEvent::TrackStarted { title }) => println!("> {title}"),
                Ok(PlayerEvent::TrackUnplayable { title }) => println!("! cannot play {title}"),
                Ok(PlayerEvent::StateChanged { to: State::Stopped, .. }) if !stdin_open => break,
                Ok(PlayerEvent::StateChanged { to, .. }) => tracing::debug!(state = %to, "state"),
                Err(_) => break,
            },
            recv(interrupt_rx) -> _ => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    player.shutdown();
    Ok(())
}

fn apply(player: &Player, input: Input) {
    match input {
        Input::TogglePause => player.toggle_pause(),
        Input::Next => player.next(),
        Input::Prev => player.prev(),
        Input::Stop => player.stop(),
        Input::Play => player.play(),
        Input::Seek(pos) => player.seek(pos),
        Input::Tempo(t) => player.set_tempo(t),
        Input::Volume(v) => player.set_volume(v),
        Input::Status => {
            let s = player.status();
            println!(
                "{} | {} | {} / {} ms | vol {:.2} | tempo {:.2} | underruns {}",
                s.state,
                s.now_playing.as_deref().unwrap_or("-"),
                s.position_ms.unwrap_or(0),
                s.duration_ms.unwrap_or(0),
                s.volume,
                s.tempo,
                s.underrun_events,
            );
        }
        Input::Quit => {}
    }
}

/// Forward stdin lines to a channel; closes on EOF.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
