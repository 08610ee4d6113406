//! Player: command API, control thread and output thread wiring.
//!
//! Threads:
//! - caller: sends [`Command`]s through a [`Player`] handle
//! - control: owns the [`State`], the playlist and the current track; runs [`transition`]
//!   and executes its effects
//! - output: owns the device (see [`crate::output`]) and reports back with notices the
//!   control thread must acknowledge before the output thread continues

mod state;

pub use state::{Direction, Effect, Event, FadeKind, Neighbors, State, Target, Transition, transition};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};

use crate::config::EngineConfig;
use crate::effects::ChainFactory;
use crate::output::{BackendFactory, DeviceEvent, Notice, OutputRequest, OutputWorker};
use crate::playlist::Playlist;
use crate::status::{PlayerStatus, StatusSnapshot};
use crate::track::Track;

/// Notifications for subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    StateChanged { from: State, to: State },
    /// The device started playing a track.
    TrackStarted { title: String },
    TrackUnplayable { title: String },
}

enum Command {
    Play,
    Pause,
    Resume,
    TogglePause,
    Stop,
    Next,
    Prev,
    Seek(Duration),
    SetTempo(f32),
    Subscribe(Sender<PlayerEvent>),
    Shutdown,
}

/// Handle to a running player. Dropping it shuts the player down.
pub struct Player {
    commands: Sender<Command>,
    status: Arc<Mutex<PlayerStatus>>,
    volume: Arc<AtomicU32>,
    control: Option<JoinHandle<()>>,
    output: Option<JoinHandle<()>>,
}

impl Player {
    /// Open the output backend and start the control and output threads.
    ///
    /// Fails if the backend cannot be created; nothing keeps running in that case.
    pub fn spawn(
        config: EngineConfig,
        playlist: Box<dyn Playlist>,
        chains: ChainFactory,
        backend: BackendFactory,
    ) -> Result<Self> {
        let status = PlayerStatus::shared();
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let (request_tx, request_rx) = unbounded();
        let (notice_tx, notice_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let output = {
            let status = status.clone();
            let volume = volume.clone();
            let refill_max_frames = config.refill_max_frames;
            thread::Builder::new()
                .name("output".into())
                .spawn(move || {
                    let backend = match backend() {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    {
                        let mut st = PlayerStatus::lock(&status);
                        st.device = Some(backend.device_name());
                        st.format = Some(backend.format());
                        st.buffer_size_frames = backend.buffer_size_frames();
                    }
                    let _ = ready_tx.send(Ok(()));
                    OutputWorker::new(
                        backend,
                        chains,
                        request_rx,
                        notice_tx,
                        status,
                        volume,
                        refill_max_frames,
                    )
                    .run();
                })
                .context("spawn output thread")?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = output.join();
                return Err(e.context("open output backend"));
            }
            Err(_) => {
                let _ = output.join();
                return Err(anyhow!("output thread exited during startup"));
            }
        }

        let (command_tx, command_rx) = unbounded();
        let controller = Controller {
            config,
            playlist,
            state: State::Stopped,
            track: None,
            retired: Vec::new(),
            session: 0,
            announced: false,
            pending_seek: None,
            output: request_tx,
            status: status.clone(),
            subscribers: Vec::new(),
        };
        let control = thread::Builder::new()
            .name("player-control".into())
            .spawn(move || controller.run(command_rx, notice_rx))
            .context("spawn control thread")?;

        Ok(Self {
            commands: command_tx,
            status,
            volume,
            control: Some(control),
            output: Some(output),
        })
    }

    pub fn play(&self) {
        self.send(Command::Play);
    }

    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    pub fn toggle_pause(&self) {
        self.send(Command::TogglePause);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn next(&self) {
        self.send(Command::Next);
    }

    pub fn prev(&self) {
        self.send(Command::Prev);
    }

    /// Jump within the current track; while stopped, applies to the next start.
    pub fn seek(&self, position: Duration) {
        self.send(Command::Seek(position));
    }

    pub fn set_tempo(&self, coefficient: f32) {
        self.send(Command::SetTempo(coefficient));
    }

    /// Linear output gain, clamped to `0.0..=1.0`.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 1.0 };
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
        PlayerStatus::lock(&self.status).volume = volume;
    }

    pub fn state(&self) -> State {
        PlayerStatus::lock(&self.status).state
    }

    pub fn status(&self) -> StatusSnapshot {
        PlayerStatus::lock(&self.status).snapshot()
    }

    /// Receive every [`PlayerEvent`] from now on.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.send(Command::Subscribe(tx));
        rx
    }

    /// Stop both threads and wait for them.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn send(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            tracing::debug!("player is shut down; command dropped");
        }
    }

    fn close(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        for handle in [self.control.take(), self.output.take()].into_iter().flatten() {
            if handle.join().is_err() {
                tracing::error!("player thread panicked");
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the control thread.
struct Controller {
    config: EngineConfig,
    playlist: Box<dyn Playlist>,
    state: State,
    track: Option<Arc<dyn Track>>,
    /// Tracks replaced by a start but not yet released, with their audible time.
    retired: Vec<(Arc<dyn Track>, Duration)>,
    session: u64,
    /// `TrackStarted` already sent for `session`.
    announced: bool,
    pending_seek: Option<Duration>,
    output: Sender<OutputRequest>,
    status: Arc<Mutex<PlayerStatus>>,
    subscribers: Vec<Sender<PlayerEvent>>,
}

impl Controller {
    fn run(mut self, commands: Receiver<Command>, notices: Receiver<Notice>) {
        loop {
            select! {
                recv(commands) -> cmd => match cmd {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.on_command(cmd),
                },
                recv(notices) -> notice => {
                    let Ok(notice) = notice else {
                        tracing::error!("output thread is gone");
                        break;
                    };
                    self.on_notice(notice.session, notice.event);
                    let _ = notice.ack.send(());
                }
            }
        }
        let _ = self.output.send(OutputRequest::Shutdown);
        tracing::debug!("control thread stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Play => self.dispatch(Event::Start),
            Command::Pause => self.dispatch(Event::Pause),
            Command::Resume => self.dispatch(Event::Resume),
            Command::TogglePause => match self.state {
                State::Paused => self.dispatch(Event::Resume),
                s if s.is_running() => self.dispatch(Event::Pause),
                _ => {}
            },
            Command::Stop => self.dispatch(Event::Stop),
            Command::Next => self.dispatch(Event::Next),
            Command::Prev => self.dispatch(Event::Prev),
            Command::Seek(position) => match self.state {
                State::Stopped => self.pending_seek = Some(position),
                State::Playing | State::Paused | State::StartingPlayback => {
                    self.request(OutputRequest::Seek {
                        session: self.session,
                        position,
                    })
                }
                _ => tracing::debug!(state = %self.state, "seek ignored while fading"),
            },
            Command::SetTempo(tempo) => {
                if !(tempo.is_finite() && tempo > 0.0) {
                    tracing::warn!(tempo, "ignoring invalid tempo");
                    return;
                }
                PlayerStatus::lock(&self.status).tempo = tempo;
                self.request(OutputRequest::Tempo(tempo));
            }
            Command::Subscribe(tx) => self.subscribers.push(tx),
            Command::Shutdown => {}
        }
    }

    fn on_notice(&mut self, session: u64, event: DeviceEvent) {
        if session != self.session {
            tracing::debug!(session, current = self.session, ?event, "stale device notice");
            return;
        }
        let event = match event {
            DeviceEvent::Active => {
                if !self.announced {
                    self.announced = true;
                    if let Some(track) = self.track.clone() {
                        self.playlist.track_started(&track);
                        self.emit(PlayerEvent::TrackStarted {
                            title: track.title(),
                        });
                    }
                }
                Event::DeviceActive
            }
            DeviceEvent::Suspended => Event::DeviceSuspended,
            DeviceEvent::Idle => Event::DeviceIdle,
            DeviceEvent::Failed => Event::TrackFailed,
        };
        self.dispatch(event);
    }

    fn dispatch(&mut self, event: Event) {
        let around = Neighbors {
            current: self.playlist.current_item().is_some(),
            next: self.playlist.has_next(),
            prev: self.playlist.has_prev(),
        };
        let from = self.state;
        let Transition { next, effects } = transition(from, event, around);
        self.state = next;
        for effect in effects {
            self.apply(effect);
        }

        if self.state != from {
            tracing::info!(from = %from, to = %self.state, ?event, "player state changed");
            PlayerStatus::lock(&self.status).state = self.state;
            self.emit(PlayerEvent::StateChanged {
                from,
                to: self.state,
            });
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartTrack => self.start_track(),
            Effect::SuspendDevice => self.request(OutputRequest::Suspend(self.session)),
            Effect::ResumeDevice => self.request(OutputRequest::Resume(self.session)),
            Effect::StopDevice => self.request(OutputRequest::Stop(self.session)),
            Effect::FadeOut(kind) => {
                let window = match kind {
                    FadeKind::Stop => self.config.stop_fade,
                    FadeKind::Skip => self.config.skip_fade,
                };
                self.request(OutputRequest::FadeOut {
                    session: self.session,
                    window,
                });
            }
            Effect::Advance(dir) => {
                let moved = match dir {
                    Direction::Next => self.playlist.next_item(),
                    Direction::Prev => self.playlist.prev_item(),
                };
                match moved {
                    Some(track) => tracing::debug!(?dir, title = %track.title(), "playlist advanced"),
                    None => tracing::debug!(?dir, "playlist has nothing there"),
                }
            }
            Effect::MarkUnplayable => {
                if let Some(track) = self.track.clone() {
                    track.mark_unplayable();
                    self.emit(PlayerEvent::TrackUnplayable {
                        title: track.title(),
                    });
                }
            }
            Effect::ReleaseTrack => {
                for (track, played) in std::mem::take(&mut self.retired) {
                    self.playlist.track_finished(&track, played);
                }
                if self.state == State::Stopped {
                    if let Some(track) = self.track.take() {
                        let played = self.played();
                        self.playlist.track_finished(&track, played);
                    }
                }
            }
        }
    }

    fn start_track(&mut self) {
        let Some(track) = self.playlist.current_item() else {
            tracing::warn!("nothing to start");
            self.state = State::Stopped;
            return;
        };
        if let Some(old) = self.track.replace(track.clone()) {
            // Counters belong to the old session until the output thread sees the start.
            let played = self.played();
            self.retired.push((old, played));
        }
        self.session += 1;
        self.announced = false;

        tracing::info!(session = self.session, title = %track.title(), "starting track");
        let seek = self.pending_seek.take();
        self.request(OutputRequest::Start {
            session: self.session,
            track,
            seek,
        });
    }

    /// How long the device has been fed during the current session.
    fn played(&self) -> Duration {
        let st = PlayerStatus::lock(&self.status);
        let frames = st.counters.played_frames.load(Ordering::Relaxed);
        match st.format {
            Some(f) if f.sample_rate > 0 => {
                Duration::from_secs_f64(frames as f64 / f64::from(f.sample_rate))
            }
            _ => Duration::ZERO,
        }
    }

    fn request(&self, req: OutputRequest) {
        if self.output.send(req).is_err() {
            tracing::error!("output thread is gone; request dropped");
        }
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.subscribers.retain(|s| s.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PlaybackBuffer;
    use crate::effects::PassthroughChain;
    use crate::format::{AudioFormat, SampleFormat};
    use crate::output::{OutputBackend, OutputStream};
    use crate::playback::StreamContext;
    use crate::playlist::TrackList;
    use std::sync::atomic::AtomicBool;
    use std::sync::PoisonError;

    fn test_format() -> AudioFormat {
        AudioFormat::native(1_000, 1, SampleFormat::Signed16)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Decodes instantly into silence, or fails like a corrupt file.
    struct MemoryTrack {
        title: String,
        length: Duration,
        broken: bool,
        /// Time `start_decoding` blocks before returning.
        stall: Duration,
        unplayable: AtomicBool,
        limit: Mutex<Option<Duration>>,
    }

    impl MemoryTrack {
        fn new(title: &str, length: Duration) -> Arc<Self> {
            Arc::new(Self {
                title: title.to_string(),
                length,
                broken: false,
                stall: Duration::ZERO,
                unplayable: AtomicBool::new(false),
                limit: Mutex::new(None),
            })
        }

        fn broken(title: &str) -> Arc<Self> {
            Arc::new(Self {
                title: title.to_string(),
                length: ms(100),
                broken: true,
                stall: Duration::ZERO,
                unplayable: AtomicBool::new(false),
                limit: Mutex::new(None),
            })
        }

        /// Broken track whose failure only shows after `stall`.
        fn slow_broken(title: &str, stall: Duration) -> Arc<Self> {
            Arc::new(Self {
                title: title.to_string(),
                length: ms(100),
                broken: true,
                stall,
                unplayable: AtomicBool::new(false),
                limit: Mutex::new(None),
            })
        }
    }

    impl Track for MemoryTrack {
        fn title(&self) -> String {
            self.title.clone()
        }

        fn start_decoding(&self, format: &AudioFormat) -> Option<Arc<PlaybackBuffer>> {
            let buffer = Arc::new(PlaybackBuffer::new(*format));
            thread::sleep(self.stall);
            if self.broken {
                buffer.abort_with_error();
                return Some(buffer);
            }
            let length = self.duration_limit().map_or(self.length, |l| l.min(self.length));
            buffer.set_duration(length).ok()?;
            buffer.write_decoded_audio(&vec![0u8; buffer.capacity()]);
            buffer.decoded_eof();
            Some(buffer)
        }

        fn duration_limit(&self) -> Option<Duration> {
            *self.limit.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn set_duration_limit(&self, limit: Option<Duration>) {
            *self.limit.lock().unwrap_or_else(PoisonError::into_inner) = limit;
        }

        fn mark_unplayable(&self) {
            self.unplayable.store(true, Ordering::Relaxed);
        }

        fn is_playable(&self) -> bool {
            !self.unplayable.load(Ordering::Relaxed)
        }
    }

    struct FakeBackend;

    impl OutputBackend for FakeBackend {
        fn format(&self) -> AudioFormat {
            test_format()
        }

        fn device_name(&self) -> String {
            "fake".to_string()
        }

        fn open_stream(&mut self, ctx: StreamContext) -> Result<Box<dyn OutputStream>> {
            Ok(Box::new(FakeStream::new(ctx)))
        }
    }

    /// Pulls 64 frames per millisecond while playing, like a fast sound card.
    struct FakeStream {
        playing: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        pump: Option<JoinHandle<()>>,
    }

    impl FakeStream {
        fn new(ctx: StreamContext) -> Self {
            let playing = Arc::new(AtomicBool::new(false));
            let stop = Arc::new(AtomicBool::new(false));
            let pump = {
                let playing = playing.clone();
                let stop = stop.clone();
                thread::spawn(move || {
                    let bpf = ctx.chain.format().bytes_per_frame();
                    let mut scratch = vec![0u8; 64 * bpf];
                    while !stop.load(Ordering::Relaxed) {
                        if playing.load(Ordering::Relaxed) {
                            let n = ctx.chain.read(&mut scratch);
                            ctx.counters
                                .played_frames
                                .fetch_add((n / bpf) as u64, Ordering::Relaxed);
                            if n == 0 && ctx.chain.is_finished() {
                                ctx.idle.fire();
                            }
                        }
                        thread::sleep(ms(1));
                    }
                })
            };
            Self {
                playing,
                stop,
                pump: Some(pump),
            }
        }
    }

    impl OutputStream for FakeStream {
        fn play(&mut self) -> Result<()> {
            self.playing.store(true, Ordering::Relaxed);
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.playing.store(false, Ordering::Relaxed);
            Ok(())
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(pump) = self.pump.take() {
                let _ = pump.join();
            }
        }
    }

    /// Track list that records every `track_finished` call.
    struct RecordingList {
        inner: TrackList,
        finished: Arc<Mutex<Vec<String>>>,
    }

    impl Playlist for RecordingList {
        fn current_item(&self) -> Option<Arc<dyn Track>> {
            self.inner.current_item()
        }

        fn next_item(&mut self) -> Option<Arc<dyn Track>> {
            self.inner.next_item()
        }

        fn prev_item(&mut self) -> Option<Arc<dyn Track>> {
            self.inner.prev_item()
        }

        fn has_next(&self) -> bool {
            self.inner.has_next()
        }

        fn has_prev(&self) -> bool {
            self.inner.has_prev()
        }

        fn track_finished(&mut self, track: &Arc<dyn Track>, _played: Duration) {
            self.finished
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(track.title());
        }
    }

    fn track_list(tracks: Vec<Arc<MemoryTrack>>) -> TrackList {
        TrackList::new(tracks.into_iter().map(|t| t as Arc<dyn Track>).collect())
    }

    fn spawn_player(tracks: Vec<Arc<MemoryTrack>>) -> Player {
        spawn_with(Box::new(track_list(tracks)))
    }

    fn spawn_with(playlist: Box<dyn Playlist>) -> Player {
        let config = EngineConfig {
            stop_fade: ms(20),
            skip_fade: ms(10),
            ..EngineConfig::default()
        };
        Player::spawn(
            config,
            playlist,
            PassthroughChain::factory(),
            Box::new(|| Ok(Box::new(FakeBackend) as Box<dyn OutputBackend>)),
        )
        .unwrap()
    }

    fn unplayable(events: &[PlayerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::TrackUnplayable { title } => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    /// Collect events up to and including the change into `to`.
    fn wait_for(rx: &Receiver<PlayerEvent>, to: State) -> Vec<PlayerEvent> {
        let mut seen = Vec::new();
        loop {
            let ev = rx
                .recv_timeout(Duration::from_secs(5))
                .unwrap_or_else(|_| panic!("no change to {to:?}; saw {seen:?}"));
            let done = matches!(ev, PlayerEvent::StateChanged { to: t, .. } if t == to);
            seen.push(ev);
            if done {
                return seen;
            }
        }
    }

    fn changes(events: &[PlayerEvent]) -> Vec<(State, State)> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    fn started(events: &[PlayerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::TrackStarted { title } => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plays_through_the_playlist_then_stops() {
        let player = spawn_player(vec![
            MemoryTrack::new("a", ms(100)),
            MemoryTrack::new("b", ms(100)),
        ]);
        let events = player.subscribe();
        player.play();

        let seen = wait_for(&events, State::Stopped);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Stopped, State::StartingPlayback),
                (State::StartingPlayback, State::Playing),
                (State::Playing, State::StartingPlayback),
                (State::StartingPlayback, State::Playing),
                (State::Playing, State::Stopped),
            ]
        );
        assert_eq!(started(&seen), vec!["a", "b"]);
        assert_eq!(player.state(), State::Stopped);
        player.shutdown();
    }

    #[test]
    fn stop_fades_out_and_play_starts_again() {
        let player = spawn_player(vec![MemoryTrack::new("long", Duration::from_secs(60))]);
        let events = player.subscribe();

        for _ in 0..2 {
            player.play();
            wait_for(&events, State::Playing);
            player.stop();
            let seen = wait_for(&events, State::Stopped);
            assert_eq!(
                changes(&seen),
                vec![
                    (State::Playing, State::FadeOutToStop),
                    (State::FadeOutToStop, State::Stopped),
                ]
            );
        }
        assert_eq!(player.state(), State::Stopped);
    }

    #[test]
    fn failing_track_is_skipped_without_playing() {
        let broken = MemoryTrack::broken("broken");
        let player = spawn_player(vec![broken.clone(), MemoryTrack::new("good", ms(100))]);
        let events = player.subscribe();
        player.play();

        let seen = wait_for(&events, State::Stopped);
        let unplayable = seen
            .iter()
            .position(|e| matches!(e, PlayerEvent::TrackUnplayable { title } if title == "broken"))
            .unwrap();
        let first_playing = seen
            .iter()
            .position(|e| matches!(e, PlayerEvent::StateChanged { to: State::Playing, .. }))
            .unwrap();
        assert!(unplayable < first_playing);
        assert_eq!(started(&seen), vec!["good"]);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Stopped, State::StartingPlayback),
                (State::StartingPlayback, State::Playing),
                (State::Playing, State::Stopped),
            ]
        );
        assert!(!broken.is_playable());
    }

    #[test]
    fn only_track_failing_stops_the_player() {
        let player = spawn_player(vec![MemoryTrack::broken("broken")]);
        let events = player.subscribe();
        player.play();

        let seen = wait_for(&events, State::Stopped);
        assert_eq!(changes(&seen), vec![
            (State::Stopped, State::StartingPlayback),
            (State::StartingPlayback, State::Stopped),
        ]);
        assert!(started(&seen).is_empty());
    }

    #[test]
    fn pause_resume_and_skip_past_the_end() {
        let player = spawn_player(vec![MemoryTrack::new("long", Duration::from_secs(60))]);
        let events = player.subscribe();
        player.play();
        wait_for(&events, State::Playing);

        player.toggle_pause();
        wait_for(&events, State::Paused);
        player.resume();
        let seen = wait_for(&events, State::Playing);
        assert_eq!(changes(&seen), vec![(State::Paused, State::Playing)]);
        assert!(started(&seen).is_empty());

        player.next();
        let seen = wait_for(&events, State::Stopped);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Playing, State::FadeOutToTrack(Target::Next)),
                (State::FadeOutToTrack(Target::Next), State::Stopped),
            ]
        );
    }

    #[test]
    fn skip_fades_into_the_next_track() {
        let player = spawn_player(vec![
            MemoryTrack::new("a", Duration::from_secs(60)),
            MemoryTrack::new("b", Duration::from_secs(60)),
        ]);
        let events = player.subscribe();
        player.play();
        wait_for(&events, State::Playing);

        player.next();
        let seen = wait_for(&events, State::Playing);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Playing, State::FadeOutToTrack(Target::Next)),
                (State::FadeOutToTrack(Target::Next), State::StartingPlayback),
                (State::StartingPlayback, State::Playing),
            ]
        );
        assert_eq!(started(&seen), vec!["b"]);
        assert_eq!(player.status().now_playing.as_deref(), Some("b"));

        player.prev();
        wait_for(&events, State::Playing);
        assert_eq!(player.status().now_playing.as_deref(), Some("a"));
    }

    #[test]
    fn paused_skip_stops_the_device_first() {
        let player = spawn_player(vec![
            MemoryTrack::new("a", Duration::from_secs(60)),
            MemoryTrack::new("b", Duration::from_secs(60)),
        ]);
        let events = player.subscribe();
        player.play();
        wait_for(&events, State::Playing);
        player.pause();
        wait_for(&events, State::Paused);

        player.next();
        let seen = wait_for(&events, State::Playing);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Paused, State::FadeOutToTrack(Target::Next)),
                (State::FadeOutToTrack(Target::Next), State::StartingPlayback),
                (State::StartingPlayback, State::Playing),
            ]
        );
    }

    #[test]
    fn seek_while_stopped_applies_to_the_next_start() {
        let player = spawn_player(vec![MemoryTrack::new("long", Duration::from_secs(60))]);
        let events = player.subscribe();
        player.seek(Duration::from_secs(30));
        player.play();
        wait_for(&events, State::Playing);

        let status = player.status();
        assert!(status.position_ms.unwrap() >= 30_000);
        assert_eq!(status.duration_ms, Some(60_000));
        assert_eq!(status.device.as_deref(), Some("fake"));
    }

    #[test]
    fn volume_and_tempo_are_reported() {
        let player = spawn_player(vec![MemoryTrack::new("a", ms(100))]);
        player.set_volume(2.0);
        assert_eq!(player.status().volume, 1.0);
        player.set_volume(0.25);
        assert_eq!(player.status().volume, 0.25);

        let events = player.subscribe();
        player.set_tempo(1.5);
        player.play();
        wait_for(&events, State::Playing);
        assert_eq!(player.status().tempo, 1.5);
    }

    #[test]
    fn stop_then_start_then_stop_during_the_fade() {
        let player = spawn_player(vec![MemoryTrack::new("long", Duration::from_secs(60))]);
        let events = player.subscribe();
        player.play();
        wait_for(&events, State::Playing);

        player.stop();
        player.play();
        player.stop();
        let seen = wait_for(&events, State::Stopped);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Playing, State::FadeOutToStop),
                (State::FadeOutToStop, State::FadeOutToTrack(Target::Current)),
                (State::FadeOutToTrack(Target::Current), State::FadeOutToStop),
                (State::FadeOutToStop, State::Stopped),
            ]
        );
    }

    #[test]
    fn track_failing_after_a_skip_is_still_marked() {
        let slow = MemoryTrack::slow_broken("slow", ms(200));
        let player = spawn_player(vec![slow.clone(), MemoryTrack::new("good", ms(100))]);
        let events = player.subscribe();
        player.play();
        wait_for(&events, State::StartingPlayback);
        player.next();

        let seen = wait_for(&events, State::Stopped);
        assert_eq!(unplayable(&seen), vec!["slow"]);
        assert_eq!(started(&seen), vec!["good"]);
        assert!(!slow.is_playable());
    }

    #[test]
    fn restart_from_pause_releases_the_old_track() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let player = spawn_with(Box::new(RecordingList {
            inner: track_list(vec![MemoryTrack::new("long", Duration::from_secs(60))]),
            finished: finished.clone(),
        }));
        let events = player.subscribe();
        player.play();
        wait_for(&events, State::Playing);
        player.pause();
        wait_for(&events, State::Paused);

        player.play();
        let seen = wait_for(&events, State::Playing);
        assert_eq!(
            changes(&seen),
            vec![
                (State::Paused, State::StartingPlayback),
                (State::StartingPlayback, State::Playing),
            ]
        );
        assert_eq!(*finished.lock().unwrap(), vec!["long"]);
    }

    #[test]
    fn backend_failure_fails_spawn() {
        let result = Player::spawn(
            EngineConfig::default(),
            Box::new(TrackList::default()),
            PassthroughChain::factory(),
            Box::new(|| Err(anyhow!("no device"))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn play_with_empty_playlist_stays_stopped() {
        let player = spawn_player(Vec::new());
        let events = player.subscribe();
        player.play();
        player.next();
        assert!(events.recv_timeout(ms(100)).is_err());
        assert_eq!(player.state(), State::Stopped);
    }
}
