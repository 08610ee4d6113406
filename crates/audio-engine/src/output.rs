//! Output side of the player.
//!
//! The output thread owns the device backend and the running session (effect chain plus
//! device stream). CPAL streams are not `Send`, so everything touching the device lives on
//! this one thread; the control thread talks to it only through [`OutputRequest`]s and
//! hears back through acknowledged [`Notice`]s.

use std::sync::atomic::AtomicU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};

use crate::buffer::PlaybackBuffer;
use crate::config::EngineConfig;
use crate::device::{self, OutputSelection};
use crate::effects::{ChainFactory, EffectChain};
use crate::error::EngineError;
use crate::format::AudioFormat;
use crate::playback::{self, IdleSignal, StreamContext};
use crate::status::{PlaybackCounters, PlayerStatus};
use crate::track::Track;

/// A started device stream.
pub trait OutputStream {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
}

/// An output device able to open streams in one fixed format.
pub trait OutputBackend {
    /// Format every buffer must be decoded into.
    fn format(&self) -> AudioFormat;

    fn device_name(&self) -> String;

    fn buffer_size_frames(&self) -> Option<u32> {
        None
    }

    /// Build a stream that pulls from `ctx.chain`. The stream starts paused.
    fn open_stream(&mut self, ctx: StreamContext) -> Result<Box<dyn OutputStream>>;
}

/// Creates the backend on the output thread.
pub type BackendFactory = Box<dyn FnOnce() -> Result<Box<dyn OutputBackend>> + Send>;

/// Backend for the host's audio device through CPAL.
pub struct CpalBackend {
    selection: OutputSelection,
}

impl CpalBackend {
    /// Open the named (or default) output device. Failures surface as [`EngineError::Device`].
    pub fn open(device: Option<&str>, target_rate: Option<u32>) -> Result<Self> {
        let host = cpal::default_host();
        let selection = device::select_output(&host, device, target_rate)
            .map_err(|e| EngineError::Device(format!("{e:#}")))?;
        Ok(Self { selection })
    }

    /// Factory opening the device named in `config`.
    pub fn factory(config: &EngineConfig) -> BackendFactory {
        let device = config.device.clone();
        let rate = config.target_rate;
        Box::new(move || {
            let backend = CpalBackend::open(device.as_deref(), rate)?;
            Ok(Box::new(backend) as Box<dyn OutputBackend>)
        })
    }
}

impl OutputBackend for CpalBackend {
    fn format(&self) -> AudioFormat {
        self.selection.format
    }

    fn device_name(&self) -> String {
        self.selection.name.clone()
    }

    fn buffer_size_frames(&self) -> Option<u32> {
        match self.selection.stream_config.buffer_size {
            cpal::BufferSize::Fixed(frames) => Some(frames),
            cpal::BufferSize::Default => None,
        }
    }

    fn open_stream(&mut self, ctx: StreamContext) -> Result<Box<dyn OutputStream>> {
        let stream = playback::build_output_stream(
            &self.selection.device,
            &self.selection.stream_config,
            self.selection.sample_format,
            ctx,
        )?;
        Ok(Box::new(CpalStream(stream)))
    }
}

struct CpalStream(cpal::Stream);

impl OutputStream for CpalStream {
    fn play(&mut self) -> Result<()> {
        self.0.play().context("start output stream")
    }

    fn pause(&mut self) -> Result<()> {
        self.0.pause().context("pause output stream")
    }
}

/// Work for the output thread. Session-scoped requests for stale sessions are dropped.
pub(crate) enum OutputRequest {
    Start {
        session: u64,
        track: Arc<dyn Track>,
        seek: Option<Duration>,
    },
    Suspend(u64),
    Resume(u64),
    Stop(u64),
    FadeOut {
        session: u64,
        window: Duration,
    },
    Seek {
        session: u64,
        position: Duration,
    },
    Tempo(f32),
    Shutdown,
}

/// What the device did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceEvent {
    Active,
    Suspended,
    Idle,
    Failed,
}

/// Device report for the control thread. The sender blocks until `ack` is answered.
pub(crate) struct Notice {
    pub session: u64,
    pub event: DeviceEvent,
    pub ack: Sender<()>,
}

/// One started track on the device.
struct Session {
    id: u64,
    buffer: Option<Arc<PlaybackBuffer>>,
    chain: Option<Arc<dyn EffectChain>>,
    stream: Option<Box<dyn OutputStream>>,
    idle: Arc<IdleSignal>,
    idle_reported: bool,
}

/// State owned by the output thread.
pub(crate) struct OutputWorker {
    backend: Box<dyn OutputBackend>,
    chains: ChainFactory,
    requests: Receiver<OutputRequest>,
    notices: Sender<Notice>,
    idle_tx: Sender<u64>,
    idle_rx: Receiver<u64>,
    status: Arc<Mutex<PlayerStatus>>,
    volume: Arc<AtomicU32>,
    counters: Arc<PlaybackCounters>,
    refill_max_frames: usize,
    tempo: f32,
    session: Option<Session>,
}

impl OutputWorker {
    pub(crate) fn new(
        backend: Box<dyn OutputBackend>,
        chains: ChainFactory,
        requests: Receiver<OutputRequest>,
        notices: Sender<Notice>,
        status: Arc<Mutex<PlayerStatus>>,
        volume: Arc<AtomicU32>,
        refill_max_frames: usize,
    ) -> Self {
        let (idle_tx, idle_rx) = unbounded();
        let counters = PlayerStatus::lock(&status).counters.clone();
        Self {
            backend,
            chains,
            requests,
            notices,
            idle_tx,
            idle_rx,
            status,
            volume,
            counters,
            refill_max_frames,
            tempo: 1.0,
            session: None,
        }
    }

    pub(crate) fn run(mut self) {
        tracing::debug!(device = %self.backend.device_name(), "output thread started");
        let requests = self.requests.clone();
        let idle_rx = self.idle_rx.clone();
        loop {
            select! {
                recv(requests) -> req => match req {
                    Ok(OutputRequest::Shutdown) | Err(_) => break,
                    Ok(req) => self.handle(req),
                },
                recv(idle_rx) -> id => {
                    if let Ok(id) = id {
                        self.on_hardware_idle(id);
                    }
                }
            }
        }
        self.teardown();
        tracing::debug!("output thread stopped");
    }

    fn handle(&mut self, req: OutputRequest) {
        match req {
            OutputRequest::Start {
                session,
                track,
                seek,
            } => self.start(session, track, seek),
            OutputRequest::Suspend(id) => {
                let paused = self
                    .live(id)
                    .and_then(|s| s.stream.as_mut())
                    .map(|stream| stream.pause());
                match paused {
                    Some(Ok(())) => self.notify(id, DeviceEvent::Suspended),
                    Some(Err(e)) => tracing::warn!(session = id, "cannot pause: {e:#}"),
                    None => {}
                }
            }
            OutputRequest::Resume(id) => {
                let resumed = self
                    .live(id)
                    .and_then(|s| s.stream.as_mut())
                    .map(|stream| stream.play());
                match resumed {
                    Some(Ok(())) => self.notify(id, DeviceEvent::Active),
                    Some(Err(e)) => tracing::warn!(session = id, "cannot resume: {e:#}"),
                    None => {}
                }
            }
            OutputRequest::Stop(id) => {
                if let Some(s) = self.live(id) {
                    if let Some(stream) = s.stream.as_mut() {
                        if let Err(e) = stream.pause() {
                            tracing::warn!(session = id, "cannot pause on stop: {e:#}");
                        }
                    }
                    s.idle.fire();
                }
            }
            OutputRequest::FadeOut { session, window } => {
                if let Some(s) = self.live(session) {
                    match s.chain.as_ref().filter(|_| s.stream.is_some()) {
                        Some(chain) => chain.fade_out(window),
                        None => {
                            s.idle.fire();
                        }
                    }
                }
            }
            OutputRequest::Seek { session, position } => {
                if let Some(chain) = self.live(session).and_then(|s| s.chain.as_ref()) {
                    chain.seek_to(position);
                }
            }
            OutputRequest::Tempo(tempo) => {
                self.tempo = tempo;
                if let Some(chain) = self.session.as_ref().and_then(|s| s.chain.as_ref()) {
                    chain.set_tempo(tempo);
                }
            }
            OutputRequest::Shutdown => {}
        }
    }

    fn live(&mut self, id: u64) -> Option<&mut Session> {
        let live = self.session.as_mut().filter(|s| s.id == id);
        if live.is_none() {
            tracing::debug!(session = id, "dropping request for stale session");
        }
        live
    }

    fn start(&mut self, id: u64, track: Arc<dyn Track>, seek: Option<Duration>) {
        self.teardown();
        self.counters.reset();

        let idle = Arc::new(IdleSignal::new(id, self.idle_tx.clone()));
        self.session = Some(Session {
            id,
            buffer: None,
            chain: None,
            stream: None,
            idle: idle.clone(),
            idle_reported: false,
        });

        let title = track.title();
        match self.open_session(track.as_ref(), seek, idle) {
            Ok(()) => {
                tracing::info!(session = id, title = %title, "output started");
                self.notify(id, DeviceEvent::Active);
            }
            Err(e) => {
                tracing::warn!(session = id, title = %title, "cannot start track: {e:#}");
                if let Some(buffer) = self.session.as_mut().and_then(|s| s.buffer.take()) {
                    buffer.abort();
                }
                self.notify(id, DeviceEvent::Failed);
            }
        }
    }

    fn open_session(
        &mut self,
        track: &dyn Track,
        seek: Option<Duration>,
        idle: Arc<IdleSignal>,
    ) -> Result<()> {
        let format = self.backend.format();
        let buffer = track
            .start_decoding(&format)
            .ok_or_else(|| anyhow!("decoding could not be started"))?;
        if let Some(s) = self.session.as_mut() {
            s.buffer = Some(buffer.clone());
        }

        let chain = (self.chains)(buffer);
        chain.set_tempo(self.tempo);
        if !chain.wait_for_data() {
            return Err(EngineError::NoInitialData.into());
        }
        if let Some(position) = seek {
            chain.seek_to(position);
        }

        let ctx = StreamContext {
            chain: chain.clone(),
            volume: self.volume.clone(),
            counters: self.counters.clone(),
            idle,
            refill_max_frames: self.refill_max_frames,
        };
        let mut stream = self.backend.open_stream(ctx).context("open output stream")?;
        stream.play()?;

        {
            let mut st = PlayerStatus::lock(&self.status);
            st.now_playing = Some(track.title());
            st.chain = Some(chain.clone());
        }
        if let Some(s) = self.session.as_mut() {
            s.chain = Some(chain);
            s.stream = Some(stream);
        }
        Ok(())
    }

    fn on_hardware_idle(&mut self, id: u64) {
        let Some(s) = self.live(id) else {
            return;
        };
        if s.idle_reported {
            return;
        }
        s.idle_reported = true;

        tracing::debug!(session = id, "device idle");
        self.notify(id, DeviceEvent::Idle);
        if self.session.as_ref().is_some_and(|s| s.id == id) {
            self.teardown();
        }
    }

    /// Drop the running session: stop the stream, then abort its producer.
    fn teardown(&mut self) {
        let Some(mut s) = self.session.take() else {
            return;
        };
        drop(s.stream.take());
        s.chain = None;
        if let Some(buffer) = s.buffer.take() {
            buffer.abort();
        }
        PlayerStatus::lock(&self.status).clear_playback();
        tracing::debug!(session = s.id, idle = s.idle.has_fired(), "session released");
    }

    /// Report to the control thread and wait until it has acted on the report.
    fn notify(&self, session: u64, event: DeviceEvent) {
        let (ack, acked) = bounded(1);
        if self.notices.send(Notice { session, event, ack }).is_ok() {
            let _ = acked.recv();
        }
    }
}
