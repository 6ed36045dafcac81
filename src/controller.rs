use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::audio::codec;
use crate::audio::{
    AnalyserConfig, AudioBackend, CaptureHandle, FrameSink, FrequencyAnalyser, InputStream,
    PlaybackEngine,
};
use crate::config::{Config, Credential, SessionConfig};
use crate::error::{AudioError, SessionError};
use crate::monitor::VolumeMonitor;
use crate::net_link::{LinkHandle, LiveTransport, NetEvent, NetLink, SessionEvent};
use crate::protocol::{ServerMessage, SetupMessage};
use crate::state_machine::ConnectionState;

/// How long teardown waits for the link to close the channel.
const LINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the presentation layer observes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub error_message: Option<String>,
    pub volume: f32,
    /// Language and level of the running session, if any.
    pub session: Option<SessionConfig>,
}

enum Lifecycle {
    Idle,
    Active(ActiveSession),
}

/// Everything one session holds. Dropping it releases all of it.
struct ActiveSession {
    id: u64,
    config: SessionConfig,
    /// Acquired microphone, waiting for the channel to open.
    input: Option<Box<dyn InputStream>>,
    capture: Option<CaptureHandle>,
    /// Kept for its drop counter.
    sink: Option<FrameSink>,
    playback: PlaybackEngine,
    analyser: Arc<Mutex<FrequencyAnalyser>>,
    monitor: Option<VolumeMonitor>,
    /// Cleared before the channel goes away; every capture-side send checks it.
    live: Arc<AtomicBool>,
    outbound: Option<mpsc::Sender<String>>,
    link: LinkHandle,
}

/// Owns the lifecycle of the practice session: devices, channel, monitor,
/// and the observable status.
pub struct SessionController {
    config: Config,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn LiveTransport>,
    credential: Option<Credential>,
    events: mpsc::Sender<SessionEvent>,
    status: watch::Sender<SessionStatus>,
    volume: Arc<watch::Sender<f32>>,
    generation: u64,
    lifecycle: Lifecycle,
}

impl SessionController {
    pub fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn LiveTransport>,
        credential: Option<Credential>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (volume, _) = watch::channel(0.0f32);
        Self {
            config,
            backend,
            transport,
            credential,
            events,
            status,
            volume: Arc::new(volume),
            generation: 0,
            lifecycle: Lifecycle::Idle,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.volume.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn snapshot(&self) -> Snapshot {
        let status = self.status.borrow();
        let session = match &self.lifecycle {
            Lifecycle::Active(active) => Some(active.config.clone()),
            Lifecycle::Idle => None,
        };
        Snapshot {
            state: status.state,
            error_message: status.error_message.clone(),
            volume: *self.volume.borrow(),
            session,
        }
    }

    /// Begin a session. The channel opens in the background; its outcome
    /// arrives later through `handle_event`.
    pub async fn start(&mut self, session: SessionConfig) -> Result<(), SessionError> {
        if !self.state().can_start() {
            log::warn!("Start ignored, session is {}", self.state());
            return Err(SessionError::AlreadyActive);
        }

        let Some(credential) = self.credential.clone() else {
            let err = SessionError::MissingCredential;
            self.fail(&err).await;
            return Err(err);
        };

        self.generation += 1;
        let id = self.generation;
        log::info!(
            "Session {}: starting ({}, {})",
            id,
            session.language.display_name,
            session.level
        );
        self.set_status(ConnectionState::Connecting, None);

        // 先启动网络连接，再在等待期间准备音频设备
        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_queue_frames.max(1));
        let link = NetLink::new(
            id,
            self.transport.clone(),
            credential,
            SetupMessage::for_session(self.config.model, &session),
            self.config.connect_timeout,
            self.events.clone(),
        )
        .spawn(out_rx);

        let analyser = Arc::new(Mutex::new(FrequencyAnalyser::new(self.analyser_config())));
        let (input, playback) = match self.acquire_devices(id, analyser.clone()) {
            Ok(devices) => devices,
            Err(e) => {
                link.cancel();
                let err = SessionError::from(e);
                self.fail(&err).await;
                return Err(err);
            }
        };

        self.lifecycle = Lifecycle::Active(ActiveSession {
            id,
            config: session,
            input: Some(input),
            capture: None,
            sink: None,
            playback,
            analyser,
            monitor: None,
            live: Arc::new(AtomicBool::new(true)),
            outbound: Some(out_tx),
            link,
        });
        Ok(())
    }

    fn acquire_devices(
        &self,
        id: u64,
        analyser: Arc<Mutex<FrequencyAnalyser>>,
    ) -> Result<(Box<dyn InputStream>, PlaybackEngine), AudioError> {
        let output = self
            .backend
            .open_output(self.config.playback_sample_rate, self.config.playback_period_size)?;
        let playback =
            PlaybackEngine::start(output, analyser, device_failure_hook(self.events.clone(), id))?;
        let input = self.backend.open_input(self.config.capture_sample_rate)?;
        Ok((input, playback))
    }

    fn analyser_config(&self) -> AnalyserConfig {
        AnalyserConfig {
            fft_size: self.config.fft_size,
            smoothing: self.config.smoothing,
            min_decibels: self.config.min_decibels,
            max_decibels: self.config.max_decibels,
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) {
        let current = match &self.lifecycle {
            Lifecycle::Active(active) => active.id,
            Lifecycle::Idle => 0,
        };
        if event.session != current {
            log::debug!("Ignoring event from stale session {}", event.session);
            return;
        }

        match event.event {
            NetEvent::Opened => self.on_opened().await,
            NetEvent::Message(msg) => self.on_message(&msg),
            NetEvent::Closed(reason) => {
                log::info!(
                    "Session {}: closed by service ({})",
                    current,
                    reason.as_deref().unwrap_or("no reason")
                );
                self.teardown().await;
                self.set_status(ConnectionState::Disconnected, None);
            }
            NetEvent::Error(msg) => self.fail(&SessionError::Channel(msg)).await,
            NetEvent::AudioFailed(msg) => {
                self.fail(&SessionError::Audio(AudioError::Io(msg))).await
            }
        }
    }

    async fn on_opened(&mut self) {
        let Lifecycle::Active(active) = &mut self.lifecycle else {
            return;
        };
        if self.status.borrow().state != ConnectionState::Connecting {
            return;
        }

        let started = match (active.input.take(), active.outbound.take()) {
            (Some(input), Some(outbound)) => {
                let sink = FrameSink::new(outbound, active.live.clone());
                active.sink = Some(sink.clone());
                CaptureHandle::start(
                    input,
                    self.config.capture_frame_size,
                    sink.into_callback(),
                    device_failure_hook(self.events.clone(), active.id),
                )
            }
            _ => Err(AudioError::DeviceUnavailable("microphone already released".into())),
        };

        match started {
            Ok(capture) => {
                active.capture = Some(capture);
                active.monitor = Some(VolumeMonitor::start(
                    active.analyser.clone(),
                    self.volume.clone(),
                    self.config.monitor_refresh_hz,
                ));
                log::info!("Session {}: connected, streaming microphone", active.id);
                self.set_status(ConnectionState::Connected, None);
            }
            Err(e) => self.fail(&SessionError::from(e)).await,
        }
    }

    fn on_message(&self, msg: &ServerMessage) {
        let Lifecycle::Active(active) = &self.lifecycle else {
            return;
        };

        for text in msg.text_parts() {
            log::debug!("Tutor: {}", text);
        }

        for part in msg.audio_parts() {
            let rate = part.sample_rate().unwrap_or(self.config.playback_sample_rate);
            let decoded = codec::decode_bytes(&part.data)
                .and_then(|bytes| codec::decode_audio_segment(&bytes, rate, 1));
            match decoded {
                Ok(frame) => {
                    let handle = active.playback.schedule(frame);
                    log::debug!(
                        "Segment {} scheduled at {:.3}s for {:.3}s",
                        handle.id,
                        handle.start_time,
                        handle.duration
                    );
                }
                Err(e) if e.is_recoverable() => log::warn!("Dropping audio segment: {}", e),
                Err(e) => log::error!("Audio segment failed: {}", e),
            }
        }

        // 打断信号在本条消息的音频之后处理，一并丢弃
        if msg.is_interrupted() {
            let stopped = active.playback.interrupt();
            log::info!("Session {}: interrupted, {} segment(s) cut", active.id, stopped);
        }
    }

    /// Full teardown. Safe from any state, any number of times.
    pub async fn stop(&mut self) {
        if matches!(self.lifecycle, Lifecycle::Active(_)) {
            log::info!("Stopping session");
        }
        self.teardown().await;
        self.set_status(ConnectionState::Disconnected, None);
    }

    async fn fail(&mut self, err: &SessionError) {
        log::error!("Session failed: {}", err);
        self.set_status(ConnectionState::Error, Some(err.user_message()));
        self.teardown().await;
    }

    /// Release everything the session holds. Each step is a no-op when its
    /// resource is already gone.
    async fn teardown(&mut self) {
        let lifecycle = std::mem::replace(&mut self.lifecycle, Lifecycle::Idle);
        if let Lifecycle::Active(mut active) = lifecycle {
            active.live.store(false, Ordering::Release);
            active.outbound.take();
            active.link.cancel();
            if let Some(mut capture) = active.capture.take() {
                capture.stop();
            }
            if let Some(sink) = active.sink.take() {
                if sink.dropped() > 0 {
                    log::warn!(
                        "Session {}: {} outbound frame(s) dropped on a full queue",
                        active.id,
                        sink.dropped()
                    );
                }
            }
            if tokio::time::timeout(LINK_CLOSE_TIMEOUT, active.link.finished())
                .await
                .is_err()
            {
                log::warn!("Session {}: channel did not close in time", active.id);
            }
            active.input.take();
            if let Some(mut monitor) = active.monitor.take() {
                monitor.stop().await;
            }
            active.playback.stop();
            log::debug!("Session {}: resources released", active.id);
        }
        self.volume.send_replace(0.0);
    }

    fn set_status(&self, state: ConnectionState, error_message: Option<String>) {
        let from = self.status.borrow().state;
        if !from.can_transition_to(state) {
            log::warn!("Illegal state change {} -> {} ignored", from, state);
            return;
        }
        if from != state {
            log::info!("State: {} -> {}", from, state);
        }
        self.status.send_replace(SessionStatus {
            state,
            error_message,
        });
    }
}

/// Lets an audio thread fail the session it belongs to.
fn device_failure_hook(
    events: mpsc::Sender<SessionEvent>,
    id: u64,
) -> impl FnOnce(AudioError) + Send + 'static {
    move |e| {
        let detail = match e {
            AudioError::Io(msg) => msg,
            other => other.to_string(),
        };
        let event = SessionEvent {
            session: id,
            event: NetEvent::AudioFailed(detail),
        };
        if events.try_send(event).is_err() {
            log::warn!("Session {}: could not report device failure", id);
        }
    }
}
