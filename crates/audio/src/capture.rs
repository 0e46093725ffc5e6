//! System-Audio-Capture via cpal
//!
//! Der cpal-Stream lebt in einem eigenen Thread (cpal-Streams sind nicht
//! auf allen Plattformen `Send`). Der Callback sammelt Samples zu
//! 20ms-Frames und legt sie in die begrenzte Capture-Queue. Ist die Queue
//! voll, wird der neue Frame verworfen: Capture ist live, alte Frames
//! werden vom Uplink ohnehin gleich abgeholt.

use audiobridge_core::{PcmFrame, FRAME_SAMPLES, SAMPLE_RATE};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

use crate::device::resolve_input_device;
use crate::error::{AudioError, AudioResult};

/// Konsumentenseite der Capture-Queue (wird vom Uplink gelesen)
pub type CaptureQueue = Receiver<PcmFrame>;

/// Konfiguration fuer den Audio-Capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Bevorzugter Geraetename (Teilstring)
    pub device: String,
    /// Generische Geraetenamen in Prioritaetsreihenfolge
    pub fallback_devices: Vec<String>,
    /// Kapazitaet der Capture-Queue in Frames
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "VLX_VirtualSink.monitor".into(),
            fallback_devices: vec!["pipewire".into(), "pulse".into(), "default".into()],
            queue_depth: 10,
        }
    }
}

/// Setzt Callback-Puffer beliebiger Groesse zu 20ms-Stereo-Frames zusammen
pub struct FrameAssembler {
    kanaele: usize,
    puffer: Vec<i16>,
    tx: Sender<PcmFrame>,
    verworfen: Arc<AtomicU64>,
}

impl FrameAssembler {
    pub fn new(kanaele: u16, tx: Sender<PcmFrame>, verworfen: Arc<AtomicU64>) -> Self {
        Self {
            kanaele: usize::from(kanaele.max(1)),
            puffer: Vec::with_capacity(FRAME_SAMPLES),
            tx,
            verworfen,
        }
    }

    /// Nimmt interleaved i16-Samples mit der Kanalanzahl des Geraets an
    pub fn push_i16(&mut self, data: &[i16]) {
        for frame in data.chunks_exact(self.kanaele) {
            let links = frame[0];
            let rechts = if self.kanaele > 1 { frame[1] } else { frame[0] };
            self.push_stereo(links, rechts);
        }
    }

    /// Nimmt interleaved f32-Samples (-1.0..1.0) an
    pub fn push_f32(&mut self, data: &[f32]) {
        for frame in data.chunks_exact(self.kanaele) {
            let links = f32_to_i16(frame[0]);
            let rechts = if self.kanaele > 1 {
                f32_to_i16(frame[1])
            } else {
                links
            };
            self.push_stereo(links, rechts);
        }
    }

    fn push_stereo(&mut self, links: i16, rechts: i16) {
        self.puffer.push(links);
        self.puffer.push(rechts);
        if self.puffer.len() < FRAME_SAMPLES {
            return;
        }

        let frame = PcmFrame::from_samples(&self.puffer);
        self.puffer.clear();
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.verworfen.fetch_add(1, Ordering::Relaxed);
            }
            // Uplink beendet, Thread wird gleich gestoppt
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Laufender Capture-Stream
///
/// Haelt den Capture-Thread am Leben. `stop()` oder Drop schliessen den
/// Geraete-Stream und warten auf das Thread-Ende.
pub struct CaptureDevice {
    geraet: String,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    verworfen: Arc<AtomicU64>,
}

impl CaptureDevice {
    /// Oeffnet das Geraet und startet die Aufnahme
    ///
    /// Fehler beim Oeffnen (z.B. kein Eingabegeraet) werden synchron
    /// zurueckgegeben.
    pub fn start(config: &CaptureConfig) -> AudioResult<(Self, CaptureQueue)> {
        if config.queue_depth == 0 {
            return Err(AudioError::Konfiguration(
                "Capture-Queue braucht mindestens einen Platz".into(),
            ));
        }

        let (frame_tx, frame_rx) = bounded::<PcmFrame>(config.queue_depth);
        let (bereit_tx, bereit_rx) = bounded::<AudioResult<String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let verworfen = Arc::new(AtomicU64::new(0));

        let thread_config = config.clone();
        let thread_verworfen = Arc::clone(&verworfen);
        let thread = std::thread::Builder::new()
            .name("audiobridge-capture".to_string())
            .spawn(move || {
                match open_capture_stream(&thread_config, frame_tx, thread_verworfen) {
                    Ok((stream, name)) => {
                        let _ = bereit_tx.send(Ok(name));
                        // Blockiert bis stop() oder Drop den Sender schliesst
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("Capture-Stream geschlossen");
                    }
                    Err(e) => {
                        let _ = bereit_tx.send(Err(e));
                    }
                }
            })?;

        let geraet = bereit_rx
            .recv()
            .map_err(|_| AudioError::StreamFehler("Capture-Thread unerwartet beendet".into()))??;

        info!(geraet = %geraet, "Capture gestartet");

        Ok((
            Self {
                geraet,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
                verworfen,
            },
            frame_rx,
        ))
    }

    /// Name des geoeffneten Geraets
    pub fn device_name(&self) -> &str {
        &self.geraet
    }

    /// Anzahl wegen voller Queue verworfener Frames
    pub fn dropped_frames(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }

    /// Geteilter Zaehler verworfener Frames (fuer Metriken)
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.verworfen)
    }

    /// Schliesst den Stream; mehrfacher Aufruf ist harmlos
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture-Thread ist abgestuerzt");
            } else {
                info!(geraet = %self.geraet, "Capture gestoppt");
            }
        }
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_capture_stream(
    config: &CaptureConfig,
    frame_tx: Sender<PcmFrame>,
    verworfen: Arc<AtomicU64>,
) -> AudioResult<(Stream, String)> {
    let (device, name) = resolve_input_device(&config.device, &config.fallback_devices)?;
    let (stream_config, sample_format) = stream_config_waehlen(&device)?;

    let mut assembler = FrameAssembler::new(stream_config.channels, frame_tx, verworfen);
    let err_fn = |err| error!("Capture-Fehler: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| assembler.push_f32(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| assembler.push_i16(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::U16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[u16], _| {
                    let samples: Vec<i16> =
                        data.iter().map(|&s| (s as i32 - 32768) as i16).collect();
                    assembler.push_i16(&samples);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        _ => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        "Capture-Stream geoeffnet: {}Hz {}ch {:?}",
        SAMPLE_RATE, stream_config.channels, sample_format
    );

    Ok((stream, name))
}

/// Sucht eine Geraetekonfiguration mit 48 kHz, bevorzugt Stereo
fn stream_config_waehlen(device: &Device) -> AudioResult<(StreamConfig, SampleFormat)> {
    let passend: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter(|c| c.min_sample_rate().0 <= SAMPLE_RATE && c.max_sample_rate().0 >= SAMPLE_RATE)
        .collect();

    let gewaehlt = passend
        .iter()
        .find(|c| c.channels() == 2)
        .or_else(|| passend.first())
        .ok_or_else(|| {
            AudioError::StreamFehler(format!("Geraet unterstuetzt keine {} Hz", SAMPLE_RATE))
        })?;

    let stream_config = StreamConfig {
        channels: gewaehlt.channels(),
        sample_rate: cpal::SampleRate(SAMPLE_RATE),
        buffer_size: cpal::BufferSize::Default,
    };
    Ok((stream_config, gewaehlt.sample_format()))
}
