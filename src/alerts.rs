use std::{
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    consts::{ALERT_BODY_MAX_CHARS, TONE_DURATION_MS, TONE_HIGH_HZ, TONE_LOW_HZ, TONE_SPACING_MS},
    error::{SyncError, SyncResult},
    model::Notification,
    settings::SettingsStore,
    util::truncate_message,
};

/// Short pre-encoded chime used when tone synthesis fails.
static FALLBACK_SAMPLE: &[u8] = include_bytes!("../assets/chime.wav");

/// Sound output seam. The real implementation drives an audio device;
/// tests substitute a recorder.
pub trait SoundBackend: Send + Sync {
    fn play_two_tone(&self) -> Result<(), String>;
    fn play_fallback_sample(&self) -> Result<(), String>;
}

/// OS-level push seam. `probe` models the one-time permission request.
pub trait PushBackend: Send + Sync {
    fn probe(&self) -> bool;
    fn send(&self, notification: &Notification) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushPermission {
    Unknown,
    Requested,
    Granted,
    /// Sticky for the rest of the session; no re-prompt is issued.
    Denied,
}

/// Decides whether and how to render sound and OS push for an admitted
/// event. Sound and push are independently gated; every failure path is a
/// soft degrade.
pub struct AlertDispatcher {
    settings: Arc<SettingsStore>,
    sound: Box<dyn SoundBackend>,
    push: Box<dyn PushBackend>,
    permission: Mutex<PushPermission>,
}

impl AlertDispatcher {
    pub fn new(
        settings: Arc<SettingsStore>,
        sound: Box<dyn SoundBackend>,
        push: Box<dyn PushBackend>,
    ) -> Self {
        Self {
            settings,
            sound,
            push,
            permission: Mutex::new(PushPermission::Unknown),
        }
    }

    pub fn with_default_backends(settings: Arc<SettingsStore>) -> Self {
        Self::new(settings, Box::new(RodioSound), Box::new(DesktopPush))
    }

    /// Requests OS push permission, at most once per session. A refusal is
    /// sticky: later calls return `PermissionDenied` without re-prompting.
    pub fn request_permission(&self) -> SyncResult<()> {
        let mut permission = self.permission.lock().unwrap_or_else(|e| e.into_inner());
        match *permission {
            PushPermission::Granted => return Ok(()),
            PushPermission::Denied => return Err(SyncError::PermissionDenied),
            PushPermission::Unknown | PushPermission::Requested => {}
        }

        *permission = PushPermission::Requested;
        if self.push.probe() {
            *permission = PushPermission::Granted;
            Ok(())
        } else {
            *permission = PushPermission::Denied;
            Err(SyncError::PermissionDenied)
        }
    }

    pub fn permission(&self) -> PushPermission {
        *self.permission.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Renders alerts for one admitted event per the session policy and the
    /// event's own delivery flags. Never fails the caller.
    pub fn dispatch(&self, notification: &Notification) {
        let settings = self.settings.current();

        if settings.sound_alerts && notification.play_sound {
            if let Err(error) = self.play_sound() {
                tracing::debug!(%error, "sound alert skipped");
            }
        }

        if settings.push_notifications && notification.send_push {
            if self.permission() == PushPermission::Granted {
                if let Err(error) = self.push.send(notification) {
                    tracing::debug!(%error, "push alert failed");
                }
            } else {
                tracing::debug!("push suppressed: permission not granted");
            }
        }
    }

    /// Two-tier sound path: synthesized tone first, embedded sample second.
    fn play_sound(&self) -> SyncResult<()> {
        if let Err(primary) = self.sound.play_two_tone() {
            tracing::debug!(%primary, "tone synthesis failed, trying fallback sample");
            if let Err(fallback) = self.sound.play_fallback_sample() {
                return Err(SyncError::AudioUnavailable(format!(
                    "synthesis: {primary}; sample: {fallback}"
                )));
            }
        }
        Ok(())
    }
}

/// Synthesizes the alert pattern with an oscillator source: two ascending
/// tones, 150 ms each, starts 200 ms apart. Blocks for the duration of the
/// pattern; callers dispatch from a dedicated thread.
pub struct RodioSound;

impl SoundBackend for RodioSound {
    fn play_two_tone(&self) -> Result<(), String> {
        use rodio::source::{SineWave, Source, Zero};

        let (_stream, handle) = rodio::OutputStream::try_default()
            .map_err(|error| format!("no audio output available: {error}"))?;
        let sink = rodio::Sink::try_new(&handle)
            .map_err(|error| format!("failed to open audio sink: {error}"))?;

        let gap_ms = TONE_SPACING_MS.saturating_sub(TONE_DURATION_MS);
        sink.append(
            SineWave::new(TONE_LOW_HZ)
                .take_duration(Duration::from_millis(TONE_DURATION_MS))
                .amplify(0.60),
        );
        sink.append(Zero::<f32>::new(1, 44_100).take_duration(Duration::from_millis(gap_ms)));
        sink.append(
            SineWave::new(TONE_HIGH_HZ)
                .take_duration(Duration::from_millis(TONE_DURATION_MS))
                .amplify(0.60),
        );
        sink.sleep_until_end();
        Ok(())
    }

    fn play_fallback_sample(&self) -> Result<(), String> {
        let (_stream, handle) = rodio::OutputStream::try_default()
            .map_err(|error| format!("no audio output available: {error}"))?;
        let sink = rodio::Sink::try_new(&handle)
            .map_err(|error| format!("failed to open audio sink: {error}"))?;

        let source = rodio::Decoder::new(Cursor::new(FALLBACK_SAMPLE))
            .map_err(|error| format!("failed to decode fallback sample: {error}"))?;
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}

/// OS notification backend. Deliveries are tagged with the notification id
/// so the OS collapses duplicates for the same id.
pub struct DesktopPush;

impl PushBackend for DesktopPush {
    fn probe(&self) -> bool {
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            notify_rust::get_capabilities().is_ok()
        }
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        {
            true
        }
    }

    fn send(&self, notification: &Notification) -> Result<(), String> {
        let mut push = notify_rust::Notification::new();
        push.appname("Teamline")
            .summary(&notification.title)
            .body(&truncate_message(&notification.body, ALERT_BODY_MAX_CHARS));
        #[cfg(all(unix, not(target_os = "macos")))]
        push.id(replace_tag(&notification.id));

        push.show()
            .map(|_| ())
            .map_err(|error| format!("failed to show OS notification: {error}"))
    }
}

/// Stable 32-bit tag derived from the notification id (FNV-1a).
#[cfg(all(unix, not(target_os = "macos")))]
fn replace_tag(id: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in id.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
