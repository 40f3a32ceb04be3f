use std::time::{Duration, Instant};

use atmo_core::{AtmoError, CaptureState, CapturedImage, FrameSource, PixelFormat, Result};

/// Stand-in for a media player: "plays" a slowly changing color for a fixed
/// time after creation and renders captures on request.
pub struct SyntheticFrameSource {
    started: Instant,
    playing: Duration,
    aspect_ratio: f32,
    requested: Option<(u32, u32)>,
}

impl SyntheticFrameSource {
    pub fn new(playing: Duration) -> Self {
        Self {
            started: Instant::now(),
            playing,
            aspect_ratio: 16.0 / 9.0,
            requested: None,
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Color of the picture at `elapsed`, cycling through the hues every few
    /// seconds.
    fn color_at(elapsed: Duration) -> [u8; 3] {
        let phase = (elapsed.as_secs_f32() / 6.0).fract() * 3.0;
        let ramp = |offset: f32| {
            let distance = (phase - offset).rem_euclid(3.0);
            let weight = (1.0 - distance.min(3.0 - distance)).max(0.0);
            (weight * 255.0).round() as u8
        };
        [ramp(0.0), ramp(1.0), ramp(2.0)]
    }
}

impl FrameSource for SyntheticFrameSource {
    fn is_playing_video(&self) -> bool {
        self.started.elapsed() < self.playing
    }

    fn capture_state(&self) -> CaptureState {
        CaptureState::Done
    }

    fn wait_for_state_change(&self, _timeout: Duration) -> CaptureState {
        CaptureState::Done
    }

    fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    fn request_capture(&mut self, width: u32, height: u32) -> Result<()> {
        self.requested = Some((width, height));
        Ok(())
    }

    fn captured_image(&mut self) -> Result<CapturedImage> {
        let (width, height) = self
            .requested
            .take()
            .ok_or_else(|| AtmoError::Capture("no capture requested".into()))?;
        let [r, g, b] = Self::color_at(self.started.elapsed());
        let pixels = [r, g, b, 255].repeat((width * height) as usize);
        Ok(CapturedImage {
            width,
            height,
            format: PixelFormat::Rgba,
            pixels,
        })
    }
}
