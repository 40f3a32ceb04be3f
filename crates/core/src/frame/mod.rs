//! Color frames, captured images and the single-slot frame handoff.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use crate::{
    config::{Parameter, ParameterSet},
    error::lock,
    Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const BLACK: RgbColor = RgbColor { r: 0, g: 0, b: 0 };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Screen region contributing channels to a [`ColorFrame`]. Declaration
/// order is the channel order of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Zone {
    Top,
    Bottom,
    Left,
    Right,
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Zone {
    pub const ALL: [Zone; 9] = [
        Zone::Top,
        Zone::Bottom,
        Zone::Left,
        Zone::Right,
        Zone::Center,
        Zone::TopLeft,
        Zone::TopRight,
        Zone::BottomLeft,
        Zone::BottomRight,
    ];

    pub fn parameter(self) -> Parameter {
        match self {
            Zone::Top => Parameter::Top,
            Zone::Bottom => Parameter::Bottom,
            Zone::Left => Parameter::Left,
            Zone::Right => Parameter::Right,
            Zone::Center => Parameter::Center,
            Zone::TopLeft => Parameter::TopLeft,
            Zone::TopRight => Parameter::TopRight,
            Zone::BottomLeft => Parameter::BottomLeft,
            Zone::BottomRight => Parameter::BottomRight,
        }
    }

    pub fn name(self) -> &'static str {
        self.parameter().name()
    }
}

/// Channel count per zone, as configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneLayout {
    channels: [usize; 9],
}

impl ZoneLayout {
    pub fn from_parameters(parameters: &ParameterSet) -> Self {
        let mut channels = [0; 9];
        for (slot, zone) in channels.iter_mut().zip(Zone::ALL) {
            *slot = parameters.int(zone.parameter()).max(0) as usize;
        }
        Self { channels }
    }

    pub fn channels(&self, zone: Zone) -> usize {
        self.channels[zone as usize]
    }

    pub fn total(&self) -> usize {
        self.channels.iter().sum()
    }

    /// Zones in frame order with their channel counts, empty zones skipped.
    pub fn zones(&self) -> impl Iterator<Item = (Zone, usize)> + '_ {
        Zone::ALL
            .into_iter()
            .map(|zone| (zone, self.channels(zone)))
            .filter(|(_, channels)| *channels > 0)
    }
}

/// Ordered per-channel colors produced by one analysis cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ColorFrame {
    colors: Vec<RgbColor>,
}

impl ColorFrame {
    pub fn new(colors: Vec<RgbColor>) -> Self {
        Self { colors }
    }

    pub fn black(channels: usize) -> Self {
        Self::new(vec![RgbColor::BLACK; channels])
    }

    pub fn colors(&self) -> &[RgbColor] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl From<Vec<RgbColor>> for ColorFrame {
    fn from(colors: Vec<RgbColor>) -> Self {
        Self::new(colors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba,
    Bgra,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }
}

/// Raw pixels handed over by the frame source.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl CapturedImage {
    pub fn pixel(&self, x: u32, y: u32) -> Option<RgbColor> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let stride = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * stride;
        let px = self.pixels.get(offset..offset + stride)?;
        Some(match self.format {
            PixelFormat::Rgba => RgbColor::new(px[0], px[1], px[2]),
            PixelFormat::Bgra => RgbColor::new(px[2], px[1], px[0]),
        })
    }
}

impl fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("pixels", &self.pixels.len())
            .finish()
    }
}

/// Latest analyzed frame, written by the capture loop and read by the output
/// loop. The last write wins and readers see `None` until the first frame.
#[derive(Debug, Clone, Default)]
pub struct FrameSlot {
    shared: Arc<Mutex<Option<Arc<ColorFrame>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: ColorFrame) -> Result<()> {
        *lock(&self.shared, "frame slot")? = Some(Arc::new(frame));
        Ok(())
    }

    pub fn latest(&self) -> Result<Option<Arc<ColorFrame>>> {
        Ok(lock(&self.shared, "frame slot")?.clone())
    }

    pub fn clear(&self) -> Result<()> {
        *lock(&self.shared, "frame slot")? = None;
        Ok(())
    }
}
