//! # Display Abstraction
//!
//! Everything the render loop needs from a screen: an `embedded-graphics` draw
//! target plus flush and power control.
//!
//! ## Profiles
//! - **SSD1322**: 256×64 OLED, fast refresh, clock shows seconds
//! - **EPD 2.9" B**: 296×128 e-paper, slow refresh, clock shows HH:MM only and
//!   the "loading" screen is skipped
//!
//! ## Backends
//! Panel drivers implement [`Display`] over their bus. The bundled
//! [`ConsoleDisplay`] keeps a [`FrameBuffer`] and prints it to the terminal on
//! every flush, which is how the board is developed and tested off-device.

use std::convert::Infallible;
use std::fmt;
use std::io::{self, Stdout, Write};
use std::str::FromStr;

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DisplayError {
    /// Writing to the panel (or terminal) failed
    #[error("display I/O error: {0}")]
    Io(#[from] io::Error),

    /// `display.kind` names a panel we do not drive
    #[error("unrecognized display kind {0:?}")]
    UnknownProfile(String),
}

/// A screen the render loop can draw to and power-manage.
pub trait Display:
    DrawTarget<Color = BinaryColor, Error = Infallible> + OriginDimensions + Send
{
    /// Push the back buffer to the panel.
    fn flush(&mut self) -> Result<(), DisplayError>;

    /// Put the panel into its low-power state.
    fn sleep(&mut self) -> Result<(), DisplayError>;

    /// Bring the panel back from [`Display::sleep`].
    fn awake(&mut self) -> Result<(), DisplayError>;

    /// Release the panel. Nothing may be drawn afterwards.
    fn close(&mut self) -> Result<(), DisplayError>;
}

/// Supported panels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DisplayProfile {
    Ssd1322,
    Epd29b,
}

impl DisplayProfile {
    pub fn size(self) -> Size {
        match self {
            DisplayProfile::Ssd1322 => Size::new(256, 64),
            DisplayProfile::Epd29b => Size::new(296, 128),
        }
    }

    /// E-paper is too slow to tick seconds.
    pub fn renders_seconds(self) -> bool {
        self == DisplayProfile::Ssd1322
    }

    /// E-paper keeps whatever it shows last, so a transient "loading" screen is
    /// only worth drawing on the OLED.
    pub fn shows_loading(self) -> bool {
        self == DisplayProfile::Ssd1322
    }
}

impl FromStr for DisplayProfile {
    type Err = DisplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssd1322" => Ok(DisplayProfile::Ssd1322),
            "epd29b" => Ok(DisplayProfile::Epd29b),
            _ => Err(DisplayError::UnknownProfile(s.to_string())),
        }
    }
}

impl TryFrom<String> for DisplayProfile {
    type Error = DisplayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for DisplayProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisplayProfile::Ssd1322 => "ssd1322",
            DisplayProfile::Epd29b => "epd29b",
        })
    }
}

/// 1-bit back buffer, packed eight horizontal pixels per byte (MSB first).
///
/// With `flip` set every pixel is rotated 180°, for panels mounted upside down.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    size: Size,
    flip: bool,
    bits: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(size: Size, flip: bool) -> Self {
        let bytes_per_row = size.width.div_ceil(8);
        Self {
            size,
            flip,
            bits: vec![0; (bytes_per_row * size.height) as usize],
        }
    }

    /// Whether the stored pixel at `(x, y)` is lit. Coordinates are in panel
    /// space, i.e. after any flip.
    pub fn is_on(&self, x: u32, y: u32) -> bool {
        match self.index(x, y) {
            Some((byte, mask)) => self.bits[byte] & mask != 0,
            None => false,
        }
    }

    pub fn lit_pixels(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Raw packed rows, as a panel driver would send them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    fn index(&self, x: u32, y: u32) -> Option<(usize, u8)> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let bytes_per_row = self.size.width.div_ceil(8);
        Some(((y * bytes_per_row + x / 8) as usize, 0x80 >> (x % 8)))
    }

    fn set(&mut self, point: Point, color: BinaryColor) {
        if point.x < 0 || point.y < 0 {
            return;
        }
        let (mut x, mut y) = (point.x as u32, point.y as u32);
        if self.flip && x < self.size.width && y < self.size.height {
            x = self.size.width - 1 - x;
            y = self.size.height - 1 - y;
        }
        if let Some((byte, mask)) = self.index(x, y) {
            match color {
                BinaryColor::On => self.bits[byte] |= mask,
                BinaryColor::Off => self.bits[byte] &= !mask,
            }
        }
    }

    /// Render as text, two pixel rows per line using half-block characters.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity(((self.size.width + 1) * self.size.height.div_ceil(2)) as usize);
        for y in (0..self.size.height).step_by(2) {
            for x in 0..self.size.width {
                out.push(match (self.is_on(x, y), self.is_on(x, y + 1)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                });
            }
            out.push('\n');
        }
        out
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        self.size
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            self.set(point, color);
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.bits.fill(match color {
            BinaryColor::On => 0xFF,
            BinaryColor::Off => 0x00,
        });
        Ok(())
    }
}

/// Terminal-backed [`Display`] for development and headless runs.
pub struct ConsoleDisplay<W = Stdout> {
    profile: DisplayProfile,
    buffer: FrameBuffer,
    out: W,
    asleep: bool,
}

/// Create the display for `profile`.
pub fn create(profile: DisplayProfile, flip: bool) -> ConsoleDisplay<Stdout> {
    ConsoleDisplay::with_writer(profile, flip, io::stdout())
}

impl<W: Write + Send> ConsoleDisplay<W> {
    pub fn with_writer(profile: DisplayProfile, flip: bool, out: W) -> Self {
        info!(%profile, flip, "Creating display");
        Self {
            profile,
            buffer: FrameBuffer::new(profile.size(), flip),
            out,
            asleep: false,
        }
    }

    pub fn profile(&self) -> DisplayProfile {
        self.profile
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn into_writer(self) -> W {
        self.out
    }
}

impl<W> OriginDimensions for ConsoleDisplay<W> {
    fn size(&self) -> Size {
        self.buffer.size()
    }
}

impl<W> DrawTarget for ConsoleDisplay<W> {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        self.buffer.draw_iter(pixels)
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.buffer.clear(color)
    }
}

impl<W: Write + Send> Display for ConsoleDisplay<W> {
    fn flush(&mut self) -> Result<(), DisplayError> {
        if self.asleep {
            return Ok(());
        }
        let width = self.buffer.size().width as usize;
        writeln!(self.out, "+{}+", "-".repeat(width))?;
        for line in self.buffer.to_ascii().lines() {
            writeln!(self.out, "|{line}|")?;
        }
        writeln!(self.out, "+{}+", "-".repeat(width))?;
        self.out.flush()?;
        Ok(())
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        info!("Display sleeping");
        self.asleep = true;
        Ok(())
    }

    fn awake(&mut self) -> Result<(), DisplayError> {
        info!("Display awake");
        self.asleep = false;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DisplayError> {
        info!("Display closed");
        self.asleep = true;
        self.out.flush()?;
        Ok(())
    }
}
