//! # Screen Widgets
//!
//! Small retained-state widgets drawn with `embedded-graphics` mono fonts. Each
//! `render` call reports whether it changed any pixels since its previous draw;
//! the render loop only flushes the panel when something did.
//!
//! ## Layout
//! ```text
//! +--------------------------------------------+
//! | 10:15 Reading                      On time |  <- bold first row
//! | 10:21 Oxford               >  Exp 10:24    |  <- fast train marker
//! | 10:40 Didcot Parkway             Cancelled |
//! |                  10:12:45                  |  <- clock, bottom centre
//! +--------------------------------------------+
//! ```

use std::convert::Infallible;

use chrono::{NaiveDateTime, Timelike};
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_6X10, FONT_6X13_BOLD},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle, Triangle},
    text::{Baseline, Text},
};

use crate::{format_hhmm, Departure, Station};

const LARGE_FONT: &MonoFont<'static> = &FONT_10X20;
const BOLD_FONT: &MonoFont<'static> = &FONT_6X13_BOLD;
const DEFAULT_FONT: &MonoFont<'static> = &FONT_6X10;

const ROW_SPACING: u32 = FONT_6X13_BOLD.character_size.height + 1;
const FAST_ICON_WIDTH: u32 = 6;
const WELCOME_TO: &str = "Welcome to";

fn text_width(font: &MonoFont<'_>, text: &str) -> u32 {
    font.character_size.width * text.chars().count() as u32
}

fn draw_text<D>(target: &mut D, text: &str, font: &MonoFont<'_>, at: Point)
where
    D: DrawTarget<Color = BinaryColor, Error = Infallible>,
{
    Text::with_baseline(text, at, MonoTextStyle::new(font, BinaryColor::On), Baseline::Top)
        .draw(target)
        .ok();
}

fn clear_area<D>(target: &mut D, area: Rectangle)
where
    D: DrawTarget<Color = BinaryColor, Error = Infallible>,
{
    target.fill_solid(&area, BinaryColor::Off).ok();
}

/// Status text shown at the right of a departure row.
pub fn status_text(departure: &Departure) -> String {
    if departure.cancelled {
        "Cancelled".to_string()
    } else if departure.is_delayed() {
        format!("Exp {}", format_hhmm(departure.actual))
    } else {
        "On time".to_string()
    }
}

/// `HH:MM` in a large font with optional small `:SS`.
pub struct ClockWidget {
    render_seconds: bool,
    last: Option<(u32, u32, u32)>,
}

impl ClockWidget {
    pub fn new(render_seconds: bool) -> Self {
        Self {
            render_seconds,
            last: None,
        }
    }

    pub fn size(&self) -> Size {
        let hh_mm = text_width(LARGE_FONT, "00:00");
        let height = LARGE_FONT.character_size.height;
        if self.render_seconds {
            Size::new(hh_mm + text_width(BOLD_FONT, ":00"), height)
        } else {
            Size::new(hh_mm, height)
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Draw `now` with its top-left corner at `at`.
    pub fn render<D>(&mut self, target: &mut D, now: NaiveDateTime, at: Point) -> bool
    where
        D: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        let seconds = if self.render_seconds { now.second() } else { 0 };
        let current = (now.hour(), now.minute(), seconds);
        if self.last == Some(current) {
            return false;
        }

        clear_area(target, Rectangle::new(at, self.size()));
        draw_text(
            target,
            &format!("{:02}:{:02}", current.0, current.1),
            LARGE_FONT,
            at,
        );
        if self.render_seconds {
            let x = at.x + text_width(LARGE_FONT, "00:00") as i32;
            let y = at.y + (LARGE_FONT.character_size.height - BOLD_FONT.character_size.height) as i32;
            draw_text(target, &format!(":{:02}", current.2), BOLD_FONT, Point::new(x, y));
        }

        self.last = Some(current);
        true
    }
}

/// One departure row: time, destination, optional fast marker, status.
pub struct DepartureWidget {
    width: u32,
    bold: bool,
    /// `None` until first drawn; `Some(None)` once an empty row was drawn
    last: Option<Option<Departure>>,
}

impl DepartureWidget {
    pub fn new(width: u32, bold: bool) -> Self {
        Self {
            width,
            bold,
            last: None,
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn render<D>(&mut self, target: &mut D, departure: Option<&Departure>, y: i32) -> bool
    where
        D: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        if let Some(last) = &self.last {
            if last.as_ref() == departure {
                return false;
            }
        }
        self.last = Some(departure.cloned());

        clear_area(
            target,
            Rectangle::new(Point::new(0, y), Size::new(self.width, ROW_SPACING)),
        );
        let Some(departure) = departure else {
            return true;
        };

        let font = if self.bold { BOLD_FONT } else { DEFAULT_FONT };
        draw_text(target, &format_hhmm(departure.scheduled), font, Point::new(0, y));

        let status = status_text(departure);
        let status_x = self.width.saturating_sub(text_width(DEFAULT_FONT, &status));
        draw_text(target, &status, DEFAULT_FONT, Point::new(status_x as i32, y));

        // Marker column sits left of the widest possible status so it lines up
        let widest_status = text_width(DEFAULT_FONT, "Exp 00:00").max(text_width(DEFAULT_FONT, "Cancelled"));
        let icon_x = self.width.saturating_sub(widest_status + FAST_ICON_WIDTH + 2);
        if departure.fast_train {
            let top = Point::new(icon_x as i32, y + 1);
            let height = DEFAULT_FONT.character_size.height as i32 - 2;
            Triangle::new(
                top,
                top + Point::new(0, height),
                top + Point::new(FAST_ICON_WIDTH as i32 - 1, height / 2),
            )
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(target)
            .ok();
        }

        let destination_x = text_width(font, "00:00") + 2;
        let room = icon_x.saturating_sub(destination_x + 2) / font.character_size.width;
        let destination: String = departure.destination.chars().take(room as usize).collect();
        draw_text(target, &destination, font, Point::new(destination_x as i32, y));
        true
    }
}

/// Full-screen centred message, one or more `\n`-separated lines.
pub struct MessageWidget {
    message: String,
}

impl MessageWidget {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Clear the screen and draw `text`, or the default message when `None`.
    ///
    /// Placement is computed from the default message so that animated variants
    /// ("Connecting", "Connecting.", ...) do not jitter.
    pub fn render<D>(&self, target: &mut D, text: Option<&str>) -> bool
    where
        D: DrawTarget<Color = BinaryColor, Error = Infallible> + OriginDimensions,
    {
        let size = target.size();
        let line_height = DEFAULT_FONT.character_size.height;
        let width = self
            .message
            .lines()
            .map(|line| text_width(DEFAULT_FONT, line))
            .max()
            .unwrap_or(0);
        let height = line_height * self.message.lines().count() as u32;
        let x = (size.width.saturating_sub(width) / 2) as i32;
        let y = (size.height.saturating_sub(height) / 2) as i32;

        target.clear(BinaryColor::Off).ok();
        for (i, line) in text.unwrap_or(&self.message).lines().enumerate() {
            draw_text(
                target,
                line,
                DEFAULT_FONT,
                Point::new(x, y + (i as u32 * line_height) as i32),
            );
        }
        true
    }
}

/// "Welcome to <station>" shown when there are no departures.
pub struct OutOfHoursWidget {
    last: Option<String>,
}

impl OutOfHoursWidget {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Draw centred horizontally in `area`, top aligned.
    pub fn render<D>(&mut self, target: &mut D, station: &str, area: Rectangle) -> bool
    where
        D: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        if self.last.as_deref() == Some(station) {
            return false;
        }

        clear_area(target, area);
        let centred = |text: &str| {
            area.top_left.x + (area.size.width.saturating_sub(text_width(BOLD_FONT, text)) / 2) as i32
        };
        draw_text(
            target,
            WELCOME_TO,
            BOLD_FONT,
            Point::new(centred(WELCOME_TO), area.top_left.y),
        );
        draw_text(
            target,
            station,
            BOLD_FONT,
            Point::new(
                centred(station),
                area.top_left.y + BOLD_FONT.character_size.height as i32,
            ),
        );

        self.last = Some(station.to_string());
        true
    }
}

impl Default for OutOfHoursWidget {
    fn default() -> Self {
        Self::new()
    }
}

/// The normal screen: as many departure rows as fit above a centred clock.
pub struct MainWidget {
    size: Size,
    clock: ClockWidget,
    rows: Vec<DepartureWidget>,
    out_of_hours: OutOfHoursWidget,
    departures: Option<usize>,
}

impl MainWidget {
    pub fn new(size: Size, render_seconds: bool) -> Self {
        let clock = ClockWidget::new(render_seconds);
        let rows = size.height.saturating_sub(clock.size().height) / ROW_SPACING;
        Self {
            size,
            clock,
            rows: (0..rows).map(|i| DepartureWidget::new(size.width, i == 0)).collect(),
            out_of_hours: OutOfHoursWidget::new(),
            departures: None,
        }
    }

    /// Departure rows that fit on screen.
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Forget what is on screen so the next render redraws everything.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.out_of_hours.reset();
        self.rows.iter_mut().for_each(DepartureWidget::reset);
        self.departures = None;
    }

    /// Draw `station` and the clock. Returns whether anything changed.
    pub fn render<D>(&mut self, target: &mut D, station: &Station, now: NaiveDateTime) -> bool
    where
        D: DrawTarget<Color = BinaryColor, Error = Infallible>,
    {
        let clock_size = self.clock.size();
        let upper = Rectangle::new(
            Point::zero(),
            Size::new(self.size.width, self.size.height.saturating_sub(clock_size.height)),
        );

        let count = station.departures.len();
        let mut changed = self.departures != Some(count);
        if changed {
            clear_area(target, upper);
            self.out_of_hours.reset();
            self.rows.iter_mut().for_each(DepartureWidget::reset);
            self.departures = Some(count);
        }

        if count > 0 {
            for (i, row) in self.rows.iter_mut().enumerate() {
                let y = (i as u32 * ROW_SPACING) as i32;
                changed |= row.render(target, station.departures.get(i), y);
            }
        } else {
            changed |= self.out_of_hours.render(target, &station.name, upper);
        }

        let clock_at = Point::new(
            (self.size.width.saturating_sub(clock_size.width) / 2) as i32,
            self.size.height.saturating_sub(clock_size.height) as i32,
        );
        changed |= self.clock.render(target, now, clock_at);
        changed
    }
}
