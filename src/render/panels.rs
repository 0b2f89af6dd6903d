//! Text and system-stats panels
//!
//! Drawn with embedded-graphics onto an RGB canvas at panel resolution and
//! then passed through the same normalization as uploads, so e-paper gets a
//! dithered two-level frame and HDMI gets RGB.

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_10X20, FONT_9X15},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};
use image::{DynamicImage, Rgb, RgbImage};
use std::convert::Infallible;

use super::bitmap::{Bitmap, ColorMode, PanelSize};
use super::transform::normalize;
use crate::sysinfo::SystemSnapshot;

const MARGIN: i32 = 40;
const TITLE_FONT: &MonoFont<'static> = &FONT_10X20;
const BODY_FONT: &MonoFont<'static> = &FONT_9X15;

/// Colors per color model. E-paper reads best dark-on-white,
/// the HDMI dashboard uses the dark theme.
struct Palette {
    background: Rgb888,
    foreground: Rgb888,
    accent: Rgb888,
    track: Rgb888,
}

impl Palette {
    fn for_mode(mode: ColorMode) -> Self {
        match mode {
            ColorMode::Mono => Palette {
                background: Rgb888::WHITE,
                foreground: Rgb888::BLACK,
                accent: Rgb888::BLACK,
                track: Rgb888::new(200, 200, 200),
            },
            ColorMode::Rgb => Palette {
                background: Rgb888::new(18, 20, 24),
                foreground: Rgb888::new(255, 255, 255),
                accent: Rgb888::new(64, 196, 128),
                track: Rgb888::new(48, 52, 60),
            },
        }
    }
}

/// embedded-graphics draw target over an `RgbImage`
struct Canvas {
    image: RgbImage,
}

impl Canvas {
    fn new(size: PanelSize, background: Rgb888) -> Self {
        let bg = Rgb([background.r(), background.g(), background.b()]);
        Canvas { image: RgbImage::from_pixel(size.width, size.height, bg) }
    }
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = (self.image.width() as i32, self.image.height() as i32);
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.x < width && point.y >= 0 && point.y < height {
                self.image.put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }
        Ok(())
    }
}

/// Greedy word wrap on character count. Words longer than a line are split.
pub(crate) fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let needed = if line.is_empty() { word.len() } else { line.chars().count() + 1 + word.len() };
            if needed > max_chars {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.extend(word);
        }
        lines.push(line);
    }

    lines
}

fn draw_title(canvas: &mut Canvas, title: &str, palette: &Palette) -> Result<i32, Infallible> {
    let style = MonoTextStyle::new(TITLE_FONT, palette.foreground);
    Text::with_baseline(title, Point::new(MARGIN, MARGIN), style, Baseline::Top).draw(canvas)?;

    let rule_y = MARGIN + TITLE_FONT.character_size.height as i32 + 8;
    let width = canvas.image.width().saturating_sub(2 * MARGIN as u32);
    Rectangle::new(Point::new(MARGIN, rule_y), Size::new(width, 2))
        .into_styled(PrimitiveStyle::with_fill(palette.accent))
        .draw(canvas)?;

    Ok(rule_y + 20)
}

fn draw_text(canvas: &mut Canvas, title: &str, body: &str, palette: &Palette) -> Result<(), Infallible> {
    let mut y = draw_title(canvas, title, palette)?;

    let style = MonoTextStyle::new(BODY_FONT, palette.foreground);
    let line_height = BODY_FONT.character_size.height as i32 + 6;
    let usable = canvas.image.width().saturating_sub(2 * MARGIN as u32);
    let max_chars = (usable / BODY_FONT.character_size.width) as usize;
    let bottom = canvas.image.height() as i32 - MARGIN;

    for line in wrap_text(body, max_chars) {
        if y + line_height > bottom {
            break;
        }
        Text::with_baseline(&line, Point::new(MARGIN, y), style, Baseline::Top).draw(canvas)?;
        y += line_height;
    }

    Ok(())
}

fn draw_bar(canvas: &mut Canvas, origin: Point, width: u32, pct: f32, palette: &Palette) -> Result<(), Infallible> {
    Rectangle::new(origin, Size::new(width, 10))
        .into_styled(PrimitiveStyle::with_fill(palette.track))
        .draw(canvas)?;

    let filled = (width as f32 * pct.clamp(0.0, 100.0) / 100.0).round() as u32;
    if filled > 0 {
        Rectangle::new(origin, Size::new(filled, 10))
            .into_styled(PrimitiveStyle::with_fill(palette.accent))
            .draw(canvas)?;
    }
    Ok(())
}

fn draw_stats(canvas: &mut Canvas, snapshot: &SystemSnapshot, palette: &Palette) -> Result<(), Infallible> {
    let title = format!("STATS | {}", snapshot.now.format("%H:%M"));
    let mut y = draw_title(canvas, &title, palette)?;

    let style = MonoTextStyle::new(BODY_FONT, palette.foreground);
    let bar_width = canvas.image.width().saturating_sub(2 * MARGIN as u32).min(400);

    let gauges = [
        ("CPU", snapshot.cpu_pct),
        ("RAM", snapshot.ram_pct),
        ("DISK", snapshot.disk_pct),
    ];
    for (label, pct) in gauges {
        let text = format!("{label:<5}{pct:>5.1}%");
        Text::with_baseline(&text, Point::new(MARGIN, y), style, Baseline::Top).draw(canvas)?;
        y += BODY_FONT.character_size.height as i32 + 4;
        draw_bar(canvas, Point::new(MARGIN, y), bar_width, pct, palette)?;
        y += 24;
    }

    let temp = match snapshot.temperature_c {
        Some(t) => format!("TEMP {t:.1}C"),
        None => "TEMP --".to_string(),
    };
    let ip = match snapshot.ip {
        Some(ip) => format!("IP   {ip}"),
        None => "IP   --".to_string(),
    };
    for line in [temp, ip] {
        Text::with_baseline(&line, Point::new(MARGIN, y), style, Baseline::Top).draw(canvas)?;
        y += BODY_FONT.character_size.height as i32 + 6;
    }

    Ok(())
}

fn finish(canvas: Canvas, size: PanelSize, mode: ColorMode) -> Bitmap {
    normalize(DynamicImage::ImageRgb8(canvas.image), size, mode)
}

/// Title and wrapped body text, e.g. for notices pushed from the request layer
pub fn render_text_panel(title: &str, body: &str, size: PanelSize, mode: ColorMode) -> Bitmap {
    let palette = Palette::for_mode(mode);
    let mut canvas = Canvas::new(size, palette.background);
    match draw_text(&mut canvas, title, body, &palette) {
        Ok(()) => {}
        Err(never) => match never {},
    }
    finish(canvas, size, mode)
}

/// Dashboard with CPU, RAM and disk gauges, temperature and address
pub fn render_stats_panel(snapshot: &SystemSnapshot, size: PanelSize, mode: ColorMode) -> Bitmap {
    let palette = Palette::for_mode(mode);
    let mut canvas = Canvas::new(size, palette.background);
    match draw_stats(&mut canvas, snapshot, &palette) {
        Ok(()) => {}
        Err(never) => match never {},
    }
    finish(canvas, size, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use std::net::{IpAddr, Ipv4Addr};

    fn snapshot() -> SystemSnapshot {
        SystemSnapshot {
            cpu_pct: 42.0,
            ram_pct: 63.5,
            disk_pct: 12.25,
            temperature_c: Some(48.3),
            ip: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 194))),
            now: Local::now(),
        }
    }

    #[test]
    fn test_wrap_text() {
        assert_eq!(wrap_text("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
        assert!(wrap_text("", 10).is_empty());
    }

    #[test]
    fn test_text_panel_mono() {
        let size = PanelSize::new(800, 480);
        let bitmap = render_text_panel("Hello", "The frame is online.", size, ColorMode::Mono);

        assert_eq!(bitmap.size(), size);
        assert!(bitmap.as_bytes().iter().all(|&p| p == 0 || p == 255));
        // white background with some black ink
        let black = bitmap.as_bytes().iter().filter(|&&p| p == 0).count();
        assert!(black > 0 && black < bitmap.as_bytes().len() / 2);
    }

    #[test]
    fn test_text_panel_differs_by_content() {
        let size = PanelSize::new(400, 240);
        let a = render_text_panel("A", "first", size, ColorMode::Rgb);
        let b = render_text_panel("A", "second", size, ColorMode::Rgb);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_stats_panel_rgb() {
        let size = PanelSize::new(1024, 600);
        let bitmap = render_stats_panel(&snapshot(), size, ColorMode::Rgb);

        assert_eq!(bitmap.size(), size);
        match bitmap {
            Bitmap::Rgb(img) => {
                assert_eq!(img.get_pixel(1020, 596), &Rgb([18, 20, 24]));
            }
            Bitmap::Mono(_) => panic!("expected rgb"),
        }
    }

    #[test]
    fn test_stats_panel_without_sensors() {
        let mut snap = snapshot();
        snap.temperature_c = None;
        snap.ip = None;
        let bitmap = render_stats_panel(&snap, PanelSize::new(800, 480), ColorMode::Mono);
        assert_eq!(bitmap.size(), PanelSize::new(800, 480));
    }
}
