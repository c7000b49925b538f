//! Pairing URL → scannable QR image.

use gradelink_proto::PairingUrl;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use qrcode::render::unicode;
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

/// Largest edge length `encode` will allocate.
pub const MAX_WIDTH: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCorrection {
    Low,
    #[default]
    Medium,
    Quartile,
    High,
}

impl ErrorCorrection {
    fn level(self) -> EcLevel {
        match self {
            ErrorCorrection::Low => EcLevel::L,
            ErrorCorrection::Medium => EcLevel::M,
            ErrorCorrection::Quartile => EcLevel::Q,
            ErrorCorrection::High => EcLevel::H,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Edge length of the square output image in pixels.
    pub width: u32,
    /// Quiet zone around the symbol, in modules.
    pub margin: u32,
    pub dark: [u8; 4],
    pub light: [u8; 4],
    pub error_correction: ErrorCorrection,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            width: 300,
            margin: 2,
            dark: [0x00, 0x00, 0x00, 0xff],
            light: [0xff, 0xff, 0xff, 0xff],
            error_correction: ErrorCorrection::Medium,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("pairing url is too long for a QR symbol at this error correction level")]
    PayloadTooLarge,
    #[error("{modules} modules do not fit in a {width}px image")]
    TooDense { modules: u32, width: u32 },
    #[error("invalid encoder options: {0}")]
    InvalidOptions(String),
    #[error("qr encoding failed: {0}")]
    Symbol(String),
    #[error("image encoding failed: {0}")]
    Image(String),
}

/// PNG rendering of a QR symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    png: Vec<u8>,
    width: u32,
    modules: u32,
}

impl EncodedCode {
    pub fn png(&self) -> &[u8] {
        &self.png
    }

    pub fn into_png(self) -> Vec<u8> {
        self.png
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// Symbol size in modules, quiet zone excluded.
    pub fn modules(&self) -> u32 {
        self.modules
    }
}

fn symbol(payload: &str, level: ErrorCorrection) -> Result<QrCode, EncodingError> {
    QrCode::with_error_correction_level(payload.as_bytes(), level.level()).map_err(|err| match err {
        QrError::DataTooLong => EncodingError::PayloadTooLarge,
        other => EncodingError::Symbol(other.to_string()),
    })
}

pub fn encode(payload: &str, options: &EncodeOptions) -> Result<EncodedCode, EncodingError> {
    if options.width == 0 || options.width > MAX_WIDTH {
        return Err(EncodingError::InvalidOptions(format!(
            "width must be between 1 and {MAX_WIDTH} pixels, got {}",
            options.width
        )));
    }
    let code = symbol(payload, options.error_correction)?;
    let modules = code.width() as u32;
    let total = options
        .margin
        .checked_mul(2)
        .and_then(|quiet| quiet.checked_add(modules))
        .ok_or_else(|| {
            EncodingError::InvalidOptions(format!("margin {} is out of range", options.margin))
        })?;
    if total > options.width {
        return Err(EncodingError::TooDense {
            modules: total,
            width: options.width,
        });
    }
    let module_px = options.width / total;
    // Center the symbol; leftover pixels become extra quiet zone.
    let offset = (options.width - module_px * total) / 2 + options.margin * module_px;

    let mut canvas = RgbaImage::from_pixel(options.width, options.width, Rgba(options.light));
    let colors = code.to_colors();
    for (index, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let x = (index as u32 % modules) * module_px + offset;
        let y = (index as u32 / modules) * module_px + offset;
        for dy in 0..module_px {
            for dx in 0..module_px {
                canvas.put_pixel(x + dx, y + dy, Rgba(options.dark));
            }
        }
    }

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|err| EncodingError::Image(err.to_string()))?;
    Ok(EncodedCode {
        png,
        width: options.width,
        modules,
    })
}

/// Half-block rendering for terminals, light modules drawn as spaces.
pub fn render_terminal(payload: &str, level: ErrorCorrection) -> Result<String, EncodingError> {
    let code = symbol(payload, level)?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// What the initiator shows for a pairing: the scannable code, or the URL as
/// text when the code could not be produced.
#[derive(Debug, Clone)]
pub enum PairingDisplay {
    Code {
        image: EncodedCode,
        terminal: String,
    },
    TextFallback {
        url: String,
        reason: EncodingError,
    },
}

impl PairingDisplay {
    pub fn for_url(url: &PairingUrl, options: &EncodeOptions) -> Self {
        let rendered = encode(url.as_str(), options).and_then(|image| {
            let terminal = render_terminal(url.as_str(), options.error_correction)?;
            Ok((image, terminal))
        });
        match rendered {
            Ok((image, terminal)) => PairingDisplay::Code { image, terminal },
            Err(reason) => {
                warn!(
                    target: "gradelink::encoder",
                    session_id = %url.session_id(),
                    error = %reason,
                    "qr encoding failed; falling back to text url"
                );
                PairingDisplay::TextFallback {
                    url: url.as_str().to_string(),
                    reason,
                }
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, PairingDisplay::TextFallback { .. })
    }

    pub fn png(&self) -> Option<&[u8]> {
        match self {
            PairingDisplay::Code { image, .. } => Some(image.png()),
            PairingDisplay::TextFallback { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://app.example.com/mobile-grading/6f1c2a9e-2a51-4a5c-9d1e-0b8f8f1d2c3b?token=Zq8wKc1LmN4pR7sT0vX2yA5bD9eF3gH6";

    #[test]
    fn encoding_is_deterministic_png() {
        let first = encode(URL, &EncodeOptions::default()).unwrap();
        let second = encode(URL, &EncodeOptions::default()).unwrap();
        assert_eq!(first, second);
        assert!(first.png().starts_with(b"\x89PNG\r\n\x1a\n"));
        assert_eq!(first.width(), 300);
    }

    #[test]
    fn output_has_requested_size_and_light_quiet_zone() {
        let options = EncodeOptions::default();
        let encoded = encode(URL, &options).unwrap();
        let decoded = image::load_from_memory(encoded.png()).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (300, 300));
        assert_eq!(decoded.get_pixel(0, 0).0, options.light);

        // Top-left finder pattern starts right after the quiet zone.
        let total = encoded.modules() + options.margin * 2;
        let module_px = options.width / total;
        let offset = (options.width - module_px * total) / 2 + options.margin * module_px;
        assert_eq!(decoded.get_pixel(offset, offset).0, options.dark);
        assert_eq!(decoded.get_pixel(offset - 1, offset - 1).0, options.light);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = "x".repeat(4000);
        let options = EncodeOptions {
            error_correction: ErrorCorrection::High,
            ..EncodeOptions::default()
        };
        assert_eq!(encode(&payload, &options), Err(EncodingError::PayloadTooLarge));
    }

    #[test]
    fn out_of_range_options_are_errors() {
        let huge_margin = EncodeOptions {
            margin: u32::MAX / 2 + 1,
            ..EncodeOptions::default()
        };
        assert!(matches!(
            encode(URL, &huge_margin),
            Err(EncodingError::InvalidOptions(_))
        ));

        let wide_margin = EncodeOptions {
            margin: u32::MAX / 4,
            ..EncodeOptions::default()
        };
        assert!(matches!(
            encode(URL, &wide_margin),
            Err(EncodingError::TooDense { .. })
        ));

        for width in [0, MAX_WIDTH + 1, u32::MAX] {
            let options = EncodeOptions {
                width,
                ..EncodeOptions::default()
            };
            assert!(matches!(
                encode(URL, &options),
                Err(EncodingError::InvalidOptions(_))
            ));
        }
    }

    #[test]
    fn tiny_canvas_is_too_dense() {
        let options = EncodeOptions {
            width: 20,
            ..EncodeOptions::default()
        };
        assert!(matches!(
            encode(URL, &options),
            Err(EncodingError::TooDense { width: 20, .. })
        ));
    }

    #[test]
    fn display_falls_back_to_text() {
        let url = PairingUrl::parse(URL).unwrap();
        let display = PairingDisplay::for_url(
            &url,
            &EncodeOptions {
                width: 10,
                ..EncodeOptions::default()
            },
        );
        assert!(display.is_fallback());
        assert!(display.png().is_none());
        match display {
            PairingDisplay::TextFallback { url: text, .. } => assert_eq!(text, URL),
            PairingDisplay::Code { .. } => unreachable!(),
        }

        let ok = PairingDisplay::for_url(&url, &EncodeOptions::default());
        assert!(!ok.is_fallback());
    }

    #[test]
    fn terminal_rendering_uses_half_blocks() {
        let rendered = render_terminal(URL, ErrorCorrection::Low).unwrap();
        assert!(rendered.lines().count() > 10);
        assert!(rendered.contains('█') || rendered.contains('▀') || rendered.contains('▄'));
    }
}
