//! QR code rendering for session payloads
//!
//! Feature-gated so headless deployments don't pull in the qrcode crate.

use qrcode::render::svg;
use qrcode::QrCode;

use crate::errors::CodecError;
use crate::payload::{self, SessionPayload};

/// Render the join URL for `payload` as an SVG QR code.
pub fn render_join_svg(
    payload: &SessionPayload,
    base_url: &str,
    dimensions: (u32, u32),
) -> Result<String, CodecError> {
    let url = payload::join_url(payload, base_url)?;
    let code = QrCode::new(url.as_bytes())
        .map_err(|e| CodecError::InvalidPayload(format!("QR generation failed: {e}")))?;
    let rendered = code
        .render::<svg::Color>()
        .min_dimensions(dimensions.0, dimensions.1)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#FFFFFF"))
        .build();
    Ok(rendered)
}
