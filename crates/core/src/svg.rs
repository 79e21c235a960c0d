//! SVG export: converts a painted `RenderCommand` list into a standalone
//! SVG document.

use ratioflame_protocol::{Color, RenderCommand};

const DARK_TEXT: &str = "#1a1a2e";
const LIGHT_TEXT: &str = "#f8f9fa";

/// Render commands as an SVG string with the given viewBox size.
pub fn render_svg(commands: &[RenderCommand], width: f64, height: f64) -> String {
    let mut svg = String::with_capacity(commands.len() * 200);
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {height}" width="{width}" height="{height}" style="font-family:system-ui,-apple-system,sans-serif;font-size:11px">"#,
    ));
    svg.push_str(&format!(
        r##"<rect width="{width}" height="{height}" fill="#ffffff"/>"##,
    ));

    for cmd in commands {
        match cmd {
            RenderCommand::DrawRect {
                rect,
                fill,
                label,
                node_id,
            } => {
                svg.push_str(&format!(
                    r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{fill}" rx="1""#,
                    rect.x, rect.y, rect.w, rect.h,
                ));
                if let Some(id) = node_id {
                    svg.push_str(&format!(r#" data-node="{id}""#));
                }
                svg.push('>');
                if let Some(label) = label {
                    svg.push_str(&format!("<title>{}</title>", escape_xml(label)));
                }
                svg.push_str("</rect>");

                if let Some(label) = label
                    && rect.w > 30.0
                {
                    let max_chars = (rect.w / 7.0) as usize;
                    let text = if label.chars().count() > max_chars && max_chars > 2 {
                        let truncated: String = label.chars().take(max_chars - 1).collect();
                        format!("{truncated}…")
                    } else {
                        label.to_string()
                    };
                    svg.push_str(&format!(
                        r#"<text x="{}" y="{}" fill="{}" style="pointer-events:none">{}</text>"#,
                        rect.x + 3.0,
                        rect.y + rect.h * 0.75,
                        label_color(*fill),
                        escape_xml(&text),
                    ));
                }
            }
            RenderCommand::BeginGroup { id, .. } => {
                svg.push_str(&format!(r#"<g id="{}">"#, escape_xml(id)));
            }
            RenderCommand::EndGroup => svg.push_str("</g>"),
        }
    }

    svg.push_str("</svg>");
    svg
}

/// Dark text on the pale end of the ramp, light text on the dark end.
fn label_color(fill: Color) -> &'static str {
    if fill.luminance() > 0.5 { DARK_TEXT } else { LIGHT_TEXT }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
