use crate::store::ChainConfig;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub const CANCEL_TEXT: &str = "<b>Process cancelled!</b>";

pub fn setup_complete_html(source_title: &str, converter: &str, target_title: &str) -> String {
    let source = escape_html(source_title);
    let converter = escape_html(converter);
    let target = escape_html(target_title);
    format!(
        "<b>✅ Chain Forward Setup Complete!</b>\n\n\
<b>Source:</b> {source}\n\
<b>Converter:</b> @{converter}\n\
<b>Target:</b> {target}\n\n\
The bot will now automatically:\n\
1. Monitor {source} for new posts\n\
2. Forward posts with links to @{converter}\n\
3. Wait for converted links\n\
4. Post final result to {target}"
    )
}

pub fn chain_status_html(cfg: &ChainConfig, in_flight: usize) -> String {
    let status = if cfg.active {
        "✅ Active"
    } else {
        "❌ Inactive"
    };
    let mut out = format!(
        "<b>🔗 Chain Forward Configuration</b>\n\n\
<b>Status:</b> {status}\n\
<b>Source:</b> {}\n\
<b>Converter:</b> @{}\n\
<b>Target:</b> {}\n",
        escape_html(&cfg.source_title),
        escape_html(&cfg.converter_handle),
        escape_html(&cfg.target_title),
    );
    if in_flight > 0 {
        out.push_str(&format!("<b>Waiting for converter:</b> {in_flight}\n"));
    }
    out.push_str("\nUse /chainoff to disable or /chain to reconfigure.");
    out
}

/// Split plain text into chunks of at most `limit` characters, preferring line breaks.
pub fn split_text_chunks(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();
    let mut chunk_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if chunk_len + line_len > limit && !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
            chunk_len = 0;
        }
        if line_len > limit {
            // A single oversized line: hard-split on char boundaries.
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                out.push(piece.iter().collect());
            }
            continue;
        }
        chunk.push_str(line);
        chunk_len += line_len;
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}
