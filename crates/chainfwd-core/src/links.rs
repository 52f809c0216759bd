//! Detection of posts whose links the converter bot understands.

/// File-hosting domains (TeraBox and its mirrors) that trigger a relay cycle.
pub const CONVERTIBLE_DOMAINS: &[&str] = &[
    "terabox.com",
    "teraboxapp.com",
    "1024tera.com",
    "nephobox.com",
    "freeterabox.com",
    "terabox.app",
    "teraboxlink.com",
    "mirrobox.com",
    "momerybox.com",
    "teraboxs.com",
    "tibibox.com",
    "4funbox.co",
    "terasharelink.com",
];

/// Whether a post (text, or caption for media posts) mentions a convertible link.
///
/// Text takes precedence over caption when both are present.
pub fn is_convertible(text: Option<&str>, caption: Option<&str>) -> bool {
    let body = match (text, caption) {
        (Some(t), _) if !t.is_empty() => t,
        (_, Some(c)) if !c.is_empty() => c,
        _ => return false,
    };

    let lower = body.to_lowercase();
    CONVERTIBLE_DOMAINS.iter().any(|d| lower.contains(d))
}
