//! Default device labels from `User-Agent` strings.

/// Label used when nothing better is known.
pub const DEFAULT_DEVICE_NAME: &str = "Web Browser";

/// Derive a human label for a device from its user agent.
///
/// Edge and Chrome both advertise `Chrome` and `Safari`, so the more
/// specific tokens are tested first.
pub fn device_name(user_agent: Option<&str>) -> &'static str {
    let Some(ua) = user_agent else {
        return DEFAULT_DEVICE_NAME;
    };
    if ua.contains("Mobile") {
        "Mobile App"
    } else if ua.contains("Edg") {
        "Edge Browser"
    } else if ua.contains("Chrome") {
        "Chrome Browser"
    } else if ua.contains("Firefox") {
        "Firefox Browser"
    } else if ua.contains("Safari") {
        "Safari Browser"
    } else {
        DEFAULT_DEVICE_NAME
    }
}
