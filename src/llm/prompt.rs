//! System preamble describing the host platform.

use serde::Serialize;

use super::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub os: &'static str,
    pub family: &'static str,
    pub arch: &'static str,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            family: std::env::consts::FAMILY,
            arch: std::env::consts::ARCH,
        }
    }

    fn display_os(&self) -> &'static str {
        match self.os {
            "macos" => "macOS",
            "windows" => "Windows",
            "linux" => "Linux",
            other => other,
        }
    }
}

/// Build the system message prepended to every stream unless skipped.
#[must_use]
pub fn system_preamble(platform: &Platform, tool_count: usize) -> Message {
    let mut text = format!(
        "You are a helpful assistant running on {} ({}, {}).",
        platform.display_os(),
        platform.family,
        platform.arch
    );
    text.push_str(&format!(
        " Today is {}.",
        chrono::Utc::now().format("%A, %B %-d, %Y")
    ));
    if tool_count > 0 {
        text.push_str(&format!(
            " You can call {tool_count} tools. Prefer a tool over guessing when it can answer directly, \
             and use shell or path syntax that fits this platform."
        ));
    }
    Message::system(text)
}
