use std::fmt;
use std::path::Path;

use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Success,
    Error,
}

/// One line of feedback for the caller, renderable as text or HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

impl StatusMessage {
    pub fn success(model: &str, path: &Path) -> Self {
        Self {
            kind: StatusKind::Success,
            text: format!(
                "Image generated successfully using {model} and saved as {}!",
                path.display()
            ),
        }
    }

    pub fn error(err: &GenerationError) -> Self {
        Self {
            kind: StatusKind::Error,
            text: err.user_message(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == StatusKind::Success
    }

    pub fn to_html(&self) -> String {
        let color = match self.kind {
            StatusKind::Success => "green",
            StatusKind::Error => "red",
        };
        format!(
            "<span style='color: {color};'>{}</span>",
            escape_html(&self.text)
        )
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
