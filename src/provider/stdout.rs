//! Console delivery backend: prints messages to stdout, always succeeds.

use crate::email::Email;
use crate::error::Result;

pub struct StdoutProvider;

impl StdoutProvider {
    pub fn new() -> Self {
        Self
    }

    /// Print the message to stdout in a readable format. Always succeeds.
    pub fn send(&self, msg: &Email) -> Result<()> {
        print!("{}", render(msg));
        Ok(())
    }
}

impl Default for StdoutProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn render(msg: &Email) -> String {
    let mut out = String::new();

    out.push_str("========================================\n");
    out.push_str(&format!("From: {}\n", msg.from));
    out.push_str(&format!("To: {}\n", msg.to.join(", ")));

    if !msg.cc.is_empty() {
        out.push_str(&format!("Cc: {}\n", msg.cc.join(", ")));
    }

    out.push_str(&format!("Subject: {}\n", msg.subject));
    out.push_str("Body:\n");

    let body = if msg.text_body.is_empty() {
        &msg.html_body
    } else {
        &msg.text_body
    };
    out.push_str(body);
    out.push('\n');

    if !msg.attachments.is_empty() {
        let summaries: Vec<String> = msg
            .attachments
            .iter()
            .map(|att| format!("{} ({})", att.filename, format_size(att.content.len())))
            .collect();
        out.push_str(&format!("Attachments: {}\n", summaries.join(", ")));
    }

    out.push_str("========================================\n");
    out
}

fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::Attachment;

    #[test]
    fn test_render_basic() {
        let msg = Email {
            from: "a@example.com".to_string(),
            to: vec!["b@example.com".to_string()],
            subject: "Hello".to_string(),
            text_body: "Body text".to_string(),
            ..Default::default()
        };

        let out = render(&msg);
        assert!(out.contains("From: a@example.com"));
        assert!(out.contains("To: b@example.com"));
        assert!(out.contains("Subject: Hello"));
        assert!(out.contains("Body text"));
        assert!(!out.contains("Cc:"));
        assert!(!out.contains("Attachments:"));
    }

    #[test]
    fn test_render_html_fallback() {
        let msg = Email {
            html_body: "<p>hi</p>".to_string(),
            ..Default::default()
        };
        assert!(render(&msg).contains("<p>hi</p>"));
    }

    #[test]
    fn test_render_attachments() {
        let msg = Email {
            attachments: vec![Attachment {
                filename: "big.bin".to_string(),
                content_type: "application/octet-stream".to_string(),
                content: vec![0; 2048],
            }],
            ..Default::default()
        };
        assert!(render(&msg).contains("big.bin (2.0 KB)"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_send_always_succeeds() {
        let provider = StdoutProvider::new();
        assert!(provider.send(&Email::default()).is_ok());
    }
}
