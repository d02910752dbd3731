use std::collections::HashMap;

/// A parsed email message, the unit of exchange between the MIME parser,
/// the SMTP session and the delivery providers.
#[derive(Debug, Clone, Default)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
    /// Every header observed in the input, keyed by canonical name,
    /// values in occurrence order.
    pub raw_headers: HashMap<String, Vec<String>>,
    pub message_id: String,
}

impl Email {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

/// A file attached to an email message. `content` holds the raw bytes,
/// already decoded from the transfer encoding.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_default() {
        let email = Email::default();
        assert!(email.from.is_empty());
        assert!(email.to.is_empty());
        assert!(!email.has_attachments());
    }

    #[test]
    fn test_has_attachments() {
        let mut email = Email::default();
        email.attachments.push(Attachment {
            filename: "file.txt".to_string(),
            content_type: "text/plain".to_string(),
            content: b"hello".to_vec(),
        });
        assert!(email.has_attachments());
    }
}
