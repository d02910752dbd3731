//! Wire types for the Microsoft Graph sendMail endpoint.

use crate::email::Email;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SendMailRequest {
    pub message: SendMailMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SendMailMessage {
    pub subject: String,
    pub body: MessageBody,
    #[serde(rename = "toRecipients")]
    pub to_recipients: Vec<Recipient>,
    #[serde(
        rename = "ccRecipients",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cc_recipients: Vec<Recipient>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<GraphAttachment>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MessageBody {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Recipient {
    #[serde(rename = "emailAddress")]
    pub email_address: EmailAddress,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EmailAddress {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GraphAttachment {
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    pub name: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "contentBytes")]
    pub content_bytes: String,
}

/// OAuth2 token endpoint response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

/// Graph API error response body.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GraphErrorResponse {
    #[serde(default)]
    pub error: GraphErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GraphErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Convert an [`Email`] into a Graph sendMail request body.
pub(crate) fn build_send_mail_request(msg: &Email) -> SendMailRequest {
    let body = if msg.html_body.is_empty() {
        MessageBody {
            content_type: "text".to_string(),
            content: msg.text_body.clone(),
        }
    } else {
        MessageBody {
            content_type: "html".to_string(),
            content: msg.html_body.clone(),
        }
    };

    let recipient = |addr: &String| Recipient {
        email_address: EmailAddress {
            address: addr.clone(),
        },
    };

    SendMailRequest {
        message: SendMailMessage {
            subject: msg.subject.clone(),
            body,
            to_recipients: msg.to.iter().map(recipient).collect(),
            cc_recipients: msg.cc.iter().map(recipient).collect(),
            attachments: msg
                .attachments
                .iter()
                .map(|att| GraphAttachment {
                    odata_type: "#microsoft.graph.fileAttachment".to_string(),
                    name: att.filename.clone(),
                    content_type: att.content_type.clone(),
                    content_bytes: BASE64.encode(&att.content),
                })
                .collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::Attachment;

    #[test]
    fn test_build_request_basic() {
        let msg = Email {
            from: "sender@example.com".to_string(),
            to: vec!["alice@example.com".to_string(), "bob@example.com".to_string()],
            subject: "Test Subject".to_string(),
            text_body: "Hello, World!".to_string(),
            ..Default::default()
        };

        let req = build_send_mail_request(&msg);
        assert_eq!(req.message.subject, "Test Subject");
        assert_eq!(req.message.body.content_type, "text");
        assert_eq!(req.message.body.content, "Hello, World!");
        assert_eq!(req.message.to_recipients.len(), 2);
        assert_eq!(
            req.message.to_recipients[0].email_address.address,
            "alice@example.com"
        );
        assert!(req.message.cc_recipients.is_empty());
        assert!(req.message.attachments.is_empty());
    }

    #[test]
    fn test_build_request_html_body_wins() {
        let msg = Email {
            to: vec!["user@example.com".to_string()],
            subject: "HTML Email".to_string(),
            text_body: "Plain text".to_string(),
            html_body: "<p>HTML content</p>".to_string(),
            ..Default::default()
        };

        let req = build_send_mail_request(&msg);
        assert_eq!(req.message.body.content_type, "html");
        assert_eq!(req.message.body.content, "<p>HTML content</p>");
    }

    #[test]
    fn test_build_request_attachments() {
        let msg = Email {
            to: vec!["user@example.com".to_string()],
            subject: "With Attachment".to_string(),
            text_body: "See attached".to_string(),
            attachments: vec![Attachment {
                filename: "report.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                content: b"pdf-content".to_vec(),
            }],
            ..Default::default()
        };

        let req = build_send_mail_request(&msg);
        assert_eq!(req.message.attachments.len(), 1);

        let att = &req.message.attachments[0];
        assert_eq!(att.odata_type, "#microsoft.graph.fileAttachment");
        assert_eq!(att.name, "report.pdf");
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.content_bytes, BASE64.encode(b"pdf-content"));
    }

    #[test]
    fn test_empty_collections_omitted_from_json() {
        let msg = Email {
            to: vec!["user@example.com".to_string()],
            subject: "JSON Test".to_string(),
            text_body: "Body".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_string(&build_send_mail_request(&msg)).unwrap();
        assert!(!json.contains("ccRecipients"));
        assert!(!json.contains("attachments"));
        assert!(json.contains("toRecipients"));
    }

    #[test]
    fn test_json_round_trip() {
        let msg = Email {
            to: vec!["user@example.com".to_string()],
            cc: vec!["cc@example.com".to_string()],
            subject: "JSON Test".to_string(),
            text_body: "Body".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_string(&build_send_mail_request(&msg)).unwrap();
        let decoded: SendMailRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.message.subject, "JSON Test");
        assert_eq!(decoded.message.cc_recipients.len(), 1);
    }
}
