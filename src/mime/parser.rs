//! RFC 5322 email parsing with MIME multipart support.
//!
//! Handles plain text messages, multipart messages with text/html bodies,
//! and attachments. Per-part failures are logged as warnings and the part
//! is skipped; only an unparseable top-level message, a multipart without
//! a boundary, or a truncated multipart body are hard errors.

use crate::email::{Attachment, Email};
use crate::error::{RelayError, Result};
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use tracing::warn;

/// Maximum nesting depth for multipart messages. Parts nested deeper are
/// skipped with a warning.
const MAX_MULTIPART_DEPTH: usize = 32;

/// Parse a raw RFC 5322 email message into an [`Email`].
pub fn parse(raw: &[u8]) -> Result<Email> {
    let (header_block, body) = split_message(raw);
    let headers = parse_header_block(header_block)?;

    let mut email = Email::default();
    for (name, value) in &headers {
        email
            .raw_headers
            .entry(name.clone())
            .or_default()
            .push(value.clone());
    }

    email.from = header_value(&headers, "From").unwrap_or_default();
    email.subject = header_value(&headers, "Subject").unwrap_or_default();
    email.message_id = header_value(&headers, "Message-Id").unwrap_or_default();
    email.to = parse_address_list(&header_value(&headers, "To").unwrap_or_default());
    email.cc = parse_address_list(&header_value(&headers, "Cc").unwrap_or_default());
    email.bcc = parse_address_list(&header_value(&headers, "Bcc").unwrap_or_default());

    let content_type =
        header_value(&headers, "Content-Type").unwrap_or_else(|| "text/plain".to_string());

    let (media_type, params) = match parse_media_type(&content_type) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(
                content_type = %content_type,
                error = %e,
                "failed to parse content type, treating as plain text"
            );
            email.text_body = String::from_utf8_lossy(body).into_owned();
            return Ok(email);
        }
    };

    if media_type.starts_with("multipart/") {
        let boundary = params.get("boundary").cloned().unwrap_or_default();
        if boundary.is_empty() {
            return Err(RelayError::Parse(
                "multipart message missing boundary".to_string(),
            ));
        }
        parse_multipart(body, &boundary, &mut email, 0)?;
    } else {
        let text = String::from_utf8_lossy(body).into_owned();
        match media_type.as_str() {
            "text/plain" => email.text_body = text,
            "text/html" => email.html_body = text,
            other => {
                warn!(content_type = other, "unrecognized top-level content type");
                email.text_body = text;
            }
        }
    }

    Ok(email)
}

/// Split a message into its header block and body at the first blank line.
/// A message without a blank line is all headers.
fn split_message(raw: &[u8]) -> (&[u8], &[u8]) {
    if let Some(pos) = find_subslice(raw, b"\r\n\r\n") {
        (&raw[..pos], &raw[pos + 4..])
    } else if let Some(pos) = find_subslice(raw, b"\n\n") {
        (&raw[..pos], &raw[pos + 2..])
    } else {
        (raw, &raw[raw.len()..])
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse a header block into (canonical name, value) pairs, preserving
/// order and duplicates. Folded continuation lines are joined with a
/// single space. A non-continuation line without a colon is an error.
fn parse_header_block(block: &[u8]) -> Result<Vec<(String, String)>> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in split_lines(block) {
        if line.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(line);
        if text.starts_with(' ') || text.starts_with('\t') {
            match headers.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(text.trim());
                }
                None => {
                    return Err(RelayError::Parse(
                        "malformed header block: continuation before first header".to_string(),
                    ))
                }
            }
            continue;
        }
        let colon = text.find(':').ok_or_else(|| {
            RelayError::Parse(format!("malformed header line: {:?}", text.trim_end()))
        })?;
        let name = canonical_header_name(text[..colon].trim());
        let value = text[colon + 1..].trim().to_string();
        headers.push((name, value));
    }

    Ok(headers)
}

/// Split a byte buffer into lines, accepting both CRLF and bare LF
/// endings. Line terminators are stripped.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            let mut end = i;
            if end > start && data[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(&data[start..end]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// Canonicalise a header name: each `-`-separated segment gets an upper
/// first letter and lower remainder (`message-ID` -> `Message-Id`).
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// First value of the given canonical header name, if present.
fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

/// Parse an address-list header value into individual addresses.
/// Attempts structured parsing first ("Name <addr>" and bare forms);
/// on failure falls back to a plain comma split.
fn parse_address_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    match parse_structured_addresses(raw) {
        Some(addrs) => addrs,
        None => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    }
}

/// Structured address-list parsing. Returns None when any token does not
/// look like an address, handing control to the comma-split fallback.
fn parse_structured_addresses(raw: &str) -> Option<Vec<String>> {
    let mut result = Vec::new();

    for token in split_addresses(raw) {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if let Some(start) = token.find('<') {
            let rest = &token[start + 1..];
            let end = rest.find('>')?;
            let addr = rest[..end].trim();
            if addr.is_empty() || !addr.contains('@') {
                return None;
            }
            result.push(addr.to_string());
        } else {
            if !token.contains('@') || token.contains(char::is_whitespace) {
                return None;
            }
            result.push(token.to_string());
        }
    }

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Split an address list on top-level commas, ignoring commas inside
/// quoted display names and angle brackets.
fn split_addresses(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(c);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(c);
            }
            ',' if !in_quotes && !in_angle => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    tokens.push(current);
    tokens
}

/// Parse a Content-Type or Content-Disposition value into its lowercased
/// main token and a parameter map. Parameter values lose surrounding
/// quotes; RFC 2231 extended parameters (`name*=charset''percent-encoded`)
/// are decoded and stored under the plain name.
fn parse_media_type(value: &str) -> Result<(String, HashMap<String, String>)> {
    let mut segments = split_parameters(value);
    if segments.is_empty() {
        return Err(RelayError::Parse("empty content type".to_string()));
    }

    let media_type = segments.remove(0).trim().to_ascii_lowercase();
    if media_type.is_empty()
        || !media_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '.' | '+' | '_'))
    {
        return Err(RelayError::Parse(format!(
            "invalid media type: {:?}",
            media_type
        )));
    }

    let mut params = HashMap::new();
    for segment in segments {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some(eq) = segment.find('=') else {
            continue;
        };
        let mut key = segment[..eq].trim().to_ascii_lowercase();
        let mut val = unquote_parameter(segment[eq + 1..].trim());

        if key.ends_with('*') {
            key.pop();
            val = decode_rfc2231(&val);
        }

        // First occurrence wins; a later plain parameter does not
        // override an already-decoded extended one.
        params.entry(key).or_insert(val);
    }

    Ok((media_type, params))
}

/// Split a header value on `;`, respecting quoted parameter values.
fn split_parameters(value: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in value.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn unquote_parameter(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        value.to_string()
    }
}

/// Decode an RFC 2231 extended parameter value: strip the
/// `charset'language'` prefix and percent-decode the remainder.
fn decode_rfc2231(value: &str) -> String {
    let encoded = match value.splitn(3, '\'').collect::<Vec<_>>()[..] {
        [_charset, _lang, rest] => rest,
        _ => value,
    };

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Walk a multipart body, extracting text/html bodies and attachments.
/// Nested multiparts recurse up to [`MAX_MULTIPART_DEPTH`].
fn parse_multipart(body: &[u8], boundary: &str, email: &mut Email, depth: usize) -> Result<()> {
    if depth >= MAX_MULTIPART_DEPTH {
        warn!(depth, "multipart nesting too deep, skipping subtree");
        return Ok(());
    }

    let delimiter = format!("--{}", boundary);
    let terminator = format!("--{}--", boundary);

    let lines = split_lines(body);
    let mut part_lines: Option<Vec<&[u8]>> = None;

    for line in lines {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim_end();

        if trimmed == terminator {
            if let Some(lines) = part_lines.take() {
                process_part(&lines, email, depth);
            }
            return Ok(());
        }
        if trimmed == delimiter {
            if let Some(lines) = part_lines.take() {
                process_part(&lines, email, depth);
            }
            part_lines = Some(Vec::new());
            continue;
        }
        if let Some(current) = part_lines.as_mut() {
            current.push(line);
        }
        // Lines before the first delimiter are preamble and ignored.
    }

    Err(RelayError::Parse(
        "multipart body missing terminating boundary".to_string(),
    ))
}

/// Process one multipart part: parse its headers, decode its body, and
/// route it to the right slot. Failures downgrade to warnings.
fn process_part(lines: &[&[u8]], email: &mut Email, depth: usize) {
    // Split part headers from part body at the first empty line.
    let header_end = lines.iter().position(|l| l.is_empty());
    let (header_lines, body_lines) = match header_end {
        Some(pos) => (&lines[..pos], &lines[pos + 1..]),
        None => (lines, &lines[lines.len()..]),
    };

    let header_block = join_lines(header_lines);
    let headers = match parse_header_block(&header_block) {
        Ok(h) => h,
        Err(e) => {
            warn!(error = %e, "failed to parse part headers, skipping");
            return;
        }
    };

    let content_type =
        header_value(&headers, "Content-Type").unwrap_or_else(|| "text/plain".to_string());
    let (media_type, params) = match parse_media_type(&content_type) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(content_type = %content_type, error = %e, "failed to parse part content type, skipping");
            return;
        }
    };

    let disposition = header_value(&headers, "Content-Disposition").unwrap_or_default();
    let is_attachment = disposition.to_ascii_lowercase().starts_with("attachment");

    if media_type.starts_with("multipart/") {
        let nested_boundary = params.get("boundary").cloned().unwrap_or_default();
        if nested_boundary.is_empty() {
            warn!("nested multipart missing boundary, skipping");
            return;
        }
        let nested_body = join_lines(body_lines);
        if let Err(e) = parse_multipart(&nested_body, &nested_boundary, email, depth + 1) {
            warn!(error = %e, "failed to parse nested multipart");
        }
        return;
    }

    let raw_body = join_lines(body_lines);
    let encoding = header_value(&headers, "Content-Transfer-Encoding").unwrap_or_default();
    let content = match decode_transfer_encoding(&raw_body, &encoding) {
        Ok(content) => content,
        Err(e) => {
            warn!(content_type = %media_type, error = %e, "failed to decode part content, skipping");
            return;
        }
    };

    if is_attachment {
        let filename = resolve_filename(&disposition, &params, &media_type);
        email.attachments.push(Attachment {
            filename,
            content_type: media_type,
            content,
        });
        return;
    }

    match media_type.as_str() {
        "text/plain" => {
            if email.text_body.is_empty() {
                email.text_body = String::from_utf8_lossy(&content).into_owned();
            }
        }
        "text/html" => {
            if email.html_body.is_empty() {
                email.html_body = String::from_utf8_lossy(&content).into_owned();
            }
        }
        _ => {
            // The filename fallback chain always resolves, so unrecognized
            // parts are preserved as attachments rather than dropped.
            let filename = resolve_filename(&disposition, &params, &media_type);
            email.attachments.push(Attachment {
                filename,
                content_type: media_type,
                content,
            });
        }
    }
}

/// Join part lines with CRLF. The CRLF that preceded the next boundary
/// delimiter is not part of the body, which joining without a trailing
/// terminator reproduces.
fn join_lines(lines: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(line);
    }
    out
}

/// Decode a part body according to its Content-Transfer-Encoding.
/// Base64 strips CR/LF then tries padded and unpadded alphabets;
/// quoted-printable is decoded; everything else is returned unchanged.
fn decode_transfer_encoding(raw: &[u8], encoding: &str) -> Result<Vec<u8>> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => {
            let cleaned: Vec<u8> = raw
                .iter()
                .filter(|&&b| b != b'\r' && b != b'\n')
                .copied()
                .collect();
            general_purpose::STANDARD
                .decode(&cleaned)
                .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(&cleaned))
                .map_err(|e| RelayError::Parse(format!("failed to decode base64 content: {}", e)))
        }
        "quoted-printable" => Ok(decode_quoted_printable(raw)),
        _ => Ok(raw.to_vec()),
    }
}

/// Decode quoted-printable content: `=XX` hex escapes and soft line
/// breaks. Invalid escapes are kept verbatim.
fn decode_quoted_printable(content: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(content.len());
    let mut i = 0;

    while i < content.len() {
        let b = content[i];
        if b != b'=' {
            result.push(b);
            i += 1;
            continue;
        }

        // Soft line break: "=\r\n" or "=\n"
        if content.get(i + 1) == Some(&b'\r') && content.get(i + 2) == Some(&b'\n') {
            i += 3;
            continue;
        }
        if content.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }

        let hex = (
            content.get(i + 1).and_then(|c| (*c as char).to_digit(16)),
            content.get(i + 2).and_then(|c| (*c as char).to_digit(16)),
        );
        match hex {
            (Some(hi), Some(lo)) => {
                result.push((hi * 16 + lo) as u8);
                i += 3;
            }
            _ => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

/// Resolve an attachment filename: Content-Disposition `filename`
/// parameter, then Content-Type `name` parameter, then a name synthesised
/// from the media subtype, then the literal `attachment`. The result is
/// never empty.
fn resolve_filename(
    disposition: &str,
    content_type_params: &HashMap<String, String>,
    media_type: &str,
) -> String {
    if let Ok((_, disp_params)) = parse_media_type(disposition) {
        if let Some(filename) = disp_params.get("filename") {
            if !filename.is_empty() {
                return filename.clone();
            }
        }
    }

    if let Some(name) = content_type_params.get("name") {
        if !name.is_empty() {
            return name.clone();
        }
    }

    if let Some((_, subtype)) = media_type.split_once('/') {
        if !subtype.is_empty() {
            return format!("attachment.{}", subtype);
        }
    }

    "attachment".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crlf(lines: &[&str]) -> Vec<u8> {
        lines.join("\r\n").into_bytes()
    }

    #[test]
    fn test_parse_plain_text_email() {
        let raw = crlf(&[
            "From: sender@example.com",
            "To: recipient@example.com",
            "Subject: Test Subject",
            "Message-Id: <test123@example.com>",
            "Content-Type: text/plain",
            "",
            "Hello, this is a plain text email.",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.from, "sender@example.com");
        assert_eq!(msg.to, vec!["recipient@example.com"]);
        assert_eq!(msg.subject, "Test Subject");
        assert_eq!(msg.message_id, "<test123@example.com>");
        assert_eq!(msg.text_body, "Hello, this is a plain text email.");
        assert!(msg.html_body.is_empty());
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn test_parse_multipart_text_and_html() {
        let raw = crlf(&[
            "From: sender@example.com",
            "To: alice@example.com, bob@example.com",
            "Cc: carol@example.com",
            "Subject: Multipart Test",
            "Content-Type: multipart/alternative; boundary=boundary123",
            "",
            "--boundary123",
            "Content-Type: text/plain",
            "",
            "Plain text body",
            "--boundary123",
            "Content-Type: text/html",
            "",
            "<html><body><p>HTML body</p></body></html>",
            "--boundary123--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.to, vec!["alice@example.com", "bob@example.com"]);
        assert_eq!(msg.cc, vec!["carol@example.com"]);
        assert_eq!(msg.text_body, "Plain text body");
        assert_eq!(msg.html_body, "<html><body><p>HTML body</p></body></html>");
    }

    #[test]
    fn test_parse_email_with_attachment() {
        let raw = crlf(&[
            "From: sender@example.com",
            "To: recipient@example.com",
            "Subject: With Attachment",
            "Content-Type: multipart/mixed; boundary=mixedboundary",
            "",
            "--mixedboundary",
            "Content-Type: text/plain",
            "",
            "Email body text",
            "--mixedboundary",
            "Content-Type: application/pdf; name=\"report.pdf\"",
            "Content-Disposition: attachment; filename=\"report.pdf\"",
            "Content-Transfer-Encoding: base64",
            "",
            "SGVsbG8gV29ybGQ=",
            "--mixedboundary--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.text_body, "Email body text");
        assert_eq!(msg.attachments.len(), 1);

        let att = &msg.attachments[0];
        assert_eq!(att.filename, "report.pdf");
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.content, b"Hello World");
    }

    #[test]
    fn test_parse_invalid_message() {
        let raw = b"not a valid email at all\x00\x01\x02";
        assert!(parse(raw).is_err());
    }

    #[test]
    fn test_missing_content_type_defaults_to_plain() {
        let raw = crlf(&[
            "From: sender@example.com",
            "To: recipient@example.com",
            "Subject: No Content Type",
            "",
            "Body without content type header",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.text_body, "Body without content type header");
    }

    #[test]
    fn test_unparseable_content_type_falls_back_to_plain() {
        let raw = crlf(&[
            "From: sender@example.com",
            "Content-Type: totally broken value",
            "",
            "Body text",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.text_body, "Body text");
    }

    #[test]
    fn test_multipart_missing_boundary() {
        let raw = crlf(&[
            "From: sender@example.com",
            "Content-Type: multipart/mixed",
            "",
            "some body",
        ]);

        assert!(parse(&raw).is_err());
    }

    #[test]
    fn test_parse_multiple_recipients_and_bcc() {
        let raw = crlf(&[
            "From: sender@example.com",
            "To: alice@example.com, bob@example.com, carol@example.com",
            "Bcc: secret@example.com",
            "Subject: Multiple Recipients",
            "Content-Type: text/plain",
            "",
            "Hello everyone",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.to.len(), 3);
        assert_eq!(msg.bcc, vec!["secret@example.com"]);
    }

    #[test]
    fn test_missing_address_headers_yield_empty_lists() {
        let raw = crlf(&[
            "From: sender@example.com",
            "Subject: No To",
            "Content-Type: text/plain",
            "",
            "Body",
        ]);

        let msg = parse(&raw).unwrap();
        assert!(msg.to.is_empty());
        assert!(msg.cc.is_empty());
        assert!(msg.bcc.is_empty());
    }

    #[test]
    fn test_raw_headers_preserved() {
        let raw = crlf(&[
            "From: sender@example.com",
            "X-Custom-Header: custom-value",
            "X-Custom-Header: second-value",
            "Subject: Headers Test",
            "Content-Type: text/plain",
            "",
            "Body",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(
            msg.raw_headers.get("X-Custom-Header"),
            Some(&vec!["custom-value".to_string(), "second-value".to_string()])
        );
    }

    #[test]
    fn test_folded_header() {
        let raw = crlf(&[
            "From: sender@example.com",
            "Subject: This is a very long subject",
            " that spans multiple lines",
            "",
            "Body",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(
            msg.subject,
            "This is a very long subject that spans multiple lines"
        );
    }

    #[test]
    fn test_base64_attachment_with_crlf_line_breaks() {
        let raw = crlf(&[
            "From: sender@example.com",
            "To: recipient@example.com",
            "Subject: CRLF Base64",
            "Content-Type: multipart/mixed; boundary=bound",
            "",
            "--bound",
            "Content-Type: text/plain",
            "",
            "body",
            "--bound",
            "Content-Type: application/pdf; name=\"file.pdf\"",
            "Content-Disposition: attachment; filename=\"file.pdf\"",
            "Content-Transfer-Encoding: base64",
            "",
            "SGVs",
            "bG8g",
            "V29y",
            "bGQ=",
            "--bound--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "file.pdf");
        assert_eq!(msg.attachments[0].content, b"Hello World");
    }

    #[test]
    fn test_unpadded_base64_accepted() {
        let raw = crlf(&[
            "Content-Type: multipart/mixed; boundary=bound",
            "",
            "--bound",
            "Content-Type: application/octet-stream",
            "Content-Disposition: attachment; filename=\"x.bin\"",
            "Content-Transfer-Encoding: base64",
            "",
            "SGVsbG8gV29ybGQ",
            "--bound--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.attachments[0].content, b"Hello World");
    }

    #[test]
    fn test_empty_base64_decodes_to_empty() {
        assert_eq!(decode_transfer_encoding(b"", "base64").unwrap(), b"");
    }

    #[test]
    fn test_attachment_without_filename_gets_fallback() {
        let raw = crlf(&[
            "Content-Type: multipart/mixed; boundary=bound",
            "",
            "--bound",
            "Content-Type: text/plain",
            "",
            "body",
            "--bound",
            "Content-Type: application/pdf",
            "Content-Disposition: attachment",
            "Content-Transfer-Encoding: base64",
            "",
            "SGVsbG8gV29ybGQ=",
            "--bound--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "attachment.pdf");
        assert_eq!(msg.attachments[0].content, b"Hello World");
    }

    #[test]
    fn test_nested_multipart() {
        let raw = crlf(&[
            "From: sender@example.com",
            "Subject: Nested Multipart",
            "Content-Type: multipart/mixed; boundary=outer",
            "",
            "--outer",
            "Content-Type: multipart/alternative; boundary=inner",
            "",
            "--inner",
            "Content-Type: text/plain",
            "",
            "Plain text part",
            "--inner",
            "Content-Type: text/html",
            "",
            "<p>HTML part</p>",
            "--inner--",
            "--outer",
            "Content-Type: application/octet-stream; name=\"data.bin\"",
            "Content-Disposition: attachment; filename=\"data.bin\"",
            "",
            "binarydata",
            "--outer--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.text_body, "Plain text part");
        assert_eq!(msg.html_body, "<p>HTML part</p>");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "data.bin");
    }

    #[test]
    fn test_nesting_depth_guard() {
        // Build a message nested beyond the depth limit. Parsing must
        // succeed but the innermost text is never reached.
        let mut inner = String::from("Content-Type: text/plain\r\n\r\ndeep text");
        for i in (0..MAX_MULTIPART_DEPTH + 4).rev() {
            inner = format!(
                "Content-Type: multipart/mixed; boundary=b{i}\r\n\r\n--b{i}\r\n{inner}\r\n--b{i}--"
            );
        }
        let raw = format!("From: a@example.com\r\n{}", inner);

        let msg = parse(raw.as_bytes()).unwrap();
        assert!(msg.text_body.is_empty());
    }

    #[test]
    fn test_first_text_part_wins() {
        let raw = crlf(&[
            "Content-Type: multipart/mixed; boundary=bound",
            "",
            "--bound",
            "Content-Type: text/plain",
            "",
            "first",
            "--bound",
            "Content-Type: text/plain",
            "",
            "second",
            "--bound--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.text_body, "first");
    }

    #[test]
    fn test_quoted_printable_part() {
        let raw = crlf(&[
            "Content-Type: multipart/mixed; boundary=bound",
            "",
            "--bound",
            "Content-Type: text/plain",
            "Content-Transfer-Encoding: quoted-printable",
            "",
            "Hello=20World=21",
            "--bound--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.text_body, "Hello World!");
    }

    #[test]
    fn test_decode_quoted_printable_soft_linebreak() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_decode_quoted_printable_invalid_escape() {
        assert_eq!(decode_quoted_printable(b"100=ZZ"), b"100=ZZ");
    }

    #[test]
    fn test_address_list_display_names() {
        let addrs = parse_address_list("Alice Smith <alice@example.com>, bob@example.com");
        assert_eq!(addrs, vec!["alice@example.com", "bob@example.com"]);
    }

    #[test]
    fn test_address_list_fallback_split() {
        // Unparseable tokens fall back to a plain comma split.
        let addrs = parse_address_list("not an address, also not");
        assert_eq!(addrs, vec!["not an address", "also not"]);
    }

    #[test]
    fn test_canonical_header_name() {
        assert_eq!(canonical_header_name("message-ID"), "Message-Id");
        assert_eq!(canonical_header_name("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_header_name("x-custom-header"), "X-Custom-Header");
    }

    #[test]
    fn test_rfc2231_filename() {
        let raw = crlf(&[
            "Content-Type: multipart/mixed; boundary=bound",
            "",
            "--bound",
            "Content-Type: application/octet-stream",
            "Content-Disposition: attachment; filename*=UTF-8''na%C3%AFve%20plan.txt",
            "",
            "data",
            "--bound--",
        ]);

        let msg = parse(&raw).unwrap();
        assert_eq!(msg.attachments[0].filename, "na\u{ef}ve plan.txt");
    }

    #[test]
    fn test_media_type_quoted_boundary() {
        let (media, params) =
            parse_media_type("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert_eq!(media, "multipart/mixed");
        assert_eq!(params.get("boundary").unwrap(), "----=_Part_123");
    }
}
