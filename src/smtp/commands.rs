//! SMTP command line parsing.
//!
//! The verb is uppercased and split from its argument; argument
//! validation stays in the session so syntax problems map to the right
//! reply codes.

/// A parsed SMTP command line. Arguments are carried raw; empty or
/// malformed arguments are rejected by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    /// MAIL with its raw argument (expected `FROM:<address>`).
    Mail(String),
    /// RCPT with its raw argument (expected `TO:<address>`).
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
    Starttls,
    /// AUTH with its raw argument (mechanism plus optional initial
    /// response).
    Auth(String),
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Self {
        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().unwrap_or_default().to_uppercase();
        let arg = parts.next().unwrap_or_default().to_string();

        match verb.as_str() {
            "HELO" => SmtpCommand::Helo(arg),
            "EHLO" => SmtpCommand::Ehlo(arg),
            "MAIL" => SmtpCommand::Mail(arg),
            "RCPT" => SmtpCommand::Rcpt(arg),
            "DATA" => SmtpCommand::Data,
            "RSET" => SmtpCommand::Rset,
            "NOOP" => SmtpCommand::Noop,
            "QUIT" => SmtpCommand::Quit,
            "STARTTLS" => SmtpCommand::Starttls,
            "AUTH" => SmtpCommand::Auth(arg),
            _ => SmtpCommand::Unknown(verb),
        }
    }
}

/// Extract the address from a `MAIL FROM:` argument. Returns None when
/// the keyword is missing or the address is empty.
pub fn parse_mail_argument(arg: &str) -> Option<String> {
    let rest = strip_keyword(arg, "FROM:")?;
    let addr = extract_address(rest);
    if addr.is_empty() {
        None
    } else {
        Some(addr)
    }
}

/// Extract the address from a `RCPT TO:` argument.
pub fn parse_rcpt_argument(arg: &str) -> Option<String> {
    let rest = strip_keyword(arg, "TO:")?;
    let addr = extract_address(rest);
    if addr.is_empty() {
        None
    } else {
        Some(addr)
    }
}

fn strip_keyword<'a>(arg: &'a str, keyword: &str) -> Option<&'a str> {
    if arg.len() >= keyword.len() && arg[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(&arg[keyword.len()..])
    } else {
        None
    }
}

/// Extract an email address from an SMTP parameter, handling both
/// angle-bracket and bare formats. An unclosed bracket yields an empty
/// address.
fn extract_address(s: &str) -> String {
    let s = s.trim();

    if let Some(rest) = s.strip_prefix('<') {
        match rest.find('>') {
            Some(end) => rest[..end].to_string(),
            None => String::new(),
        }
    } else {
        s.to_string()
    }
}
