//! Header extraction shared by the mailbox clients
//!
//! Turns RFC 5322 header fields into a [`Message`]. Unparsable values are
//! dropped rather than reported, so threading degrades instead of failing.

use chrono::{DateTime, Utc};

use crate::models::{EmailAddress, Message, MessageId};

/// Split the header block of a raw message into unfolded (name, value) pairs
pub fn parse_header_block(raw: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }

        // Continuation line
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    headers
}

/// Parse a `Date` header, accepting the common RFC 2822 variants
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    // Drop trailing comments such as "(UTC)"
    let value = match value.find('(') {
        Some(idx) => value[..idx].trim(),
        None => value,
    };

    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Build a message from header fields
pub fn message_from_headers<'a, I>(headers: I, folder: &str) -> Message
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut builder = Message::builder().folder(folder);

    for (name, value) in headers {
        match name.to_ascii_lowercase().as_str() {
            "message-id" => builder = builder.id(value),
            "subject" => builder = builder.subject(value),
            "from" => builder = builder.from(EmailAddress::parse(value)),
            "to" => builder = builder.to(EmailAddress::parse_list(value)),
            "cc" => builder = builder.cc(EmailAddress::parse_list(value)),
            "date" => builder = builder.maybe_date(parse_date(value)),
            "in-reply-to" => {
                // Some clients put several ids here; the first is the parent
                if let Some(parent) = MessageId::parse_list(value).into_iter().next() {
                    builder = builder.in_reply_to(parent);
                }
            }
            "references" => builder = builder.references(MessageId::parse_list(value)),
            _ => {}
        }
    }

    builder.build()
}

/// Parse a raw message into a [`Message`]
pub fn parse_message(raw: &[u8], folder: &str) -> Message {
    let headers = parse_header_block(raw);
    message_from_headers(
        headers.iter().map(|(n, v)| (n.as_str(), v.as_str())),
        folder,
    )
}
