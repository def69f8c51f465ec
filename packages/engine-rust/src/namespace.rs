//! Topic codec and message envelope for the MQTT namespace collaborator.
//!
//! The engine itself is agnostic to key format; when composed with an
//! MQTT namespace, keys render as topics of the form
//! `alv1/<verb>/<key-with-dots-as-slashes>` where the verb is `r` (read
//! request), `w` (write/data), or a per-request response code. This
//! module provides only that rendering plus the request/response envelope
//! the engine consumes -- the MQTT client itself is a separate driver.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Namespace protocol prefix.
pub const PREFIX: &str = "alv1";

/// The verb segment of a namespace topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Read request.
    Read,
    /// Write / published data.
    Write,
    /// Response to a read request, addressed by its response code.
    Response(String),
}

impl Verb {
    /// The topic segment for this verb.
    #[must_use]
    pub fn as_segment(&self) -> &str {
        match self {
            Verb::Read => "r",
            Verb::Write => "w",
            Verb::Response(code) => code,
        }
    }
}

/// Renders a namespace key (`plant.line1.temperature`) as a topic
/// (`alv1/w/plant/line1/temperature`).
#[must_use]
pub fn key_to_topic(key: &str, verb: &Verb) -> String {
    format!("{PREFIX}/{}/{}", verb.as_segment(), key.replace('.', "/"))
}

/// Recovers the namespace key from a topic; topics outside the namespace
/// pass through with slashes mapped to dots.
#[must_use]
pub fn topic_to_key(topic: &str) -> String {
    let mut rest = topic;
    if let Some(stripped) = topic.strip_prefix("alv1/") {
        // Drop the verb segment too.
        if let Some((_, tail)) = stripped.split_once('/') {
            rest = tail;
        }
    }
    rest.replace('/', ".")
}

/// Whether a topic is a response to a read request (neither a read nor a
/// write verb, but a response code).
#[must_use]
pub fn is_response_topic(topic: &str) -> bool {
    match topic.strip_prefix("alv1/") {
        Some(rest) => {
            let verb = rest.split('/').next().unwrap_or("");
            !verb.is_empty() && verb != "r" && verb != "w"
        }
        None => false,
    }
}

/// The JSON wrapper around every namespace payload.
///
/// `sender` lets subscribers drop their own echoes: [`Envelope::accept`]
/// returns `None` for messages this client published itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Client id of the publisher.
    pub sender: String,
    /// The wrapped payload.
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wraps a payload for publishing by `sender`.
    #[must_use]
    pub fn new(sender: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            sender: sender.into(),
            data,
        }
    }

    /// Decodes an incoming envelope, dropping the payload when it was
    /// published by `client_id` itself.
    #[must_use]
    pub fn accept(self, client_id: &str) -> Option<serde_json::Value> {
        if self.sender == client_id {
            None
        } else {
            Some(self.data)
        }
    }
}

/// A read request published to a key's `r` topic.
///
/// The requester subscribes to the response-code topic before publishing,
/// then waits for the responder to publish there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadRequest {
    /// Request timestamp, milliseconds since the Unix epoch.
    pub t: i64,
    /// Where the response should go: a fresh random code per request.
    pub response_code: String,
}

impl ReadRequest {
    /// Creates a request stamped now, with a random response code.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::rng();
        Self {
            t: datalink_core::now_millis(),
            response_code: format!("{:09}", rng.random_range(0..1_000_000_000_u32)),
        }
    }

    /// The topic the response for this request will arrive on.
    #[must_use]
    pub fn response_topic(&self, key: &str) -> String {
        key_to_topic(key, &Verb::Response(self.response_code.clone()))
    }
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self::new()
    }
}
