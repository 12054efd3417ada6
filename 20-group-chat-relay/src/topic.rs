//! The `[topicId] [senderId] body` convention clients layer on top of the relay.
//!
//! The relay never looks inside a frame. Every client receives all traffic and
//! keeps only the frames tagged with its own topic.

use serde::Serialize;

use crate::error::{ClientError, TopicParseError};

/// A chat message addressed to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicMessage {
    pub topic_id: String,
    pub sender_id: String,
    pub body: String,
}

impl TopicMessage {
    /// Splits `raw` into its tags and body.
    ///
    /// The topic ends at the first `]`; the sender is the next bracketed tag
    /// after it, and the trimmed remainder is the body.
    pub fn parse(raw: &str) -> Result<Self, TopicParseError> {
        let rest = raw.strip_prefix('[').ok_or(TopicParseError::MissingTopic)?;
        let (topic_id, rest) = rest.split_once(']').ok_or(TopicParseError::MissingTopic)?;

        let open = rest.find('[').ok_or(TopicParseError::MissingSender)?;
        let (sender_id, body) = rest[open + 1..]
            .split_once(']')
            .ok_or(TopicParseError::MissingSender)?;

        Ok(Self {
            topic_id: topic_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.trim().to_string(),
        })
    }
}

/// Who a client speaks as and which topic it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    topic_id: String,
    sender_id: String,
}

impl ClientIdentity {
    pub fn new(topic_id: impl Into<String>, sender_id: impl Into<String>) -> Result<Self, ClientError> {
        let topic_id = topic_id.into();
        let sender_id = sender_id.into();
        validate_tag("topic id", &topic_id)?;
        validate_tag("sender id", &sender_id)?;
        Ok(Self { topic_id, sender_id })
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

/// Formats `body` as `[topic_id] [sender_id] body`.
pub fn format_message(topic_id: &str, sender_id: &str, body: &str) -> Result<String, ClientError> {
    validate_tag("topic id", topic_id)?;
    validate_tag("sender id", sender_id)?;
    Ok(format!("[{topic_id}] [{sender_id}] {body}"))
}

/// True iff `raw` is tagged with `topic_id`.
pub fn is_for_topic(raw: &str, topic_id: &str) -> bool {
    raw.strip_prefix('[')
        .and_then(|rest| rest.strip_prefix(topic_id))
        .is_some_and(|rest| rest.starts_with(']'))
}

fn validate_tag(field: &'static str, value: &str) -> Result<(), ClientError> {
    if value.is_empty() || value.contains(']') {
        return Err(ClientError::InvalidIdentity {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_tags_and_body() {
        let message = TopicMessage::parse("[INC1] [a@x]   hi there  ").expect("parse");
        assert_eq!(
            message,
            TopicMessage {
                topic_id: "INC1".into(),
                sender_id: "a@x".into(),
                body: "hi there".into(),
            }
        );
    }

    #[test]
    fn body_may_contain_brackets() {
        let message = TopicMessage::parse("[INC1] [a@x] see [photo] #2").expect("parse");
        assert_eq!(message.body, "see [photo] #2");
    }

    #[test]
    fn parse_rejects_untagged_text() {
        assert_eq!(TopicMessage::parse("hello"), Err(TopicParseError::MissingTopic));
        assert_eq!(TopicMessage::parse("[INC1 hello"), Err(TopicParseError::MissingTopic));
        assert_eq!(TopicMessage::parse("[INC1] hello"), Err(TopicParseError::MissingSender));
        assert_eq!(TopicMessage::parse("[INC1] [a@x hello"), Err(TopicParseError::MissingSender));
    }

    #[test]
    fn topic_filter_requires_the_closing_bracket() {
        assert!(is_for_topic("[INC1] [a@x] hi", "INC1"));
        assert!(!is_for_topic("[INC10] [a@x] hi", "INC1"));
        assert!(!is_for_topic("[INC2] [a@x] hi", "INC1"));
        assert!(!is_for_topic("INC1 hi", "INC1"));
    }

    #[test]
    fn format_matches_the_wire_convention() {
        let text = format_message("INC1", "a@x", "hi").expect("format");
        assert_eq!(text, "[INC1] [a@x] hi");
        assert_eq!(TopicMessage::parse(&text).expect("parse").body, "hi");
    }

    #[test]
    fn identity_rejects_closing_brackets() {
        assert!(ClientIdentity::new("INC]1", "a@x").is_err());
        assert!(ClientIdentity::new("INC1", "").is_err());
        assert!(format_message("INC1", "a]x", "hi").is_err());
        assert!(ClientIdentity::new("INC1", "a@x").is_ok());
    }
}
