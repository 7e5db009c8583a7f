use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Every record delivered by the bus starts with this many bytes of framing
/// prefix, which must be stripped before the JSON envelope can be parsed.
pub const RECORD_PREFIX_LEN: usize = 6;

/// Bus message envelope. `body` is JSON-encoded text, not a nested object,
/// and has to be parsed a second time by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub body: String,
}

impl Envelope {
    /// Wrap a body for publishing. `correlation_id` is the inbound message id
    /// this envelope answers, when there is one; it is carried unchanged and
    /// never invented here.
    pub fn reply<B: Serialize>(
        correlation_id: Option<String>,
        body: &B,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: None,
            correlation_id,
            body: serde_json::to_string(body)?,
        })
    }

    pub fn decode_body<'a, B: Deserialize<'a>>(&'a self) -> Result<B, ParseError> {
        serde_json::from_str(&self.body).map_err(ParseError::Body)
    }
}

/// Extract the envelope from a raw delivery blob: records are separated by
/// blank-line pairs, only the final non-empty record counts, and its fixed
/// prefix is stripped before JSON parsing.
pub fn parse_frame(raw: &str) -> Result<Envelope, ParseError> {
    let last = raw
        .split("\n\n")
        .filter(|record| !record.is_empty())
        .last()
        .ok_or(ParseError::EmptyFrame)?;
    let json = last
        .get(RECORD_PREFIX_LEN..)
        .ok_or(ParseError::TruncatedRecord)?;
    serde_json::from_str(json).map_err(ParseError::Envelope)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ControlCommand {
    Start,
    Stop,
    Other(String),
}

impl From<String> for ControlCommand {
    fn from(value: String) -> Self {
        match value.as_str() {
            "start" => Self::Start,
            "stop" => Self::Stop,
            _ => Self::Other(value),
        }
    }
}

/// What the task manager reports about itself relative to our topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum PeerState {
    Subscribed,
    Running,
    Other(String),
}

impl From<String> for PeerState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "subscribed" => Self::Subscribed,
            "running" => Self::Running,
            _ => Self::Other(value),
        }
    }
}

/// Body of a message on the task-manager control channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlBody {
    pub ability: String,
    #[serde(default)]
    pub command: Option<ControlCommand>,
    #[serde(default)]
    pub resources: Option<Vec<String>>,
    #[serde(default)]
    pub state: Option<PeerState>,
}

/// Body of a message on a UI/user-context event channel.
#[derive(Debug, Clone, Deserialize)]
pub struct UiEventBody {
    pub ability: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// A parsed UI action request: the path names the action, the query carries
/// its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SelectGame,
    GameHome { game: String },
    Instructions { game: String },
    PlayGame { game: String },
    Other(String),
}

impl Action {
    /// Parse a `<path>?<query>` action string with standard URL query rules.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let (name, query) = match raw.split_once('?') {
            Some((name, query)) => (name, query),
            None => (raw, ""),
        };
        let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let game = |key: &'static str| -> Result<String, ParseError> {
            params
                .get(key)
                .cloned()
                .ok_or(ParseError::MissingParam(key))
        };
        Ok(match name {
            "selectgame" => Self::SelectGame,
            "gamehome" => Self::GameHome { game: game("game")? },
            "instructions" => Self::Instructions { game: game("game")? },
            "playgame" => Self::PlayGame { game: game("game")? },
            _ => Self::Other(name.to_string()),
        })
    }
}

/// One choice on an options screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub name: String,
    pub img: String,
    pub action: String,
    pub keywords: Vec<String>,
}

/// Everything the controller tells the UI to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum UiDirective {
    Showoptions {
        targets: Vec<String>,
        heading: String,
        options: Vec<OptionEntry>,
    },
    Showarticle {
        targets: Vec<String>,
        title: String,
        text: String,
        img: String,
        nextaction: String,
    },
    Showexternal {
        targets: Vec<String>,
        name: String,
        url: String,
        arrowkeys: String,
    },
    Sendconfig {
        targets: Vec<String>,
        configs: Vec<String>,
    },
}

/// Reply to the task manager naming the capabilities this app depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesDeclaration {
    pub targets: Vec<String>,
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopNotice {
    pub state: String,
}

impl StopNotice {
    pub fn stopped() -> Self {
        Self {
            state: "stopped".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_camel_case_field_names() {
        let envelope = Envelope {
            message_id: Some("m1".to_string()),
            correlation_id: Some("c1".to_string()),
            body: "{}".to_string(),
        };
        let json = serde_json::to_string(&envelope).expect("serialize");
        assert!(json.contains("\"messageId\":\"m1\""));
        assert!(json.contains("\"correlationId\":\"c1\""));
    }

    #[test]
    fn parse_frame_keeps_only_the_final_record() {
        let raw = "data ={\"body\":\"first\"}\n\ndata ={\"body\":\"last\"}";
        let envelope = parse_frame(raw).expect("frame");
        assert_eq!(envelope.body, "last");
    }

    #[test]
    fn parse_frame_skips_empty_records() {
        let raw = "\n\ndata ={\"body\":\"only\"}\n\n";
        let envelope = parse_frame(raw).expect("frame");
        assert_eq!(envelope.body, "only");
    }

    #[test]
    fn parse_frame_rejects_truncated_records() {
        assert!(matches!(
            parse_frame("data"),
            Err(ParseError::TruncatedRecord)
        ));
    }

    #[test]
    fn action_parse_extracts_query_parameters() {
        assert_eq!(
            Action::parse("gamehome?game=mario").expect("action"),
            Action::GameHome {
                game: "mario".to_string()
            }
        );
        assert_eq!(
            Action::parse("selectgame").expect("action"),
            Action::SelectGame
        );
        assert!(matches!(
            Action::parse("playgame"),
            Err(ParseError::MissingParam("game"))
        ));
        assert_eq!(
            Action::parse("dance?fast=yes").expect("action"),
            Action::Other("dance".to_string())
        );
    }

    #[test]
    fn control_command_keeps_unknown_text() {
        assert_eq!(
            ControlCommand::from("restart".to_string()),
            ControlCommand::Other("restart".to_string())
        );
        assert_eq!(ControlCommand::from("stop".to_string()), ControlCommand::Stop);
    }
}
