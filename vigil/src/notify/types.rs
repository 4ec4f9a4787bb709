//! Recognized notification backend types.

use serde::{Deserialize, Serialize};

/// A messaging backend the dispatcher knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierType {
    Bark,
    Discord,
    Smtp,
    Gotify,
    GoogleChat,
    Ifttt,
    Join,
    Matrix,
    Mattermost,
    Ntfy,
    OpsGenie,
    PushBullet,
    Pushover,
    RocketChat,
    Slack,
    Teams,
    Telegram,
    Zulip,
    /// Raw passthrough: the endpoint is supplied verbatim.
    Generic,
}

/// Every recognized type, in the order they are documented.
pub const ALL_TYPES: &[NotifierType] = &[
    NotifierType::Bark,
    NotifierType::Discord,
    NotifierType::Smtp,
    NotifierType::Gotify,
    NotifierType::GoogleChat,
    NotifierType::Ifttt,
    NotifierType::Join,
    NotifierType::Matrix,
    NotifierType::Mattermost,
    NotifierType::Ntfy,
    NotifierType::OpsGenie,
    NotifierType::PushBullet,
    NotifierType::Pushover,
    NotifierType::RocketChat,
    NotifierType::Slack,
    NotifierType::Teams,
    NotifierType::Telegram,
    NotifierType::Zulip,
    NotifierType::Generic,
];

impl NotifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bark => "bark",
            Self::Discord => "discord",
            Self::Smtp => "smtp",
            Self::Gotify => "gotify",
            Self::GoogleChat => "googlechat",
            Self::Ifttt => "ifttt",
            Self::Join => "join",
            Self::Matrix => "matrix",
            Self::Mattermost => "mattermost",
            Self::Ntfy => "ntfy",
            Self::OpsGenie => "opsgenie",
            Self::PushBullet => "pushbullet",
            Self::Pushover => "pushover",
            Self::RocketChat => "rocketchat",
            Self::Slack => "slack",
            Self::Teams => "teams",
            Self::Telegram => "telegram",
            Self::Zulip => "zulip",
            Self::Generic => "generic",
        }
    }

    /// Parse a config string. Unknown strings are invalid types.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bark" => Some(Self::Bark),
            "discord" => Some(Self::Discord),
            "smtp" => Some(Self::Smtp),
            "gotify" => Some(Self::Gotify),
            "googlechat" => Some(Self::GoogleChat),
            "ifttt" => Some(Self::Ifttt),
            "join" => Some(Self::Join),
            "matrix" => Some(Self::Matrix),
            "mattermost" => Some(Self::Mattermost),
            "ntfy" => Some(Self::Ntfy),
            "opsgenie" => Some(Self::OpsGenie),
            "pushbullet" => Some(Self::PushBullet),
            "pushover" => Some(Self::Pushover),
            "rocketchat" => Some(Self::RocketChat),
            "slack" => Some(Self::Slack),
            "teams" => Some(Self::Teams),
            "telegram" => Some(Self::Telegram),
            "zulip" => Some(Self::Zulip),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }

    /// URL fields that must be non-empty for this type.
    pub fn required_url_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Bark => &["devicekey", "host"],
            Self::Discord => &["token", "webhookid"],
            Self::Smtp => &["host"],
            Self::Gotify => &["host", "token"],
            Self::GoogleChat => &["raw"],
            Self::Ifttt => &["webhookid"],
            Self::Join => &["apikey"],
            Self::Matrix => &["host", "password"],
            Self::Mattermost => &["host", "token"],
            Self::Ntfy => &[],
            Self::OpsGenie => &["apikey"],
            Self::PushBullet => &["token", "targets"],
            Self::Pushover => &["token", "user"],
            Self::RocketChat => &["host", "tokena", "tokenb", "channel"],
            Self::Slack => &["token", "channel"],
            Self::Teams => &["group", "tenant", "altid", "groupowner"],
            Self::Telegram => &["token"],
            Self::Zulip => &["botmail", "botkey", "host"],
            Self::Generic => &["raw"],
        }
    }

    /// Params that must be non-empty for this type.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::Smtp => &["fromaddress", "toaddresses"],
            Self::Ifttt => &["events"],
            Self::Join => &["devices"],
            Self::Ntfy => &["topic"],
            Self::Teams => &["host"],
            Self::Telegram => &["chats"],
            _ => &[],
        }
    }

    /// Whether a well-formed config should be probed with a pure endpoint
    /// parse at validation time. Matrix is excluded: its sender resolves
    /// rooms against the homeserver at construction, so no pure parse is
    /// available through the boundary.
    pub fn needs_locate_probe(&self) -> bool {
        !matches!(self, Self::Matrix)
    }
}

impl std::fmt::Display for NotifierType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
