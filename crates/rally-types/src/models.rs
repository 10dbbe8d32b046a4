use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of channel a message or request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Event,
    Direct,
}

/// A resolved fan-out target.
///
/// `Direct` holds the counterpart's user id as seen from whoever addressed it:
/// the receiver when sending, the other participant when reading history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelTarget {
    Event(Uuid),
    Direct(Uuid),
}

impl ChannelTarget {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Event(_) => ChannelKind::Event,
            Self::Direct(_) => ChannelKind::Direct,
        }
    }

    pub fn event_id(&self) -> Option<Uuid> {
        match self {
            Self::Event(id) => Some(*id),
            Self::Direct(_) => None,
        }
    }

    pub fn receiver_id(&self) -> Option<Uuid> {
        match self {
            Self::Event(_) => None,
            Self::Direct(id) => Some(*id),
        }
    }
}

/// A persisted chat message. Exactly one of `event_id` / `receiver_id` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub content: String,
    pub sender_id: Uuid,
    /// Denormalized at write time; later renames do not rewrite history.
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Only meaningful for direct messages.
    #[serde(default)]
    pub is_read: bool,
}

impl ChatMessage {
    pub fn new(
        sender_id: Uuid,
        sender_name: impl Into<String>,
        target: ChannelTarget,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            sender_id,
            sender_name: sender_name.into(),
            event_id: target.event_id(),
            receiver_id: target.receiver_id(),
            created_at,
            is_read: false,
        }
    }

    /// The target this message was addressed to, from the sender's side.
    /// `None` only for rows violating the event/receiver exclusivity.
    pub fn target(&self) -> Option<ChannelTarget> {
        match (self.event_id, self.receiver_id) {
            (Some(event_id), None) => Some(ChannelTarget::Event(event_id)),
            (None, Some(receiver_id)) => Some(ChannelTarget::Direct(receiver_id)),
            _ => None,
        }
    }
}

/// A user currently present in an event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Role a user holds with respect to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventRole {
    Organizer,
    CoOrganizer,
    Sponsor,
    /// Holder of a confirmed ticket.
    Attendee,
}

/// Something a role may be allowed to do within an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// The only capability the chat gateway checks.
    JoinChat,
    /// Checked by the REST layer sharing this role table.
    ManageEvent,
    /// Checked by the REST layer sharing this role table.
    ViewSponsorships,
}

impl EventRole {
    pub fn capabilities(self) -> &'static [Capability] {
        match self {
            Self::Organizer | Self::CoOrganizer => &[
                Capability::JoinChat,
                Capability::ManageEvent,
                Capability::ViewSponsorships,
            ],
            Self::Sponsor => &[Capability::ViewSponsorships],
            Self::Attendee => &[Capability::JoinChat],
        }
    }

    pub fn grants(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Organizer => "organizer",
            Self::CoOrganizer => "co_organizer",
            Self::Sponsor => "sponsor",
            Self::Attendee => "attendee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organizer" => Some(Self::Organizer),
            "co_organizer" => Some(Self::CoOrganizer),
            "sponsor" => Some(Self::Sponsor),
            "attendee" => Some(Self::Attendee),
            _ => None,
        }
    }
}
