use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Routing map key consulted when a recipient has no entry of its own.
pub const DEFAULT_ROUTING_KEY: &str = "default";

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum InspectError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("query error: {0}")]
    Query(String),
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct StatusInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub color: &'static str,
}

static STATUS_REGISTRY: [StatusInfo; 4] = [
    StatusInfo { code: "queued", name: "Queued", icon: "fa-clock-o", color: "blue" },
    StatusInfo { code: "sent", name: "Sent", icon: "fa-envelope", color: "green" },
    StatusInfo { code: "fail", name: "Delivery Failed", icon: "fa-warning", color: "red" },
    StatusInfo { code: "void", name: "Voided", icon: "fa-trash", color: "black" },
];

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(from = "String", into = "String")]
pub enum MailStatus {
    Queued,
    Sent,
    Failed,
    Voided,
    Unknown(String),
}

impl MailStatus {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "fail",
            Self::Voided => "void",
            Self::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "queued" => Self::Queued,
            "sent" => Self::Sent,
            "fail" => Self::Failed,
            "void" => Self::Voided,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn info(&self) -> Option<&'static StatusInfo> {
        if matches!(self, Self::Unknown(_)) {
            return None;
        }
        STATUS_REGISTRY.iter().find(|info| info.code == self.as_str())
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.info().map_or_else(
            || format!("Unknown (\"{}\")", self.as_str()),
            |info| info.name.to_string(),
        )
    }

    #[must_use]
    pub fn icon(&self) -> &'static str {
        self.info().map_or("fa-question-circle", |info| info.icon)
    }

    #[must_use]
    pub fn color(&self) -> &'static str {
        self.info().map_or("yellow", |info| info.color)
    }
}

impl From<String> for MailStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<MailStatus> for String {
    fn from(value: MailStatus) -> Self {
        value.as_str().to_string()
    }
}

impl Display for MailStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct ReasonInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub delivers: bool,
}

static REASON_REGISTRY: [ReasonInfo; 17] = [
    ReasonInfo {
        code: "none",
        name: "None",
        description: "No special rules affected this mail.",
        delivers: true,
    },
    ReasonInfo {
        code: "unloadable",
        name: "Unloadable",
        description: "Unable to load this target. It may not exist, or may not be a valid mail \
                      target.",
        delivers: false,
    },
    ReasonInfo {
        code: "unmailable",
        name: "Unmailable",
        description: "This recipient has been marked as unmailable, usually because mail sent \
                      to it bounced.",
        delivers: false,
    },
    ReasonInfo {
        code: "noaddress",
        name: "No Address",
        description: "Unable to find an email address for this recipient.",
        delivers: false,
    },
    ReasonInfo {
        code: "disabled",
        name: "Disabled",
        description: "This user account is disabled. Disabled accounts do not receive mail.",
        delivers: false,
    },
    ReasonInfo {
        code: "maildisabled",
        name: "Mail Disabled",
        description: "This user has disabled all outbound mail in their settings.",
        delivers: false,
    },
    ReasonInfo {
        code: "exernaltype",
        name: "External Type",
        description: "Only external accounts can receive this kind of mail.",
        delivers: false,
    },
    ReasonInfo {
        code: "response",
        name: "Response",
        description: "This message is a response to mail this recipient sent, so they already \
                      have a copy of the original.",
        delivers: false,
    },
    ReasonInfo {
        code: "self",
        name: "Self Mail",
        description: "This recipient performed the action and prefers not to receive mail \
                      about their own actions.",
        delivers: false,
    },
    ReasonInfo {
        code: "mailtags",
        name: "Mailtags",
        description: "This recipient has disabled mail for this kind of update in their \
                      notification preferences.",
        delivers: false,
    },
    ReasonInfo {
        code: "bot",
        name: "Bot",
        description: "This recipient is a bot account and does not receive mail.",
        delivers: false,
    },
    ReasonInfo {
        code: "force",
        name: "Forced Mail",
        description: "Delivery to this recipient was forced, overriding most delivery rules.",
        delivers: true,
    },
    ReasonInfo {
        code: "force-herald",
        name: "Forced by Herald",
        description: "A rule that forces delivery added this recipient, overriding most \
                      delivery rules.",
        delivers: true,
    },
    ReasonInfo {
        code: "route-as-notification",
        name: "Route as Notification",
        description: "A routing rule chose to deliver this message as a notification instead \
                      of mail.",
        delivers: false,
    },
    ReasonInfo {
        code: "route-as-mail",
        name: "Route as Mail",
        description: "A routing rule chose to deliver this message as mail.",
        delivers: true,
    },
    ReasonInfo {
        code: "unverified",
        name: "Address Not Verified",
        description: "This recipient does not have a verified primary email address.",
        delivers: false,
    },
    ReasonInfo {
        code: "muted",
        name: "Muted",
        description: "This recipient has muted notifications about the object this message \
                      concerns.",
        delivers: false,
    },
];

/// Why a recipient did or did not get mail. Recorded lists run weakest to strongest.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ReasonCode {
    None,
    Unloadable,
    Unmailable,
    NoAddress,
    Disabled,
    MailDisabled,
    ExternalType,
    Response,
    SelfMail,
    Mailtags,
    Bot,
    Force,
    ForceHerald,
    RouteAsNotification,
    RouteAsMail,
    Unverified,
    Muted,
    Unknown(String),
}

impl ReasonCode {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Unloadable => "unloadable",
            Self::Unmailable => "unmailable",
            Self::NoAddress => "noaddress",
            Self::Disabled => "disabled",
            Self::MailDisabled => "maildisabled",
            Self::ExternalType => "exernaltype",
            Self::Response => "response",
            Self::SelfMail => "self",
            Self::Mailtags => "mailtags",
            Self::Bot => "bot",
            Self::Force => "force",
            Self::ForceHerald => "force-herald",
            Self::RouteAsNotification => "route-as-notification",
            Self::RouteAsMail => "route-as-mail",
            Self::Unverified => "unverified",
            Self::Muted => "muted",
            Self::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "none" => Self::None,
            "unloadable" => Self::Unloadable,
            "unmailable" => Self::Unmailable,
            "noaddress" => Self::NoAddress,
            "disabled" => Self::Disabled,
            "maildisabled" => Self::MailDisabled,
            "exernaltype" => Self::ExternalType,
            "response" => Self::Response,
            "self" => Self::SelfMail,
            "mailtags" => Self::Mailtags,
            "bot" => Self::Bot,
            "force" => Self::Force,
            "force-herald" => Self::ForceHerald,
            "route-as-notification" => Self::RouteAsNotification,
            "route-as-mail" => Self::RouteAsMail,
            "unverified" => Self::Unverified,
            "muted" => Self::Muted,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn info(&self) -> Option<&'static ReasonInfo> {
        if matches!(self, Self::Unknown(_)) {
            return None;
        }
        REASON_REGISTRY.iter().find(|info| info.code == self.as_str())
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.info()
            .map_or_else(|| format!("Unknown \"{}\"", self.as_str()), |info| info.name.to_string())
    }

    #[must_use]
    pub fn description(&self) -> String {
        self.info().map_or_else(
            || format!("Unknown delivery reason \"{}\".", self.as_str()),
            |info| info.description.to_string(),
        )
    }

    /// Whether this reason causes delivery rather than suppressing it.
    #[must_use]
    pub fn is_delivery_reason(&self) -> bool {
        self.info().is_some_and(|info| info.delivers)
    }
}

impl From<String> for ReasonCode {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ReasonCode> for String {
    fn from(value: ReasonCode) -> Self {
        value.as_str().to_string()
    }
}

impl Display for ReasonCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct RuleInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub strength: u32,
    pub icon: &'static str,
    pub color: &'static str,
}

static RULE_REGISTRY: [RuleInfo; 2] = [
    RuleInfo {
        code: "route.notification",
        name: "Route as Notification",
        strength: 1,
        icon: "fa-bell",
        color: "grey",
    },
    RuleInfo {
        code: "route.mail",
        name: "Route as Mail",
        strength: 2,
        icon: "fa-envelope",
        color: "grey",
    },
];

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(from = "String", into = "String")]
pub enum RoutingRule {
    RouteAsNotification,
    RouteAsMail,
    Unknown(String),
}

impl RoutingRule {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::RouteAsNotification => "route.notification",
            Self::RouteAsMail => "route.mail",
            Self::Unknown(raw) => raw,
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "route.notification" => Self::RouteAsNotification,
            "route.mail" => Self::RouteAsMail,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub fn info(&self) -> Option<&'static RuleInfo> {
        if matches!(self, Self::Unknown(_)) {
            return None;
        }
        RULE_REGISTRY.iter().find(|info| info.code == self.as_str())
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.info().map_or_else(
            || format!("Unknown Rule \"{}\"", self.as_str()),
            |info| info.name.to_string(),
        )
    }

    /// Precedence used to pick among matching rules. Retired rules rank below all others.
    #[must_use]
    pub fn strength(&self) -> u32 {
        self.info().map_or(0, |info| info.strength)
    }

    #[must_use]
    pub fn icon(&self) -> &'static str {
        self.info().map_or("fa-question-circle", |info| info.icon)
    }

    #[must_use]
    pub fn color(&self) -> &'static str {
        self.info().map_or("yellow", |info| info.color)
    }
}

impl From<String> for RoutingRule {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<RoutingRule> for String {
    fn from(value: RoutingRule) -> Self {
        value.as_str().to_string()
    }
}

impl Display for RoutingRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static lookup tables, exposed for listing.
#[must_use]
pub fn status_registry() -> &'static [StatusInfo] {
    &STATUS_REGISTRY
}

#[must_use]
pub fn reason_registry() -> &'static [ReasonInfo] {
    &REASON_REGISTRY
}

#[must_use]
pub fn rule_registry() -> &'static [RuleInfo] {
    &RULE_REGISTRY
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ActorDelivery {
    pub deliverable: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reasons: Vec<ReasonCode>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Recorded keyed maps that ended up empty are stored as `[]` rather than `{}`.
/// Both decode to an empty map; `null` stays "never recorded".
fn recorded_map<'de, D, T>(deserializer: D) -> Result<Option<BTreeMap<String, T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct RecordedMapVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for RecordedMapVisitor<T>
    where
        T: Deserialize<'de>,
    {
        type Value = Option<BTreeMap<String, T>>;

        fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str("a map keyed by recipient, an empty list, or null")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            if seq.next_element::<IgnoredAny>()?.is_some() {
                return Err(de::Error::invalid_length(1, &self));
            }
            Ok(Some(BTreeMap::new()))
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut map = BTreeMap::new();
            while let Some((key, value)) = access.next_entry::<String, T>()? {
                map.insert(key, value);
            }
            Ok(Some(map))
        }
    }

    deserializer.deserialize_any(RecordedMapVisitor(PhantomData))
}

/// The rule recorded as governing delivery for one routing map key.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct EffectiveRule {
    pub rule: RoutingRule,
    #[serde(rename = "reason", alias = "reason_phid")]
    pub reason_phid: String,
}

/// A rule that matched during routing. `phids: None` means the rule is global.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CandidateRule {
    #[serde(alias = "routingRule")]
    pub routing_rule: RoutingRule,
    #[serde(default)]
    pub phids: Option<Vec<String>>,
    #[serde(alias = "reasonPHID")]
    pub reason_phid: String,
}

impl CandidateRule {
    #[must_use]
    pub fn scope(&self) -> RuleScope {
        if self.phids.is_some() {
            RuleScope::Personal
        } else {
            RuleScope::Global
        }
    }

    #[must_use]
    pub fn applies_to(&self, recipient: &str) -> bool {
        self.phids.as_ref().map_or(true, |phids| phids.iter().any(|phid| phid == recipient))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct MailHeader {
    pub name: String,
    pub value: String,
}

impl From<(String, String)> for MailHeader {
    fn from((name, value): (String, String)) -> Self {
        Self { name, value }
    }
}

impl From<MailHeader> for (String, String) {
    fn from(header: MailHeader) -> Self {
        (header.name, header.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MailRecord {
    pub id: u64,
    pub phid: String,
    pub status: MailStatus,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub date_created: OffsetDateTime,
    #[serde(default, alias = "deliveredHeaders")]
    pub delivered_headers: Option<Vec<MailHeader>>,
    #[serde(default, alias = "deliveredActors", deserialize_with = "recorded_map")]
    pub delivered_actors: Option<BTreeMap<String, ActorDelivery>>,
    #[serde(default, alias = "deliveredRoutingMap", deserialize_with = "recorded_map")]
    pub delivered_routing_map: Option<BTreeMap<String, EffectiveRule>>,
    #[serde(default, alias = "deliveredRoutingRules")]
    pub delivered_routing_rules: Option<Vec<CandidateRule>>,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub actor_phid: Option<String>,
    #[serde(default)]
    pub related_phid: Option<String>,
}

impl MailRecord {
    /// Parse a recorded mail snapshot from JSON.
    ///
    /// # Errors
    /// Returns [`InspectError::Validation`] when the document is not a well-formed snapshot.
    pub fn from_json(input: &str) -> Result<Self, InspectError> {
        serde_json::from_str(input)
            .map_err(|err| InspectError::Validation(format!("malformed mail snapshot: {err}")))
    }

    /// Check identity fields of a recorded snapshot.
    ///
    /// # Errors
    /// Returns [`InspectError::Validation`] when the message phid, a recorded recipient id,
    /// or a candidate rule recipient id is blank.
    pub fn validate(&self) -> Result<(), InspectError> {
        if self.phid.trim().is_empty() {
            return Err(InspectError::Validation("mail phid MUST be provided".to_string()));
        }

        if let Some(actors) = &self.delivered_actors {
            if actors.keys().any(|recipient| recipient.trim().is_empty()) {
                return Err(InspectError::Validation(
                    "delivered actor ids MUST be non-empty".to_string(),
                ));
            }
        }

        for candidate in self.delivered_routing_rules.iter().flatten() {
            let Some(phids) = &candidate.phids else {
                continue;
            };
            if phids.iter().any(|phid| phid.trim().is_empty()) {
                return Err(InspectError::Validation(format!(
                    "routing rule {} lists an empty recipient id",
                    candidate.routing_rule
                )));
            }
        }

        Ok(())
    }

    /// Identifiers in this snapshot that no registry recognizes, in first-seen order.
    #[must_use]
    pub fn unknown_identifiers(&self) -> Vec<String> {
        let mut unknown: Vec<String> = Vec::new();
        let mut note = |value: String| {
            if !unknown.contains(&value) {
                unknown.push(value);
            }
        };

        if let MailStatus::Unknown(raw) = &self.status {
            note(format!("status:{raw}"));
        }
        for actor in self.delivered_actors.iter().flat_map(BTreeMap::values) {
            for reason in &actor.reasons {
                if let ReasonCode::Unknown(raw) = reason {
                    note(format!("reason:{raw}"));
                }
            }
        }
        for effective in self.delivered_routing_map.iter().flat_map(BTreeMap::values) {
            if let RoutingRule::Unknown(raw) = &effective.rule {
                note(format!("rule:{raw}"));
            }
        }
        for candidate in self.delivered_routing_rules.iter().flatten() {
            if let RoutingRule::Unknown(raw) = &candidate.routing_rule {
                note(format!("rule:{raw}"));
            }
        }

        unknown
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Voided,
    NotYetDelivered,
    Unknown,
    NotAddressedToRecipient,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Voided => "voided",
            Self::NotYetDelivered => "not_yet_delivered",
            Self::Unknown => "unknown",
            Self::NotAddressedToRecipient => "not_addressed_to_recipient",
        }
    }

    #[must_use]
    pub fn summary(self) -> &'static str {
        match self {
            Self::Delivered => "Delivered",
            Self::Voided => "Voided",
            Self::NotYetDelivered => {
                "This message has not been delivered yet, so delivery information is not \
                 available."
            }
            Self::Unknown => {
                "This is an older message that predates recording delivery information, so \
                 none is available."
            }
            Self::NotAddressedToRecipient => "This message was not delivered to you.",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ReasonExplanation {
    pub code: ReasonCode,
    pub name: String,
    pub description: String,
    pub is_positive: bool,
}

impl ReasonExplanation {
    fn from_code(code: &ReasonCode) -> Self {
        Self {
            code: code.clone(),
            name: code.name(),
            description: code.description(),
            is_positive: code.is_delivery_reason(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeliveryExplanation {
    pub status: DeliveryStatus,
    pub summary: String,
    /// Weakest to strongest, exactly as recorded.
    pub reasons: Vec<ReasonExplanation>,
}

impl DeliveryExplanation {
    fn without_reasons(status: DeliveryStatus) -> Self {
        Self { status, summary: status.summary().to_string(), reasons: Vec::new() }
    }
}

/// Explain whether and why `mail` reached `recipient`.
#[must_use]
pub fn resolve_delivery(mail: &MailRecord, recipient: &str) -> DeliveryExplanation {
    let Some(actors) = &mail.delivered_actors else {
        return if mail.status == MailStatus::Queued {
            DeliveryExplanation::without_reasons(DeliveryStatus::NotYetDelivered)
        } else {
            DeliveryExplanation::without_reasons(DeliveryStatus::Unknown)
        };
    };

    let Some(actor) = actors.get(recipient) else {
        return DeliveryExplanation::without_reasons(DeliveryStatus::NotAddressedToRecipient);
    };

    let status =
        if actor.deliverable { DeliveryStatus::Delivered } else { DeliveryStatus::Voided };
    let reasons = if actor.reasons.is_empty() {
        vec![ReasonExplanation::from_code(&ReasonCode::None)]
    } else {
        actor.reasons.iter().map(ReasonExplanation::from_code).collect()
    };

    DeliveryExplanation { status, summary: status.summary().to_string(), reasons }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Personal,
}

impl RuleScope {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Global => "Global",
            Self::Personal => "Personal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EffectiveRouting {
    NotComputed,
    PredatesRouting,
    NoRuleApplied,
    Applied {
        rule: RoutingRule,
        reason_phid: String,
        /// Routing map key the rule was found under: the recipient, or `default`.
        matched_key: String,
    },
}

impl EffectiveRouting {
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::NotComputed => {
                "This message has not been sent yet, so routing rules have not been computed."
                    .to_string()
            }
            Self::PredatesRouting => {
                "This is an older message which predates routing rules.".to_string()
            }
            Self::NoRuleApplied => {
                "No routing rules applied when delivering this message to you.".to_string()
            }
            Self::Applied { rule, reason_phid, .. } => match rule {
                RoutingRule::RouteAsNotification => format!(
                    "This message was routed as a notification because it matched {reason_phid}."
                ),
                RoutingRule::RouteAsMail => {
                    format!("This message was routed as an email because it matched {reason_phid}.")
                }
                RoutingRule::Unknown(raw) => format!("Unknown routing rule \"{raw}\"."),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RankedCandidate {
    /// Position of the rule in the recorded candidate list.
    pub source_index: usize,
    pub scope: RuleScope,
    pub kind: String,
    pub rule: RoutingRule,
    pub rule_name: String,
    pub strength: u32,
    pub icon: String,
    pub color: String,
    pub reason_phid: String,
}

impl RankedCandidate {
    fn from_candidate(source_index: usize, candidate: &CandidateRule) -> Self {
        let scope = candidate.scope();
        let rule = &candidate.routing_rule;
        Self {
            source_index,
            scope,
            kind: scope.label().to_string(),
            rule: rule.clone(),
            rule_name: rule.name(),
            strength: rule.strength(),
            icon: rule.icon().to_string(),
            color: rule.color().to_string(),
            reason_phid: candidate.reason_phid.clone(),
        }
    }

    /// Weakest first: global before personal, then ascending strength, then recorded order.
    #[must_use]
    pub fn display_cmp(lhs: &Self, rhs: &Self) -> Ordering {
        lhs.scope
            .cmp(&rhs.scope)
            .then_with(|| lhs.strength.cmp(&rhs.strength))
            .then_with(|| lhs.source_index.cmp(&rhs.source_index))
    }

    /// Strongest first: personal before global, then descending strength, then recorded order.
    #[must_use]
    pub fn precedence_cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.scope
            .cmp(&lhs.scope)
            .then_with(|| rhs.strength.cmp(&lhs.strength))
            .then_with(|| lhs.source_index.cmp(&rhs.source_index))
    }
}

#[must_use]
pub fn candidate_tie_breakers() -> Vec<String> {
    vec![
        "scope_class asc (global before personal)".to_string(),
        "rule_strength asc".to_string(),
        "source_index asc".to_string(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RoutingExplanation {
    pub effective: EffectiveRouting,
    pub summary: String,
    /// Matching rules for this recipient, weakest to strongest.
    pub candidates: Vec<RankedCandidate>,
}

impl RoutingExplanation {
    /// The candidate that outranks every other one, if any matched.
    #[must_use]
    pub fn strongest_candidate(&self) -> Option<&RankedCandidate> {
        self.candidates.iter().min_by(|lhs, rhs| RankedCandidate::precedence_cmp(lhs, rhs))
    }

    #[must_use]
    pub fn strongest_first(&self) -> Vec<&RankedCandidate> {
        let mut ordered = self.candidates.iter().collect::<Vec<_>>();
        ordered.sort_by(|lhs, rhs| RankedCandidate::precedence_cmp(lhs, rhs));
        ordered
    }
}

/// Keep the candidates that apply to `recipient` and order them weakest first.
#[must_use]
pub fn rank_candidates(candidates: &[CandidateRule], recipient: &str) -> Vec<RankedCandidate> {
    let mut ranked = candidates
        .iter()
        .enumerate()
        .filter(|(_, candidate)| candidate.applies_to(recipient))
        .map(|(index, candidate)| RankedCandidate::from_candidate(index, candidate))
        .collect::<Vec<_>>();
    ranked.sort_by(RankedCandidate::display_cmp);
    ranked
}

/// Narrate the routing decision recorded for `recipient` and list every rule that matched.
#[must_use]
pub fn resolve_routing(mail: &MailRecord, recipient: &str) -> RoutingExplanation {
    let Some(map) = &mail.delivered_routing_map else {
        let effective = if mail.status == MailStatus::Queued {
            EffectiveRouting::NotComputed
        } else {
            EffectiveRouting::PredatesRouting
        };
        return RoutingExplanation { summary: effective.summary(), effective, candidates: vec![] };
    };

    let effective = map
        .get(recipient)
        .map(|rule| (recipient, rule))
        .or_else(|| map.get(DEFAULT_ROUTING_KEY).map(|rule| (DEFAULT_ROUTING_KEY, rule)))
        .map_or(EffectiveRouting::NoRuleApplied, |(key, rule)| EffectiveRouting::Applied {
            rule: rule.rule.clone(),
            reason_phid: rule.reason_phid.clone(),
            matched_key: key.to_string(),
        });

    let candidates = mail
        .delivered_routing_rules
        .as_deref()
        .map(|rules| rank_candidates(rules, recipient))
        .unwrap_or_default();

    RoutingExplanation { summary: effective.summary(), effective, candidates }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StatusBadge {
    pub status: MailStatus,
    pub name: String,
    pub icon: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MessageSection {
    /// `None` when the system sent the message on its own behalf.
    pub from: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    pub body: Option<String>,
    pub redacted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HeaderSection {
    pub recorded: bool,
    pub headers: Vec<MailHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MetadataSection {
    pub message_phid: String,
    pub status_details: Option<String>,
    pub actor_phid: Option<String>,
    pub related_phid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MailInspection {
    pub mail_id: u64,
    pub title: String,
    pub status: StatusBadge,
    pub message: MessageSection,
    pub headers: HeaderSection,
    pub delivery: DeliveryExplanation,
    pub routing: RoutingExplanation,
    pub metadata: MetadataSection,
}

fn sorted_headers(mail: &MailRecord) -> HeaderSection {
    let Some(recorded) = &mail.delivered_headers else {
        return HeaderSection { recorded: false, headers: Vec::new() };
    };
    let mut headers = recorded.clone();
    headers.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
    HeaderSection { recorded: true, headers }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty()).cloned()
}

/// Build the full read-side view of one message as seen by `viewer`.
#[must_use]
pub fn inspect_mail(mail: &MailRecord, viewer: &str) -> MailInspection {
    let title =
        if mail.sensitive { "Content Redacted".to_string() } else { mail.subject.clone() };

    MailInspection {
        mail_id: mail.id,
        title,
        status: StatusBadge {
            status: mail.status.clone(),
            name: mail.status.name(),
            icon: mail.status.icon().to_string(),
            color: mail.status.color().to_string(),
        },
        message: MessageSection {
            from: non_blank(mail.from.as_ref()),
            to: mail.to.clone(),
            cc: mail.cc.clone(),
            sent_at: mail.date_created,
            body: (!mail.sensitive).then(|| mail.body.clone()),
            redacted: mail.sensitive,
        },
        headers: sorted_headers(mail),
        delivery: resolve_delivery(mail, viewer),
        routing: resolve_routing(mail, viewer),
        metadata: MetadataSection {
            message_phid: mail.phid.clone(),
            status_details: non_blank(mail.status_message.as_ref()),
            actor_phid: non_blank(mail.actor_phid.as_ref()),
            related_phid: non_blank(mail.related_phid.as_ref()),
        },
    }
}
