//! Strict schema validation for inbound events.
//!
//! Each `(source, funnelStage)` pair selects exactly one leaf schema. Every
//! object level is strict: unknown keys are an error, as are missing
//! required keys, wrong JSON types and out-of-set enum literals. All issues
//! of an event are collected before it is rejected so that a single log line
//! explains everything wrong with it.

use crate::event::{
    Browser, ClickPosition, Event, EventPayload, FacebookBottomEngagement,
    FacebookBottomEventType, FacebookDevice, FacebookLocation, FacebookReferrer,
    FacebookTopEngagement, FacebookTopEventType, FacebookUser, FunnelStage, Gender, Source,
    TiktokBottomEngagement, TiktokBottomEventType, TiktokDevice, TiktokTopEngagement,
    TiktokTopEventType, TiktokUser, WireEnum,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::fmt;
use thiserror::Error;

const ENVELOPE_FIELDS: &[&str] = &[
    "eventId",
    "timestamp",
    "source",
    "funnelStage",
    "eventType",
    "data",
];
const DATA_FIELDS: &[&str] = &["user", "engagement"];
const FACEBOOK_USER_FIELDS: &[&str] = &["userId", "name", "age", "gender", "location"];
const FACEBOOK_LOCATION_FIELDS: &[&str] = &["country", "city"];
const FACEBOOK_TOP_FIELDS: &[&str] = &["actionTime", "referrer", "videoId"];
const FACEBOOK_BOTTOM_FIELDS: &[&str] = &[
    "adId",
    "campaignId",
    "clickPosition",
    "device",
    "browser",
    "purchaseAmount",
];
const TIKTOK_USER_FIELDS: &[&str] = &["userId", "username", "followers"];
const TIKTOK_TOP_FIELDS: &[&str] = &[
    "watchTime",
    "percentageWatched",
    "device",
    "country",
    "videoId",
];
const TIKTOK_BOTTOM_FIELDS: &[&str] = &["actionTime", "profileId", "purchasedItem", "purchaseAmount"];

/// One problem found in an event, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path to the offending field, empty for the event itself.
    pub path: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ValidationIssue {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.reason)
        } else {
            write!(f, "{}: {}", self.path, self.reason)
        }
    }
}

/// An event that did not match its schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event {} failed validation: {}", .event_id.as_deref().unwrap_or("<unknown>"), join_issues(.issues))]
pub struct ValidationError {
    /// `eventId` of the rejected item, when one could be read.
    pub event_id: Option<String>,
    /// Everything wrong with the item.
    pub issues: Vec<ValidationIssue>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of validating a batch of raw items.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Items that passed, in input order.
    pub valid_events: Vec<Event>,
    /// Number of items that failed.
    pub invalid_count: usize,
}

/// Partitions raw JSON items into typed events and rejects.
///
/// Validation never fails as a whole: each rejected item is logged at warn
/// level with its `eventId` (when present) and the list of issues, then
/// counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventValidator;

impl EventValidator {
    /// Create a validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validate a batch. `valid_events.len() + invalid_count == raw.len()`.
    #[must_use]
    pub fn validate(&self, raw: &[Value]) -> ValidationReport {
        let mut report = ValidationReport {
            valid_events: Vec::with_capacity(raw.len()),
            invalid_count: 0,
        };

        for item in raw {
            match self.validate_one(item) {
                Ok(event) => report.valid_events.push(event),
                Err(error) => {
                    tracing::warn!(
                        event_id = error.event_id.as_deref().unwrap_or("<unknown>"),
                        issues = %join_issues(&error.issues),
                        "Rejected invalid event"
                    );
                    report.invalid_count += 1;
                }
            }
        }

        tracing::debug!(
            valid = report.valid_events.len(),
            invalid = report.invalid_count,
            "Validated event batch"
        );
        report
    }

    /// Validate a single raw item.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] listing every issue found.
    pub fn validate_one(&self, raw: &Value) -> Result<Event, ValidationError> {
        parse_event(raw).map_err(|issues| ValidationError {
            event_id: raw
                .get("eventId")
                .and_then(Value::as_str)
                .map(str::to_string),
            issues,
        })
    }
}

#[derive(Default)]
struct Issues(Vec<ValidationIssue>);

impl Issues {
    fn take<T>(&mut self, result: Result<T, ValidationIssue>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(issue) => {
                self.0.push(issue);
                None
            }
        }
    }

    fn extend(&mut self, issues: impl IntoIterator<Item = ValidationIssue>) {
        self.0.extend(issues);
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expected(what: &str, value: &Value) -> String {
    format!("Expected {what}, received {}", kind(value))
}

fn quoted(literals: &[&str]) -> String {
    literals
        .iter()
        .map(|literal| format!("'{literal}'"))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Read-only view of one JSON object level, tracking its path.
struct ObjectView<'a> {
    path: String,
    map: &'a Map<String, Value>,
}

impl<'a> ObjectView<'a> {
    fn root(value: &'a Value) -> Result<Self, ValidationIssue> {
        match value {
            Value::Object(map) => Ok(Self {
                path: String::new(),
                map,
            }),
            other => Err(ValidationIssue::new("", expected("object", other))),
        }
    }

    fn path_of(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.path)
        }
    }

    fn get(&self, key: &str) -> Result<&'a Value, ValidationIssue> {
        self.map
            .get(key)
            .ok_or_else(|| ValidationIssue::new(self.path_of(key), "Required"))
    }

    fn nested(&self, key: &str) -> Result<ObjectView<'a>, ValidationIssue> {
        match self.get(key)? {
            Value::Object(map) => Ok(ObjectView {
                path: self.path_of(key),
                map,
            }),
            other => Err(ValidationIssue::new(self.path_of(key), expected("object", other))),
        }
    }

    /// Issues for keys outside `known`, reported together.
    fn strict(&self, known: &[&str]) -> Option<ValidationIssue> {
        let unknown: Vec<String> = self
            .map
            .keys()
            .filter(|key| !known.contains(&key.as_str()))
            .map(|key| format!("'{key}'"))
            .collect();
        if unknown.is_empty() {
            None
        } else {
            Some(ValidationIssue::new(
                self.path.clone(),
                format!("Unrecognized key(s) in object: {}", unknown.join(", ")),
            ))
        }
    }

    fn string(&self, key: &str) -> Result<String, ValidationIssue> {
        match self.get(key)? {
            Value::String(value) => Ok(value.clone()),
            other => Err(ValidationIssue::new(self.path_of(key), expected("string", other))),
        }
    }

    fn non_empty_string(&self, key: &str) -> Result<String, ValidationIssue> {
        let value = self.string(key)?;
        if value.is_empty() {
            return Err(ValidationIssue::new(
                self.path_of(key),
                "String must contain at least 1 character(s)",
            ));
        }
        Ok(value)
    }

    /// A key that must be present but may hold `null`.
    fn nullable_string(&self, key: &str) -> Result<Option<String>, ValidationIssue> {
        match self.get(key)? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value.clone())),
            other => Err(ValidationIssue::new(self.path_of(key), expected("string", other))),
        }
    }

    fn number(&self, key: &str) -> Result<&'a Number, ValidationIssue> {
        match self.get(key)? {
            Value::Number(number) => Ok(number),
            other => Err(ValidationIssue::new(self.path_of(key), expected("number", other))),
        }
    }

    /// A number within `min..=max`, kept exactly as received.
    fn number_in(&self, key: &str, min: f64, max: f64) -> Result<Number, ValidationIssue> {
        let number = self.number(key)?;
        let value = number.as_f64().unwrap_or(f64::NAN);
        if value < min {
            return Err(ValidationIssue::new(
                self.path_of(key),
                format!("Number must be greater than or equal to {min}"),
            ));
        }
        if value > max {
            return Err(ValidationIssue::new(
                self.path_of(key),
                format!("Number must be less than or equal to {max}"),
            ));
        }
        Ok(number.clone())
    }

    /// A non-negative whole number. `28.0` counts as whole.
    #[allow(clippy::float_cmp)]
    fn whole_number(&self, key: &str) -> Result<Number, ValidationIssue> {
        let number = self.number_in(key, 0.0, f64::MAX)?;
        if number.is_f64() && number.as_f64().is_some_and(|value| value.fract() != 0.0) {
            return Err(ValidationIssue::new(
                self.path_of(key),
                "Expected integer, received float",
            ));
        }
        Ok(number)
    }

    fn datetime(&self, key: &str) -> Result<(String, DateTime<Utc>), ValidationIssue> {
        let raw = self.string(key)?;
        parse_utc_datetime(&raw)
            .map(|parsed| (raw, parsed))
            .ok_or_else(|| ValidationIssue::new(self.path_of(key), "Invalid datetime"))
    }

    fn one_of<T: WireEnum>(&self, key: &str) -> Result<T, ValidationIssue> {
        let value = self.get(key)?;
        let Value::String(literal) = value else {
            return Err(ValidationIssue::new(self.path_of(key), expected("string", value)));
        };
        T::from_wire(literal).ok_or_else(|| {
            ValidationIssue::new(
                self.path_of(key),
                format!(
                    "Invalid enum value. Expected {}, received '{literal}'",
                    quoted(T::VARIANTS)
                ),
            )
        })
    }
}

/// ISO-8601 / RFC 3339 date-time in UTC, `Z` suffix required.
fn parse_utc_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if !raw.ends_with('Z') {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn parse_event(raw: &Value) -> Result<Event, Vec<ValidationIssue>> {
    let root = ObjectView::root(raw).map_err(|issue| vec![issue])?;

    // The discriminators pick the schema; without them nothing else can be checked.
    let source = root.one_of::<Source>("source").map_err(|issue| {
        vec![ValidationIssue::new(
            issue.path,
            format!(
                "Invalid discriminator value. Expected {}",
                quoted(Source::VARIANTS)
            ),
        )]
    })?;
    let stage = root.one_of::<FunnelStage>("funnelStage").map_err(|issue| {
        vec![ValidationIssue::new(
            issue.path,
            format!(
                "Invalid discriminator value. Expected {}",
                quoted(FunnelStage::VARIANTS)
            ),
        )]
    })?;

    let mut issues = Issues::default();
    issues.extend(root.strict(ENVELOPE_FIELDS));
    let event_id = issues.take(root.non_empty_string("eventId"));
    let timestamp = issues.take(root.datetime("timestamp"));
    let data = issues.take(root.nested("data"));
    if let Some(data) = &data {
        issues.extend(data.strict(DATA_FIELDS));
    }
    let payload = payload(source, stage, &root, data.as_ref(), &mut issues);

    match (event_id, timestamp, payload) {
        (Some(event_id), Some((timestamp, occurred_at)), Some(payload)) if issues.0.is_empty() => {
            Ok(Event::from_parts(event_id, timestamp, occurred_at, payload))
        }
        _ => Err(issues.0),
    }
}

fn section<'a>(
    data: Option<&ObjectView<'a>>,
    key: &str,
    issues: &mut Issues,
) -> Option<ObjectView<'a>> {
    data.and_then(|data| issues.take(data.nested(key)))
}

fn payload(
    source: Source,
    stage: FunnelStage,
    root: &ObjectView<'_>,
    data: Option<&ObjectView<'_>>,
    issues: &mut Issues,
) -> Option<EventPayload> {
    match (source, stage) {
        (Source::Facebook, FunnelStage::Top) => {
            let event_type = issues.take(root.one_of::<FacebookTopEventType>("eventType"));
            let user = section(data, "user", issues).and_then(|view| facebook_user(&view, issues));
            let engagement = section(data, "engagement", issues)
                .and_then(|view| facebook_top_engagement(&view, issues));
            Some(EventPayload::FacebookTop {
                event_type: event_type?,
                user: user?,
                engagement: engagement?,
            })
        }
        (Source::Facebook, FunnelStage::Bottom) => {
            let event_type = issues.take(root.one_of::<FacebookBottomEventType>("eventType"));
            let user = section(data, "user", issues).and_then(|view| facebook_user(&view, issues));
            let engagement = section(data, "engagement", issues)
                .and_then(|view| facebook_bottom_engagement(&view, issues));
            Some(EventPayload::FacebookBottom {
                event_type: event_type?,
                user: user?,
                engagement: engagement?,
            })
        }
        (Source::Tiktok, FunnelStage::Top) => {
            let event_type = issues.take(root.one_of::<TiktokTopEventType>("eventType"));
            let user = section(data, "user", issues).and_then(|view| tiktok_user(&view, issues));
            let engagement = section(data, "engagement", issues)
                .and_then(|view| tiktok_top_engagement(&view, issues));
            Some(EventPayload::TiktokTop {
                event_type: event_type?,
                user: user?,
                engagement: engagement?,
            })
        }
        (Source::Tiktok, FunnelStage::Bottom) => {
            let event_type = issues.take(root.one_of::<TiktokBottomEventType>("eventType"));
            let user = section(data, "user", issues).and_then(|view| tiktok_user(&view, issues));
            let engagement = section(data, "engagement", issues)
                .and_then(|view| tiktok_bottom_engagement(&view, issues));
            Some(EventPayload::TiktokBottom {
                event_type: event_type?,
                user: user?,
                engagement: engagement?,
            })
        }
    }
}

fn facebook_user(view: &ObjectView<'_>, issues: &mut Issues) -> Option<FacebookUser> {
    issues.extend(view.strict(FACEBOOK_USER_FIELDS));
    let user_id = issues.take(view.non_empty_string("userId"));
    let name = issues.take(view.non_empty_string("name"));
    let age = issues.take(view.whole_number("age"));
    let gender = issues.take(view.one_of::<Gender>("gender"));
    let location = issues
        .take(view.nested("location"))
        .and_then(|location| facebook_location(&location, issues));

    Some(FacebookUser {
        user_id: user_id?,
        name: name?,
        age: age?,
        gender: gender?,
        location: location?,
    })
}

fn facebook_location(view: &ObjectView<'_>, issues: &mut Issues) -> Option<FacebookLocation> {
    issues.extend(view.strict(FACEBOOK_LOCATION_FIELDS));
    let country = issues.take(view.non_empty_string("country"));
    let city = issues.take(view.non_empty_string("city"));
    Some(FacebookLocation {
        country: country?,
        city: city?,
    })
}

fn facebook_top_engagement(
    view: &ObjectView<'_>,
    issues: &mut Issues,
) -> Option<FacebookTopEngagement> {
    issues.extend(view.strict(FACEBOOK_TOP_FIELDS));
    let action_time = issues.take(view.string("actionTime"));
    let referrer = issues.take(view.one_of::<FacebookReferrer>("referrer"));
    let video_id = issues.take(view.nullable_string("videoId"));
    Some(FacebookTopEngagement {
        action_time: action_time?,
        referrer: referrer?,
        video_id: video_id?,
    })
}

fn facebook_bottom_engagement(
    view: &ObjectView<'_>,
    issues: &mut Issues,
) -> Option<FacebookBottomEngagement> {
    issues.extend(view.strict(FACEBOOK_BOTTOM_FIELDS));
    let ad_id = issues.take(view.non_empty_string("adId"));
    let campaign_id = issues.take(view.non_empty_string("campaignId"));
    let click_position = issues.take(view.one_of::<ClickPosition>("clickPosition"));
    let device = issues.take(view.one_of::<FacebookDevice>("device"));
    let browser = issues.take(view.one_of::<Browser>("browser"));
    let purchase_amount = issues.take(view.nullable_string("purchaseAmount"));
    Some(FacebookBottomEngagement {
        ad_id: ad_id?,
        campaign_id: campaign_id?,
        click_position: click_position?,
        device: device?,
        browser: browser?,
        purchase_amount: purchase_amount?,
    })
}

fn tiktok_user(view: &ObjectView<'_>, issues: &mut Issues) -> Option<TiktokUser> {
    issues.extend(view.strict(TIKTOK_USER_FIELDS));
    let user_id = issues.take(view.non_empty_string("userId"));
    let username = issues.take(view.non_empty_string("username"));
    let followers = issues.take(view.whole_number("followers"));
    Some(TiktokUser {
        user_id: user_id?,
        username: username?,
        followers: followers?,
    })
}

fn tiktok_top_engagement(
    view: &ObjectView<'_>,
    issues: &mut Issues,
) -> Option<TiktokTopEngagement> {
    issues.extend(view.strict(TIKTOK_TOP_FIELDS));
    let watch_time = issues.take(view.number_in("watchTime", 0.0, f64::MAX));
    let percentage_watched = issues.take(view.number_in("percentageWatched", 0.0, 100.0));
    let device = issues.take(view.one_of::<TiktokDevice>("device"));
    let country = issues.take(view.non_empty_string("country"));
    let video_id = issues.take(view.non_empty_string("videoId"));
    Some(TiktokTopEngagement {
        watch_time: watch_time?,
        percentage_watched: percentage_watched?,
        device: device?,
        country: country?,
        video_id: video_id?,
    })
}

fn tiktok_bottom_engagement(
    view: &ObjectView<'_>,
    issues: &mut Issues,
) -> Option<TiktokBottomEngagement> {
    issues.extend(view.strict(TIKTOK_BOTTOM_FIELDS));
    let action_time = issues.take(view.string("actionTime"));
    let profile_id = issues.take(view.nullable_string("profileId"));
    let purchased_item = issues.take(view.nullable_string("purchasedItem"));
    let purchase_amount = issues.take(view.nullable_string("purchaseAmount"));
    Some(TiktokBottomEngagement {
        action_time: action_time?,
        profile_id: profile_id?,
        purchased_item: purchased_item?,
        purchase_amount: purchase_amount?,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facebook_top() -> Value {
        json!({
            "eventId": "fb_top_123",
            "timestamp": "2025-09-01T10:00:00Z",
            "source": "facebook",
            "funnelStage": "top",
            "eventType": "ad.view",
            "data": {
                "user": {
                    "userId": "u1",
                    "name": "Jane",
                    "age": 28,
                    "gender": "female",
                    "location": { "country": "US", "city": "NYC" }
                },
                "engagement": {
                    "actionTime": "2025-09-01T10:00:00Z",
                    "referrer": "newsfeed",
                    "videoId": null
                }
            }
        })
    }

    fn tiktok_bottom() -> Value {
        json!({
            "eventId": "ttk_bottom_1",
            "timestamp": "2025-09-01T11:30:00.250Z",
            "source": "tiktok",
            "funnelStage": "bottom",
            "eventType": "purchase",
            "data": {
                "user": { "userId": "t1", "username": "dancer", "followers": 1200 },
                "engagement": {
                    "actionTime": "2025-09-01T11:30:00Z",
                    "profileId": null,
                    "purchasedItem": "hat",
                    "purchaseAmount": "19.99"
                }
            }
        })
    }

    fn tiktok_top() -> Value {
        json!({
            "eventId": "ttk_top_1",
            "timestamp": "2025-09-01T09:15:00Z",
            "source": "tiktok",
            "funnelStage": "top",
            "eventType": "video.view",
            "data": {
                "user": { "userId": "t2", "username": "viewer", "followers": 15 },
                "engagement": {
                    "watchTime": 15,
                    "percentageWatched": 80,
                    "device": "iOS",
                    "country": "FR",
                    "videoId": "vid_9"
                }
            }
        })
    }

    fn issues_of(raw: &Value) -> Vec<ValidationIssue> {
        EventValidator::new()
            .validate_one(raw)
            .expect_err("should be rejected")
            .issues
    }

    #[test]
    fn accepts_valid_facebook_top_event() {
        let event = EventValidator::new()
            .validate_one(&facebook_top())
            .expect("valid event");

        assert_eq!(event.event_id(), "fb_top_123");
        assert_eq!(event.source(), Source::Facebook);
        assert_eq!(event.funnel_stage(), FunnelStage::Top);
        assert_eq!(event.event_type(), "ad.view");
        assert_eq!(event.timestamp(), "2025-09-01T10:00:00Z");
    }

    #[test]
    fn valid_event_serializes_back_to_its_input() {
        let raw = facebook_top();
        let event = EventValidator::new().validate_one(&raw).expect("valid event");
        assert_eq!(serde_json::to_value(&event).expect("serializable"), raw);

        let raw = tiktok_bottom();
        let event = EventValidator::new().validate_one(&raw).expect("valid event");
        assert_eq!(serde_json::to_value(&event).expect("serializable"), raw);

        let raw = tiktok_top();
        let event = EventValidator::new().validate_one(&raw).expect("valid event");
        assert_eq!(serde_json::to_value(&event).expect("serializable"), raw);
    }

    #[test]
    fn numbers_keep_their_received_form() {
        let mut raw = tiktok_top();
        raw["data"]["engagement"]["watchTime"] = json!(12.5);
        raw["data"]["engagement"]["percentageWatched"] = json!(80.0);
        raw["data"]["user"]["followers"] = json!(15.0);

        let event = EventValidator::new().validate_one(&raw).expect("valid event");
        let back = serde_json::to_value(&event).expect("serializable");
        assert_eq!(back, raw);
        assert_eq!(back["data"]["engagement"]["watchTime"], json!(12.5));
        assert!(back["data"]["engagement"]["percentageWatched"].is_f64());
        assert!(back["data"]["user"]["followers"].is_f64());
    }

    #[test]
    fn action_time_is_any_string() {
        let mut raw = facebook_top();
        raw["data"]["engagement"]["actionTime"] = json!("2025-09-01 10:00:00");
        let event = EventValidator::new().validate_one(&raw).expect("valid event");
        assert_eq!(serde_json::to_value(&event).expect("serializable"), raw);

        let mut raw = tiktok_bottom();
        raw["data"]["engagement"]["actionTime"] = json!("yesterday");
        assert!(EventValidator::new().validate_one(&raw).is_ok());

        raw["data"]["engagement"]["actionTime"] = json!(1_725_184_800);
        let issues = issues_of(&raw);
        assert_eq!(issues[0].path, "data.engagement.actionTime");
        assert_eq!(issues[0].reason, "Expected string, received number");
    }

    #[test]
    fn ages_are_whole_but_uncapped() {
        let mut raw = facebook_top();
        raw["data"]["user"]["age"] = json!(28.0);
        assert!(EventValidator::new().validate_one(&raw).is_ok());

        raw["data"]["user"]["age"] = json!(151);
        assert!(EventValidator::new().validate_one(&raw).is_ok());

        raw["data"]["user"]["age"] = json!(28.5);
        assert_eq!(issues_of(&raw)[0].reason, "Expected integer, received float");

        raw["data"]["user"]["age"] = json!(-1);
        assert_eq!(
            issues_of(&raw)[0].reason,
            "Number must be greater than or equal to 0"
        );
    }

    #[test]
    fn rejects_event_type_from_other_funnel_stage() {
        let mut raw = facebook_top();
        raw["eventType"] = json!("checkout.complete");

        let issues = issues_of(&raw);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "eventType");
        assert!(issues[0].reason.starts_with("Invalid enum value"));
    }

    #[test]
    fn rejects_unknown_keys_at_every_level() {
        let mut raw = facebook_top();
        raw["extra"] = json!(1);
        raw["data"]["user"]["location"]["zip"] = json!("10001");

        let paths: Vec<String> = issues_of(&raw).into_iter().map(|i| i.path).collect();
        assert_eq!(paths, vec!["".to_string(), "data.user.location".to_string()]);
    }

    #[test]
    fn collects_every_issue() {
        let mut raw = facebook_top();
        raw["data"]["user"]["age"] = json!("28");
        raw["data"]["user"]["gender"] = json!("other");
        raw["data"]["engagement"]
            .as_object_mut()
            .expect("object")
            .remove("videoId");

        let issues = issues_of(&raw);
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["data.user.age", "data.user.gender", "data.engagement.videoId"]
        );
        assert_eq!(issues[2].reason, "Required");
    }

    #[test]
    fn rejects_unknown_discriminator() {
        let mut raw = facebook_top();
        raw["source"] = json!("instagram");

        let error = EventValidator::new()
            .validate_one(&raw)
            .expect_err("unknown source");
        assert_eq!(error.event_id.as_deref(), Some("fb_top_123"));
        assert_eq!(error.issues.len(), 1);
        assert!(error.issues[0].reason.contains("'facebook' | 'tiktok'"));
    }

    #[test]
    fn rejects_non_object_items() {
        let issues = issues_of(&json!("not an event"));
        assert_eq!(issues[0].reason, "Expected object, received string");
    }

    #[test]
    fn timestamps_must_be_utc_with_z_suffix() {
        let mut raw = facebook_top();
        raw["timestamp"] = json!("2025-09-01T10:00:00+02:00");
        assert_eq!(issues_of(&raw)[0].path, "timestamp");

        raw["timestamp"] = json!("yesterday");
        assert_eq!(issues_of(&raw)[0].reason, "Invalid datetime");
    }

    #[test]
    fn numeric_bounds_are_enforced() {
        let mut raw = tiktok_bottom();
        raw["data"]["user"]["followers"] = json!(-1);
        assert_eq!(issues_of(&raw)[0].path, "data.user.followers");

        raw["data"]["user"]["followers"] = json!(1.5);
        assert_eq!(issues_of(&raw)[0].reason, "Expected integer, received float");
    }

    #[test]
    fn partitions_batches() {
        let mut invalid = tiktok_bottom();
        invalid["data"]["engagement"]["purchaseAmount"] = json!(19.99);

        let report = EventValidator::new().validate(&[facebook_top(), invalid, tiktok_bottom()]);
        assert_eq!(report.valid_events.len(), 2);
        assert_eq!(report.invalid_count, 1);
        assert_eq!(report.valid_events[0].event_id(), "fb_top_123");
        assert_eq!(report.valid_events[1].event_id(), "ttk_bottom_1");
    }

    #[test]
    fn empty_batch_is_empty_report() {
        let report = EventValidator::new().validate(&[]);
        assert!(report.valid_events.is_empty());
        assert_eq!(report.invalid_count, 0);
    }
}
