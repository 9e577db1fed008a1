//! # IPC Protocol
//!
//! Message types for client <-> pie-menu communication over a loopback WebSocket.
//!
//! Every frame carries exactly one JSON object with a `type` tag:
//! - Requests (client -> menu): `show-menu`, `start-observing`, `stop-observing`
//! - Events (menu -> client): `open-menu`, `cancel-menu`, `select-item`, `hover-item`, `error`
//!
//! Decoding reads the tag first, then validates the remaining fields against the
//! exact shape of that tag. Unknown tags, missing tags and extra fields all fail
//! the same way with a [`DecodeError`].
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: `menu` is the bare item tree, display options sit beside it
//! - 1.0.0: Initial menu protocol

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol revision published in the discovery record
pub const API_VERSION: u32 = 1;

// ============================================================================
// Menu tree
// ============================================================================

/// A node of the menu tree. The `menu` of a `show-menu` request is the root
/// node itself, the item at the empty path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MenuItem {
    /// Item type understood by the renderer (e.g. `submenu`, `command`)
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub icon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_theme: String,
    /// Type-specific payload, opaque to the protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MenuItem>,
    /// Fixed direction in degrees, clockwise from the top
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f64>,
}

impl MenuItem {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, icon: impl Into<String>) -> Self {
        MenuItem {
            kind: kind.into(),
            name: name.into(),
            icon: icon.into(),
            icon_theme: String::new(),
            data: None,
            children: Vec::new(),
            angle: None,
        }
    }

    /// Builder-style helper to attach children
    pub fn with_children(mut self, children: Vec<MenuItem>) -> Self {
        self.children = children;
        self
    }

    /// Structural checks the serde shape cannot express
    pub fn validate(&self) -> Result<(), DecodeError> {
        self.validate_children(&mut Vec::new())
    }

    /// Resolve an index path relative to this node
    pub fn item_at(&self, path: &[usize]) -> Option<&MenuItem> {
        path.iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }

    fn validate_children(&self, path: &mut Vec<usize>) -> Result<(), DecodeError> {
        let mut previous: Option<f64> = None;
        for (index, child) in self.children.iter().enumerate() {
            path.push(index);
            if let Some(angle) = child.angle {
                if !angle.is_finite() || !(0.0..360.0).contains(&angle) {
                    return Err(DecodeError::InvalidMenu(format!(
                        "angle {} at {:?} is outside [0, 360)",
                        angle, path
                    )));
                }
                if let Some(prev) = previous {
                    if angle <= prev {
                        return Err(DecodeError::InvalidMenu(format!(
                            "angle {} at {:?} does not increase over its sibling ({})",
                            angle, path, prev
                        )));
                    }
                }
                previous = Some(angle);
            }
            child.validate_children(path)?;
            path.pop();
        }
        Ok(())
    }
}

/// Display options carried next to `menu` on a `show-menu` request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuOptions {
    /// Open the menu centered on screen instead of at the pointer
    #[serde(default, skip_serializing_if = "is_false")]
    pub centered: bool,
    /// Keep submenus anchored at the root position
    #[serde(default, skip_serializing_if = "is_false")]
    pub anchored: bool,
    /// Select items by hovering instead of clicking
    #[serde(default, skip_serializing_if = "is_false")]
    pub hover_mode: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Shared enumerations
// ============================================================================

/// Whether a hover/select refers to a leaf item or a submenu node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionTarget {
    Item,
    Submenu,
}

impl std::fmt::Display for InteractionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionTarget::Item => write!(f, "item"),
            InteractionTarget::Submenu => write!(f, "submenu"),
        }
    }
}

impl std::str::FromStr for InteractionTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "item" => Ok(InteractionTarget::Item),
            "submenu" => Ok(InteractionTarget::Submenu),
            _ => Err(anyhow::anyhow!("Invalid interaction target: {}", s)),
        }
    }
}

/// Stable error reasons, part of the wire contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    NotConnected,
    ConnectionFailed,
    MalformedRequest,
    VersionNotSupported,
    AlreadyObserving,
    NotObserving,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::NotConnected => "not-connected",
            ErrorReason::ConnectionFailed => "connection-failed",
            ErrorReason::MalformedRequest => "malformed-request",
            ErrorReason::VersionNotSupported => "version-not-supported",
            ErrorReason::AlreadyObserving => "already-observing",
            ErrorReason::NotObserving => "not-observing",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Client -> Menu Requests
// ============================================================================

/// Requests sent from clients to the pie-menu application
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MenuRequest {
    /// Display a menu; the sender observes this one interaction
    ShowMenu {
        menu: MenuItem,
        #[serde(flatten)]
        options: MenuOptions,
    },
    /// Observe interactions of every menu until stopped
    StartObserving,
    /// End a running observation
    StopObserving,
}

// ============================================================================
// Menu -> Client Events
// ============================================================================

/// Events sent from the pie-menu application to observing clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MenuEvent {
    /// A menu was opened
    OpenMenu,
    /// The menu was closed without a selection
    CancelMenu,
    /// A node was selected
    SelectItem {
        target: InteractionTarget,
        path: Vec<usize>,
    },
    /// A node is hovered
    HoverItem {
        target: InteractionTarget,
        path: Vec<usize>,
    },
    /// Protocol or state error on this connection
    Error {
        reason: ErrorReason,
        description: String,
    },
}

impl MenuEvent {
    pub fn error(reason: ErrorReason, description: impl Into<String>) -> Self {
        MenuEvent::Error {
            reason,
            description: description.into(),
        }
    }

    /// Select and cancel end a single menu interaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, MenuEvent::SelectItem { .. } | MenuEvent::CancelMenu)
    }
}

// ============================================================================
// Decoding - tag first, then exact shape
// ============================================================================

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message has no string `type` tag")]
    MissingTag,

    #[error("unknown message type `{0}`")]
    UnknownTag(String),

    #[error("invalid `{tag}` payload: {detail}")]
    Shape { tag: String, detail: String },

    #[error("invalid menu: {0}")]
    InvalidMenu(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ShowMenuPayload {
    menu: MenuItem,
    #[serde(default)]
    centered: bool,
    #[serde(default)]
    anchored: bool,
    #[serde(default)]
    hover_mode: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyPayload {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InteractionPayload {
    target: InteractionTarget,
    path: Vec<usize>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ErrorPayload {
    reason: ErrorReason,
    description: String,
}

fn split_tag(text: &str) -> Result<(String, Map<String, Value>), DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(DecodeError::NotAnObject);
    };
    match fields.remove("type") {
        Some(Value::String(tag)) => Ok((tag, fields)),
        _ => Err(DecodeError::MissingTag),
    }
}

fn payload<T: DeserializeOwned>(tag: &str, fields: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| DecodeError::Shape {
        tag: tag.to_string(),
        detail: e.to_string(),
    })
}

/// Decode a frame received by the server
pub fn decode_request(text: &str) -> Result<MenuRequest, DecodeError> {
    let (tag, fields) = split_tag(text)?;
    match tag.as_str() {
        "show-menu" => {
            let ShowMenuPayload {
                menu,
                centered,
                anchored,
                hover_mode,
            } = payload(&tag, fields)?;
            menu.validate()?;
            Ok(MenuRequest::ShowMenu {
                menu,
                options: MenuOptions {
                    centered,
                    anchored,
                    hover_mode,
                },
            })
        }
        "start-observing" => {
            payload::<EmptyPayload>(&tag, fields)?;
            Ok(MenuRequest::StartObserving)
        }
        "stop-observing" => {
            payload::<EmptyPayload>(&tag, fields)?;
            Ok(MenuRequest::StopObserving)
        }
        _ => Err(DecodeError::UnknownTag(tag)),
    }
}

/// Decode a frame received by a client
pub fn decode_event(text: &str) -> Result<MenuEvent, DecodeError> {
    let (tag, fields) = split_tag(text)?;
    match tag.as_str() {
        "open-menu" => {
            payload::<EmptyPayload>(&tag, fields)?;
            Ok(MenuEvent::OpenMenu)
        }
        "cancel-menu" => {
            payload::<EmptyPayload>(&tag, fields)?;
            Ok(MenuEvent::CancelMenu)
        }
        "select-item" => {
            let InteractionPayload { target, path } = payload(&tag, fields)?;
            Ok(MenuEvent::SelectItem { target, path })
        }
        "hover-item" => {
            let InteractionPayload { target, path } = payload(&tag, fields)?;
            Ok(MenuEvent::HoverItem { target, path })
        }
        "error" => {
            let ErrorPayload {
                reason,
                description,
            } = payload(&tag, fields)?;
            Ok(MenuEvent::Error {
                reason,
                description,
            })
        }
        _ => Err(DecodeError::UnknownTag(tag)),
    }
}

/// Serialize a message into a single text frame
pub fn encode_message<T: Serialize>(msg: &T) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_menu() -> MenuItem {
        MenuItem::new("submenu", "Root", "apps").with_children(vec![
            MenuItem::new("command", "Terminal", "terminal"),
            MenuItem::new("submenu", "Media", "music").with_children(vec![
                MenuItem::new("hotkey", "Play", "play"),
                MenuItem::new("hotkey", "Next", "skip"),
            ]),
        ])
    }

    fn show(menu: MenuItem) -> MenuRequest {
        MenuRequest::ShowMenu {
            menu,
            options: MenuOptions::default(),
        }
    }

    #[test]
    fn test_request_wire_format() {
        let json = encode_message(&MenuRequest::StartObserving).unwrap();
        assert_eq!(json, r#"{"type":"start-observing"}"#);

        let json = encode_message(&show(sample_menu())).unwrap();
        assert!(json.starts_with(r#"{"type":"show-menu","menu":{"type":"submenu","name":"Root""#));
        assert!(!json.contains("hoverMode"));

        let json = encode_message(&MenuRequest::ShowMenu {
            menu: MenuItem::new("submenu", "R", "r"),
            options: MenuOptions {
                hover_mode: true,
                ..MenuOptions::default()
            },
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"show-menu","menu":{"type":"submenu","name":"R","icon":"r"},"hoverMode":true}"#
        );
    }

    #[test]
    fn test_event_wire_format() {
        let select = MenuEvent::SelectItem {
            target: InteractionTarget::Submenu,
            path: vec![1, 0],
        };
        assert_eq!(
            encode_message(&select).unwrap(),
            r#"{"type":"select-item","target":"submenu","path":[1,0]}"#
        );

        let error = MenuEvent::error(ErrorReason::AlreadyObserving, "busy");
        assert_eq!(
            encode_message(&error).unwrap(),
            r#"{"type":"error","reason":"already-observing","description":"busy"}"#
        );
    }

    #[test]
    fn test_decode_show_menu() {
        let text = encode_message(&show(sample_menu())).unwrap();
        assert_eq!(decode_request(&text).unwrap(), show(sample_menu()));
    }

    #[test]
    fn test_decode_bare_menu_tree() {
        let text = r#"{"type":"show-menu","menu":{"type":"submenu","name":"Root","icon":"apps","children":[{"type":"command","name":"Terminal","icon":"terminal"}]},"centered":true}"#;
        match decode_request(text).unwrap() {
            MenuRequest::ShowMenu { menu, options } => {
                assert_eq!(menu.name, "Root");
                assert_eq!(menu.item_at(&[0]).map(|i| i.name.as_str()), Some("Terminal"));
                assert!(options.centered);
                assert!(!options.hover_mode);
            }
            other => panic!("Wrong request type: {:?}", other),
        }

        // The old wrapped shape is not a menu tree
        let wrapped = r#"{"type":"show-menu","menu":{"root":{"type":"submenu","name":"R","icon":"x"}}}"#;
        assert!(matches!(
            decode_request(wrapped).unwrap_err(),
            DecodeError::Shape { .. }
        ));
    }

    #[test]
    fn test_decode_minimal_menu_item() {
        let text = r#"{"type":"show-menu","menu":{"type":"submenu","name":"R","icon":"x"}}"#;
        match decode_request(text).unwrap() {
            MenuRequest::ShowMenu { menu, options } => {
                assert!(menu.children.is_empty());
                assert_eq!(options, MenuOptions::default());
            }
            other => panic!("Wrong request type: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_fields() {
        let err = decode_request(r#"{"type":"start-observing","observer":3}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { .. }));

        let err = decode_request(
            r#"{"type":"show-menu","menu":{"type":"a","name":"b","icon":"c","colour":1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Shape { .. }));
    }

    #[test]
    fn test_decode_rejects_untagged_and_unknown() {
        assert_eq!(
            decode_request(r#"{"invalid":"data"}"#).unwrap_err(),
            DecodeError::MissingTag
        );
        assert_eq!(
            decode_request(r#"{"type":7}"#).unwrap_err(),
            DecodeError::MissingTag
        );
        assert_eq!(
            decode_request(r#"[1,2]"#).unwrap_err(),
            DecodeError::NotAnObject
        );
        assert!(matches!(
            decode_request("not json").unwrap_err(),
            DecodeError::Json(_)
        ));
        // Event tags are not requests
        assert_eq!(
            decode_request(r#"{"type":"open-menu"}"#).unwrap_err(),
            DecodeError::UnknownTag("open-menu".to_string())
        );
        assert_eq!(
            decode_event(r#"{"type":"show-menu"}"#).unwrap_err(),
            DecodeError::UnknownTag("show-menu".to_string())
        );
    }

    #[test]
    fn test_decode_interaction_events() {
        let event = decode_event(r#"{"type":"hover-item","target":"item","path":[]}"#).unwrap();
        assert_eq!(
            event,
            MenuEvent::HoverItem {
                target: InteractionTarget::Item,
                path: vec![],
            }
        );

        let err = decode_event(r#"{"type":"select-item","target":"item","path":[-1]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { .. }));

        let err = decode_event(r#"{"type":"select-item","target":"leaf","path":[0]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { .. }));
    }

    #[test]
    fn test_decode_error_event() {
        let event =
            decode_event(r#"{"type":"error","reason":"not-observing","description":"x"}"#).unwrap();
        assert_eq!(event, MenuEvent::error(ErrorReason::NotObserving, "x"));

        assert!(decode_event(r#"{"type":"error","reason":"teapot","description":"x"}"#).is_err());
    }

    #[test]
    fn test_menu_angle_validation() {
        let mut menu = sample_menu();
        menu.children[0].angle = Some(90.0);
        menu.children[1].angle = Some(270.0);
        assert!(menu.validate().is_ok());

        menu.children[1].angle = Some(45.0);
        assert!(matches!(menu.validate(), Err(DecodeError::InvalidMenu(_))));

        menu.children[1].angle = Some(360.0);
        assert!(matches!(menu.validate(), Err(DecodeError::InvalidMenu(_))));

        let mut nested = sample_menu();
        nested.children[1].children[0].angle = Some(-10.0);
        assert!(nested.validate().is_err());

        let text = r#"{"type":"show-menu","menu":{"type":"submenu","name":"R","icon":"x","children":[{"type":"a","name":"b","icon":"c","angle":400}]}}"#;
        assert!(matches!(
            decode_request(text).unwrap_err(),
            DecodeError::InvalidMenu(_)
        ));
    }

    #[test]
    fn test_item_at_path() {
        let menu = sample_menu();
        assert_eq!(menu.item_at(&[]).map(|i| i.name.as_str()), Some("Root"));
        assert_eq!(menu.item_at(&[1, 1]).map(|i| i.name.as_str()), Some("Next"));
        assert!(menu.item_at(&[0, 0]).is_none());
        assert!(menu.item_at(&[5]).is_none());
    }

    #[test]
    fn test_error_reason_strings() {
        for reason in [
            ErrorReason::NotConnected,
            ErrorReason::ConnectionFailed,
            ErrorReason::MalformedRequest,
            ErrorReason::VersionNotSupported,
            ErrorReason::AlreadyObserving,
            ErrorReason::NotObserving,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn test_interaction_target_from_str() {
        assert_eq!("Item".parse::<InteractionTarget>().unwrap(), InteractionTarget::Item);
        assert_eq!("submenu".parse::<InteractionTarget>().unwrap(), InteractionTarget::Submenu);
        assert!("leaf".parse::<InteractionTarget>().is_err());
    }
}
