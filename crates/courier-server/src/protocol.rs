//! Wire protocol: request decoding and reply encoding.
//!
//! Every frame is one UTF-8 JSON object. Requests carry a `type` naming the
//! command; replies echo it together with a numeric `code`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use courier_core::{Identity, PermissionTier};

/// Protocol version stamped on success replies and delivered messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// `type` of a delivered chat message.
pub const RECVMSG: &str = "recvmsg";

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Error codes sent to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Frame is not a JSON object.
    ParseJson,
    /// A required field is missing or empty.
    MissParam,
    /// Unknown command name.
    CmdType,
    /// Not logged in, or tier too low.
    Permission,
    /// Wrong credentials.
    Login,
    /// Account creation failed.
    AddUser,
    /// Account deletion failed.
    DeleteUser,
}

impl ErrorCode {
    /// Numeric wire value.
    pub fn code(self) -> u16 {
        match self {
            Self::ParseJson => 1000,
            Self::MissParam => 1100,
            Self::CmdType => 1200,
            Self::Permission => 1300,
            Self::Login => 2000,
            Self::AddUser => 3000,
            Self::DeleteUser => 4000,
        }
    }

    /// Fixed human-readable reason sent with the code.
    pub fn reason(self) -> &'static str {
        match self {
            Self::ParseJson => "Message is NOT in JSON format.",
            Self::MissParam => "Miss parameters in JSON.",
            Self::CmdType => "Unknown command type.",
            Self::Permission => {
                "No user login or the user doesn't have permission to exec this command."
            }
            Self::Login => "Login failed. User does NOT exist or password is wrong.",
            Self::AddUser => "Add user failed. Maybe user name is duplicated.",
            Self::DeleteUser => "Delete user failed.",
        }
    }

    /// Metric label (`"1000"`, `"1100"`, ...).
    pub fn label(self) -> &'static str {
        match self {
            Self::ParseJson => "1000",
            Self::MissParam => "1100",
            Self::CmdType => "1200",
            Self::Permission => "1300",
            Self::Login => "2000",
            Self::AddUser => "3000",
            Self::DeleteUser => "4000",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded request.
///
/// Fields are taken as sent; required-field checks happen in the handlers,
/// after the authorization gate, so an unauthorized caller always sees
/// `PERMISSION_ERR` first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `login(name, password)`
    Login {
        /// Account name.
        name: String,
        /// Plain password.
        password: String,
    },
    /// `adduser(name, password)`
    AddUser {
        /// New account name.
        name: String,
        /// New account password.
        password: String,
    },
    /// `deluser(users[] | removeAll)`
    DelUser {
        /// Named targets.
        users: Vec<String>,
        /// Delete every account in the caller's scope.
        remove_all: bool,
    },
    /// `listuser(start, length)`
    ListUser {
        /// Offset into the caller's visible accounts.
        start: usize,
        /// Page size; `None` returns everything from `start` on.
        length: Option<usize>,
    },
    /// `sendmsg(receivers[], msg)`
    SendMsg {
        /// Receiving identities.
        receivers: Vec<String>,
        /// Message text.
        msg: String,
    },
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::AddUser { .. } => "adduser",
            Self::DelUser { .. } => "deluser",
            Self::ListUser { .. } => "listuser",
            Self::SendMsg { .. } => "sendmsg",
        }
    }
}

/// Why a frame could not be turned into a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameError {
    /// Command name to echo in the reply (empty when unknown).
    pub command: String,
    /// Code to reply with.
    pub code: ErrorCode,
}

impl FrameError {
    fn new(command: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            command: command.into(),
            code,
        }
    }

    /// Whether the frame failed to decode as JSON at all.
    pub fn is_parse_error(&self) -> bool {
        self.code == ErrorCode::ParseJson
    }
}

/// Decode one text frame into a [`Command`].
pub fn decode_frame(text: &str) -> Result<Command, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|_| FrameError::new("", ErrorCode::ParseJson))?;
    let Value::Object(body) = value else {
        return Err(FrameError::new("", ErrorCode::ParseJson));
    };
    let Some(kind) = body.get("type").and_then(Value::as_str) else {
        return Err(FrameError::new("", ErrorCode::MissParam));
    };

    let command = match kind {
        "login" => Command::Login {
            name: string_field(&body, "name"),
            password: string_field(&body, "password"),
        },
        "adduser" => Command::AddUser {
            name: string_field(&body, "name"),
            password: string_field(&body, "password"),
        },
        "deluser" => Command::DelUser {
            users: string_array_field(&body, "users"),
            remove_all: bool_field(&body, "removeAll") || bool_field(&body, "removeall"),
        },
        "listuser" => Command::ListUser {
            start: index_field(&body, "start").unwrap_or(0),
            length: index_field(&body, "length"),
        },
        "sendmsg" => Command::SendMsg {
            receivers: string_array_field(&body, "receivers"),
            msg: string_field(&body, "msg"),
        },
        other => return Err(FrameError::new(other, ErrorCode::CmdType)),
    };
    Ok(command)
}

fn string_field(body: &Map<String, Value>, key: &str) -> String {
    body.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn bool_field(body: &Map<String, Value>, key: &str) -> bool {
    body.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn string_array_field(body: &Map<String, Value>, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// A non-negative integer field. Negative numbers clamp to zero; absent or
/// non-numeric fields are `None`.
fn index_field(body: &Map<String, Value>, key: &str) -> Option<usize> {
    let value = body.get(key)?;
    if let Some(n) = value.as_u64() {
        return Some(usize::try_from(n).unwrap_or(usize::MAX));
    }
    value.as_i64().map(|_| 0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Replies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SuccessReply<'a> {
    version: u32,
    #[serde(rename = "type")]
    kind: &'a str,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    usertype: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    users: Option<&'a [String]>,
}

#[derive(Serialize)]
struct ErrorReply<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    code: u16,
    reason: &'a str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    version: u32,
    #[serde(rename = "type")]
    kind: &'a str,
    sender: &'a str,
    msg: &'a str,
    time: i64,
}

fn encode<T: Serialize>(value: &T) -> String {
    // These structs hold only strings and integers.
    serde_json::to_string(value).unwrap_or_default()
}

/// `{"version":1,"type":<command>,"code":0}`
pub fn success(command: &str) -> String {
    encode(&SuccessReply {
        version: PROTOCOL_VERSION,
        kind: command,
        code: 0,
        usertype: None,
        users: None,
    })
}

/// Login success, with the caller's tier as `usertype`.
pub fn login_success(tier: PermissionTier) -> String {
    encode(&SuccessReply {
        version: PROTOCOL_VERSION,
        kind: "login",
        code: 0,
        usertype: Some(tier.as_str()),
        users: None,
    })
}

/// Listing success, with the page of names as `users`.
pub fn listuser_success(users: &[String]) -> String {
    encode(&SuccessReply {
        version: PROTOCOL_VERSION,
        kind: "listuser",
        code: 0,
        usertype: None,
        users: Some(users),
    })
}

/// `{"type":<command>,"code":<code>,"reason":<reason>}`
pub fn error(command: &str, code: ErrorCode) -> String {
    encode(&ErrorReply {
        kind: command,
        code: code.code(),
        reason: code.reason(),
    })
}

/// A chat message as delivered to each receiver.
pub fn recvmsg(sender: &Identity, msg: &str, produced_at: DateTime<Utc>) -> String {
    encode(&ChatMessage {
        version: PROTOCOL_VERSION,
        kind: RECVMSG,
        sender: sender.as_str(),
        msg,
        time: produced_at.timestamp(),
    })
}
