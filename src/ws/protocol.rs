//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::{RoomId, UserId};

/// Inclusive upper bound for a shot angle in degrees
pub const MAX_ANGLE: f64 = 360.0;

/// Inclusive upper bound for shot power
pub const MAX_POWER: f64 = 100.0;

/// Highest ball slot: cue ball, fifteen numbered balls and edge slots
pub const MAX_BALL_ID: u8 = 21;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Attach this connection to a reserved seat
    ConfirmPresence { room_id: RoomId },

    /// Cue strike to relay to the opponent
    Shoot { angle: f64, power: f64 },

    /// Ball positions after a strike settled
    SendPosition { balls: Vec<BallState> },

    /// Report the end of the match
    EndMatch {
        #[serde(default)]
        winner_id: Option<UserId>,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome { user_id: UserId, server_time: u64 },

    /// Seat 1 presence acknowledged
    #[serde(rename = "ok")]
    PresenceConfirmed { room_id: RoomId },

    /// Both seats present, the match begins
    GameStart {
        player1_id: UserId,
        player2_id: UserId,
        room_id: RoomId,
    },

    /// Caller's shot was relayed
    ShootSuccess,

    /// Opponent struck the cue ball
    OpponentHit { angle: f64, power: f64 },

    /// Caller's positions were relayed
    SendSuccess,

    /// Opponent's ball positions
    OpponentPos { balls: Vec<BallState> },

    /// Room finished
    GameOver {
        room_id: RoomId,
        winner_id: Option<UserId>,
    },

    /// Request failed, `error` is a stable code
    Fail { error: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn fail(code: &str) -> Self {
        Self::Fail {
            error: code.to_string(),
        }
    }
}

/// One ball as reported by a client. Only `ball_id` is interpreted; the rest
/// of the object (position, pocketed flag, ...) is relayed untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    pub ball_id: u8,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Strike parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    /// Degrees, 0..=360
    pub angle: f64,
    /// 0..=100
    pub power: f64,
}

impl Shot {
    pub fn new(angle: f64, power: f64) -> Result<Self, ValidationError> {
        let shot = Self { angle, power };
        shot.validate()?;
        Ok(shot)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        // NaN fails both range checks
        if !(0.0..=MAX_ANGLE).contains(&self.angle) {
            return Err(ValidationError::AngleOutOfRange(self.angle));
        }
        if !(0.0..=MAX_POWER).contains(&self.power) {
            return Err(ValidationError::PowerOutOfRange(self.power));
        }
        Ok(())
    }
}

/// Check a position report before it is relayed
pub fn validate_balls(balls: &[BallState]) -> Result<(), ValidationError> {
    if balls.is_empty() {
        return Err(ValidationError::EmptyPositions);
    }
    if let Some(ball) = balls.iter().find(|b| b.ball_id > MAX_BALL_ID) {
        return Err(ValidationError::BallIdOutOfRange(ball.ball_id));
    }
    Ok(())
}

/// Payload validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Angle {0} outside 0..=360")]
    AngleOutOfRange(f64),

    #[error("Power {0} outside 0..=100")]
    PowerOutOfRange(f64),

    #[error("Position report contains no balls")]
    EmptyPositions,

    #[error("Ball id {0} outside 0..=21")]
    BallIdOutOfRange(u8),
}
