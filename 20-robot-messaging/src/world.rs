//! A minimal robot world that speaks the messaging protocol.
//!
//! This is the domain side of the handler seam: it keeps robot positions
//! and answers requests from peer processes. Kinematics, pathfinding and
//! collision checks live elsewhere. The world only stores where each robot
//! was last reported to be.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{PoisonError, RwLock},
};

use anyhow::Context;
use tracing::{debug, info};

use crate::{
    handler::{RequestHandler, ResponseHandler},
    message::{Message, MessageKind},
};

/// Robot whose position peers update through `UpdatePositionRequest`.
pub const REMOTE_ROBOT: &str = "Robot2";
pub const LOCAL_ROBOT: &str = "Robot";

const POSITION_DIGITS: usize = 4;
const POSITION_LEN: usize = POSITION_DIGITS * 2;
const UNHANDLED_BODY: &str = "unhandled request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

impl Point {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("position body must be 8 digits, got {0} bytes")]
    Length(usize),
    #[error("position body has a non-digit at offset {0}")]
    NotDigit(usize),
    #[error("coordinate {0} does not fit in 4 digits")]
    OutOfRange(u16),
}

/// Formats a position as `XXXXYYYY`, each coordinate zero-padded.
pub fn encode_position(point: Point) -> Result<String, PositionError> {
    let limit = 10u16.pow(POSITION_DIGITS as u32);
    for coordinate in [point.x, point.y] {
        if coordinate >= limit {
            return Err(PositionError::OutOfRange(coordinate));
        }
    }
    Ok(format!("{:04}{:04}", point.x, point.y))
}

pub fn decode_position(body: &[u8]) -> Result<Point, PositionError> {
    if body.len() != POSITION_LEN {
        return Err(PositionError::Length(body.len()));
    }
    if let Some(offset) = body.iter().position(|b| !b.is_ascii_digit()) {
        return Err(PositionError::NotDigit(offset));
    }

    let number = |digits: &[u8]| {
        digits
            .iter()
            .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'))
    };
    let (x, y) = body.split_at(POSITION_DIGITS);
    Ok(Point::new(number(x), number(y)))
}

/// Evenly spaced waypoints from `from` to `to`, both included.
pub fn straight_route(from: Point, to: Point, steps: usize) -> Vec<Point> {
    let steps = steps.max(1);
    let lerp = |a: u16, b: u16, i: usize| {
        let a = f64::from(a);
        let b = f64::from(b);
        (a + (b - a) * i as f64 / steps as f64).round() as u16
    };
    (0..=steps)
        .map(|i| Point::new(lerp(from.x, to.x, i), lerp(from.y, to.y, i)))
        .collect()
}

/// Robot positions keyed by name.
///
/// Shared by every session on the server's workers, hence the lock.
#[derive(Default)]
pub struct RobotWorld {
    robots: RwLock<BTreeMap<String, Point>>,
}

impl RobotWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the two robots a simulation starts with.
    pub fn populate(&self) {
        self.new_robot(LOCAL_ROBOT, Point::new(50, 50));
        self.new_robot(REMOTE_ROBOT, Point::new(50, 50));
    }

    pub fn unpopulate(&self) {
        self.robots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn new_robot(&self, name: &str, position: Point) {
        self.set_position(name, position);
    }

    pub fn set_position(&self, name: &str, position: Point) {
        self.robots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), position);
    }

    pub fn position_of(&self, name: &str) -> Option<Point> {
        self.robots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    pub fn robots(&self) -> BTreeMap<String, Point> {
        self.robots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RequestHandler for RobotWorld {
    fn handle_request(&self, request: Message) -> anyhow::Result<Message> {
        match request.kind() {
            MessageKind::EchoRequest => {
                info!(body = %request.body_text(), "echo request");
                let (_, body) = request.into_parts();
                Ok(Message::new(MessageKind::EchoResponse, body))
            }
            MessageKind::UpdatePositionRequest => {
                let position = decode_position(request.body())
                    .with_context(|| format!("bad position body {:?}", request.body_text()))?;
                info!(robot = REMOTE_ROBOT, %position, "position update");
                self.set_position(REMOTE_ROBOT, position);
                Ok(Message::new(MessageKind::UpdatePositionResponse, ""))
            }
            kind => {
                debug!(%kind, "no handler for request");
                Ok(Message::new(kind, UNHANDLED_BODY))
            }
        }
    }
}

impl ResponseHandler for RobotWorld {
    fn handle_response(&self, response: &Message) -> anyhow::Result<()> {
        match response.kind() {
            MessageKind::EchoResponse => info!(body = %response.body_text(), "echo response"),
            MessageKind::UpdatePositionResponse => debug!("position update acknowledged"),
            kind => info!(%kind, body = %response.body_text(), "unexpected response"),
        }
        Ok(())
    }
}
