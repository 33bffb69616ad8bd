use serde::{Deserialize, Serialize};
use std::fmt;


/// Chain coordinates are offset so moves near the origin never underflow on-chain
pub const POSITION_OFFSET: u32 = 1000;

/// Side length of the square world map, in tiles
pub const MAP_SIZE: u32 = 50;

/// Opaque identifier of an on-chain entity
///
/// Ids are derived from the model key the indexer stores the entity under:
/// the player's own record is keyed by account address, the player's token
/// by the numeric id held in that record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Derive an entity id from a single model key
    ///
    /// # Examples
    ///
    /// ```
    /// use emojiman::model::EntityId;
    ///
    /// assert_eq!(EntityId::from_key(42u64).as_str(), "0x2a");
    /// assert_eq!(EntityId::from_key("0x2A").as_str(), "0x2a");
    /// ```
    pub fn from_key(key: impl Into<EntityKey>) -> Self {
        match key.into() {
            EntityKey::Numeric(n) => Self(format!("{:#x}", n)),
            EntityKey::Address(addr) => Self(normalize_address(&addr)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Model key an entity id is derived from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityKey {
    Numeric(u64),
    Address(String),
}

impl From<u64> for EntityKey {
    fn from(n: u64) -> Self {
        EntityKey::Numeric(n)
    }
}

impl From<&str> for EntityKey {
    fn from(addr: &str) -> Self {
        EntityKey::Address(addr.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(addr: String) -> Self {
        EntityKey::Address(addr)
    }
}

/// Lowercase hex with a single 0x prefix and no leading zeros
fn normalize_address(addr: &str) -> String {
    let lower = addr.trim().to_ascii_lowercase();
    let digits = lower.strip_prefix("0x").unwrap_or(&lower);
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0x0".to_string()
    } else {
        format!("0x{}", trimmed)
    }
}

/// Attribute (model) names tracked per entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Attribute {
    Position,
    RpsType,
    Energy,
    PlayerAddress,
    PlayerId,
}

impl Attribute {
    /// Attributes synchronized for every token key
    pub const TOKEN_ATTRIBUTES: [Attribute; 4] = [
        Attribute::Position,
        Attribute::RpsType,
        Attribute::PlayerAddress,
        Attribute::Energy,
    ];

    /// Value reported for an attribute that was never observed
    pub fn default_value(self) -> AttributeValue {
        match self {
            Attribute::Position => AttributeValue::Position(Position::default()),
            Attribute::RpsType => AttributeValue::RpsType(RpsKind::default()),
            Attribute::Energy => AttributeValue::Energy(0),
            Attribute::PlayerAddress => AttributeValue::PlayerAddress(String::new()),
            Attribute::PlayerId => AttributeValue::PlayerId(0),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Attribute::Position => "Position",
            Attribute::RpsType => "RPSType",
            Attribute::Energy => "Energy",
            Attribute::PlayerAddress => "PlayerAddress",
            Attribute::PlayerId => "PlayerID",
        };
        f.write_str(name)
    }
}

/// Tile coordinates of a token
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Position one tile away in `direction`, or None if the move is invalid
    /// or would leave the coordinate space
    pub fn step(self, direction: Direction) -> Option<Position> {
        let (dx, dy) = direction.delta()?;
        Some(Position {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }

    /// Whether the tile lies on a map of `map_size` tiles starting at
    /// [`POSITION_OFFSET`]
    pub fn is_on_map(self, map_size: u32) -> bool {
        let range = POSITION_OFFSET..POSITION_OFFSET.saturating_add(map_size);
        range.contains(&self.x) && range.contains(&self.y)
    }
}

/// Token kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpsKind {
    #[default]
    Rock,
    Paper,
    Scissors,
}

impl RpsKind {
    pub const ALL: [RpsKind; 3] = [RpsKind::Rock, RpsKind::Paper, RpsKind::Scissors];

    /// Calldata ordinal
    pub fn ordinal(self) -> u64 {
        match self {
            RpsKind::Rock => 0,
            RpsKind::Paper => 1,
            RpsKind::Scissors => 2,
        }
    }

    pub fn from_ordinal(n: u64) -> Option<Self> {
        match n {
            0 => Some(RpsKind::Rock),
            1 => Some(RpsKind::Paper),
            2 => Some(RpsKind::Scissors),
            _ => None,
        }
    }
}

/// Move direction as sent to the `move` entrypoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Unknown,
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn ordinal(self) -> u64 {
        match self {
            Direction::Unknown => 0,
            Direction::Up => 1,
            Direction::Down => 2,
            Direction::Left => 3,
            Direction::Right => 4,
        }
    }

    pub fn from_ordinal(n: u64) -> Option<Self> {
        match n {
            0 => Some(Direction::Unknown),
            1 => Some(Direction::Up),
            2 => Some(Direction::Down),
            3 => Some(Direction::Left),
            4 => Some(Direction::Right),
            _ => None,
        }
    }

    /// (dx, dy) for one step; y grows downwards
    pub fn delta(self) -> Option<(i32, i32)> {
        match self {
            Direction::Unknown => None,
            Direction::Up => Some((0, -1)),
            Direction::Down => Some((0, 1)),
            Direction::Left => Some((-1, 0)),
            Direction::Right => Some((1, 0)),
        }
    }
}

/// Typed value of one attribute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", content = "value")]
pub enum AttributeValue {
    Position(Position),
    RpsType(RpsKind),
    Energy(u32),
    PlayerAddress(String),
    PlayerId(u64),
}

impl AttributeValue {
    /// Attribute this value belongs to
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeValue::Position(_) => Attribute::Position,
            AttributeValue::RpsType(_) => Attribute::RpsType,
            AttributeValue::Energy(_) => Attribute::Energy,
            AttributeValue::PlayerAddress(_) => Attribute::PlayerAddress,
            AttributeValue::PlayerId(_) => Attribute::PlayerId,
        }
    }

    pub fn as_position(&self) -> Option<Position> {
        match self {
            AttributeValue::Position(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_energy(&self) -> Option<u32> {
        match self {
            AttributeValue::Energy(amt) => Some(*amt),
            _ => None,
        }
    }

    pub fn as_rps(&self) -> Option<RpsKind> {
        match self {
            AttributeValue::RpsType(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn as_player_id(&self) -> Option<u64> {
        match self {
            AttributeValue::PlayerId(id) => Some(*id),
            _ => None,
        }
    }
}
