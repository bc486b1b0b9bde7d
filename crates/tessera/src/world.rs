//! World coordinates, scheduling owners, and the host entity interface
//!
//! Regions are addressed by chunk coordinate: a block at `(x, z)` lives in
//! chunk `(x >> 4, z >> 4)`. Every region-scheduler overload normalizes to a
//! [`Chunk`], so a location, the block at that location, and the chunk that
//! contains it all denote the same binding.

use crate::error::TeleportError;
use std::fmt;
use std::sync::Arc;

/// Bits shifted off a block coordinate to obtain its chunk coordinate
pub const CHUNK_SHIFT: u32 = 4;

/// Convert a block coordinate into a chunk coordinate
#[inline]
pub fn block_to_chunk(coord: i32) -> i32 {
    coord >> CHUNK_SHIFT
}

/// The plugin (or process) on whose behalf tasks are scheduled
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Owner(Arc<str>);

impl Owner {
    /// Create an owner identity
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Owner(name.into())
    }

    /// Name of this owner
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Owner({})", self.0)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named world (dimension) on the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct World(Arc<str>);

impl World {
    /// Create a world reference by name
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        World(name.into())
    }

    /// Name of this world
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// A precise position inside a world
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// World this location belongs to
    pub world: World,
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Location {
    /// Create a location
    pub fn new(world: World, x: f64, y: f64, z: f64) -> Self {
        Self { world, x, y, z }
    }

    /// X coordinate of the block containing this location
    pub fn block_x(&self) -> i32 {
        self.x.floor() as i32
    }

    /// Y coordinate of the block containing this location
    pub fn block_y(&self) -> i32 {
        self.y.floor() as i32
    }

    /// Z coordinate of the block containing this location
    pub fn block_z(&self) -> i32 {
        self.z.floor() as i32
    }

    /// The block containing this location
    pub fn block(&self) -> Block {
        Block::new(
            self.world.clone(),
            self.block_x(),
            self.block_y(),
            self.block_z(),
        )
    }

    /// The chunk containing this location
    pub fn chunk(&self) -> Chunk {
        Chunk::new(
            self.world.clone(),
            block_to_chunk(self.block_x()),
            block_to_chunk(self.block_z()),
        )
    }
}

/// An integer block position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    /// World this block belongs to
    pub world: World,
    /// Block X
    pub x: i32,
    /// Block Y
    pub y: i32,
    /// Block Z
    pub z: i32,
}

impl Block {
    /// Create a block position
    pub fn new(world: World, x: i32, y: i32, z: i32) -> Self {
        Self { world, x, y, z }
    }

    /// The chunk containing this block
    pub fn chunk(&self) -> Chunk {
        Chunk::new(self.world.clone(), block_to_chunk(self.x), block_to_chunk(self.z))
    }

    /// The location of this block's minimum corner
    pub fn location(&self) -> Location {
        Location::new(
            self.world.clone(),
            f64::from(self.x),
            f64::from(self.y),
            f64::from(self.z),
        )
    }
}

/// A chunk coordinate; the key every region binding is addressed by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// World this chunk belongs to
    pub world: World,
    /// Chunk X
    pub x: i32,
    /// Chunk Z
    pub z: i32,
}

impl Chunk {
    /// Create a chunk coordinate
    pub fn new(world: World, x: i32, z: i32) -> Self {
        Self { world, x, z }
    }
}

/// Why an entity is being teleported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TeleportCause {
    /// Teleported by plugin code
    #[default]
    Plugin,
    /// Teleported by a command
    Command,
    /// Teleported by an ender pearl
    EnderPearl,
    /// Moved through a portal
    Portal,
    /// Spectator teleport
    Spectate,
    /// Any other cause
    Unknown,
}

/// Unique identifier of a host entity
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// An entity living in a host world
///
/// Entities may be removed at any moment, from any thread. Once
/// [`is_valid`](Entity::is_valid) reports `false` it never reports `true` again.
pub trait Entity: Send + Sync + fmt::Debug {
    /// Stable identifier of this entity
    fn id(&self) -> EntityId;

    /// Whether the entity still exists in its world
    fn is_valid(&self) -> bool;

    /// Current position
    fn location(&self) -> Location;

    /// Move the entity synchronously. Must be called from the thread that
    /// owns the entity.
    fn teleport(&self, location: &Location, cause: TeleportCause) -> Result<(), TeleportError>;
}

/// Shared reference to a host entity
pub type EntityRef = Arc<dyn Entity>;

/// The subject of an "owned by the current region" query
#[derive(Debug, Clone, Copy)]
pub enum OwnershipTarget<'a> {
    /// A location and every chunk within `radius` chunks (Chebyshev distance)
    Location {
        /// Center location
        location: &'a Location,
        /// Square radius in chunks
        radius: u32,
    },
    /// A chunk and every chunk within `radius` chunks (Chebyshev distance)
    Chunk {
        /// World of the chunk
        world: &'a World,
        /// Chunk X
        x: i32,
        /// Chunk Z
        z: i32,
        /// Square radius in chunks
        radius: u32,
    },
    /// The region the entity currently lives in
    Entity(&'a dyn Entity),
}
