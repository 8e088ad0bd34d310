//! Node plugin (spec §4.6): node40, the sole node-format implementation.
//!
//! Per the §9.2 redesign note the source's function-table-plus-discriminator
//! dispatch becomes a closed sum: `Node` has exactly one variant today
//! (`V40`), matched rather than virtually dispatched, with room to add a
//! sibling variant later without touching call sites that only use the
//! common contract below.

pub mod node40;

pub use node40::Node40;

use crate::device::Blk;
use crate::error::CoreError;
use crate::key::Key;

/// A position within a node: either a whole item, or a unit inside one
/// (spec GLOSSARY "Unit" / "Coord").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemPos {
    Item(usize),
    Unit(usize, usize),
}

impl ItemPos {
    pub fn item_index(&self) -> usize {
        match *self {
            ItemPos::Item(i) | ItemPos::Unit(i, _) => i,
        }
    }
}

/// `(node, position-in-node)`, addressed by block number so it stays valid
/// across cache eviction/reload (spec GLOSSARY "Coord").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    pub node: Blk,
    pub pos: ItemPos,
}

impl Coord {
    pub fn new(node: Blk, pos: ItemPos) -> Self {
        Coord { node, pos }
    }
}

/// The result of a node-level key lookup (spec §4.6.2 / §8.3 boundary
/// cases).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    pub found: bool,
    pub pos: usize,
}

/// A freshly-built item, handed to `insert`/`create`.
#[derive(Debug, Clone)]
pub struct ItemHint {
    pub key: Key,
    pub plugin_id: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    /// Move items from the tail of `self` into the head of the neighbor.
    ToRight,
    /// Move items from the head of `self` into the tail of the neighbor.
    ToLeft,
}

/// Level 1 = leaf, 2 = twig (extents live here), >2 = internal (spec
/// GLOSSARY).
pub type Level = u8;

pub const LEAF_LEVEL: Level = 1;
pub const TWIG_LEVEL: Level = 2;

pub fn is_leaf(level: Level) -> bool {
    level == LEAF_LEVEL
}

pub fn is_twig(level: Level) -> bool {
    level == TWIG_LEVEL
}

pub fn is_internal(level: Level) -> bool {
    level > TWIG_LEVEL
}

/// One registered node-format implementation (today: node40 alone).
#[derive(Debug)]
pub enum Node {
    V40(Node40),
}

impl Node {
    pub fn open(block: crate::device::Block) -> Result<Self, CoreError> {
        Ok(Node::V40(Node40::open(block)?))
    }

    pub fn create(block: crate::device::Block, level: Level) -> Self {
        Node::V40(Node40::create(block, level))
    }

    pub fn addr(&self) -> Blk {
        match self {
            Node::V40(n) => n.addr(),
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Node::V40(n) => n.level(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Node::V40(n) => n.count(),
        }
    }

    pub fn free_space(&self) -> usize {
        match self {
            Node::V40(n) => n.free_space(),
        }
    }

    pub fn as_v40(&self) -> &Node40 {
        match self {
            Node::V40(n) => n,
        }
    }

    pub fn as_v40_mut(&mut self) -> &mut Node40 {
        match self {
            Node::V40(n) => n,
        }
    }
}
