//! Weighted consistent-hash placement for Stow.
//!
//! The router treats placement as a black box: given the weight map of the
//! registered backends, produce a deterministic mapping from an arbitrary
//! hash string to one backend name. [`HashRing`] is the stock
//! implementation; hosts can supply their own through [`Placement`].
//!
//! Adding or removing a backend moves only the keys owned by that backend's
//! arcs of the ring. Keys elsewhere keep their placement.

pub mod ring;

pub use ring::{HashRing, Placement, MAX_WEIGHT, VIRTUAL_NODES_PER_WEIGHT};
