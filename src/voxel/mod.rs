//! Sparse voxel storage
//!
//! Blocks, the pre-allocated pool, the spatial hash table over it, and the
//! adaptive resolution policy. Ownership is strictly layered: the pool
//! owns all voxel storage, the table holds indices into it, and everything
//! above reads blocks through the table.

mod block;
mod pool;
pub mod resolution;
mod table;

pub use block::{voxel_index, BlockIndex, Voxel, VoxelBlock};
pub use pool::BlockPool;
pub use table::BlockTable;
