pub mod accel;
pub mod aabb;
pub mod alloc;
pub mod build;
pub mod bvh;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod node;
pub mod primitives;
pub mod primref;
pub mod ray;
pub mod settings;
pub mod traverse;

pub use accel::*;
pub use aabb::*;
pub use self::alloc::*;
pub use build::*;
pub use bvh::*;
pub use error::*;
pub use frame::*;
pub use geometry::*;
pub use node::NodeRef;
pub use primitives::{Bezier1, LeafPrimitive, QueryContext, Triangle1, Triangle4};
pub use primref::*;
pub use ray::*;
pub use settings::*;
