mod transform;

pub use transform::sync_transforms;
