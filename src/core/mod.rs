pub mod traits;
pub mod task;
pub mod sequence;
pub mod priority_queue;
/// basic std::sync types reexported here so that we can hook loom into them for
/// testing.
pub mod sync;
