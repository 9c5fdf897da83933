pub mod block;
pub mod load;
pub mod model;
