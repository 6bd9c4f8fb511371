pub mod common;
pub mod context;
pub mod device;
pub mod dims;
pub mod graph;
pub mod layout;
pub mod nameenv;
pub mod ops;
pub mod pprint;
pub mod primitives;
pub mod program;
pub mod shape;
pub mod tensor;
pub mod tensor_ops;
pub mod utils;
