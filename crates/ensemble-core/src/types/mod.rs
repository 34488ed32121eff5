//! Runtime values, datatype descriptors and entity schemas

pub mod datatype;
pub mod entity;
pub mod value;

pub use datatype::DataType;
pub use entity::EntitySchema;
pub use value::Value;
