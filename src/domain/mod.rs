pub mod entities;
pub mod lifecycle;
pub mod value_objects;
