pub mod classes;
pub mod core;
pub mod curriculum;
pub mod degrees;
pub mod sheet;
pub mod summary;
