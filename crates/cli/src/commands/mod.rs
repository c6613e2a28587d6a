pub mod evaluate;
pub mod resize;
