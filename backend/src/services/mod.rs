pub mod enhance;
pub mod imaging;
pub mod inference;
pub mod onnx;
pub mod region_blend;
pub mod tiling;
