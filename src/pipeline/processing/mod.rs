// Pipeline processing: validation, normalization, rolling metrics, and export

pub mod export;
pub mod normalize;
pub mod quality_gate;
pub mod rolling;
