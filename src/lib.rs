pub mod codebook;
pub mod decoder;
pub mod errors;
pub mod filters;
pub mod output;
pub mod schemas;
pub mod stack;
pub mod tables;

pub use codebook::Codebook;
pub use decoder::{DecodedSpots, DecoderParams, PixelSpotDecoder};
pub use errors::DecodeError;
pub use stack::ImageStack;
