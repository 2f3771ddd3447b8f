pub mod contours;
pub mod descriptor;
pub mod normalize;
pub mod preprocessing;
pub mod projection;
pub mod segmentation;

pub use descriptor::{DESCRIPTOR_LEN, Descriptor, extract_descriptor};
pub use normalize::resize_and_center;
pub use preprocessing::{Preprocessed, preprocess};
pub use segmentation::segment_digits;
