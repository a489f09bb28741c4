//! 最终结构化结果的目标类型

pub mod product;

pub use product::{ContactInfo, ProductSnapshot, SocialProfile, PRODUCT_SNAPSHOT};
