//! ProductSnapshot：从产品网页中提取的结构化信息
//!
//! 所有字段都可缺省（缺省为 null / 空列表），模型只需填写有证据支持的部分。
//! 字段上的文档注释会进入 JSON Schema 的 description，作为给模型的填写说明。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm::OutputSchema;

/// response_format 中的 schema 名
pub const PRODUCT_SNAPSHOT: &str = "ProductSnapshot";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContactInfo {
    /// Primary phone number for sales or inquiries
    pub phone_number: Option<String>,
    /// Official support or contact email
    pub support_email: Option<String>,
    /// Mailing address or headquarters address
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SocialProfile {
    /// Social network or community name
    pub platform: String,
    /// Full https URL to the profile
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProductSnapshot {
    pub product_name: Option<String>,
    pub company_name: Option<String>,
    pub website: Option<String>,
    /// Two to three paragraph summary capturing the product purpose
    pub overview: Option<String>,
    /// 500-700 word overview as specified in source instructions
    pub elevator_pitch: Option<String>,
    /// Summary of differentiators versus competitors
    pub competitive_advantage: Option<String>,
    /// One to two sentence description
    pub product_description_short: Option<String>,
    pub founding_year: Option<i32>,
    pub hq_location: Option<String>,
    pub industry: Vec<String>,
    pub parent_category: Option<String>,
    pub sub_category: Option<String>,
    pub contact: ContactInfo,
    pub social_links: Vec<SocialProfile>,
}

impl ProductSnapshot {
    pub fn output_schema(strict: bool) -> OutputSchema {
        OutputSchema::for_type::<ProductSnapshot>(PRODUCT_SNAPSHOT).with_strict(strict)
    }
}
