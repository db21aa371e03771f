use serde::{Deserialize, Serialize};

use crate::pipeline::Validate;

pub const MIN_FIELD_CHARS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyInput {
    pub customer_segment_attributes: String,
    pub campaign_objectives: String,
}

impl StrategyInput {
    pub fn check(&self) -> Result<(), String> {
        for (field, value) in [
            ("customerSegmentAttributes", &self.customer_segment_attributes),
            ("campaignObjectives", &self.campaign_objectives),
        ] {
            if value.trim().chars().count() < MIN_FIELD_CHARS {
                return Err(format!(
                    "{field} must have at least {MIN_FIELD_CHARS} characters"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOutput {
    pub marketing_strategies: Vec<String>,
}

impl Validate for StrategyOutput {
    fn validate(&self) -> Result<(), String> {
        if self.marketing_strategies.is_empty() {
            return Err("at least one marketing strategy is required".into());
        }
        if self.marketing_strategies.iter().any(|s| s.trim().is_empty()) {
            return Err("marketing strategies must not be blank".into());
        }
        Ok(())
    }
}
