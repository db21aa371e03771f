use crate::pipeline::PromptTemplate;

use super::dto::{StrategyInput, StrategyOutput};

impl PromptTemplate for StrategyInput {
    type Output = StrategyOutput;

    fn render(&self, language: &str) -> String {
        format!(
            "You are an expert marketing strategist. Your answer MUST be written in {language} \
and MUST be a single valid JSON object matching the schema below.

Based on the description of the customer segment and the campaign objectives, generate \
personalized marketing strategies. Return them as an array of strings in the field \
'marketingStrategies'.

Customer segment attributes: {attributes}
Campaign objectives: {objectives}

Expected JSON schema (use it only as a guide for the structure, do not include it in the answer):
{{
  \"marketingStrategies\": [\"string\"]
}}
",
            attributes = self.customer_segment_attributes,
            objectives = self.campaign_objectives,
        )
    }
}
