use crate::pipeline::PromptTemplate;

use super::dto::{SegmentationInput, SegmentationOutput};

const OUTPUT_SCHEMA: &str = r#"{
  "textualInsights": "string",
  "segments": [
    {
      "name": "string",
      "size": "integer",
      "avg_purchase_value": "number",
      "purchase_frequency": "number",
      "description": "string"
    }
  ]
}"#;

impl PromptTemplate for SegmentationInput {
    type Output = SegmentationOutput;

    fn render(&self, language: &str) -> String {
        let treatment = &self.data_treatment;
        format!(
            "You are an expert marketing analyst. Your answer MUST be written in {language} \
and MUST be a single valid JSON object matching the schema below.

Analyse the characteristics of the customer data sample provided. Based on this sample, \
identify exactly {clusters} potential market segments.

Apply the following data treatments before the analysis:
- Normalize data: {normalize}
- Exclude nulls: {exclude_nulls}
- Group categories: {group_categories}

For each segment:
1. Give it a descriptive name.
2. Estimate the segment size (number of customers).
3. Estimate the average purchase value.
4. Estimate the purchase frequency.
5. Write a short summary of the segment's main attributes and needs.

Finally, provide one combined textual summary of all segments in the field 'textualInsights'.

Estimates must follow logically from the sample data.

Customer data sample (CSV):
{data}

Expected JSON schema (use it only as a guide for the structure, do not include it in the answer):
{OUTPUT_SCHEMA}
",
            clusters = self.number_of_clusters,
            normalize = treatment.normalize,
            exclude_nulls = treatment.exclude_nulls,
            group_categories = treatment.group_categories,
            data = self.cluster_data,
        )
    }
}
