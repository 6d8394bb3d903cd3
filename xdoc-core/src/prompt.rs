//! Audience-specific prompt templates. Everything here is pure.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::str::FromStr;

use crate::attribution::{Attribution, FeatureAttribution};
use crate::error::XdocError;
use crate::preprocess::RawValue;
use crate::schema::DiseaseSchema;

/// Appended verbatim to every patient explanation request.
pub const PATIENT_DISCLAIMER: &str = "This explanation is generated automatically from a statistical model and is not a medical diagnosis. Please discuss these results with your doctor before making any decisions about your health or treatment.";

/// Number of factors a patient prompt mentions.
pub const PATIENT_TOP_FACTORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Doctor,
    #[default]
    Patient,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Doctor => "doctor",
            Audience::Patient => "patient",
        }
    }

    /// System instruction handed to the text generator.
    pub fn persona(&self) -> &'static str {
        match self {
            Audience::Doctor => {
                "You are a clinical decision-support assistant writing for physicians. \
                 Be precise and concise, use standard clinical terminology, and never \
                 overstate the certainty of a model output."
            }
            Audience::Patient => {
                "You are a caring health educator explaining test results to a patient. \
                 Use plain, reassuring language, avoid jargon, and never give a diagnosis \
                 or prescribe treatment."
            }
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = XdocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "doctor" => Ok(Audience::Doctor),
            "patient" => Ok(Audience::Patient),
            _ => Err(XdocError::InvalidAudience(s.to_string())),
        }
    }
}

/// Everything a template needs about one prediction.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub schema: &'a DiseaseSchema,
    pub label: &'a str,
    pub confidence: f64,
    pub probabilities: &'a [f64],
    pub attribution: &'a Attribution,
}

pub fn build_prompt(audience: Audience, input: &PromptInput<'_>) -> String {
    match audience {
        Audience::Doctor => doctor_prompt(input),
        Audience::Patient => patient_prompt(input),
    }
}

fn display_name(schema: &DiseaseSchema, factor: &FeatureAttribution) -> (&'static str, Option<&'static str>) {
    match schema.position(&factor.feature) {
        Some(idx) => {
            let spec = &schema.features[idx];
            (spec.label, spec.unit())
        }
        None => ("unknown feature", None),
    }
}

/// ` [high, reference 4-5.6 %]` for numeric markers with a reference range.
fn reference_note(schema: &DiseaseSchema, factor: &FeatureAttribution) -> String {
    let spec = schema.position(&factor.feature).map(|idx| &schema.features[idx]);
    match (spec, &factor.raw_value) {
        (Some(spec), RawValue::Number(value)) => match spec.reference {
            Some(range) => {
                let unit = spec.unit().map(|u| format!(" {u}")).unwrap_or_default();
                format!(
                    " [{}, reference {}-{}{unit}]",
                    range.status(*value).as_str(),
                    range.low,
                    range.high
                )
            }
            None => String::new(),
        },
        _ => String::new(),
    }
}

fn doctor_prompt(input: &PromptInput<'_>) -> String {
    let schema = input.schema;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Model: {} gradient-boosted classifier.",
        schema.disease
    );
    let _ = writeln!(
        out,
        "Predicted class: {} (confidence {:.1}%).",
        input.label,
        input.confidence * 100.0
    );
    let distribution: Vec<String> = input
        .probabilities
        .iter()
        .enumerate()
        .map(|(class, p)| format!("{} {:.1}%", schema.class_label(class), p * 100.0))
        .collect();
    let _ = writeln!(out, "Class probabilities: {}.", distribution.join(", "));
    let _ = writeln!(
        out,
        "SHAP base value {:+.3}, output margin {:+.3} (log-odds).",
        input.attribution.base_value, input.attribution.margin
    );
    out.push_str("\nFeature contributions, strongest first:\n");
    for factor in &input.attribution.features {
        let (label, unit) = display_name(schema, factor);
        let value = match unit {
            Some(unit) => format!("{} {unit}", factor.raw_value),
            None => factor.raw_value.to_string(),
        };
        let note = reference_note(schema, factor);
        let _ = writeln!(
            out,
            "- {label} ({}): {value}{note}; SHAP {:+.3}; {:.1}% of total",
            factor.feature, factor.attribution_value, factor.contribution_percent
        );
    }
    out.push_str(
        "\nWrite a short clinical interpretation for the treating physician: \
         summarize which findings drive the prediction and in which direction, \
         flag out-of-range values that warrant follow-up testing, and note any \
         contributions that look clinically implausible. Do not restate the table.",
    );
    out
}

fn patient_prompt(input: &PromptInput<'_>) -> String {
    let schema = input.schema;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "A computer model looked at a patient's {} check-up results and estimated \"{}\" \
         with about {:.0}% confidence.",
        schema.disease,
        input.label,
        input.confidence * 100.0
    );
    out.push_str("The results that mattered most were:\n");
    for factor in input.attribution.top(PATIENT_TOP_FACTORS) {
        let (label, unit) = display_name(schema, factor);
        let value = match unit {
            Some(unit) => format!("{} {unit}", factor.raw_value),
            None => factor.raw_value.to_string(),
        };
        let direction = if factor.attribution_value > 0.0 {
            "made this result more likely"
        } else if factor.attribution_value < 0.0 {
            "made this result less likely"
        } else {
            "had little effect"
        };
        let _ = writeln!(out, "- {label}: {value} ({direction})");
    }
    out.push_str(
        "\nExplain this to the patient in two or three short paragraphs of everyday \
         language. Be warm and honest, suggest general healthy habits where relevant, \
         and encourage them to talk to their doctor. Do not use numbers beyond the ones \
         listed above.\n",
    );
    let _ = write!(
        out,
        "End the explanation with this sentence exactly: \"{PATIENT_DISCLAIMER}\""
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::rank;
    use crate::schema::Disease;

    fn input_fixture() -> (Attribution, Vec<f64>) {
        let schema = Disease::Cardiovascular.schema();
        let raw: Vec<RawValue> = schema
            .features
            .iter()
            .enumerate()
            .map(|(i, _)| RawValue::Number(i as f64 + 1.0))
            .collect();
        let mut values = vec![0.0; schema.len()];
        values[0] = 0.9;
        values[2] = -0.4;
        values[8] = 0.2;
        values[16] = 0.1;
        let attribution = Attribution {
            class: 1,
            base_value: -0.3,
            margin: 0.5,
            features: rank(schema, &raw, &values),
        };
        (attribution, vec![0.35, 0.65])
    }

    #[test]
    fn audience_parsing_is_case_insensitive_and_closed() {
        assert_eq!("Doctor".parse::<Audience>().unwrap(), Audience::Doctor);
        assert_eq!(" patient ".parse::<Audience>().unwrap(), Audience::Patient);
        assert!(matches!(
            "nurse".parse::<Audience>(),
            Err(XdocError::InvalidAudience(a)) if a == "nurse"
        ));
    }

    #[test]
    fn doctor_prompt_lists_every_feature() {
        let (attribution, probabilities) = input_fixture();
        let input = PromptInput {
            schema: Disease::Cardiovascular.schema(),
            label: "High Risk",
            confidence: 0.65,
            probabilities: &probabilities,
            attribution: &attribution,
        };
        let prompt = build_prompt(Audience::Doctor, &input);
        for name in input.schema.feature_names() {
            assert!(prompt.contains(&format!("({name})")), "missing {name}");
        }
        assert!(prompt.contains("High Risk (confidence 65.0%)"));
        assert!(!prompt.contains(PATIENT_DISCLAIMER));
    }

    #[test]
    fn doctor_prompt_flags_values_against_reference_ranges() {
        let (attribution, probabilities) = input_fixture();
        let input = PromptInput {
            schema: Disease::Cardiovascular.schema(),
            label: "High Risk",
            confidence: 0.65,
            probabilities: &probabilities,
            attribution: &attribution,
        };
        let prompt = build_prompt(Audience::Doctor, &input);
        assert!(prompt.contains("(blood_pressure): 3 mmHg [low, reference 90-120 mmHg]; SHAP -0.400"));
        assert!(prompt.contains("(triglyceride_level): 17 mg/dL [normal, reference 0-150 mg/dL]"));
        assert!(prompt.contains("(age): 1 years; SHAP +0.900"));
        assert!(prompt.contains("(gender): 2; SHAP"));
    }

    #[test]
    fn patient_prompt_has_top_factors_and_disclaimer() {
        let (attribution, probabilities) = input_fixture();
        let input = PromptInput {
            schema: Disease::Cardiovascular.schema(),
            label: "High Risk",
            confidence: 0.65,
            probabilities: &probabilities,
            attribution: &attribution,
        };
        let prompt = build_prompt(Audience::Patient, &input);
        assert!(prompt.contains(PATIENT_DISCLAIMER));
        assert!(prompt.contains("- Age: 1 years (made this result more likely)"));
        assert!(prompt.contains("- Systolic blood pressure: 3 mmHg (made this result less likely)"));
        assert!(!prompt.contains("Triglyceride"));
        assert_eq!(prompt.matches("\n- ").count(), PATIENT_TOP_FACTORS);
    }

    #[test]
    fn prompts_are_deterministic() {
        let (attribution, probabilities) = input_fixture();
        let input = PromptInput {
            schema: Disease::Cardiovascular.schema(),
            label: "High Risk",
            confidence: 0.65,
            probabilities: &probabilities,
            attribution: &attribution,
        };
        for audience in [Audience::Doctor, Audience::Patient] {
            assert_eq!(build_prompt(audience, &input), build_prompt(audience, &input));
        }
    }
}
