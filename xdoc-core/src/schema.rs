//! Ordered feature schemas for each supported disease model.
//!
//! The order of [`DiseaseSchema::features`] is the column order the fitted
//! preprocessing and model artifacts were trained with. Artifacts are checked
//! against it when they are loaded.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::XdocError;

/// Closed set of disease models served by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disease {
    Diabetes,
    Cardiovascular,
}

impl Disease {
    pub const ALL: [Disease; 2] = [Disease::Diabetes, Disease::Cardiovascular];

    pub fn as_str(&self) -> &'static str {
        match self {
            Disease::Diabetes => "diabetes",
            Disease::Cardiovascular => "cardiovascular",
        }
    }

    pub fn schema(&self) -> &'static DiseaseSchema {
        match self {
            Disease::Diabetes => &DIABETES_SCHEMA,
            Disease::Cardiovascular => &CARDIOVASCULAR_SCHEMA,
        }
    }
}

impl fmt::Display for Disease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disease {
    type Err = XdocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diabetes" => Ok(Disease::Diabetes),
            "cardiovascular" => Ok(Disease::Cardiovascular),
            _ => Err(XdocError::UnsupportedDisease(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Positive,
    NonNegative,
}

impl Constraint {
    pub fn admits(&self, value: f64) -> bool {
        match self {
            Constraint::Positive => value > 0.0,
            Constraint::NonNegative => value >= 0.0,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Constraint::Positive => "positive",
            Constraint::NonNegative => "non-negative",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric {
        constraint: Constraint,
        unit: &'static str,
    },
    Categorical {
        levels: &'static [&'static str],
    },
}

/// Adult reference interval of a lab marker or vital sign, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceRange {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStatus {
    Low,
    Normal,
    High,
}

impl MarkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerStatus::Low => "low",
            MarkerStatus::Normal => "normal",
            MarkerStatus::High => "high",
        }
    }
}

impl ReferenceRange {
    pub fn status(&self, value: f64) -> MarkerStatus {
        if value < self.low {
            MarkerStatus::Low
        } else if value > self.high {
            MarkerStatus::High
        } else {
            MarkerStatus::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSpec {
    /// Key expected in the incoming feature mapping.
    pub name: &'static str,
    /// Human readable name used in prompts.
    pub label: &'static str,
    pub kind: FeatureKind,
    pub reference: Option<ReferenceRange>,
}

impl FeatureSpec {
    const fn numeric(
        name: &'static str,
        label: &'static str,
        constraint: Constraint,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            label,
            kind: FeatureKind::Numeric { constraint, unit },
            reference: None,
        }
    }

    const fn normal(self, low: f64, high: f64) -> Self {
        Self {
            reference: Some(ReferenceRange { low, high }),
            ..self
        }
    }

    const fn categorical(
        name: &'static str,
        label: &'static str,
        levels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            label,
            kind: FeatureKind::Categorical { levels },
            reference: None,
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self.kind {
            FeatureKind::Numeric { unit, .. } if !unit.is_empty() => Some(unit),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DiseaseSchema {
    pub disease: Disease,
    pub features: &'static [FeatureSpec],
    /// Output class labels, indexed by class id.
    pub class_labels: &'static [&'static str],
}

impl DiseaseSchema {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.features.iter().map(|f| f.name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|f| f.name == name)
    }

    pub fn class_label(&self, class: usize) -> &'static str {
        self.class_labels.get(class).copied().unwrap_or("Unknown")
    }
}

use Constraint::{NonNegative, Positive};

const YES_NO: &[&str] = &["No", "Yes"];
const LOW_MEDIUM_HIGH: &[&str] = &["Low", "Medium", "High"];

pub static DIABETES_SCHEMA: DiseaseSchema = DiseaseSchema {
    disease: Disease::Diabetes,
    features: &[
        FeatureSpec::numeric("AGE", "Age", Positive, "years"),
        FeatureSpec::numeric("Urea", "Urea", Positive, "mg/dL").normal(7.0, 20.0),
        FeatureSpec::numeric("Cr", "Creatinine", Positive, "mg/dL").normal(0.6, 1.3),
        FeatureSpec::numeric("HbA1c", "HbA1c", Positive, "%").normal(4.0, 5.6),
        FeatureSpec::numeric("Chol", "Total cholesterol", Positive, "mg/dL").normal(125.0, 200.0),
        FeatureSpec::numeric("TG", "Triglycerides", Positive, "mg/dL").normal(0.0, 150.0),
        FeatureSpec::numeric("HDL", "HDL cholesterol", Positive, "mg/dL").normal(40.0, 60.0),
        FeatureSpec::numeric("LDL", "LDL cholesterol", Positive, "mg/dL").normal(0.0, 100.0),
        FeatureSpec::numeric("VLDL", "VLDL cholesterol", Positive, "mg/dL").normal(2.0, 30.0),
        FeatureSpec::numeric("BMI", "Body mass index", Positive, "kg/m²").normal(18.5, 24.9),
    ],
    class_labels: &["Non-Diabetic", "Pre-Diabetic", "Diabetic"],
};

pub static CARDIOVASCULAR_SCHEMA: DiseaseSchema = DiseaseSchema {
    disease: Disease::Cardiovascular,
    features: &[
        FeatureSpec::numeric("age", "Age", Positive, "years"),
        FeatureSpec::categorical("gender", "Gender", &["Male", "Female"]),
        FeatureSpec::numeric("blood_pressure", "Systolic blood pressure", Positive, "mmHg").normal(90.0, 120.0),
        FeatureSpec::numeric("cholesterol_level", "Total cholesterol", Positive, "mg/dL").normal(125.0, 200.0),
        FeatureSpec::categorical("exercise_habits", "Exercise habits", LOW_MEDIUM_HIGH),
        FeatureSpec::categorical("smoking", "Smoking", YES_NO),
        FeatureSpec::categorical("family_heart_disease", "Family history of heart disease", YES_NO),
        FeatureSpec::categorical("diabetes", "Diabetes", YES_NO),
        FeatureSpec::numeric("bmi", "Body mass index", Positive, "kg/m²").normal(18.5, 24.9),
        FeatureSpec::categorical("high_blood_pressure", "Diagnosed high blood pressure", YES_NO),
        FeatureSpec::categorical("low_hdl_cholesterol", "Low HDL cholesterol", YES_NO),
        FeatureSpec::categorical("high_ldl_cholesterol", "High LDL cholesterol", YES_NO),
        FeatureSpec::categorical("alcohol_consumption", "Alcohol consumption", LOW_MEDIUM_HIGH),
        FeatureSpec::categorical("stress_level", "Stress level", LOW_MEDIUM_HIGH),
        FeatureSpec::numeric("sleep_hours", "Sleep", NonNegative, "hours/day").normal(7.0, 9.0),
        FeatureSpec::categorical("sugar_consumption", "Sugar consumption", LOW_MEDIUM_HIGH),
        FeatureSpec::numeric("triglyceride_level", "Triglycerides", Positive, "mg/dL").normal(0.0, 150.0),
        FeatureSpec::numeric("fasting_blood_sugar", "Fasting blood sugar", Positive, "mg/dL").normal(70.0, 99.0),
        FeatureSpec::numeric("crp_level", "C-reactive protein", NonNegative, "mg/L").normal(0.0, 3.0),
        FeatureSpec::numeric("homocysteine_level", "Homocysteine", Positive, "µmol/L").normal(5.0, 15.0),
    ],
    class_labels: &["Low Risk", "High Risk"],
};
