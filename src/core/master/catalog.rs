//! Reference catalogs
//!
//! Display names and attributes used when a reference row is first created,
//! plus the text helpers shared by the writer.

use crate::domain::records::{normalize_code, FacilitySpec};
use crate::domain::reference::DisplayFields;

/// Natural code of the canonical default language
pub const ENGLISH_CODE: &str = "en";

/// Report type stored on every clinical report
pub const REPORT_TYPE: &str = "Radiology Report";

/// Maximum length of a stored report summary
pub const SUMMARY_MAX_CHARS: usize = 500;

const DIAGNOSIS_CATEGORIES: [(&str, &str); 13] = [
    ("normal", "Normal"),
    ("pneumonia", "Infectious"),
    ("edema", "Pulmonary"),
    ("cardiomegaly", "Cardiac"),
    ("effusion", "Pleural"),
    ("atelectasis", "Pulmonary"),
    ("consolidation", "Pulmonary"),
    ("pneumothorax", "Pleural"),
    ("nodule", "Mass"),
    ("mass", "Mass"),
    ("emphysema", "Chronic Pulmonary"),
    ("fibrosis", "Chronic Pulmonary"),
    ("pleural_thickening", "Pleural"),
];

const PROJECTIONS: [(&str, &str, &str); 4] = [
    ("PA", "Posteroanterior", "Frontal PA chest projection"),
    ("AP", "Anteroposterior", "Frontal AP projection"),
    ("LATERAL", "Lateral", "Side lateral projection"),
    ("OBLIQUE", "Oblique", "Oblique angle projection"),
];

const MODALITIES: [(&str, &str); 4] = [
    ("DX", "Digital Radiography"),
    ("CR", "Computed Radiography"),
    ("RF", "Radiofluoroscopy"),
    ("DR", "Direct Radiography"),
];

const LANGUAGES: [(&str, &str); 4] = [
    ("en", "English"),
    ("fr", "French"),
    ("rw", "Kinyarwanda"),
    ("sw", "Swahili"),
];

/// Anatomical region description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub code: &'static str,
    pub name: &'static str,
    pub body_system: &'static str,
}

/// Region used when no label matches
pub const DEFAULT_REGION: Region = Region {
    code: "thorax",
    name: "Thoracic Cavity",
    body_system: "Respiratory",
};

const REGION_KEYWORDS: [(&str, Region); 6] = [
    (
        "cardio",
        Region {
            code: "cardiac",
            name: "Cardiac Region",
            body_system: "Cardiovascular",
        },
    ),
    (
        "pleur",
        Region {
            code: "pleural",
            name: "Pleural Space",
            body_system: "Respiratory",
        },
    ),
    (
        "lung",
        Region {
            code: "lung",
            name: "Lung Parenchyma",
            body_system: "Respiratory",
        },
    ),
    (
        "nodule",
        Region {
            code: "pulmonary_mass",
            name: "Pulmonary Mass Region",
            body_system: "Respiratory",
        },
    ),
    (
        "mass",
        Region {
            code: "pulmonary_mass",
            name: "Pulmonary Mass Region",
            body_system: "Respiratory",
        },
    ),
    (
        "fibrosis",
        Region {
            code: "fibrotic",
            name: "Fibrotic Tissue",
            body_system: "Respiratory",
        },
    ),
];

/// Category of a diagnosis by its name
pub fn diagnosis_category(name: &str) -> &'static str {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return "Unspecified";
    }
    DIAGNOSIS_CATEGORIES
        .iter()
        .find(|(label, _)| *label == key)
        .map(|(_, category)| *category)
        .unwrap_or("Other")
}

/// First region whose keyword occurs in the joined diagnosis labels
pub fn infer_region(label_text: &str) -> Region {
    let lower = label_text.to_lowercase();
    REGION_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, region)| *region)
        .unwrap_or(DEFAULT_REGION)
}

/// Normalised projection code (upper case)
pub fn projection_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Normalised modality code (upper case)
pub fn modality_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Normalised language code (lower case)
pub fn language_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Normalised region code (lower case, 50 chars)
pub fn region_code(code: &str) -> String {
    normalize_code(code)
}

pub fn facility_display(facility: &FacilitySpec) -> DisplayFields {
    let mut display = DisplayFields::named(facility.name.trim());
    if let Some(location) = &facility.location {
        display = display.with_attribute("location", location.as_str());
    }
    if let Some(kind) = &facility.facility_type {
        display = display.with_attribute("facility_type", kind.as_str());
    }
    display
}

pub fn modality_display(code: &str) -> DisplayFields {
    let code = modality_code(code);
    let name = MODALITIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("Modality {code}"));
    DisplayFields::named(name)
}

pub fn projection_display(code: &str) -> DisplayFields {
    let code = projection_code(code);
    match PROJECTIONS.iter().find(|(c, _, _)| *c == code) {
        Some((_, name, description)) => {
            DisplayFields::named(*name).with_attribute("description", *description)
        }
        None => DisplayFields::named(code.as_str())
            .with_attribute("description", format!("{code} projection")),
    }
}

pub fn region_display(region: &Region) -> DisplayFields {
    DisplayFields::named(region.name).with_attribute("body_system", region.body_system)
}

/// Display fields for an explicitly supplied region code
pub fn region_display_for_code(code: &str) -> DisplayFields {
    let code = region_code(code);
    REGION_KEYWORDS
        .iter()
        .map(|(_, region)| region)
        .chain(std::iter::once(&DEFAULT_REGION))
        .find(|region| region.code == code)
        .map(region_display)
        .unwrap_or_else(|| DisplayFields::named(code.as_str()))
}

pub fn language_display(code: &str) -> DisplayFields {
    let code = language_code(code);
    let name = LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| code.to_uppercase());
    DisplayFields::named(name)
}

pub fn diagnosis_display(name: &str) -> DisplayFields {
    DisplayFields::named(name.trim()).with_attribute("category", diagnosis_category(name))
}

/// Whitespace-separated word count
pub fn word_count(text: &str) -> i32 {
    i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
}

/// Report summary: trimmed text, cut with an ellipsis past [`SUMMARY_MAX_CHARS`]
pub fn summarize_text(text: &str) -> String {
    let clean = text.trim();
    if clean.chars().count() <= SUMMARY_MAX_CHARS {
        return clean.to_string();
    }
    let cut: String = clean.chars().take(SUMMARY_MAX_CHARS - 3).collect();
    format!("{cut}...")
}
