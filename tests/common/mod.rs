//! Shared builders for the integration tests

#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use fake::faker::address::en::CityName;
use fake::faker::name::en::Name;
use fake::Fake;
use imaging_warehouse::adapters::memory::MemoryStore;
use imaging_warehouse::core::batch::{BatchController, EngineOptions};
use imaging_warehouse::core::state::StateManager;
use imaging_warehouse::domain::records::{
    DiagnosisSpec, EncounterRecord, EncounterSpec, FacilitySpec, FindingSpec, ImageSpec,
    PatientSpec, ProcedureSpec, ReportSpec,
};
use std::sync::Arc;

/// A complete record: one procedure with one image, report, finding and diagnosis
pub fn record(n: usize) -> EncounterRecord {
    EncounterRecord {
        patient: PatientSpec {
            patient_code: format!("PAT{n:06}"),
            sex: Some(if n % 2 == 0 { "F" } else { "M" }.to_string()),
            date_of_birth: NaiveDate::from_ymd_opt(1967, 3, 18),
            reported_age: Some((18..90).fake()),
            height_cm: Some((150..200).fake()),
            weight_kg: Some((45..120).fake()),
            geographic_location: Some(CityName().fake()),
            is_synthetic: true,
        },
        facility: FacilitySpec {
            code: Some("TEACHING_HOSPITAL".to_string()),
            name: "Teaching Hospital".to_string(),
            location: Some(CityName().fake()),
            facility_type: Some("teaching".to_string()),
        },
        encounter: EncounterSpec {
            encounter_code: format!("ENC{n:06}"),
            encounter_at: Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap(),
            referring_physician: Some(Name().fake()),
            notes: None,
            procedures: vec![ProcedureSpec {
                modality_code: "RF".to_string(),
                projection_code: Some("PA".to_string()),
                technician_name: Some(Name().fake()),
                images: vec![ImageSpec {
                    image_code: format!("IMG{n:06}"),
                    path: format!("images/IMG{n:06}.png"),
                    study_id: None,
                }],
                report: Some(ReportSpec {
                    text: "No acute cardiopulmonary abnormality".to_string(),
                    language_code: None,
                    has_audio: false,
                    audio_language_code: None,
                    reviewed_by: None,
                    reviewed_at: None,
                }),
                findings: vec![FindingSpec {
                    findings_text: "Lungs are clear".to_string(),
                    impression_text: Some("Normal study".to_string()),
                    labels: vec!["normal".to_string()],
                    severity: None,
                    abnormality_detected: None,
                    confidence: 0.92,
                }],
                diagnoses: vec![DiagnosisSpec {
                    name: "Normal".to_string(),
                    confidence: 0.9,
                }],
                ..ProcedureSpec::default()
            }],
        },
    }
}

pub fn records(count: usize) -> Vec<EncounterRecord> {
    (0..count).map(record).collect()
}

pub fn state(store: &MemoryStore) -> Arc<StateManager> {
    Arc::new(StateManager::new_with_storage(Arc::new(store.clone())))
}

pub fn controller(store: &MemoryStore, options: EngineOptions) -> BatchController {
    BatchController::new(Arc::new(store.clone()), state(store), options)
}

pub fn options() -> EngineOptions {
    EngineOptions::default()
}
