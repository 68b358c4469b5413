//! Derived fact attributes
//!
//! Pure functions over a [`ProcedureGraph`]. Nothing here trusts values
//! stored on the input (such as a reported age); everything is recomputed
//! from the operational rows each time a fact is built.

use crate::domain::operational::{DiagnosisLinkRow, FindingRow, ProcedureGraph, Severity};
use chrono::{Datelike, NaiveDate};

const COMPLETENESS_WEIGHT: f64 = 0.6;
const CONFIDENCE_WEIGHT: f64 = 0.4;

/// Age in whole years on `on`, `None` without a birth date or when born after `on`
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use imaging_warehouse::core::analytics::derive::age_at;
///
/// let dob = NaiveDate::from_ymd_opt(1967, 3, 18);
/// let day_before = NaiveDate::from_ymd_opt(2024, 3, 17).unwrap();
/// assert_eq!(age_at(dob, day_before), Some(56));
/// ```
pub fn age_at(date_of_birth: Option<NaiveDate>, on: NaiveDate) -> Option<i32> {
    let dob = date_of_birth?;
    if dob > on {
        return None;
    }
    let mut years = on.year() - dob.year();
    if (on.month(), on.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    Some(years)
}

/// Any finding above Mild, or any finding flagged abnormal
pub fn is_abnormal(findings: &[FindingRow]) -> bool {
    findings
        .iter()
        .any(|f| f.severity > Severity::Mild || f.abnormality_detected)
}

/// Highest severity among the findings
pub fn max_severity(findings: &[FindingRow]) -> Option<Severity> {
    findings.iter().map(|f| f.severity).max()
}

/// Number of active diagnosis links
pub fn diagnosis_count(links: &[DiagnosisLinkRow]) -> i32 {
    let n = links.iter().filter(|l| l.is_active).count();
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Primary active diagnosis link, if any
pub fn primary_link(links: &[DiagnosisLinkRow]) -> Option<&DiagnosisLinkRow> {
    links
        .iter()
        .filter(|l| l.is_active)
        .find(|l| l.is_primary)
}

/// Share of the expected attributes present on the procedure subtree
pub fn completeness(graph: &ProcedureGraph) -> f64 {
    let checks = [
        graph.patient.sex.as_deref().is_some_and(|s| !s.trim().is_empty()),
        graph.patient.date_of_birth.is_some(),
        graph.procedure.projection_id.is_some(),
        graph.procedure.region_id.is_some(),
        !graph.images.is_empty(),
        !graph.reports.is_empty(),
        !graph.findings.is_empty(),
        diagnosis_count(&graph.links) > 0,
    ];
    let present = checks.iter().filter(|c| **c).count();
    present as f64 / checks.len() as f64
}

/// Weighted completeness and mean diagnosis confidence, clamped to [0,1]
pub fn quality_score(graph: &ProcedureGraph) -> f64 {
    let completeness = completeness(graph);
    let scored: Vec<f64> = graph
        .links
        .iter()
        .filter(|l| l.is_active)
        .map(|l| l.confidence)
        .collect();

    let score = if scored.is_empty() {
        completeness
    } else {
        let mean = scored.iter().sum::<f64>() / scored.len() as f64;
        COMPLETENESS_WEIGHT * completeness + CONFIDENCE_WEIGHT * mean
    };
    score.clamp(0.0, 1.0)
}

/// Word count summed over the procedure's reports
pub fn report_word_count(graph: &ProcedureGraph) -> i32 {
    graph.reports.iter().map(|r| r.word_count.max(0)).sum()
}

/// Number of images of the procedure
pub fn total_images(graph: &ProcedureGraph) -> i32 {
    i32::try_from(graph.images.len()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{
        ArtifactId, EncounterCode, EncounterId, PatientCode, PatientId, ProcedureId, ReferenceId,
    };
    use crate::domain::operational::{EncounterRow, ImageRow, PatientRow, ProcedureRow};
    use chrono::Utc;
    use test_case::test_case;

    fn finding(severity: Severity, abnormal: bool) -> FindingRow {
        FindingRow {
            id: ArtifactId::generate(),
            procedure_id: ProcedureId::generate(),
            findings_text: String::new(),
            impression_text: None,
            severity,
            abnormality_detected: abnormal,
            confidence: 0.5,
            created_at: Utc::now(),
        }
    }

    fn link(sequence: i32, confidence: f64, active: bool) -> DiagnosisLinkRow {
        DiagnosisLinkRow {
            id: ArtifactId::generate(),
            procedure_id: ProcedureId::generate(),
            diagnosis_id: ReferenceId::generate(),
            sequence,
            is_primary: sequence == 1,
            confidence,
            is_active: active,
            created_at: Utc::now(),
        }
    }

    fn bare_graph() -> ProcedureGraph {
        let now = Utc::now();
        let patient = PatientRow {
            id: PatientId::generate(),
            patient_code: PatientCode::new("PAT1").unwrap(),
            sex: None,
            date_of_birth: None,
            reported_age: None,
            height_cm: None,
            weight_kg: None,
            geographic_location: None,
            is_synthetic: false,
            first_encounter_date: None,
            last_encounter_date: None,
            total_encounters: 1,
            created_at: now,
            updated_at: now,
        };
        let encounter = EncounterRow {
            id: EncounterId::generate(),
            encounter_code: EncounterCode::new("E1").unwrap(),
            patient_id: patient.id,
            facility_id: ReferenceId::generate(),
            encounter_at: now,
            referring_physician: None,
            notes: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let procedure = ProcedureRow {
            id: ProcedureId::generate(),
            procedure_code: "E1-P1".to_string(),
            encounter_id: encounter.id,
            modality_id: ReferenceId::generate(),
            projection_id: None,
            region_id: None,
            procedure_at: now,
            technician_name: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        ProcedureGraph {
            procedure,
            encounter,
            patient,
            images: Vec::new(),
            reports: Vec::new(),
            findings: Vec::new(),
            links: Vec::new(),
        }
    }

    #[test_case((1967, 3, 18), (2024, 3, 18), Some(57) ; "on birthday")]
    #[test_case((1967, 3, 18), (2024, 3, 17), Some(56) ; "day before birthday")]
    #[test_case((2000, 2, 29), (2023, 2, 28), Some(22) ; "leap day birth")]
    #[test_case((2024, 5, 2), (2024, 5, 2), Some(0) ; "newborn")]
    #[test_case((2025, 1, 1), (2024, 5, 2), None ; "born after encounter")]
    fn test_age_at(dob: (i32, u32, u32), on: (i32, u32, u32), expected: Option<i32>) {
        let dob = NaiveDate::from_ymd_opt(dob.0, dob.1, dob.2);
        let on = NaiveDate::from_ymd_opt(on.0, on.1, on.2).unwrap();
        assert_eq!(age_at(dob, on), expected);
    }

    #[test]
    fn test_age_without_birth_date() {
        assert_eq!(age_at(None, Utc::now().date_naive()), None);
    }

    #[test_case(&[], false ; "no findings")]
    #[test_case(&[(Severity::Mild, false)], false ; "mild only")]
    #[test_case(&[(Severity::Normal, true)], true ; "flagged")]
    #[test_case(&[(Severity::Mild, false), (Severity::Moderate, false)], true ; "moderate")]
    fn test_is_abnormal(findings: &[(Severity, bool)], expected: bool) {
        let rows: Vec<_> = findings.iter().map(|(s, a)| finding(*s, *a)).collect();
        assert_eq!(is_abnormal(&rows), expected);
    }

    #[test]
    fn test_max_severity() {
        let rows = vec![
            finding(Severity::Mild, false),
            finding(Severity::Severe, false),
            finding(Severity::Moderate, false),
        ];
        assert_eq!(max_severity(&rows), Some(Severity::Severe));
        assert_eq!(max_severity(&[]), None);
    }

    #[test]
    fn test_diagnosis_count_ignores_inactive() {
        let links = vec![link(1, 0.9, true), link(2, 0.8, false), link(3, 0.7, true)];
        assert_eq!(diagnosis_count(&links), 2);
        assert_eq!(primary_link(&links).map(|l| l.sequence), Some(1));
    }

    #[test]
    fn test_completeness_of_bare_graph() {
        assert_eq!(completeness(&bare_graph()), 0.0);
        assert_eq!(quality_score(&bare_graph()), 0.0);
    }

    #[test]
    fn test_quality_score_weights_confidence() {
        let mut graph = bare_graph();
        graph.patient.sex = Some("F".to_string());
        graph.patient.date_of_birth = NaiveDate::from_ymd_opt(1967, 3, 18);
        graph.links = vec![link(1, 1.0, true), link(2, 0.5, true)];

        // 3 of 8 attributes present, mean confidence 0.75
        let expected = 0.6 * (3.0 / 8.0) + 0.4 * 0.75;
        assert!((quality_score(&graph) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_quality_score_stays_in_range() {
        let mut graph = bare_graph();
        graph.links = vec![link(1, 1.0, true)];
        graph.images.push(ImageRow {
            id: ArtifactId::generate(),
            procedure_id: graph.procedure.id,
            image_code: "IMG1".to_string(),
            filename: "a.png".to_string(),
            path: "a.png".to_string(),
            study_id: None,
            created_at: Utc::now(),
        });
        let score = quality_score(&graph);
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(total_images(&graph), 1);
    }
}
