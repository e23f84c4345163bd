//! Coding systems, profiles and the per-field observation table.
//!
//! The table is the domain knowledge of the encoder: one entry per lab field,
//! in `LabRecord` declaration order. That order becomes the order of the
//! observations in every bundle, so entries must not be reordered.

use crate::models::{LabRecord, ReportedValue};

/// FHIR coding system URLs
pub mod systems {
    pub const LOINC: &str = "http://loinc.org";
    pub const LABCODES: &str = "http://www.labcodes.de/codesystem/1.0";
    pub const UCUM: &str = "http://unitsofmeasure.org";
    pub const IDENTIFIER_TYPE: &str = "http://terminology.hl7.org/CodeSystem/v2-0203";
    pub const DIAGNOSTIC_SERVICE_SECTION: &str = "http://terminology.hl7.org/CodeSystem/v2-0074";
    pub const OBSERVATION_CATEGORY: &str =
        "http://terminology.hl7.org/CodeSystem/observation-category";
}

/// Medizininformatik-Initiative laboratory module profiles
pub mod profiles {
    pub const OBSERVATION_LAB: &str =
        "https://www.medizininformatik-initiative.de/fhir/core/modul-labor/StructureDefinition/ObservationLab";
    pub const DIAGNOSTIC_REPORT_LAB: &str =
        "https://www.medizininformatik-initiative.de/fhir/core/modul-labor/StructureDefinition/DiagnosticReportLab";
    pub const CLINICAL_REFERENCE_DATE: &str =
        "https://www.medizininformatik-initiative.de/fhir/core/modul-labor/StructureDefinition/QuelleKlinischesBezugsdatum";
}

/// Identifier systems minted by this encoder
pub mod namespaces {
    pub const OBSERVATION: &str = "Observation/";
    pub const REPORT: &str = "urn:lab-bundle:report";
    pub const ORDER: &str = "urn:lab-bundle:order";
}

pub const LAB_STUDIES_CODE: &str = "26436-6";
pub const LAB_REPORT_CODE: &str = "11502-2";

/// Coding and unit for one lab field.
#[derive(Clone, Copy)]
pub struct ObservationSpec {
    /// `LabRecord` JSON key; also the prefix of the observation identifier.
    pub field: &'static str,
    pub system: &'static str,
    pub code: &'static str,
    pub display: &'static str,
    pub unit: &'static str,
    pub unit_system: &'static str,
    value: fn(&LabRecord) -> Option<&ReportedValue>,
}

impl std::fmt::Debug for ObservationSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationSpec")
            .field("field", &self.field)
            .field("system", &self.system)
            .field("code", &self.code)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

impl ObservationSpec {
    /// The record's value for this field, if one was reported.
    pub fn value_in<'a>(&self, record: &'a LabRecord) -> Option<&'a ReportedValue> {
        (self.value)(record)
    }
}

const fn loinc(
    field: &'static str,
    code: &'static str,
    display: &'static str,
    unit: &'static str,
    value: fn(&LabRecord) -> Option<&ReportedValue>,
) -> ObservationSpec {
    ObservationSpec {
        field,
        system: systems::LOINC,
        code,
        display,
        unit,
        unit_system: systems::UCUM,
        value,
    }
}

const fn labcode(
    field: &'static str,
    code: &'static str,
    display: &'static str,
    unit: &'static str,
    value: fn(&LabRecord) -> Option<&ReportedValue>,
) -> ObservationSpec {
    ObservationSpec {
        field,
        system: systems::LABCODES,
        code,
        display,
        unit,
        unit_system: systems::UCUM,
        value,
    }
}

pub static OBSERVATION_SPECS: [ObservationSpec; 36] = [
    loinc("erythrocytes", "26453-1", "Erythrocytes", "10*6/µl", |r| r.erythrocytes.as_ref()),
    loinc("hemoglobin", "718-7", "Hemoglobin", "g/dl", |r| r.hemoglobin.as_ref()),
    loinc("hbeMch", "785-6", "MCH", "pg", |r| r.hbe_mch.as_ref()),
    loinc("mcv", "787-2", "MCV", "fl", |r| r.mcv.as_ref()),
    loinc("hematocrit", "20570-8", "Hematocrit", "%", |r| r.hematocrit.as_ref()),
    loinc("mchc", "786-4", "MCHC", "g/dl", |r| r.mchc.as_ref()),
    loinc("rdwEry", "788-0", "RDW", "%", |r| r.rdw_ery.as_ref()),
    loinc("platelets", "777-3", "Platelets", "10*3/µl", |r| r.platelets.as_ref()),
    loinc("leukocytes", "6690-2", "Leukocytes", "10*3/µl", |r| r.leukocytes.as_ref()),
    labcode("gotAst", "AST", "GOT (AST)", "U/l", |r| r.got_ast.as_ref()),
    labcode("gptAlt", "ALT", "GPT (ALT)", "U/l", |r| r.gpt_alt.as_ref()),
    labcode("gammaGt", "GGT", "Gamma-GT", "U/l", |r| r.gamma_gt.as_ref()),
    labcode("bilirubin", "BIL", "Bilirubin", "mg/dl", |r| r.bilirubin.as_ref()),
    labcode("amylase", "AMY", "Amylase", "U/l", |r| r.amylase.as_ref()),
    labcode("sodium", "NA", "Sodium", "mmol/l", |r| r.sodium.as_ref()),
    labcode("potassium", "K", "Potassium", "mmol/l", |r| r.potassium.as_ref()),
    loinc("glucose", "2345-7", "Glucose", "mg/dl", |r| r.glucose.as_ref()),
    labcode("hbA1cAbsolute", "HBA1C", "HbA1c", "%", |r| r.hb_a1c_absolute.as_ref()),
    labcode("hbA1cRelative", "HBA1C", "HbA1c (IFCC)", "mmol/mol", |r| r.hb_a1c_relative.as_ref()),
    loinc("cholesterol", "2093-3", "Cholesterol", "mg/dl", |r| r.cholesterol.as_ref()),
    loinc("triglycerides", "2571-8", "Triglycerides", "mg/dl", |r| r.triglycerides.as_ref()),
    loinc("hdlCholesterol", "2085-9", "HDL cholesterol", "mg/dl", |r| r.hdl_cholesterol.as_ref()),
    loinc("ldlCholesterol", "18262-6", "LDL cholesterol", "mg/dl", |r| r.ldl_cholesterol.as_ref()),
    labcode("tshBasal", "TSH", "TSH basal", "mU/l", |r| r.tsh_basal.as_ref()),
    loinc("creatinine", "2160-0", "Creatinine", "mg/dl", |r| r.creatinine.as_ref()),
    labcode("gfr2005", "GFR", "eGFR (MDRD 2005)", "ml/min/1.73m2", |r| r.gfr2005.as_ref()),
    labcode("gfr2009", "GFR", "eGFR (CKD-EPI 2009)", "ml/min/1.73m2", |r| r.gfr2009.as_ref()),
    loinc("urea", "2161-8", "Urea", "mg/dl", |r| r.urea.as_ref()),
    loinc("uricAcid", "3084-1", "Uric acid", "mg/dl", |r| r.uric_acid.as_ref()),
    labcode("iron", "FE", "Iron", "µg/dl", |r| r.iron.as_ref()),
    labcode("ferritin", "FER", "Ferritin", "ng/ml", |r| r.ferritin.as_ref()),
    labcode("crp", "CRP", "C-reactive protein", "mg/l", |r| r.crp.as_ref()),
    loinc("vitaminD3", "1989-3", "Vitamin D3 (25-OH)", "ng/ml", |r| r.vitamin_d3.as_ref()),
    loinc("vitaminB12", "6768-6", "Vitamin B12", "pg/ml", |r| r.vitamin_b12.as_ref()),
    loinc("folicAcid", "6769-4", "Folic acid", "ng/ml", |r| r.folic_acid.as_ref()),
    loinc("nonHdlCholesterol", "35200-5", "Non-HDL cholesterol", "mg/dl", |r| r.non_hdl_cholesterol.as_ref()),
];

/// Look up the table entry for a `LabRecord` JSON key.
pub fn spec_for(field: &str) -> Option<&'static ObservationSpec> {
    OBSERVATION_SPECS.iter().find(|spec| spec.field == field)
}
