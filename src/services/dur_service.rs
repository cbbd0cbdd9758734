/*!
 * Drug Utilization Review Service
 *
 * Pure decision logic: given a candidate drug and the patient's
 * clinical profile, produce the full alert set. No I/O, no clock, no
 * store access; the caller supplies everything, which keeps every rule
 * unit-testable.
 *
 * Rule families (evaluated independently, composable):
 * 1. Drug-drug interactions (curated table, fuzzy name matching)
 * 2. Duplicate therapy (shared therapeutic class)
 * 3. Allergies (direct + class cross-reactivity)
 * 4. Contraindications (per-drug condition table, with alternatives)
 * 5. Age alerts (pediatric restrictions, Beers criteria, fall risk)
 * 6. Renal adjustment (creatinine-clearance thresholds)
 * 7. Hepatic adjustment (escalates with impairment severity)
 * 8. Pregnancy / nursing (Category X non-overridable, Category D)
 * 9. Monitoring requirements (informational)
 *
 * Opioid dose alerts come from the MME computation; methadone uses
 * dose-banded conversion factors.
 */

use once_cell::sync::Lazy;
use strsim::normalized_damerau_levenshtein;
use uuid::Uuid;

use crate::models::dur::{DurAlert, DurCategory, DurPolicy, DurResult, DurSeverity};
use crate::models::patient::HepaticFunction;
use crate::models::user::Actor;
use crate::utils::errors::{EngineError, Result};
use crate::utils::validators::validate_override_reason;

/// A medication the patient is currently taking
#[derive(Debug, Clone)]
pub struct CurrentMedication {
    pub name: String,
    pub therapeutic_class: Option<String>,
}

impl CurrentMedication {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            therapeutic_class: None,
        }
    }
}

/// Everything the DUR check needs, assembled by the caller
#[derive(Debug, Clone)]
pub struct DurInput {
    pub drug_name: String,
    pub therapeutic_class: Option<String>,
    pub ndc: Option<String>,

    pub current_medications: Vec<CurrentMedication>,
    pub allergies: Vec<String>,
    pub conditions: Vec<String>,

    pub age: Option<i32>,
    pub pregnant: bool,
    pub nursing: bool,
    pub creatinine_clearance: Option<f64>,
    pub hepatic_function: HepaticFunction,

    pub quantity: f64,
    /// Strength per unit in mg
    pub strength_mg: f64,
    pub days_supply: i32,
    pub route: Option<String>,
}

impl DurInput {
    pub fn for_drug(drug_name: &str) -> Self {
        Self {
            drug_name: drug_name.to_string(),
            therapeutic_class: None,
            ndc: None,
            current_medications: vec![],
            allergies: vec![],
            conditions: vec![],
            age: None,
            pregnant: false,
            nursing: false,
            creatinine_clearance: None,
            hepatic_function: HepaticFunction::Normal,
            quantity: 0.0,
            strength_mg: 0.0,
            days_supply: 0,
            route: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Reference tables
// ---------------------------------------------------------------------------

struct InteractionEntry {
    drug_a: &'static str,
    drug_b: &'static str,
    severity: DurSeverity,
    code: &'static str,
    effect: &'static str,
    management: &'static str,
}

static INTERACTIONS: Lazy<Vec<InteractionEntry>> = Lazy::new(|| {
    vec![
        InteractionEntry {
            drug_a: "warfarin",
            drug_b: "aspirin",
            severity: DurSeverity::High,
            code: "DDI-001",
            effect: "Increased bleeding risk",
            management: "Avoid combination; monitor INR closely if unavoidable",
        },
        InteractionEntry {
            drug_a: "warfarin",
            drug_b: "ibuprofen",
            severity: DurSeverity::High,
            code: "DDI-002",
            effect: "Increased bleeding risk",
            management: "Prefer acetaminophen for analgesia",
        },
        InteractionEntry {
            drug_a: "warfarin",
            drug_b: "fluconazole",
            severity: DurSeverity::High,
            code: "DDI-003",
            effect: "CYP2C9 inhibition raises INR",
            management: "Reduce warfarin dose and recheck INR in 3-5 days",
        },
        InteractionEntry {
            drug_a: "tramadol",
            drug_b: "sertraline",
            severity: DurSeverity::High,
            code: "DDI-004",
            effect: "Risk of serotonin syndrome",
            management: "Consider alternate analgesic; monitor for agitation, clonus, fever",
        },
        InteractionEntry {
            drug_a: "tramadol",
            drug_b: "fluoxetine",
            severity: DurSeverity::High,
            code: "DDI-005",
            effect: "Risk of serotonin syndrome",
            management: "Consider alternate analgesic; monitor closely",
        },
        InteractionEntry {
            drug_a: "selegiline",
            drug_b: "sertraline",
            severity: DurSeverity::Critical,
            code: "DDI-006",
            effect: "MAOI-SSRI serotonin syndrome",
            management: "Contraindicated; 14-day washout required",
        },
        InteractionEntry {
            drug_a: "sildenafil",
            drug_b: "nitroglycerin",
            severity: DurSeverity::Critical,
            code: "DDI-007",
            effect: "Profound hypotension",
            management: "Contraindicated within 24 hours of nitrate dosing",
        },
        InteractionEntry {
            drug_a: "simvastatin",
            drug_b: "clarithromycin",
            severity: DurSeverity::High,
            code: "DDI-008",
            effect: "CYP3A4 inhibition; rhabdomyolysis risk",
            management: "Hold statin during macrolide course or switch antibiotic",
        },
        InteractionEntry {
            drug_a: "methotrexate",
            drug_b: "ibuprofen",
            severity: DurSeverity::High,
            code: "DDI-009",
            effect: "Reduced methotrexate clearance; marrow toxicity",
            management: "Avoid NSAIDs with high-dose methotrexate",
        },
        InteractionEntry {
            drug_a: "lithium",
            drug_b: "ibuprofen",
            severity: DurSeverity::Moderate,
            code: "DDI-010",
            effect: "NSAIDs raise lithium levels",
            management: "Monitor lithium level within one week",
        },
        InteractionEntry {
            drug_a: "digoxin",
            drug_b: "amiodarone",
            severity: DurSeverity::High,
            code: "DDI-011",
            effect: "Amiodarone doubles digoxin exposure",
            management: "Halve digoxin dose; monitor level",
        },
        InteractionEntry {
            drug_a: "lisinopril",
            drug_b: "spironolactone",
            severity: DurSeverity::Moderate,
            code: "DDI-012",
            effect: "Additive hyperkalemia",
            management: "Check potassium within one week of starting",
        },
        InteractionEntry {
            drug_a: "lisinopril",
            drug_b: "potassium chloride",
            severity: DurSeverity::Moderate,
            code: "DDI-013",
            effect: "Additive hyperkalemia",
            management: "Monitor potassium",
        },
        InteractionEntry {
            drug_a: "oxycodone",
            drug_b: "alprazolam",
            severity: DurSeverity::High,
            code: "DDI-014",
            effect: "Additive CNS and respiratory depression",
            management: "Avoid combined use; if unavoidable use lowest doses",
        },
        InteractionEntry {
            drug_a: "oxycodone",
            drug_b: "diazepam",
            severity: DurSeverity::High,
            code: "DDI-015",
            effect: "Additive CNS and respiratory depression",
            management: "Avoid combined use; if unavoidable use lowest doses",
        },
        InteractionEntry {
            drug_a: "hydrocodone",
            drug_b: "alprazolam",
            severity: DurSeverity::High,
            code: "DDI-016",
            effect: "Additive CNS and respiratory depression",
            management: "Avoid combined use",
        },
        InteractionEntry {
            drug_a: "metronidazole",
            drug_b: "warfarin",
            severity: DurSeverity::High,
            code: "DDI-017",
            effect: "Potentiated anticoagulation",
            management: "Monitor INR during and after the course",
        },
        InteractionEntry {
            drug_a: "ciprofloxacin",
            drug_b: "tizanidine",
            severity: DurSeverity::Critical,
            code: "DDI-018",
            effect: "CYP1A2 inhibition; severe hypotension and sedation",
            management: "Contraindicated",
        },
        InteractionEntry {
            drug_a: "clopidogrel",
            drug_b: "omeprazole",
            severity: DurSeverity::Moderate,
            code: "DDI-019",
            effect: "Reduced antiplatelet effect",
            management: "Prefer pantoprazole",
        },
        InteractionEntry {
            drug_a: "metformin",
            drug_b: "iodinated contrast",
            severity: DurSeverity::High,
            code: "DDI-020",
            effect: "Lactic acidosis risk with contrast nephropathy",
            management: "Hold metformin 48 hours post contrast",
        },
    ]
});

/// Keyword -> therapeutic class inference, used when the dispensing
/// record does not carry an explicit class
static CLASS_KEYWORDS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("lisinopril", "ace inhibitor"),
        ("enalapril", "ace inhibitor"),
        ("benazepril", "ace inhibitor"),
        ("losartan", "arb"),
        ("valsartan", "arb"),
        ("atorvastatin", "statin"),
        ("simvastatin", "statin"),
        ("rosuvastatin", "statin"),
        ("pravastatin", "statin"),
        ("sertraline", "ssri"),
        ("fluoxetine", "ssri"),
        ("paroxetine", "ssri"),
        ("escitalopram", "ssri"),
        ("citalopram", "ssri"),
        ("oxycodone", "opioid"),
        ("hydrocodone", "opioid"),
        ("morphine", "opioid"),
        ("hydromorphone", "opioid"),
        ("tramadol", "opioid"),
        ("codeine", "opioid"),
        ("methadone", "opioid"),
        ("fentanyl", "opioid"),
        ("alprazolam", "benzodiazepine"),
        ("diazepam", "benzodiazepine"),
        ("lorazepam", "benzodiazepine"),
        ("clonazepam", "benzodiazepine"),
        ("temazepam", "benzodiazepine"),
        ("ibuprofen", "nsaid"),
        ("naproxen", "nsaid"),
        ("ketorolac", "nsaid"),
        ("meloxicam", "nsaid"),
        ("diclofenac", "nsaid"),
        ("omeprazole", "ppi"),
        ("pantoprazole", "ppi"),
        ("esomeprazole", "ppi"),
        ("metoprolol", "beta blocker"),
        ("atenolol", "beta blocker"),
        ("carvedilol", "beta blocker"),
        ("amlodipine", "calcium channel blocker"),
        ("diltiazem", "calcium channel blocker"),
        ("ciprofloxacin", "fluoroquinolone"),
        ("levofloxacin", "fluoroquinolone"),
        ("moxifloxacin", "fluoroquinolone"),
        ("doxycycline", "tetracycline"),
        ("minocycline", "tetracycline"),
        ("tetracycline", "tetracycline"),
        ("amoxicillin", "penicillin"),
        ("ampicillin", "penicillin"),
        ("penicillin", "penicillin"),
        ("cephalexin", "cephalosporin"),
        ("cefdinir", "cephalosporin"),
        ("ceftriaxone", "cephalosporin"),
        ("metformin", "biguanide"),
        ("glipizide", "sulfonylurea"),
        ("glyburide", "sulfonylurea"),
        ("warfarin", "anticoagulant"),
        ("apixaban", "anticoagulant"),
        ("rivaroxaban", "anticoagulant"),
        ("zolpidem", "sedative hypnotic"),
        ("eszopiclone", "sedative hypnotic"),
        ("hydrochlorothiazide", "thiazide diuretic"),
        ("chlorthalidone", "thiazide diuretic"),
        ("sulfamethoxazole", "sulfonamide"),
        ("azithromycin", "macrolide"),
        ("clarithromycin", "macrolide"),
        ("erythromycin", "macrolide"),
        ("insulin", "insulin"),
    ]
});

struct AllergyCrossEntry {
    allergen: &'static str,
    cross_class: &'static str,
    severity: DurSeverity,
    code: &'static str,
    note: &'static str,
}

static ALLERGY_CROSS: Lazy<Vec<AllergyCrossEntry>> = Lazy::new(|| {
    vec![
        AllergyCrossEntry {
            allergen: "penicillin",
            cross_class: "penicillin",
            severity: DurSeverity::High,
            code: "ALG-101",
            note: "Same class as documented penicillin allergy",
        },
        AllergyCrossEntry {
            allergen: "penicillin",
            cross_class: "cephalosporin",
            severity: DurSeverity::Moderate,
            code: "ALG-102",
            note: "Cephalosporin cross-reactivity with penicillin allergy (~2%)",
        },
        AllergyCrossEntry {
            allergen: "sulfa",
            cross_class: "sulfonamide",
            severity: DurSeverity::High,
            code: "ALG-103",
            note: "Sulfonamide antibiotic with documented sulfa allergy",
        },
        AllergyCrossEntry {
            allergen: "sulfa",
            cross_class: "thiazide diuretic",
            severity: DurSeverity::Moderate,
            code: "ALG-104",
            note: "Thiazides share the sulfonamide moiety",
        },
        AllergyCrossEntry {
            allergen: "aspirin",
            cross_class: "nsaid",
            severity: DurSeverity::Moderate,
            code: "ALG-105",
            note: "NSAID cross-reactivity with aspirin sensitivity",
        },
        AllergyCrossEntry {
            allergen: "ibuprofen",
            cross_class: "nsaid",
            severity: DurSeverity::Moderate,
            code: "ALG-106",
            note: "NSAID class cross-reactivity",
        },
        AllergyCrossEntry {
            allergen: "codeine",
            cross_class: "opioid",
            severity: DurSeverity::Moderate,
            code: "ALG-107",
            note: "Opioid class cross-reactivity",
        },
        AllergyCrossEntry {
            allergen: "morphine",
            cross_class: "opioid",
            severity: DurSeverity::Moderate,
            code: "ALG-108",
            note: "Opioid class cross-reactivity",
        },
    ]
});

struct ContraindicationEntry {
    drug: &'static str,
    condition: &'static str,
    severity: DurSeverity,
    code: &'static str,
    note: &'static str,
    alternatives: &'static [&'static str],
}

static CONTRAINDICATIONS: Lazy<Vec<ContraindicationEntry>> = Lazy::new(|| {
    vec![
        ContraindicationEntry {
            drug: "metformin",
            condition: "severe renal impairment",
            severity: DurSeverity::High,
            code: "CON-001",
            note: "Lactic acidosis risk",
            alternatives: &["sitagliptin", "glipizide"],
        },
        ContraindicationEntry {
            drug: "ibuprofen",
            condition: "peptic ulcer",
            severity: DurSeverity::High,
            code: "CON-002",
            note: "GI bleeding risk with active ulcer disease",
            alternatives: &["acetaminophen"],
        },
        ContraindicationEntry {
            drug: "ibuprofen",
            condition: "heart failure",
            severity: DurSeverity::Moderate,
            code: "CON-003",
            note: "Fluid retention worsens heart failure",
            alternatives: &["acetaminophen"],
        },
        ContraindicationEntry {
            drug: "metoprolol",
            condition: "asthma",
            severity: DurSeverity::Moderate,
            code: "CON-004",
            note: "Beta blockade may provoke bronchospasm",
            alternatives: &["diltiazem"],
        },
        ContraindicationEntry {
            drug: "sumatriptan",
            condition: "coronary artery disease",
            severity: DurSeverity::High,
            code: "CON-005",
            note: "Coronary vasospasm risk",
            alternatives: &["acetaminophen", "naproxen"],
        },
        ContraindicationEntry {
            drug: "nitrofurantoin",
            condition: "severe renal impairment",
            severity: DurSeverity::High,
            code: "CON-006",
            note: "Ineffective and toxic below CrCl 30",
            alternatives: &["cephalexin"],
        },
        ContraindicationEntry {
            drug: "bupropion",
            condition: "seizure disorder",
            severity: DurSeverity::High,
            code: "CON-007",
            note: "Lowers seizure threshold",
            alternatives: &["sertraline"],
        },
    ]
});

struct PediatricEntry {
    class_or_drug: &'static str,
    max_age: i32,
    severity: DurSeverity,
    code: &'static str,
    note: &'static str,
    /// Additional condition required to fire (e.g. viral illness)
    requires_condition: Option<&'static str>,
}

static PEDIATRIC_RULES: Lazy<Vec<PediatricEntry>> = Lazy::new(|| {
    vec![
        PediatricEntry {
            class_or_drug: "fluoroquinolone",
            max_age: 18,
            severity: DurSeverity::High,
            code: "AGE-001",
            note: "Fluoroquinolones: cartilage toxicity under 18",
            requires_condition: None,
        },
        PediatricEntry {
            class_or_drug: "tetracycline",
            max_age: 8,
            severity: DurSeverity::High,
            code: "AGE-002",
            note: "Tetracyclines: tooth discoloration under 8",
            requires_condition: None,
        },
        PediatricEntry {
            class_or_drug: "aspirin",
            max_age: 16,
            severity: DurSeverity::High,
            code: "AGE-003",
            note: "Reye's syndrome risk with viral illness under 16",
            requires_condition: Some("viral"),
        },
        PediatricEntry {
            class_or_drug: "promethazine",
            max_age: 2,
            severity: DurSeverity::Critical,
            code: "AGE-004",
            note: "Fatal respiratory depression under 2",
            requires_condition: None,
        },
        PediatricEntry {
            class_or_drug: "codeine",
            max_age: 12,
            severity: DurSeverity::High,
            code: "AGE-005",
            note: "Ultra-rapid metabolizer respiratory depression under 12",
            requires_condition: None,
        },
    ]
});

/// Beers-criteria medications flagged in patients 65 and older
static BEERS_LIST: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "diphenhydramine",
        "hydroxyzine",
        "amitriptyline",
        "diazepam",
        "chlordiazepoxide",
        "glyburide",
        "cyclobenzaprine",
        "carisoprodol",
        "zolpidem",
        "meperidine",
        "indomethacin",
    ]
});

/// Classes that raise fall risk in patients 65 and older
static FALL_RISK_CLASSES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec!["benzodiazepine", "sedative hypnotic", "opioid"]
});

struct RenalEntry {
    drug: &'static str,
    min_crcl: f64,
    severity: DurSeverity,
    code: &'static str,
    note: &'static str,
}

static RENAL_RULES: Lazy<Vec<RenalEntry>> = Lazy::new(|| {
    vec![
        RenalEntry {
            drug: "metformin",
            min_crcl: 30.0,
            severity: DurSeverity::High,
            code: "REN-001",
            note: "Contraindicated below CrCl 30: lactic acidosis",
        },
        RenalEntry {
            drug: "nitrofurantoin",
            min_crcl: 30.0,
            severity: DurSeverity::High,
            code: "REN-002",
            note: "Ineffective and neurotoxic below CrCl 30",
        },
        RenalEntry {
            drug: "gabapentin",
            min_crcl: 60.0,
            severity: DurSeverity::Moderate,
            code: "REN-003",
            note: "Dose reduction required below CrCl 60",
        },
        RenalEntry {
            drug: "enoxaparin",
            min_crcl: 30.0,
            severity: DurSeverity::High,
            code: "REN-004",
            note: "Accumulates below CrCl 30; reduce dose",
        },
        RenalEntry {
            drug: "ibuprofen",
            min_crcl: 30.0,
            severity: DurSeverity::High,
            code: "REN-005",
            note: "NSAIDs accelerate renal decline below CrCl 30",
        },
        RenalEntry {
            drug: "allopurinol",
            min_crcl: 60.0,
            severity: DurSeverity::Moderate,
            code: "REN-006",
            note: "Start low and titrate in renal impairment",
        },
    ]
});

/// Drugs with hepatic concern; severity escalates with impairment
static HEPATIC_CONCERN: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "acetaminophen",
        "atorvastatin",
        "simvastatin",
        "methotrexate",
        "valproate",
        "valproic acid",
        "ketoconazole",
        "duloxetine",
    ]
});

/// Pregnancy Category X: non-overridable
static PREGNANCY_X: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "isotretinoin",
        "warfarin",
        "methotrexate",
        "finasteride",
        "atorvastatin",
        "simvastatin",
        "thalidomide",
        "misoprostol",
    ]
});

/// Pregnancy Category D: high severity, overridable with documentation
static PREGNANCY_D: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "lisinopril",
        "losartan",
        "phenytoin",
        "valproate",
        "valproic acid",
        "lithium",
        "doxycycline",
        "tetracycline",
        "amiodarone",
    ]
});

/// Avoid while nursing: non-overridable
static NURSING_AVOID: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "codeine",
        "amiodarone",
        "lithium",
        "methotrexate",
        "ergotamine",
        "cyclophosphamide",
    ]
});

struct MonitoringEntry {
    drug: &'static str,
    parameters: &'static str,
    frequency: &'static str,
}

static MONITORING_RULES: Lazy<Vec<MonitoringEntry>> = Lazy::new(|| {
    vec![
        MonitoringEntry {
            drug: "warfarin",
            parameters: "INR",
            frequency: "weekly until stable, then monthly",
        },
        MonitoringEntry {
            drug: "lithium",
            parameters: "lithium level, TSH, serum creatinine",
            frequency: "every 3-6 months",
        },
        MonitoringEntry {
            drug: "methotrexate",
            parameters: "CBC, liver enzymes",
            frequency: "every 4-8 weeks",
        },
        MonitoringEntry {
            drug: "amiodarone",
            parameters: "TFT, liver enzymes, chest imaging",
            frequency: "every 6 months",
        },
        MonitoringEntry {
            drug: "clozapine",
            parameters: "absolute neutrophil count",
            frequency: "weekly for 6 months, then biweekly",
        },
        MonitoringEntry {
            drug: "digoxin",
            parameters: "digoxin level, potassium, renal function",
            frequency: "every 6 months and after dose changes",
        },
        MonitoringEntry {
            drug: "lisinopril",
            parameters: "potassium, serum creatinine",
            frequency: "1-2 weeks after initiation, then annually",
        },
    ]
});

/// Opioid MME conversion factors (per mg of drug)
static MME_FACTORS: Lazy<Vec<(&'static str, f64)>> = Lazy::new(|| {
    vec![
        ("morphine", 1.0),
        ("oxycodone", 1.5),
        ("hydrocodone", 1.0),
        ("hydromorphone", 4.0),
        ("oxymorphone", 3.0),
        ("codeine", 0.15),
        ("tramadol", 0.1),
        ("tapentadol", 0.4),
        ("fentanyl", 2.4),
    ]
});

/// MME daily-dose thresholds
pub const MME_WARNING: f64 = 50.0;
pub const MME_DANGER: f64 = 90.0;
pub const MME_CRITICAL: f64 = 120.0;

// ---------------------------------------------------------------------------
// Name matching
// ---------------------------------------------------------------------------

/// Lowercase and strip non-alphanumerics
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Two drug names match when either contains the other after
/// normalization, or they are close by Damerau-Levenshtein similarity
/// (handles brand/generic spelling drift).
pub fn names_match(a: &str, b: &str) -> bool {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return false;
    }
    if na.contains(&nb) || nb.contains(&na) {
        return true;
    }
    normalized_damerau_levenshtein(&na, &nb) >= 0.8
}

/// Infer a therapeutic class from the drug name
pub fn infer_class(drug_name: &str) -> Option<&'static str> {
    let normalized = normalize_name(drug_name);
    CLASS_KEYWORDS
        .iter()
        .find(|(keyword, _)| normalized.contains(&normalize_name(keyword)))
        .map(|(_, class)| *class)
}

fn class_of(name: &str, explicit: Option<&str>) -> Option<String> {
    explicit
        .map(|c| c.to_lowercase())
        .or_else(|| infer_class(name).map(|c| c.to_string()))
}

// ---------------------------------------------------------------------------
// MME
// ---------------------------------------------------------------------------

/// Daily morphine-milligram-equivalent dose, `None` for non-opioids.
///
/// daily_dose = quantity x strength / days_supply;
/// daily_mme = daily_dose x factor. Methadone factors depend on the
/// daily dose itself: <=20mg 4, 21-40 8, 41-60 10, >60 12.
pub fn daily_mme(drug_name: &str, quantity: f64, strength_mg: f64, days_supply: i32) -> Option<f64> {
    if days_supply <= 0 || quantity <= 0.0 || strength_mg <= 0.0 {
        return None;
    }
    let normalized = normalize_name(drug_name);
    let daily_dose = quantity * strength_mg / days_supply as f64;

    if normalized.contains("methadone") {
        let factor = if daily_dose <= 20.0 {
            4.0
        } else if daily_dose <= 40.0 {
            8.0
        } else if daily_dose <= 60.0 {
            10.0
        } else {
            12.0
        };
        return Some(daily_dose * factor);
    }

    MME_FACTORS
        .iter()
        .find(|(opioid, _)| normalized.contains(&normalize_name(opioid)))
        .map(|(_, factor)| daily_dose * factor)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// DUR engine; holds the override acceptance policy
#[derive(Debug, Clone, Default)]
pub struct DurService {
    policy: DurPolicy,
}

impl DurService {
    pub fn new(policy: DurPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DurPolicy {
        &self.policy
    }

    /// Run every rule family and return the ordered alert set
    pub fn check(&self, input: &DurInput) -> DurResult {
        let mut alerts = Vec::new();

        self.check_interactions(input, &mut alerts);
        self.check_duplicate_therapy(input, &mut alerts);
        self.check_allergies(input, &mut alerts);
        self.check_contraindications(input, &mut alerts);
        self.check_age(input, &mut alerts);
        self.check_renal(input, &mut alerts);
        self.check_hepatic(input, &mut alerts);
        self.check_pregnancy_nursing(input, &mut alerts);
        self.check_monitoring(input, &mut alerts);
        self.check_opioid_dose(input, &mut alerts);

        DurResult::from_alerts(alerts)
    }

    fn check_interactions(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        for med in &input.current_medications {
            for entry in INTERACTIONS.iter() {
                let forward =
                    names_match(&input.drug_name, entry.drug_a) && names_match(&med.name, entry.drug_b);
                let reverse =
                    names_match(&input.drug_name, entry.drug_b) && names_match(&med.name, entry.drug_a);
                if forward || reverse {
                    alerts.push(DurAlert {
                        id: Uuid::new_v4(),
                        category: DurCategory::DrugInteraction,
                        severity: entry.severity,
                        code: entry.code.to_string(),
                        message: format!(
                            "{} with {}: {}",
                            entry.drug_a, entry.drug_b, entry.effect
                        ),
                        recommendation: Some(entry.management.to_string()),
                        alternatives: vec![],
                        overridable: entry.severity < DurSeverity::Critical,
                        requires_documentation: entry.severity >= DurSeverity::High,
                    });
                }
            }
        }
    }

    fn check_duplicate_therapy(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        let candidate_class =
            match class_of(&input.drug_name, input.therapeutic_class.as_deref()) {
                Some(class) => class,
                None => return,
            };
        for med in &input.current_medications {
            if names_match(&med.name, &input.drug_name) {
                continue;
            }
            if let Some(class) = class_of(&med.name, med.therapeutic_class.as_deref()) {
                if class == candidate_class {
                    alerts.push(DurAlert {
                        id: Uuid::new_v4(),
                        category: DurCategory::DuplicateTherapy,
                        severity: DurSeverity::Moderate,
                        code: "DUP-001".to_string(),
                        message: format!("Duplicate therapy: patient already takes a {}", class),
                        recommendation: Some(
                            "Confirm intentional duplication with the prescriber".to_string(),
                        ),
                        alternatives: vec![],
                        overridable: true,
                        requires_documentation: false,
                    });
                    return; // one duplicate-therapy alert per check
                }
            }
        }
    }

    fn check_allergies(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        let candidate_class = class_of(&input.drug_name, input.therapeutic_class.as_deref());

        for allergy in &input.allergies {
            // Direct match after normalization
            if names_match(allergy, &input.drug_name) {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::Allergy,
                    severity: DurSeverity::High,
                    code: "ALG-001".to_string(),
                    message: "Documented allergy to this medication".to_string(),
                    recommendation: Some("Verify allergy history; select an alternative".into()),
                    alternatives: vec![],
                    overridable: true,
                    requires_documentation: true,
                });
                continue;
            }

            // Class cross-reactivity
            for entry in ALLERGY_CROSS.iter() {
                if !names_match(allergy, entry.allergen) {
                    continue;
                }
                let class_hit = candidate_class
                    .as_deref()
                    .map(|class| class == entry.cross_class)
                    .unwrap_or(false);
                if class_hit {
                    alerts.push(DurAlert {
                        id: Uuid::new_v4(),
                        category: DurCategory::Allergy,
                        severity: entry.severity,
                        code: entry.code.to_string(),
                        message: entry.note.to_string(),
                        recommendation: Some(
                            "Review reaction history before dispensing".to_string(),
                        ),
                        alternatives: vec![],
                        overridable: true,
                        requires_documentation: entry.severity >= DurSeverity::High,
                    });
                }
            }
        }
    }

    fn check_contraindications(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        for entry in CONTRAINDICATIONS.iter() {
            if !names_match(&input.drug_name, entry.drug) {
                continue;
            }
            let condition_present = input
                .conditions
                .iter()
                .any(|c| c.to_lowercase().contains(&entry.condition.to_lowercase()));
            if condition_present {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::Contraindication,
                    severity: entry.severity,
                    code: entry.code.to_string(),
                    message: format!("{}: {}", entry.condition, entry.note),
                    recommendation: Some("Contact prescriber to discuss alternatives".into()),
                    alternatives: entry.alternatives.iter().map(|s| s.to_string()).collect(),
                    // Contraindications are never overridable
                    overridable: false,
                    requires_documentation: true,
                });
            }
        }
    }

    fn check_age(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        let age = match input.age {
            Some(age) => age,
            None => return,
        };
        let candidate_class = class_of(&input.drug_name, input.therapeutic_class.as_deref());

        // Pediatric restrictions
        for entry in PEDIATRIC_RULES.iter() {
            if age >= entry.max_age {
                continue;
            }
            let drug_hit = names_match(&input.drug_name, entry.class_or_drug)
                || candidate_class.as_deref() == Some(entry.class_or_drug);
            if !drug_hit {
                continue;
            }
            if let Some(required) = entry.requires_condition {
                let present = input
                    .conditions
                    .iter()
                    .any(|c| c.to_lowercase().contains(required));
                if !present {
                    continue;
                }
            }
            alerts.push(DurAlert {
                id: Uuid::new_v4(),
                category: DurCategory::AgeAlert,
                severity: entry.severity,
                code: entry.code.to_string(),
                message: entry.note.to_string(),
                recommendation: Some("Confirm indication with the prescriber".into()),
                alternatives: vec![],
                overridable: entry.severity < DurSeverity::Critical,
                requires_documentation: true,
            });
        }

        // Geriatric rules
        if age >= 65 {
            let on_beers = BEERS_LIST
                .iter()
                .any(|drug| names_match(&input.drug_name, drug));
            if on_beers {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::AgeAlert,
                    severity: DurSeverity::Moderate,
                    code: "AGE-101".to_string(),
                    message: "Potentially inappropriate in older adults (Beers criteria)"
                        .to_string(),
                    recommendation: Some("Consider a safer alternative".into()),
                    alternatives: vec![],
                    overridable: true,
                    requires_documentation: false,
                });
            }
            let fall_risk = candidate_class
                .as_deref()
                .map(|class| FALL_RISK_CLASSES.contains(&class))
                .unwrap_or(false);
            if fall_risk {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::AgeAlert,
                    severity: DurSeverity::Low,
                    code: "AGE-102".to_string(),
                    message: "Fall-risk medication in a patient 65 or older".to_string(),
                    recommendation: Some("Counsel on fall precautions".into()),
                    alternatives: vec![],
                    overridable: true,
                    requires_documentation: false,
                });
            }
        }
    }

    fn check_renal(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        let crcl = match input.creatinine_clearance {
            Some(crcl) => crcl,
            None => return,
        };

        for entry in RENAL_RULES.iter() {
            if names_match(&input.drug_name, entry.drug) && crcl < entry.min_crcl {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::RenalAdjustment,
                    severity: entry.severity,
                    code: entry.code.to_string(),
                    message: entry.note.to_string(),
                    recommendation: Some("Verify dosing against current renal function".into()),
                    alternatives: vec![],
                    overridable: entry.severity < DurSeverity::Critical,
                    requires_documentation: entry.severity >= DurSeverity::High,
                });
            }
        }

        // Severe renal failure is flagged for any drug
        if crcl < 15.0 {
            alerts.push(DurAlert {
                id: Uuid::new_v4(),
                category: DurCategory::RenalAdjustment,
                severity: DurSeverity::High,
                code: "REN-099".to_string(),
                message: "Creatinine clearance below 15 mL/min: verify all dosing".to_string(),
                recommendation: Some("Pharmacist review of renal dosing required".into()),
                alternatives: vec![],
                overridable: true,
                requires_documentation: true,
            });
        }
    }

    fn check_hepatic(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        if input.hepatic_function == HepaticFunction::Normal {
            return;
        }
        let concern = HEPATIC_CONCERN
            .iter()
            .any(|drug| names_match(&input.drug_name, drug));
        if !concern {
            return;
        }
        let severity = match input.hepatic_function {
            HepaticFunction::MildImpairment => DurSeverity::Moderate,
            HepaticFunction::ModerateImpairment | HepaticFunction::SevereImpairment => {
                DurSeverity::High
            }
            HepaticFunction::Normal => unreachable!(),
        };
        alerts.push(DurAlert {
            id: Uuid::new_v4(),
            category: DurCategory::HepaticAdjustment,
            severity,
            code: "HEP-001".to_string(),
            message: "Hepatically cleared drug in a patient with liver impairment".to_string(),
            recommendation: Some("Consider dose reduction or an alternative agent".into()),
            alternatives: vec![],
            overridable: true,
            requires_documentation: severity >= DurSeverity::High,
        });
    }

    fn check_pregnancy_nursing(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        if input.pregnant {
            let category_x = PREGNANCY_X
                .iter()
                .any(|drug| names_match(&input.drug_name, drug));
            if category_x {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::PregnancyNursing,
                    severity: DurSeverity::High,
                    code: "PRG-001".to_string(),
                    message: "Pregnancy Category X: fetal risk outweighs any benefit".to_string(),
                    recommendation: Some("Do not dispense; contact prescriber".into()),
                    alternatives: vec![],
                    overridable: false,
                    requires_documentation: true,
                });
            } else if PREGNANCY_D
                .iter()
                .any(|drug| names_match(&input.drug_name, drug))
            {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::PregnancyNursing,
                    severity: DurSeverity::High,
                    code: "PRG-002".to_string(),
                    message: "Pregnancy Category D: positive evidence of fetal risk".to_string(),
                    recommendation: Some(
                        "Dispense only with documented prescriber risk-benefit decision".into(),
                    ),
                    alternatives: vec![],
                    overridable: true,
                    requires_documentation: true,
                });
            }
        }

        if input.nursing {
            let avoid = NURSING_AVOID
                .iter()
                .any(|drug| names_match(&input.drug_name, drug));
            if avoid {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::PregnancyNursing,
                    severity: DurSeverity::High,
                    code: "PRG-003".to_string(),
                    message: "Avoid while nursing: infant exposure risk".to_string(),
                    recommendation: Some("Contact prescriber for an alternative".into()),
                    alternatives: vec![],
                    overridable: false,
                    requires_documentation: true,
                });
            }
        }
    }

    fn check_monitoring(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        for entry in MONITORING_RULES.iter() {
            if names_match(&input.drug_name, entry.drug) {
                alerts.push(DurAlert {
                    id: Uuid::new_v4(),
                    category: DurCategory::MonitoringRequired,
                    severity: DurSeverity::Low,
                    code: "MON-001".to_string(),
                    message: format!(
                        "Monitoring required: {} ({})",
                        entry.parameters, entry.frequency
                    ),
                    recommendation: Some("Confirm labs are scheduled".into()),
                    alternatives: vec![],
                    overridable: true,
                    requires_documentation: false,
                });
            }
        }
    }

    fn check_opioid_dose(&self, input: &DurInput, alerts: &mut Vec<DurAlert>) {
        let mme = match daily_mme(
            &input.drug_name,
            input.quantity,
            input.strength_mg,
            input.days_supply,
        ) {
            Some(mme) => mme,
            None => return,
        };

        let (severity, code, threshold) = if mme >= MME_CRITICAL {
            (DurSeverity::Critical, "MME-120", MME_CRITICAL)
        } else if mme >= MME_DANGER {
            (DurSeverity::High, "MME-090", MME_DANGER)
        } else if mme >= MME_WARNING {
            (DurSeverity::Moderate, "MME-050", MME_WARNING)
        } else {
            return;
        };

        alerts.push(DurAlert {
            id: Uuid::new_v4(),
            category: DurCategory::OpioidDose,
            severity,
            code: code.to_string(),
            message: format!(
                "Daily opioid dose {:.1} MME exceeds the {:.0} MME threshold",
                mme, threshold
            ),
            recommendation: Some(
                "Review total opioid burden; consider naloxone co-prescription".into(),
            ),
            alternatives: vec![],
            overridable: severity < DurSeverity::Critical,
            requires_documentation: true,
        });
    }

    /// Validate an override attempt against policy: accepted code,
    /// documented reason, pharmacist actor, overridable alert.
    pub fn validate_override(
        &self,
        alert: &DurAlert,
        code: &str,
        reason: &str,
        actor: &Actor,
    ) -> Result<()> {
        if !alert.overridable {
            return Err(EngineError::NonOverridable(alert.code.clone()));
        }
        if !self.policy.accepts_code(code) {
            return Err(EngineError::invalid_field(
                "override_code",
                format!("`{}` is not an accepted override code", code),
            ));
        }
        validate_override_reason(reason)?;
        if reason.trim().len() < self.policy.min_reason_length {
            return Err(EngineError::invalid_field(
                "reason",
                "override reason does not meet the documentation minimum",
            ));
        }
        crate::utils::permissions::require_pharmacist(actor)?;
        Ok(())
    }
}
