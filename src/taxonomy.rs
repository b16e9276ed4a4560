use std::collections::{BTreeMap, BTreeSet};

/// Reference taxonomy of known division identifiers, the vocabulary
/// expected in their titles, and the small set of divisions that almost
/// every complete catalogue contains.
///
/// Constructed once per pipeline run and passed into the stages that need
/// it; there is no ambient global table.
#[derive(Debug, Clone)]
pub struct DivisionTaxonomy {
    divisions: BTreeMap<String, String>,
    vocabulary: BTreeMap<String, Vec<String>>,
    common_divisions: BTreeSet<String>,
}

/// CSI MasterFormat 2020 division table.
const MASTERFORMAT_DIVISIONS: &[(&str, &str)] = &[
    ("00", "Procurement and Contracting Requirements"),
    ("01", "General Requirements"),
    ("02", "Existing Conditions"),
    ("03", "Concrete"),
    ("04", "Masonry"),
    ("05", "Metals"),
    ("06", "Wood, Plastics, and Composites"),
    ("07", "Thermal and Moisture Protection"),
    ("08", "Openings"),
    ("09", "Finishes"),
    ("10", "Specialties"),
    ("11", "Equipment"),
    ("12", "Furnishings"),
    ("13", "Special Construction"),
    ("14", "Conveying Equipment"),
    ("21", "Fire Suppression"),
    ("22", "Plumbing"),
    ("23", "Heating, Ventilating, and Air Conditioning (HVAC)"),
    ("25", "Integrated Automation"),
    ("26", "Electrical"),
    ("27", "Communications"),
    ("28", "Electronic Safety and Security"),
    ("31", "Earthwork"),
    ("32", "Exterior Improvements"),
    ("33", "Utilities"),
    ("34", "Transportation"),
    ("35", "Waterway and Marine Construction"),
    ("40", "Process Integration"),
    ("41", "Material Processing and Handling Equipment"),
    ("42", "Process Heating, Cooling, and Drying Equipment"),
    ("43", "Process Gas and Liquid Handling, Purification, and Storage Equipment"),
    ("44", "Pollution and Waste Control Equipment"),
    ("45", "Industry-Specific Manufacturing Equipment"),
    ("46", "Water and Wastewater Equipment"),
    ("48", "Electrical Power Generation"),
];

/// Words expected to appear in titles of the listed divisions.
const MASTERFORMAT_VOCABULARY: &[(&str, &[&str])] = &[
    ("03", &["concrete", "cement", "grout", "reinforc", "cast", "precast"]),
    ("04", &["mason", "brick", "block", "stone", "mortar"]),
    ("05", &["metal", "steel", "aluminum", "iron", "structural"]),
    ("06", &["wood", "plastic", "composite", "lumber", "timber"]),
    ("07", &["thermal", "insulation", "moisture", "roofing", "waterproof"]),
    ("08", &["door", "window", "opening", "glazing", "entrance"]),
    ("09", &["finish", "paint", "coating", "flooring", "ceiling", "wall"]),
    ("22", &["plumbing", "pipe", "water", "drain", "fixture"]),
    ("23", &["hvac", "heating", "cooling", "ventilation", "air"]),
    ("26", &["electrical", "power", "lighting", "wiring", "panel"]),
];

const MASTERFORMAT_COMMON_DIVISIONS: &[&str] = &["00", "01", "02", "03", "04", "05"];

impl DivisionTaxonomy {
    /// Build a taxonomy from arbitrary tables.
    pub fn new(
        divisions: impl IntoIterator<Item = (String, String)>,
        vocabulary: impl IntoIterator<Item = (String, Vec<String>)>,
        common_divisions: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            divisions: divisions.into_iter().collect(),
            vocabulary: vocabulary.into_iter().collect(),
            common_divisions: common_divisions.into_iter().collect(),
        }
    }

    /// The CSI MasterFormat 2020 reference taxonomy.
    pub fn masterformat() -> Self {
        Self::new(
            MASTERFORMAT_DIVISIONS
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string())),
            MASTERFORMAT_VOCABULARY.iter().map(|(id, words)| {
                (
                    id.to_string(),
                    words.iter().map(|w| w.to_string()).collect(),
                )
            }),
            MASTERFORMAT_COMMON_DIVISIONS.iter().map(|d| d.to_string()),
        )
    }

    pub fn is_known(&self, division: &str) -> bool {
        self.divisions.contains_key(division)
    }

    pub fn division_name(&self, division: &str) -> Option<&str> {
        self.divisions.get(division).map(String::as_str)
    }

    pub fn vocabulary_for(&self, division: &str) -> Option<&[String]> {
        self.vocabulary.get(division).map(Vec::as_slice)
    }

    pub fn common_divisions(&self) -> impl Iterator<Item = &str> {
        self.common_divisions.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.divisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.divisions.is_empty()
    }
}

impl Default for DivisionTaxonomy {
    fn default() -> Self {
        Self::masterformat()
    }
}
