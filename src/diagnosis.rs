//! Orthopedic test rule table.
//!
//! Maps the raw `orthopedic_tests` map of a ficha (test id -> string value) to canned
//! diagnostic suggestions. Rules are evaluated in table order and every matching rule
//! contributes one suggestion; nothing here is a diagnosis, only a hint for the
//! physiotherapist filling in the `diagnosis` field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

/// Summary returned when no rule matches.
pub const NO_PATTERN_TEXT: &str =
    "Nenhum padrão diagnóstico identificado a partir dos testes informados.";

/// TestValue
///
/// A parsed orthopedic test result.
#[derive(Debug, Clone, PartialEq)]
pub enum TestValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl TestValue {
    /// Parses a raw form value. Empty strings are treated as "not performed".
    ///
    /// Laxity grades written with a leading sign (`+2`) are normalised to the
    /// trailing form (`2+`) and stay text.
    pub fn parse(raw: &str) -> Option<TestValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let lowered = trimmed.to_lowercase();
        match lowered.as_str() {
            "true" | "positivo" | "positive" | "sim" => return Some(TestValue::Flag(true)),
            "false" | "negativo" | "negative" | "não" | "nao" => {
                return Some(TestValue::Flag(false));
            }
            _ => {}
        }
        if let Some(grade) = lowered.strip_prefix('+') {
            if !grade.is_empty() && grade.chars().all(|c| c.is_ascii_digit()) {
                return Some(TestValue::Text(format!("{grade}+")));
            }
        }
        if let Ok(n) = lowered.replace(',', ".").parse::<f64>() {
            if n.is_finite() {
                return Some(TestValue::Number(n));
            }
        }
        Some(TestValue::Text(lowered))
    }

    fn is_positive(&self) -> bool {
        matches!(self, TestValue::Flag(true))
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            TestValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Condition
///
/// One node of a rule's predicate tree. Test ids refer to keys of the input map.
#[derive(Debug, Clone, Copy)]
pub enum Condition {
    /// The test was recorded as positive.
    Positive(&'static str),
    /// At least `min` of `tests` were recorded as positive.
    AtLeast {
        tests: &'static [&'static str],
        min: usize,
    },
    /// Numeric value strictly below the threshold.
    Below(&'static str, f64),
    /// Numeric value greater than or equal to the threshold.
    AtOrAbove(&'static str, f64),
    /// Numeric value within `[low, high]`.
    Between {
        test: &'static str,
        low: f64,
        high: f64,
    },
    /// Enum value equals one of `values` (compared lowercase).
    OneOf {
        test: &'static str,
        values: &'static [&'static str],
    },
    All(&'static [Condition]),
    Any(&'static [Condition]),
}

struct Inputs {
    values: BTreeMap<String, TestValue>,
}

impl Inputs {
    fn get(&self, test: &str) -> Option<&TestValue> {
        self.values.get(test)
    }
}

impl Condition {
    /// Evaluates the condition, pushing the ids of the tests that made it true.
    fn eval(&self, inputs: &Inputs, matched: &mut Vec<String>) -> bool {
        match *self {
            Condition::Positive(test) => {
                let hit = inputs.get(test).is_some_and(TestValue::is_positive);
                if hit {
                    matched.push(test.to_string());
                }
                hit
            }
            Condition::AtLeast { tests, min } => {
                let positives: Vec<&str> = tests
                    .iter()
                    .copied()
                    .filter(|t| inputs.get(t).is_some_and(TestValue::is_positive))
                    .collect();
                let hit = positives.len() >= min;
                if hit {
                    matched.extend(positives.into_iter().map(str::to_string));
                }
                hit
            }
            Condition::Below(test, threshold) => {
                numeric(inputs, test, matched, |n| n < threshold)
            }
            Condition::AtOrAbove(test, threshold) => {
                numeric(inputs, test, matched, |n| n >= threshold)
            }
            Condition::Between { test, low, high } => {
                numeric(inputs, test, matched, |n| n >= low && n <= high)
            }
            Condition::OneOf { test, values } => {
                let hit = matches!(
                    inputs.get(test),
                    Some(TestValue::Text(v)) if values.iter().any(|candidate| *candidate == v.as_str())
                );
                if hit {
                    matched.push(test.to_string());
                }
                hit
            }
            Condition::All(conditions) => {
                let mut local = Vec::new();
                let hit = conditions.iter().all(|c| c.eval(inputs, &mut local));
                if hit {
                    matched.extend(local);
                }
                hit
            }
            Condition::Any(conditions) => {
                let mut hit = false;
                // Every branch is evaluated so all contributing tests are reported.
                for condition in conditions {
                    if condition.eval(inputs, matched) {
                        hit = true;
                    }
                }
                hit
            }
        }
    }
}

fn numeric(
    inputs: &Inputs,
    test: &str,
    matched: &mut Vec<String>,
    predicate: impl Fn(f64) -> bool,
) -> bool {
    let hit = inputs
        .get(test)
        .and_then(TestValue::as_number)
        .is_some_and(predicate);
    if hit {
        matched.push(test.to_string());
    }
    hit
}

/// Rule
///
/// A row of the static table: when `condition` holds, `text` is suggested.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub region: &'static str,
    pub condition: Condition,
    pub text: &'static str,
}

pub static RULES: &[Rule] = &[
    Rule {
        id: "shoulder_impingement",
        region: "ombro",
        condition: Condition::AtLeast {
            tests: &["neer", "hawkins_kennedy", "jobe"],
            min: 2,
        },
        text: "Sugestivo de síndrome do impacto subacromial.",
    },
    Rule {
        id: "rotator_cuff_tear",
        region: "ombro",
        condition: Condition::Positive("drop_arm"),
        text: "Sugestivo de ruptura do manguito rotador (teste da queda do braço positivo).",
    },
    Rule {
        id: "biceps_tendinopathy",
        region: "ombro",
        condition: Condition::AtLeast {
            tests: &["speed", "yergason"],
            min: 1,
        },
        text: "Sugestivo de tendinopatia da cabeça longa do bíceps.",
    },
    Rule {
        id: "acl_injury",
        region: "joelho",
        condition: Condition::Any(&[
            Condition::OneOf {
                test: "lachman",
                values: &["2+", "3+"],
            },
            Condition::Positive("anterior_drawer_knee"),
            Condition::Positive("pivot_shift"),
        ]),
        text: "Sugestivo de lesão do ligamento cruzado anterior.",
    },
    Rule {
        id: "pcl_injury",
        region: "joelho",
        condition: Condition::Positive("posterior_drawer_knee"),
        text: "Sugestivo de lesão do ligamento cruzado posterior.",
    },
    Rule {
        id: "meniscal_tear",
        region: "joelho",
        condition: Condition::AtLeast {
            tests: &["mcmurray", "apley", "thessaly"],
            min: 2,
        },
        text: "Sugestivo de lesão meniscal.",
    },
    Rule {
        id: "mcl_injury",
        region: "joelho",
        condition: Condition::Positive("valgus_stress"),
        text: "Sugestivo de lesão do ligamento colateral medial.",
    },
    Rule {
        id: "lumbar_radiculopathy",
        region: "coluna lombar",
        condition: Condition::All(&[
            Condition::Positive("lasegue"),
            Condition::Between {
                test: "lasegue_angle",
                low: 30.0,
                high: 70.0,
            },
        ]),
        text: "Sugestivo de radiculopatia lombar (Lasègue positivo entre 30° e 70°).",
    },
    Rule {
        id: "neural_tension",
        region: "coluna lombar",
        condition: Condition::Positive("slump"),
        text: "Sugestivo de tensão neural adversa (Slump positivo).",
    },
    Rule {
        id: "reduced_lumbar_mobility",
        region: "coluna lombar",
        condition: Condition::Below("schober_cm", 5.0),
        text: "Mobilidade lombar reduzida (Schober abaixo de 5 cm).",
    },
    Rule {
        id: "sacroiliac_dysfunction",
        region: "pelve",
        condition: Condition::AtLeast {
            tests: &["faber", "gaenslen", "thigh_thrust", "sacroiliac_compression"],
            min: 3,
        },
        text: "Sugestivo de disfunção sacroilíaca.",
    },
    Rule {
        id: "cervical_radiculopathy",
        region: "coluna cervical",
        condition: Condition::All(&[
            Condition::Positive("spurling"),
            Condition::Any(&[
                Condition::Positive("cervical_distraction"),
                Condition::Positive("upper_limb_tension"),
            ]),
        ]),
        text: "Sugestivo de radiculopatia cervical.",
    },
    Rule {
        id: "carpal_tunnel",
        region: "punho e mão",
        condition: Condition::AtLeast {
            tests: &["phalen", "tinel_wrist"],
            min: 1,
        },
        text: "Sugestivo de síndrome do túnel do carpo.",
    },
    Rule {
        id: "de_quervain",
        region: "punho e mão",
        condition: Condition::Positive("finkelstein"),
        text: "Sugestivo de tenossinovite de De Quervain.",
    },
    Rule {
        id: "lateral_epicondylalgia",
        region: "cotovelo",
        condition: Condition::AtLeast {
            tests: &["cozen", "mill"],
            min: 1,
        },
        text: "Sugestivo de epicondilalgia lateral.",
    },
    Rule {
        id: "achilles_rupture",
        region: "tornozelo e pé",
        condition: Condition::Positive("thompson"),
        text: "Sugestivo de ruptura do tendão calcâneo (Thompson positivo).",
    },
    Rule {
        id: "ankle_instability",
        region: "tornozelo e pé",
        condition: Condition::Any(&[
            Condition::Positive("anterior_drawer_ankle"),
            Condition::Positive("talar_tilt"),
        ]),
        text: "Sugestivo de instabilidade ligamentar lateral do tornozelo.",
    },
    Rule {
        id: "severe_pain",
        region: "geral",
        condition: Condition::AtOrAbove("eva", 7.0),
        text: "Dor intensa (EVA ≥ 7): priorizar analgesia e reavaliar a carga dos exercícios.",
    },
];

/// SuggestRequest
///
/// Body of `POST /diagnosis/suggest`; same shape as a ficha's `orthopedic_tests`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SuggestRequest {
    #[serde(default)]
    pub orthopedic_tests: BTreeMap<String, String>,
}

/// DiagnosticSuggestion
///
/// One matched rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DiagnosticSuggestion {
    pub rule_id: String,
    pub region: String,
    pub text: String,
    /// Test ids whose values satisfied the rule.
    pub matched_tests: Vec<String>,
}

/// SuggestionResponse
///
/// Output of `POST /diagnosis/suggest` and `GET /fichas/{id}/suggestion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SuggestionResponse {
    pub suggestions: Vec<DiagnosticSuggestion>,
    /// Matched texts joined by newlines, or a fixed text when nothing matched.
    pub summary: String,
}

/// Runs `tests` through the static rule table.
pub fn suggest(tests: &BTreeMap<String, String>) -> SuggestionResponse {
    suggest_with(RULES, tests)
}

/// Runs `tests` through an arbitrary rule table.
pub fn suggest_with(rules: &[Rule], tests: &BTreeMap<String, String>) -> SuggestionResponse {
    let inputs = Inputs {
        values: tests
            .iter()
            .filter_map(|(id, raw)| TestValue::parse(raw).map(|v| (id.trim().to_lowercase(), v)))
            .collect(),
    };

    let suggestions: Vec<DiagnosticSuggestion> = rules
        .iter()
        .filter_map(|rule| {
            let mut matched = Vec::new();
            if !rule.condition.eval(&inputs, &mut matched) {
                return None;
            }
            matched.sort();
            matched.dedup();
            Some(DiagnosticSuggestion {
                rule_id: rule.id.to_string(),
                region: rule.region.to_string(),
                text: rule.text.to_string(),
                matched_tests: matched,
            })
        })
        .collect();

    let summary = if suggestions.is_empty() {
        NO_PATTERN_TEXT.to_string()
    } else {
        suggestions
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    };

    tracing::debug!(
        evaluated = rules.len(),
        matched = suggestions.len(),
        "orthopedic rule table evaluated"
    );

    SuggestionResponse {
        suggestions,
        summary,
    }
}
