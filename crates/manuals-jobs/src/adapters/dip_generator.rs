//! Pattern-based document intelligence packet generator.
//!
//! Builds the DIP from the chunks the external processor already stored,
//! using regular-expression families for entities, spec hints, golden
//! tests and playbook hints. Every match gets a heuristic confidence and the surrounding text
//! as context. The artifact is written to `manuals/{doc_id}/dip.json`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use manuals_core::{
    dip_artifact_path, BlobStorage, DipArtifact, DipEntity, DipOptions, DipSummary, DocumentChunk,
    Error, GoldenTest, IntelligenceGenerator, JobRecordStore, PlaybookHint, Result, SpecHint,
    UploadOptions,
};

/// Characters of surrounding text kept as context on each side of a match.
const CONTEXT_CHARS: usize = 100;
/// Characters after a golden test match scanned for numbered steps.
const STEP_WINDOW_CHARS: usize = 500;
const MAX_STEPS: usize = 5;
const PLAYBOOK_CONFIDENCE: f64 = 0.8;
const ARTIFACT_CONTENT_TYPE: &str = "application/json";

// =============================================================================
// PATTERN FAMILIES
// =============================================================================

struct PatternFamily {
    kind: &'static str,
    patterns: Vec<Regex>,
}

fn family(kind: &'static str, sources: &[&str]) -> PatternFamily {
    PatternFamily {
        kind,
        patterns: sources
            .iter()
            .filter_map(|src| match Regex::new(&format!("(?i){}", src)) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(kind, pattern = %src, error = %e, "Skipping invalid DIP pattern");
                    None
                }
            })
            .collect(),
    }
}

static ENTITY_PATTERNS: Lazy<Vec<PatternFamily>> = Lazy::new(|| {
    vec![
        family(
            "manufacturer",
            &[
                r"(?:manufacturer|made by|produced by|brand):\s*([A-Za-z\s&.,-]+)",
                r"([A-Za-z\s&.,-]+)\s+(?:inc\.|corp\.|ltd\.|llc\.|company|co\.)",
                r"([A-Za-z\s&.,-]+)\s+(?:technologies|systems|equipment|machinery)",
                r"([A-Za-z\s&.,-]+)\s+(?:grill|oven|furnace|heater|burner)",
            ],
        ),
        family(
            "model",
            &[
                r"(?:model|part number|pn|part no|sku):\s*([A-Z0-9\s\-\.]+)",
                r"model\s+([A-Z0-9\s\-\.]+)",
                r"(?:series|type|version):\s*([A-Z0-9\s\-\.]+)",
                r"([A-Z0-9\s\-\.]+)\s+(?:model|series|type)",
            ],
        ),
        family(
            "specification",
            &[
                r"(?:spec|specification|rating):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:rated|nominal|maximum|minimum|max|min):\s*([0-9\.\s]+)\s*([A-Za-z]+)",
                r"(?:capacity|output|input|power):\s*([0-9\.\s]+)\s*([A-Za-z]+)",
                r"(?:dimensions|size|measurements):\s*([0-9\.\s]+)\s*(?:x|by|×)\s*([0-9\.\s]+)",
            ],
        ),
        family(
            "warning",
            &[
                r"(?:warning|caution|danger|note|important|attention):\s*([A-Za-z0-9\s\-\.!]+)",
                r"⚠️\s*([A-Za-z0-9\s\-\.!]+)",
                r"(?:do not|never|avoid|prevent):\s*([A-Za-z0-9\s\-\.!]+)",
                r"(?:hot surface|high temperature|electrical hazard):\s*([A-Za-z0-9\s\-\.!]+)",
            ],
        ),
        family(
            "procedure",
            &[
                r"(?:step|procedure|instruction|operation):\s*([0-9]+)\.?\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:to|for|how to|how do you):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:start|begin|initiate|activate):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:turn on|switch on|power on):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
        family(
            "material",
            &[
                r"(?:material|construction|made of|fabricated from):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:stainless steel|aluminum|steel|cast iron|ceramic):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:coating|finish|surface):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
        family(
            "certification",
            &[
                r"(?:certified|approved|listed|compliant):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:ul|ce|fcc|fda|nsf|ansi):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:meets|conforms to):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
    ]
});

static SPEC_HINT_PATTERNS: Lazy<Vec<PatternFamily>> = Lazy::new(|| {
    vec![
        family(
            "pressure",
            &[
                r"([0-9\.]+)\s*(?:psi|bar|pa|kpa|mpa)\s*(?:pressure|psig|psia)",
                r"pressure:\s*([0-9\.]+)\s*(psi|bar|pa|kpa|mpa)",
                r"(?:operating|working|max|min)\s+pressure:\s*([0-9\.]+)\s*(psi|bar|pa|kpa|mpa)",
                r"([0-9\.]+)\s*(?:psi|bar|pa|kpa|mpa)\s*(?:operating|working|maximum|minimum)",
            ],
        ),
        family(
            "temperature",
            &[
                r"([0-9\.]+)\s*(?:°c|°f|celsius|fahrenheit|deg)\s*(?:temperature|temp)",
                r"temperature:\s*([0-9\.]+)\s*(°c|°f|celsius|fahrenheit)",
                r"(?:operating|working|max|min)\s+temperature:\s*([0-9\.]+)\s*(°c|°f|celsius|fahrenheit)",
                r"([0-9\.]+)\s*(?:°c|°f|celsius|fahrenheit)\s*(?:operating|working|maximum|minimum)",
                r"(?:heat|heating|cooling)\s+to\s+([0-9\.]+)\s*(°c|°f|celsius|fahrenheit)",
            ],
        ),
        family(
            "voltage",
            &[
                r"([0-9\.]+)\s*(?:v|volts|voltage|dc|ac)",
                r"voltage:\s*([0-9\.]+)\s*(v|volts|dc|ac)",
                r"(?:input|output|operating)\s+voltage:\s*([0-9\.]+)\s*(v|volts|dc|ac)",
                r"([0-9\.]+)\s*(?:v|volts|dc|ac)\s*(?:input|output|operating)",
            ],
        ),
        family(
            "flow_rate",
            &[
                r"([0-9\.]+)\s*(?:gpm|lpm|cfm|gph|lph)\s*(?:flow|rate)",
                r"flow rate:\s*([0-9\.]+)\s*(gpm|lpm|cfm|gph|lph)",
                r"(?:air|gas|water)\s+flow:\s*([0-9\.]+)\s*(gpm|lpm|cfm|gph|lph)",
                r"([0-9\.]+)\s*(?:gpm|lpm|cfm|gph|lph)\s*(?:air|gas|water)\s+flow",
            ],
        ),
        family(
            "dimension",
            &[
                r"([0-9\.]+)\s*(?:in|inch|inches|mm|cm|ft|feet)\s*(?:x|by|×)\s*([0-9\.]+)\s*(?:in|inch|inches|mm|cm|ft|feet)",
                r"size:\s*([0-9\.]+)\s*(?:x|by|×)\s*([0-9\.]+)\s*(?:in|inch|inches|mm|cm|ft|feet)",
                r"(?:length|width|height|depth):\s*([0-9\.]+)\s*(?:in|inch|inches|mm|cm|ft|feet)",
            ],
        ),
        family(
            "power",
            &[
                r"([0-9\.]+)\s*(?:w|watts|kw|kilowatts|hp|horsepower)",
                r"power:\s*([0-9\.]+)\s*(w|watts|kw|kilowatts|hp|horsepower)",
                r"(?:rated|maximum|nominal)\s+power:\s*([0-9\.]+)\s*(w|watts|kw|kilowatts|hp|horsepower)",
            ],
        ),
        family(
            "capacity",
            &[
                r"([0-9\.]+)\s*(?:lbs|pounds|kg|kilograms|tons|gallons|liters)",
                r"capacity:\s*([0-9\.]+)\s*(lbs|pounds|kg|kilograms|tons|gallons|liters)",
                r"(?:cooking|grilling|heating)\s+capacity:\s*([0-9\.]+)\s*(lbs|pounds|kg|kilograms)",
            ],
        ),
        family(
            "efficiency",
            &[
                r"([0-9\.]+)\s*(?:%|percent)\s*(?:efficiency|efficient)",
                r"efficiency:\s*([0-9\.]+)\s*(%|percent)",
                r"(?:thermal|energy|fuel)\s+efficiency:\s*([0-9\.]+)\s*(%|percent)",
            ],
        ),
    ]
});

static GOLDEN_TEST_PATTERNS: Lazy<Vec<PatternFamily>> = Lazy::new(|| {
    vec![
        family(
            "procedure",
            &[
                r"(?:test|check|verify|validate):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:step|procedure)\s+([0-9]+):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:operation|maintenance|cleaning|inspection):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:startup|shutdown|initialization):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:troubleshooting|diagnostic|repair):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
        family(
            "checklist",
            &[
                r"□\s*([A-Za-z0-9\s\-\.]+)",
                r"☐\s*([A-Za-z0-9\s\-\.]+)",
                r"•\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:check|verify|ensure|confirm):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:before|after|during)\s+(?:use|operation|startup):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
        family(
            "measurement",
            &[
                r"(?:measure|check|verify)\s+([A-Za-z0-9\s\-\.]+)\s*(?:with|using)\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:reading|value)\s+(?:should be|must be|is)\s*([0-9\.]+)\s*([A-Za-z]+)",
                r"(?:temperature|pressure|voltage|current)\s+(?:reading|measurement):\s*([0-9\.]+)\s*([A-Za-z]+)",
                r"(?:calibrate|adjust|set)\s+(?:to|at)\s*([0-9\.]+)\s*([A-Za-z]+)",
            ],
        ),
        family(
            "safety",
            &[
                r"(?:safety|precaution|warning)\s+(?:check|test|verify):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:emergency|shutdown|stop)\s+(?:procedure|test):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:fire|gas|electrical)\s+(?:safety|hazard)\s+(?:check|test):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
        family(
            "performance",
            &[
                r"(?:performance|efficiency|output)\s+(?:test|check|verify):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:load|stress|endurance)\s+(?:test|check):\s*([A-Za-z0-9\s\-\.]+)",
                r"(?:quality|functionality)\s+(?:test|check|verify):\s*([A-Za-z0-9\s\-\.]+)",
            ],
        ),
    ]
});

static STEP_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(?:step|procedure)\s+([0-9]+):\s*([A-Za-z0-9\s\-\.]+)").ok()
});

/// Imperative instructions, matched against one trimmed line at a time.
static PLAYBOOK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    family(
        "playbook",
        &[
            r"^(?:always|never|do not|disconnect|remove|insert|replace|check|clean|use|fill|preheat|turn|press|close)\b",
            r"prior to",
            r"when not in use",
        ],
    )
    .patterns
});

static UNIT_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([a-z%°]+(?:/[a-z%°]+)?)").ok()
});

// =============================================================================
// HEURISTICS
// =============================================================================

/// Base 0.7; longer matches and matches carrying a unit score higher.
fn confidence(matched: &str) -> f64 {
    let mut score: f64 = 0.7;
    let length = matched.chars().count();
    if length > 20 {
        score += 0.1;
    } else if length > 10 {
        score += 0.05;
    }
    let lower = matched.to_lowercase();
    if ["psi", "volts", "°c", "°f", "gpm"]
        .iter()
        .any(|unit| lower.contains(unit))
    {
        score += 0.1;
    }
    score.min(1.0)
}

/// Byte offset `chars` characters before `index`, or 0.
fn chars_before(content: &str, index: usize, chars: usize) -> usize {
    if chars == 0 {
        return index;
    }
    content[..index]
        .char_indices()
        .rev()
        .nth(chars - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Byte offset `chars` characters after `index`, or the end of `content`.
fn chars_after(content: &str, index: usize, chars: usize) -> usize {
    content[index..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| index + i)
        .unwrap_or(content.len())
}

fn context_window(content: &str, start: usize, end: usize) -> String {
    let from = chars_before(content, start, CONTEXT_CHARS);
    let to = chars_after(content, end, CONTEXT_CHARS);
    content[from..to].trim().to_string()
}

/// Numbered steps following a golden test match.
fn extract_steps(content: &str, start: usize) -> Vec<String> {
    let Some(pattern) = STEP_PATTERN.as_ref() else {
        return Vec::new();
    };
    let window = &content[start..chars_after(content, start, STEP_WINDOW_CHARS)];
    pattern
        .captures_iter(window)
        .filter_map(|caps| {
            caps.get(2)
                .or_else(|| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|step| step.chars().count() > 5)
        .take(MAX_STEPS)
        .collect()
}

/// Unit written just after a spec value, normalized to upper case.
fn unit_near(content: &str, start: usize, end: usize) -> Option<String> {
    let pattern = UNIT_PATTERN.as_ref()?;
    pattern
        .captures_iter(content)
        .filter(|caps| {
            caps.get(0)
                .map(|m| m.start() >= start && m.end() <= end + 10)
                .unwrap_or(false)
        })
        .find_map(|caps| caps.get(2))
        .map(|m| m.as_str().split_whitespace().collect::<String>().to_uppercase())
        .filter(|unit| !unit.is_empty())
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn captured(caps: &Captures<'_>, group: usize) -> Option<String> {
    caps.get(group).map(|m| m.as_str().trim().to_string())
}

// =============================================================================
// EXTRACTION
// =============================================================================

struct ChunkText {
    content: String,
    page: Option<i32>,
}

fn lowered(chunks: &[DocumentChunk]) -> Vec<ChunkText> {
    chunks
        .iter()
        .map(|chunk| ChunkText {
            content: chunk.content.to_lowercase(),
            page: chunk.page.or(Some(1)),
        })
        .collect()
}

/// Entities from every entity family. Exact repeats on a page are dropped.
pub fn extract_entities(chunks: &[DocumentChunk]) -> Vec<DipEntity> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for chunk in lowered(chunks) {
        for family in ENTITY_PATTERNS.iter() {
            for pattern in &family.patterns {
                for caps in pattern.captures_iter(&chunk.content) {
                    let (Some(whole), Some(value)) = (caps.get(0), captured(&caps, 1)) else {
                        continue;
                    };
                    if value.chars().count() <= 2 {
                        continue;
                    }
                    if !seen.insert((family.kind, value.clone(), chunk.page)) {
                        continue;
                    }
                    entities.push(DipEntity {
                        entity_type: family.kind.to_string(),
                        value,
                        confidence: confidence(whole.as_str()),
                        page: chunk.page,
                        context: Some(context_window(&chunk.content, whole.start(), whole.end())),
                    });
                }
            }
        }
    }

    entities
}

/// Spec values with their unit, from the capture group or the nearby text.
pub fn extract_spec_hints(chunks: &[DocumentChunk]) -> Vec<SpecHint> {
    let mut hints = Vec::new();

    for chunk in lowered(chunks) {
        for family in SPEC_HINT_PATTERNS.iter() {
            for pattern in &family.patterns {
                for caps in pattern.captures_iter(&chunk.content) {
                    let (Some(whole), Some(value)) = (caps.get(0), captured(&caps, 1)) else {
                        continue;
                    };
                    if value.is_empty() {
                        continue;
                    }
                    let unit = captured(&caps, 2)
                        .filter(|u| !u.is_empty())
                        .or_else(|| unit_near(&chunk.content, whole.start(), whole.end()));
                    hints.push(SpecHint {
                        hint_type: family.kind.to_string(),
                        value,
                        unit,
                        confidence: confidence(whole.as_str()),
                        page: chunk.page,
                        context: Some(context_window(&chunk.content, whole.start(), whole.end())),
                    });
                }
            }
        }
    }

    hints
}

/// Suggested verification scenarios.
pub fn extract_golden_tests(chunks: &[DocumentChunk]) -> Vec<GoldenTest> {
    let mut tests = Vec::new();

    for chunk in lowered(chunks) {
        for family in GOLDEN_TEST_PATTERNS.iter() {
            for pattern in &family.patterns {
                for caps in pattern.captures_iter(&chunk.content) {
                    let (Some(whole), Some(description)) = (caps.get(0), captured(&caps, 1))
                    else {
                        continue;
                    };
                    if description.chars().count() <= 5 {
                        continue;
                    }
                    tests.push(GoldenTest {
                        test_name: format!("{} Test", title_case(family.kind)),
                        test_type: family.kind.to_string(),
                        description,
                        steps: extract_steps(&chunk.content, whole.start()),
                        expected_result: Some(context_window(
                            &chunk.content,
                            whole.start(),
                            whole.end(),
                        )),
                        confidence: confidence(whole.as_str()),
                        page: chunk.page,
                    });
                }
            }
        }
    }

    tests
}

/// Operator instructions, one per matching line, kept in the document's own casing.
pub fn extract_playbook_hints(chunks: &[DocumentChunk]) -> Vec<PlaybookHint> {
    let mut hints = Vec::new();

    for chunk in chunks {
        let page = chunk.page.or(Some(1));
        for line in chunk.content.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            if PLAYBOOK_PATTERNS.iter().any(|pattern| pattern.is_match(line)) {
                hints.push(PlaybookHint {
                    hint: line.to_string(),
                    page,
                    confidence: PLAYBOOK_CONFIDENCE,
                });
            }
        }
    }

    hints
}

/// Build the full packet for a document.
pub fn build_artifact(doc_id: &str, chunks: &[DocumentChunk]) -> DipArtifact {
    DipArtifact {
        doc_id: doc_id.to_string(),
        entities: extract_entities(chunks),
        spec_hints: extract_spec_hints(chunks),
        golden_tests: extract_golden_tests(chunks),
        playbook_hints: extract_playbook_hints(chunks),
        generated_at: Some(Utc::now()),
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

/// [`IntelligenceGenerator`] that mines the processed chunks of a document.
pub struct PatternDipGenerator {
    store: Arc<dyn JobRecordStore>,
    storage: Arc<dyn BlobStorage>,
}

impl PatternDipGenerator {
    pub fn new(store: Arc<dyn JobRecordStore>, storage: Arc<dyn BlobStorage>) -> Self {
        Self { store, storage }
    }
}

#[async_trait]
impl IntelligenceGenerator for PatternDipGenerator {
    async fn generate_dip(
        &self,
        _data: &[u8],
        doc_id: &str,
        file_name: &str,
        options: &DipOptions,
    ) -> Result<DipSummary> {
        let start = Instant::now();
        let chunks = self.store.get_chunks_by_doc_id(doc_id).await?;
        if chunks.is_empty() {
            return Err(Error::Intelligence(format!(
                "No processed chunks for document {}",
                doc_id
            )));
        }

        debug!(
            subsystem = "intelligence",
            component = "pattern_dip",
            doc_id,
            job_id = %options.job_id,
            chunk_count = chunks.len(),
            file_name,
            "Extracting intelligence packet"
        );

        let artifact = build_artifact(doc_id, &chunks);
        let body = serde_json::to_vec_pretty(&artifact)?;
        self.storage
            .upload(
                &dip_artifact_path(doc_id),
                &body,
                &UploadOptions::new(ARTIFACT_CONTENT_TYPE).with_upsert(true),
            )
            .await
            .map_err(|e| Error::Intelligence(format!("Failed to store DIP artifact: {}", e)))?;

        let summary = DipSummary {
            entities_count: artifact.entities.len() as u64,
            hints_count: artifact.spec_hints.len() as u64,
            tests_count: artifact.golden_tests.len() as u64,
            playbook_count: artifact.playbook_hints.len() as u64,
            entities: artifact.entities,
        };

        info!(
            subsystem = "intelligence",
            component = "pattern_dip",
            doc_id,
            job_id = %options.job_id,
            entity_count = summary.entities_count,
            hints = summary.hints_count,
            tests = summary.tests_count,
            playbook = summary.playbook_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Intelligence packet generated"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk(content: &str, page: Option<i32>) -> DocumentChunk {
        DocumentChunk {
            chunk_id: Uuid::new_v4(),
            doc_id: "doc".into(),
            chunk_index: 0,
            page,
            content: content.into(),
            content_type: "text".into(),
        }
    }

    #[test]
    fn test_all_patterns_compile() {
        let entity: usize = ENTITY_PATTERNS.iter().map(|f| f.patterns.len()).sum();
        let hints: usize = SPEC_HINT_PATTERNS.iter().map(|f| f.patterns.len()).sum();
        let tests: usize = GOLDEN_TEST_PATTERNS.iter().map(|f| f.patterns.len()).sum();
        assert_eq!(entity, 26);
        assert_eq!(hints, 29);
        assert_eq!(tests, 20);
        assert_eq!(PLAYBOOK_PATTERNS.len(), 3);
        assert!(STEP_PATTERN.is_some());
        assert!(UNIT_PATTERN.is_some());
    }

    #[test]
    fn test_confidence_heuristic() {
        assert_eq!(confidence("abc"), 0.7);
        assert!((confidence("model: bbq-2000") - 0.75).abs() < 1e-9);
        assert!((confidence("maximum operating pressure") - 0.8).abs() < 1e-9);
        assert!((confidence("pressure: 30 psi") - 0.85).abs() < 1e-9);
        assert!(confidence("operating pressure: 30 psi maximum") <= 1.0);
    }

    #[test]
    fn test_pressure_hint_with_unit() {
        let hints = extract_spec_hints(&[chunk("Pressure: 30 psi", Some(3))]);
        let pressure = hints
            .iter()
            .find(|h| h.hint_type == "pressure")
            .expect("pressure hint");
        assert_eq!(pressure.value, "30");
        assert_eq!(pressure.unit.as_deref(), Some("psi"));
        assert_eq!(pressure.page, Some(3));
        assert_eq!(pressure.context.as_deref(), Some("pressure: 30 psi"));
    }

    #[test]
    fn test_unit_recovered_from_surrounding_text() {
        let hints = extract_spec_hints(&[chunk("rated at 1500 watts", None)]);
        let power = hints
            .iter()
            .find(|h| h.hint_type == "power")
            .expect("power hint");
        assert_eq!(power.value, "1500");
        assert_eq!(power.unit.as_deref(), Some("WATTS"));
        assert_eq!(power.page, Some(1));
    }

    #[test]
    fn test_entities_skip_short_values_and_repeats() {
        let entities = extract_entities(&[chunk(
            "Model: BBQ-2000, Model: BBQ-2000, Model: ab",
            Some(1),
        )]);
        let models: Vec<_> = entities
            .iter()
            .filter(|e| e.entity_type == "model")
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(models, vec!["bbq-2000"]);
    }

    #[test]
    fn test_golden_test_collects_steps() {
        let text = "Maintenance: clean the grill monthly; Procedure 1: remove the grease tray; \
                    Step 2: wipe the burner cover";
        let tests = extract_golden_tests(&[chunk(text, Some(2))]);
        let procedure = tests
            .iter()
            .find(|t| t.test_type == "procedure" && t.description == "clean the grill monthly")
            .expect("procedure test");
        assert_eq!(procedure.test_name, "Procedure Test");
        assert_eq!(procedure.page, Some(2));
        assert_eq!(
            procedure.steps,
            vec!["remove the grease tray".to_string(), "wipe the burner cover".to_string()]
        );
    }

    #[test]
    fn test_playbook_hints_take_one_hint_per_line() {
        let text = "Safety\n  Always wear gloves when handling the grate.  \n\
                    Disconnect power prior to cleaning.\n\
                    Store the cover when not in use.\n\
                    The grill ships assembled.\n\
                    Checkered finish on the lid.";
        let hints = extract_playbook_hints(&[
            chunk(text, Some(4)),
            chunk("Preheat for 10 minutes", None),
        ]);

        let lines: Vec<_> = hints.iter().map(|h| h.hint.as_str()).collect();
        assert_eq!(
            lines,
            vec![
                "Always wear gloves when handling the grate.",
                "Disconnect power prior to cleaning.",
                "Store the cover when not in use.",
                "Preheat for 10 minutes",
            ]
        );
        assert_eq!(hints[0].page, Some(4));
        assert_eq!(hints[3].page, Some(1));
        assert!(hints.iter().all(|h| (h.confidence - 0.8).abs() < 1e-9));
    }

    #[test]
    fn test_context_window_respects_char_boundaries() {
        let content = format!("{}°c {}", "é".repeat(150), "ü".repeat(150));
        let start = content.find("°c").unwrap();
        let ctx = context_window(&content, start, start + "°c".len());
        assert_eq!(ctx.chars().count(), 100 + 2 + 100);
    }

    #[tokio::test]
    async fn test_generator_writes_artifact() {
        use crate::mock::{MockBlobStorage, MockJobStore};

        let store = Arc::new(MockJobStore::new());
        store.insert_chunks("doc", vec![chunk("Pressure: 30 psi", Some(1))]);
        let storage = Arc::new(MockBlobStorage::new());
        let generator = PatternDipGenerator::new(store, storage.clone());

        let options = DipOptions {
            job_id: Uuid::new_v4(),
            manufacturer: "Kenyon".into(),
            model: "BBQ".into(),
            asset_uid: Uuid::nil(),
            system_norm: "Galley".into(),
            subsystem_norm: "Cooking".into(),
        };
        let summary = generator
            .generate_dip(b"%PDF", "doc", "manual.pdf", &options)
            .await
            .unwrap();
        assert!(summary.hints_count >= 1);

        let raw = storage.get("manuals/doc/dip.json").expect("artifact");
        let artifact: DipArtifact = serde_json::from_slice(&raw).unwrap();
        assert_eq!(artifact.doc_id, "doc");
        assert_eq!(artifact.spec_hints.len() as u64, summary.hints_count);
        assert_eq!(artifact.playbook_hints.len() as u64, summary.playbook_count);
    }

    #[tokio::test]
    async fn test_generator_without_chunks_fails() {
        use crate::mock::{MockBlobStorage, MockJobStore};

        let generator = PatternDipGenerator::new(
            Arc::new(MockJobStore::new()),
            Arc::new(MockBlobStorage::new()),
        );
        let options = DipOptions {
            job_id: Uuid::new_v4(),
            manufacturer: "Kenyon".into(),
            model: "BBQ".into(),
            asset_uid: Uuid::nil(),
            system_norm: "Galley".into(),
            subsystem_norm: "Cooking".into(),
        };
        let err = generator
            .generate_dip(b"%PDF", "doc", "manual.pdf", &options)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTELLIGENCE_ERROR");
    }
}
