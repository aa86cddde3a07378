//! Encoder: text → graph mutations.
//!
//! One encode extracts entities, keywords, time phrases, relations, and
//! sentiment from the text, reuses or creates neurons, wires synapses from
//! the anchor, detects contradictions with stored claims, normalizes tags,
//! and assembles a fiber with an STM maturation record. Everything lands in
//! one store transaction: a concurrent retrieval sees the whole memory or
//! none of it.

pub mod conflict;
pub mod tags;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{
    suggest_memory_type, BrainConfig, Fiber, Maturation, MemoryType, Metadata, Neuron,
    NeuronState, NeuronType, Synapse, SynapseType, W_MAX,
};
use crate::extraction::{
    extract_entities, extract_keywords, extract_relations, extract_sentiment, extract_time_hints,
    is_action_verb, simhash64, Valence, DEDUP_DISTANCE,
};
use crate::storage::{EncodeBatch, Result, SqliteStore};

use conflict::{conflict_metadata, extract_predicates, Conflict, Resolution};

/// Weight of anchor → member CO_OCCURS links.
const CO_OCCURS_WEIGHT: f64 = 0.5;
/// Weight of anchor → action INVOLVES links.
const INVOLVES_WEIGHT: f64 = 0.6;
/// Weight of anchor → time HAPPENED_AT links.
const HAPPENED_AT_WEIGHT: f64 = 0.7;
/// Confirmatory boost when agent tags overlap extracted tags.
const CONFIRMATORY_BOOST: f64 = 0.1;

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// Input for encoding one memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EncodeRequest {
    /// The text to remember.
    pub content: String,
    /// Agent-supplied tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Memory type; suggested from the text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_type: Option<MemoryType>,
    /// Free-form metadata carried on the fiber.
    #[serde(default)]
    pub metadata: Metadata,
}

impl EncodeRequest {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tags: Vec::new(),
            memory_type: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }
}

/// Result of one encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeResult {
    pub fiber_id: String,
    pub neurons_created: usize,
    pub synapses_created: usize,
    /// True when the content matched an existing fiber and was reinforced
    /// instead of re-encoded.
    pub deduplicated: bool,
    pub conflicts_detected: usize,
}

// ============================================================================
// ENCODER
// ============================================================================

/// One extracted span destined to become (or reuse) a neuron.
struct Extracted {
    neuron_type: NeuronType,
    content: String,
}

static SPATIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:at|in)\s+(?:the\s+)?([a-z][a-z ]{2,30}?)(?:\s*[.,;]|$)").unwrap()
});

/// "X <verb> Y" links with verb-specific synapse types.
static VERB_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([A-Za-z0-9._\-]+)\s+(suggested|suggests|uses|used|requires|prevents|enables|discussed)\s+([A-Za-z0-9._\-]+)",
    )
    .unwrap()
});

/// The text → graph encoder for one brain.
pub struct Encoder {
    store: Arc<SqliteStore>,
    config: BrainConfig,
}

impl Encoder {
    pub fn new(store: Arc<SqliteStore>, config: BrainConfig) -> Self {
        Self { store, config }
    }

    /// Encode one memory at `now`.
    pub fn encode(&self, request: &EncodeRequest, now: DateTime<Utc>) -> Result<EncodeResult> {
        let content = request.content.trim();
        let memory_type = request
            .memory_type
            .unwrap_or_else(|| suggest_memory_type(content));
        let content_hash = simhash64(content);

        // Dedup: a near-identical memory reinforces instead of re-encoding.
        if let Some(result) = self.try_dedup(content, content_hash, now)? {
            return Ok(result);
        }

        // Extraction.
        let sentiment = extract_sentiment(content);
        let relations = extract_relations(content);
        let time_hints = extract_time_hints(content, now);
        let extracted = self.extract_spans(content, &time_hints);

        // Create or reuse neurons.
        let mut batch = EncodeBatch::default();
        let mut neurons: Vec<Neuron> = Vec::new();
        let mut neurons_created = 0usize;
        let mut seen: HashSet<(NeuronType, String)> = HashSet::new();
        for span in &extracted {
            let canonical = crate::core::canonicalize(&span.content);
            if canonical.is_empty() || !seen.insert((span.neuron_type, canonical.clone())) {
                continue;
            }
            match self
                .store
                .find_neuron_by_content(span.neuron_type, &canonical)?
            {
                Some(existing) => neurons.push(existing),
                None => {
                    let mut neuron = Neuron::new(span.neuron_type, span.content.clone())
                        .with_content_hash(content_hash);
                    neuron.created_at = now;
                    let mut state = NeuronState::new(&neuron.id, memory_type.decay_rate());
                    state.created_at = now;
                    state.firing_threshold = self.config.default_firing_threshold;
                    state.refractory_period_ms = self.config.default_refractory_ms;
                    batch.states.push(state);
                    batch.neurons.push(neuron.clone());
                    neurons.push(neuron);
                    neurons_created += 1;
                }
            }
        }
        if neurons.is_empty() {
            // Nothing extractable: remember the whole text as one concept.
            let mut neuron =
                Neuron::new(NeuronType::Concept, content.to_string()).with_content_hash(content_hash);
            neuron.created_at = now;
            let mut state = NeuronState::new(&neuron.id, memory_type.decay_rate());
            state.created_at = now;
            state.firing_threshold = self.config.default_firing_threshold;
            batch.states.push(state);
            batch.neurons.push(neuron.clone());
            neurons.push(neuron);
            neurons_created += 1;
        }

        // Anchor: highest-ranked entity, else first time marker, else first.
        let anchor_id = neurons
            .iter()
            .find(|n| n.neuron_type == NeuronType::Entity)
            .or_else(|| neurons.iter().find(|n| n.neuron_type == NeuronType::Time))
            .unwrap_or(&neurons[0])
            .id
            .clone();

        // Synapses from the anchor to every other member.
        let mut synapses: Vec<Synapse> = Vec::new();
        let by_id: HashMap<&str, &Neuron> = neurons.iter().map(|n| (n.id.as_str(), n)).collect();
        for neuron in &neurons {
            if neuron.id == anchor_id {
                continue;
            }
            let (synapse_type, weight) = match neuron.neuron_type {
                NeuronType::Action => (SynapseType::Involves, INVOLVES_WEIGHT),
                NeuronType::Time => (SynapseType::HappenedAt, HAPPENED_AT_WEIGHT),
                _ => (SynapseType::CoOccurs, CO_OCCURS_WEIGHT),
            };
            synapses.push(Synapse::new(&anchor_id, &neuron.id, synapse_type, weight));
        }

        // Typed relation synapses from the extracted candidates.
        for relation in &relations {
            let source = match_span(&neurons, &relation.source_span);
            let target = match_span(&neurons, &relation.target_span);
            if let (Some(s), Some(t)) = (source, target) {
                if s != t {
                    synapses.push(Synapse::new(
                        s,
                        t,
                        relation.synapse_type,
                        0.3 + 0.4 * relation.confidence,
                    ));
                }
            }
        }

        // Verb-specific links ("Alice suggested JWT"). An unresolved
        // subject (pronoun) falls back to the anchor.
        for cap in VERB_LINK_RE.captures_iter(content) {
            let subject = match_span(&neurons, &cap[1])
                .map(str::to_string)
                .unwrap_or_else(|| anchor_id.clone());
            let Some(object) = match_span(&neurons, &cap[3]) else {
                continue;
            };
            if subject == object {
                continue;
            }
            let synapse_type = match cap[2].to_lowercase().as_str() {
                "suggested" | "suggests" => SynapseType::Suggested,
                "uses" | "used" => SynapseType::Uses,
                "requires" => SynapseType::Requires,
                "prevents" => SynapseType::Prevents,
                "enables" => SynapseType::Enables,
                _ => SynapseType::Involves,
            };
            if !synapses
                .iter()
                .any(|s| s.source_id == subject && s.target_id == object && s.synapse_type == synapse_type)
            {
                synapses.push(Synapse::new(&subject, object, synapse_type, 0.65));
            }
        }

        // Emotional wiring: FELT from the anchor to the brain's singleton
        // emotion neuron.
        if sentiment.valence != Valence::Neutral {
            if let Some(tag) = sentiment.emotion_tags.first() {
                let emotion_id = match self
                    .store
                    .find_neuron_by_content(NeuronType::State, tag)?
                {
                    Some(n) => n.id,
                    None => {
                        let mut n = Neuron::new(NeuronType::State, tag.clone());
                        n.created_at = now;
                        let mut state = NeuronState::new(&n.id, 0.02);
                        state.created_at = now;
                        batch.states.push(state);
                        batch.neurons.push(n.clone());
                        neurons_created += 1;
                        n.id
                    }
                };
                synapses.push(Synapse::new(
                    &anchor_id,
                    &emotion_id,
                    SynapseType::Felt,
                    0.4 + 0.3 * sentiment.intensity,
                ));
            }
        }

        // Conflict detection against overlapping fibers.
        let predicates = extract_predicates(content);
        let neuron_ids: Vec<String> = neurons.iter().map(|n| n.id.clone()).collect();
        let conflicts = self.detect_conflicts(&predicates, &neuron_ids, now)?;
        for (conflict, resolution) in &conflicts {
            let new_object = match_span(&neurons, &conflict.new_predicate.object);
            let Some(new_object) = new_object else { continue };
            let mut contradiction = Synapse::new(
                new_object,
                &conflict.existing_neuron_id,
                SynapseType::Contradicts,
                0.8,
            );
            contradiction.metadata = conflict_metadata(resolution);
            synapses.push(contradiction);

            // Both sides are disputed; the loser is superseded.
            let new_object = new_object.to_string();
            mark_disputed(&mut batch, &by_id, &new_object, false);
            if let Some(existing) = self.store.get_neuron(&conflict.existing_neuron_id)? {
                let lost = resolution.resolution != Resolution::KeepExisting;
                let mut metadata = existing.metadata.clone();
                metadata.insert("_disputed".into(), serde_json::Value::Bool(true));
                if lost {
                    metadata.insert("_superseded".into(), serde_json::Value::Bool(true));
                }
                batch.neuron_metadata.push((existing.id.clone(), metadata));
            }
            if resolution.resolution == Resolution::KeepExisting {
                mark_disputed(&mut batch, &by_id, &new_object, true);
            }
        }

        // Tags: extraction-derived plus normalized agent tags.
        let existing_tags = self.nearby_tags(&neuron_ids)?;
        let mut raw_auto: Vec<String> = Vec::new();
        for neuron in &neurons {
            if matches!(
                neuron.neuron_type,
                NeuronType::Entity | NeuronType::Concept | NeuronType::Spatial
            ) {
                raw_auto.push(neuron.canonical_content());
            }
        }
        raw_auto.extend(sentiment.emotion_tags.iter().cloned());
        let auto_tags = tags::normalize_tags(raw_auto.iter(), &existing_tags);
        let agent_tags = tags::normalize_tags(request.tags.iter(), &existing_tags);

        // Confirmatory boost: agent agreement strengthens the anchor's
        // outgoing links.
        if !auto_tags.is_disjoint(&agent_tags) {
            for synapse in synapses.iter_mut().filter(|s| s.source_id == anchor_id) {
                synapse.weight = (synapse.weight + CONFIRMATORY_BOOST).min(W_MAX);
            }
        }

        // Assemble the fiber.
        let pathway = build_pathway(&neurons, &anchor_id);
        let neuron_id_set: BTreeSet<String> = neuron_ids.iter().cloned().collect();
        let synapse_id_set: BTreeSet<String> = synapses.iter().map(|s| s.id.clone()).collect();
        let mut fiber = Fiber::create(
            neuron_id_set,
            synapse_id_set,
            anchor_id.clone(),
            pathway,
            summarize(content),
        )
        .map_err(crate::storage::StorageError::Corrupt)?;
        fiber.created_at = now;
        fiber.salience = memory_type.default_salience();
        fiber.auto_tags = auto_tags;
        fiber.agent_tags = agent_tags;
        fiber.metadata = request.metadata.clone();
        if !predicates.is_empty() {
            fiber.metadata.insert(
                "_predicates".into(),
                serde_json::to_value(&predicates).unwrap_or_default(),
            );
        }
        if sentiment.valence != Valence::Neutral {
            fiber.metadata.insert(
                "_emotion_valence".into(),
                serde_json::Value::String(
                    match sentiment.valence {
                        Valence::Positive => "positive",
                        Valence::Negative => "negative",
                        Valence::Neutral => "neutral",
                    }
                    .to_string(),
                ),
            );
            if let Some(v) = serde_json::Number::from_f64(sentiment.intensity) {
                fiber
                    .metadata
                    .insert("_emotion_intensity".into(), serde_json::Value::Number(v));
            }
        }
        fiber.time_start = time_hints.iter().map(|h| h.start).min().or(Some(now));
        fiber.time_end = match memory_type.expiry() {
            Some(window) => Some(now + window),
            None => time_hints.iter().map(|h| h.end).max(),
        };

        let synapses_created = synapses.len();
        let fiber_id = fiber.id.clone();
        let conflicts_detected = conflicts.len();

        for synapse in &mut synapses {
            synapse.created_at = now;
        }
        batch.synapses = synapses;
        batch.maturation = Some(Maturation::new(&fiber.id, now));
        batch.memory_type = Some((fiber.id.clone(), memory_type));
        batch.fiber = Some(fiber);
        self.store.apply_encode(&batch)?;

        tracing::debug!(
            fiber = %fiber_id,
            neurons = neurons_created,
            synapses = synapses_created,
            conflicts = conflicts_detected,
            "encoded memory"
        );

        Ok(EncodeResult {
            fiber_id,
            neurons_created,
            synapses_created,
            deduplicated: false,
            conflicts_detected,
        })
    }

    /// Dedup path: SimHash within the radius plus token-equivalent fiber
    /// content reuses the fiber and counts as a reinforcement.
    fn try_dedup(
        &self,
        content: &str,
        content_hash: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<EncodeResult>> {
        if content_hash == 0 {
            return Ok(None);
        }
        let near = self
            .store
            .find_neurons_by_hash(content_hash, DEDUP_DISTANCE)?;
        if near.is_empty() {
            return Ok(None);
        }

        let ids: Vec<String> = near.iter().map(|n| n.id.clone()).collect();
        let fibers = self.store.find_fibers_containing_any(&ids)?;
        for mut fiber in fibers {
            if !tokens_equivalent(&fiber.summary, content) {
                continue;
            }
            // Re-presenting the memory conducts the trail.
            fiber.conduct(now);
            let maturation = match self.store.get_maturation(&fiber.id)? {
                Some(mut m) => {
                    m.reinforce(now);
                    m.advance(now);
                    m
                }
                None => {
                    let mut m = Maturation::new(&fiber.id, now);
                    m.reinforce(now);
                    m
                }
            };
            let batch = EncodeBatch {
                maturation: Some(maturation),
                fiber_updates: vec![fiber.clone()],
                ..Default::default()
            };
            self.store.apply_encode(&batch)?;
            tracing::debug!(fiber = %fiber.id, "deduplicated encode");
            return Ok(Some(EncodeResult {
                fiber_id: fiber.id,
                neurons_created: 0,
                synapses_created: 0,
                deduplicated: true,
                conflicts_detected: 0,
            }));
        }
        Ok(None)
    }

    /// Split content into typed spans: entities, spatial phrases, time
    /// phrases, action verbs, and concept keywords.
    fn extract_spans(
        &self,
        content: &str,
        time_hints: &[crate::extraction::TimeHint],
    ) -> Vec<Extracted> {
        let mut spans: Vec<Extracted> = Vec::new();

        for hint in time_hints {
            spans.push(Extracted {
                neuron_type: NeuronType::Time,
                content: hint.phrase.clone(),
            });
        }

        let mut covered: Vec<String> = Vec::new();
        for cap in SPATIAL_RE.captures_iter(content) {
            let place = cap[1].trim().to_string();
            if time_hints
                .iter()
                .any(|h| h.phrase.eq_ignore_ascii_case(&place))
            {
                continue;
            }
            covered.push(place.to_lowercase());
            spans.push(Extracted {
                neuron_type: NeuronType::Spatial,
                content: place,
            });
        }

        let entities = extract_entities(content);
        for entity in &entities {
            covered.push(entity.to_lowercase());
            spans.push(Extracted {
                neuron_type: NeuronType::Entity,
                content: entity.clone(),
            });
        }

        for keyword in extract_keywords(content, 2) {
            if covered.iter().any(|c| c.contains(&keyword)) {
                continue;
            }
            if time_hints
                .iter()
                .any(|h| h.phrase.to_lowercase().contains(&keyword))
            {
                continue;
            }
            let neuron_type = if is_action_verb(&keyword) {
                NeuronType::Action
            } else {
                NeuronType::Concept
            };
            spans.push(Extracted {
                neuron_type,
                content: keyword,
            });
        }

        spans
    }

    /// Compare new predicates against claims stored on overlapping fibers.
    fn detect_conflicts(
        &self,
        predicates: &[conflict::Predicate],
        neuron_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<(Conflict, conflict::AutoResolution)>> {
        if predicates.is_empty() {
            return Ok(Vec::new());
        }
        let mut conflicts = Vec::new();
        let candidates = self.store.find_fibers_containing_any(neuron_ids)?;

        for fiber in &candidates {
            let Some(stored) = fiber.metadata.get("_predicates") else {
                continue;
            };
            let stored: Vec<conflict::Predicate> = match serde_json::from_value(stored.clone()) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            for new_predicate in predicates {
                for existing in &stored {
                    if !conflict::contradicts(new_predicate, existing) {
                        continue;
                    }
                    // The existing claim's object neuron takes the hit.
                    let Some(existing_neuron) = self
                        .store
                        .find_neurons_containing(&existing.object, 1)?
                        .into_iter()
                        .next()
                    else {
                        continue;
                    };
                    let conflict = Conflict {
                        new_predicate: new_predicate.clone(),
                        existing_predicate: existing.clone(),
                        existing_neuron_id: existing_neuron.id.clone(),
                    };
                    let resolution = conflict::try_auto_resolve(&conflict, &existing_neuron, now);
                    conflicts.push((conflict, resolution));
                }
            }
        }
        Ok(conflicts)
    }

    /// Tags already used by fibers overlapping this memory, for
    /// normalization near-matching.
    fn nearby_tags(&self, neuron_ids: &[String]) -> Result<BTreeSet<String>> {
        let fibers = self.store.find_fibers_containing_any(neuron_ids)?;
        Ok(fibers.iter().flat_map(|f| f.tags()).collect())
    }
}

/// Deterministic pathway: anchor first, then members ordered
/// time → space → entity → action → concept, content as tiebreak.
fn build_pathway(neurons: &[Neuron], anchor_id: &str) -> Vec<String> {
    let mut rest: Vec<&Neuron> = neurons.iter().filter(|n| n.id != anchor_id).collect();
    rest.sort_by(|a, b| {
        a.neuron_type
            .pathway_rank()
            .cmp(&b.neuron_type.pathway_rank())
            .then(a.canonical_content().cmp(&b.canonical_content()))
    });
    std::iter::once(anchor_id.to_string())
        .chain(rest.into_iter().map(|n| n.id.clone()))
        .collect()
}

/// Find the neuron whose content matches a text span (containment either
/// way, case-insensitive).
fn match_span<'a>(neurons: &'a [Neuron], span: &str) -> Option<&'a str> {
    let span_lower = span.trim().to_lowercase();
    if span_lower.is_empty() {
        return None;
    }
    neurons
        .iter()
        .filter(|n| {
            let c = n.canonical_content();
            !c.is_empty() && (span_lower.contains(&c) || c.contains(&span_lower))
        })
        // Longest match wins so "auth" does not shadow "authentication".
        .max_by_key(|n| n.content.len())
        .map(|n| n.id.as_str())
}

fn mark_disputed(
    batch: &mut EncodeBatch,
    by_id: &HashMap<&str, &Neuron>,
    neuron_id: &str,
    superseded: bool,
) {
    // Prefer updating the in-batch copy of a freshly created neuron.
    if let Some(n) = batch.neurons.iter_mut().find(|n| n.id == neuron_id) {
        n.metadata
            .insert("_disputed".into(), serde_json::Value::Bool(true));
        if superseded {
            n.metadata
                .insert("_superseded".into(), serde_json::Value::Bool(true));
        }
        return;
    }
    if let Some(n) = by_id.get(neuron_id) {
        let mut metadata = n.metadata.clone();
        metadata.insert("_disputed".into(), serde_json::Value::Bool(true));
        if superseded {
            metadata.insert("_superseded".into(), serde_json::Value::Bool(true));
        }
        batch.neuron_metadata.push((neuron_id.to_string(), metadata));
    }
}

/// Token-set equivalence for dedup: every content token of one text has a
/// containment match in the other.
fn tokens_equivalent(a: &str, b: &str) -> bool {
    let ta = content_tokens(a);
    let tb = content_tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return false;
    }
    let covered = |from: &BTreeSet<String>, onto: &BTreeSet<String>| {
        from.iter()
            .all(|t| onto.iter().any(|o| o.contains(t.as_str()) || t.contains(o.as_str())))
    };
    covered(&ta, &tb) && covered(&tb, &ta)
}

fn content_tokens(text: &str) -> BTreeSet<String> {
    static TOKEN_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[a-z0-9à-ỹ][a-z0-9à-ỹ._\-]*").unwrap());
    TOKEN_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().trim_end_matches(['.', '-']).to_string())
        .filter(|t| t.len() >= 2 && !crate::extraction::is_stop_word(t))
        .collect()
}

fn summarize(content: &str) -> String {
    const MAX: usize = 280;
    if content.len() <= MAX {
        return content.to_string();
    }
    let mut cut = MAX;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &content[..cut])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> (Arc<SqliteStore>, Encoder) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let encoder = Encoder::new(store.clone(), BrainConfig::default());
        (store, encoder)
    }

    fn neuron_contents(store: &SqliteStore) -> Vec<(NeuronType, String)> {
        store
            .list_neurons(&crate::storage::NeuronFilter {
                limit: 1000,
                ..Default::default()
            })
            .unwrap()
            .into_iter()
            .map(|n| (n.neuron_type, n.canonical_content()))
            .collect()
    }

    #[test]
    fn basic_encode_creates_expected_neurons_and_links() {
        let (store, encoder) = encoder();
        let result = encoder
            .encode(
                &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
                Utc::now(),
            )
            .unwrap();

        assert!(!result.deduplicated);
        assert!(result.neurons_created >= 4);
        assert!(result.synapses_created >= 4);

        let contents = neuron_contents(&store);
        assert!(contents.contains(&(NeuronType::Entity, "alice".into())));
        assert!(contents.contains(&(NeuronType::Spatial, "coffee shop".into())));
        assert!(contents.contains(&(NeuronType::Entity, "jwt".into())));
        assert!(contents.contains(&(NeuronType::Concept, "auth".into())));

        let alice = store
            .find_neuron_by_content(NeuronType::Entity, "alice")
            .unwrap()
            .unwrap();
        let jwt = store
            .find_neuron_by_content(NeuronType::Entity, "jwt")
            .unwrap()
            .unwrap();
        let out = store.outgoing_synapses(&alice.id).unwrap();
        assert!(out
            .iter()
            .any(|s| s.target_id == jwt.id && s.synapse_type == SynapseType::CoOccurs));
        assert!(out
            .iter()
            .any(|s| s.target_id == jwt.id && s.synapse_type == SynapseType::Suggested));
    }

    #[test]
    fn dedup_reinforces_instead_of_duplicating() {
        let (store, encoder) = encoder();
        let now = Utc::now();
        let first = encoder
            .encode(&EncodeRequest::new("Database host is db.example.com"), now)
            .unwrap();
        let second = encoder
            .encode(&EncodeRequest::new("DB host is db.example.com"), now)
            .unwrap();

        assert!(second.deduplicated);
        assert_eq!(second.fiber_id, first.fiber_id);
        assert_eq!(store.count_fibers().unwrap(), 1);

        let m = store.get_maturation(&first.fiber_id).unwrap().unwrap();
        assert_eq!(m.reinforcement_count, 1);
        let f = store.get_fiber(&first.fiber_id).unwrap().unwrap();
        assert_eq!(f.frequency, 1);
    }

    #[test]
    fn encoding_same_content_twice_creates_one_fiber() {
        let (store, encoder) = encoder();
        let now = Utc::now();
        encoder
            .encode(&EncodeRequest::new("Met Alice at coffee shop today"), now)
            .unwrap();
        encoder
            .encode(&EncodeRequest::new("Met Alice at coffee shop today"), now)
            .unwrap();
        assert_eq!(store.count_fibers().unwrap(), 1);
    }

    #[test]
    fn decision_conflict_marks_older_superseded() {
        let (store, encoder) = encoder();
        let now = Utc::now();
        encoder
            .encode(
                &EncodeRequest::new("We decided to use PostgreSQL")
                    .with_memory_type(MemoryType::Decision),
                now - chrono::Duration::days(45),
            )
            .unwrap();
        let second = encoder
            .encode(
                &EncodeRequest::new("We decided to use MongoDB")
                    .with_memory_type(MemoryType::Decision),
                now,
            )
            .unwrap();

        assert_eq!(second.conflicts_detected, 1);

        let contradictions = store.synapses_of_type(SynapseType::Contradicts).unwrap();
        assert_eq!(contradictions.len(), 1);

        let postgres = store
            .find_neurons_containing("postgresql", 1)
            .unwrap()
            .remove(0);
        assert!(postgres.is_disputed());
        assert!(postgres.is_superseded());

        let mongo = store
            .find_neurons_containing("mongodb", 1)
            .unwrap()
            .remove(0);
        assert!(mongo.is_disputed());
        assert!(!mongo.is_superseded());
    }

    #[test]
    fn pathway_is_deterministic_and_anchored() {
        let (store, encoder) = encoder();
        let result = encoder
            .encode(
                &EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."),
                Utc::now(),
            )
            .unwrap();
        let fiber = store.get_fiber(&result.fiber_id).unwrap().unwrap();
        assert_eq!(fiber.pathway[0], fiber.anchor_neuron_id);
        assert_eq!(
            fiber.pathway.len(),
            fiber.neuron_ids.len(),
            "pathway covers all members"
        );
        // Every pathway id is a member.
        for id in &fiber.pathway {
            assert!(fiber.neuron_ids.contains(id));
        }
    }

    #[test]
    fn todo_memories_get_expiry_and_fast_decay() {
        let (store, encoder) = encoder();
        let now = Utc::now();
        let result = encoder
            .encode(
                &EncodeRequest::new("TODO: rotate the staging credentials"),
                now,
            )
            .unwrap();

        let fiber = store.get_fiber(&result.fiber_id).unwrap().unwrap();
        let end = fiber.time_end.expect("todo fibers expire");
        let days = (end - now).num_days();
        assert!((29..=30).contains(&days));

        assert_eq!(
            store.get_memory_type(&result.fiber_id).unwrap(),
            Some(MemoryType::Todo)
        );

        let states = store.all_states(0, 100).unwrap();
        assert!(states.iter().any(|s| (s.decay_rate - 0.15).abs() < 1e-9));
    }

    #[test]
    fn confirmatory_boost_strengthens_anchor_links() {
        let (store, encoder) = encoder();
        // Agent tag "auth" normalizes to "authentication"; the auto tag from
        // the "authentication" keyword matches, confirming the memory.
        let result = encoder
            .encode(
                &EncodeRequest::new("Alice pushed the authentication fix")
                    .with_tags(["auth"]),
                Utc::now(),
            )
            .unwrap();

        let fiber = store.get_fiber(&result.fiber_id).unwrap().unwrap();
        let out = store.outgoing_synapses(&fiber.anchor_neuron_id).unwrap();
        // CO_OCCURS links got the +0.1 confirmatory boost.
        assert!(out.iter().any(|s| (s.weight - 0.6).abs() < 1e-9));
    }

    #[test]
    fn sentiment_wires_felt_synapse_to_singleton_emotion() {
        let (store, encoder) = encoder();
        let now = Utc::now();
        encoder
            .encode(&EncodeRequest::new("The deploy failed, terrible afternoon"), now)
            .unwrap();
        encoder
            .encode(&EncodeRequest::new("Another broken rollout, awful day"), now)
            .unwrap();

        let felt = store.synapses_of_type(SynapseType::Felt).unwrap();
        assert_eq!(felt.len(), 2);

        // Emotion neurons are singletons: both FELT links hit one neuron.
        let frustration = store
            .find_neuron_by_content(NeuronType::State, "frustration")
            .unwrap()
            .unwrap();
        assert!(felt.iter().all(|s| s.target_id == frustration.id));
    }

    #[test]
    fn relation_extraction_wires_causal_synapses() {
        let (store, encoder) = encoder();
        encoder
            .encode(
                &EncodeRequest::new("The deploy failed because the token expired"),
                Utc::now(),
            )
            .unwrap();

        let causal = store.synapses_of_type(SynapseType::CausedBy).unwrap();
        assert!(!causal.is_empty());
        // Weight = 0.3 + 0.4 * confidence(0.8) = 0.62.
        assert!((causal[0].weight - 0.62).abs() < 1e-6);
    }
}
