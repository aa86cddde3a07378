//! Reflex retrieval pipeline.
//!
//! Orchestrates one query: parse → resolve anchors → activate (hybrid) →
//! stabilize → reconstruct → queue deferred writes. The store is never
//! written while the query runs; everything learned lands in one deferred
//! batch flushed after the result exists, so a cancelled retrieval leaves
//! no side effects.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use super::activation::ActivationMap;
use super::learning::{self, LearningConfig};
use super::reconstruction::{Reconstructor, ScoreBreakdown, SynthesisMethod};
use super::reflex::{apply_co_activation_boost, ReflexActivation};
use super::stabilization::{lateral_inhibition, stabilize};
use crate::core::{sigmoid, BrainConfig, Fiber, Neuron, NeuronState, NeuronType};
use crate::extraction::{QueryIntent, QueryParser, Stimulus};
use crate::storage::{DeferredBatch, Result, SqliteStore, SynapseUpdate};

/// Fibers considered per retrieval.
const MAX_FIBERS: usize = 10;

/// Neurons whose pairings are recorded as co-activation events.
const CO_ACTIVATION_TOP_N: usize = 10;

/// Cached parsed stimuli.
const STIMULUS_CACHE_SIZE: usize = 100;

// ============================================================================
// REQUEST / RESULT
// ============================================================================

/// Retrieval depth. Higher depth explores more hops and costs more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepthLevel {
    /// Simple fact retrieval ("what is X?"): 1 hop.
    #[default]
    Instant,
    /// Contextual information ("before/after X?"): 3 hops.
    Context,
    /// Recurring patterns ("do I usually X?"): 5 hops.
    Habit,
    /// Causality and emotion ("why?"): full hop budget.
    Deep,
}

impl DepthLevel {
    /// Hop budget at this depth.
    pub fn hops(&self, config: &BrainConfig) -> u32 {
        match self {
            DepthLevel::Instant => 1,
            DepthLevel::Context => 3,
            DepthLevel::Habit => 5,
            DepthLevel::Deep => config.max_spread_hops,
        }
    }

    pub fn from_index(i: u8) -> Self {
        match i {
            0 => DepthLevel::Instant,
            1 => DepthLevel::Context,
            2 => DepthLevel::Habit,
            _ => DepthLevel::Deep,
        }
    }
}

/// A retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueryRequest {
    pub query: String,
    /// Explicit depth; classified from query shape when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<DepthLevel>,
    /// Context token budget override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Restrict to fibers whose validity window contains this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_at: Option<DateTime<Utc>>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            depth: None,
            max_tokens: None,
            valid_at: None,
        }
    }
}

/// Result of one retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub answer: Option<String>,
    /// Formatted context for agent-prompt injection.
    pub context: String,
    pub confidence: f64,
    pub depth_used: DepthLevel,
    pub neurons_activated: usize,
    pub fibers_matched: Vec<String>,
    /// Canonical co-activation pairs recorded by this retrieval.
    pub co_activations: Vec<(String, String)>,
    pub synthesis_method: SynthesisMethod,
    pub score_breakdown: ScoreBreakdown,
    pub contributing_neurons: Vec<String>,
    /// Workflow template summaries relevant to a pattern query.
    pub workflow_suggestions: Vec<String>,
    /// Set when the soft deadline expired and the result is what had
    /// stabilized by then.
    pub partial: bool,
    pub latency_ms: f64,
}

impl RetrievalResult {
    fn empty(depth: DepthLevel, latency_ms: f64) -> Self {
        Self {
            answer: None,
            context: String::new(),
            confidence: 0.0,
            depth_used: depth,
            neurons_activated: 0,
            fibers_matched: Vec::new(),
            co_activations: Vec::new(),
            synthesis_method: SynthesisMethod::Single,
            score_breakdown: ScoreBreakdown::default(),
            contributing_neurons: Vec::new(),
            workflow_suggestions: Vec::new(),
            partial: false,
            latency_ms,
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// The retrieval engine for one brain.
pub struct ReflexPipeline {
    store: Arc<SqliteStore>,
    config: BrainConfig,
    parser: QueryParser,
    stimulus_cache: Mutex<LruCache<String, Stimulus>>,
}

impl ReflexPipeline {
    pub fn new(store: Arc<SqliteStore>, config: BrainConfig) -> Self {
        let capacity = NonZeroUsize::new(STIMULUS_CACHE_SIZE).expect("cache size is non-zero");
        Self {
            store,
            config,
            parser: QueryParser::new(),
            stimulus_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Execute a retrieval at `now`.
    pub fn query(&self, request: &QueryRequest, now: DateTime<Utc>) -> Result<RetrievalResult> {
        let started = Instant::now();
        let deadline =
            started + std::time::Duration::from_millis(self.config.retrieval_timeout_ms);

        // 1. Parse.
        let stimulus = self.parse_cached(&request.query, now);

        // 2. Depth.
        let depth = request.depth.unwrap_or_else(|| classify_depth(&stimulus));
        let max_hops = depth.hops(&self.config);

        // 3. Anchors, time-first. No anchors → empty result.
        let (anchor_sets, set_of) = self.resolve_anchors(&stimulus)?;
        let anchors: Vec<(String, f64)> = anchor_sets.iter().flatten().cloned().collect();
        if anchors.is_empty() {
            return Ok(RetrievalResult::empty(
                depth,
                started.elapsed().as_secs_f64() * 1000.0,
            ));
        }

        // 4. Candidate fibers, validity-filtered.
        let anchor_ids: Vec<String> = anchors.iter().map(|(id, _)| id.clone()).collect();
        let mut fibers = self.store.find_fibers_containing_any(&anchor_ids)?;
        if let Some(valid_at) = request.valid_at {
            fibers.retain(|f| f.is_valid_at(valid_at));
        }
        fibers.truncate(MAX_FIBERS);

        // 5. Hybrid activation + co-activation binding.
        let reflex = ReflexActivation::new(&self.store, &self.config);
        let mut activations = reflex.activate_hybrid(&anchors, &fibers, max_hops, now)?;
        apply_co_activation_boost(&mut activations, &set_of, anchor_sets.len());

        let mut partial = Instant::now() > deadline;

        // 6. Dispute penalties, stabilization, inhibition.
        let neurons = self.load_neurons(&activations)?;
        let mut scores: HashMap<String, f64> = activations
            .iter()
            .map(|(id, a)| {
                let penalty = neurons.get(id).map(|n| n.dispute_penalty()).unwrap_or(1.0);
                (id.clone(), a.level * penalty)
            })
            .collect();
        lateral_inhibition(
            &mut scores,
            self.config.lateral_inhibition_k,
            self.config.lateral_inhibition_factor,
        );
        stabilize(&mut scores, &self.config);

        // Penalized raw levels feed the breakdown too.
        for (id, activation) in activations.iter_mut() {
            if let Some(n) = neurons.get(id) {
                activation.level *= n.dispute_penalty();
            }
        }

        // 7. Reconstruct.
        let reconstructor = Reconstructor::new(&self.store, &self.config);
        let reconstruction = reconstructor.reconstruct(&scores, &activations, &fibers, now)?;

        // 8. Deferred writes, skipped entirely once past the deadline.
        let mut co_pairs = Vec::new();
        if Instant::now() > deadline {
            partial = true;
        } else {
            let batch = self.build_deferred(&activations, &scores, &fibers, &neurons, now)?;
            co_pairs = batch.co_activations.clone();
            self.store.apply_deferred(&batch)?;
        }

        let workflow_suggestions = if stimulus.intent == QueryIntent::AskPattern {
            self.workflow_suggestions()?
        } else {
            Vec::new()
        };

        Ok(RetrievalResult {
            answer: reconstruction.answer,
            context: reconstruction.context,
            confidence: reconstruction.confidence,
            depth_used: depth,
            neurons_activated: activations.len(),
            fibers_matched: fibers.iter().map(|f| f.id.clone()).collect(),
            co_activations: co_pairs,
            synthesis_method: reconstruction.method,
            score_breakdown: reconstruction.breakdown,
            contributing_neurons: reconstruction.contributing_neurons,
            workflow_suggestions,
            partial,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn parse_cached(&self, query: &str, now: DateTime<Utc>) -> Stimulus {
        // Queries with time expressions are reference-time dependent and
        // bypass the cache.
        if let Ok(mut cache) = self.stimulus_cache.lock() {
            if let Some(hit) = cache.get(query) {
                return hit.clone();
            }
        }
        let stimulus = self.parser.parse(query, now);
        if stimulus.time_hints.is_empty() {
            if let Ok(mut cache) = self.stimulus_cache.lock() {
                cache.put(query.to_string(), stimulus.clone());
            }
        }
        stimulus
    }

    /// Resolve anchor candidates to neuron ids, tiered: exact
    /// `(type, content)` match, then substring, then SimHash within the
    /// dedup radius. Returns anchor sets (time / entity / concept) and the
    /// anchor → set-index map for binding.
    fn resolve_anchors(
        &self,
        stimulus: &Stimulus,
    ) -> Result<(Vec<Vec<(String, f64)>>, HashMap<String, usize>)> {
        let mut time_set: Vec<(String, f64)> = Vec::new();
        let mut entity_set: Vec<(String, f64)> = Vec::new();
        let mut concept_set: Vec<(String, f64)> = Vec::new();

        for candidate in &stimulus.anchors {
            let resolved = self.resolve_one(&candidate.text, candidate.neuron_type)?;
            let bucket = match candidate.neuron_type {
                NeuronType::Time => &mut time_set,
                NeuronType::Entity => &mut entity_set,
                _ => &mut concept_set,
            };
            for id in resolved {
                if !bucket.iter().any(|(existing, _)| existing == &id) {
                    bucket.push((id, candidate.weight));
                }
            }
        }

        let mut sets = Vec::new();
        for set in [time_set, entity_set, concept_set] {
            if !set.is_empty() {
                sets.push(set);
            }
        }
        let set_of: HashMap<String, usize> = sets
            .iter()
            .enumerate()
            .flat_map(|(i, set)| set.iter().map(move |(id, _)| (id.clone(), i)))
            .collect();
        Ok((sets, set_of))
    }

    fn resolve_one(&self, text: &str, neuron_type: NeuronType) -> Result<Vec<String>> {
        let canonical = crate::core::canonicalize(text);

        if let Some(n) = self.store.find_neuron_by_content(neuron_type, &canonical)? {
            return Ok(vec![n.id]);
        }

        let by_substring = self.store.find_neurons_containing(&canonical, 3)?;
        if !by_substring.is_empty() {
            return Ok(by_substring.into_iter().map(|n| n.id).collect());
        }

        let hash = crate::extraction::simhash64(text);
        if hash != 0 {
            let near = self
                .store
                .find_neurons_by_hash(hash, crate::extraction::DEDUP_DISTANCE)?;
            return Ok(near.into_iter().map(|n| n.id).collect());
        }

        Ok(Vec::new())
    }

    fn load_neurons(&self, activations: &ActivationMap) -> Result<HashMap<String, Neuron>> {
        let ids: Vec<String> = activations.keys().cloned().collect();
        Ok(self
            .store
            .get_neurons(&ids)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect())
    }

    /// Queue every write this retrieval earned: Hebbian updates with
    /// competitive normalization, conductivity bumps, co-activation events,
    /// gated state updates, maturation reinforcement.
    fn build_deferred(
        &self,
        activations: &ActivationMap,
        scores: &HashMap<String, f64>,
        fibers: &[Fiber],
        neurons: &HashMap<String, Neuron>,
        now: DateTime<Utc>,
    ) -> Result<DeferredBatch> {
        let mut batch = DeferredBatch::new(now);
        let learning = LearningConfig::from(&self.config);

        // Post-activation (gated) levels drive learning.
        let gated: HashMap<String, f64> = activations
            .iter()
            .map(|(id, a)| (id.clone(), sigmoid(a.level, self.config.sigmoid_steepness)))
            .collect();

        // Hebbian pass over synapses between activated neurons. Edges
        // touching a superseded claim take the anti-Hebbian path instead:
        // using a losing memory weakens it further.
        let activated_ids: Vec<String> = activations.keys().cloned().collect();
        let edges = self.store.synapses_for_neurons(&activated_ids)?;
        let mut new_weights: HashMap<String, f64> = HashMap::new();
        let mut touched: Vec<&crate::core::Synapse> = Vec::new();
        let superseded = |id: &str| {
            neurons
                .get(id)
                .map(Neuron::is_superseded)
                .unwrap_or(false)
        };
        for edge in &edges {
            let (Some(pre), Some(post)) = (gated.get(&edge.source_id), gated.get(&edge.target_id))
            else {
                continue;
            };
            let update = if superseded(&edge.source_id) || superseded(&edge.target_id) {
                learning::anti_hebbian_update(
                    &learning,
                    edge.weight,
                    *pre,
                    *post,
                    edge.reinforced_count,
                )
            } else {
                learning::hebbian_update(&learning, edge.weight, *pre, *post, edge.reinforced_count)
            };
            if update.delta != 0.0 {
                new_weights.insert(edge.id.clone(), update.new_weight);
                touched.push(edge);
            }
        }

        // Competitive normalization against the would-be weights.
        let pre_neurons: HashSet<&str> = touched.iter().map(|s| s.source_id.as_str()).collect();
        for pre in pre_neurons {
            let outgoing: Vec<crate::core::Synapse> = edges
                .iter()
                .filter(|s| s.source_id == pre)
                .map(|s| {
                    let mut adjusted = (*s).clone();
                    if let Some(w) = new_weights.get(&s.id) {
                        adjusted.weight = *w;
                    }
                    adjusted
                })
                .collect();
            for (id, w) in
                learning::normalize_outgoing(&outgoing, pre, self.config.weight_normalization_budget)
            {
                new_weights.insert(id, w);
            }
        }
        for (synapse_id, new_weight) in new_weights {
            batch.synapse_updates.push(SynapseUpdate {
                synapse_id,
                new_weight,
            });
        }

        // Conductivity bumps + maturation reinforcement for traversed fibers.
        for fiber in fibers {
            if !fiber.pathway.iter().any(|id| activations.contains_key(id)) {
                continue;
            }
            batch.conductivity_bumps.push(fiber.id.clone());
            if let Some(mut maturation) = self.store.get_maturation(&fiber.id)? {
                maturation.reinforce(now);
                maturation.advance(now);
                batch.maturation_updates.push(maturation);
            }
        }

        // Co-activation events among the strongest activated neurons.
        let mut top: Vec<(&String, f64)> = scores.iter().map(|(id, s)| (id, *s)).collect();
        top.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));
        let top_ids: Vec<&String> = top
            .into_iter()
            .take(CO_ACTIVATION_TOP_N)
            .map(|(id, _)| id)
            .collect();
        for i in 0..top_ids.len() {
            for j in (i + 1)..top_ids.len() {
                batch.push_co_activation(top_ids[i], top_ids[j]);
            }
        }

        // Gated state updates; refractory windows open on firing.
        let states = self.store.get_states(&activated_ids)?;
        for (id, activation) in activations {
            let mut state = states.get(id).cloned().unwrap_or_else(|| {
                let mut s = NeuronState::new(id.clone(), self.config.decay_rate);
                s.firing_threshold = self.config.default_firing_threshold;
                s.refractory_period_ms = self.config.default_refractory_ms;
                s
            });
            state.activate(activation.level, self.config.sigmoid_steepness, now);
            batch.state_updates.push(state);
        }

        Ok(batch)
    }

    fn workflow_suggestions(&self) -> Result<Vec<String>> {
        let fibers = self.store.list_fibers_by_tag("workflow")?;
        Ok(fibers
            .into_iter()
            .take(5)
            .map(|f| f.summary)
            .filter(|s| !s.is_empty())
            .collect())
    }
}

/// Depth from query shape when the caller does not specify one.
fn classify_depth(stimulus: &Stimulus) -> DepthLevel {
    match stimulus.intent {
        QueryIntent::AskWhy | QueryIntent::AskFeeling => DepthLevel::Deep,
        QueryIntent::AskPattern => DepthLevel::Habit,
        QueryIntent::AskHow | QueryIntent::Compare => DepthLevel::Context,
        _ => {
            let context_words = ["before", "after", "then", "trước", "sau", "rồi"];
            let lower = stimulus.raw_query.to_lowercase();
            if context_words
                .iter()
                .any(|w| lower.split_whitespace().any(|t| t == *w))
            {
                DepthLevel::Context
            } else {
                DepthLevel::Instant
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Synapse, SynapseType};
    use std::collections::BTreeSet;

    fn pipeline() -> (Arc<SqliteStore>, ReflexPipeline) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = ReflexPipeline::new(store.clone(), BrainConfig::default());
        (store, pipeline)
    }

    fn encode_simple(store: &SqliteStore) -> (Vec<String>, Fiber) {
        let alice = Neuron::new(NeuronType::Entity, "Alice");
        let suggested = Neuron::new(NeuronType::Action, "suggested");
        let jwt = Neuron::new(NeuronType::Concept, "JWT");
        let ids: Vec<String> = vec![alice.id.clone(), suggested.id.clone(), jwt.id.clone()];
        for n in [&alice, &suggested, &jwt] {
            store.add_neuron(n).unwrap();
        }
        let mut synapse_ids = BTreeSet::new();
        for (s, t, ty, w) in [
            (&alice.id, &jwt.id, SynapseType::Suggested, 0.8),
            (&alice.id, &suggested.id, SynapseType::Involves, 0.6),
            (&suggested.id, &jwt.id, SynapseType::CoOccurs, 0.7),
        ] {
            let syn = Synapse::new(s, t, ty, w);
            store.add_synapse(&syn).unwrap();
            synapse_ids.insert(syn.id);
        }
        let fiber = Fiber::create(
            ids.iter().cloned().collect(),
            synapse_ids,
            alice.id.clone(),
            ids.clone(),
            "Alice suggested JWT for auth".into(),
        )
        .unwrap();
        store.add_fiber(&fiber).unwrap();
        store
            .save_maturation(&crate::core::Maturation::new(&fiber.id, Utc::now()))
            .unwrap();
        (ids, fiber)
    }

    #[test]
    fn query_with_no_anchors_returns_empty_with_zero_confidence() {
        let (_store, pipeline) = pipeline();
        let result = pipeline
            .query(&QueryRequest::new("zzz qqq xxx"), Utc::now())
            .unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(result.answer.is_none());
        assert_eq!(result.neurons_activated, 0);
    }

    #[test]
    fn basic_recall_finds_the_suggestion() {
        let (store, pipeline) = pipeline();
        let (ids, _fiber) = encode_simple(&store);

        let result = pipeline
            .query(
                &QueryRequest {
                    query: "What did Alice suggest?".into(),
                    depth: Some(DepthLevel::Context),
                    max_tokens: None,
                    valid_at: None,
                },
                Utc::now(),
            )
            .unwrap();

        assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
        let answer = result.answer.clone().unwrap_or_default();
        let mentions_jwt = answer.contains("JWT") || result.context.contains("JWT");
        assert!(mentions_jwt, "answer {answer:?} context {}", result.context);
        assert!(result.neurons_activated >= 2);
        assert!(!result.fibers_matched.is_empty());
        let _ = ids;
    }

    #[test]
    fn retrieval_queues_and_flushes_deferred_writes() {
        let (store, pipeline) = pipeline();
        let (ids, fiber) = encode_simple(&store);

        let before: HashMap<String, f64> = store
            .synapses_for_neurons(&ids)
            .unwrap()
            .into_iter()
            .map(|s| (s.id, s.weight))
            .collect();

        pipeline
            .query(&QueryRequest::new("What did Alice suggest?"), Utc::now())
            .unwrap();

        let after = store.synapses_for_neurons(&ids).unwrap();
        let strengthened = after
            .iter()
            .any(|s| s.weight > before[&s.id] && s.reinforced_count > 0);
        assert!(strengthened, "expected at least one Hebbian reinforcement");

        let f = store.get_fiber(&fiber.id).unwrap().unwrap();
        assert!(f.frequency >= 1);
        assert!(f.last_conducted.is_some());

        let m = store.get_maturation(&fiber.id).unwrap().unwrap();
        assert_eq!(m.reinforcement_count, 1);
    }

    #[test]
    fn activation_levels_stay_in_unit_interval_after_retrieval() {
        let (store, pipeline) = pipeline();
        encode_simple(&store);

        pipeline
            .query(&QueryRequest::new("What did Alice suggest?"), Utc::now())
            .unwrap();

        for state in store.all_states(0, 1000).unwrap() {
            assert!(
                (0.0..=1.0).contains(&state.activation_level),
                "activation out of range: {}",
                state.activation_level
            );
        }
    }

    #[test]
    fn valid_at_filters_expired_fibers() {
        let (store, pipeline) = pipeline();
        let (_, mut fiber) = encode_simple(&store);
        let now = Utc::now();
        fiber.time_end = Some(now - chrono::Duration::days(2));
        store.update_fiber(&fiber).unwrap();

        let result = pipeline
            .query(
                &QueryRequest {
                    query: "What did Alice suggest?".into(),
                    depth: None,
                    max_tokens: None,
                    valid_at: Some(now),
                },
                now,
            )
            .unwrap();

        assert!(result.fibers_matched.is_empty());
    }

    #[test]
    fn depth_classification_follows_query_shape() {
        let parser = QueryParser::new();
        let now = Utc::now();
        assert_eq!(
            classify_depth(&parser.parse("what is the db host?", now)),
            DepthLevel::Instant
        );
        assert_eq!(
            classify_depth(&parser.parse("what happened before the deploy?", now)),
            DepthLevel::Context
        );
        assert_eq!(
            classify_depth(&parser.parse("do I usually test first?", now)),
            DepthLevel::Habit
        );
        assert_eq!(
            classify_depth(&parser.parse("why did the build fail?", now)),
            DepthLevel::Deep
        );
    }

    #[test]
    fn co_activation_events_are_recorded_canonically() {
        let (store, pipeline) = pipeline();
        encode_simple(&store);

        let now = Utc::now();
        let result = pipeline
            .query(&QueryRequest::new("What did Alice suggest?"), now)
            .unwrap();
        assert!(!result.co_activations.is_empty());
        for (a, b) in &result.co_activations {
            assert!(a < b);
        }

        let counts = store
            .co_activation_counts(now - chrono::Duration::hours(1))
            .unwrap();
        assert!(!counts.is_empty());
    }
}
