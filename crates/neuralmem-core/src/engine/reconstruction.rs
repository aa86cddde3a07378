//! Answer reconstruction.
//!
//! Turns a stabilized activation field back into text. Three synthesis
//! strategies, picked automatically:
//!
//! - `Single`: one neuron dominates (score > 2× second place).
//! - `FiberSummary`: one fiber holds ≥ 60% of the total score.
//! - `MultiNeuron`: top contributors ordered along a fiber pathway.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::activation::ActivationMap;
use crate::core::{sigmoid, BrainConfig, Fiber, Neuron, NeuronType};
use crate::storage::{Result, SqliteStore};

/// Share of total score one fiber must hold for summary synthesis.
const FIBER_SUMMARY_SHARE: f64 = 0.6;

/// Dominance ratio for single-neuron synthesis.
const SINGLE_DOMINANCE: f64 = 2.0;

/// Contributors used by multi-neuron synthesis.
const MULTI_NEURON_LIMIT: usize = 5;

/// How an answer was synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisMethod {
    #[default]
    Single,
    FiberSummary,
    MultiNeuron,
}

impl SynthesisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisMethod::Single => "single",
            SynthesisMethod::FiberSummary => "fiber_summary",
            SynthesisMethod::MultiNeuron => "multi_neuron",
        }
    }
}

/// Why the top result ranked where it did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Raw spreading-activation level of the top contributor.
    pub base_activation: f64,
    /// Bonus from being reached by multiple anchor sets.
    pub intersection_boost: f64,
    /// `max(0, 1 - days_since_last_activated/30) * 0.1`.
    pub freshness_boost: f64,
    /// `ln(1 + access_frequency) * 0.05`.
    pub frequency_boost: f64,
    /// Bonus from the winning fiber's emotional intensity.
    pub emotional_resonance: f64,
    /// Sum of all components before confidence gating.
    pub raw_total: f64,
}

/// Reconstructed answer plus provenance.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub answer: Option<String>,
    pub context: String,
    pub method: SynthesisMethod,
    pub confidence: f64,
    pub contributing_neurons: Vec<String>,
    pub breakdown: ScoreBreakdown,
}

impl Reconstruction {
    pub fn empty() -> Self {
        Self {
            answer: None,
            context: String::new(),
            method: SynthesisMethod::Single,
            confidence: 0.0,
            contributing_neurons: Vec::new(),
            breakdown: ScoreBreakdown::default(),
        }
    }
}

/// Reconstructor over the stabilized field.
pub struct Reconstructor<'a> {
    store: &'a SqliteStore,
    config: &'a BrainConfig,
}

impl<'a> Reconstructor<'a> {
    pub fn new(store: &'a SqliteStore, config: &'a BrainConfig) -> Self {
        Self { store, config }
    }

    /// Build the answer from stabilized `scores`, using the pre-damping
    /// `activations` for the confidence breakdown.
    pub fn reconstruct(
        &self,
        scores: &HashMap<String, f64>,
        activations: &ActivationMap,
        fibers: &[Fiber],
        now: DateTime<Utc>,
    ) -> Result<Reconstruction> {
        if scores.is_empty() {
            return Ok(Reconstruction::empty());
        }

        let mut ranked: Vec<(String, f64)> =
            scores.iter().map(|(id, s)| (id.clone(), *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let neuron_ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let neurons: HashMap<String, Neuron> = self
            .store
            .get_neurons(&neuron_ids)?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        // Prefer content-bearing neurons over time markers for the answer.
        let answer_ranked: Vec<&(String, f64)> = ranked
            .iter()
            .filter(|(id, _)| {
                neurons
                    .get(id)
                    .map(|n| n.neuron_type != NeuronType::Time)
                    .unwrap_or(false)
            })
            .collect();
        if answer_ranked.is_empty() {
            return Ok(Reconstruction::empty());
        }

        let (top_id, top_score) = (&answer_ranked[0].0, answer_ranked[0].1);
        let second_score = answer_ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);
        let total: f64 = ranked.iter().map(|(_, s)| s).sum();

        // Fiber share of the total field.
        let winning_fiber = fibers
            .iter()
            .map(|f| {
                let share: f64 = ranked
                    .iter()
                    .filter(|(id, _)| f.contains_neuron(id))
                    .map(|(_, s)| s)
                    .sum();
                (f, share)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.id.cmp(&a.0.id)));

        let (method, answer, contributing) = if second_score > 0.0
            && top_score > SINGLE_DOMINANCE * second_score
        {
            let content = neurons.get(top_id).map(|n| n.content.clone());
            (SynthesisMethod::Single, content, vec![top_id.clone()])
        } else if let Some((fiber, share)) = winning_fiber.filter(|(f, share)| {
            total > 0.0 && *share / total >= FIBER_SUMMARY_SHARE && !f.summary.is_empty()
        }) {
            let _ = share;
            let contributing: Vec<String> = fiber
                .pathway
                .iter()
                .filter(|id| scores.contains_key(*id))
                .cloned()
                .collect();
            (
                SynthesisMethod::FiberSummary,
                Some(fiber.summary.clone()),
                contributing,
            )
        } else {
            // Order the top contributors along a relevant pathway.
            let mut contributors: Vec<String> = answer_ranked
                .iter()
                .take(MULTI_NEURON_LIMIT)
                .map(|(id, _)| id.clone())
                .collect();
            if let Some((fiber, _)) = winning_fiber {
                contributors.sort_by_key(|id| fiber.pathway_position(id).unwrap_or(usize::MAX));
            }
            let phrases: Vec<&str> = contributors
                .iter()
                .filter_map(|id| neurons.get(id).map(|n| n.content.as_str()))
                .collect();
            let answer = if phrases.is_empty() {
                None
            } else {
                Some(phrases.join("; "))
            };
            (SynthesisMethod::MultiNeuron, answer, contributors)
        };

        let breakdown = self.breakdown(top_id, activations, fibers, now)?;
        let confidence = sigmoid(breakdown.raw_total, self.config.sigmoid_steepness).min(1.0);
        let context = self.format_context(&ranked, &neurons, fibers)?;

        Ok(Reconstruction {
            answer,
            context,
            method,
            confidence,
            contributing_neurons: contributing,
            breakdown,
        })
    }

    fn breakdown(
        &self,
        top_id: &str,
        activations: &ActivationMap,
        fibers: &[Fiber],
        now: DateTime<Utc>,
    ) -> Result<ScoreBreakdown> {
        let base_activation = activations.get(top_id).map(|a| a.level).unwrap_or(0.0);
        let intersection_boost = activations
            .get(top_id)
            .map(|a| 0.1 * a.sources.len().saturating_sub(1) as f64)
            .unwrap_or(0.0);

        let (freshness_boost, frequency_boost) = match self.store.get_state(top_id)? {
            Some(state) => {
                let freshness = state
                    .last_activated
                    .map(|t| {
                        let days = (now - t).num_seconds() as f64 / 86_400.0;
                        (1.0 - days / 30.0).max(0.0) * 0.1
                    })
                    .unwrap_or(0.0);
                let frequency = (1.0 + state.access_frequency as f64).ln() * 0.05;
                (freshness, frequency)
            }
            None => (0.0, 0.0),
        };

        let emotional_resonance = fibers
            .iter()
            .filter(|f| f.contains_neuron(top_id))
            .filter_map(|f| {
                f.metadata
                    .get("_emotion_intensity")
                    .and_then(serde_json::Value::as_f64)
            })
            .fold(0.0, f64::max)
            * 0.1;

        let raw_total = base_activation
            + intersection_boost
            + freshness_boost
            + frequency_boost
            + emotional_resonance;

        Ok(ScoreBreakdown {
            base_activation,
            intersection_boost,
            freshness_boost,
            frequency_boost,
            emotional_resonance,
            raw_total,
        })
    }

    /// Markdown context for agent-prompt injection: fiber summaries first,
    /// then individual activated neurons, within the token budget.
    fn format_context(
        &self,
        ranked: &[(String, f64)],
        neurons: &HashMap<String, Neuron>,
        fibers: &[Fiber],
    ) -> Result<String> {
        let max_tokens = self.config.max_context_tokens;
        let mut lines: Vec<String> = Vec::new();
        let mut token_estimate = 0usize;

        if !fibers.is_empty() {
            lines.push("## Relevant Memories".to_string());
            for fiber in fibers.iter().take(5) {
                let line = if fiber.summary.is_empty() {
                    match self.store.get_neuron(&fiber.anchor_neuron_id)? {
                        Some(anchor) => format!("- {}", anchor.content),
                        None => continue,
                    }
                } else {
                    format!("- {}", fiber.summary)
                };
                token_estimate += line.split_whitespace().count();
                if token_estimate > max_tokens {
                    break;
                }
                lines.push(line);
            }
        }

        if token_estimate < max_tokens {
            lines.push("## Related Information".to_string());
            for (id, _) in ranked.iter().take(20) {
                let Some(neuron) = neurons.get(id) else {
                    continue;
                };
                // Time markers are implicit in the summaries.
                if neuron.neuron_type == NeuronType::Time {
                    continue;
                }
                let line = format!("- [{}] {}", neuron.neuron_type, neuron.content);
                token_estimate += line.split_whitespace().count();
                if token_estimate > max_tokens {
                    break;
                }
                lines.push(line);
            }
        }

        Ok(lines.join("\n"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Neuron, NeuronState};
    use std::collections::{BTreeSet, HashSet};

    fn seed(store: &SqliteStore, contents: &[(&str, NeuronType)]) -> Vec<String> {
        contents
            .iter()
            .map(|(c, t)| {
                let n = Neuron::new(*t, *c);
                store.add_neuron(&n).unwrap();
                n.id
            })
            .collect()
    }

    fn activation(id: &str, level: f64, sources: usize) -> (String, super::super::activation::ActivationResult) {
        (
            id.to_string(),
            super::super::activation::ActivationResult {
                neuron_id: id.to_string(),
                level,
                hops: 1,
                path: vec![],
                source_anchor: "a".into(),
                sources: (0..sources).map(|i| format!("s{i}")).collect::<HashSet<_>>(),
            },
        )
    }

    #[test]
    fn dominant_neuron_uses_single_synthesis() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let ids = seed(
            &store,
            &[("JWT", NeuronType::Concept), ("auth", NeuronType::Concept)],
        );

        let scores: HashMap<String, f64> =
            [(ids[0].clone(), 0.9), (ids[1].clone(), 0.2)].into();
        let activations: ActivationMap =
            [activation(&ids[0], 0.9, 2), activation(&ids[1], 0.2, 1)].into();

        let r = Reconstructor::new(&store, &config)
            .reconstruct(&scores, &activations, &[], Utc::now())
            .unwrap();

        assert_eq!(r.method, SynthesisMethod::Single);
        assert_eq!(r.answer.as_deref(), Some("JWT"));
        assert!(r.confidence > 0.5);
        assert!(r.breakdown.intersection_boost > 0.0);
    }

    #[test]
    fn fiber_majority_uses_summary_synthesis() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let ids = seed(
            &store,
            &[
                ("alice", NeuronType::Entity),
                ("jwt", NeuronType::Concept),
                ("stray", NeuronType::Concept),
            ],
        );

        let mut fiber = Fiber::create(
            BTreeSet::from([ids[0].clone(), ids[1].clone()]),
            BTreeSet::new(),
            ids[0].clone(),
            vec![ids[0].clone(), ids[1].clone()],
            "Alice suggested JWT for auth".into(),
        )
        .unwrap();
        fiber.salience = 0.8;
        store.add_fiber(&fiber).unwrap();

        let scores: HashMap<String, f64> = [
            (ids[0].clone(), 0.5),
            (ids[1].clone(), 0.45),
            (ids[2].clone(), 0.1),
        ]
        .into();
        let activations: ActivationMap = [
            activation(&ids[0], 0.5, 1),
            activation(&ids[1], 0.45, 1),
            activation(&ids[2], 0.1, 1),
        ]
        .into();

        let r = Reconstructor::new(&store, &config)
            .reconstruct(&scores, &activations, &[fiber], Utc::now())
            .unwrap();

        assert_eq!(r.method, SynthesisMethod::FiberSummary);
        assert_eq!(r.answer.as_deref(), Some("Alice suggested JWT for auth"));
    }

    #[test]
    fn close_scores_use_multi_neuron_synthesis() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let ids = seed(
            &store,
            &[("redis", NeuronType::Concept), ("cache", NeuronType::Concept)],
        );

        let scores: HashMap<String, f64> =
            [(ids[0].clone(), 0.5), (ids[1].clone(), 0.4)].into();
        let activations: ActivationMap =
            [activation(&ids[0], 0.5, 1), activation(&ids[1], 0.4, 1)].into();

        let r = Reconstructor::new(&store, &config)
            .reconstruct(&scores, &activations, &[], Utc::now())
            .unwrap();

        assert_eq!(r.method, SynthesisMethod::MultiNeuron);
        let answer = r.answer.unwrap();
        assert!(answer.contains("redis") && answer.contains("cache"));
        assert_eq!(r.contributing_neurons.len(), 2);
    }

    #[test]
    fn empty_field_reconstructs_to_nothing() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let r = Reconstructor::new(&store, &config)
            .reconstruct(&HashMap::new(), &HashMap::new(), &[], Utc::now())
            .unwrap();
        assert!(r.answer.is_none());
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn frequency_boost_grows_with_access() {
        let store = SqliteStore::in_memory().unwrap();
        let config = BrainConfig::default();
        let ids = seed(&store, &[("jwt", NeuronType::Concept)]);

        let mut state = NeuronState::new(&ids[0], 0.02);
        state.access_frequency = 20;
        state.last_activated = Some(Utc::now());
        store.upsert_state(&state).unwrap();

        let scores: HashMap<String, f64> = [(ids[0].clone(), 0.8)].into();
        let activations: ActivationMap = [activation(&ids[0], 0.8, 1)].into();

        let r = Reconstructor::new(&store, &config)
            .reconstruct(&scores, &activations, &[], Utc::now())
            .unwrap();

        assert!((r.breakdown.frequency_boost - (21.0f64).ln() * 0.05).abs() < 1e-9);
        assert!(r.breakdown.freshness_boost > 0.099);
    }
}
