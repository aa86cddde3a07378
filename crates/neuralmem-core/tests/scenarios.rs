//! End-to-end scenarios: encode, recall, dedup, decay, inference,
//! conflict, and maturation flows through the public engine surface.

use chrono::{Duration, Utc};
use neuralmem_core::prelude::*;
use neuralmem_core::{MaturationStage, NeuronState};

fn brain() -> NeuralMemory {
    NeuralMemory::in_memory("scenario").unwrap()
}

// ----------------------------------------------------------------------------
// S1: basic encode + recall
// ----------------------------------------------------------------------------

#[test]
fn encode_then_recall_a_suggestion() {
    let memory = brain();
    let encoded = memory
        .encode(&EncodeRequest::new(
            "Met Alice at coffee shop. She suggested JWT for auth.",
        ))
        .unwrap();
    assert!(encoded.neurons_created >= 4);

    // The expected cast of neurons exists.
    let store = memory.store();
    let find = |t, c: &str| {
        store
            .find_neuron_by_content(t, c)
            .unwrap()
            .unwrap_or_else(|| panic!("expected neuron {c}"))
    };
    let alice = find(NeuronType::Entity, "alice");
    let jwt = find(NeuronType::Entity, "jwt");
    find(NeuronType::Spatial, "coffee shop");
    find(NeuronType::Concept, "auth");

    // Alice links to JWT both associatively and through the verb.
    let out = store.outgoing_synapses(&alice.id).unwrap();
    assert!(out
        .iter()
        .any(|s| s.target_id == jwt.id && s.synapse_type == SynapseType::CoOccurs));
    assert!(out
        .iter()
        .any(|s| s.target_id == jwt.id && s.synapse_type == SynapseType::Suggested));

    let result = memory
        .query(&QueryRequest {
            query: "What did Alice suggest?".into(),
            depth: Some(DepthLevel::Context),
            max_tokens: None,
            valid_at: None,
        })
        .unwrap();

    assert!(result.confidence >= 0.5, "confidence {}", result.confidence);
    let mentions_jwt = result
        .answer
        .as_deref()
        .map(|a| a.contains("JWT"))
        .unwrap_or(false)
        || result.context.contains("JWT");
    assert!(mentions_jwt, "answer: {:?}", result.answer);
}

// ----------------------------------------------------------------------------
// S2: dedup on paraphrase
// ----------------------------------------------------------------------------

#[test]
fn paraphrased_content_reuses_the_fiber() {
    let memory = brain();
    let first = memory
        .encode(&EncodeRequest::new("Database host is db.example.com"))
        .unwrap();
    let second = memory
        .encode(&EncodeRequest::new("DB host is db.example.com"))
        .unwrap();

    assert!(second.deduplicated);
    assert_eq!(second.fiber_id, first.fiber_id);
    assert_eq!(memory.stats().unwrap().fibers, 1);

    // The reused neuron is still there exactly once.
    let hosts = memory
        .store()
        .find_neurons_containing("db.example.com", 10)
        .unwrap();
    assert_eq!(hosts.len(), 1);
}

// ----------------------------------------------------------------------------
// S3: type-aware decay
// ----------------------------------------------------------------------------

#[test]
fn decay_follows_per_type_exponential_curves() {
    let memory = brain();
    let store = memory.store();
    let t0 = Utc::now() - Duration::days(30);

    let mut fact = Neuron::new(NeuronType::Concept, "stable fact");
    fact.created_at = t0;
    store.add_neuron(&fact).unwrap();
    let mut fact_state = NeuronState::new(&fact.id, 0.02);
    fact_state.created_at = t0;
    fact_state.activation_level = 1.0;
    store.upsert_state(&fact_state).unwrap();

    let mut todo = Neuron::new(NeuronType::Concept, "expiring todo");
    todo.created_at = t0;
    store.add_neuron(&todo).unwrap();
    let mut todo_state = NeuronState::new(&todo.id, 0.15);
    todo_state.created_at = t0;
    todo_state.activation_level = 1.0;
    store.upsert_state(&todo_state).unwrap();

    let report = memory.decay_at(t0 + Duration::days(30), false).unwrap();
    assert_eq!(report.states_decayed, 2);

    let fact_after = store.get_state(&fact.id).unwrap().unwrap().activation_level;
    let todo_after = store.get_state(&todo.id).unwrap().unwrap().activation_level;

    assert!((fact_after - (-0.6f64).exp()).abs() < 1e-3, "fact {fact_after}");
    assert!((todo_after - (-4.5f64).exp()).abs() < 1e-3, "todo {todo_after}");
    assert!(todo_after < memory.config().prune_threshold);
    assert_eq!(report.prune_eligible, 1);
}

// ----------------------------------------------------------------------------
// S4: co-activation → inferred synapse
// ----------------------------------------------------------------------------

#[test]
fn repeated_retrieval_grows_an_inferred_synapse() {
    let memory = brain();
    memory
        .encode(&EncodeRequest::new(
            "Met Alice at coffee shop. She suggested JWT for auth.",
        ))
        .unwrap();

    // Same query three times inside the window co-activates the same pair.
    // Spaced past the refractory window so every pass fires fully.
    let t0 = Utc::now();
    for i in 0..3 {
        let result = memory
            .query_at(
                &QueryRequest::new("What did Alice suggest?"),
                t0 + Duration::seconds(i * 10),
            )
            .unwrap();
        assert!(!result.co_activations.is_empty());
    }

    let report = memory.consolidate(Strategy::Infer, false, None).unwrap();
    assert!(
        report.created + report.items_changed > 0,
        "inference produced nothing: {report:?}"
    );

    // At least one inferred CO_OCCURS now exists, or an existing pair was
    // reinforced; either way co-activation left durable structure.
    let inferred = memory
        .store()
        .synapses_of_type(SynapseType::CoOccurs)
        .unwrap()
        .into_iter()
        .filter(|s| s.is_inferred())
        .count();
    let reinforced = memory
        .store()
        .all_synapses(0, 1000)
        .unwrap()
        .into_iter()
        .filter(|s| s.reinforced_count > 0)
        .count();
    assert!(inferred > 0 || reinforced > 0);
}

// ----------------------------------------------------------------------------
// S5: conflict detection
// ----------------------------------------------------------------------------

#[test]
fn contradicting_decisions_mark_and_rank() {
    let memory = brain();
    let now = Utc::now();
    memory
        .encode_at(
            &EncodeRequest::new("We decided to use PostgreSQL")
                .with_memory_type(MemoryType::Decision),
            now - Duration::days(40),
        )
        .unwrap();
    let second = memory
        .encode_at(
            &EncodeRequest::new("We decided to use MongoDB")
                .with_memory_type(MemoryType::Decision),
            now,
        )
        .unwrap();
    assert_eq!(second.conflicts_detected, 1);

    let store = memory.store();
    assert_eq!(store.synapses_of_type(SynapseType::Contradicts).unwrap().len(), 1);

    let postgres = store
        .find_neurons_containing("postgresql", 1)
        .unwrap()
        .remove(0);
    let mongo = store.find_neurons_containing("mongodb", 1).unwrap().remove(0);
    assert!(postgres.is_superseded());
    assert!(mongo.is_disputed() && !mongo.is_superseded());

    // Penalties (0.5 disputed vs 0.25 superseded) rank MongoDB first.
    let result = memory
        .query(&QueryRequest::new("What did we decide to use?"))
        .unwrap();
    let mongo_pos = result
        .contributing_neurons
        .iter()
        .position(|id| *id == mongo.id);
    let postgres_pos = result
        .contributing_neurons
        .iter()
        .position(|id| *id == postgres.id);
    if let (Some(m), Some(p)) = (mongo_pos, postgres_pos) {
        assert!(m < p, "mongo should outrank postgres");
    } else {
        // Ranking surfaced only one of them; it must be the newer claim.
        assert!(mongo_pos.is_some());
    }
}

// ----------------------------------------------------------------------------
// S6: maturation spacing effect
// ----------------------------------------------------------------------------

#[test]
fn semantic_stage_requires_spaced_reinforcement() {
    let memory = brain();
    let t0 = Utc::now() - Duration::days(10);
    let encoded = memory
        .encode_at(&EncodeRequest::new("Standup happens every morning"), t0)
        .unwrap();
    let store = memory.store();

    // Five reinforcements, all on day zero.
    let mut maturation = store.get_maturation(&encoded.fiber_id).unwrap().unwrap();
    for _ in 0..5 {
        maturation.reinforce(t0);
    }
    store.save_maturation(&maturation).unwrap();

    memory
        .consolidate_at(Strategy::Mature, false, None, t0 + Duration::days(7))
        .unwrap();
    let stage = store
        .get_maturation(&encoded.fiber_id)
        .unwrap()
        .unwrap()
        .stage;
    assert_eq!(stage, MaturationStage::Episodic, "one day of reinforcement is not enough");

    // Reinforce on two more distinct days, then re-run.
    let mut maturation = store.get_maturation(&encoded.fiber_id).unwrap().unwrap();
    maturation.reinforce(t0 + Duration::days(2));
    maturation.reinforce(t0 + Duration::days(4));
    store.save_maturation(&maturation).unwrap();

    memory
        .consolidate_at(Strategy::Mature, false, None, t0 + Duration::days(7) + Duration::hours(1))
        .unwrap();
    let stage = store
        .get_maturation(&encoded.fiber_id)
        .unwrap()
        .unwrap()
        .stage;
    assert_eq!(stage, MaturationStage::Semantic);
}

// ----------------------------------------------------------------------------
// Snapshot round trip through the facade
// ----------------------------------------------------------------------------

#[test]
fn export_import_round_trip_between_brains() {
    let source = brain();
    source
        .encode(&EncodeRequest::new(
            "Met Alice at coffee shop. She suggested JWT for auth.",
        ))
        .unwrap();
    source
        .encode(&EncodeRequest::new("Database host is db.example.com"))
        .unwrap();

    let snapshot = source.export(false).unwrap();
    let target = NeuralMemory::in_memory("clone").unwrap();
    let report = target.import(&snapshot, MergeStrategy::Skip).unwrap();
    assert_eq!(report.neurons_imported, snapshot.neurons.len() as u64);

    let source_stats = source.stats().unwrap();
    let target_stats = target.stats().unwrap();
    assert_eq!(source_stats.neurons, target_stats.neurons);
    assert_eq!(source_stats.synapses, target_stats.synapses);
    assert_eq!(source_stats.fibers, target_stats.fibers);

    // The clone answers the same question.
    let result = target
        .query(&QueryRequest::new("What did Alice suggest?"))
        .unwrap();
    assert!(result.neurons_activated > 0);
}

// ----------------------------------------------------------------------------
// Health report through the facade
// ----------------------------------------------------------------------------

#[test]
fn health_report_grades_a_working_brain() {
    let memory = brain();
    memory
        .encode(&EncodeRequest::new(
            "Met Alice at coffee shop. She suggested JWT for auth.",
        ))
        .unwrap();
    memory
        .query(&QueryRequest::new("What did Alice suggest?"))
        .unwrap();

    let report = memory.health().unwrap();
    assert!(('A'..='F').contains(&report.grade));
    assert!((0.0..=100.0).contains(&report.purity));
    assert!(report.neurons > 0);
}
