//! Graph data model: neurons, synapses, fibers, maturation, brain.

pub mod brain;
pub mod fiber;
pub mod freshness;
pub mod maturation;
pub mod memory_types;
pub mod neuron;
pub mod synapse;

pub use brain::{Brain, BrainConfig};
pub use fiber::{Fiber, CONDUCTION_BUMP};
pub use freshness::{evaluate_freshness, Freshness, FreshnessLevel};
pub use maturation::{Maturation, MaturationStage};
pub use memory_types::{suggest_memory_type, MemoryType};
pub use neuron::{canonicalize, sigmoid, Neuron, NeuronState, NeuronType};
pub use synapse::{Direction, Synapse, SynapseType, W_MAX};

/// Free-form metadata carried by neurons, synapses, and fibers.
/// BTreeMap keeps serialization deterministic for snapshots.
pub type Metadata = std::collections::BTreeMap<String, serde_json::Value>;
