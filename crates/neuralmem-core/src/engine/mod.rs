//! Retrieval and learning engine: spreading activation, reflex conduction,
//! stabilization, reconstruction, Hebbian learning, and the pipeline that
//! orchestrates them.

pub mod activation;
pub mod learning;
pub mod pipeline;
pub mod reconstruction;
pub mod reflex;
pub mod stabilization;

pub use activation::{ActivationMap, ActivationResult, SpreadingActivation, MAX_QUEUE_ENTRIES};
pub use learning::{
    anti_hebbian_update, effective_rate, hebbian_update, normalize_outgoing, LearningConfig,
    WeightUpdate,
};
pub use pipeline::{DepthLevel, QueryRequest, ReflexPipeline, RetrievalResult};
pub use reconstruction::{Reconstruction, Reconstructor, ScoreBreakdown, SynthesisMethod};
pub use reflex::{apply_co_activation_boost, ReflexActivation};
pub use stabilization::{lateral_inhibition, stabilize, StabilizationReport};
