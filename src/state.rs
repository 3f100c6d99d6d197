use crate::pipeline::GatingPipeline;

// app's shared state
pub struct AppState {
    pub pipeline: GatingPipeline, // stages hold config only, rate windows live in the store
}
