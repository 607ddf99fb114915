pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{ToothClassifier, ModelConfig, NUM_CHANNELS, softmax_cross_entropy, load_image_tensor};
pub use training::{accuracy, train_model, ExponentialDecay, MiniBatchStream, TrainedModel, TrainingReport};
pub use inference::{InferenceEngine, Prediction};
