// State reconciliation and telemetry buffers
pub mod buffers;
pub mod reconciler;

pub use buffers::{LogBuffer, SampleList, SampleRef};
pub use reconciler::{Applied, StateReconciler};
