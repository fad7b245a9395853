//! Medication aggregate — model and validation.

pub mod model;

pub use model::{DoseRecord, Frequency, Medication, NewMedication};
